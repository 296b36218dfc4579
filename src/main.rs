use clap::Parser;
use std::sync::Arc;

mod cli;
mod commands;
mod config;
mod descriptor;
mod domain;
mod error;
mod infrastructure;
mod plugins;
mod redact;
mod services;
mod ui;
mod workdir;

use cli::{Cli, Commands};
use commands::Dependencies;
use error::RunnerError;
use infrastructure::events::WebhookEventBus;
use plugins::PluginRegistry;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging with LOGGING env var support
    // LOGGING=debug,info,warn,error or just LOGGING=debug
    let log_level = std::env::var("LOGGING")
        .or_else(|_| std::env::var("LOG_LEVEL"))
        .unwrap_or_else(|_| {
            if cli.verbose {
                "debug".to_string()
            } else {
                "info".to_string()
            }
        });

    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_ansi(false) // Disable ANSI escape codes for cleaner output
        .init();

    let code = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_task().await,
        Commands::Validate { file } => validate(&file),
    };
    std::process::exit(code);
}

async fn run_task() -> i32 {
    if std::env::var(commands::TASK_ENV).is_err() {
        let err = commands::task_error_for_missing_env();
        ui::print_phase_error("dispatch", &err.to_string());
        return err.exit_code();
    }

    let deps = Dependencies {
        plugins: Arc::new(PluginRegistry::new()),
        bus: WebhookEventBus::from_env(),
        port_detector: None,
        http: reqwest::Client::new(),
        cancel: tokio_util::sync::CancellationToken::new(),
        deadline_fired: Arc::new(std::sync::atomic::AtomicBool::new(false)),
    };
    deps.arm_deadline();
    install_signal_handlers(&deps);

    match commands::dispatch(&deps).await {
        Ok(()) => 0,
        Err(e) => {
            ui::print_phase_error("dispatch", &e.to_string());
            e.exit_code()
        }
    }
}

fn install_signal_handlers(deps: &Dependencies) {
    let cancel = deps.cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        cancel.cancel();
    });

    #[cfg(unix)]
    {
        let cancel = deps.cancel.clone();
        tokio::spawn(async move {
            let mut term = match tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate(),
            ) {
                Ok(term) => term,
                Err(_) => return,
            };
            term.recv().await;
            cancel.cancel();
        });
    }
}

fn validate(file: &std::path::Path) -> i32 {
    let parsed = match config::parse_file(file, &config::ProcessEnv) {
        Ok(parsed) => parsed,
        Err(e) => {
            let err: RunnerError = e.into();
            ui::print_phase_error("validate", &err.to_string());
            return err.exit_code();
        }
    };

    // Every stage's `use` must name a plugin compiled into this binary.
    let plugins = PluginRegistry::new();
    if let Err(e) = config::check_plugins(&parsed, &plugins) {
        let err: RunnerError = e.into();
        ui::print_phase_error("validate", &err.to_string());
        return err.exit_code();
    }

    ui::print_success(&format!(
        "{} is valid: project '{}', {} application(s), {} variable(s)",
        file.display(),
        parsed.project,
        parsed.applications.len(),
        parsed.variables.len()
    ));
    0
}
