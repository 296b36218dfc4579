//! CLI definitions for the runner
//!
//! The scheduler invokes the binary with no arguments (the task and its
//! parameters travel in the environment), so `run` is the default command.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "cs-runner",
    version,
    about = "Deployment task runner for the Cloudstation platform",
    long_about = "Executes one deployment job per invocation: fetch, build with \
                  fallback, push, deploy, release. Task type and parameters are \
                  read from the scheduler environment."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute the scheduler-assigned task (default)
    Run,

    /// Parse a config document and report diagnostics
    Validate {
        /// Path to the config document
        #[arg(default_value = "cloudstation.hcl")]
        file: PathBuf,
    },
}
