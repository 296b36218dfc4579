// Terminal output helpers.
// The phase banner and error line formats are part of the contract with the
// supervising scheduler, which scrapes stdout.

use colored::Colorize;

/// Phase banner, scraped by the scheduler: `=== Phase: <name> ===`
pub fn print_phase(name: &str) {
    println!();
    println!("{}", format!("=== Phase: {} ===", name).bright_cyan().bold());
}

/// Error line, re-emitted to stdout so it is visible to the scheduler:
/// `ERROR [<phase>]: <msg>`
pub fn print_phase_error(phase: &str, message: &str) {
    println!("{}", format!("ERROR [{}]: {}", phase, message).bright_red());
}

pub fn print_success(message: &str) {
    println!("{}", format!("✅ {}", message).bright_green().bold());
}

pub fn print_info(message: &str) {
    println!("{}", format!("ℹ️  {}", message).bright_cyan());
}

pub fn print_warning(message: &str) {
    println!("{}", format!("⚠️  {}", message).bright_yellow());
}
