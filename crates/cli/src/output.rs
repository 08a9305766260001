//! Output formatting utilities

use buffer_lib::{Convergence, ObjectState};
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print a value as pretty JSON
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format whole gibibytes the way quantities are written
pub fn format_gi(gi: i64) -> String {
    format!("{}Gi", gi)
}

/// Color a convergence outcome
pub fn color_outcome(outcome: Convergence) -> String {
    match outcome {
        Convergence::Created | Convergence::Updated { .. } => {
            outcome.to_string().green().to_string()
        }
        Convergence::Unchanged => outcome.to_string().dimmed().to_string(),
        Convergence::Abandoned { .. } => outcome.to_string().red().to_string(),
    }
}

/// Color an observed object state
pub fn color_state(state: ObjectState) -> String {
    match state {
        ObjectState::InSync => "in sync".green().to_string(),
        ObjectState::Drifted => "drifted".yellow().to_string(),
        ObjectState::Missing => "missing".red().to_string(),
    }
}
