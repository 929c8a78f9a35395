//! CLI presenter for output formatting

use colored::*;
use indicatif::{ProgressBar, ProgressStyle};

use crate::domain::permissions::{GrantState, HealthStatus, PermissionSet};

/// Presenter for CLI output formatting.
/// Status lines go to stderr, report data to stdout.
pub struct Presenter {
    spinner: Option<ProgressBar>,
}

impl Presenter {
    pub fn new() -> Self {
        Self { spinner: None }
    }

    /// Start a spinner with message
    pub fn start_spinner(&mut self, message: &str) {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        spinner.set_style(style);
        spinner.set_message(message.to_string());
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        self.spinner = Some(spinner);
    }

    /// Mark spinner as success and finish
    pub fn spinner_success(&mut self, message: &str) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_with_message(format!("{} {}", "✓".green(), message));
        }
    }

    /// Mark spinner as failed and finish
    pub fn spinner_fail(&mut self, message: &str) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_with_message(format!("{} {}", "✗".red(), message));
        }
    }

    /// Stop spinner without status
    pub fn stop_spinner(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
    }

    /// Print info message to stderr
    pub fn info(&self, message: &str) {
        eprintln!("{} {}", "ℹ".cyan(), message);
    }

    /// Print success message to stderr
    pub fn success(&self, message: &str) {
        eprintln!("{} {}", "✓".green(), message);
    }

    /// Print warning message to stderr
    pub fn warn(&self, message: &str) {
        eprintln!("{} {}", "⚠".yellow(), message);
    }

    /// Print error message to stderr
    pub fn error(&self, message: &str) {
        eprintln!("{} {}", "✗".red(), message);
    }

    /// Output text to stdout
    pub fn output(&self, text: &str) {
        println!("{}", text);
    }

    /// Report section heading on stdout
    pub fn section(&self, title: &str) {
        println!();
        println!("{}", title.bold());
    }

    /// Print a key-value pair
    pub fn key_value(&self, key: &str, value: &str) {
        println!("{}: {}", key.cyan(), value);
    }

    /// `Label: STATE` lines, uncolored so the login probe can parse them.
    pub fn permission_report(&self, set: &PermissionSet) {
        for line in set.to_report_lines() {
            println!("{}", line);
        }
    }

    /// Colored `Label: STATE` lines for the human-facing report.
    pub fn permission_states(&self, set: &PermissionSet) {
        for (capability, state) in set.iter() {
            let state_text = match state {
                GrantState::Granted => state.to_string().green(),
                GrantState::Denied => state.to_string().red(),
                GrantState::Unknown => state.to_string().yellow(),
            };
            println!("  {}: {}", capability.label(), state_text);
        }
    }

    pub fn health(&self, status: HealthStatus) {
        let text = match status {
            HealthStatus::Ok => status.to_string().green().bold(),
            HealthStatus::Warn => status.to_string().yellow().bold(),
            HealthStatus::Incomplete => status.to_string().red().bold(),
        };
        println!("Status: {}", text);
    }
}

impl Default for Presenter {
    fn default() -> Self {
        Self::new()
    }
}
