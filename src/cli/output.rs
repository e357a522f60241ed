//! Output formatting module for Tiernet
//!
//! Provides colored output, a spinner while a run is in progress, and the
//! human and JSON renderings of a provisioning report.

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io::{self, Write};
use std::time::{Duration, Instant};
use tiernet::provider::ResourceKind;
use tiernet::provision::{ProvisionReport, Step};

/// Console label of a resource id line.
pub fn id_label(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Network => "VPC ID",
        ResourceKind::InternetGateway => "Internet gateway ID",
        ResourceKind::RouteTable => "Route table ID",
        ResourceKind::Subnet => "Subnet ID",
        ResourceKind::Address => "Allocation ID",
        ResourceKind::NatGateway => "NAT gateway ID",
        ResourceKind::SecurityGroup => "Security group ID",
        ResourceKind::Instance => "Instance ID",
    }
}

/// Output formatter for different output modes
pub struct OutputFormatter {
    /// Use colored output
    use_color: bool,
    /// JSON output mode
    json_mode: bool,
    /// Verbosity level
    verbosity: u8,
    /// Start time for duration calculations
    start_time: Instant,
}

impl OutputFormatter {
    /// Create a new output formatter
    pub fn new(use_color: bool, json_mode: bool, verbosity: u8) -> Self {
        // Respect NO_COLOR environment variable
        let use_color = use_color && std::env::var("NO_COLOR").is_err();

        Self {
            use_color,
            json_mode,
            verbosity,
            start_time: Instant::now(),
        }
    }

    pub fn is_json(&self) -> bool {
        self.json_mode
    }

    /// Print a banner/header
    pub fn banner(&self, title: &str) {
        if self.json_mode {
            return;
        }

        let line = "=".repeat(title.len() + 4);
        if self.use_color {
            println!("\n{}", line.bright_blue());
            println!("{}", format!("  {}  ", title).bright_blue().bold());
            println!("{}\n", line.bright_blue());
        } else {
            println!("\n{}", line);
            println!("  {}  ", title);
            println!("{}\n", line);
        }
    }

    /// Print a section header
    pub fn section(&self, title: &str) {
        if self.json_mode {
            return;
        }

        if self.use_color {
            println!("\n{}", title.cyan().bold());
            println!("{}", "-".repeat(title.len()).cyan());
        } else {
            println!("\n{}", title);
            println!("{}", "-".repeat(title.len()));
        }
    }

    /// Print an error message
    pub fn error(&self, message: &str) {
        if self.json_mode {
            eprintln!("{}", json_line("error", message));
            return;
        }

        if self.use_color {
            eprintln!("{} {}", "ERROR:".red().bold(), message);
        } else {
            eprintln!("ERROR: {}", message);
        }
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        if self.json_mode {
            eprintln!("{}", json_line("warning", message));
            return;
        }

        if self.use_color {
            eprintln!("{} {}", "WARNING:".yellow().bold(), message);
        } else {
            eprintln!("WARNING: {}", message);
        }
    }

    /// Print a hint message
    pub fn hint(&self, message: &str) {
        if self.json_mode {
            eprintln!("{}", json_line("hint", message));
            return;
        }

        if self.use_color {
            eprintln!("{} {}", "HINT:".cyan().bold(), message);
        } else {
            eprintln!("HINT: {}", message);
        }
    }

    /// Print an info message (respects verbosity)
    pub fn info(&self, message: &str) {
        if self.verbosity < 1 || self.json_mode {
            return;
        }

        if self.use_color {
            println!("{} {}", "INFO:".blue(), message);
        } else {
            println!("INFO: {}", message);
        }
    }

    /// Print a debug message (requires higher verbosity)
    pub fn debug(&self, message: &str) {
        if self.verbosity < 2 || self.json_mode {
            return;
        }

        if self.use_color {
            println!("{} {}", "DEBUG:".magenta(), message);
        } else {
            println!("DEBUG: {}", message);
        }
    }

    /// Create a spinner for indeterminate progress
    pub fn create_spinner(&self, message: &str) -> Option<ProgressBar> {
        if self.json_mode {
            return None;
        }

        let sp = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        sp.set_style(style);
        sp.set_message(message.to_string());
        sp.enable_steady_tick(Duration::from_millis(100));

        Some(sp)
    }

    /// Print any serializable value as pretty JSON
    pub fn json<T: Serialize>(&self, value: &T) {
        match serde_json::to_string_pretty(value) {
            Ok(s) => println!("{}", s),
            Err(e) => self.error(&format!("Failed to serialize output: {}", e)),
        }
    }

    /// Print the id lines and summary of a run
    pub fn report(&self, report: &ProvisionReport) {
        if self.json_mode {
            self.json(report);
            return;
        }

        for resource in &report.created {
            let label = format!("{}:", id_label(resource.kind));
            let suffix = if resource.reused { " (reused)" } else { "" };
            if self.use_color {
                println!(
                    "{} {}{}  {}",
                    label.bright_white().bold(),
                    resource.id.green(),
                    suffix.bright_black(),
                    resource.name.bright_black()
                );
            } else {
                println!("{} {}{}  {}", label, resource.id, suffix, resource.name);
            }
        }

        for warning in &report.warnings {
            self.warning(warning);
        }

        let created = report.newly_created().count();
        let reused = report.created.len() - created;
        let summary = format!(
            "{} created, {} reused, {} of {} steps completed in {}",
            created,
            reused,
            report.completed.len(),
            Step::ALL.len(),
            format_duration(self.start_time.elapsed())
        );

        if self.use_color {
            println!("\n{}", summary.bright_black());
        } else {
            println!("\n{}", summary);
        }
    }

    /// Print final status line
    pub fn status(&self, success: bool, message: &str) {
        if self.json_mode {
            return;
        }

        if self.use_color {
            if success {
                println!("{}", message.green().bold());
            } else {
                println!("{}", message.red().bold());
            }
        } else {
            println!("{}", message);
        }
    }

    /// Flush stdout
    pub fn flush(&self) {
        let _ = io::stdout().flush();
    }
}

fn json_line(kind: &str, message: &str) -> String {
    serde_json::json!({
        "type": kind,
        "message": message
    })
    .to_string()
}

/// Format a duration as a human-readable string
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let millis = duration.subsec_millis();

    if secs >= 3600 {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        let secs = secs % 60;
        format!("{}h {}m {}s", hours, mins, secs)
    } else if secs >= 60 {
        let mins = secs / 60;
        let secs = secs % 60;
        format!("{}m {}s", mins, secs)
    } else if secs > 0 {
        format!("{}.{:03}s", secs, millis)
    } else {
        format!("{}ms", millis)
    }
}
