//! Subcommands module for Tiernet CLI
//!
//! This module contains all the subcommand implementations.

pub mod provision;
pub mod simulate;
pub mod validate;

use crate::cli::output::OutputFormatter;
use clap::Args;
use tiernet::config::ProvisionConfig;
use tiernet::provider::CloudProvider;
use tiernet::provision::{ProvisionOutcome, Provisioner};
use tokio_util::sync::CancellationToken;

/// Common context shared between commands
pub struct CommandContext {
    /// Configuration after file and environment layers
    pub config: ProvisionConfig,
    /// Output formatter
    pub output: OutputFormatter,
    /// Verbosity level
    pub verbosity: u8,
    /// Cancelled on Ctrl-C
    pub cancel: CancellationToken,
}

impl CommandContext {
    /// Create a new command context from CLI arguments
    pub fn new(cli: &crate::cli::Cli, config: ProvisionConfig, cancel: CancellationToken) -> Self {
        let output = OutputFormatter::new(!cli.no_color, cli.is_json(), cli.verbosity());

        Self {
            config,
            output,
            verbosity: cli.verbosity(),
            cancel,
        }
    }
}

/// Flags that override configuration for any command.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Operator range allowed to reach the jump box (ICMP and SSH)
    #[arg(long, value_name = "CIDR")]
    pub allowed_source_cidr: Option<String>,

    /// Reuse resources that already carry the configured names
    #[arg(long)]
    pub reuse_existing: bool,
}

impl ConfigOverrides {
    /// Apply the CLI layer on top of `config`.
    pub fn apply(&self, config: &mut ProvisionConfig) {
        if let Some(cidr) = &self.allowed_source_cidr {
            config.allowed_source_cidr = Some(cidr.clone());
        }
        if self.reuse_existing {
            config.reuse_existing = true;
        }
    }
}

/// Process exit code of a finished run.
pub fn exit_code(outcome: &ProvisionOutcome) -> i32 {
    outcome.error.as_ref().map_or(0, tiernet::Error::exit_code)
}

/// Run one provisioning pass and print its report.
pub async fn run_and_report<P>(
    ctx: &CommandContext,
    provider: &P,
    config: &ProvisionConfig,
) -> tiernet::Result<ProvisionOutcome>
where
    P: CloudProvider + ?Sized,
{
    let provisioner = Provisioner::new(provider, config)?.with_cancellation(ctx.cancel.clone());

    // Log lines on stderr would tear through the spinner
    let spinner = if ctx.verbosity == 0 {
        ctx.output.create_spinner(&format!(
            "Provisioning two-tier network via {}...",
            provider.name()
        ))
    } else {
        None
    };
    let outcome = provisioner.run().await;
    if let Some(sp) = spinner {
        sp.finish_and_clear();
    }

    ctx.output.report(&outcome.report);

    match &outcome.error {
        None => ctx.output.status(true, "Provisioning completed successfully."),
        Some(e) => {
            ctx.output.error(&e.to_string());
            if !outcome.report.created.is_empty() {
                ctx.output.hint(&format!(
                    "{} resources were created before the run stopped and have not been removed",
                    outcome.report.created.len()
                ));
            }
            ctx.output.status(false, "Provisioning failed.");
        }
    }
    ctx.output.flush();

    Ok(outcome)
}
