//! Simulate command - run against the in-memory provider
//!
//! Executes the full step sequence without touching a cloud account. Runs
//! share one provider, so `--runs 2` shows the difference between a plain
//! second run (a second, independent topology) and one with
//! `--reuse-existing` (nothing new is created).

use super::{exit_code, run_and_report, CommandContext, ConfigOverrides};
use anyhow::{Context, Result};
use clap::Parser;
use std::time::Duration;
use tiernet::provider::InMemoryProvider;

/// Arguments for the simulate command
#[derive(Parser, Debug, Clone)]
pub struct SimulateArgs {
    /// Number of consecutive runs against the same simulated account
    #[arg(long, default_value = "1", value_parser = clap::value_parser!(u32).range(1..=10))]
    pub runs: u32,

    /// Poll interval of the simulated waits, in milliseconds
    #[arg(long, default_value = "20")]
    pub poll_interval_ms: u64,

    #[command(flatten)]
    pub overrides: ConfigOverrides,
}

impl SimulateArgs {
    /// Execute the simulate command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let mut config = ctx.config.clone();
        self.overrides.apply(&mut config);
        config.wait.poll_interval = Duration::from_millis(self.poll_interval_ms.max(1));

        config.validate().context("configuration is not valid")?;

        ctx.output.banner("TIERNET SIMULATE");
        let provider = InMemoryProvider::new();
        let mut code = 0;

        for run in 1..=self.runs {
            if self.runs > 1 {
                ctx.output.section(&format!("Run {} of {}", run, self.runs));
            }

            let outcome = run_and_report(ctx, &provider, &config)
                .await
                .context("failed to start simulation")?;
            code = exit_code(&outcome);
            if code != 0 {
                break;
            }
        }

        ctx.output.debug(&format!(
            "Simulated account holds {} resources after {} run(s)",
            provider.resources().len(),
            self.runs
        ));

        Ok(code)
    }
}
