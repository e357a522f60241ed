//! Validate command - check configuration without provisioning

use super::{CommandContext, ConfigOverrides};
use anyhow::{Context, Result};
use clap::Parser;
use tiernet::config::ProvisionConfig;

/// Arguments for the validate command
#[derive(Parser, Debug, Clone)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub overrides: ConfigOverrides,
}

impl ValidateArgs {
    /// Execute the validate command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let mut config = ctx.config.clone();
        self.overrides.apply(&mut config);

        if let Err(e) = config.validate() {
            ctx.output.error(&e.to_string());
            return Ok(1);
        }

        if ctx.output.is_json() {
            ctx.output.json(&config);
        } else {
            ctx.output.banner("TIERNET CONFIGURATION");
            println!("{}", render_toml(&config)?);
            ctx.output.status(true, "Configuration is valid.");
        }

        Ok(0)
    }
}

fn render_toml(config: &ProvisionConfig) -> Result<String> {
    toml::to_string_pretty(config).context("failed to render configuration")
}
