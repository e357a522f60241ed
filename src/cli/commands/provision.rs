//! Provision command - run against AWS
//!
//! This module implements the `provision` subcommand, which builds the
//! topology in a real account through the EC2 API.

use super::{exit_code, run_and_report, CommandContext, ConfigOverrides};
use anyhow::{Context, Result};
use clap::Parser;

/// Arguments for the provision command
#[derive(Parser, Debug, Clone)]
pub struct ProvisionArgs {
    /// Region to provision in
    #[arg(long, env = "TIERNET_REGION")]
    pub region: Option<String>,

    /// Existing key pair for both instances
    #[arg(long)]
    pub key_name: Option<String>,

    #[command(flatten)]
    pub overrides: ConfigOverrides,
}

impl ProvisionArgs {
    /// Execute the provision command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let mut config = ctx.config.clone();
        if let Some(region) = &self.region {
            config.region = region.clone();
        }
        if let Some(key_name) = &self.key_name {
            config.key_name = key_name.clone();
        }
        self.overrides.apply(&mut config);

        config.validate().context("configuration is not valid")?;

        ctx.output.banner("TIERNET PROVISION");
        ctx.output.info(&format!(
            "Region {}, network {}, operator range {}",
            config.region,
            config.vpc_cidr,
            config.allowed_source_cidr.as_deref().unwrap_or_default()
        ));
        if config.reuse_existing {
            ctx.output
                .info("Reuse enabled: resources with matching names will not be recreated");
        }

        self.run(ctx, &config).await
    }

    #[cfg(feature = "aws")]
    async fn run(
        &self,
        ctx: &CommandContext,
        config: &tiernet::config::ProvisionConfig,
    ) -> Result<i32> {
        let provider = tiernet::provider::aws::Ec2Provider::connect(&config.region).await;
        let outcome = run_and_report(ctx, &provider, config)
            .await
            .context("failed to start provisioning")?;
        Ok(exit_code(&outcome))
    }

    #[cfg(not(feature = "aws"))]
    async fn run(
        &self,
        ctx: &CommandContext,
        _config: &tiernet::config::ProvisionConfig,
    ) -> Result<i32> {
        ctx.output
            .error("tiernet was built without the `aws` feature; only `simulate` is available");
        Ok(1)
    }
}
