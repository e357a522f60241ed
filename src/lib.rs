//! # Tiernet - Two-Tier Network Provisioning
//!
//! Tiernet stands up a fixed two-tier network in a cloud account: one
//! network with a public and a private subnet, an internet gateway, a NAT
//! gateway, two route tables, two security groups, a public jump box and a
//! private application instance.
//!
//! ## Core Concepts
//!
//! - **Provider**: the cloud primitives a run needs ([`provider::CloudProvider`])
//! - **Provisioner**: walks the steps in dependency order ([`provision::Provisioner`])
//! - **Waits**: bounded polling until a resource is ready ([`wait::poll_until`])
//! - **Report**: every id the run created, complete or partial ([`provision::ProvisionReport`])
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                           CLI Interface                              │
//! │             (provision / simulate / validate via clap)               │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                            Provisioner                               │
//! │   fabric → routing → subnets → NAT → security groups → compute       │
//! └─────────────────────────────────────────────────────────────────────┘
//!          │                         │                         │
//!          ▼                         ▼                         ▼
//! ┌─────────────────┐   ┌─────────────────────┐   ┌─────────────────────┐
//! │  Retry Policy   │   │   Bounded Waits     │   │   Reuse Lookups     │
//! │  (throttling)   │   │   (poll_until)      │   │   (Name tags)       │
//! └─────────────────┘   └─────────────────────┘   └─────────────────────┘
//!          │                         │                         │
//!          └─────────────────────────┼─────────────────────────┘
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                          CloudProvider                               │
//! │                 (EC2 via the AWS SDK, or in-memory)                  │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,no_run
//! use tiernet::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let mut config = ProvisionConfig::load(None)?;
//!     config.allowed_source_cidr = Some("203.0.113.7/32".to_string());
//!
//!     let provider = InMemoryProvider::new();
//!     let outcome = Provisioner::new(&provider, &config)?.run().await;
//!
//!     let report = outcome.into_result()?;
//!     println!("VPC ID: {}", report.network_id.unwrap_or_default());
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Re-export commonly used items in prelude
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::config::ProvisionConfig;
    pub use crate::error::{Error, Result};
    #[cfg(feature = "aws")]
    pub use crate::provider::aws::Ec2Provider;
    pub use crate::provider::{CloudProvider, InMemoryProvider, ProviderError, ResourceKind};
    pub use crate::provision::{
        CreatedResource, ProvisionOutcome, ProvisionReport, Provisioner, Step,
    };
    pub use crate::wait::WaitPolicy;
    pub use tokio_util::sync::CancellationToken;
}

// ============================================================================
// Core
// ============================================================================

pub mod error;

pub use error::{Error, Result};

/// Configuration loading, layering and validation.
pub mod config;

/// IPv4 CIDR arithmetic for layout validation.
pub mod cidr;

// ============================================================================
// Provider Boundary
// ============================================================================

pub mod provider;

// ============================================================================
// Provisioning
// ============================================================================

pub mod provision;

/// Retry with backoff for transient provider errors.
pub mod retry;

pub mod wait;

// ============================================================================
// Version Information
// ============================================================================

/// Returns the current version of Tiernet.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
