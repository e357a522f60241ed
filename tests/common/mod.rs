//! Shared test utilities for the Tiernet test suite.
//!
//! Provides a fast configuration (short polls, near-zero retry backoff),
//! a run helper over the in-memory provider, and event-log lookups.
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use std::time::Duration;

use tiernet::config::ProvisionConfig;
use tiernet::provider::memory::ProviderEvent;
use tiernet::provider::{InMemoryProvider, ResourceKind};
use tiernet::provision::{ProvisionOutcome, Provisioner};
use tokio_util::sync::CancellationToken;

/// Operator range used by every test run.
pub const OPERATOR_CIDR: &str = "203.0.113.0/24";

/// Configuration with millisecond polls and retries.
pub fn fast_config() -> ProvisionConfig {
    let mut config = ProvisionConfig {
        allowed_source_cidr: Some(OPERATOR_CIDR.to_string()),
        ..ProvisionConfig::default()
    };
    config.wait.poll_interval = Duration::from_millis(5);
    config.wait.network_timeout = Duration::from_secs(5);
    config.wait.nat_gateway_timeout = Duration::from_secs(5);
    config.wait.instance_timeout = Duration::from_secs(5);
    config.retry.initial_delay = Duration::from_millis(1);
    config.retry.max_delay = Duration::from_millis(5);
    config
}

/// Same as [`fast_config`] with reuse turned on.
pub fn reuse_config() -> ProvisionConfig {
    ProvisionConfig {
        reuse_existing: true,
        ..fast_config()
    }
}

/// Run one provisioning pass.
pub async fn provision(provider: &InMemoryProvider, config: &ProvisionConfig) -> ProvisionOutcome {
    Provisioner::new(provider, config)
        .expect("test configuration is valid")
        .run()
        .await
}

/// Run one provisioning pass that can be cancelled through `cancel`.
pub async fn provision_with_cancel(
    provider: &InMemoryProvider,
    config: &ProvisionConfig,
    cancel: CancellationToken,
) -> ProvisionOutcome {
    Provisioner::new(provider, config)
        .expect("test configuration is valid")
        .with_cancellation(cancel)
        .run()
        .await
}

/// Index of the first event matching `pred`.
pub fn position<F>(events: &[ProviderEvent], pred: F) -> usize
where
    F: Fn(&ProviderEvent) -> bool,
{
    events
        .iter()
        .position(pred)
        .unwrap_or_else(|| panic!("no matching event in {:#?}", events))
}

/// Index of the `Created` event of `id`.
pub fn created_at(events: &[ProviderEvent], id: &str) -> usize {
    position(events, |e| matches!(e, ProviderEvent::Created { id: created, .. } if created == id))
}

/// Kinds of all `Created` events, in order.
pub fn created_kinds(events: &[ProviderEvent]) -> Vec<ResourceKind> {
    events
        .iter()
        .filter_map(|e| match e {
            ProviderEvent::Created { kind, .. } => Some(*kind),
            _ => None,
        })
        .collect()
}

/// Assert an optional report id is set and return it.
pub fn some_id(id: &Option<String>) -> &str {
    id.as_deref().expect("id recorded in the report")
}
