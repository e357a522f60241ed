//! Bounded polling.
//!
//! Network availability, NAT gateway availability and instance start-up are
//! asynchronous on the provider side. All three go through [`poll_until`],
//! which polls a state function until a readiness predicate is satisfied,
//! the resource enters a terminal state, the timeout elapses, or the run is
//! cancelled. Each individual poll is bounded by the remaining time, so a
//! provider call that never returns still ends in [`Error::WaitTimeout`].

use crate::error::{Error, Result};
use crate::provider::{ProviderResult, ResourceKind};
use crate::provision::Step;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Interval and upper bound of one wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitPolicy {
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl WaitPolicy {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(300),
        }
    }
}

/// Verdict of the readiness predicate for one observed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Target state reached
    Ready,
    /// Keep polling
    Pending,
    /// Target state can no longer be reached
    Failed,
}

/// What is being waited on, for logs and errors.
#[derive(Debug, Clone, Copy)]
pub struct WaitTarget<'a> {
    pub step: Step,
    pub kind: ResourceKind,
    pub id: &'a str,
    /// Human name of the target state
    pub desired: &'a str,
}

/// Poll `poll` every `policy.interval` until `check` says [`Readiness::Ready`].
///
/// Not-found and transient provider errors count as "still pending";
/// any other provider error ends the wait immediately.
pub async fn poll_until<S, F, Fut, P>(
    target: WaitTarget<'_>,
    policy: &WaitPolicy,
    cancel: &CancellationToken,
    mut poll: F,
    check: P,
) -> Result<S>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProviderResult<S>>,
    P: Fn(&S) -> Readiness,
    S: fmt::Display,
{
    let start = Instant::now();
    let deadline = start + policy.timeout;
    let mut last_state: Option<String> = None;
    let mut attempt: u32 = 0;

    info!(
        "Waiting for {} '{}' to become '{}' (timeout: {:?})",
        target.kind, target.id, target.desired, policy.timeout
    );

    let timed_out = |last_state: Option<String>| Error::WaitTimeout {
        kind: target.kind,
        id: target.id.to_string(),
        target: target.desired.to_string(),
        waited: start.elapsed(),
        last_state,
    };

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(timed_out(last_state));
        }

        attempt += 1;
        match tokio::time::timeout(remaining, poll()).await {
            Err(_) => return Err(timed_out(last_state)),
            Ok(Ok(state)) => match check(&state) {
                Readiness::Ready => {
                    info!(
                        "{} '{}' is '{}' after {:?} ({} polls)",
                        target.kind,
                        target.id,
                        state,
                        start.elapsed(),
                        attempt
                    );
                    return Ok(state);
                }
                Readiness::Failed => {
                    return Err(Error::WaitFailed {
                        kind: target.kind,
                        id: target.id.to_string(),
                        target: target.desired.to_string(),
                        state: state.to_string(),
                    });
                }
                Readiness::Pending => {
                    debug!(
                        "{} '{}' is '{}' (poll {})",
                        target.kind, target.id, state, attempt
                    );
                    last_state = Some(state.to_string());
                }
            },
            Ok(Err(e)) if e.is_not_found() => {
                debug!("{} '{}' not visible yet: {}", target.kind, target.id, e);
            }
            Ok(Err(e)) if e.is_transient() => {
                warn!("Transient error polling {} '{}': {}", target.kind, target.id, e);
            }
            Ok(Err(e)) => return Err(e.into()),
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(timed_out(last_state));
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(Error::Cancelled { step: target.step });
            }
            _ = tokio::time::sleep(policy.interval.min(remaining)) => {}
        }
    }
}
