//! Provisioning sequence.
//!
//! A [`Provisioner`] drives one run: it walks the [`Step`]s in order, each
//! step implemented by one of the component modules, and records everything
//! it creates in a [`ProvisionReport`]. A fatal error stops the run where it
//! is; the resources created so far stay in the account and are listed in the
//! partial report returned with the error.

pub mod compute;
pub mod fabric;
pub mod nat;
pub mod routing;
pub mod security;
pub mod subnet;

pub use nat::ReadyNatGateway;

use crate::config::ProvisionConfig;
use crate::error::{Error, Result};
use crate::provider::{CloudProvider, ProviderError, ProviderResult, ResourceKind, Tag};
use crate::retry::{RetryError, RetryPolicy};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// One step of a run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Network,
    InternetGateway,
    PublicRouteTable,
    PublicSubnet,
    PrivateSubnet,
    PublicRouteAssociation,
    JumpAddress,
    NatGateway,
    PrivateRouteTable,
    PublicSecurityGroup,
    PrivateSecurityGroup,
    PublicInstance,
    PrivateInstance,
}

impl Step {
    /// Every step, in the order a run executes them.
    pub const ALL: [Step; 13] = [
        Step::Network,
        Step::InternetGateway,
        Step::PublicRouteTable,
        Step::PublicSubnet,
        Step::PrivateSubnet,
        Step::PublicRouteAssociation,
        Step::JumpAddress,
        Step::NatGateway,
        Step::PrivateRouteTable,
        Step::PublicSecurityGroup,
        Step::PrivateSecurityGroup,
        Step::PublicInstance,
        Step::PrivateInstance,
    ];

    /// 1-based position in the run.
    pub fn number(&self) -> usize {
        Self::ALL.iter().position(|s| s == self).map_or(0, |i| i + 1)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Step::Network => "network",
            Step::InternetGateway => "internet gateway",
            Step::PublicRouteTable => "public route table",
            Step::PublicSubnet => "public subnet",
            Step::PrivateSubnet => "private subnet",
            Step::PublicRouteAssociation => "public route association",
            Step::JumpAddress => "jump box address",
            Step::NatGateway => "nat gateway",
            Step::PrivateRouteTable => "private route table",
            Step::PublicSecurityGroup => "public security group",
            Step::PrivateSecurityGroup => "private security group",
            Step::PublicInstance => "public instance",
            Step::PrivateInstance => "private instance",
        };
        write!(f, "{}", s)
    }
}

/// A resource the run created or reused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedResource {
    pub kind: ResourceKind,
    pub name: String,
    pub id: String,
    /// Found by name instead of created
    pub reused: bool,
}

/// Result of an obtain: the id, and whether it already existed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Obtained {
    pub id: String,
    pub reused: bool,
}

/// Everything a run produced, complete or partial.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionReport {
    pub run_id: String,
    pub provider: String,
    pub region: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,

    pub network_id: Option<String>,
    pub internet_gateway_id: Option<String>,
    pub public_route_table_id: Option<String>,
    pub private_route_table_id: Option<String>,
    pub public_subnet_id: Option<String>,
    pub private_subnet_id: Option<String>,
    pub jump_address_id: Option<String>,
    pub jump_address_association_id: Option<String>,
    pub nat_address_id: Option<String>,
    pub nat_gateway_id: Option<String>,
    pub public_group_id: Option<String>,
    pub private_group_id: Option<String>,
    pub public_instance_id: Option<String>,
    pub private_instance_id: Option<String>,

    /// Steps that finished, in order
    pub completed: Vec<Step>,
    /// Step that was running when the run stopped
    pub failed_step: Option<Step>,
    /// Resources in the order they were obtained
    pub created: Vec<CreatedResource>,
    /// Non-fatal problems (tagging failures)
    pub warnings: Vec<String>,
}

impl ProvisionReport {
    fn record(&mut self, kind: ResourceKind, name: &str, id: &str, reused: bool) {
        self.created.push(CreatedResource {
            kind,
            name: name.to_string(),
            id: id.to_string(),
            reused,
        });
    }

    /// Resources this run actually created.
    pub fn newly_created(&self) -> impl Iterator<Item = &CreatedResource> {
        self.created.iter().filter(|r| !r.reused)
    }

    /// Ids of every resource in the report.
    pub fn ids(&self) -> Vec<&str> {
        self.created.iter().map(|r| r.id.as_str()).collect()
    }
}

/// Report plus the error that stopped the run, if any.
#[derive(Debug)]
pub struct ProvisionOutcome {
    pub report: ProvisionReport,
    pub error: Option<Error>,
}

impl ProvisionOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> Result<ProvisionReport> {
        match self.error {
            None => Ok(self.report),
            Some(e) => Err(e),
        }
    }
}

/// Drives one provisioning run against a provider.
pub struct Provisioner<'a, P: CloudProvider + ?Sized> {
    provider: &'a P,
    config: &'a ProvisionConfig,
    source_cidr: String,
    retry: RetryPolicy,
    cancel: CancellationToken,
    report: ProvisionReport,
}

impl<'a, P: CloudProvider + ?Sized> Provisioner<'a, P> {
    /// Validate `config` and prepare a run.
    pub fn new(provider: &'a P, config: &'a ProvisionConfig) -> Result<Self> {
        config.validate()?;
        let source_cidr = config.allowed_source_cidr()?.to_string();

        let report = ProvisionReport {
            run_id: Uuid::new_v4().to_string(),
            provider: provider.name().to_string(),
            region: config.region.clone(),
            ..ProvisionReport::default()
        };

        Ok(Self {
            provider,
            config,
            source_cidr,
            retry: config.retry.policy(),
            cancel: CancellationToken::new(),
            report,
        })
    }

    /// Use `cancel` to stop the run between steps and during waits.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn report(&self) -> &ProvisionReport {
        &self.report
    }

    /// Run every step in order.
    pub async fn run(mut self) -> ProvisionOutcome {
        self.report.started_at = Some(Utc::now());
        info!(
            "Provisioning two-tier network in {} via {} (run {})",
            self.config.region, self.report.provider, self.report.run_id
        );

        let result = self.execute().await;
        self.report.finished_at = Some(Utc::now());

        match &result {
            Ok(()) => info!(
                "Provisioning finished: {} created, {} reused",
                self.report.newly_created().count(),
                self.report.created.len() - self.report.newly_created().count()
            ),
            Err(e) if e.is_cancelled() => {
                warn!("{}; {} resources remain", e, self.report.created.len())
            }
            Err(e) => error!(
                "Provisioning stopped at step '{}': {}",
                self.report
                    .failed_step
                    .map(|s| s.to_string())
                    .unwrap_or_default(),
                e
            ),
        }

        ProvisionOutcome {
            report: self.report,
            error: result.err(),
        }
    }

    async fn execute(&mut self) -> Result<()> {
        let config = self.config;

        self.begin(Step::Network)?;
        let network = self.build_network().await?;
        self.report.network_id = Some(network.id.clone());
        self.complete(Step::Network);

        self.begin(Step::InternetGateway)?;
        let gateway = self.attach_internet_gateway(&network).await?;
        self.report.internet_gateway_id = Some(gateway.id.clone());
        self.complete(Step::InternetGateway);

        self.begin(Step::PublicRouteTable)?;
        let public_table = self.create_public_route_table(&network.id, &gateway.id).await?;
        self.report.public_route_table_id = Some(public_table.id.clone());
        self.complete(Step::PublicRouteTable);

        self.begin(Step::PublicSubnet)?;
        let public_subnet = self
            .create_subnet(&network.id, &config.public_cidr, &config.names.public_subnet)
            .await?;
        self.report.public_subnet_id = Some(public_subnet.id.clone());
        self.complete(Step::PublicSubnet);

        self.begin(Step::PrivateSubnet)?;
        let private_subnet = self
            .create_subnet(&network.id, &config.private_cidr, &config.names.private_subnet)
            .await?;
        self.report.private_subnet_id = Some(private_subnet.id.clone());
        self.complete(Step::PrivateSubnet);

        self.begin(Step::PublicRouteAssociation)?;
        self.associate_route_table(&public_table, &public_subnet).await?;
        self.complete(Step::PublicRouteAssociation);

        self.begin(Step::JumpAddress)?;
        let jump_address = self.allocate_address(&config.names.jump_address).await?;
        self.report.jump_address_id = Some(jump_address.id.clone());
        self.complete(Step::JumpAddress);

        self.begin(Step::NatGateway)?;
        let nat = self.provision_nat_gateway(&public_subnet.id).await?;
        self.complete(Step::NatGateway);

        self.begin(Step::PrivateRouteTable)?;
        let private_table = self.create_private_route_table(&network.id, &nat).await?;
        self.report.private_route_table_id = Some(private_table.id.clone());
        self.associate_route_table(&private_table, &private_subnet).await?;
        self.complete(Step::PrivateRouteTable);

        self.begin(Step::PublicSecurityGroup)?;
        let public_group = self.create_public_security_group(&network.id).await?;
        self.report.public_group_id = Some(public_group.id.clone());
        self.complete(Step::PublicSecurityGroup);

        self.begin(Step::PrivateSecurityGroup)?;
        let private_group = self.create_private_security_group(&network.id).await?;
        self.report.private_group_id = Some(private_group.id.clone());
        self.complete(Step::PrivateSecurityGroup);

        self.begin(Step::PublicInstance)?;
        let jump_box = self
            .launch_public_instance(&public_subnet.id, &public_group.id, &jump_address.id)
            .await?;
        self.report.public_instance_id = Some(jump_box.id.clone());
        self.complete(Step::PublicInstance);

        self.begin(Step::PrivateInstance)?;
        let app = self
            .launch_private_instance(&private_subnet.id, &private_group.id)
            .await?;
        self.report.private_instance_id = Some(app.id.clone());
        self.complete(Step::PrivateInstance);

        Ok(())
    }

    /// Refuse to start `step` once cancellation was requested.
    fn begin(&mut self, step: Step) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled { step });
        }
        self.report.failed_step = Some(step);
        debug!("Step {}/{}: {}", step.number(), Step::ALL.len(), step);
        Ok(())
    }

    fn complete(&mut self, step: Step) {
        self.report.failed_step = None;
        self.report.completed.push(step);
    }

    /// Run a provider call, retrying throttled or unavailable responses.
    pub(crate) async fn call<T, F, Fut>(&self, operation: &str, f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        self.call_retrying(operation, f, ProviderError::is_transient)
            .await
    }

    async fn call_retrying<T, F, Fut, R>(&self, operation: &str, f: F, is_retryable: R) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
        R: Fn(&ProviderError) -> bool,
    {
        self.retry
            .execute(operation, &self.cancel, f, is_retryable)
            .await
            .map_err(|e| match e {
                RetryError::Failed(e) => Error::Provider(e),
                RetryError::Cancelled => Error::Cancelled {
                    step: self.report.failed_step.unwrap_or(Step::Network),
                },
            })
    }

    /// Find a resource by name (when reuse is on) or create it, then tag it.
    ///
    /// Lookups of network-scoped kinds only match inside this run's network.
    /// A create is retried only when throttled: after a timeout or an
    /// unavailable response the resource may already exist.
    pub(crate) async fn obtain<F, Fut>(
        &mut self,
        kind: ResourceKind,
        name: &str,
        create: F,
    ) -> Result<Obtained>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<String>>,
    {
        let provider = self.provider;

        if self.config.reuse_existing {
            let scope = if kind.in_network() {
                self.report.network_id.clone()
            } else {
                None
            };
            let found = self
                .call("find_tagged", || provider.find_tagged(kind, name, scope.clone()))
                .await?;
            if let Some(id) = found {
                info!("Reusing existing {} '{}': {}", kind, name, id);
                self.report.record(kind, name, &id, true);
                return Ok(Obtained { id, reused: true });
            }
        }

        let id = self
            .call_retrying(&format!("create {}", kind), create, ProviderError::is_throttled)
            .await?;
        info!("Created {} '{}': {}", kind, name, id);
        self.report.record(kind, name, &id, false);
        self.tag(&id, name).await;

        Ok(Obtained { id, reused: false })
    }

    /// Apply the `Name` tag and the extra tags. Failures become warnings.
    async fn tag(&mut self, id: &str, name: &str) {
        let provider = self.provider;
        let tags: Vec<Tag> = std::iter::once(Tag::name(name))
            .chain(self.config.tags.iter().map(|(k, v)| Tag::new(k, v)))
            .collect();

        match self
            .call("tag_resource", || provider.tag_resource(id, &tags))
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => debug!("Tagging {} skipped: {}", id, e),
            Err(e) => {
                let warning = Error::Tagging {
                    id: id.to_string(),
                    message: e.to_string(),
                };
                warn!("{}", warning);
                self.report.warnings.push(warning.to_string());
            }
        }
    }
}
