//! Cloud provider boundary.
//!
//! [`CloudProvider`] is the set of primitives the provisioner needs: create a
//! network, gateway, route table, subnet, static address, NAT gateway,
//! security group and instance; poll the three resources that become ready
//! asynchronously; tag; and look a resource up by its `Name` tag.
//!
//! Two implementations ship with the crate:
//!
//! - [`aws::Ec2Provider`] talks to EC2 through the AWS SDK (feature `aws`)
//! - [`memory::InMemoryProvider`] simulates the resource graph in process

#[cfg(feature = "aws")]
pub mod aws;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use memory::InMemoryProvider;

/// Destination of every default route.
pub const DEFAULT_ROUTE_CIDR: &str = "0.0.0.0/0";

/// Name of the tag used to identify resources.
pub const NAME_TAG: &str = "Name";

/// Result type for provider calls.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Classification of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// Request rate exceeded; safe to retry after backing off.
    Throttled,
    /// Service or transport temporarily unavailable; safe to retry.
    Unavailable,
    /// The referenced resource is not (yet) visible.
    NotFound,
    /// The request itself was refused (bad parameter, quota, permission).
    Rejected,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderErrorKind::Throttled => write!(f, "throttled"),
            ProviderErrorKind::Unavailable => write!(f, "unavailable"),
            ProviderErrorKind::NotFound => write!(f, "not found"),
            ProviderErrorKind::Rejected => write!(f, "rejected"),
        }
    }
}

/// A failed provider call, carrying the provider's message verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation} failed ({kind}): {message}")]
pub struct ProviderError {
    /// Name of the provider operation
    pub operation: String,
    /// Failure classification
    pub kind: ProviderErrorKind,
    /// Provider message
    pub message: String,
}

impl ProviderError {
    pub fn new(
        operation: impl Into<String>,
        kind: ProviderErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation: operation.into(),
            kind,
            message: message.into(),
        }
    }

    pub fn rejected(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(operation, ProviderErrorKind::Rejected, message)
    }

    pub fn not_found(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(operation, ProviderErrorKind::NotFound, message)
    }

    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            ProviderErrorKind::Throttled | ProviderErrorKind::Unavailable
        )
    }

    /// Whether the provider refused the request before acting on it.
    ///
    /// The only failure after which a create call can be repeated without
    /// risking a duplicate resource.
    pub fn is_throttled(&self) -> bool {
        self.kind == ProviderErrorKind::Throttled
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ProviderErrorKind::NotFound
    }
}

/// Kinds of remote resources the provisioner creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Network,
    InternetGateway,
    RouteTable,
    Subnet,
    Address,
    NatGateway,
    SecurityGroup,
    Instance,
}

impl ResourceKind {
    /// Id prefix used by EC2 (and mimicked by the in-memory provider).
    pub fn id_prefix(&self) -> &'static str {
        match self {
            ResourceKind::Network => "vpc",
            ResourceKind::InternetGateway => "igw",
            ResourceKind::RouteTable => "rtb",
            ResourceKind::Subnet => "subnet",
            ResourceKind::Address => "eipalloc",
            ResourceKind::NatGateway => "nat",
            ResourceKind::SecurityGroup => "sg",
            ResourceKind::Instance => "i",
        }
    }

    /// Whether resources of this kind live inside a network.
    pub fn in_network(&self) -> bool {
        matches!(
            self,
            ResourceKind::RouteTable
                | ResourceKind::Subnet
                | ResourceKind::NatGateway
                | ResourceKind::SecurityGroup
                | ResourceKind::Instance
        )
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::Network => "network",
            ResourceKind::InternetGateway => "internet gateway",
            ResourceKind::RouteTable => "route table",
            ResourceKind::Subnet => "subnet",
            ResourceKind::Address => "static address",
            ResourceKind::NatGateway => "nat gateway",
            ResourceKind::SecurityGroup => "security group",
            ResourceKind::Instance => "instance",
        };
        write!(f, "{}", s)
    }
}

/// A key/value resource tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn name(value: impl Into<String>) -> Self {
        Self::new(NAME_TAG, value)
    }
}

/// IP protocol of an ingress rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Icmp,
    Tcp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Icmp => "icmp",
            Protocol::Tcp => "tcp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One allow rule: protocol, inclusive port range, IPv4 source block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRule {
    pub protocol: Protocol,
    /// Start of the port range; `-1` means all ICMP types
    pub from_port: i32,
    /// End of the port range; `-1` means all ICMP codes
    pub to_port: i32,
    pub source_cidr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl IngressRule {
    /// All ICMP traffic from `source_cidr`.
    pub fn icmp_from(source_cidr: impl Into<String>) -> Self {
        Self {
            protocol: Protocol::Icmp,
            from_port: -1,
            to_port: -1,
            source_cidr: source_cidr.into(),
            description: None,
        }
    }

    /// TCP on a single port from `source_cidr`.
    pub fn tcp_from(port: u16, source_cidr: impl Into<String>) -> Self {
        Self {
            protocol: Protocol::Tcp,
            from_port: i32::from(port),
            to_port: i32::from(port),
            source_cidr: source_cidr.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Where a default route sends traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum RouteTarget {
    InternetGateway(String),
    NatGateway(String),
}

impl RouteTarget {
    pub fn id(&self) -> &str {
        match self {
            RouteTarget::InternetGateway(id) | RouteTarget::NatGateway(id) => id,
        }
    }
}

/// Everything needed to launch one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSpec {
    /// Name tag applied after launch
    pub name: String,
    pub image: String,
    pub instance_type: String,
    /// Pre-existing key pair
    pub key_name: String,
    pub subnet_id: String,
    pub security_group_id: String,
    /// Request an ephemeral public address on the primary interface
    pub assign_public_ip: bool,
}

/// Lifecycle state of a network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkState {
    Pending,
    Available,
    Unknown(String),
}

impl fmt::Display for NetworkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkState::Pending => write!(f, "pending"),
            NetworkState::Available => write!(f, "available"),
            NetworkState::Unknown(s) => write!(f, "{}", s),
        }
    }
}

/// Lifecycle state of a NAT gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NatGatewayState {
    Pending,
    Available,
    Failed,
    Deleting,
    Deleted,
    Unknown(String),
}

impl NatGatewayState {
    /// States from which `available` can no longer be reached.
    pub fn is_terminal_failure(&self) -> bool {
        matches!(
            self,
            NatGatewayState::Failed | NatGatewayState::Deleting | NatGatewayState::Deleted
        )
    }
}

impl fmt::Display for NatGatewayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NatGatewayState::Pending => write!(f, "pending"),
            NatGatewayState::Available => write!(f, "available"),
            NatGatewayState::Failed => write!(f, "failed"),
            NatGatewayState::Deleting => write!(f, "deleting"),
            NatGatewayState::Deleted => write!(f, "deleted"),
            NatGatewayState::Unknown(s) => write!(f, "{}", s),
        }
    }
}

/// Lifecycle state of an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceState {
    Pending,
    Running,
    ShuttingDown,
    Terminated,
    Stopping,
    Stopped,
    Unknown(String),
}

impl From<&str> for InstanceState {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "shutting-down" => Self::ShuttingDown,
            "terminated" => Self::Terminated,
            "stopping" => Self::Stopping,
            "stopped" => Self::Stopped,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl InstanceState {
    /// States from which `running` is not reached without intervention.
    pub fn is_terminal_failure(&self) -> bool {
        matches!(
            self,
            Self::ShuttingDown | Self::Terminated | Self::Stopping | Self::Stopped
        )
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::ShuttingDown => write!(f, "shutting-down"),
            Self::Terminated => write!(f, "terminated"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
            Self::Unknown(s) => write!(f, "{}", s),
        }
    }
}

/// Provider primitives used by the provisioner.
///
/// Every `create_*`/`allocate_*`/`launch_*` call returns the provider id of
/// the new resource. None of them are idempotent: calling twice creates two
/// resources.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Short provider name for logs and reports.
    fn name(&self) -> &'static str;

    async fn create_network(&self, cidr: &str) -> ProviderResult<String>;

    async fn network_state(&self, network_id: &str) -> ProviderResult<NetworkState>;

    async fn create_internet_gateway(&self) -> ProviderResult<String>;

    async fn attach_internet_gateway(
        &self,
        gateway_id: &str,
        network_id: &str,
    ) -> ProviderResult<()>;

    async fn create_route_table(&self, network_id: &str) -> ProviderResult<String>;

    /// Add the `0.0.0.0/0` route of a route table.
    async fn create_default_route(
        &self,
        route_table_id: &str,
        target: &RouteTarget,
    ) -> ProviderResult<()>;

    /// Returns the association id.
    async fn associate_route_table(
        &self,
        route_table_id: &str,
        subnet_id: &str,
    ) -> ProviderResult<String>;

    async fn create_subnet(
        &self,
        network_id: &str,
        cidr: &str,
        availability_zone: Option<String>,
    ) -> ProviderResult<String>;

    /// Returns the allocation id of a new static address.
    async fn allocate_address(&self) -> ProviderResult<String>;

    async fn create_nat_gateway(
        &self,
        subnet_id: &str,
        allocation_id: &str,
    ) -> ProviderResult<String>;

    async fn nat_gateway_state(&self, nat_gateway_id: &str) -> ProviderResult<NatGatewayState>;

    async fn create_security_group(
        &self,
        network_id: &str,
        name: &str,
        description: &str,
    ) -> ProviderResult<String>;

    async fn authorize_ingress(&self, group_id: &str, rules: &[IngressRule])
        -> ProviderResult<()>;

    async fn launch_instance(&self, spec: &InstanceSpec) -> ProviderResult<String>;

    async fn instance_state(&self, instance_id: &str) -> ProviderResult<InstanceState>;

    /// Returns the association id.
    async fn associate_address(
        &self,
        allocation_id: &str,
        instance_id: &str,
    ) -> ProviderResult<String>;

    async fn tag_resource(&self, resource_id: &str, tags: &[Tag]) -> ProviderResult<()>;

    /// Find a live resource of `kind` whose `Name` tag equals `name`.
    ///
    /// With `network_id` set, only resources inside that network match.
    async fn find_tagged(
        &self,
        kind: ResourceKind,
        name: &str,
        network_id: Option<String>,
    ) -> ProviderResult<Option<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::new("x", ProviderErrorKind::Throttled, "slow down").is_transient());
        assert!(ProviderError::new("x", ProviderErrorKind::Unavailable, "503").is_transient());
        assert!(!ProviderError::rejected("x", "InvalidParameterValue").is_transient());
        assert!(!ProviderError::not_found("x", "InvalidVpcID.NotFound").is_transient());
    }

    #[test]
    fn test_only_throttling_is_safe_for_creates() {
        assert!(ProviderError::new("x", ProviderErrorKind::Throttled, "slow down").is_throttled());
        assert!(!ProviderError::new("x", ProviderErrorKind::Unavailable, "timeout").is_throttled());
        assert!(!ProviderError::rejected("x", "InvalidParameterValue").is_throttled());
    }

    #[test]
    fn test_ingress_rule_constructors() {
        let icmp = IngressRule::icmp_from("10.1.1.0/24");
        assert_eq!(icmp.protocol, Protocol::Icmp);
        assert_eq!((icmp.from_port, icmp.to_port), (-1, -1));

        let ssh = IngressRule::tcp_from(22, "203.0.113.7/32");
        assert_eq!(ssh.protocol, Protocol::Tcp);
        assert_eq!((ssh.from_port, ssh.to_port), (22, 22));
        assert_eq!(ssh.source_cidr, "203.0.113.7/32");
    }

    #[test]
    fn test_instance_state_from_name() {
        assert_eq!(InstanceState::from("running"), InstanceState::Running);
        assert_eq!(InstanceState::from("Running"), InstanceState::Running);
        assert_eq!(
            InstanceState::from("shutting-down"),
            InstanceState::ShuttingDown
        );
        assert!(InstanceState::from("terminated").is_terminal_failure());
        assert!(!InstanceState::from("pending").is_terminal_failure());
        assert_eq!(
            InstanceState::from("weird"),
            InstanceState::Unknown("weird".to_string())
        );
    }

    #[test]
    fn test_route_target_id() {
        assert_eq!(RouteTarget::NatGateway("nat-1".into()).id(), "nat-1");
        assert_eq!(RouteTarget::InternetGateway("igw-1".into()).id(), "igw-1");
    }

    #[test]
    fn test_resource_kind_display() {
        assert_eq!(ResourceKind::NatGateway.to_string(), "nat gateway");
        assert_eq!(ResourceKind::Instance.id_prefix(), "i");
    }

    #[test]
    fn test_network_scoped_kinds() {
        assert!(ResourceKind::Subnet.in_network());
        assert!(ResourceKind::NatGateway.in_network());
        assert!(!ResourceKind::Network.in_network());
        assert!(!ResourceKind::Address.in_network());
        assert!(!ResourceKind::InternetGateway.in_network());
    }
}
