//! EC2 provider built on the AWS SDK.
//!
//! Credentials come from the standard AWS chain (environment, profile,
//! instance metadata). Every SDK failure is classified into a
//! [`ProviderErrorKind`] so the retry and wait layers can tell throttling and
//! eventual-consistency answers apart from real rejections; the service
//! message itself is passed through untouched.

use super::{
    CloudProvider, IngressRule, InstanceSpec, InstanceState, NatGatewayState, NetworkState,
    ProviderError, ProviderErrorKind, ProviderResult, ResourceKind, RouteTarget, Tag,
    DEFAULT_ROUTE_CIDR, NAME_TAG,
};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_ec2::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_ec2::types::{
    DomainType, Filter, InstanceNetworkInterfaceSpecification, InstanceStateName, InstanceType,
    IpPermission, IpRange, VpcState,
};
use aws_sdk_ec2::Client;
use tracing::debug;

/// Provider backed by an EC2 client for one region.
#[derive(Debug, Clone)]
pub struct Ec2Provider {
    client: Client,
    region: String,
}

impl Ec2Provider {
    /// Load AWS configuration for `region` and build a client.
    pub async fn connect(region: &str) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_sdk_ec2::config::Region::new(region.to_string()))
            .load()
            .await;

        debug!("Created EC2 client for region {}", region);
        Self::from_client(Client::new(&config), region)
    }

    pub fn from_client(client: Client, region: &str) -> Self {
        Self {
            client,
            region: region.to_string(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }
}

/// Map an SDK failure to a classified provider error.
fn sdk_error<E, R>(operation: &str, err: SdkError<E, R>) -> ProviderError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    let kind = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => ProviderErrorKind::Unavailable,
        SdkError::ServiceError(_) => err.code().map(kind_for_code).unwrap_or(ProviderErrorKind::Rejected),
        _ => ProviderErrorKind::Rejected,
    };

    let message = match (err.code(), err.message()) {
        (Some(code), Some(message)) => format!("{}: {}", code, message),
        (Some(code), None) => code.to_string(),
        _ => DisplayErrorContext(&err).to_string(),
    };

    ProviderError::new(operation, kind, message)
}

fn kind_for_code(code: &str) -> ProviderErrorKind {
    match code {
        "RequestLimitExceeded" | "Throttling" | "ThrottlingException" => ProviderErrorKind::Throttled,
        "InternalError" | "InternalFailure" | "ServiceUnavailable" | "Unavailable" => {
            ProviderErrorKind::Unavailable
        }
        c if c.ends_with("NotFound") => ProviderErrorKind::NotFound,
        _ => ProviderErrorKind::Rejected,
    }
}

/// The response parsed but lacked the id we asked for.
fn missing(operation: &str, what: &str) -> ProviderError {
    ProviderError::rejected(operation, format!("response did not include {}", what))
}

fn name_filter(name: &str) -> Filter {
    Filter::builder()
        .name(format!("tag:{}", NAME_TAG))
        .values(name)
        .build()
}

/// Name tag filter, narrowed to one VPC when `network_id` is set.
fn lookup_filters(name: &str, network_id: Option<&str>) -> Vec<Filter> {
    let mut filters = vec![name_filter(name)];
    if let Some(vpc_id) = network_id {
        filters.push(Filter::builder().name("vpc-id").values(vpc_id).build());
    }
    filters
}

fn ip_permission(rule: &IngressRule) -> IpPermission {
    let mut range = IpRange::builder().cidr_ip(&rule.source_cidr);
    if let Some(description) = &rule.description {
        range = range.description(description);
    }

    IpPermission::builder()
        .ip_protocol(rule.protocol.as_str())
        .from_port(rule.from_port)
        .to_port(rule.to_port)
        .ip_ranges(range.build())
        .build()
}

#[async_trait]
impl CloudProvider for Ec2Provider {
    fn name(&self) -> &'static str {
        "aws-ec2"
    }

    async fn create_network(&self, cidr: &str) -> ProviderResult<String> {
        const OP: &str = "create_vpc";
        let resp = self
            .client
            .create_vpc()
            .cidr_block(cidr)
            .send()
            .await
            .map_err(|e| sdk_error(OP, e))?;

        resp.vpc()
            .and_then(|v| v.vpc_id())
            .map(str::to_string)
            .ok_or_else(|| missing(OP, "a VPC id"))
    }

    async fn network_state(&self, network_id: &str) -> ProviderResult<NetworkState> {
        const OP: &str = "describe_vpcs";
        let resp = self
            .client
            .describe_vpcs()
            .vpc_ids(network_id)
            .send()
            .await
            .map_err(|e| sdk_error(OP, e))?;

        let vpc = resp
            .vpcs()
            .first()
            .ok_or_else(|| ProviderError::not_found(OP, format!("VPC {} not visible yet", network_id)))?;

        Ok(match vpc.state() {
            Some(VpcState::Available) => NetworkState::Available,
            Some(VpcState::Pending) => NetworkState::Pending,
            Some(other) => NetworkState::Unknown(other.as_str().to_string()),
            None => NetworkState::Unknown("unknown".to_string()),
        })
    }

    async fn create_internet_gateway(&self) -> ProviderResult<String> {
        const OP: &str = "create_internet_gateway";
        let resp = self
            .client
            .create_internet_gateway()
            .send()
            .await
            .map_err(|e| sdk_error(OP, e))?;

        resp.internet_gateway()
            .and_then(|g| g.internet_gateway_id())
            .map(str::to_string)
            .ok_or_else(|| missing(OP, "an internet gateway id"))
    }

    async fn attach_internet_gateway(
        &self,
        gateway_id: &str,
        network_id: &str,
    ) -> ProviderResult<()> {
        self.client
            .attach_internet_gateway()
            .internet_gateway_id(gateway_id)
            .vpc_id(network_id)
            .send()
            .await
            .map_err(|e| sdk_error("attach_internet_gateway", e))?;
        Ok(())
    }

    async fn create_route_table(&self, network_id: &str) -> ProviderResult<String> {
        const OP: &str = "create_route_table";
        let resp = self
            .client
            .create_route_table()
            .vpc_id(network_id)
            .send()
            .await
            .map_err(|e| sdk_error(OP, e))?;

        resp.route_table()
            .and_then(|t| t.route_table_id())
            .map(str::to_string)
            .ok_or_else(|| missing(OP, "a route table id"))
    }

    async fn create_default_route(
        &self,
        route_table_id: &str,
        target: &RouteTarget,
    ) -> ProviderResult<()> {
        let req = self
            .client
            .create_route()
            .route_table_id(route_table_id)
            .destination_cidr_block(DEFAULT_ROUTE_CIDR);

        let req = match target {
            RouteTarget::InternetGateway(id) => req.gateway_id(id),
            RouteTarget::NatGateway(id) => req.nat_gateway_id(id),
        };

        req.send()
            .await
            .map_err(|e| sdk_error("create_route", e))?;
        Ok(())
    }

    async fn associate_route_table(
        &self,
        route_table_id: &str,
        subnet_id: &str,
    ) -> ProviderResult<String> {
        const OP: &str = "associate_route_table";
        let resp = self
            .client
            .associate_route_table()
            .route_table_id(route_table_id)
            .subnet_id(subnet_id)
            .send()
            .await
            .map_err(|e| sdk_error(OP, e))?;

        resp.association_id()
            .map(str::to_string)
            .ok_or_else(|| missing(OP, "an association id"))
    }

    async fn create_subnet(
        &self,
        network_id: &str,
        cidr: &str,
        availability_zone: Option<String>,
    ) -> ProviderResult<String> {
        const OP: &str = "create_subnet";
        let resp = self
            .client
            .create_subnet()
            .vpc_id(network_id)
            .cidr_block(cidr)
            .set_availability_zone(availability_zone)
            .send()
            .await
            .map_err(|e| sdk_error(OP, e))?;

        resp.subnet()
            .and_then(|s| s.subnet_id())
            .map(str::to_string)
            .ok_or_else(|| missing(OP, "a subnet id"))
    }

    async fn allocate_address(&self) -> ProviderResult<String> {
        const OP: &str = "allocate_address";
        let resp = self
            .client
            .allocate_address()
            .domain(DomainType::Vpc)
            .send()
            .await
            .map_err(|e| sdk_error(OP, e))?;

        resp.allocation_id()
            .map(str::to_string)
            .ok_or_else(|| missing(OP, "an allocation id"))
    }

    async fn create_nat_gateway(
        &self,
        subnet_id: &str,
        allocation_id: &str,
    ) -> ProviderResult<String> {
        const OP: &str = "create_nat_gateway";
        let resp = self
            .client
            .create_nat_gateway()
            .subnet_id(subnet_id)
            .allocation_id(allocation_id)
            .send()
            .await
            .map_err(|e| sdk_error(OP, e))?;

        resp.nat_gateway()
            .and_then(|n| n.nat_gateway_id())
            .map(str::to_string)
            .ok_or_else(|| missing(OP, "a NAT gateway id"))
    }

    async fn nat_gateway_state(&self, nat_gateway_id: &str) -> ProviderResult<NatGatewayState> {
        use aws_sdk_ec2::types::NatGatewayState as Sdk;

        const OP: &str = "describe_nat_gateways";
        let resp = self
            .client
            .describe_nat_gateways()
            .nat_gateway_ids(nat_gateway_id)
            .send()
            .await
            .map_err(|e| sdk_error(OP, e))?;

        let nat = resp.nat_gateways().first().ok_or_else(|| {
            ProviderError::not_found(OP, format!("NAT gateway {} not visible yet", nat_gateway_id))
        })?;

        Ok(match nat.state() {
            Some(Sdk::Pending) => NatGatewayState::Pending,
            Some(Sdk::Available) => NatGatewayState::Available,
            Some(Sdk::Failed) => NatGatewayState::Failed,
            Some(Sdk::Deleting) => NatGatewayState::Deleting,
            Some(Sdk::Deleted) => NatGatewayState::Deleted,
            Some(other) => NatGatewayState::Unknown(other.as_str().to_string()),
            None => NatGatewayState::Unknown("unknown".to_string()),
        })
    }

    async fn create_security_group(
        &self,
        network_id: &str,
        name: &str,
        description: &str,
    ) -> ProviderResult<String> {
        const OP: &str = "create_security_group";
        let resp = self
            .client
            .create_security_group()
            .vpc_id(network_id)
            .group_name(name)
            .description(description)
            .send()
            .await
            .map_err(|e| sdk_error(OP, e))?;

        resp.group_id()
            .map(str::to_string)
            .ok_or_else(|| missing(OP, "a group id"))
    }

    async fn authorize_ingress(
        &self,
        group_id: &str,
        rules: &[IngressRule],
    ) -> ProviderResult<()> {
        let permissions: Vec<IpPermission> = rules.iter().map(ip_permission).collect();

        self.client
            .authorize_security_group_ingress()
            .group_id(group_id)
            .set_ip_permissions(Some(permissions))
            .send()
            .await
            .map_err(|e| sdk_error("authorize_security_group_ingress", e))?;
        Ok(())
    }

    async fn launch_instance(&self, spec: &InstanceSpec) -> ProviderResult<String> {
        const OP: &str = "run_instances";
        let instance_type = spec.instance_type.parse::<InstanceType>().map_err(|_| {
            ProviderError::rejected(OP, format!("Invalid instance type: {}", spec.instance_type))
        })?;

        let interface = InstanceNetworkInterfaceSpecification::builder()
            .device_index(0)
            .subnet_id(&spec.subnet_id)
            .groups(&spec.security_group_id)
            .associate_public_ip_address(spec.assign_public_ip)
            .build();

        let resp = self
            .client
            .run_instances()
            .image_id(&spec.image)
            .instance_type(instance_type)
            .key_name(&spec.key_name)
            .min_count(1)
            .max_count(1)
            .network_interfaces(interface)
            .send()
            .await
            .map_err(|e| sdk_error(OP, e))?;

        resp.instances()
            .first()
            .and_then(|i| i.instance_id())
            .map(str::to_string)
            .ok_or_else(|| missing(OP, "an instance id"))
    }

    async fn instance_state(&self, instance_id: &str) -> ProviderResult<InstanceState> {
        const OP: &str = "describe_instances";
        let resp = self
            .client
            .describe_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(|e| sdk_error(OP, e))?;

        let state = resp
            .reservations()
            .iter()
            .flat_map(|r| r.instances())
            .find(|i| i.instance_id() == Some(instance_id))
            .and_then(|i| i.state())
            .and_then(|s| s.name())
            .ok_or_else(|| {
                ProviderError::not_found(OP, format!("instance {} not visible yet", instance_id))
            })?;

        Ok(match state {
            InstanceStateName::Pending => InstanceState::Pending,
            InstanceStateName::Running => InstanceState::Running,
            other => InstanceState::from(other.as_str()),
        })
    }

    async fn associate_address(
        &self,
        allocation_id: &str,
        instance_id: &str,
    ) -> ProviderResult<String> {
        const OP: &str = "associate_address";
        let resp = self
            .client
            .associate_address()
            .allocation_id(allocation_id)
            .instance_id(instance_id)
            .send()
            .await
            .map_err(|e| sdk_error(OP, e))?;

        resp.association_id()
            .map(str::to_string)
            .ok_or_else(|| missing(OP, "an association id"))
    }

    async fn tag_resource(&self, resource_id: &str, tags: &[Tag]) -> ProviderResult<()> {
        let sdk_tags = tags
            .iter()
            .map(|t| {
                aws_sdk_ec2::types::Tag::builder()
                    .key(&t.key)
                    .value(&t.value)
                    .build()
            })
            .collect::<Vec<_>>();

        self.client
            .create_tags()
            .resources(resource_id)
            .set_tags(Some(sdk_tags))
            .send()
            .await
            .map_err(|e| sdk_error("create_tags", e))?;
        Ok(())
    }

    async fn find_tagged(
        &self,
        kind: ResourceKind,
        name: &str,
        network_id: Option<String>,
    ) -> ProviderResult<Option<String>> {
        let filters = lookup_filters(name, network_id.as_deref());
        let found = match kind {
            ResourceKind::Network => {
                let resp = self
                    .client
                    .describe_vpcs()
                    .filters(name_filter(name))
                    .send()
                    .await
                    .map_err(|e| sdk_error("describe_vpcs", e))?;
                resp.vpcs().iter().find_map(|v| v.vpc_id()).map(str::to_string)
            }
            ResourceKind::InternetGateway => {
                let resp = self
                    .client
                    .describe_internet_gateways()
                    .filters(name_filter(name))
                    .send()
                    .await
                    .map_err(|e| sdk_error("describe_internet_gateways", e))?;
                resp.internet_gateways()
                    .iter()
                    .find_map(|g| g.internet_gateway_id())
                    .map(str::to_string)
            }
            ResourceKind::RouteTable => {
                let resp = self
                    .client
                    .describe_route_tables()
                    .set_filters(Some(filters))
                    .send()
                    .await
                    .map_err(|e| sdk_error("describe_route_tables", e))?;
                resp.route_tables()
                    .iter()
                    .find_map(|t| t.route_table_id())
                    .map(str::to_string)
            }
            ResourceKind::Subnet => {
                let resp = self
                    .client
                    .describe_subnets()
                    .set_filters(Some(filters))
                    .send()
                    .await
                    .map_err(|e| sdk_error("describe_subnets", e))?;
                resp.subnets().iter().find_map(|s| s.subnet_id()).map(str::to_string)
            }
            ResourceKind::Address => {
                let resp = self
                    .client
                    .describe_addresses()
                    .filters(name_filter(name))
                    .send()
                    .await
                    .map_err(|e| sdk_error("describe_addresses", e))?;
                resp.addresses()
                    .iter()
                    .find_map(|a| a.allocation_id())
                    .map(str::to_string)
            }
            ResourceKind::NatGateway => {
                let resp = self
                    .client
                    .describe_nat_gateways()
                    .set_filter(Some(filters))
                    .filter(
                        Filter::builder()
                            .name("state")
                            .values("pending")
                            .values("available")
                            .build(),
                    )
                    .send()
                    .await
                    .map_err(|e| sdk_error("describe_nat_gateways", e))?;
                resp.nat_gateways()
                    .iter()
                    .find_map(|n| n.nat_gateway_id())
                    .map(str::to_string)
            }
            ResourceKind::SecurityGroup => {
                let resp = self
                    .client
                    .describe_security_groups()
                    .set_filters(Some(filters))
                    .send()
                    .await
                    .map_err(|e| sdk_error("describe_security_groups", e))?;
                resp.security_groups()
                    .iter()
                    .find_map(|g| g.group_id())
                    .map(str::to_string)
            }
            ResourceKind::Instance => {
                let resp = self
                    .client
                    .describe_instances()
                    .set_filters(Some(filters))
                    .filters(
                        Filter::builder()
                            .name("instance-state-name")
                            .values("pending")
                            .values("running")
                            .build(),
                    )
                    .send()
                    .await
                    .map_err(|e| sdk_error("describe_instances", e))?;
                resp.reservations()
                    .iter()
                    .flat_map(|r| r.instances())
                    .find_map(|i| i.instance_id())
                    .map(str::to_string)
            }
        };

        debug!(
            "find_tagged({}, '{}', {:?}) -> {:?}",
            kind, name, network_id, found
        );
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_classified() {
        assert_eq!(kind_for_code("RequestLimitExceeded"), ProviderErrorKind::Throttled);
        assert_eq!(kind_for_code("InternalError"), ProviderErrorKind::Unavailable);
        assert_eq!(kind_for_code("InvalidVpcID.NotFound"), ProviderErrorKind::NotFound);
        assert_eq!(kind_for_code("InvalidNatGatewayID.NotFound"), ProviderErrorKind::NotFound);
        assert_eq!(kind_for_code("VpcLimitExceeded"), ProviderErrorKind::Rejected);
        assert_eq!(kind_for_code("UnauthorizedOperation"), ProviderErrorKind::Rejected);
    }

    #[test]
    fn test_lookup_filters_scope_to_vpc() {
        let unscoped = lookup_filters("public subnet", None);
        assert_eq!(unscoped.len(), 1);
        assert_eq!(unscoped[0].name(), Some("tag:Name"));

        let scoped = lookup_filters("public subnet", Some("vpc-0abc"));
        assert_eq!(scoped.len(), 2);
        assert_eq!(scoped[1].name(), Some("vpc-id"));
        assert_eq!(scoped[1].values(), &["vpc-0abc".to_string()][..]);
    }

    #[test]
    fn test_ip_permission_from_rule() {
        let rule = IngressRule::tcp_from(22, "203.0.113.7/32").with_description("SSH");
        let permission = ip_permission(&rule);
        assert_eq!(permission.ip_protocol(), Some("tcp"));
        assert_eq!(permission.from_port(), Some(22));
        assert_eq!(permission.to_port(), Some(22));
        assert_eq!(
            permission.ip_ranges().first().and_then(|r| r.cidr_ip()),
            Some("203.0.113.7/32")
        );
    }
}
