//! In-process provider.
//!
//! Simulates the resource graph a provisioning run builds: ids, parent
//! relationships, pending→ready transitions driven by poll counts, and the
//! provider-side checks a real account performs (subnets inside their
//! network, routes to a NAT gateway only once it is available, addresses only
//! on running instances). Failures, throttling and tagging errors can be
//! injected through [`InMemoryProviderBuilder`]. Every accepted mutation and
//! every observed state is appended to an ordered event log.

use super::{
    CloudProvider, IngressRule, InstanceSpec, InstanceState, NatGatewayState, NetworkState,
    ProviderError, ProviderErrorKind, ProviderResult, ResourceKind, RouteTarget, Tag,
    DEFAULT_ROUTE_CIDR, NAME_TAG,
};
use crate::cidr::Ipv4Cidr;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::trace;
use uuid::Uuid;

/// Something the provider accepted or reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProviderEvent {
    Created {
        kind: ResourceKind,
        id: String,
    },
    StateObserved {
        kind: ResourceKind,
        id: String,
        state: String,
    },
    Attached {
        gateway_id: String,
        network_id: String,
    },
    RouteCreated {
        route_table_id: String,
        destination: String,
        target: RouteTarget,
    },
    Associated {
        route_table_id: String,
        subnet_id: String,
    },
    IngressAuthorized {
        group_id: String,
        rules: Vec<IngressRule>,
    },
    AddressAssociated {
        allocation_id: String,
        instance_id: String,
    },
    Tagged {
        id: String,
        tags: Vec<Tag>,
    },
}

/// Snapshot of one simulated resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceRecord {
    pub id: String,
    pub kind: ResourceKind,
    pub tags: BTreeMap<String, String>,
    /// Owning network (route tables, subnets, groups)
    pub network_id: Option<String>,
    pub cidr: Option<String>,
    pub availability_zone: Option<String>,
    /// Gateway attachment, address association or NAT subnet
    pub attached_to: Option<String>,
    /// Default routes of a route table
    pub routes: Vec<RouteTarget>,
    /// Subnets associated with a route table
    pub associations: Vec<String>,
    pub rules: Vec<IngressRule>,
    /// Group name and description
    pub group: Option<(String, String)>,
    pub instance: Option<InstanceSpec>,
    /// Allocation backing a NAT gateway
    pub allocation_id: Option<String>,
}

impl ResourceRecord {
    fn new(kind: ResourceKind, id: String) -> Self {
        Self {
            id,
            kind,
            tags: BTreeMap::new(),
            network_id: None,
            cidr: None,
            availability_zone: None,
            attached_to: None,
            routes: Vec::new(),
            associations: Vec::new(),
            rules: Vec::new(),
            group: None,
            instance: None,
            allocation_id: None,
        }
    }

    /// Value of the `Name` tag.
    pub fn name(&self) -> Option<&str> {
        self.tags.get(NAME_TAG).map(String::as_str)
    }
}

#[derive(Debug, Default, Clone)]
struct Behavior {
    /// Polls answered "pending" before a resource of the kind becomes ready
    pending_polls: HashMap<ResourceKind, u32>,
    never_ready: HashSet<ResourceKind>,
    /// Kinds that end in a terminal failure state instead of ready
    fails_when_ready: HashSet<ResourceKind>,
    /// Operations that always fail
    failures: HashMap<String, ProviderError>,
    /// Operations throttled for their first N calls
    throttles: HashMap<String, u32>,
    fail_tagging: bool,
}

#[derive(Debug, Default)]
struct State {
    resources: BTreeMap<String, ResourceRecord>,
    creation_order: Vec<String>,
    polls: HashMap<String, u32>,
    calls: HashMap<String, u32>,
    events: Vec<ProviderEvent>,
}

/// Builder for [`InMemoryProvider`].
#[derive(Debug, Default)]
pub struct InMemoryProviderBuilder {
    behavior: Behavior,
}

impl InMemoryProviderBuilder {
    /// Number of "pending" answers before a resource of `kind` is ready.
    pub fn pending_polls(mut self, kind: ResourceKind, polls: u32) -> Self {
        self.behavior.pending_polls.insert(kind, polls);
        self
    }

    /// Resources of `kind` stay pending forever.
    pub fn never_ready(mut self, kind: ResourceKind) -> Self {
        self.behavior.never_ready.insert(kind);
        self
    }

    /// Resources of `kind` end up `failed` (NAT) or `terminated` (instance).
    pub fn fails_when_ready(mut self, kind: ResourceKind) -> Self {
        self.behavior.fails_when_ready.insert(kind);
        self
    }

    /// Every call of `operation` is rejected with `message`.
    pub fn reject(mut self, operation: &str, message: &str) -> Self {
        self.behavior.failures.insert(
            operation.to_string(),
            ProviderError::rejected(operation, message),
        );
        self
    }

    /// Every call of `operation` fails with the given kind.
    pub fn fail(mut self, operation: &str, kind: ProviderErrorKind, message: &str) -> Self {
        self.behavior.failures.insert(
            operation.to_string(),
            ProviderError::new(operation, kind, message),
        );
        self
    }

    /// The first `times` calls of `operation` are throttled.
    pub fn throttle(mut self, operation: &str, times: u32) -> Self {
        self.behavior.throttles.insert(operation.to_string(), times);
        self
    }

    /// Every tagging call is rejected.
    pub fn fail_tagging(mut self) -> Self {
        self.behavior.fail_tagging = true;
        self
    }

    pub fn build(self) -> InMemoryProvider {
        InMemoryProvider {
            behavior: self.behavior,
            state: Mutex::new(State::default()),
        }
    }
}

/// Simulated provider. Cheap to construct; one instance is one account.
#[derive(Debug)]
pub struct InMemoryProvider {
    behavior: Behavior,
    state: Mutex<State>,
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl InMemoryProvider {
    /// A provider where every resource becomes ready after one pending poll.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> InMemoryProviderBuilder {
        InMemoryProviderBuilder::default()
            .pending_polls(ResourceKind::Network, 1)
            .pending_polls(ResourceKind::NatGateway, 1)
            .pending_polls(ResourceKind::Instance, 1)
    }

    /// Ordered event log.
    pub fn events(&self) -> Vec<ProviderEvent> {
        self.state.lock().events.clone()
    }

    /// Every resource in creation order.
    pub fn resources(&self) -> Vec<ResourceRecord> {
        let state = self.state.lock();
        state
            .creation_order
            .iter()
            .filter_map(|id| state.resources.get(id).cloned())
            .collect()
    }

    pub fn resource(&self, id: &str) -> Option<ResourceRecord> {
        self.state.lock().resources.get(id).cloned()
    }

    /// Number of resources of `kind`.
    pub fn count(&self, kind: ResourceKind) -> usize {
        self.state
            .lock()
            .resources
            .values()
            .filter(|r| r.kind == kind)
            .count()
    }

    /// Number of calls made to `operation`, failed ones included.
    pub fn calls(&self, operation: &str) -> u32 {
        self.state.lock().calls.get(operation).copied().unwrap_or(0)
    }

    /// Count the call and apply injected failures.
    fn enter(&self, state: &mut State, operation: &str) -> ProviderResult<()> {
        let calls = state.calls.entry(operation.to_string()).or_insert(0);
        *calls += 1;
        trace!("in-memory {} (call {})", operation, calls);

        if let Some(times) = self.behavior.throttles.get(operation) {
            if *calls <= *times {
                return Err(ProviderError::new(
                    operation,
                    ProviderErrorKind::Throttled,
                    "RequestLimitExceeded: Request limit exceeded.",
                ));
            }
        }

        match self.behavior.failures.get(operation) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn insert(state: &mut State, record: ResourceRecord) -> String {
        let id = record.id.clone();
        state.events.push(ProviderEvent::Created {
            kind: record.kind,
            id: id.clone(),
        });
        state.creation_order.push(id.clone());
        state.resources.insert(id.clone(), record);
        id
    }

    fn new_id(kind: ResourceKind) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("{}-{}", kind.id_prefix(), &suffix[..17])
    }

    fn lookup<'s>(
        state: &'s State,
        operation: &str,
        kind: ResourceKind,
        id: &str,
    ) -> ProviderResult<&'s ResourceRecord> {
        state
            .resources
            .get(id)
            .filter(|r| r.kind == kind)
            .ok_or_else(|| not_found(operation, kind, id))
    }

    fn lookup_mut<'s>(
        state: &'s mut State,
        operation: &str,
        kind: ResourceKind,
        id: &str,
    ) -> ProviderResult<&'s mut ResourceRecord> {
        state
            .resources
            .get_mut(id)
            .filter(|r| r.kind == kind)
            .ok_or_else(|| not_found(operation, kind, id))
    }

    /// Ready once the resource has been polled past its pending count.
    fn is_ready(&self, state: &State, kind: ResourceKind, id: &str) -> bool {
        if self.behavior.never_ready.contains(&kind) {
            return false;
        }
        let needed = self.behavior.pending_polls.get(&kind).copied().unwrap_or(0);
        state.polls.get(id).copied().unwrap_or(0) > needed
    }

    /// Record a poll and report ready/failed/pending for `id`.
    fn observe(&self, state: &mut State, kind: ResourceKind, id: &str) -> Phase {
        *state.polls.entry(id.to_string()).or_insert(0) += 1;
        if !self.is_ready(state, kind, id) {
            Phase::Pending
        } else if self.behavior.fails_when_ready.contains(&kind) {
            Phase::Failed
        } else {
            Phase::Ready
        }
    }

    fn record_state(state: &mut State, kind: ResourceKind, id: &str, observed: String) {
        state.events.push(ProviderEvent::StateObserved {
            kind,
            id: id.to_string(),
            state: observed,
        });
    }

    fn nat_available(&self, state: &State, id: &str) -> bool {
        self.is_ready(state, ResourceKind::NatGateway, id)
            && !self
                .behavior
                .fails_when_ready
                .contains(&ResourceKind::NatGateway)
    }

    fn instance_running(&self, state: &State, id: &str) -> bool {
        self.is_ready(state, ResourceKind::Instance, id)
            && !self
                .behavior
                .fails_when_ready
                .contains(&ResourceKind::Instance)
    }
}

enum Phase {
    Pending,
    Ready,
    Failed,
}

fn not_found(operation: &str, kind: ResourceKind, id: &str) -> ProviderError {
    ProviderError::not_found(
        operation,
        format!("The {} ID '{}' does not exist", kind, id),
    )
}

fn parse_cidr(operation: &str, cidr: &str) -> ProviderResult<Ipv4Cidr> {
    cidr.parse::<Ipv4Cidr>().map_err(|e| {
        ProviderError::rejected(
            operation,
            format!("InvalidParameterValue: Value ({}) for parameter cidrBlock is invalid. {}", cidr, e),
        )
    })
}

#[async_trait]
impl CloudProvider for InMemoryProvider {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    async fn create_network(&self, cidr: &str) -> ProviderResult<String> {
        const OP: &str = "create_network";
        let mut state = self.state.lock();
        self.enter(&mut state, OP)?;
        parse_cidr(OP, cidr)?;

        let mut record = ResourceRecord::new(ResourceKind::Network, Self::new_id(ResourceKind::Network));
        record.cidr = Some(cidr.to_string());
        Ok(Self::insert(&mut state, record))
    }

    async fn network_state(&self, network_id: &str) -> ProviderResult<NetworkState> {
        const OP: &str = "network_state";
        let mut state = self.state.lock();
        self.enter(&mut state, OP)?;
        Self::lookup(&state, OP, ResourceKind::Network, network_id)?;

        let observed = match self.observe(&mut state, ResourceKind::Network, network_id) {
            Phase::Pending => NetworkState::Pending,
            Phase::Ready => NetworkState::Available,
            Phase::Failed => NetworkState::Unknown("failed".to_string()),
        };
        Self::record_state(&mut state, ResourceKind::Network, network_id, observed.to_string());
        Ok(observed)
    }

    async fn create_internet_gateway(&self) -> ProviderResult<String> {
        let mut state = self.state.lock();
        self.enter(&mut state, "create_internet_gateway")?;
        let record = ResourceRecord::new(
            ResourceKind::InternetGateway,
            Self::new_id(ResourceKind::InternetGateway),
        );
        Ok(Self::insert(&mut state, record))
    }

    async fn attach_internet_gateway(
        &self,
        gateway_id: &str,
        network_id: &str,
    ) -> ProviderResult<()> {
        const OP: &str = "attach_internet_gateway";
        let mut state = self.state.lock();
        self.enter(&mut state, OP)?;
        Self::lookup(&state, OP, ResourceKind::Network, network_id)?;

        let gateway = Self::lookup_mut(&mut state, OP, ResourceKind::InternetGateway, gateway_id)?;
        if let Some(existing) = &gateway.attached_to {
            return Err(ProviderError::rejected(
                OP,
                format!(
                    "Resource.AlreadyAssociated: resource {} is already attached to network {}",
                    gateway_id, existing
                ),
            ));
        }
        gateway.attached_to = Some(network_id.to_string());

        state.events.push(ProviderEvent::Attached {
            gateway_id: gateway_id.to_string(),
            network_id: network_id.to_string(),
        });
        Ok(())
    }

    async fn create_route_table(&self, network_id: &str) -> ProviderResult<String> {
        const OP: &str = "create_route_table";
        let mut state = self.state.lock();
        self.enter(&mut state, OP)?;
        Self::lookup(&state, OP, ResourceKind::Network, network_id)?;

        let mut record =
            ResourceRecord::new(ResourceKind::RouteTable, Self::new_id(ResourceKind::RouteTable));
        record.network_id = Some(network_id.to_string());
        Ok(Self::insert(&mut state, record))
    }

    async fn create_default_route(
        &self,
        route_table_id: &str,
        target: &RouteTarget,
    ) -> ProviderResult<()> {
        const OP: &str = "create_default_route";
        let mut state = self.state.lock();
        self.enter(&mut state, OP)?;
        let network_id = Self::lookup(&state, OP, ResourceKind::RouteTable, route_table_id)?
            .network_id
            .clone();

        match target {
            RouteTarget::InternetGateway(id) => {
                let gateway = Self::lookup(&state, OP, ResourceKind::InternetGateway, id)?;
                if gateway.attached_to != network_id {
                    return Err(ProviderError::rejected(
                        OP,
                        format!(
                            "InvalidParameterValue: route table {} and gateway {} belong to different networks",
                            route_table_id, id
                        ),
                    ));
                }
            }
            RouteTarget::NatGateway(id) => {
                Self::lookup(&state, OP, ResourceKind::NatGateway, id)?;
                if !self.nat_available(&state, id) {
                    return Err(ProviderError::rejected(
                        OP,
                        format!("InvalidNatGatewayID.NotAvailable: nat gateway {} is not available", id),
                    ));
                }
            }
        }

        let table = Self::lookup_mut(&mut state, OP, ResourceKind::RouteTable, route_table_id)?;
        if !table.routes.is_empty() {
            return Err(ProviderError::rejected(
                OP,
                format!(
                    "RouteAlreadyExists: the route identified by {} already exists",
                    DEFAULT_ROUTE_CIDR
                ),
            ));
        }
        table.routes.push(target.clone());

        state.events.push(ProviderEvent::RouteCreated {
            route_table_id: route_table_id.to_string(),
            destination: DEFAULT_ROUTE_CIDR.to_string(),
            target: target.clone(),
        });
        Ok(())
    }

    async fn associate_route_table(
        &self,
        route_table_id: &str,
        subnet_id: &str,
    ) -> ProviderResult<String> {
        const OP: &str = "associate_route_table";
        let mut state = self.state.lock();
        self.enter(&mut state, OP)?;
        let subnet_network =
            Self::lookup(&state, OP, ResourceKind::Subnet, subnet_id)?.network_id.clone();

        let table = Self::lookup_mut(&mut state, OP, ResourceKind::RouteTable, route_table_id)?;
        if table.network_id != subnet_network {
            return Err(ProviderError::rejected(
                OP,
                format!(
                    "InvalidParameterValue: route table {} and subnet {} belong to different networks",
                    route_table_id, subnet_id
                ),
            ));
        }
        table.associations.push(subnet_id.to_string());

        state.events.push(ProviderEvent::Associated {
            route_table_id: route_table_id.to_string(),
            subnet_id: subnet_id.to_string(),
        });
        let suffix = Uuid::new_v4().simple().to_string();
        Ok(format!("rtbassoc-{}", &suffix[..17]))
    }

    async fn create_subnet(
        &self,
        network_id: &str,
        cidr: &str,
        availability_zone: Option<String>,
    ) -> ProviderResult<String> {
        const OP: &str = "create_subnet";
        let mut state = self.state.lock();
        self.enter(&mut state, OP)?;
        let block = parse_cidr(OP, cidr)?;

        let network = Self::lookup(&state, OP, ResourceKind::Network, network_id)?;
        let network_block = parse_cidr(OP, network.cidr.as_deref().unwrap_or_default())?;
        if !network_block.contains(&block) {
            return Err(ProviderError::rejected(
                OP,
                format!("InvalidSubnet.Range: The CIDR '{}' is invalid.", cidr),
            ));
        }

        let conflict = state.resources.values().any(|r| {
            r.kind == ResourceKind::Subnet
                && r.network_id.as_deref() == Some(network_id)
                && r.cidr
                    .as_deref()
                    .and_then(|c| c.parse::<Ipv4Cidr>().ok())
                    .is_some_and(|existing| existing.overlaps(&block))
        });
        if conflict {
            return Err(ProviderError::rejected(
                OP,
                format!("InvalidSubnet.Conflict: The CIDR '{}' conflicts with another subnet", cidr),
            ));
        }

        let mut record = ResourceRecord::new(ResourceKind::Subnet, Self::new_id(ResourceKind::Subnet));
        record.network_id = Some(network_id.to_string());
        record.cidr = Some(cidr.to_string());
        record.availability_zone = availability_zone;
        Ok(Self::insert(&mut state, record))
    }

    async fn allocate_address(&self) -> ProviderResult<String> {
        let mut state = self.state.lock();
        self.enter(&mut state, "allocate_address")?;
        let record = ResourceRecord::new(ResourceKind::Address, Self::new_id(ResourceKind::Address));
        Ok(Self::insert(&mut state, record))
    }

    async fn create_nat_gateway(
        &self,
        subnet_id: &str,
        allocation_id: &str,
    ) -> ProviderResult<String> {
        const OP: &str = "create_nat_gateway";
        let mut state = self.state.lock();
        self.enter(&mut state, OP)?;
        let subnet_network =
            Self::lookup(&state, OP, ResourceKind::Subnet, subnet_id)?.network_id.clone();
        let address = Self::lookup(&state, OP, ResourceKind::Address, allocation_id)?;
        let in_use = address.attached_to.is_some()
            || state
                .resources
                .values()
                .any(|r| r.allocation_id.as_deref() == Some(allocation_id));
        if in_use {
            return Err(ProviderError::rejected(
                OP,
                format!("Resource.AlreadyAssociated: address {} is already in use", allocation_id),
            ));
        }

        let mut record =
            ResourceRecord::new(ResourceKind::NatGateway, Self::new_id(ResourceKind::NatGateway));
        record.network_id = subnet_network;
        record.attached_to = Some(subnet_id.to_string());
        record.allocation_id = Some(allocation_id.to_string());
        Ok(Self::insert(&mut state, record))
    }

    async fn nat_gateway_state(&self, nat_gateway_id: &str) -> ProviderResult<NatGatewayState> {
        const OP: &str = "nat_gateway_state";
        let mut state = self.state.lock();
        self.enter(&mut state, OP)?;
        Self::lookup(&state, OP, ResourceKind::NatGateway, nat_gateway_id)?;

        let observed = match self.observe(&mut state, ResourceKind::NatGateway, nat_gateway_id) {
            Phase::Pending => NatGatewayState::Pending,
            Phase::Ready => NatGatewayState::Available,
            Phase::Failed => NatGatewayState::Failed,
        };
        Self::record_state(
            &mut state,
            ResourceKind::NatGateway,
            nat_gateway_id,
            observed.to_string(),
        );
        Ok(observed)
    }

    async fn create_security_group(
        &self,
        network_id: &str,
        name: &str,
        description: &str,
    ) -> ProviderResult<String> {
        const OP: &str = "create_security_group";
        let mut state = self.state.lock();
        self.enter(&mut state, OP)?;
        Self::lookup(&state, OP, ResourceKind::Network, network_id)?;

        let duplicate = state.resources.values().any(|r| {
            r.kind == ResourceKind::SecurityGroup
                && r.network_id.as_deref() == Some(network_id)
                && r.group.as_ref().is_some_and(|(n, _)| n == name)
        });
        if duplicate {
            return Err(ProviderError::rejected(
                OP,
                format!(
                    "InvalidGroup.Duplicate: The security group '{}' already exists for VPC '{}'",
                    name, network_id
                ),
            ));
        }

        let mut record = ResourceRecord::new(
            ResourceKind::SecurityGroup,
            Self::new_id(ResourceKind::SecurityGroup),
        );
        record.network_id = Some(network_id.to_string());
        record.group = Some((name.to_string(), description.to_string()));
        Ok(Self::insert(&mut state, record))
    }

    async fn authorize_ingress(
        &self,
        group_id: &str,
        rules: &[IngressRule],
    ) -> ProviderResult<()> {
        const OP: &str = "authorize_ingress";
        let mut state = self.state.lock();
        self.enter(&mut state, OP)?;
        for rule in rules {
            parse_cidr(OP, &rule.source_cidr)?;
        }

        let group = Self::lookup_mut(&mut state, OP, ResourceKind::SecurityGroup, group_id)?;
        if let Some(rule) = rules.iter().find(|r| group.rules.contains(r)) {
            return Err(ProviderError::rejected(
                OP,
                format!(
                    "InvalidPermission.Duplicate: the specified rule {} {}..{} from {} already exists",
                    rule.protocol, rule.from_port, rule.to_port, rule.source_cidr
                ),
            ));
        }
        group.rules.extend(rules.iter().cloned());

        state.events.push(ProviderEvent::IngressAuthorized {
            group_id: group_id.to_string(),
            rules: rules.to_vec(),
        });
        Ok(())
    }

    async fn launch_instance(&self, spec: &InstanceSpec) -> ProviderResult<String> {
        const OP: &str = "launch_instance";
        let mut state = self.state.lock();
        self.enter(&mut state, OP)?;
        let subnet_network = Self::lookup(&state, OP, ResourceKind::Subnet, &spec.subnet_id)?
            .network_id
            .clone();
        let group_network =
            Self::lookup(&state, OP, ResourceKind::SecurityGroup, &spec.security_group_id)?
                .network_id
                .clone();
        if subnet_network != group_network {
            return Err(ProviderError::rejected(
                OP,
                format!(
                    "InvalidParameter: security group {} and subnet {} belong to different networks",
                    spec.security_group_id, spec.subnet_id
                ),
            ));
        }

        let mut record =
            ResourceRecord::new(ResourceKind::Instance, Self::new_id(ResourceKind::Instance));
        record.network_id = subnet_network;
        record.instance = Some(spec.clone());
        Ok(Self::insert(&mut state, record))
    }

    async fn instance_state(&self, instance_id: &str) -> ProviderResult<InstanceState> {
        const OP: &str = "instance_state";
        let mut state = self.state.lock();
        self.enter(&mut state, OP)?;
        Self::lookup(&state, OP, ResourceKind::Instance, instance_id)?;

        let observed = match self.observe(&mut state, ResourceKind::Instance, instance_id) {
            Phase::Pending => InstanceState::Pending,
            Phase::Ready => InstanceState::Running,
            Phase::Failed => InstanceState::Terminated,
        };
        Self::record_state(
            &mut state,
            ResourceKind::Instance,
            instance_id,
            observed.to_string(),
        );
        Ok(observed)
    }

    async fn associate_address(
        &self,
        allocation_id: &str,
        instance_id: &str,
    ) -> ProviderResult<String> {
        const OP: &str = "associate_address";
        let mut state = self.state.lock();
        self.enter(&mut state, OP)?;
        Self::lookup(&state, OP, ResourceKind::Instance, instance_id)?;
        if !self.instance_running(&state, instance_id) {
            return Err(ProviderError::rejected(
                OP,
                format!(
                    "IncorrectInstanceState: The instance '{}' is not in a valid state for this operation.",
                    instance_id
                ),
            ));
        }

        let address = Self::lookup_mut(&mut state, OP, ResourceKind::Address, allocation_id)?;
        address.attached_to = Some(instance_id.to_string());

        state.events.push(ProviderEvent::AddressAssociated {
            allocation_id: allocation_id.to_string(),
            instance_id: instance_id.to_string(),
        });
        let suffix = Uuid::new_v4().simple().to_string();
        Ok(format!("eipassoc-{}", &suffix[..17]))
    }

    async fn tag_resource(&self, resource_id: &str, tags: &[Tag]) -> ProviderResult<()> {
        const OP: &str = "tag_resource";
        let mut state = self.state.lock();
        self.enter(&mut state, OP)?;
        if self.behavior.fail_tagging {
            return Err(ProviderError::rejected(
                OP,
                "UnauthorizedOperation: You are not authorized to perform ec2:CreateTags.",
            ));
        }

        let record = state
            .resources
            .get_mut(resource_id)
            .ok_or_else(|| {
                ProviderError::not_found(OP, format!("The ID '{}' does not exist", resource_id))
            })?;
        for tag in tags {
            record.tags.insert(tag.key.clone(), tag.value.clone());
        }

        state.events.push(ProviderEvent::Tagged {
            id: resource_id.to_string(),
            tags: tags.to_vec(),
        });
        Ok(())
    }

    async fn find_tagged(
        &self,
        kind: ResourceKind,
        name: &str,
        network_id: Option<String>,
    ) -> ProviderResult<Option<String>> {
        let mut state = self.state.lock();
        self.enter(&mut state, "find_tagged")?;

        let in_scope = |r: &ResourceRecord| match network_id.as_deref() {
            Some(network) => r.network_id.as_deref() == Some(network),
            None => true,
        };
        let found = state
            .creation_order
            .iter()
            .filter_map(|id| state.resources.get(id))
            .find(|r| r.kind == kind && r.name() == Some(name) && in_scope(r))
            .map(|r| r.id.clone());
        Ok(found)
    }
}
