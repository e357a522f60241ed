//! End-to-end provisioning tests against the in-memory provider
//!
//! These tests drive complete runs and check:
//! - Step order and the resources each step leaves behind
//! - Routing: internet gateway for the public tier, NAT for the private tier
//! - Security group sources and instance wiring
//! - Reuse of existing resources and independence of repeated runs
//! - Failure handling: tagging, throttling, rejections, waits, cancellation
//! - The serialized report

mod common;

use common::*;
use pretty_assertions::assert_eq;
use std::time::Duration;
use tiernet::error::Error;
use tiernet::provider::memory::ProviderEvent;
use tiernet::provider::{
    CloudProvider, InMemoryProvider, Protocol, ProviderErrorKind, ResourceKind, RouteTarget, Tag,
    NAME_TAG,
};
use tiernet::provision::{Provisioner, Step};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Full Run Tests
// ============================================================================

#[tokio::test]
async fn test_full_run_completes_every_step() {
    let provider = InMemoryProvider::new();
    let config = fast_config();

    let outcome = provision(&provider, &config).await;
    assert!(outcome.is_success(), "run failed: {:?}", outcome.error);

    let report = &outcome.report;
    assert_eq!(report.completed, Step::ALL.to_vec());
    assert_eq!(report.failed_step, None);
    assert_eq!(report.provider, "in-memory");
    assert_eq!(report.region, config.region);
    assert!(report.warnings.is_empty());
    assert!(report.started_at.is_some());
    assert!(report.finished_at >= report.started_at);

    assert_eq!(report.created.len(), 13);
    assert_eq!(report.newly_created().count(), 13);
    assert_eq!(provider.resources().len(), 13);
}

#[tokio::test]
async fn test_resources_created_in_step_order() {
    let provider = InMemoryProvider::new();
    provision(&provider, &fast_config()).await.into_result().unwrap();

    assert_eq!(
        created_kinds(&provider.events()),
        vec![
            ResourceKind::Network,
            ResourceKind::InternetGateway,
            ResourceKind::RouteTable,
            ResourceKind::Subnet,
            ResourceKind::Subnet,
            ResourceKind::Address,
            ResourceKind::Address,
            ResourceKind::NatGateway,
            ResourceKind::RouteTable,
            ResourceKind::SecurityGroup,
            ResourceKind::SecurityGroup,
            ResourceKind::Instance,
            ResourceKind::Instance,
        ]
    );
}

#[tokio::test]
async fn test_network_available_before_anything_attaches() {
    let provider = InMemoryProvider::new();
    let report = provision(&provider, &fast_config()).await.into_result().unwrap();
    let events = provider.events();

    let network_id = some_id(&report.network_id);
    let available = position(&events, |e| {
        matches!(e, ProviderEvent::StateObserved { id, state, .. }
            if id == network_id && state == "available")
    });
    let gateway = created_at(&events, some_id(&report.internet_gateway_id));
    assert!(available < gateway);
}

#[tokio::test]
async fn test_every_resource_carries_its_name_and_extra_tags() {
    let provider = InMemoryProvider::new();
    let mut config = fast_config();
    config.tags.insert("project".to_string(), "demo".to_string());

    let report = provision(&provider, &config).await.into_result().unwrap();

    for created in &report.created {
        let record = provider.resource(&created.id).unwrap();
        assert_eq!(record.name(), Some(created.name.as_str()));
        assert_eq!(record.tags.get("project").map(String::as_str), Some("demo"));
    }

    let network = provider.resource(some_id(&report.network_id)).unwrap();
    assert_eq!(network.tags.get(NAME_TAG).map(String::as_str), Some("vpc_test"));
    let app = provider.resource(some_id(&report.private_instance_id)).unwrap();
    assert_eq!(app.name(), Some("App"));
}

// ============================================================================
// Topology Tests
// ============================================================================

#[tokio::test]
async fn test_subnets_inside_network() {
    let provider = InMemoryProvider::new();
    let mut config = fast_config();
    config.availability_zone = Some("ap-southeast-2a".to_string());

    let report = provision(&provider, &config).await.into_result().unwrap();
    let network_id = some_id(&report.network_id);

    let public = provider.resource(some_id(&report.public_subnet_id)).unwrap();
    let private = provider.resource(some_id(&report.private_subnet_id)).unwrap();

    assert_eq!(public.network_id.as_deref(), Some(network_id));
    assert_eq!(private.network_id.as_deref(), Some(network_id));
    assert_eq!(public.cidr.as_deref(), Some("10.1.1.0/24"));
    assert_eq!(private.cidr.as_deref(), Some("10.1.2.0/24"));
    assert_eq!(public.availability_zone.as_deref(), Some("ap-southeast-2a"));
    assert_eq!(private.availability_zone.as_deref(), Some("ap-southeast-2a"));
}

#[tokio::test]
async fn test_public_tier_routes_through_internet_gateway() {
    let provider = InMemoryProvider::new();
    let report = provision(&provider, &fast_config()).await.into_result().unwrap();

    let gateway_id = some_id(&report.internet_gateway_id);
    let gateway = provider.resource(gateway_id).unwrap();
    assert_eq!(gateway.attached_to.as_deref(), Some(some_id(&report.network_id)));

    let table = provider
        .resource(some_id(&report.public_route_table_id))
        .unwrap();
    assert_eq!(
        table.routes,
        vec![RouteTarget::InternetGateway(gateway_id.to_string())]
    );
    assert_eq!(
        table.associations,
        vec![some_id(&report.public_subnet_id).to_string()]
    );
}

#[tokio::test]
async fn test_private_tier_routes_through_nat_gateway() {
    let provider = InMemoryProvider::new();
    let report = provision(&provider, &fast_config()).await.into_result().unwrap();

    let nat_id = some_id(&report.nat_gateway_id);
    let nat = provider.resource(nat_id).unwrap();
    assert_eq!(nat.attached_to.as_deref(), Some(some_id(&report.public_subnet_id)));
    assert_eq!(nat.allocation_id.as_deref(), Some(some_id(&report.nat_address_id)));

    let table = provider
        .resource(some_id(&report.private_route_table_id))
        .unwrap();
    assert_eq!(table.routes, vec![RouteTarget::NatGateway(nat_id.to_string())]);
    assert_eq!(
        table.associations,
        vec![some_id(&report.private_subnet_id).to_string()]
    );
}

#[tokio::test]
async fn test_nat_available_before_private_route() {
    let provider = InMemoryProvider::builder()
        .pending_polls(ResourceKind::NatGateway, 4)
        .build();
    let report = provision(&provider, &fast_config()).await.into_result().unwrap();
    let events = provider.events();

    let nat_id = some_id(&report.nat_gateway_id);
    let available = position(&events, |e| {
        matches!(e, ProviderEvent::StateObserved { id, state, .. }
            if id == nat_id && state == "available")
    });
    let route = position(&events, |e| {
        matches!(e, ProviderEvent::RouteCreated { target: RouteTarget::NatGateway(_), .. })
    });
    assert!(available < route);

    let pending = events
        .iter()
        .filter(|e| matches!(e, ProviderEvent::StateObserved { id, state, .. }
            if id == nat_id && state == "pending"))
        .count();
    assert_eq!(pending, 4);
}

// ============================================================================
// Security Group Tests
// ============================================================================

#[tokio::test]
async fn test_jump_box_group_admits_operator_range_only() {
    let provider = InMemoryProvider::new();
    let report = provision(&provider, &fast_config()).await.into_result().unwrap();

    let group = provider.resource(some_id(&report.public_group_id)).unwrap();
    assert_eq!(
        group.group,
        Some(("Jump_box".to_string(), "jump box sec group".to_string()))
    );
    assert_eq!(group.rules.len(), 2);
    assert!(group.rules.iter().all(|r| r.source_cidr == OPERATOR_CIDR));

    let icmp = group.rules.iter().find(|r| r.protocol == Protocol::Icmp).unwrap();
    assert_eq!((icmp.from_port, icmp.to_port), (-1, -1));
    let ssh = group.rules.iter().find(|r| r.protocol == Protocol::Tcp).unwrap();
    assert_eq!((ssh.from_port, ssh.to_port), (22, 22));
}

#[tokio::test]
async fn test_app_group_admits_public_subnet_only() {
    let provider = InMemoryProvider::new();
    let config = fast_config();
    let report = provision(&provider, &config).await.into_result().unwrap();

    let group = provider.resource(some_id(&report.private_group_id)).unwrap();
    assert_eq!(
        group.group,
        Some(("App".to_string(), "app sec group".to_string()))
    );
    assert_eq!(group.rules.len(), 2);
    assert!(group.rules.iter().all(|r| r.source_cidr == config.public_cidr));
    assert!(group
        .rules
        .iter()
        .any(|r| r.protocol == Protocol::Tcp && r.from_port == 22 && r.to_port == 22));
}

// ============================================================================
// Instance Tests
// ============================================================================

#[tokio::test]
async fn test_jump_box_address_after_running() {
    let provider = InMemoryProvider::builder()
        .pending_polls(ResourceKind::Instance, 3)
        .build();
    let report = provision(&provider, &fast_config()).await.into_result().unwrap();
    let events = provider.events();

    let jump_box = some_id(&report.public_instance_id);
    let running = position(&events, |e| {
        matches!(e, ProviderEvent::StateObserved { id, state, .. }
            if id == jump_box && state == "running")
    });
    let associated = position(&events, |e| {
        matches!(e, ProviderEvent::AddressAssociated { instance_id, .. } if instance_id == jump_box)
    });
    assert!(running < associated);

    let address = provider.resource(some_id(&report.jump_address_id)).unwrap();
    assert_eq!(address.attached_to.as_deref(), Some(jump_box));
    assert!(report
        .jump_address_association_id
        .as_deref()
        .is_some_and(|id| id.starts_with("eipassoc-")));
}

#[tokio::test]
async fn test_app_instance_has_no_public_address() {
    let provider = InMemoryProvider::new();
    let config = fast_config();
    let report = provision(&provider, &config).await.into_result().unwrap();

    let associations: Vec<_> = provider
        .events()
        .into_iter()
        .filter(|e| matches!(e, ProviderEvent::AddressAssociated { .. }))
        .collect();
    assert_eq!(associations.len(), 1);

    let app = provider.resource(some_id(&report.private_instance_id)).unwrap();
    let spec = app.instance.unwrap();
    assert!(!spec.assign_public_ip);
    assert_eq!(spec.subnet_id, some_id(&report.private_subnet_id));
    assert_eq!(spec.security_group_id, some_id(&report.private_group_id));
    assert_eq!(spec.key_name, config.key_name);

    let jump_box = provider.resource(some_id(&report.public_instance_id)).unwrap();
    let spec = jump_box.instance.unwrap();
    assert!(spec.assign_public_ip);
    assert_eq!(spec.subnet_id, some_id(&report.public_subnet_id));
    assert_eq!(spec.image, config.image);
    assert_eq!(spec.instance_type, config.instance_type);
}

// ============================================================================
// Repeated Run Tests
// ============================================================================

#[tokio::test]
async fn test_second_run_builds_independent_topology() {
    let provider = InMemoryProvider::new();
    let config = fast_config();

    let first = provision(&provider, &config).await.into_result().unwrap();
    let second = provision(&provider, &config).await.into_result().unwrap();

    assert_ne!(first.run_id, second.run_id);
    assert!(first.ids().iter().all(|id| !second.ids().contains(id)));
    assert_eq!(provider.count(ResourceKind::Network), 2);
    assert_eq!(provider.resources().len(), 26);
}

#[tokio::test]
async fn test_reuse_creates_nothing_on_second_run() {
    let provider = InMemoryProvider::new();
    let config = reuse_config();

    let first = provision(&provider, &config).await.into_result().unwrap();
    assert_eq!(first.newly_created().count(), 13);

    let second = provision(&provider, &config).await.into_result().unwrap();
    assert_eq!(second.newly_created().count(), 0);
    assert!(second.created.iter().all(|r| r.reused));
    assert_eq!(second.completed, Step::ALL.to_vec());
    assert_eq!(second.ids(), first.ids());
    assert_eq!(provider.resources().len(), 13);

    // Mutations on reused resources are not repeated
    assert_eq!(provider.calls("create_network"), 1);
    assert_eq!(provider.calls("attach_internet_gateway"), 1);
    assert_eq!(provider.calls("create_default_route"), 2);
    assert_eq!(provider.calls("associate_route_table"), 2);
    assert_eq!(provider.calls("authorize_ingress"), 2);
    assert_eq!(provider.calls("associate_address"), 1);
}

#[tokio::test]
async fn test_reuse_ignores_same_named_subnet_in_other_network() {
    let provider = InMemoryProvider::new();
    let foreign = provider.create_network("10.9.0.0/16").await.unwrap();
    let foreign_subnet = provider
        .create_subnet(&foreign, "10.9.1.0/24", None)
        .await
        .unwrap();
    provider
        .tag_resource(&foreign_subnet, &[Tag::name("public subnet")])
        .await
        .unwrap();

    let report = provision(&provider, &reuse_config())
        .await
        .into_result()
        .unwrap();

    assert_ne!(some_id(&report.public_subnet_id), foreign_subnet);
    assert_eq!(report.newly_created().count(), 13);
    let subnet = provider.resource(some_id(&report.public_subnet_id)).unwrap();
    assert_eq!(subnet.network_id, report.network_id);
    assert_eq!(subnet.cidr.as_deref(), Some("10.1.1.0/24"));
}

// ============================================================================
// Failure Tests
// ============================================================================

#[tokio::test]
async fn test_tagging_failure_is_not_fatal() {
    let provider = InMemoryProvider::builder().fail_tagging().build();
    let outcome = provision(&provider, &fast_config()).await;

    assert!(outcome.is_success());
    let report = outcome.report;
    assert_eq!(report.completed.len(), Step::ALL.len());
    assert_eq!(report.warnings.len(), report.created.len());
    assert!(report.warnings.iter().all(|w| w.starts_with("Failed to tag")));
    assert!(provider.resources().iter().all(|r| r.name().is_none()));
}

#[tokio::test]
async fn test_throttled_call_is_retried() {
    let provider = InMemoryProvider::builder()
        .throttle("create_network", 2)
        .build();
    let outcome = provision(&provider, &fast_config()).await;

    assert!(outcome.is_success(), "run failed: {:?}", outcome.error);
    assert_eq!(provider.calls("create_network"), 3);
    assert_eq!(provider.count(ResourceKind::Network), 1);
}

#[tokio::test]
async fn test_unavailable_create_is_not_repeated() {
    let provider = InMemoryProvider::builder()
        .fail("create_network", ProviderErrorKind::Unavailable, "RequestTimeout")
        .build();
    let outcome = provision(&provider, &fast_config()).await;

    assert_eq!(provider.calls("create_network"), 1);
    match outcome.error {
        Some(Error::Provider(e)) => assert_eq!(e.kind, ProviderErrorKind::Unavailable),
        other => panic!("expected a provider error, got {:?}", other),
    }
    assert_eq!(outcome.report.failed_step, Some(Step::Network));
}

#[tokio::test]
async fn test_unavailable_attachment_is_retried() {
    let provider = InMemoryProvider::builder()
        .fail("attach_internet_gateway", ProviderErrorKind::Unavailable, "503")
        .build();
    let config = fast_config();
    let outcome = provision(&provider, &config).await;

    assert_eq!(
        provider.calls("attach_internet_gateway"),
        config.retry.max_retries + 1
    );
    assert_eq!(provider.calls("create_internet_gateway"), 1);
    assert_eq!(outcome.report.failed_step, Some(Step::InternetGateway));
}

#[tokio::test]
async fn test_throttling_beyond_retries_stops_the_run() {
    let provider = InMemoryProvider::builder()
        .throttle("create_internet_gateway", 10)
        .build();
    let config = fast_config();
    let outcome = provision(&provider, &config).await;

    assert_eq!(
        provider.calls("create_internet_gateway"),
        config.retry.max_retries + 1
    );
    match outcome.error {
        Some(Error::Provider(e)) => assert_eq!(e.kind, ProviderErrorKind::Throttled),
        other => panic!("expected a provider error, got {:?}", other),
    }
    assert_eq!(outcome.report.failed_step, Some(Step::InternetGateway));
}

#[tokio::test]
async fn test_rejected_call_is_not_retried() {
    let provider = InMemoryProvider::builder()
        .reject("create_nat_gateway", "NatGatewayLimitExceeded: limit reached")
        .build();
    let outcome = provision(&provider, &fast_config()).await;

    assert_eq!(provider.calls("create_nat_gateway"), 1);
    let error = outcome.error.expect("run fails");
    assert!(error.is_fatal());
    assert_eq!(error.exit_code(), 1);
    assert!(error.to_string().contains("NatGatewayLimitExceeded"));

    // Partial report: everything before the NAT gateway
    let report = outcome.report;
    assert_eq!(report.failed_step, Some(Step::NatGateway));
    assert_eq!(report.completed, Step::ALL[..7].to_vec());
    assert_eq!(report.created.len(), 7);
    assert!(report.nat_address_id.is_some());
    assert!(report.nat_gateway_id.is_none());
    assert!(report.private_route_table_id.is_none());
    assert_eq!(provider.count(ResourceKind::RouteTable), 1);
}

#[tokio::test(start_paused = true)]
async fn test_nat_never_available_times_out() {
    let provider = InMemoryProvider::builder()
        .never_ready(ResourceKind::NatGateway)
        .build();
    let mut config = fast_config();
    config.wait.poll_interval = Duration::from_secs(5);
    config.wait.network_timeout = Duration::from_secs(60);
    config.wait.nat_gateway_timeout = Duration::from_secs(60);

    let outcome = provision(&provider, &config).await;

    match outcome.error {
        Some(Error::WaitTimeout {
            kind,
            waited,
            last_state,
            ..
        }) => {
            assert_eq!(kind, ResourceKind::NatGateway);
            assert!(waited >= Duration::from_secs(60));
            assert!(waited < Duration::from_secs(65));
            assert_eq!(last_state.as_deref(), Some("pending"));
        }
        other => panic!("expected a wait timeout, got {:?}", other),
    }
    assert_eq!(outcome.report.failed_step, Some(Step::NatGateway));
    assert!(outcome.report.nat_gateway_id.is_some());
    assert!(!provider
        .events()
        .iter()
        .any(|e| matches!(e, ProviderEvent::RouteCreated { target: RouteTarget::NatGateway(_), .. })));
}

#[tokio::test]
async fn test_failed_nat_gateway_is_fatal() {
    let provider = InMemoryProvider::builder()
        .fails_when_ready(ResourceKind::NatGateway)
        .build();
    let outcome = provision(&provider, &fast_config()).await;

    match outcome.error {
        Some(Error::WaitFailed { kind, state, .. }) => {
            assert_eq!(kind, ResourceKind::NatGateway);
            assert_eq!(state, "failed");
        }
        other => panic!("expected a failed wait, got {:?}", other),
    }
    assert_eq!(outcome.report.failed_step, Some(Step::NatGateway));
}

#[tokio::test]
async fn test_missing_operator_range_rejected_before_any_call() {
    let provider = InMemoryProvider::new();
    let config = tiernet::config::ProvisionConfig {
        allowed_source_cidr: None,
        ..fast_config()
    };

    let err = Provisioner::new(&provider, &config).err().expect("rejected");
    assert!(matches!(err, Error::Config(_)));
    assert!(err.to_string().contains("allowedSourceCidr is required"));
    assert!(provider.events().is_empty());
}

// ============================================================================
// Cancellation Tests
// ============================================================================

#[tokio::test]
async fn test_cancelled_before_start_creates_nothing() {
    let provider = InMemoryProvider::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = provision_with_cancel(&provider, &fast_config(), cancel).await;

    let error = outcome.error.expect("run is cancelled");
    assert!(error.is_cancelled());
    assert_eq!(error.exit_code(), 130);
    assert!(matches!(error, Error::Cancelled { step: Step::Network }));
    assert!(outcome.report.created.is_empty());
    assert!(provider.resources().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_retry_backoff_stops_creates() {
    let provider = InMemoryProvider::builder()
        .throttle("create_network", 3)
        .build();
    let mut config = fast_config();
    config.retry.initial_delay = Duration::from_secs(10);
    config.retry.max_delay = Duration::from_secs(10);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let outcome = provision_with_cancel(&provider, &config, cancel).await;

    assert!(matches!(
        outcome.error,
        Some(Error::Cancelled {
            step: Step::Network
        })
    ));
    assert_eq!(provider.calls("create_network"), 1);
    assert!(provider.resources().is_empty());
    assert!(outcome.report.created.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_during_nat_wait_keeps_partial_report() {
    let provider = InMemoryProvider::builder()
        .never_ready(ResourceKind::NatGateway)
        .build();
    let mut config = fast_config();
    config.wait.poll_interval = Duration::from_secs(5);
    config.wait.network_timeout = Duration::from_secs(60);
    config.wait.nat_gateway_timeout = Duration::from_secs(600);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
        trigger.cancel();
    });

    let outcome = provision_with_cancel(&provider, &config, cancel).await;

    assert!(matches!(
        outcome.error,
        Some(Error::Cancelled {
            step: Step::NatGateway
        })
    ));
    let report = outcome.report;
    assert_eq!(report.completed, Step::ALL[..7].to_vec());
    assert_eq!(report.created.len(), 8);
    assert!(report.nat_gateway_id.is_some());
    assert_eq!(provider.resources().len(), 8);
}

// ============================================================================
// Report Tests
// ============================================================================

#[tokio::test]
async fn test_report_serializes_camel_case() {
    let provider = InMemoryProvider::new();
    let report = provision(&provider, &fast_config()).await.into_result().unwrap();

    let value = serde_json::to_value(&report).unwrap();
    assert_eq!(value["networkId"], serde_json::json!(report.network_id));
    assert_eq!(value["natGatewayId"], serde_json::json!(report.nat_gateway_id));
    assert_eq!(value["failedStep"], serde_json::Value::Null);
    assert_eq!(value["completed"][0], "network");
    assert_eq!(value["completed"][12], "private_instance");
    assert_eq!(value["created"][0]["kind"], "network");
    assert_eq!(value["created"][0]["name"], "vpc_test");
    assert_eq!(value["created"][0]["reused"], false);

    let parsed: tiernet::provision::ProvisionReport = serde_json::from_value(value).unwrap();
    assert_eq!(parsed, report);
}
