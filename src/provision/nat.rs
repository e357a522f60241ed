//! NAT gateway and its static address.

use super::{Provisioner, Step};
use crate::error::Result;
use crate::provider::{CloudProvider, NatGatewayState, ResourceKind};
use crate::wait::{poll_until, Readiness, WaitTarget};
use tracing::info;

/// A NAT gateway that has been observed `available`.
///
/// Only [`Provisioner::provision_nat_gateway`] hands these out, so a private
/// route can never point at a gateway that is still pending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyNatGateway {
    id: String,
    allocation_id: String,
}

impl ReadyNatGateway {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Static address backing the gateway.
    pub fn allocation_id(&self) -> &str {
        &self.allocation_id
    }
}

fn nat_readiness(state: &NatGatewayState) -> Readiness {
    match state {
        NatGatewayState::Available => Readiness::Ready,
        s if s.is_terminal_failure() => Readiness::Failed,
        _ => Readiness::Pending,
    }
}

impl<'a, P: CloudProvider + ?Sized> Provisioner<'a, P> {
    /// Allocate a static address, create the NAT gateway in `public_subnet_id`
    /// and block until it is `available`.
    pub async fn provision_nat_gateway(&mut self, public_subnet_id: &str) -> Result<ReadyNatGateway> {
        let provider = self.provider;
        let config = self.config;

        let address = self.allocate_address(&config.names.nat_address).await?;
        self.report.nat_address_id = Some(address.id.clone());

        let nat = self
            .obtain(ResourceKind::NatGateway, &config.names.nat_gateway, || {
                provider.create_nat_gateway(public_subnet_id, &address.id)
            })
            .await?;
        self.report.nat_gateway_id = Some(nat.id.clone());
        info!("NAT gateway ID: {}", nat.id);

        poll_until(
            WaitTarget {
                step: Step::NatGateway,
                kind: ResourceKind::NatGateway,
                id: &nat.id,
                desired: "available",
            },
            &config.wait.nat_gateway(),
            &self.cancel,
            || provider.nat_gateway_state(&nat.id),
            nat_readiness,
        )
        .await?;

        Ok(ReadyNatGateway {
            id: nat.id,
            allocation_id: address.id,
        })
    }
}
