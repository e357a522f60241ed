//! Network and internet gateway.

use super::{Obtained, Provisioner, Step};
use crate::error::Result;
use crate::provider::{CloudProvider, NetworkState, ResourceKind};
use crate::wait::{poll_until, Readiness, WaitTarget};
use tracing::info;

fn network_readiness(state: &NetworkState) -> Readiness {
    match state {
        NetworkState::Available => Readiness::Ready,
        _ => Readiness::Pending,
    }
}

impl<'a, P: CloudProvider + ?Sized> Provisioner<'a, P> {
    /// Create (or find) the network and block until it is `available`.
    pub async fn build_network(&mut self) -> Result<Obtained> {
        let provider = self.provider;
        let config = self.config;

        let network = self
            .obtain(ResourceKind::Network, &config.names.network, || {
                provider.create_network(&config.vpc_cidr)
            })
            .await?;
        info!("VPC ID: {}", network.id);

        poll_until(
            WaitTarget {
                step: Step::Network,
                kind: ResourceKind::Network,
                id: &network.id,
                desired: "available",
            },
            &config.wait.network(),
            &self.cancel,
            || provider.network_state(&network.id),
            network_readiness,
        )
        .await?;

        Ok(network)
    }

    /// Create the internet gateway and attach it to `network`.
    ///
    /// A reused gateway is assumed to be attached already.
    pub async fn attach_internet_gateway(&mut self, network: &Obtained) -> Result<Obtained> {
        let provider = self.provider;
        let config = self.config;

        let gateway = self
            .obtain(
                ResourceKind::InternetGateway,
                &config.names.internet_gateway,
                || provider.create_internet_gateway(),
            )
            .await?;

        if !gateway.reused {
            self.call("attach_internet_gateway", || {
                provider.attach_internet_gateway(&gateway.id, &network.id)
            })
            .await?;
            info!("Attached internet gateway {} to {}", gateway.id, network.id);
        }

        Ok(gateway)
    }
}
