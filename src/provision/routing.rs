//! Route tables.
//!
//! A route table carries exactly one route, `0.0.0.0/0` to a gateway, and is
//! associated with exactly one subnet. Creation and association are separate
//! calls because the public table exists before its subnet does.

use super::{Obtained, Provisioner, ReadyNatGateway};
use crate::error::Result;
use crate::provider::{CloudProvider, ResourceKind, RouteTarget, DEFAULT_ROUTE_CIDR};
use tracing::info;

impl<'a, P: CloudProvider + ?Sized> Provisioner<'a, P> {
    /// Public table: default route to the internet gateway.
    pub async fn create_public_route_table(
        &mut self,
        network_id: &str,
        gateway_id: &str,
    ) -> Result<Obtained> {
        let config = self.config;
        let name = &config.names.public_route_table;
        self.create_routed_table(
            network_id,
            name,
            RouteTarget::InternetGateway(gateway_id.to_string()),
        )
        .await
    }

    /// Private table: default route to a NAT gateway that is known to be available.
    pub async fn create_private_route_table(
        &mut self,
        network_id: &str,
        nat: &ReadyNatGateway,
    ) -> Result<Obtained> {
        let config = self.config;
        let name = &config.names.private_route_table;
        self.create_routed_table(network_id, name, RouteTarget::NatGateway(nat.id().to_string()))
            .await
    }

    async fn create_routed_table(
        &mut self,
        network_id: &str,
        name: &str,
        target: RouteTarget,
    ) -> Result<Obtained> {
        let provider = self.provider;

        let table = self
            .obtain(ResourceKind::RouteTable, name, || {
                provider.create_route_table(network_id)
            })
            .await?;
        info!("Route table ID: {}", table.id);

        if !table.reused {
            self.call("create_default_route", || {
                provider.create_default_route(&table.id, &target)
            })
            .await?;
            info!(
                "Route {} -> {} added to {}",
                DEFAULT_ROUTE_CIDR,
                target.id(),
                table.id
            );
        }

        Ok(table)
    }

    /// Associate `table` with `subnet`. Skipped when both were reused.
    pub async fn associate_route_table(
        &mut self,
        table: &Obtained,
        subnet: &Obtained,
    ) -> Result<Option<String>> {
        if table.reused && subnet.reused {
            return Ok(None);
        }

        let provider = self.provider;
        let association = self
            .call("associate_route_table", || {
                provider.associate_route_table(&table.id, &subnet.id)
            })
            .await?;
        info!(
            "Associated route table {} with subnet {} ({})",
            table.id, subnet.id, association
        );
        Ok(Some(association))
    }
}
