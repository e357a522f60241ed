//! Instances and static addresses.

use super::{Obtained, Provisioner, Step};
use crate::error::Result;
use crate::provider::{CloudProvider, InstanceSpec, InstanceState, ResourceKind};
use crate::wait::{poll_until, Readiness, WaitTarget};
use tracing::info;

fn instance_readiness(state: &InstanceState) -> Readiness {
    match state {
        InstanceState::Running => Readiness::Ready,
        s if s.is_terminal_failure() => Readiness::Failed,
        _ => Readiness::Pending,
    }
}

impl<'a, P: CloudProvider + ?Sized> Provisioner<'a, P> {
    /// Allocate (or find) a static address tagged `name`.
    pub async fn allocate_address(&mut self, name: &str) -> Result<Obtained> {
        let provider = self.provider;
        let address = self
            .obtain(ResourceKind::Address, name, || provider.allocate_address())
            .await?;
        info!("Static address ({}): {}", name, address.id);
        Ok(address)
    }

    /// Jump box: public address on launch, static address once running.
    pub async fn launch_public_instance(
        &mut self,
        subnet_id: &str,
        group_id: &str,
        allocation_id: &str,
    ) -> Result<Obtained> {
        let provider = self.provider;
        let spec = self.instance_spec(
            &self.config.names.public_instance,
            subnet_id,
            group_id,
            true,
        );

        let instance = self.launch_instance(Step::PublicInstance, &spec).await?;

        if !instance.reused {
            let association = self
                .call("associate_address", || {
                    provider.associate_address(allocation_id, &instance.id)
                })
                .await?;
            info!(
                "Associated address {} with {} ({})",
                allocation_id, instance.id, association
            );
            self.report.jump_address_association_id = Some(association);
        }

        Ok(instance)
    }

    /// App instance: no public address of any kind.
    pub async fn launch_private_instance(
        &mut self,
        subnet_id: &str,
        group_id: &str,
    ) -> Result<Obtained> {
        let spec = self.instance_spec(
            &self.config.names.private_instance,
            subnet_id,
            group_id,
            false,
        );
        self.launch_instance(Step::PrivateInstance, &spec).await
    }

    fn instance_spec(
        &self,
        name: &str,
        subnet_id: &str,
        group_id: &str,
        assign_public_ip: bool,
    ) -> InstanceSpec {
        InstanceSpec {
            name: name.to_string(),
            image: self.config.image.clone(),
            instance_type: self.config.instance_type.clone(),
            key_name: self.config.key_name.clone(),
            subnet_id: subnet_id.to_string(),
            security_group_id: group_id.to_string(),
            assign_public_ip,
        }
    }

    /// Launch, tag and wait for `running`.
    async fn launch_instance(&mut self, step: Step, spec: &InstanceSpec) -> Result<Obtained> {
        let provider = self.provider;
        let config = self.config;

        let instance = self
            .obtain(ResourceKind::Instance, &spec.name, || {
                provider.launch_instance(spec)
            })
            .await?;
        info!("Instance ID ({}): {}", spec.name, instance.id);

        poll_until(
            WaitTarget {
                step,
                kind: ResourceKind::Instance,
                id: &instance.id,
                desired: "running",
            },
            &config.wait.instance(),
            &self.cancel,
            || provider.instance_state(&instance.id),
            instance_readiness,
        )
        .await?;

        Ok(instance)
    }
}
