//! Security groups.
//!
//! The jump box group admits ICMP and SSH from the operator range only. The
//! app group admits the same two protocols from the public subnet, so the
//! private tier is reachable through the jump box and nothing else.

use super::{Obtained, Provisioner};
use crate::error::Result;
use crate::provider::{CloudProvider, IngressRule, ResourceKind};
use tracing::info;

const SSH_PORT: u16 = 22;

/// ICMP and SSH from `source_cidr`.
pub fn allow_list(source_cidr: &str, label: &str) -> Vec<IngressRule> {
    vec![
        IngressRule::icmp_from(source_cidr).with_description(format!("ICMP from {}", label)),
        IngressRule::tcp_from(SSH_PORT, source_cidr).with_description(format!("SSH from {}", label)),
    ]
}

impl<'a, P: CloudProvider + ?Sized> Provisioner<'a, P> {
    /// Jump box group, open to the operator range.
    pub async fn create_public_security_group(&mut self, network_id: &str) -> Result<Obtained> {
        let config = self.config;
        let names = &config.names;
        let rules = allow_list(&self.source_cidr, "operator range");
        self.create_security_group(
            network_id,
            &names.public_group,
            &names.public_group_description,
            rules,
        )
        .await
    }

    /// App group, open to the public subnet.
    pub async fn create_private_security_group(&mut self, network_id: &str) -> Result<Obtained> {
        let config = self.config;
        let rules = allow_list(&config.public_cidr, "public subnet");
        self.create_security_group(
            network_id,
            &config.names.private_group,
            &config.names.private_group_description,
            rules,
        )
        .await
    }

    async fn create_security_group(
        &mut self,
        network_id: &str,
        name: &str,
        description: &str,
        rules: Vec<IngressRule>,
    ) -> Result<Obtained> {
        let provider = self.provider;

        let group = self
            .obtain(ResourceKind::SecurityGroup, name, || {
                provider.create_security_group(network_id, name, description)
            })
            .await?;
        info!("Security group ID ({}): {}", name, group.id);

        if !group.reused {
            self.call("authorize_ingress", || {
                provider.authorize_ingress(&group.id, &rules)
            })
            .await?;
            for rule in &rules {
                info!(
                    "Allowed {} {}..{} from {} into {}",
                    rule.protocol, rule.from_port, rule.to_port, rule.source_cidr, group.id
                );
            }
        }

        Ok(group)
    }
}
