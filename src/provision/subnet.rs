//! Subnets of the network, public and private alike.

use super::{Obtained, Provisioner};
use crate::error::Result;
use crate::provider::{CloudProvider, ResourceKind};
use tracing::info;

impl<'a, P: CloudProvider + ?Sized> Provisioner<'a, P> {
    /// Create and tag one subnet of `network_id`. No wait.
    pub async fn create_subnet(
        &mut self,
        network_id: &str,
        cidr: &str,
        name: &str,
    ) -> Result<Obtained> {
        let provider = self.provider;
        let zone = self.config.availability_zone.clone();

        let subnet = self
            .obtain(ResourceKind::Subnet, name, || {
                provider.create_subnet(network_id, cidr, zone.clone())
            })
            .await?;
        info!("Subnet ID ({}): {}", name, subnet.id);

        Ok(subnet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProvisionConfig;
    use crate::provider::MockCloudProvider;

    #[tokio::test]
    async fn test_subnet_uses_configured_zone() {
        let mut mock = MockCloudProvider::new();
        mock.expect_name().return_const("mock");
        mock.expect_create_subnet()
            .withf(|vpc, cidr, zone| {
                vpc == "vpc-1" && cidr == "10.1.1.0/24" && zone.as_deref() == Some("ap-southeast-2a")
            })
            .times(1)
            .returning(|_, _, _| Ok("subnet-1".to_string()));
        mock.expect_tag_resource()
            .withf(|id, tags| id == "subnet-1" && tags[0].value == "public subnet")
            .returning(|_, _| Ok(()));

        let config = ProvisionConfig {
            allowed_source_cidr: Some("203.0.113.7/32".to_string()),
            availability_zone: Some("ap-southeast-2a".to_string()),
            ..ProvisionConfig::default()
        };
        let mut provisioner = Provisioner::new(&mock, &config).unwrap();
        let subnet = provisioner
            .create_subnet("vpc-1", "10.1.1.0/24", "public subnet")
            .await
            .unwrap();

        assert_eq!(subnet.id, "subnet-1");
        assert_eq!(provisioner.report().created[0].name, "public subnet");
    }
}
