//! Configuration module for Tiernet
//!
//! Handles loading configuration from multiple sources:
//! - Default values
//! - A configuration file (explicit path, `TIERNET_CONFIG`, or a standard location)
//! - Environment variables
//! - Command-line arguments (applied by the CLI)

use crate::cidr::Ipv4Cidr;
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use crate::wait::WaitPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Everything a provisioning run needs to know.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProvisionConfig {
    /// Provider region
    pub region: String,

    /// Address block of the network
    #[serde(alias = "vpc_cidr")]
    pub vpc_cidr: String,

    /// Address block of the public subnet
    #[serde(alias = "public_cidr")]
    pub public_cidr: String,

    /// Address block of the private subnet
    #[serde(alias = "private_cidr")]
    pub private_cidr: String,

    /// Machine image of both instances
    pub image: String,

    /// Instance size of both instances
    #[serde(alias = "instance_type")]
    pub instance_type: String,

    /// Pre-existing key pair
    #[serde(alias = "key_name")]
    pub key_name: String,

    /// Operator range allowed to reach the jump box. Required.
    #[serde(alias = "allowed_source_cidr")]
    pub allowed_source_cidr: Option<String>,

    /// Zone for both subnets; provider picks when unset
    #[serde(alias = "availability_zone")]
    pub availability_zone: Option<String>,

    /// Look resources up by name before creating them
    #[serde(alias = "reuse_existing")]
    pub reuse_existing: bool,

    /// Name tags of every resource
    pub names: ResourceNames,

    /// Extra tags applied to every resource
    pub tags: BTreeMap<String, String>,

    /// Polling settings
    pub wait: WaitSettings,

    /// Retry settings for transient provider errors
    pub retry: RetrySettings,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            region: "ap-southeast-2".to_string(),
            vpc_cidr: "10.1.0.0/16".to_string(),
            public_cidr: "10.1.1.0/24".to_string(),
            private_cidr: "10.1.2.0/24".to_string(),
            image: "ami-06202e06492f46177".to_string(),
            instance_type: "t2.micro".to_string(),
            key_name: "mgmt".to_string(),
            allowed_source_cidr: None,
            availability_zone: None,
            reuse_existing: false,
            names: ResourceNames::default(),
            tags: BTreeMap::new(),
            wait: WaitSettings::default(),
            retry: RetrySettings::default(),
        }
    }
}

/// Name tags (and group descriptions) of the provisioned resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResourceNames {
    pub network: String,
    pub internet_gateway: String,
    pub public_route_table: String,
    pub private_route_table: String,
    pub public_subnet: String,
    pub private_subnet: String,
    pub jump_address: String,
    pub nat_address: String,
    pub nat_gateway: String,
    pub public_group: String,
    pub public_group_description: String,
    pub private_group: String,
    pub private_group_description: String,
    pub public_instance: String,
    pub private_instance: String,
}

impl Default for ResourceNames {
    fn default() -> Self {
        Self {
            network: "vpc_test".to_string(),
            internet_gateway: "internet gateway".to_string(),
            public_route_table: "public route table".to_string(),
            private_route_table: "private route table".to_string(),
            public_subnet: "public subnet".to_string(),
            private_subnet: "private subnet".to_string(),
            jump_address: "Jump box address".to_string(),
            nat_address: "NAT address".to_string(),
            nat_gateway: "NAT gateway".to_string(),
            public_group: "Jump_box".to_string(),
            public_group_description: "jump box sec group".to_string(),
            private_group: "App".to_string(),
            private_group_description: "app sec group".to_string(),
            public_instance: "Jump box".to_string(),
            private_instance: "App".to_string(),
        }
    }
}

/// Poll interval and per-resource timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WaitSettings {
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub network_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub nat_gateway_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub instance_timeout: Duration,
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            network_timeout: Duration::from_secs(5 * 60),
            nat_gateway_timeout: Duration::from_secs(10 * 60),
            instance_timeout: Duration::from_secs(10 * 60),
        }
    }
}

impl WaitSettings {
    pub fn network(&self) -> WaitPolicy {
        WaitPolicy::new(self.poll_interval, self.network_timeout)
    }

    pub fn nat_gateway(&self) -> WaitPolicy {
        WaitPolicy::new(self.poll_interval, self.nat_gateway_timeout)
    }

    pub fn instance(&self) -> WaitPolicy {
        WaitPolicy::new(self.poll_interval, self.instance_timeout)
    }
}

/// Retry settings for throttled or unavailable provider calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetrySettings {
    pub max_retries: u32,
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(20),
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.initial_delay, self.max_delay)
    }
}

impl ProvisionConfig {
    /// Load configuration from all sources
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut config = match Self::find_config_file(config_path)? {
            Some(path) => {
                debug!("Loading configuration from {}", path.display());
                Self::from_file(&path)?
            }
            None => Self::default(),
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Pick the configuration file to read, if any.
    fn find_config_file(explicit_path: Option<&Path>) -> Result<Option<PathBuf>> {
        // Explicit path takes priority and must exist
        if let Some(path) = explicit_path {
            if !path.exists() {
                return Err(Error::ConfigLoad {
                    path: path.to_path_buf(),
                    message: "file does not exist".to_string(),
                });
            }
            return Ok(Some(path.to_path_buf()));
        }

        Ok(Self::get_config_paths().into_iter().find(|p| p.exists()))
    }

    /// Standard locations, most specific first
    fn get_config_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Ok(env_config) = std::env::var("TIERNET_CONFIG") {
            paths.push(PathBuf::from(env_config));
        }

        // Project config (current directory)
        paths.push(PathBuf::from("tiernet.toml"));
        paths.push(PathBuf::from("tiernet.yaml"));
        paths.push(PathBuf::from("tiernet.yml"));
        paths.push(PathBuf::from("tiernet.json"));

        // User config
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".tiernet/config.toml"));
            paths.push(home.join(".tiernet/config.yaml"));
        }

        paths
    }

    /// Load from a specific file; format is chosen by extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| Error::ConfigLoad {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        Self::parse(&content, path.extension().and_then(|e| e.to_str()))
            .map_err(|message| Error::ConfigLoad {
                path: path.to_path_buf(),
                message,
            })
    }

    /// Parse configuration text of the given format.
    pub fn parse(content: &str, extension: Option<&str>) -> std::result::Result<Self, String> {
        match extension.unwrap_or("") {
            "yml" | "yaml" => serde_yaml::from_str(content).map_err(|e| e.to_string()),
            "json" => serde_json::from_str(content).map_err(|e| e.to_string()),
            "toml" => toml::from_str(content).map_err(|e| e.to_string()),
            // Try TOML first, then YAML
            _ => toml::from_str(content).or_else(|toml_err| {
                serde_yaml::from_str(content).map_err(|yaml_err| {
                    format!("not TOML ({}) nor YAML ({})", toml_err, yaml_err)
                })
            }),
        }
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |target: &mut String, key: &str| {
            if let Some(value) = lookup(key) {
                *target = value;
            }
        };

        set(&mut self.region, "TIERNET_REGION");
        set(&mut self.vpc_cidr, "TIERNET_VPC_CIDR");
        set(&mut self.public_cidr, "TIERNET_PUBLIC_CIDR");
        set(&mut self.private_cidr, "TIERNET_PRIVATE_CIDR");
        set(&mut self.image, "TIERNET_IMAGE");
        set(&mut self.instance_type, "TIERNET_INSTANCE_TYPE");
        set(&mut self.key_name, "TIERNET_KEY_NAME");

        if let Some(cidr) = lookup("TIERNET_ALLOWED_SOURCE_CIDR") {
            self.allowed_source_cidr = Some(cidr);
        }

        if let Some(zone) = lookup("TIERNET_AVAILABILITY_ZONE") {
            self.availability_zone = Some(zone);
        }

        if let Some(reuse) = lookup("TIERNET_REUSE_EXISTING") {
            self.reuse_existing = matches!(
                reuse.to_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
    }

    /// The operator range, or an error if none was configured.
    pub fn allowed_source_cidr(&self) -> Result<&str> {
        self.allowed_source_cidr.as_deref().ok_or_else(|| {
            Error::config(
                "allowedSourceCidr is required (the operator range allowed to reach the jump box)",
            )
        })
    }

    /// Check the topology layout and the wait bounds.
    pub fn validate(&self) -> Result<()> {
        let parse = |field: &str, value: &str| -> Result<Ipv4Cidr> {
            value
                .parse::<Ipv4Cidr>()
                .map_err(|e| Error::config(format!("{}: {}", field, e)))
        };

        let vpc = parse("vpcCidr", &self.vpc_cidr)?;
        let public = parse("publicCidr", &self.public_cidr)?;
        let private = parse("privateCidr", &self.private_cidr)?;
        let source = parse("allowedSourceCidr", self.allowed_source_cidr()?)?;

        if !vpc.contains(&public) {
            return Err(Error::config(format!(
                "publicCidr {} is not inside vpcCidr {}",
                public, vpc
            )));
        }
        if !vpc.contains(&private) {
            return Err(Error::config(format!(
                "privateCidr {} is not inside vpcCidr {}",
                private, vpc
            )));
        }
        if public.overlaps(&private) {
            return Err(Error::config(format!(
                "publicCidr {} and privateCidr {} overlap",
                public, private
            )));
        }
        if source.is_any() {
            warn!("allowedSourceCidr is {}: the jump box accepts SSH from anywhere", source);
        }

        for (field, value) in [
            ("region", &self.region),
            ("image", &self.image),
            ("instanceType", &self.instance_type),
            ("keyName", &self.key_name),
        ] {
            if value.trim().is_empty() {
                return Err(Error::config(format!("{} must not be empty", field)));
            }
        }

        let wait = &self.wait;
        if wait.poll_interval.is_zero() {
            return Err(Error::config("wait.pollInterval must be greater than zero"));
        }
        for (field, timeout) in [
            ("wait.networkTimeout", wait.network_timeout),
            ("wait.natGatewayTimeout", wait.nat_gateway_timeout),
            ("wait.instanceTimeout", wait.instance_timeout),
        ] {
            if timeout < wait.poll_interval {
                return Err(Error::config(format!(
                    "{} ({:?}) is shorter than wait.pollInterval ({:?})",
                    field, timeout, wait.poll_interval
                )));
            }
        }

        Ok(())
    }
}
