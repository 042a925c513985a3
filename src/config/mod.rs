//! Environment-backed configuration for the `spotwait` binary.
//!
//! Everything has a default. Override with `SPOTWAIT_*` environment variables.

pub mod error;


pub use error::ConfigError;

use std::env;

use crate::provider::{BidRequest, LaunchSpec, VolumeSpec};

/// Default bid price per instance-hour.
pub const DEFAULT_BID_PRICE: &str = "3.5";
/// Default machine image (CUDA-ready).
pub const DEFAULT_IMAGE_ID: &str = "ami-79cd0e3d";
/// Default key pair name.
pub const DEFAULT_KEY_NAME: &str = "cuda";
/// Default security groups.
pub const DEFAULT_SECURITY_GROUPS: &[&str] = &["ui-access", "ssh"];
/// Default instance size class.
pub const DEFAULT_INSTANCE_TYPE: &str = "g2.2xlarge";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Which provisioning client to talk to.
pub enum ProviderKind {
    #[default]
    /// EC2 through the `aws` CLI.
    Aws,
    /// In-memory simulation.
    Simulated,
}

impl std::str::FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "aws" | "ec2" => Ok(Self::Aws),
            "simulated" | "local" => Ok(Self::Simulated),
            _ => Err(ConfigError::UnknownProvider {
                value: s.to_string(),
            }),
        }
    }
}

/// What to provision and where.
#[derive(Debug, Clone)]
pub struct Config {
    /// Provisioning client. Default: `aws`.
    pub provider: ProviderKind,

    /// Region passed to the provider, if any.
    pub region: Option<String>,

    /// Bid price as a decimal string. Default: `3.5`.
    pub bid_price: String,

    /// Instances per bid. Default: `1`.
    pub instance_count: u32,

    pub image_id: String,
    pub key_name: String,
    pub security_groups: Vec<String>,
    pub instance_type: String,

    /// Size of an extra root volume in GiB. Unset means the image default.
    pub root_volume_gib: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            region: None,
            bid_price: DEFAULT_BID_PRICE.to_string(),
            instance_count: 1,
            image_id: DEFAULT_IMAGE_ID.to_string(),
            key_name: DEFAULT_KEY_NAME.to_string(),
            security_groups: DEFAULT_SECURITY_GROUPS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            instance_type: DEFAULT_INSTANCE_TYPE.to_string(),
            root_volume_gib: None,
        }
    }
}

impl Config {
    const ENV_PROVIDER: &'static str = "SPOTWAIT_PROVIDER";
    const ENV_REGION: &'static str = "SPOTWAIT_REGION";
    const ENV_BID_PRICE: &'static str = "SPOTWAIT_BID_PRICE";
    const ENV_INSTANCE_COUNT: &'static str = "SPOTWAIT_INSTANCE_COUNT";
    const ENV_IMAGE_ID: &'static str = "SPOTWAIT_IMAGE_ID";
    const ENV_KEY_NAME: &'static str = "SPOTWAIT_KEY_NAME";
    const ENV_SECURITY_GROUPS: &'static str = "SPOTWAIT_SECURITY_GROUPS";
    const ENV_INSTANCE_TYPE: &'static str = "SPOTWAIT_INSTANCE_TYPE";
    const ENV_ROOT_VOLUME_GIB: &'static str = "SPOTWAIT_ROOT_VOLUME_GIB";

    /// Loads configuration from environment variables (falling back to defaults).
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let provider = match Self::parse_optional_string_from_env(Self::ENV_PROVIDER) {
            Some(value) => value.parse()?,
            None => defaults.provider,
        };
        let region = Self::parse_optional_string_from_env(Self::ENV_REGION);
        let bid_price = Self::parse_string_from_env(Self::ENV_BID_PRICE, defaults.bid_price);
        let instance_count =
            Self::parse_number_from_env(Self::ENV_INSTANCE_COUNT, defaults.instance_count)?;
        let image_id = Self::parse_string_from_env(Self::ENV_IMAGE_ID, defaults.image_id);
        let key_name = Self::parse_string_from_env(Self::ENV_KEY_NAME, defaults.key_name);
        let security_groups = Self::parse_optional_string_from_env(Self::ENV_SECURITY_GROUPS)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or(defaults.security_groups);
        let instance_type =
            Self::parse_string_from_env(Self::ENV_INSTANCE_TYPE, defaults.instance_type);
        let root_volume_gib = match Self::parse_optional_string_from_env(Self::ENV_ROOT_VOLUME_GIB)
        {
            Some(value) => Some(value.parse().map_err(|e| ConfigError::InvalidNumber {
                name: Self::ENV_ROOT_VOLUME_GIB,
                value,
                source: e,
            })?),
            None => None,
        };

        Ok(Self {
            provider,
            region,
            bid_price,
            instance_count,
            image_id,
            key_name,
            security_groups,
            instance_type,
            root_volume_gib,
        })
    }

    /// Checks values the provider would otherwise reject after a round trip.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.bid_price.parse::<f64>() {
            Ok(price) if price > 0.0 && price.is_finite() => {}
            _ => {
                return Err(ConfigError::InvalidPrice {
                    value: self.bid_price.clone(),
                });
            }
        }

        if self.instance_count == 0 {
            return Err(ConfigError::ZeroInstanceCount);
        }

        if self.image_id.trim().is_empty() {
            return Err(ConfigError::Empty {
                name: Self::ENV_IMAGE_ID,
            });
        }
        if self.instance_type.trim().is_empty() {
            return Err(ConfigError::Empty {
                name: Self::ENV_INSTANCE_TYPE,
            });
        }

        Ok(())
    }

    /// Builds the launch specification described by this config.
    pub fn launch_spec(&self) -> LaunchSpec {
        let spec = LaunchSpec::new(self.image_id.clone(), self.instance_type.clone())
            .key_name(self.key_name.clone())
            .security_groups(self.security_groups.iter().cloned());
        match self.root_volume_gib {
            Some(size) => spec.volume(VolumeSpec::new("/dev/sda1", size)),
            None => spec,
        }
    }

    /// Builds the bid described by this config.
    pub fn bid_request(&self) -> BidRequest {
        BidRequest::new(
            self.bid_price.clone(),
            self.instance_count,
            self.launch_spec(),
        )
    }

    fn parse_string_from_env(var_name: &str, default: String) -> String {
        Self::parse_optional_string_from_env(var_name).unwrap_or(default)
    }

    fn parse_optional_string_from_env(var_name: &str) -> Option<String> {
        env::var(var_name)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse_number_from_env(name: &'static str, default: u32) -> Result<u32, ConfigError> {
        match Self::parse_optional_string_from_env(name) {
            Some(value) => value.parse().map_err(|e| ConfigError::InvalidNumber {
                name,
                value,
                source: e,
            }),
            None => Ok(default),
        }
    }
}
