use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Block device attached at launch.
pub struct VolumeSpec {
    /// Device name as seen by the instance (e.g. `/dev/sda1`).
    pub device_name: String,
    /// Size in GiB.
    pub size_gib: u32,
    /// Delete the volume when the instance terminates.
    pub delete_on_termination: bool,
    /// Provider volume class (e.g. `gp3`).
    pub volume_type: String,
    /// Encrypt the volume at rest.
    pub encrypted: bool,
}

impl VolumeSpec {
    /// Creates a `gp3` volume that is deleted with the instance and left unencrypted.
    pub fn new(device_name: impl Into<String>, size_gib: u32) -> Self {
        Self {
            device_name: device_name.into(),
            size_gib,
            delete_on_termination: true,
            volume_type: "gp3".to_string(),
            encrypted: false,
        }
    }

    /// Sets the volume class.
    pub fn volume_type(mut self, volume_type: impl Into<String>) -> Self {
        self.volume_type = volume_type.into();
        self
    }

    /// Sets the encryption flag.
    pub fn encrypted(mut self, encrypted: bool) -> Self {
        self.encrypted = encrypted;
        self
    }

    /// Sets the delete-on-termination flag.
    pub fn delete_on_termination(mut self, delete: bool) -> Self {
        self.delete_on_termination = delete;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
/// What kind of instance to launch once the bid is filled.
pub struct LaunchSpec {
    /// Machine image reference.
    pub image_id: String,
    /// Key pair used for SSH access.
    pub key_name: String,
    /// Security group names.
    pub security_groups: Vec<String>,
    /// Instance size class (e.g. `g2.2xlarge`).
    pub instance_type: String,
    /// Volumes attached at launch.
    pub volumes: Vec<VolumeSpec>,
}

impl LaunchSpec {
    pub fn new(image_id: impl Into<String>, instance_type: impl Into<String>) -> Self {
        Self {
            image_id: image_id.into(),
            instance_type: instance_type.into(),
            ..Default::default()
        }
    }

    pub fn key_name(mut self, key_name: impl Into<String>) -> Self {
        self.key_name = key_name.into();
        self
    }

    pub fn security_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.security_groups = groups.into_iter().map(Into::into).collect();
        self
    }

    pub fn volume(mut self, volume: VolumeSpec) -> Self {
        self.volumes.push(volume);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A spot bid as submitted to the provider. Immutable once submitted.
pub struct BidRequest {
    /// Maximum unit price, as the provider's decimal string (e.g. `"3.5"`).
    pub price: String,
    /// Number of instances requested.
    pub instance_count: u32,
    pub launch_spec: LaunchSpec,
}

impl BidRequest {
    pub fn new(price: impl Into<String>, instance_count: u32, launch_spec: LaunchSpec) -> Self {
        Self {
            price: price.into(),
            instance_count,
            launch_spec,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
/// Last-observed state of a bid request.
pub struct BidStatus {
    /// Instance the provider assigned to the bid, once it has been filled.
    pub assigned_instance_id: Option<String>,
}

impl BidStatus {
    pub fn unassigned() -> Self {
        Self::default()
    }

    pub fn assigned(instance_id: impl Into<String>) -> Self {
        Self {
            assigned_instance_id: Some(instance_id.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// Provider-reported phase of an instance.
pub enum InstanceState {
    Pending,
    Running,
    Terminated,
    #[default]
    Unknown,
}

impl InstanceState {
    /// Maps a provider state name; `shutting-down` counts as terminated.
    pub fn from_provider_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "shutting-down" | "terminated" => Self::Terminated,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Terminated => "terminated",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
/// Snapshot returned by `describe_instance`.
pub struct InstanceDescription {
    pub state: InstanceState,
    /// Assigned asynchronously; may be absent even while running.
    pub public_address: Option<String>,
}

impl InstanceDescription {
    pub fn new(state: InstanceState, public_address: Option<String>) -> Self {
        Self {
            state,
            public_address,
        }
    }
}
