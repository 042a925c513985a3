use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::{InstanceDescription, InstanceState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Which bounded wait is running.
pub enum WaitStage {
    /// Waiting for the bid to be filled with an instance.
    Assignment,
    /// Waiting for the instance to run and get an address.
    Readiness,
}

impl WaitStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assignment => "assignment",
            Self::Readiness => "readiness",
        }
    }

    /// Human-readable banner used by console progress.
    pub fn banner(&self) -> &'static str {
        match self {
            Self::Assignment => "waiting for instance to be created",
            Self::Readiness => "waiting for instance to initialize",
        }
    }
}

impl std::fmt::Display for WaitStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Last-observed snapshot of a provisioned instance.
///
/// The provider is authoritative; this is only a cache refreshed by re-querying it.
pub struct InstanceHandle {
    /// Bid that produced the instance, when known.
    pub request_id: Option<String>,
    pub instance_id: String,
    pub state: InstanceState,
    pub public_address: Option<String>,
    /// When the snapshot was taken.
    pub observed_at: DateTime<Utc>,
}

impl InstanceHandle {
    /// A handle for an instance that has not been described yet.
    pub fn unobserved(request_id: Option<String>, instance_id: impl Into<String>) -> Self {
        Self {
            request_id,
            instance_id: instance_id.into(),
            state: InstanceState::Unknown,
            public_address: None,
            observed_at: Utc::now(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == InstanceState::Running
    }

    /// Replaces the snapshot with what the provider reports, including a missing address.
    pub fn observe(&mut self, description: InstanceDescription) {
        self.state = description.state;
        self.public_address = description.public_address;
        self.observed_at = Utc::now();
    }
}
