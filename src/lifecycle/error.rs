use thiserror::Error;

use super::types::{InstanceHandle, WaitStage};
use crate::provider::ProviderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Compensating step that was attempted after a failure.
pub enum CleanupAction {
    /// Cancelling the outstanding bid.
    CancelBid,
    /// Re-reading the bid to find an instance assigned despite the failure.
    ResolveInstance,
    /// Terminating the instance found on the bid.
    TerminateInstance,
}

impl std::fmt::Display for CleanupAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::CancelBid => "cancel bid",
            Self::ResolveInstance => "resolve assigned instance",
            Self::TerminateInstance => "terminate instance",
        })
    }
}

#[derive(Debug, Error)]
#[error("{action} {id} failed: {source}")]
/// A compensating step that itself failed.
pub struct CleanupFailure {
    pub action: CleanupAction,
    /// Bid or instance id the step targeted.
    pub id: String,
    #[source]
    pub source: ProviderError,
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("spot bid submission failed: {source}")]
    SubmissionFailed {
        #[source]
        source: ProviderError,
    },

    #[error(
        "timed out after {polls} polls waiting for bid {request_id} to be assigned an instance; \
         the request may still be filled and may need to be cancelled manually"
    )]
    AssignmentTimeout { request_id: String, polls: u32 },

    #[error(
        "timed out after {polls} polls waiting for instance {} to become reachable \
         (last state: {}); the instance has NOT been terminated",
        .handle.instance_id,
        .handle.state
    )]
    ReadinessTimeout { handle: InstanceHandle, polls: u32 },

    #[error("instance {instance_id} was terminated by the provider before it became reachable")]
    InstanceTerminated { instance_id: String },

    #[error("failed to describe {resource} {id}: {source}")]
    DescribeFailed {
        /// `"bid request"` or `"instance"`.
        resource: &'static str,
        id: String,
        #[source]
        source: ProviderError,
    },

    #[error("cancelled during {stage} wait")]
    Cancelled { stage: WaitStage },

    #[error("{primary}; cleanup also failed: {}", describe_failures(.failures))]
    CleanupFailed {
        primary: Box<ProvisionError>,
        failures: Vec<CleanupFailure>,
    },

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

fn describe_failures(failures: &[CleanupFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ProvisionError {
    /// The failure that started it all, looking through [`ProvisionError::CleanupFailed`].
    pub fn primary(&self) -> &ProvisionError {
        match self {
            Self::CleanupFailed { primary, .. } => primary.primary(),
            other => other,
        }
    }

    /// Compensating steps that failed (empty unless cleanup failed).
    pub fn cleanup_failures(&self) -> &[CleanupFailure] {
        match self {
            Self::CleanupFailed { failures, .. } => failures,
            _ => &[],
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self.primary(),
            Self::AssignmentTimeout { .. } | Self::ReadinessTimeout { .. }
        )
    }

    /// Instance deliberately left running by a readiness timeout.
    pub fn instance_left_running(&self) -> Option<&InstanceHandle> {
        match self.primary() {
            Self::ReadinessTimeout { handle, .. } => Some(handle),
            _ => None,
        }
    }
}

pub type ProvisionResult<T> = Result<T, ProvisionError>;
