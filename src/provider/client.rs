use async_trait::async_trait;

use super::error::ProviderResult;
use super::types::{BidRequest, BidStatus, InstanceDescription};

#[async_trait]
/// Capabilities required from the remote compute provider.
///
/// Mutating calls carry the dry-run flag: with `dry_run` set the provider must validate the
/// call without changing any remote state. Empty id slices are no-ops.
pub trait SpotProvider: Send + Sync {
    /// Submits a spot bid and returns the provider-assigned request id.
    async fn submit_bid(&self, bid: &BidRequest, dry_run: bool) -> ProviderResult<String>;

    /// Reads the bid's current status.
    async fn describe_bid(&self, request_id: &str, dry_run: bool) -> ProviderResult<BidStatus>;

    /// Reads the instance's lifecycle state and public address.
    async fn describe_instance(&self, instance_id: &str) -> ProviderResult<InstanceDescription>;

    /// Cancels the given bid requests.
    async fn cancel_bids(&self, request_ids: &[String], dry_run: bool) -> ProviderResult<()>;

    /// Terminates the given instances.
    async fn terminate_instances(&self, instance_ids: &[String], dry_run: bool)
    -> ProviderResult<()>;
}
