//! In-memory provider that plays out a bid → instance → running lifecycle without a cloud account.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use super::client::SpotProvider;
use super::error::{ProviderError, ProviderResult};
use super::types::{BidRequest, BidStatus, InstanceDescription, InstanceState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Timing of the simulated lifecycle, counted in describe calls.
pub struct SimulationProfile {
    /// `describe_bid` calls before an instance is assigned.
    pub assign_after_polls: u32,
    /// `describe_instance` calls before the instance reports running.
    pub running_after_polls: u32,
    /// Extra `describe_instance` calls after running before an address appears.
    pub address_lag_polls: u32,
}

impl Default for SimulationProfile {
    fn default() -> Self {
        Self {
            assign_after_polls: 3,
            running_after_polls: 3,
            address_lag_polls: 1,
        }
    }
}

#[derive(Debug)]
struct SimBid {
    polls: u32,
    instance_id: Option<String>,
    cancelled: bool,
    dry_run: bool,
}

#[derive(Debug)]
struct SimInstance {
    polls: u32,
    state: InstanceState,
    address: Option<String>,
    host: u8,
    dry_run: bool,
}

#[derive(Debug, Default)]
struct SimState {
    bids: HashMap<String, SimBid>,
    instances: HashMap<String, SimInstance>,
    next_host: u8,
}

/// Simulated spot market.
///
/// Dry-run submissions follow the same lifecycle but are kept apart from live state:
/// [`active_bids`](Self::active_bids) and [`live_instances`](Self::live_instances) ignore them,
/// and dry-run cancel/terminate only validate their ids.
pub struct SimulatedProvider {
    profile: SimulationProfile,
    state: Mutex<SimState>,
}

impl SimulatedProvider {
    pub fn new(profile: SimulationProfile) -> Self {
        Self {
            profile,
            state: Mutex::new(SimState::default()),
        }
    }

    /// Bids that were submitted for real and not cancelled.
    pub fn active_bids(&self) -> usize {
        self.state
            .lock()
            .bids
            .values()
            .filter(|b| !b.dry_run && !b.cancelled)
            .count()
    }

    /// Real instances that have not been terminated.
    pub fn live_instances(&self) -> usize {
        self.state
            .lock()
            .instances
            .values()
            .filter(|i| !i.dry_run && i.state != InstanceState::Terminated)
            .count()
    }

    fn short_id(prefix: &str) -> String {
        let id = Uuid::new_v4().simple().to_string();
        format!("{prefix}-{}", &id[..12])
    }
}

impl Default for SimulatedProvider {
    fn default() -> Self {
        Self::new(SimulationProfile::default())
    }
}

#[async_trait]
impl SpotProvider for SimulatedProvider {
    async fn submit_bid(&self, bid: &BidRequest, dry_run: bool) -> ProviderResult<String> {
        if bid.instance_count == 0 {
            return Err(ProviderError::Simulated(
                "instance count must be at least 1".to_string(),
            ));
        }
        let request_id = Self::short_id("sir");
        self.state.lock().bids.insert(
            request_id.clone(),
            SimBid {
                polls: 0,
                instance_id: None,
                cancelled: false,
                dry_run,
            },
        );
        Ok(request_id)
    }

    async fn describe_bid(&self, request_id: &str, _dry_run: bool) -> ProviderResult<BidStatus> {
        let mut state = self.state.lock();
        let SimState {
            bids,
            instances,
            next_host,
        } = &mut *state;

        let bid = bids
            .get_mut(request_id)
            .ok_or_else(|| ProviderError::NotFound {
                kind: "bid request",
                id: request_id.to_string(),
            })?;
        bid.polls += 1;

        let due = bid.polls >= self.profile.assign_after_polls;
        if bid.instance_id.is_none() && !bid.cancelled && due {
            let instance_id = Self::short_id("i");
            *next_host = next_host.wrapping_add(1);
            instances.insert(
                instance_id.clone(),
                SimInstance {
                    polls: 0,
                    state: InstanceState::Pending,
                    address: None,
                    host: *next_host,
                    dry_run: bid.dry_run,
                },
            );
            bid.instance_id = Some(instance_id);
        }

        Ok(BidStatus {
            assigned_instance_id: bid.instance_id.clone(),
        })
    }

    async fn describe_instance(&self, instance_id: &str) -> ProviderResult<InstanceDescription> {
        let mut state = self.state.lock();
        let instance =
            state
                .instances
                .get_mut(instance_id)
                .ok_or_else(|| ProviderError::NotFound {
                    kind: "instance",
                    id: instance_id.to_string(),
                })?;
        instance.polls += 1;

        if instance.state == InstanceState::Pending
            && instance.polls >= self.profile.running_after_polls
        {
            instance.state = InstanceState::Running;
        }
        if instance.state == InstanceState::Running
            && instance.address.is_none()
            && instance.polls >= self.profile.running_after_polls + self.profile.address_lag_polls
        {
            instance.address = Some(format!("203.0.113.{}", instance.host));
        }

        Ok(InstanceDescription::new(
            instance.state,
            instance.address.clone(),
        ))
    }

    async fn cancel_bids(&self, request_ids: &[String], dry_run: bool) -> ProviderResult<()> {
        let mut state = self.state.lock();
        if let Some(missing) = request_ids.iter().find(|id| !state.bids.contains_key(*id)) {
            return Err(ProviderError::NotFound {
                kind: "bid request",
                id: missing.clone(),
            });
        }
        if dry_run {
            return Ok(());
        }
        for id in request_ids {
            if let Some(bid) = state.bids.get_mut(id) {
                bid.cancelled = true;
            }
        }
        Ok(())
    }

    async fn terminate_instances(
        &self,
        instance_ids: &[String],
        dry_run: bool,
    ) -> ProviderResult<()> {
        let mut state = self.state.lock();
        if let Some(missing) = instance_ids
            .iter()
            .find(|id| !state.instances.contains_key(*id))
        {
            return Err(ProviderError::NotFound {
                kind: "instance",
                id: missing.clone(),
            });
        }
        if dry_run {
            return Ok(());
        }
        for id in instance_ids {
            if let Some(instance) = state.instances.get_mut(id) {
                instance.state = InstanceState::Terminated;
                instance.address = None;
            }
        }
        Ok(())
    }
}
