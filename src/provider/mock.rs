//! Scripted provider for tests.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::client::SpotProvider;
use super::error::{ProviderError, ProviderResult};
use super::types::{BidRequest, BidStatus, InstanceDescription, InstanceState};

#[derive(Debug, Clone, PartialEq, Eq)]
/// One call that reached the provider.
pub enum ProviderCall {
    SubmitBid { dry_run: bool },
    DescribeBid { request_id: String, dry_run: bool },
    DescribeInstance { instance_id: String },
    CancelBids { request_ids: Vec<String>, dry_run: bool },
    TerminateInstances { instance_ids: Vec<String>, dry_run: bool },
}

impl ProviderCall {
    /// Returns `true` for calls that change remote state unless dry-run.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Self::SubmitBid { .. } | Self::CancelBids { .. } | Self::TerminateInstances { .. }
        )
    }

    /// Returns `true` for mutating calls made without the dry-run flag.
    pub fn is_effective_mutation(&self) -> bool {
        match self {
            Self::SubmitBid { dry_run }
            | Self::CancelBids { dry_run, .. }
            | Self::TerminateInstances { dry_run, .. } => !dry_run,
            _ => false,
        }
    }
}

/// Replays queued responses; the last one sticks once the queue drains.
struct Script<T> {
    queue: VecDeque<T>,
}

impl<T: Clone + Default> Script<T> {
    fn new(items: Vec<T>) -> Self {
        Self {
            queue: items.into(),
        }
    }

    fn next(&mut self) -> T {
        if self.queue.len() > 1 {
            self.queue.pop_front().unwrap_or_default()
        } else {
            self.queue.front().cloned().unwrap_or_default()
        }
    }
}

#[derive(Default)]
struct Failures {
    submit: Option<String>,
    describe_bid: Option<String>,
    describe_instance: Option<String>,
    cancel: Option<String>,
    terminate: Option<String>,
}

/// Provider double with scripted responses and a call log.
pub struct MockProvider {
    request_id: String,
    bids: Mutex<Script<BidStatus>>,
    instances: Mutex<Script<InstanceDescription>>,
    failures: Failures,
    calls: Mutex<Vec<ProviderCall>>,
}

impl MockProvider {
    /// Creates a provider that hands out `request_id` and never assigns an instance.
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            bids: Mutex::new(Script::new(Vec::new())),
            instances: Mutex::new(Script::new(Vec::new())),
            failures: Failures::default(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queues `describe_bid` answers.
    pub fn bid_responses(self, responses: Vec<BidStatus>) -> Self {
        *self.bids.lock() = Script::new(responses);
        self
    }

    /// Queues `describe_instance` answers.
    pub fn instance_responses(self, responses: Vec<InstanceDescription>) -> Self {
        *self.instances.lock() = Script::new(responses);
        self
    }

    /// `describe_bid` reports no assignment `unassigned_polls` times, then `instance_id`.
    pub fn assign_after(self, unassigned_polls: usize, instance_id: &str) -> Self {
        let mut responses = vec![BidStatus::unassigned(); unassigned_polls];
        responses.push(BidStatus::assigned(instance_id));
        self.bid_responses(responses)
    }

    /// `describe_instance` reports pending `pending_polls` times, then running at `address`.
    pub fn running_after(self, pending_polls: usize, address: Option<&str>) -> Self {
        let mut responses =
            vec![InstanceDescription::new(InstanceState::Pending, None); pending_polls];
        responses.push(InstanceDescription::new(
            InstanceState::Running,
            address.map(str::to_string),
        ));
        self.instance_responses(responses)
    }

    pub fn fail_submit(mut self, message: &str) -> Self {
        self.failures.submit = Some(message.to_string());
        self
    }

    pub fn fail_describe_bid(mut self, message: &str) -> Self {
        self.failures.describe_bid = Some(message.to_string());
        self
    }

    pub fn fail_describe_instance(mut self, message: &str) -> Self {
        self.failures.describe_instance = Some(message.to_string());
        self
    }

    pub fn fail_cancel(mut self, message: &str) -> Self {
        self.failures.cancel = Some(message.to_string());
        self
    }

    pub fn fail_terminate(mut self, message: &str) -> Self {
        self.failures.terminate = Some(message.to_string());
        self
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.calls.lock().clone()
    }

    /// Number of `describe_bid` calls.
    pub fn describe_bid_count(&self) -> usize {
        self.count(|c| matches!(c, ProviderCall::DescribeBid { .. }))
    }

    /// Number of `describe_instance` calls.
    pub fn describe_instance_count(&self) -> usize {
        self.count(|c| matches!(c, ProviderCall::DescribeInstance { .. }))
    }

    /// Cancel/terminate calls, in order.
    pub fn cleanup_calls(&self) -> Vec<ProviderCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| {
                matches!(
                    c,
                    ProviderCall::CancelBids { .. } | ProviderCall::TerminateInstances { .. }
                )
            })
            .cloned()
            .collect()
    }

    /// Mutating calls made without the dry-run flag.
    pub fn effective_mutations(&self) -> usize {
        self.count(ProviderCall::is_effective_mutation)
    }

    fn count(&self, pred: impl Fn(&ProviderCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: ProviderCall) {
        self.calls.lock().push(call);
    }

    fn check(failure: &Option<String>) -> ProviderResult<()> {
        match failure {
            Some(message) => Err(ProviderError::Simulated(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SpotProvider for MockProvider {
    async fn submit_bid(&self, _bid: &BidRequest, dry_run: bool) -> ProviderResult<String> {
        self.record(ProviderCall::SubmitBid { dry_run });
        Self::check(&self.failures.submit)?;
        Ok(self.request_id.clone())
    }

    async fn describe_bid(&self, request_id: &str, dry_run: bool) -> ProviderResult<BidStatus> {
        self.record(ProviderCall::DescribeBid {
            request_id: request_id.to_string(),
            dry_run,
        });
        Self::check(&self.failures.describe_bid)?;
        Ok(self.bids.lock().next())
    }

    async fn describe_instance(&self, instance_id: &str) -> ProviderResult<InstanceDescription> {
        self.record(ProviderCall::DescribeInstance {
            instance_id: instance_id.to_string(),
        });
        Self::check(&self.failures.describe_instance)?;
        Ok(self.instances.lock().next())
    }

    async fn cancel_bids(&self, request_ids: &[String], dry_run: bool) -> ProviderResult<()> {
        if request_ids.is_empty() {
            return Ok(());
        }
        self.record(ProviderCall::CancelBids {
            request_ids: request_ids.to_vec(),
            dry_run,
        });
        Self::check(&self.failures.cancel)
    }

    async fn terminate_instances(
        &self,
        instance_ids: &[String],
        dry_run: bool,
    ) -> ProviderResult<()> {
        if instance_ids.is_empty() {
            return Ok(());
        }
        self.record(ProviderCall::TerminateInstances {
            instance_ids: instance_ids.to_vec(),
            dry_run,
        });
        Self::check(&self.failures.terminate)
    }
}
