use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::clock::{Clock, TokioClock};
use super::config::{CoordinatorConfig, PROGRESS_EVERY_POLLS};
use super::error::{CleanupAction, CleanupFailure, ProvisionError, ProvisionResult};
use super::progress::{ProgressEvent, ProgressSink, TracingProgress};
use super::types::{InstanceHandle, WaitStage};
use crate::config::ConfigError;
use crate::provider::{BidRequest, InstanceState, SpotProvider};

/// Drives one spot provisioning attempt: submit → assignment → readiness → ready, with
/// compensating cleanup on failure.
///
/// The coordinator keeps no per-attempt state, so several attempts may share one coordinator;
/// each attempt only ever cleans up its own bid and instance ids.
pub struct LifecycleCoordinator {
    config: CoordinatorConfig,
    provider: Arc<dyn SpotProvider>,
    clock: Arc<dyn Clock>,
    progress: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
}

impl LifecycleCoordinator {
    /// Creates a coordinator on real time with `tracing` progress.
    pub fn new(
        config: CoordinatorConfig,
        provider: Arc<dyn SpotProvider>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            provider,
            clock: Arc::new(TokioClock::new()),
            progress: Arc::new(TracingProgress),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Cancelling `token` aborts any wait in progress with [`ProvisionError::Cancelled`].
    /// Remote side effects (a booting instance) are not undone by cancellation alone.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Polls the bid until the provider assigns it an instance.
    ///
    /// On [`ProvisionError::AssignmentTimeout`] the bid may still be filled later; cancelling
    /// it is the caller's responsibility.
    #[instrument(skip(self), fields(max_polls = self.config.max_polls()))]
    pub async fn await_instance_assignment(&self, request_id: &str) -> ProvisionResult<String> {
        let mut budget = PollBudget::start(self, WaitStage::Assignment, request_id);
        let result = self.poll_assignment(&mut budget, request_id).await;
        budget.finish();
        result
    }

    async fn poll_assignment(
        &self,
        budget: &mut PollBudget<'_>,
        request_id: &str,
    ) -> ProvisionResult<String> {
        let stage = WaitStage::Assignment;

        while !budget.exhausted() {
            budget.before_poll()?;
            let status = self
                .cancellable(
                    stage,
                    self.provider.describe_bid(request_id, self.config.dry_run()),
                )
                .await?
                .map_err(|source| ProvisionError::DescribeFailed {
                    resource: "bid request",
                    id: request_id.to_string(),
                    source,
                })?;
            budget.after_poll();

            if let Some(instance_id) = status.assigned_instance_id {
                debug!(polls = budget.polls, %instance_id, "Bid assigned");
                return Ok(instance_id);
            }

            budget.pause().await?;
        }

        warn!(
            polls = budget.polls,
            "Timed out waiting for instance to be created; the bid may still be filled and may \
             need to be cancelled manually"
        );
        Err(ProvisionError::AssignmentTimeout {
            request_id: request_id.to_string(),
            polls: budget.polls,
        })
    }

    /// Polls the instance until it is running with a public address.
    ///
    /// If the budget runs out while the instance is running and an address was reported
    /// earlier in the wait, the instance is treated as ready with that address. Otherwise
    /// [`ProvisionError::ReadinessTimeout`] is returned and the instance is left running.
    pub async fn await_network_ready(&self, instance_id: &str) -> ProvisionResult<InstanceHandle> {
        self.wait_ready(None, instance_id).await
    }

    #[instrument(skip(self, request_id), fields(max_polls = self.config.max_polls()))]
    async fn wait_ready(
        &self,
        request_id: Option<&str>,
        instance_id: &str,
    ) -> ProvisionResult<InstanceHandle> {
        let mut budget = PollBudget::start(self, WaitStage::Readiness, instance_id);
        let handle = InstanceHandle::unobserved(request_id.map(str::to_string), instance_id);
        let result = self.poll_readiness(&mut budget, handle).await;
        budget.finish();
        result
    }

    async fn poll_readiness(
        &self,
        budget: &mut PollBudget<'_>,
        mut handle: InstanceHandle,
    ) -> ProvisionResult<InstanceHandle> {
        let stage = WaitStage::Readiness;
        let mut address_seen: Option<String> = None;

        while !budget.exhausted() {
            budget.before_poll()?;
            let description = self
                .cancellable(stage, self.provider.describe_instance(&handle.instance_id))
                .await?
                .map_err(|source| ProvisionError::DescribeFailed {
                    resource: "instance",
                    id: handle.instance_id.clone(),
                    source,
                })?;
            budget.after_poll();
            handle.observe(description);
            if handle.public_address.is_some() {
                address_seen.clone_from(&handle.public_address);
            }

            match handle.state {
                InstanceState::Terminated => {
                    warn!("Instance terminated before becoming reachable");
                    return Err(ProvisionError::InstanceTerminated {
                        instance_id: handle.instance_id,
                    });
                }
                InstanceState::Running if handle.public_address.is_some() => {
                    debug!(polls = budget.polls, "Instance running");
                    return Ok(handle);
                }
                _ => {}
            }

            budget.pause().await?;
        }

        if handle.is_running() && address_seen.is_some() {
            warn!(
                address = address_seen.as_deref().unwrap_or("-"),
                "Readiness bound reached on a running instance with an address already \
                 reported; treating as ready"
            );
            handle.public_address = address_seen;
            return Ok(handle);
        }

        warn!(
            state = %handle.state,
            "Timed out waiting for instance to initialize; it may still be initializing and has \
             NOT been terminated"
        );
        Err(ProvisionError::ReadinessTimeout {
            handle,
            polls: budget.polls,
        })
    }

    /// Provisions one instance. See [`provision_instance_with`](Self::provision_instance_with).
    pub async fn provision_instance(&self, bid: &BidRequest) -> ProvisionResult<InstanceHandle> {
        self.provision_instance_with(bid, |_| {}).await
    }

    /// Submits `bid`, waits for assignment and readiness, then calls `on_ready` once with the
    /// ready handle before returning it.
    ///
    /// Once a bid exists, any failure other than [`ProvisionError::ReadinessTimeout`] triggers
    /// a best-effort cleanup: cancel the bid, re-read it, and terminate the instance it
    /// resolved to. If a cleanup step fails the result is [`ProvisionError::CleanupFailed`]
    /// wrapping the original cause. A readiness timeout leaves the instance running for the
    /// caller.
    #[instrument(
        skip_all,
        fields(price = %bid.price, count = bid.instance_count, dry_run = self.config.dry_run())
    )]
    pub async fn provision_instance_with<F>(
        &self,
        bid: &BidRequest,
        on_ready: F,
    ) -> ProvisionResult<InstanceHandle>
    where
        F: FnOnce(&InstanceHandle) + Send,
    {
        let request_id = match self.provider.submit_bid(bid, self.config.dry_run()).await {
            Ok(request_id) => request_id,
            Err(source) => {
                // No request id exists, so there is nothing to compensate.
                warn!(error = %source, "Spot bid submission failed");
                return Err(ProvisionError::SubmissionFailed { source });
            }
        };
        info!(%request_id, "Spot bid submitted");

        let outcome = async {
            let instance_id = self.await_instance_assignment(&request_id).await?;
            info!(%request_id, %instance_id, "Instance created");
            self.wait_ready(Some(&request_id), &instance_id).await
        }
        .await;

        match outcome {
            Ok(handle) => {
                info!(
                    instance_id = %handle.instance_id,
                    address = handle.public_address.as_deref().unwrap_or("-"),
                    "Instance ready"
                );
                on_ready(&handle);
                Ok(handle)
            }
            Err(err @ ProvisionError::ReadinessTimeout { .. }) => Err(err),
            Err(err) => Err(self.compensate(&request_id, err).await),
        }
    }

    /// Cancels bids. Empty input is a no-op; failures are returned as-is.
    pub async fn cancel_requests(&self, request_ids: &[String]) -> ProvisionResult<()> {
        let ids = dedup_ids(request_ids);
        if ids.is_empty() {
            return Ok(());
        }
        info!(count = ids.len(), "Cancelling spot bids");
        self.provider
            .cancel_bids(&ids, self.config.dry_run())
            .await
            .map_err(ProvisionError::from)
    }

    /// Terminates instances. Empty input is a no-op; failures are returned as-is.
    pub async fn terminate_instances(&self, instance_ids: &[String]) -> ProvisionResult<()> {
        let ids = dedup_ids(instance_ids);
        if ids.is_empty() {
            return Ok(());
        }
        info!(count = ids.len(), "Terminating instances");
        self.provider
            .terminate_instances(&ids, self.config.dry_run())
            .await
            .map_err(ProvisionError::from)
    }

    /// Tears down a provisioned instance: cancels its bid, then terminates it.
    pub async fn release(&self, handle: &InstanceHandle) -> ProvisionResult<()> {
        if let Some(request_id) = &handle.request_id {
            self.cancel_requests(std::slice::from_ref(request_id))
                .await?;
        }
        self.terminate_instances(std::slice::from_ref(&handle.instance_id))
            .await
    }

    /// Re-reads the instance and updates the snapshot.
    pub async fn refresh(&self, handle: &mut InstanceHandle) -> ProvisionResult<()> {
        let description = self
            .provider
            .describe_instance(&handle.instance_id)
            .await
            .map_err(|source| ProvisionError::DescribeFailed {
                resource: "instance",
                id: handle.instance_id.clone(),
                source,
            })?;
        handle.observe(description);
        Ok(())
    }

    async fn compensate(&self, request_id: &str, primary: ProvisionError) -> ProvisionError {
        warn!(
            %request_id,
            error = %primary,
            "Provisioning failed; making final attempt to cancel the bid and terminate any \
             spawned instance"
        );

        let dry_run = self.config.dry_run();
        let mut failures = Vec::new();

        if let Err(source) = self
            .provider
            .cancel_bids(&[request_id.to_string()], dry_run)
            .await
        {
            failures.push(CleanupFailure {
                action: CleanupAction::CancelBid,
                id: request_id.to_string(),
                source,
            });
        }

        match self.provider.describe_bid(request_id, dry_run).await {
            Ok(status) => {
                if let Some(instance_id) = status.assigned_instance_id {
                    info!(%instance_id, "Terminating instance assigned to failed bid");
                    if let Err(source) = self
                        .provider
                        .terminate_instances(std::slice::from_ref(&instance_id), dry_run)
                        .await
                    {
                        failures.push(CleanupFailure {
                            action: CleanupAction::TerminateInstance,
                            id: instance_id,
                            source,
                        });
                    }
                }
            }
            Err(source) => failures.push(CleanupFailure {
                action: CleanupAction::ResolveInstance,
                id: request_id.to_string(),
                source,
            }),
        }

        if failures.is_empty() {
            primary
        } else {
            for failure in &failures {
                warn!(error = %failure, "Cleanup step failed");
            }
            ProvisionError::CleanupFailed {
                primary: Box::new(primary),
                failures,
            }
        }
    }

    async fn cancellable<T>(
        &self,
        stage: WaitStage,
        fut: impl Future<Output = T>,
    ) -> ProvisionResult<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ProvisionError::Cancelled { stage }),
            out = fut => Ok(out),
        }
    }
}

/// Iteration and wall-clock budget for one wait; whichever runs out first ends it.
struct PollBudget<'a> {
    coordinator: &'a LifecycleCoordinator,
    stage: WaitStage,
    target: &'a str,
    started: Duration,
    polls: u32,
}

impl<'a> PollBudget<'a> {
    fn start(coordinator: &'a LifecycleCoordinator, stage: WaitStage, target: &'a str) -> Self {
        Self {
            coordinator,
            stage,
            target,
            started: coordinator.clock.now(),
            polls: 0,
        }
    }

    fn exhausted(&self) -> bool {
        let config = &self.coordinator.config;
        self.polls >= config.max_polls()
            || self.coordinator.clock.now().saturating_sub(self.started) >= config.deadline()
    }

    fn before_poll(&mut self) -> ProvisionResult<()> {
        if self.coordinator.cancel.is_cancelled() {
            return Err(ProvisionError::Cancelled { stage: self.stage });
        }
        if self.coordinator.config.verbose() && self.polls % PROGRESS_EVERY_POLLS == 0 {
            self.coordinator.progress.on_progress(&ProgressEvent {
                stage: self.stage,
                poll: self.polls,
                target: self.target.to_string(),
            });
        }
        Ok(())
    }

    fn after_poll(&mut self) {
        self.polls += 1;
    }

    /// Sleeps one interval, cut short at the deadline, unless the budget is already spent.
    async fn pause(&mut self) -> ProvisionResult<()> {
        if self.exhausted() {
            return Ok(());
        }
        let config = &self.coordinator.config;
        let elapsed = self.coordinator.clock.now().saturating_sub(self.started);
        let nap = config
            .poll_interval()
            .min(config.deadline().saturating_sub(elapsed));
        self.coordinator
            .cancellable(self.stage, self.coordinator.clock.sleep(nap))
            .await
    }

    fn finish(&self) {
        if self.coordinator.config.verbose() {
            self.coordinator.progress.on_wait_finished(self.stage);
        }
    }
}

fn dedup_ids(ids: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    ids.iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}
