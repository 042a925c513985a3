use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serial_test::serial;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::config::ConfigError;
use crate::provider::{
    InstanceDescription, InstanceState, MockProvider, ProviderCall, ProviderError,
};

fn coordinator_with(
    provider: Arc<MockProvider>,
    config: CoordinatorConfig,
) -> (LifecycleCoordinator, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let coordinator = LifecycleCoordinator::new(config, provider)
        .unwrap()
        .with_clock(clock.clone());
    (coordinator, clock)
}

fn coordinator(
    provider: Arc<MockProvider>,
    max_polls: u32,
) -> (LifecycleCoordinator, Arc<ManualClock>) {
    coordinator_with(provider, CoordinatorConfig::new(false, max_polls, false))
}

/// Sleeps forever; only cancellation gets a wait out of it.
struct StalledClock;

#[async_trait]
impl Clock for StalledClock {
    fn now(&self) -> Duration {
        Duration::ZERO
    }

    async fn sleep(&self, _duration: Duration) {
        std::future::pending::<()>().await
    }
}

#[tokio::test]
async fn test_assignment_after_unassigned_polls() {
    let provider = Arc::new(MockProvider::new("r-1").assign_after(2, "i-1"));
    let (coordinator, clock) = coordinator(provider.clone(), 10);

    let instance_id = coordinator.await_instance_assignment("r-1").await.unwrap();

    assert_eq!(instance_id, "i-1");
    assert_eq!(provider.describe_bid_count(), 3);
    assert_eq!(clock.sleep_count(), 2);
    assert!(clock.sleeps().iter().all(|d| *d == DEFAULT_POLL_INTERVAL));
}

#[tokio::test]
async fn test_zero_timeout_fails_before_polling() {
    let provider = Arc::new(MockProvider::new("r-1").assign_after(0, "i-1"));
    let (coordinator, clock) = coordinator(provider.clone(), 0);

    let err = coordinator
        .await_instance_assignment("r-1")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProvisionError::AssignmentTimeout { polls: 0, .. }
    ));

    let err = coordinator.await_network_ready("i-1").await.unwrap_err();
    let handle = err.instance_left_running().unwrap();
    assert_eq!(handle.state, InstanceState::Unknown);
    assert!(handle.public_address.is_none());

    assert!(provider.calls().is_empty());
    assert_eq!(clock.sleep_count(), 0);
}

#[tokio::test]
async fn test_assignment_timeout_counts_polls() {
    let provider = Arc::new(MockProvider::new("r-1"));
    let (coordinator, clock) = coordinator(provider.clone(), 5);

    let err = coordinator
        .await_instance_assignment("r-1")
        .await
        .unwrap_err();

    match &err {
        ProvisionError::AssignmentTimeout { request_id, polls } => {
            assert_eq!(request_id, "r-1");
            assert_eq!(*polls, 5);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.is_timeout());
    assert!(err.to_string().contains("cancelled manually"));
    assert_eq!(provider.describe_bid_count(), 5);
    // No sleep after the final poll.
    assert_eq!(clock.sleep_count(), 4);
}

#[tokio::test]
async fn test_readiness_waits_for_running_with_address() {
    let provider = Arc::new(MockProvider::new("r-1").running_after(2, Some("1.2.3.4")));
    let (coordinator, _clock) = coordinator(provider.clone(), 10);

    let handle = coordinator.await_network_ready("i-1").await.unwrap();

    assert_eq!(handle.instance_id, "i-1");
    assert!(handle.is_running());
    assert_eq!(handle.public_address.as_deref(), Some("1.2.3.4"));
    assert!(handle.request_id.is_none());
    assert_eq!(provider.describe_instance_count(), 3);
}

#[tokio::test]
async fn test_readiness_keeps_polling_until_address_appears() {
    let provider = Arc::new(MockProvider::new("r-1").instance_responses(vec![
        InstanceDescription::new(InstanceState::Running, None),
        InstanceDescription::new(InstanceState::Running, None),
        InstanceDescription::new(InstanceState::Running, Some("9.9.9.9".to_string())),
    ]));
    let (coordinator, _clock) = coordinator(provider.clone(), 10);

    let handle = coordinator.await_network_ready("i-1").await.unwrap();

    assert_eq!(handle.public_address.as_deref(), Some("9.9.9.9"));
    assert_eq!(provider.describe_instance_count(), 3);
}

#[tokio::test]
async fn test_readiness_timeout_without_address_leaves_instance() {
    let provider = Arc::new(
        MockProvider::new("r-1")
            .instance_responses(vec![InstanceDescription::new(InstanceState::Running, None)]),
    );
    let (coordinator, _clock) = coordinator(provider.clone(), 5);

    let err = coordinator.await_network_ready("i-1").await.unwrap_err();

    match &err {
        ProvisionError::ReadinessTimeout { handle, polls } => {
            assert_eq!(*polls, 5);
            assert!(handle.is_running());
            assert!(handle.public_address.is_none());
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.to_string().contains("NOT been terminated"));
    assert!(provider.cleanup_calls().is_empty());
}

#[tokio::test]
async fn test_readiness_timeout_with_address_but_not_running() {
    let provider = Arc::new(MockProvider::new("r-1").instance_responses(vec![
        InstanceDescription::new(InstanceState::Pending, Some("5.6.7.8".to_string())),
    ]));
    let (coordinator, _clock) = coordinator(provider.clone(), 3);

    let err = coordinator.await_network_ready("i-1").await.unwrap_err();

    match err {
        ProvisionError::ReadinessTimeout { handle, polls } => {
            assert_eq!(polls, 3);
            assert_eq!(handle.state, InstanceState::Pending);
            assert_eq!(handle.public_address.as_deref(), Some("5.6.7.8"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(provider.describe_instance_count(), 3);
}

#[tokio::test]
async fn test_readiness_bound_on_running_instance_uses_earlier_address() {
    let provider = Arc::new(MockProvider::new("r-1").instance_responses(vec![
        InstanceDescription::new(InstanceState::Pending, Some("5.6.7.8".to_string())),
        InstanceDescription::new(InstanceState::Running, None),
    ]));
    let (coordinator, _clock) = coordinator(provider.clone(), 3);

    let handle = coordinator.await_network_ready("i-1").await.unwrap();

    assert!(handle.is_running());
    assert_eq!(handle.public_address.as_deref(), Some("5.6.7.8"));
    assert_eq!(provider.describe_instance_count(), 3);
}

#[tokio::test]
async fn test_terminated_instance_fails_fast() {
    let provider = Arc::new(MockProvider::new("r-1").instance_responses(vec![
        InstanceDescription::new(InstanceState::Pending, None),
        InstanceDescription::new(InstanceState::Terminated, None),
    ]));
    let (coordinator, _clock) = coordinator(provider.clone(), 50);

    let err = coordinator.await_network_ready("i-1").await.unwrap_err();

    assert!(matches!(
        err,
        ProvisionError::InstanceTerminated { ref instance_id } if instance_id == "i-1"
    ));
    assert_eq!(provider.describe_instance_count(), 2);
}

#[tokio::test]
async fn test_wall_clock_bound_stops_drifting_waits() {
    let provider = Arc::new(MockProvider::new("r-1"));
    let clock = Arc::new(ManualClock::with_drift(Duration::from_secs(1)));
    let coordinator =
        LifecycleCoordinator::new(CoordinatorConfig::new(false, 10, false), provider.clone())
            .unwrap()
            .with_clock(clock.clone());

    let err = coordinator
        .await_instance_assignment("r-1")
        .await
        .unwrap_err();

    // Each 1s sleep costs 2s, so the 10s deadline lands after five polls.
    assert!(matches!(
        err,
        ProvisionError::AssignmentTimeout { polls: 5, .. }
    ));
    assert_eq!(provider.describe_bid_count(), 5);
}

#[tokio::test]
async fn test_describe_failure_is_reported() {
    let provider = Arc::new(MockProvider::new("r-1").fail_describe_bid("throttled"));
    let (coordinator, clock) = coordinator(provider.clone(), 5);

    let err = coordinator
        .await_instance_assignment("r-1")
        .await
        .unwrap_err();

    match err {
        ProvisionError::DescribeFailed {
            resource,
            id,
            source: ProviderError::Simulated(message),
        } => {
            assert_eq!(resource, "bid request");
            assert_eq!(id, "r-1");
            assert_eq!(message, "throttled");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(clock.sleep_count(), 0);
}

#[tokio::test]
async fn test_progress_every_third_poll_when_verbose() {
    let provider = Arc::new(MockProvider::new("r-1"));
    let progress = Arc::new(RecordingProgress::new());
    let (coordinator, _clock) =
        coordinator_with(provider, CoordinatorConfig::new(false, 7, true));
    let coordinator = coordinator.with_progress(progress.clone());

    let _ = coordinator.await_instance_assignment("r-1").await;

    let events = progress.events();
    let polls: Vec<u32> = events.iter().map(|e| e.poll).collect();
    let dots: Vec<usize> = events.iter().map(ProgressEvent::dots).collect();
    assert_eq!(polls, vec![0, 3, 6]);
    assert_eq!(dots, vec![0, 1, 2]);
    assert!(events.iter().all(|e| e.stage == WaitStage::Assignment));
    assert!(events.iter().all(|e| e.target == "r-1"));
    assert_eq!(progress.finished(), vec![WaitStage::Assignment]);
}

#[tokio::test]
async fn test_progress_silent_when_not_verbose() {
    let provider = Arc::new(MockProvider::new("r-1"));
    let progress = Arc::new(RecordingProgress::new());
    let (coordinator, _clock) = coordinator(provider, 7);
    let coordinator = coordinator.with_progress(progress.clone());

    let _ = coordinator.await_instance_assignment("r-1").await;

    assert!(progress.events().is_empty());
    assert!(progress.finished().is_empty());
}

#[tokio::test]
async fn test_cancelled_token_stops_wait_before_polling() {
    let provider = Arc::new(MockProvider::new("r-1"));
    let token = CancellationToken::new();
    token.cancel();
    let (coordinator, _clock) = coordinator(provider.clone(), 5);
    let coordinator = coordinator.with_cancellation(token);

    let err = coordinator
        .await_instance_assignment("r-1")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ProvisionError::Cancelled {
            stage: WaitStage::Assignment
        }
    ));
    assert_eq!(provider.describe_bid_count(), 0);
}

#[tokio::test]
async fn test_cancellation_interrupts_sleep() {
    let provider = Arc::new(MockProvider::new("r-1"));
    let token = CancellationToken::new();
    let coordinator =
        LifecycleCoordinator::new(CoordinatorConfig::new(false, 100, false), provider.clone())
            .unwrap()
            .with_clock(Arc::new(StalledClock))
            .with_cancellation(token.clone());

    let (result, ()) = tokio::join!(coordinator.await_network_ready("i-1"), async {
        tokio::task::yield_now().await;
        token.cancel();
    });

    assert!(matches!(
        result,
        Err(ProvisionError::Cancelled {
            stage: WaitStage::Readiness
        })
    ));
    assert_eq!(provider.describe_instance_count(), 1);
}

#[tokio::test]
async fn test_empty_batches_are_noops() {
    let provider = Arc::new(MockProvider::new("r-1").fail_cancel("boom").fail_terminate("boom"));
    let (coordinator, _clock) = coordinator(provider.clone(), 5);

    coordinator.cancel_requests(&[]).await.unwrap();
    coordinator.terminate_instances(&[]).await.unwrap();

    assert!(provider.calls().is_empty());
}

#[tokio::test]
async fn test_batches_dedup_and_carry_dry_run() {
    let provider = Arc::new(MockProvider::new("r-1"));
    let (coordinator, _clock) =
        coordinator_with(provider.clone(), CoordinatorConfig::new(true, 5, false));

    coordinator
        .cancel_requests(&["r-1".to_string(), "r-2".to_string(), "r-1".to_string()])
        .await
        .unwrap();
    coordinator
        .terminate_instances(&["i-1".to_string()])
        .await
        .unwrap();

    assert_eq!(
        provider.calls(),
        vec![
            ProviderCall::CancelBids {
                request_ids: vec!["r-1".to_string(), "r-2".to_string()],
                dry_run: true,
            },
            ProviderCall::TerminateInstances {
                instance_ids: vec!["i-1".to_string()],
                dry_run: true,
            },
        ]
    );
    assert_eq!(provider.effective_mutations(), 0);
}

#[tokio::test]
async fn test_batch_failure_is_surfaced_without_retry() {
    let provider = Arc::new(MockProvider::new("r-1").fail_terminate("denied"));
    let (coordinator, _clock) = coordinator(provider.clone(), 5);

    let err = coordinator
        .terminate_instances(&["i-1".to_string()])
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ProvisionError::Provider(ProviderError::Simulated(_))
    ));
    assert_eq!(provider.calls().len(), 1);
}

#[tokio::test]
async fn test_release_cancels_then_terminates() {
    let provider = Arc::new(MockProvider::new("r-1"));
    let (coordinator, _clock) = coordinator(provider.clone(), 5);
    let mut handle = InstanceHandle::unobserved(Some("r-1".to_string()), "i-1");
    handle.state = InstanceState::Running;

    coordinator.release(&handle).await.unwrap();

    assert_eq!(
        provider.cleanup_calls(),
        vec![
            ProviderCall::CancelBids {
                request_ids: vec!["r-1".to_string()],
                dry_run: false,
            },
            ProviderCall::TerminateInstances {
                instance_ids: vec!["i-1".to_string()],
                dry_run: false,
            },
        ]
    );
}

#[tokio::test]
async fn test_refresh_updates_snapshot() {
    let provider = Arc::new(MockProvider::new("r-1").instance_responses(vec![
        InstanceDescription::new(InstanceState::Terminated, None),
    ]));
    let (coordinator, _clock) = coordinator(provider, 5);
    let mut handle = InstanceHandle::unobserved(None, "i-1");
    handle.state = InstanceState::Running;
    handle.public_address = Some("1.2.3.4".to_string());
    let before = handle.observed_at;

    coordinator.refresh(&mut handle).await.unwrap();

    assert_eq!(handle.state, InstanceState::Terminated);
    assert!(handle.public_address.is_none());
    assert!(handle.observed_at >= before);
}

#[test]
fn test_observe_drops_address_the_provider_no_longer_reports() {
    let mut handle = InstanceHandle::unobserved(None, "i-1");
    handle.observe(InstanceDescription::new(
        InstanceState::Running,
        Some("1.2.3.4".to_string()),
    ));
    handle.observe(InstanceDescription::new(InstanceState::Running, None));

    assert!(handle.public_address.is_none());
}

#[tokio::test]
async fn test_refresh_reflects_lost_address() {
    let provider = Arc::new(MockProvider::new("r-1").instance_responses(vec![
        InstanceDescription::new(InstanceState::Unknown, None),
    ]));
    let (coordinator, _clock) = coordinator(provider, 5);
    let mut handle = InstanceHandle::unobserved(Some("r-1".to_string()), "i-1");
    handle.state = InstanceState::Running;
    handle.public_address = Some("1.2.3.4".to_string());

    coordinator.refresh(&mut handle).await.unwrap();

    assert_eq!(handle.state, InstanceState::Unknown);
    assert!(handle.public_address.is_none());
}

#[tokio::test]
async fn test_final_sleep_is_clamped_to_deadline() {
    let provider = Arc::new(MockProvider::new("r-1"));
    let clock = Arc::new(ManualClock::with_drift(Duration::from_secs(5)));
    let config =
        CoordinatorConfig::new(false, 3, false).with_poll_interval(Duration::from_secs(4));
    let coordinator = LifecycleCoordinator::new(config, provider.clone())
        .unwrap()
        .with_clock(clock.clone());

    let err = coordinator
        .await_instance_assignment("r-1")
        .await
        .unwrap_err();

    // Deadline is 12s. The first sleep ends at 9s, leaving 3s for the second.
    assert!(matches!(
        err,
        ProvisionError::AssignmentTimeout { polls: 2, .. }
    ));
    assert_eq!(
        clock.sleeps(),
        vec![Duration::from_secs(4), Duration::from_secs(3)]
    );
}

#[test]
fn test_zero_poll_interval_rejected() {
    let config =
        CoordinatorConfig::new(false, 5, false).with_poll_interval(Duration::ZERO);
    let result = LifecycleCoordinator::new(config, Arc::new(MockProvider::new("r-1")));

    assert!(matches!(result, Err(ConfigError::ZeroPollInterval)));
}

#[test]
fn test_deadline_scales_with_budget() {
    let config =
        CoordinatorConfig::new(false, 30, false).with_poll_interval(Duration::from_millis(500));
    assert_eq!(config.deadline(), Duration::from_secs(15));
    assert_eq!(
        CoordinatorConfig::new(false, 0, false).deadline(),
        Duration::ZERO
    );
}

#[test]
#[serial]
fn test_coordinator_config_from_env() {
    // SAFETY: Test code only, we accept the thread-safety risk in tests.
    unsafe {
        std::env::set_var("SPOTWAIT_DRY_RUN", "yes");
        std::env::set_var("SPOTWAIT_POLL_TIMEOUT", "12");
        std::env::set_var("SPOTWAIT_POLL_INTERVAL_MS", "250");
        std::env::remove_var("SPOTWAIT_VERBOSE");
    }

    let config = CoordinatorConfig::from_env().expect("should parse");

    // SAFETY: Test code only, we accept the thread-safety risk in tests.
    unsafe {
        std::env::remove_var("SPOTWAIT_DRY_RUN");
        std::env::remove_var("SPOTWAIT_POLL_TIMEOUT");
        std::env::remove_var("SPOTWAIT_POLL_INTERVAL_MS");
    }

    assert!(config.dry_run());
    assert_eq!(config.max_polls(), 12);
    assert_eq!(config.poll_interval(), Duration::from_millis(250));
    assert!(!config.verbose());
}

#[test]
#[serial]
fn test_coordinator_config_rejects_bad_bool() {
    // SAFETY: Test code only, we accept the thread-safety risk in tests.
    unsafe { std::env::set_var("SPOTWAIT_VERBOSE", "loud") };

    let result = CoordinatorConfig::from_env();

    // SAFETY: Test code only, we accept the thread-safety risk in tests.
    unsafe { std::env::remove_var("SPOTWAIT_VERBOSE") };

    assert!(matches!(result, Err(ConfigError::InvalidBool { .. })));
}

#[test]
fn test_cleanup_failure_keeps_primary_cause() {
    let err = ProvisionError::CleanupFailed {
        primary: Box::new(ProvisionError::AssignmentTimeout {
            request_id: "r-1".to_string(),
            polls: 5,
        }),
        failures: vec![CleanupFailure {
            action: CleanupAction::CancelBid,
            id: "r-1".to_string(),
            source: ProviderError::Simulated("denied".to_string()),
        }],
    };

    assert!(matches!(
        err.primary(),
        ProvisionError::AssignmentTimeout { .. }
    ));
    assert!(err.is_timeout());
    assert_eq!(err.cleanup_failures().len(), 1);
    let message = err.to_string();
    assert!(message.contains("timed out after 5 polls"));
    assert!(message.contains("cancel bid r-1 failed"));
}
