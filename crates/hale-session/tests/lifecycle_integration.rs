//! Integration tests for the lifecycle engine as a wired system:
//! bus -> broadcaster -> trackers -> registry, the way the composition
//! root assembles it.
//!
//! Tests CAN use `.unwrap()` and `.expect()` - this is allowed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use hale_client::ReachabilityProbe;
use hale_core::{ConversationId, TrackerConfig};
use hale_session::{
    ActivityBroadcaster, ActivityTracker, ConnectionRegistry, RegistryEvent, TrackerEvent,
    UiEvent, UiEventBus,
};

// ============================================================================
// Test Helpers
// ============================================================================

struct SwitchProbe {
    reachable: AtomicBool,
}

impl SwitchProbe {
    fn new(reachable: bool) -> Arc<Self> {
        Arc::new(Self {
            reachable: AtomicBool::new(reachable),
        })
    }

    fn set(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReachabilityProbe for SwitchProbe {
    async fn probe(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}

struct Harness {
    bus: UiEventBus,
    broadcaster: ActivityBroadcaster,
    registry: ConnectionRegistry,
}

impl Harness {
    fn new() -> Self {
        let bus = UiEventBus::new();
        Self {
            broadcaster: ActivityBroadcaster::new(bus.clone()),
            registry: ConnectionRegistry::new(),
            bus,
        }
    }

    fn tracker(
        &self,
        id: &str,
        probe: Arc<dyn ReachabilityProbe>,
        config: TrackerConfig,
    ) -> (ActivityTracker, mpsc::UnboundedReceiver<TrackerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let tracker = ActivityTracker::new(
            ConversationId::new(id),
            config,
            probe,
            self.registry.clone(),
            self.broadcaster.clone(),
            tx,
        );
        (tracker, rx)
    }
}

fn minute_config(label: &str) -> TrackerConfig {
    TrackerConfig {
        timeout: Duration::from_secs(60),
        check_interval: Duration::from_secs(15),
        poll_interval: Duration::from_secs(30),
        service_label: label.into(),
        ..TrackerConfig::default()
    }
}

async fn settle() {
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;
}

// ============================================================================
// Inactivity scenarios
// ============================================================================

#[tokio::test(start_paused = true)]
async fn timeout_fires_once_without_activity() {
    let harness = Harness::new();
    let (tracker, mut events) = harness.tracker(
        "conv-idle",
        SwitchProbe::new(true),
        minute_config("analytics"),
    );
    tracker.start_inactivity_timer();
    settle().await;

    tokio::time::advance(Duration::from_secs(61)).await;
    settle().await;

    assert_eq!(events.try_recv().ok(), Some(TrackerEvent::InactivityTimeout));

    tokio::time::advance(Duration::from_secs(600)).await;
    settle().await;
    assert!(events.try_recv().is_err(), "timeout must fire exactly once");

    tracker.cleanup();
}

#[tokio::test(start_paused = true)]
async fn bus_activity_keeps_conversation_alive() {
    let harness = Harness::new();
    let (tracker, mut events) = harness.tracker(
        "conv-active",
        SwitchProbe::new(true),
        minute_config("analytics"),
    );
    tracker.start_inactivity_timer();

    // Keystrokes every 30 seconds for five minutes against a 60s threshold.
    for _ in 0..10 {
        tokio::time::advance(Duration::from_secs(30)).await;
        harness.bus.emit(UiEvent::KeyPress);
        settle().await;
    }

    assert!(events.try_recv().is_err(), "activity must suppress timeout");
    tracker.cleanup();
}

#[tokio::test(start_paused = true)]
async fn hidden_page_pauses_and_resume_resets_clock() {
    let harness = Harness::new();
    let (tracker, mut events) = harness.tracker(
        "conv-hidden",
        SwitchProbe::new(true),
        minute_config("analytics"),
    );
    tracker.start_inactivity_timer();

    harness.bus.emit(UiEvent::PageHidden);
    settle().await;
    assert!(tracker.is_paused());

    // The threshold passes three times over while hidden.
    tokio::time::advance(Duration::from_secs(180)).await;
    settle().await;
    assert!(events.try_recv().is_err());

    harness.bus.emit(UiEvent::PageVisible);
    settle().await;
    assert!(!tracker.is_paused());

    // No immediate fire on resume: the clock restarted.
    tokio::time::advance(Duration::from_secs(15)).await;
    settle().await;
    assert!(events.try_recv().is_err());

    tracker.cleanup();
}

// ============================================================================
// Broadcaster listener lifecycle
// ============================================================================

#[tokio::test]
async fn listener_attaches_once_and_detaches_last() {
    let harness = Harness::new();

    assert!(!harness.broadcaster.has_listener());

    let (a, _a_events) = harness.tracker(
        "conv-a",
        SwitchProbe::new(true),
        minute_config("analytics"),
    );
    assert!(harness.broadcaster.has_listener());

    let (b, _b_events) = harness.tracker(
        "conv-b",
        SwitchProbe::new(true),
        minute_config("health-tracker"),
    );
    tokio::task::yield_now().await;
    // One shared subscription for both trackers.
    assert_eq!(harness.bus.subscriber_count(), 1);

    a.cleanup();
    assert!(harness.broadcaster.has_listener());
    assert_eq!(harness.broadcaster.tracker_count(), 1);

    b.cleanup();
    assert!(!harness.broadcaster.has_listener());
    assert_eq!(harness.broadcaster.tracker_count(), 0);
}

// ============================================================================
// Connection health across components
// ============================================================================

#[tokio::test]
async fn outage_and_recovery_flow_through_registry() {
    let harness = Harness::new();
    let probe = SwitchProbe::new(false);
    let (tracker, mut events) = harness.tracker(
        "conv-conn",
        probe.clone(),
        minute_config("analytics"),
    );
    let mut registry_events = harness.registry.subscribe();

    // Manual retry observes the outage.
    assert!(!tracker.retry_connection().await);
    assert_eq!(
        events.try_recv().ok(),
        Some(TrackerEvent::ConnectionChanged { connected: false })
    );
    assert!(!harness.registry.is_connected());

    // Registry published retrying edges and the status change.
    let mut saw_status_down = false;
    let mut saw_retrying_true = false;
    let mut saw_retrying_false = false;
    while let Ok(event) = registry_events.try_recv() {
        match event {
            RegistryEvent::StatusChanged { connected: false, .. } => saw_status_down = true,
            RegistryEvent::RetryStateChanged { retrying: true } => saw_retrying_true = true,
            RegistryEvent::RetryStateChanged { retrying: false } => saw_retrying_false = true,
            _ => {}
        }
    }
    assert!(saw_status_down);
    assert!(saw_retrying_true);
    assert!(saw_retrying_false);
    assert!(!harness.registry.is_retrying(), "retrying must settle false");

    // Recovery via opportunistic reprobe on activity.
    probe.set(true);
    tracker.record_activity();
    tokio::task::yield_now().await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(
        events.try_recv().ok(),
        Some(TrackerEvent::ConnectionChanged { connected: true })
    );
    assert!(harness.registry.is_connected());

    tracker.cleanup();
}

#[tokio::test]
async fn two_trackers_share_aggregate_state() {
    let harness = Harness::new();
    let analytics_probe = SwitchProbe::new(false);
    let tracker_probe = SwitchProbe::new(true);

    let (a, _a_events) = harness.tracker(
        "conv-analytics",
        analytics_probe.clone(),
        minute_config("analytics"),
    );
    let (b, _b_events) = harness.tracker(
        "conv-tracker",
        tracker_probe,
        minute_config("health-tracker"),
    );

    a.retry_connection().await;
    b.retry_connection().await;

    // One failed service keeps the aggregate down.
    let snapshot = harness.registry.snapshot();
    assert!(!snapshot.connected);
    assert_eq!(snapshot.failed_services.len(), 1);
    assert_eq!(snapshot.failed_services[0].as_str(), "analytics");
    assert_eq!(snapshot.known_services.len(), 2);

    // The failing tracker recovers; aggregate follows.
    analytics_probe.set(true);
    a.retry_connection().await;
    assert!(harness.registry.is_connected());

    // Cleanup removes services from the registry.
    a.cleanup();
    b.cleanup();
    assert!(harness.registry.snapshot().known_services.is_empty());
}

#[tokio::test]
async fn cleanup_is_idempotent_under_inflight_work() {
    let harness = Harness::new();
    let probe = SwitchProbe::new(false);
    let (tracker, mut events) = harness.tracker(
        "conv-teardown",
        probe.clone(),
        minute_config("analytics"),
    );
    tracker.start_inactivity_timer();
    tracker.start_periodic_connection_checks(Some(Duration::from_millis(50)));

    tracker.retry_connection().await;
    let _ = events.try_recv();

    // Queue a late probe, then tear down twice.
    probe.set(true);
    tracker.record_activity();
    tracker.cleanup();
    tracker.cleanup();

    tokio::time::sleep(Duration::from_millis(30)).await;

    // The late probe result was dropped, nothing resurrects.
    assert!(!tracker.is_connected());
    assert!(events.try_recv().is_err());
    assert_eq!(harness.broadcaster.tracker_count(), 0);
    assert!(!harness.broadcaster.has_listener());
}
