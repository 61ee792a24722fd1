//! Per-conversation activity tracking.
//!
//! One `ActivityTracker` exists per active conversation view. It owns the
//! inactivity deadline check and the periodic connection poll for that
//! conversation, reports connectivity to the shared registry, and notifies
//! its owner through `TrackerEvent`s. Construction registers the tracker
//! with the broadcaster and registry; `cleanup()` reverses both.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use hale_client::ReachabilityProbe;
use hale_core::{ConversationId, ServiceLabel, TrackerConfig};

use crate::broadcaster::ActivityBroadcaster;
use crate::events::ScrollRegion;
use crate::registry::ConnectionRegistry;

// ============================================================================
// Events
// ============================================================================

/// Notifications a tracker sends its owning conversation view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerEvent {
    /// The inactivity threshold elapsed. Sent at most once per
    /// `start_inactivity_timer` call.
    InactivityTimeout,

    /// Cached reachability changed. Sent on observed transitions only.
    ConnectionChanged { connected: bool },
}

// ============================================================================
// Tracker
// ============================================================================

struct TrackerInner {
    id: ConversationId,
    config: TrackerConfig,
    probe: Arc<dyn ReachabilityProbe>,
    registry: ConnectionRegistry,
    broadcaster: ActivityBroadcaster,
    events: mpsc::UnboundedSender<TrackerEvent>,

    last_activity: Mutex<Instant>,
    paused: AtomicBool,
    connected: AtomicBool,
    inactivity_running: AtomicBool,
    polling_running: AtomicBool,
    cleaned_up: AtomicBool,

    /// Cancels every task this tracker owns.
    cancel: CancellationToken,

    /// Element-scoped scroll listeners, keyed by region id.
    element_listeners: Mutex<HashMap<String, CancellationToken>>,
}

/// Cheap-to-clone handle to one conversation's tracker.
#[derive(Clone)]
pub struct ActivityTracker {
    inner: Arc<TrackerInner>,
}

impl ActivityTracker {
    /// Creates a tracker and registers it with the broadcaster and the
    /// registry. Timers are not started; call `start_inactivity_timer` and
    /// `start_periodic_connection_checks` explicitly.
    pub fn new(
        id: ConversationId,
        config: TrackerConfig,
        probe: Arc<dyn ReachabilityProbe>,
        registry: ConnectionRegistry,
        broadcaster: ActivityBroadcaster,
        events: mpsc::UnboundedSender<TrackerEvent>,
    ) -> Self {
        registry.register_service(&config.service_label);

        let tracker = Self {
            inner: Arc::new(TrackerInner {
                id,
                config,
                probe,
                registry,
                broadcaster: broadcaster.clone(),
                events,
                last_activity: Mutex::new(Instant::now()),
                paused: AtomicBool::new(false),
                connected: AtomicBool::new(true),
                inactivity_running: AtomicBool::new(false),
                polling_running: AtomicBool::new(false),
                cleaned_up: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                element_listeners: Mutex::new(HashMap::new()),
            }),
        };

        broadcaster.register_tracker(tracker.clone());
        info!(conversation = %tracker.inner.id, "Tracker created");
        tracker
    }

    /// The conversation this tracker belongs to.
    pub fn id(&self) -> &ConversationId {
        &self.inner.id
    }

    /// The label this tracker reports under.
    pub fn service_label(&self) -> &ServiceLabel {
        &self.inner.config.service_label
    }

    /// Whether the broadcaster should pause this tracker while the page is
    /// hidden or unfocused.
    pub fn pause_on_hidden(&self) -> bool {
        self.inner.config.pause_on_hidden
    }

    /// Cached result of the most recent probe.
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    // ========================================================================
    // Activity
    // ========================================================================

    /// Records user activity now.
    ///
    /// When the cached state is disconnected, also kicks off one
    /// opportunistic re-probe; its continuation re-checks cancellation
    /// before touching shared state, so a probe resolving after `cleanup`
    /// cannot resurrect a torn-down tracker.
    pub fn record_activity(&self) {
        if let Ok(mut last) = self.inner.last_activity.lock() {
            *last = Instant::now();
        }

        if !self.inner.connected.load(Ordering::SeqCst) && !self.inner.cancel.is_cancelled() {
            let tracker = self.clone();
            tokio::spawn(async move {
                let reachable = tracker.inner.probe.probe().await;
                if tracker.inner.cancel.is_cancelled() {
                    debug!(conversation = %tracker.inner.id, "Dropping late probe result");
                    return;
                }
                tracker.apply_probe_result(reachable);
            });
        }
    }

    /// Starts the recurring inactivity check.
    ///
    /// Fires `TrackerEvent::InactivityTimeout` exactly once when
    /// `now - last_activity` reaches the threshold, then stops; call again
    /// to monitor a new conversation. Checks are no-ops while paused, and
    /// starting an already-running timer is a no-op.
    pub fn start_inactivity_timer(&self) {
        if self.inner.inactivity_running.swap(true, Ordering::SeqCst) {
            debug!(conversation = %self.inner.id, "Inactivity timer already running");
            return;
        }

        let tracker = self.clone();
        tokio::spawn(async move {
            let mut tick = interval(tracker.inner.config.check_interval);
            // First tick completes immediately; skip it so a fresh timer
            // never fires on stale state.
            tick.tick().await;

            loop {
                tokio::select! {
                    biased;

                    _ = tracker.inner.cancel.cancelled() => {
                        debug!(conversation = %tracker.inner.id, "Inactivity timer cancelled");
                        break;
                    }

                    _ = tick.tick() => {
                        if tracker.inner.paused.load(Ordering::SeqCst) {
                            continue;
                        }
                        let elapsed = tracker
                            .inner
                            .last_activity
                            .lock()
                            .map(|last| last.elapsed())
                            .unwrap_or(Duration::ZERO);
                        if elapsed >= tracker.inner.config.timeout {
                            info!(
                                conversation = %tracker.inner.id,
                                idle_secs = elapsed.as_secs(),
                                "Inactivity timeout reached"
                            );
                            let _ = tracker.inner.events.send(TrackerEvent::InactivityTimeout);
                            break;
                        }
                    }
                }
            }

            tracker.inner.inactivity_running.store(false, Ordering::SeqCst);
        });
    }

    /// Suppresses inactivity checks. The timer keeps ticking; ticks are
    /// ignored until resumed.
    pub fn pause_inactivity_timer(&self) {
        if !self.inner.paused.swap(true, Ordering::SeqCst) {
            debug!(conversation = %self.inner.id, "Inactivity checks paused");
        }
    }

    /// Resumes inactivity checks.
    ///
    /// Resets the activity clock, so a pause that outlasted the threshold
    /// can never fire an immediate timeout on resume.
    pub fn resume_inactivity_timer(&self) {
        if self.inner.paused.swap(false, Ordering::SeqCst) {
            if let Ok(mut last) = self.inner.last_activity.lock() {
                *last = Instant::now();
            }
            debug!(conversation = %self.inner.id, "Inactivity checks resumed");
        }
    }

    // ========================================================================
    // Connection health
    // ========================================================================

    /// Runs one probe and returns the result. Does not touch cached state,
    /// the registry, or events.
    pub async fn check_connection(&self) -> bool {
        self.inner.probe.probe().await
    }

    /// Manual retry: probes once while holding the registry's retry guard.
    ///
    /// The guard keeps `retrying` true for exactly the lifetime of the
    /// probe, releasing on every exit path including cancellation, and the
    /// result funnels through the same state path the periodic poll uses.
    pub async fn retry_connection(&self) -> bool {
        let _guard = self.inner.registry.begin_retry();
        debug!(conversation = %self.inner.id, "Manual connection retry");

        let reachable = self.inner.probe.probe().await;
        if !self.inner.cancel.is_cancelled() {
            self.apply_probe_result(reachable);
        }
        reachable
    }

    /// Starts the recurring connection poll. Runs until cleanup; starting
    /// an already-running poll is a no-op. Overlap with manual retries is
    /// tolerated: whichever probe resolves last wins, and unchanged results
    /// are silent.
    pub fn start_periodic_connection_checks(&self, poll_interval: Option<Duration>) {
        if self.inner.polling_running.swap(true, Ordering::SeqCst) {
            debug!(conversation = %self.inner.id, "Connection poll already running");
            return;
        }

        let every = poll_interval.unwrap_or(self.inner.config.poll_interval);
        let tracker = self.clone();
        tokio::spawn(async move {
            let mut tick = interval(every);
            tick.tick().await;

            loop {
                tokio::select! {
                    biased;

                    _ = tracker.inner.cancel.cancelled() => {
                        debug!(conversation = %tracker.inner.id, "Connection poll cancelled");
                        break;
                    }

                    _ = tick.tick() => {
                        let reachable = tracker.inner.probe.probe().await;
                        if tracker.inner.cancel.is_cancelled() {
                            break;
                        }
                        tracker.apply_probe_result(reachable);
                    }
                }
            }

            tracker.inner.polling_running.store(false, Ordering::SeqCst);
        });
    }

    /// Single mutation path for probe results. Updates the cache, the
    /// registry, and the owner on observed change only.
    fn apply_probe_result(&self, reachable: bool) {
        let previous = self.inner.connected.swap(reachable, Ordering::SeqCst);
        if previous == reachable {
            return;
        }

        self.inner
            .registry
            .set_status(&self.inner.config.service_label, reachable);

        if reachable {
            info!(conversation = %self.inner.id, "Connection restored");
        } else {
            warn!(conversation = %self.inner.id, "Connection lost");
        }

        let _ = self
            .inner
            .events
            .send(TrackerEvent::ConnectionChanged { connected: reachable });
    }

    // ========================================================================
    // Element listeners
    // ========================================================================

    /// Attaches a scroll listener scoped to one region. Idempotent per
    /// region id: attaching twice keeps a single listener.
    pub fn attach_element_listener(&self, region: &ScrollRegion) {
        let Ok(mut listeners) = self.inner.element_listeners.lock() else {
            return;
        };
        if listeners.contains_key(region.id()) {
            debug!(
                conversation = %self.inner.id,
                region = region.id(),
                "Element listener already attached"
            );
            return;
        }

        let token = self.inner.cancel.child_token();
        listeners.insert(region.id().to_string(), token.clone());

        let tracker = self.clone();
        let mut rx = region.subscribe();
        let region_id = region.id().to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    result = rx.recv() => match result {
                        Ok(()) => tracker.record_activity(),
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            debug!(conversation = %tracker.inner.id, region = %region_id, "Element listener detached");
        });
    }

    /// Detaches the scroll listener for one region, if attached.
    pub fn remove_element_listener(&self, region_id: &str) {
        if let Ok(mut listeners) = self.inner.element_listeners.lock() {
            if let Some(token) = listeners.remove(region_id) {
                token.cancel();
            }
        }
    }

    /// Number of attached element listeners (used by tests).
    pub fn element_listener_count(&self) -> usize {
        self.inner
            .element_listeners
            .lock()
            .map(|l| l.len())
            .unwrap_or(0)
    }

    // ========================================================================
    // Cleanup
    // ========================================================================

    /// Tears the tracker down: stops every owned task, unregisters from the
    /// broadcaster and the registry, and detaches element listeners.
    /// Idempotent - later calls are no-ops.
    pub fn cleanup(&self) {
        if self.inner.cleaned_up.swap(true, Ordering::SeqCst) {
            return;
        }

        self.inner.cancel.cancel();
        self.inner.broadcaster.unregister_tracker(&self.inner.id);
        self.inner
            .registry
            .remove_service(&self.inner.config.service_label);

        if let Ok(mut listeners) = self.inner.element_listeners.lock() {
            for (_, token) in listeners.drain() {
                token.cancel();
            }
        }

        info!(conversation = %self.inner.id, "Tracker cleaned up");
    }
}
