//! Connection registry - aggregate connectivity state shared by all
//! trackers.
//!
//! The registry is the only cross-tracker mutable state in the engine. All
//! mutation goes through its own methods; callers never read-modify-write
//! its fields. Subscribers (status banners, the admin dashboard) receive
//! change events; unchanged reports are silent.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use hale_core::ServiceLabel;

/// Capacity of the event channel. Status transitions are rare; a lagged
/// subscriber can always resynchronize from `snapshot()`.
const EVENT_CAPACITY: usize = 64;

// ============================================================================
// Events and snapshot
// ============================================================================

/// Events published on registry state transitions.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    /// The aggregate connected flag or the failed-service set changed.
    StatusChanged {
        connected: bool,
        failed_services: Vec<ServiceLabel>,
    },

    /// A retry started while none was in flight, or the last in-flight
    /// retry settled.
    RetryStateChanged { retrying: bool },
}

/// Point-in-time view of the registry.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    /// True unless the most recent check for any service failed.
    pub connected: bool,
    /// True while any manual retry is in flight.
    pub retrying: bool,
    /// Retries initiated since construction. Monotonic.
    pub retry_count: u64,
    /// Services whose most recent check failed, sorted by label.
    pub failed_services: Vec<ServiceLabel>,
    /// Every service a tracker has registered, sorted by label.
    pub known_services: Vec<ServiceLabel>,
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Debug, Default)]
struct RegistryState {
    failed: HashSet<ServiceLabel>,
    known: HashSet<ServiceLabel>,
    retry_count: u64,
    in_flight_retries: u32,
}

struct RegistryInner {
    state: Mutex<RegistryState>,
    events: broadcast::Sender<RegistryEvent>,
}

/// Shared connectivity state. Cheap to clone; constructed once by the
/// composition root and injected into every tracker.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(RegistryInner {
                state: Mutex::new(RegistryState::default()),
                events,
            }),
        }
    }

    /// Registers a service label. Called by trackers at construction.
    pub fn register_service(&self, label: &ServiceLabel) {
        if let Ok(mut state) = self.inner.state.lock() {
            if state.known.insert(label.clone()) {
                debug!(service = %label, "Service registered");
            }
        }
    }

    /// Removes a service entirely. Called by trackers at cleanup.
    ///
    /// Dropping a failed service can flip the aggregate back to connected;
    /// that transition is published like any other.
    pub fn remove_service(&self, label: &ServiceLabel) {
        let event = {
            let Ok(mut state) = self.inner.state.lock() else {
                return;
            };
            state.known.remove(label);
            if state.failed.remove(label) {
                Some(Self::status_event(&state))
            } else {
                None
            }
        };
        if let Some(event) = event {
            debug!(service = %label, "Service removed while failed");
            let _ = self.inner.events.send(event);
        }
    }

    /// Records the most recent reachability result for a service.
    ///
    /// Returns `true` when the report changed the failed-service set.
    /// Events are published on change only, so repeated identical reports
    /// from overlapping probes are no-ops.
    pub fn set_status(&self, label: &ServiceLabel, reachable: bool) -> bool {
        let event = {
            let Ok(mut state) = self.inner.state.lock() else {
                return false;
            };
            let changed = if reachable {
                state.failed.remove(label)
            } else {
                state.failed.insert(label.clone())
            };
            if !changed {
                return false;
            }
            Self::status_event(&state)
        };

        if reachable {
            info!(service = %label, "Service reachable again");
        } else {
            warn!(service = %label, "Service unreachable");
        }
        let _ = self.inner.events.send(event);
        true
    }

    /// Begins a manual retry, incrementing the monotonic retry counter.
    ///
    /// The returned guard keeps `retrying` true until dropped; release
    /// happens in `Drop`, so early returns and cancelled futures still
    /// clear the flag.
    pub fn begin_retry(&self) -> RetryGuard {
        let became_retrying = {
            match self.inner.state.lock() {
                Ok(mut state) => {
                    state.retry_count = state.retry_count.saturating_add(1);
                    state.in_flight_retries = state.in_flight_retries.saturating_add(1);
                    state.in_flight_retries == 1
                }
                Err(_) => false,
            }
        };
        if became_retrying {
            let _ = self
                .inner
                .events
                .send(RegistryEvent::RetryStateChanged { retrying: true });
        }
        RetryGuard {
            inner: self.inner.clone(),
        }
    }

    /// True unless some service's most recent check failed.
    pub fn is_connected(&self) -> bool {
        self.inner
            .state
            .lock()
            .map(|s| s.failed.is_empty())
            .unwrap_or(true)
    }

    /// True while any manual retry is in flight.
    pub fn is_retrying(&self) -> bool {
        self.inner
            .state
            .lock()
            .map(|s| s.in_flight_retries > 0)
            .unwrap_or(false)
    }

    /// Point-in-time view for UI surfaces.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let Ok(state) = self.inner.state.lock() else {
            return RegistrySnapshot {
                connected: true,
                retrying: false,
                retry_count: 0,
                failed_services: Vec::new(),
                known_services: Vec::new(),
            };
        };
        RegistrySnapshot {
            connected: state.failed.is_empty(),
            retrying: state.in_flight_retries > 0,
            retry_count: state.retry_count,
            failed_services: Self::sorted(&state.failed),
            known_services: Self::sorted(&state.known),
        }
    }

    /// Subscribes to state-transition events.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.inner.events.subscribe()
    }

    fn status_event(state: &RegistryState) -> RegistryEvent {
        RegistryEvent::StatusChanged {
            connected: state.failed.is_empty(),
            failed_services: Self::sorted(&state.failed),
        }
    }

    fn sorted(set: &HashSet<ServiceLabel>) -> Vec<ServiceLabel> {
        let mut labels: Vec<ServiceLabel> = set.iter().cloned().collect();
        labels.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        labels
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Retry guard
// ============================================================================

/// RAII handle for an in-flight retry; see
/// [`ConnectionRegistry::begin_retry`].
pub struct RetryGuard {
    inner: Arc<RegistryInner>,
}

impl Drop for RetryGuard {
    fn drop(&mut self) {
        let cleared = {
            match self.inner.state.lock() {
                Ok(mut state) => {
                    state.in_flight_retries = state.in_flight_retries.saturating_sub(1);
                    state.in_flight_retries == 0
                }
                Err(_) => false,
            }
        };
        if cleared {
            let _ = self
                .inner
                .events
                .send(RegistryEvent::RetryStateChanged { retrying: false });
        }
    }
}
