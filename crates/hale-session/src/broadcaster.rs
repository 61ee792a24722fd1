//! Activity broadcaster - fans UI activity out to every registered tracker.
//!
//! The broadcaster owns the single bus subscription for all trackers:
//! registering the first tracker attaches it, removing the last detaches
//! it, and nothing is leaked when no conversation is active. Page
//! visibility and focus changes pause/resume the trackers that opted in.

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use hale_core::ConversationId;

use crate::events::{UiEvent, UiEventBus};
use crate::tracker::ActivityTracker;

#[derive(Debug, Clone, Copy)]
struct PageState {
    visible: bool,
    focused: bool,
}

impl Default for PageState {
    fn default() -> Self {
        // A freshly-loaded page is visible and focused.
        Self {
            visible: true,
            focused: true,
        }
    }
}

struct BroadcasterInner {
    bus: UiEventBus,
    /// Registered trackers in registration order.
    trackers: Mutex<Vec<ActivityTracker>>,
    /// Cancels the bus-listener task; present iff the listener is attached.
    listener: Mutex<Option<CancellationToken>>,
    page: Mutex<PageState>,
}

/// Fan-out hub between the UI event bus and the active trackers.
///
/// Cheap to clone; constructed once by the composition root and passed to
/// each tracker at construction.
#[derive(Clone)]
pub struct ActivityBroadcaster {
    inner: Arc<BroadcasterInner>,
}

impl ActivityBroadcaster {
    pub fn new(bus: UiEventBus) -> Self {
        Self {
            inner: Arc::new(BroadcasterInner {
                bus,
                trackers: Mutex::new(Vec::new()),
                listener: Mutex::new(None),
                page: Mutex::new(PageState::default()),
            }),
        }
    }

    /// Adds a tracker to the fan-out set. The first registration attaches
    /// the shared bus listener; later ones reuse it.
    pub fn register_tracker(&self, tracker: ActivityTracker) {
        let is_first = {
            let Ok(mut trackers) = self.inner.trackers.lock() else {
                return;
            };
            if trackers.iter().any(|t| t.id() == tracker.id()) {
                debug!(conversation = %tracker.id(), "Tracker already registered");
                return;
            }
            trackers.push(tracker);
            trackers.len() == 1
        };

        if is_first {
            self.attach_listener();
        }
    }

    /// Removes a tracker. Removing the last one detaches the bus listener.
    pub fn unregister_tracker(&self, id: &ConversationId) {
        let is_empty = {
            let Ok(mut trackers) = self.inner.trackers.lock() else {
                return;
            };
            trackers.retain(|t| t.id() != id);
            trackers.is_empty()
        };

        if is_empty {
            self.detach_listener();
        }
    }

    /// Number of registered trackers.
    pub fn tracker_count(&self) -> usize {
        self.inner.trackers.lock().map(|t| t.len()).unwrap_or(0)
    }

    /// Whether the shared bus listener is currently attached.
    pub fn has_listener(&self) -> bool {
        self.inner
            .listener
            .lock()
            .map(|l| l.is_some())
            .unwrap_or(false)
    }

    fn attach_listener(&self) {
        let Ok(mut listener) = self.inner.listener.lock() else {
            return;
        };
        if listener.is_some() {
            return;
        }

        let token = CancellationToken::new();
        *listener = Some(token.clone());

        let inner = self.inner.clone();
        let mut rx = inner.bus.subscribe();
        tokio::spawn(async move {
            info!("Activity listener attached");
            loop {
                tokio::select! {
                    biased;

                    _ = token.cancelled() => break,

                    result = rx.recv() => match result {
                        Ok(event) => Self::dispatch(&inner, event),
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                            debug!(missed, "Activity listener lagged, continuing");
                            continue;
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            info!("Activity listener detached");
        });
    }

    fn detach_listener(&self) {
        if let Ok(mut listener) = self.inner.listener.lock() {
            if let Some(token) = listener.take() {
                token.cancel();
            }
        }
    }

    /// Routes one bus event. Runs on the listener task.
    fn dispatch(inner: &Arc<BroadcasterInner>, event: UiEvent) {
        if event.is_input() {
            // Snapshot the set, then notify outside the lock so one
            // tracker's work cannot block registration, and every tracker
            // is notified regardless of what earlier ones did.
            let snapshot = match inner.trackers.lock() {
                Ok(trackers) => trackers.clone(),
                Err(_) => return,
            };
            for tracker in &snapshot {
                tracker.record_activity();
            }
            return;
        }

        let (should_pause, should_resume) = {
            let Ok(mut page) = inner.page.lock() else {
                return;
            };
            match event {
                UiEvent::PageHidden => {
                    page.visible = false;
                    (true, false)
                }
                UiEvent::FocusLost => {
                    page.focused = false;
                    (true, false)
                }
                UiEvent::PageVisible => {
                    page.visible = true;
                    // Resume needs visibility and focus together.
                    (false, page.focused)
                }
                UiEvent::FocusGained => {
                    page.focused = true;
                    (false, page.visible)
                }
                _ => (false, false),
            }
        };

        if !should_pause && !should_resume {
            return;
        }

        let snapshot = match inner.trackers.lock() {
            Ok(trackers) => trackers.clone(),
            Err(_) => return,
        };
        for tracker in snapshot.iter().filter(|t| t.pause_on_hidden()) {
            if should_pause {
                tracker.pause_inactivity_timer();
            } else {
                tracker.resume_inactivity_timer();
            }
        }
    }
}
