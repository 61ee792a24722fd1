//! UI event plumbing.
//!
//! The rendering layer owns the actual input surface; it reports activity
//! into a [`UiEventBus`] and per-element scroll sources
//! ([`ScrollRegion`]). Subscribing to the bus is the engine-side analogue
//! of attaching document-level listeners: the broadcaster holds exactly one
//! subscription while any tracker is registered and none otherwise.

use tokio::sync::broadcast;

/// Capacity of the bus channel. Activity events are tiny and droppable;
/// a lagged receiver just misses stale activity ticks.
const BUS_CAPACITY: usize = 256;

/// An event reported by the host surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiEvent {
    /// Pointer pressed anywhere on the page.
    PointerDown,
    /// Key pressed anywhere on the page.
    KeyPress,
    /// Touch started anywhere on the page.
    TouchStart,
    /// The page became hidden (tab switched away, window minimized).
    PageHidden,
    /// The page became visible again.
    PageVisible,
    /// The window gained input focus.
    FocusGained,
    /// The window lost input focus.
    FocusLost,
}

impl UiEvent {
    /// True for events that count as user activity.
    pub fn is_input(&self) -> bool {
        matches!(self, Self::PointerDown | Self::KeyPress | Self::TouchStart)
    }
}

/// Broadcast channel the host surface emits [`UiEvent`]s into.
///
/// Cheap to clone; constructed once by the composition root and shared with
/// the broadcaster and the session-timeout manager.
#[derive(Debug, Clone)]
pub struct UiEventBus {
    sender: broadcast::Sender<UiEvent>,
}

impl UiEventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender }
    }

    /// Emits an event to every current subscriber.
    ///
    /// Emitting with no subscribers is fine - activity that nobody tracks
    /// is simply dropped.
    pub fn emit(&self, event: UiEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribes to future events.
    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscriptions (used by tests and diagnostics).
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for UiEventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Scroll event source scoped to one scrollable element.
///
/// Independent of the document-level bus: trackers attach to regions
/// individually, and only scrolls in an attached region count as activity
/// for that tracker.
#[derive(Debug, Clone)]
pub struct ScrollRegion {
    id: String,
    sender: broadcast::Sender<()>,
}

impl ScrollRegion {
    pub fn new(id: impl Into<String>) -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            id: id.into(),
            sender,
        }
    }

    /// Identifier of the underlying element.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Reports one scroll event in this region.
    pub fn emit_scroll(&self) {
        let _ = self.sender.send(());
    }

    /// Subscribes to scrolls in this region.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }

    /// Number of live subscriptions (used by tests).
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
