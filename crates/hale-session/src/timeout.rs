//! Admin session timeout with persisted last-activity.
//!
//! Unlike the per-conversation tracker, this manager works in wall-clock
//! time and persists its last-activity timestamp, so a page reload does not
//! reset the expiry clock. Two independent deadlines hang off the same
//! timestamp: a warning (shown once per window) and the hard expiry.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use hale_core::SessionTimeoutConfig;

use crate::events::UiEventBus;

// ============================================================================
// Persisted state
// ============================================================================

/// State persisted across page reloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSession {
    pub last_activity: DateTime<Utc>,

    /// Whether the warning for the current window was already shown.
    #[serde(default)]
    pub warning_shown: bool,

    /// Opaque auth token. Its absence means there is no session to watch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl PersistedSession {
    fn fresh(auth_token: Option<String>) -> Self {
        Self {
            last_activity: Utc::now(),
            warning_shown: false,
            auth_token,
        }
    }
}

/// Storage for [`PersistedSession`].
///
/// The file-backed implementation is the production one; tests and embedded
/// surfaces can substitute [`MemorySessionStore`].
pub trait SessionStore: Send + Sync {
    /// Loads the persisted session, if any. Corrupt state reads as `None`.
    fn load(&self) -> Option<PersistedSession>;

    /// Persists the session. Failures are the store's to log; the manager
    /// keeps running on its in-memory view.
    fn save(&self, session: &PersistedSession);

    /// Removes the persisted session entirely.
    fn clear(&self);
}

/// JSON-file-backed store.
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default location under the platform's local data directory.
    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("hale")
            .join("session.json")
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Option<PersistedSession> {
        let raw = fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Corrupt session state, ignoring");
                None
            }
        }
    }

    fn save(&self, session: &PersistedSession) {
        if let Some(parent) = self.path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!(path = %self.path.display(), error = %e, "Failed to create state directory");
                return;
            }
        }
        match serde_json::to_string(session) {
            Ok(json) => {
                if let Err(e) = fs::write(&self.path, json) {
                    warn!(path = %self.path.display(), error = %e, "Failed to persist session state");
                }
            }
            Err(e) => warn!(error = %e, "Failed to serialize session state"),
        }
    }

    fn clear(&self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// In-memory store for tests and ephemeral surfaces.
#[derive(Default)]
pub struct MemorySessionStore {
    session: Mutex<Option<PersistedSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Option<PersistedSession> {
        self.session.lock().ok().and_then(|s| s.clone())
    }

    fn save(&self, session: &PersistedSession) {
        if let Ok(mut slot) = self.session.lock() {
            *slot = Some(session.clone());
        }
    }

    fn clear(&self) {
        if let Ok(mut slot) = self.session.lock() {
            *slot = None;
        }
    }
}

// ============================================================================
// Events and status
// ============================================================================

/// Notifications emitted by the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionTimeoutEvent {
    /// Inside the warning window; shown once per window.
    Warning { remaining: Duration },

    /// The hard expiry passed. `logout` follows immediately.
    TimedOut,

    /// Session state was cleared; the collaborator should navigate to the
    /// login boundary.
    LoggedOut,
}

/// Pure read of the session clock; mutates nothing.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub is_expired: bool,
    pub time_remaining: Duration,
    pub should_show_warning: bool,
    pub last_activity: Option<DateTime<Utc>>,
}

// ============================================================================
// Manager
// ============================================================================

struct TimeoutInner {
    config: SessionTimeoutConfig,
    store: Arc<dyn SessionStore>,
    events: mpsc::UnboundedSender<SessionTimeoutEvent>,
    cancel: CancellationToken,
    initialized: AtomicBool,
}

/// Wall-clock session-expiry tracker for the admin surface.
#[derive(Clone)]
pub struct SessionTimeoutManager {
    inner: Arc<TimeoutInner>,
}

impl SessionTimeoutManager {
    pub fn new(
        config: SessionTimeoutConfig,
        store: Arc<dyn SessionStore>,
        events: mpsc::UnboundedSender<SessionTimeoutEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(TimeoutInner {
                config,
                store,
                events,
                cancel: CancellationToken::new(),
                initialized: AtomicBool::new(false),
            }),
        }
    }

    /// Loads or initializes persisted state, attaches the manager's own
    /// activity listener to the bus, and starts the periodic expiry check.
    /// Calling `init` twice is a no-op.
    pub fn init(&self, bus: &UiEventBus) {
        if self.inner.initialized.swap(true, Ordering::SeqCst) {
            debug!("Session timeout manager already initialized");
            return;
        }

        if self.inner.store.load().is_none() {
            self.inner.store.save(&PersistedSession::fresh(None));
        }

        // Own activity listener, independent of the chat broadcaster.
        let manager = self.clone();
        let mut rx = bus.subscribe();
        let token = self.inner.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    result = rx.recv() => match result {
                        Ok(event) if event.is_input() => manager.update_last_activity(),
                        Ok(_) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        // Periodic expiry check.
        let manager = self.clone();
        let token = self.inner.cancel.clone();
        let every = self.inner.config.check_interval;
        tokio::spawn(async move {
            let mut tick = interval(every);
            tick.tick().await;
            loop {
                tokio::select! {
                    biased;

                    _ = token.cancelled() => break,
                    _ = tick.tick() => manager.check_now(),
                }
            }
        });

        info!(
            timeout_secs = self.inner.config.timeout.as_secs(),
            warning_window_secs = self.inner.config.warning_window.as_secs(),
            "Session timeout manager started"
        );
    }

    /// Stores the auth token; the expiry clock restarts from now.
    pub fn set_auth_token(&self, token: impl Into<String>) {
        self.inner
            .store
            .save(&PersistedSession::fresh(Some(token.into())));
    }

    /// Persists activity at the current instant and clears the
    /// warning-shown flag, rearming the warning for the new window.
    pub fn update_last_activity(&self) {
        let auth_token = self.inner.store.load().and_then(|s| s.auth_token);
        self.inner.store.save(&PersistedSession {
            last_activity: Utc::now(),
            warning_shown: false,
            auth_token,
        });
    }

    /// Explicit extension from a displayed warning.
    pub fn extend_session(&self) {
        debug!("Session extended by user");
        self.update_last_activity();
    }

    /// One expiry check. Runs on the periodic timer; exposed for tests and
    /// for surfaces that want an immediate re-check after resume.
    pub fn check_now(&self) {
        let Some(session) = self.inner.store.load() else {
            return;
        };

        if session.auth_token.is_none() {
            debug!("No auth token, stopping session watch");
            self.inner.store.clear();
            self.inner.cancel.cancel();
            return;
        }

        let status = Self::status_of(&self.inner.config, &session);

        if status.is_expired {
            info!("Session expired");
            let _ = self.inner.events.send(SessionTimeoutEvent::TimedOut);
            self.logout();
            return;
        }

        if status.should_show_warning {
            info!(
                remaining_secs = status.time_remaining.as_secs(),
                "Session expiry warning"
            );
            self.inner.store.save(&PersistedSession {
                warning_shown: true,
                ..session
            });
            let _ = self.inner.events.send(SessionTimeoutEvent::Warning {
                remaining: status.time_remaining,
            });
        }
    }

    /// Clears persisted state and tokens, stops the timers, and notifies
    /// the collaborator to navigate to the login boundary.
    pub fn logout(&self) {
        self.inner.store.clear();
        self.inner.cancel.cancel();
        let _ = self.inner.events.send(SessionTimeoutEvent::LoggedOut);
        info!("Logged out, session state cleared");
    }

    /// Pure read of the current session clock.
    pub fn get_session_status(&self) -> SessionStatus {
        match self.inner.store.load() {
            Some(session) => Self::status_of(&self.inner.config, &session),
            None => SessionStatus {
                is_expired: true,
                time_remaining: Duration::ZERO,
                should_show_warning: false,
                last_activity: None,
            },
        }
    }

    fn status_of(config: &SessionTimeoutConfig, session: &PersistedSession) -> SessionStatus {
        let elapsed = Utc::now()
            .signed_duration_since(session.last_activity)
            .to_std()
            .unwrap_or(Duration::ZERO);

        let is_expired = elapsed >= config.timeout;
        let time_remaining = config.timeout.saturating_sub(elapsed);
        let should_show_warning =
            !is_expired && time_remaining <= config.warning_window && !session.warning_shown;

        SessionStatus {
            is_expired,
            time_remaining,
            should_show_warning,
            last_activity: Some(session.last_activity),
        }
    }
}
