//! Visibility-aware scheduler.
//!
//! Tracks foreground/background transitions of the host application.
//! Going hidden starts a grace timer; if the app is still hidden when it
//! fires, the pause target (the connection manager) is paused and the
//! `Hidden` state is broadcast so fallback pollers stop fetching.
//! Returning to foreground cancels the pending pause, resumes the
//! target, and lets pollers run their catch-up logic.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Foreground/background state broadcast to pollers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

/// Something that can be suspended while the app is backgrounded.
///
/// Implemented by a thin wrapper around the connection manager at the
/// wiring layer; a trait keeps this crate free of transport concerns
/// and lets tests observe pause/resume calls.
pub trait PauseTarget: Send + Sync {
    fn pause(&self);
    fn resume(&self);
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Grace period after going hidden before work is paused.
    pub hide_grace_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            hide_grace_ms: 30_000,
        }
    }
}

/// Visibility-aware scheduler.
pub struct VisibilityScheduler {
    target: Arc<dyn PauseTarget>,
    config: SchedulerConfig,
    visibility_tx: watch::Sender<Visibility>,
    hidden_since: RwLock<Option<Instant>>,
    /// Cancels the pending grace timer when the app returns early.
    pending_pause: Mutex<Option<CancellationToken>>,
}

impl VisibilityScheduler {
    pub fn new(target: Arc<dyn PauseTarget>, config: SchedulerConfig) -> Self {
        let (visibility_tx, _) = watch::channel(Visibility::Visible);
        Self {
            target,
            config,
            visibility_tx,
            hidden_since: RwLock::new(None),
            pending_pause: Mutex::new(None),
        }
    }

    /// Subscribe to visibility transitions.
    pub fn visibility_rx(&self) -> watch::Receiver<Visibility> {
        self.visibility_tx.subscribe()
    }

    pub fn is_hidden(&self) -> bool {
        *self.visibility_tx.borrow() == Visibility::Hidden
    }

    /// How long the app has currently been hidden.
    pub fn hidden_duration(&self) -> Option<Duration> {
        self.hidden_since.read().map(|t| t.elapsed())
    }

    /// Host shell callback: the application became visible or hidden.
    pub fn set_visible(&self, visible: bool) {
        if visible {
            self.on_visible();
        } else {
            self.on_hidden();
        }
    }

    fn on_hidden(&self) {
        let changed = self.visibility_tx.send_if_modified(|v| {
            if *v != Visibility::Hidden {
                *v = Visibility::Hidden;
                true
            } else {
                false
            }
        });
        if !changed {
            return;
        }

        *self.hidden_since.write() = Some(Instant::now());
        info!(grace_ms = self.config.hide_grace_ms, "Application hidden");

        let token = CancellationToken::new();
        if let Some(prev) = self.pending_pause.lock().replace(token.clone()) {
            prev.cancel();
        }

        let target = self.target.clone();
        let grace = Duration::from_millis(self.config.hide_grace_ms);
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(grace) => {
                    debug!("Hide grace elapsed; pausing feed work");
                    target.pause();
                }
                () = token.cancelled() => {
                    debug!("Pending pause cancelled; application returned");
                }
            }
        });
    }

    fn on_visible(&self) {
        let changed = self.visibility_tx.send_if_modified(|v| {
            if *v != Visibility::Visible {
                *v = Visibility::Visible;
                true
            } else {
                false
            }
        });
        if !changed {
            return;
        }

        if let Some(token) = self.pending_pause.lock().take() {
            token.cancel();
        }

        let hidden_for = self.hidden_since.write().take().map(|t| t.elapsed());
        info!(hidden_ms = hidden_for.map(|d| d.as_millis() as u64), "Application visible");

        self.target.resume();
    }
}
