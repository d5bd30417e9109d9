//! Viewer activity tracking
//!
//! Whether the viewer is actively looking at the feed. Notifications are
//! suppressed while the flag is set. The flag defaults to `false` and goes
//! back to `false` on every teardown path: guards reset it on drop (including
//! while unwinding) and [`ViewerActivity::follow`] resets it when the
//! lifecycle stream ends.

use futures::{Stream, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Shared, process-local "viewer is watching" flag
#[derive(Debug, Clone, Default)]
pub struct ViewerActivity {
    active: Arc<AtomicBool>,
}

impl ViewerActivity {
    /// New flag, initially inactive
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Set the flag directly
    pub fn set_active(&self, active: bool) {
        let previous = self.active.swap(active, Ordering::SeqCst);
        if previous != active {
            if active {
                debug!("Feed is now active");
            } else {
                debug!("Feed is now inactive");
            }
        }
    }

    /// Mark the feed active until the returned guard is dropped
    pub fn enter(&self) -> ActiveGuard {
        self.set_active(true);
        ActiveGuard {
            activity: self.clone(),
        }
    }

    /// Drive the flag from a lifecycle signal
    ///
    /// Each item is the foreground state of the feed UI. When the stream ends
    /// the flag is reset to `false`.
    pub async fn follow<S>(&self, lifecycle: S)
    where
        S: Stream<Item = bool>,
    {
        let _reset = ResetOnExit {
            activity: self.clone(),
        };
        futures::pin_mut!(lifecycle);
        while let Some(active) = lifecycle.next().await {
            self.set_active(active);
        }
    }
}

/// Keeps the feed marked active while alive
#[derive(Debug)]
#[must_use = "the feed is marked inactive again as soon as the guard is dropped"]
pub struct ActiveGuard {
    activity: ViewerActivity,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.activity.set_active(false);
    }
}

struct ResetOnExit {
    activity: ViewerActivity,
}

impl Drop for ResetOnExit {
    fn drop(&mut self) {
        self.activity.set_active(false);
    }
}
