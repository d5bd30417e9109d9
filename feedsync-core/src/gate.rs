//! Notification Gate
//!
//! Decides whether a newly arrived message should raise a notification and
//! builds it. Suppressed entirely while the viewer is watching the feed;
//! otherwise the sender's display name is resolved with a fallback chain and
//! the notification is dispatched with a fresh id. Dispatch is best effort:
//! failures are logged and dropped.

use crate::store::{Notification, NotificationSink, TapAction};
use crate::{Message, UserProfile};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// First notification id handed out by a gate
pub const DEFAULT_NOTIFICATION_ID_BASE: i32 = 1000;

/// Characters of the sender id kept in the fallback name
const FALLBACK_ID_PREFIX_CHARS: usize = 6;

/// What the gate did with a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    /// Viewer is watching the feed
    Suppressed,
    /// Notification handed to the sink with this id
    Dispatched(i32),
    /// Sink refused; already logged
    Failed(i32),
}

/// Best display name for a sender
///
/// Non-blank display name, else non-blank email, else `"User "` followed by
/// the first six characters of the sender id and `"..."`.
///
/// # Examples
///
/// ```rust
/// use feedsync_core::gate::sender_display_name;
///
/// assert_eq!(sender_display_name(None, "abcdef123456"), "User abcdef...");
/// ```
pub fn sender_display_name(profile: Option<&UserProfile>, sender_id: &str) -> String {
    if let Some(profile) = profile {
        if !profile.display_name.trim().is_empty() {
            return profile.display_name.clone();
        }
        if !profile.email.trim().is_empty() {
            return profile.email.clone();
        }
    }

    let prefix: String = sender_id.chars().take(FALLBACK_ID_PREFIX_CHARS).collect();
    format!("User {}...", prefix)
}

/// Gate between newly arrived messages and the notification sink
pub struct NotificationGate {
    sink: Arc<dyn NotificationSink>,
    next_id: AtomicI32,
}

impl NotificationGate {
    /// Gate with ids starting at [`DEFAULT_NOTIFICATION_ID_BASE`]
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self::with_id_base(sink, DEFAULT_NOTIFICATION_ID_BASE)
    }

    /// Gate with ids starting at `base`
    ///
    /// The counter restarts from `base` every time a gate is created, so ids
    /// can repeat across process restarts.
    pub fn with_id_base(sink: Arc<dyn NotificationSink>, base: i32) -> Self {
        Self {
            sink,
            next_id: AtomicI32::new(base),
        }
    }

    /// Consider one newly arrived message from someone other than the viewer
    pub async fn consider(
        &self,
        message: &Message,
        viewer_active: bool,
        sender: Option<&UserProfile>,
    ) -> GateOutcome {
        if viewer_active {
            debug!("Feed active, not notifying for message {}", message.id);
            return GateOutcome::Suppressed;
        }

        let title = sender_display_name(sender, &message.sender_id);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        debug!(
            "New message from {}, feed inactive. Showing notification {}",
            title, id
        );

        let notification = Notification {
            id,
            title,
            body: message.text.clone(),
            tap_action: TapAction::OpenFeed,
        };

        match self.sink.show(notification).await {
            Ok(()) => GateOutcome::Dispatched(id),
            Err(e) => {
                warn!("Could not show notification {}: {}", id, e);
                GateOutcome::Failed(id)
            }
        }
    }

    /// Id the next dispatched notification will get
    pub fn peek_next_id(&self) -> i32 {
        self.next_id.load(Ordering::SeqCst)
    }
}
