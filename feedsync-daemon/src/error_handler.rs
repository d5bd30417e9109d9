//! Centralized Error Handling and User Notification System
//!
//! Logs feed errors at the right level and shows a desktop notification for
//! the ones the user has to act on.

use anyhow::Result;
use feedsync_core::FeedError;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

use crate::notifications::DesktopNotifier;

/// Central error handler that manages error notifications
#[derive(Clone, Default)]
pub struct ErrorHandler {
    notifier: Arc<RwLock<Option<DesktopNotifier>>>,
}

impl ErrorHandler {
    /// Create a new error handler without notification support
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a notifier for user-facing error notifications
    pub async fn attach(&self, notifier: DesktopNotifier) {
        *self.notifier.write().await = Some(notifier);
        debug!("Error handler initialized with notification support");
    }

    /// Handle a feed error with appropriate logging and user notification
    ///
    /// Returns whether the error is recoverable, for retry logic.
    pub async fn handle_error(&self, error: &FeedError, context: &str) -> bool {
        if error.is_recoverable() {
            warn!("Recoverable error {}: {}", context, error);
        } else if error.requires_user_action() {
            warn!("User action required {}: {}", context, error);
        } else {
            error!("Error {}: {}", context, error);
        }

        if error.requires_user_action() {
            if let Err(e) = self.notify_error(error).await {
                error!("Failed to show error notification: {}", e);
            }
        }

        error.is_recoverable()
    }

    async fn notify_error(&self, error: &FeedError) -> Result<()> {
        let notifier_guard = self.notifier.read().await;
        let Some(notifier) = notifier_guard.as_ref() else {
            debug!("Notifier not initialized, skipping error notification");
            return Ok(());
        };

        let (title, recovery) = error_title(error);
        notifier
            .notify_error_with_recovery(title, &error.user_message(), recovery)
            .await?;

        Ok(())
    }

    /// Check if notifications are enabled
    pub async fn notifications_enabled(&self) -> bool {
        self.notifier.read().await.is_some()
    }
}

/// Notification title and recovery action for an error
fn error_title(error: &FeedError) -> (&'static str, Option<(&'static str, &'static str)>) {
    match error {
        FeedError::NotSignedIn => ("Not Signed In", Some(("register", "Register"))),
        FeedError::PermissionDenied(_) => ("Permission Denied", Some(("settings", "Open Settings"))),
        FeedError::Configuration(_) => ("Configuration Error", Some(("settings", "Open Settings"))),
        FeedError::Validation(_) => ("Invalid Input", None),
        FeedError::InvalidCredentials => ("Sign-in Failed", Some(("login", "Sign In"))),
        FeedError::Transport(_) => ("Feed Unavailable", Some(("retry", "Retry"))),
        FeedError::SendFailed(_) => ("Message Not Sent", None),
        _ => ("Operation Failed", None),
    }
}
