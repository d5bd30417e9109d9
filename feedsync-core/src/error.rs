//! Error handling for feed synchronization
//!
//! This module provides a single error type for every fallible feed operation.
//! Errors from underlying libraries are converted automatically using `thiserror`.
//!
//! ## Error Handling Patterns
//!
//! ### Basic Usage
//!
//! ```rust
//! use feedsync_core::Result;
//!
//! fn parse_message(data: &[u8]) -> Result<feedsync_core::Message> {
//!     // serde_json errors convert into FeedError::Json
//!     let message = serde_json::from_slice(data)?;
//!     Ok(message)
//! }
//! ```
//!
//! ### Error Matching
//!
//! ```rust
//! use feedsync_core::FeedError;
//!
//! fn describe(error: &FeedError) -> &'static str {
//!     match error {
//!         FeedError::Transport(_) => "subscription lost, resubscribe",
//!         FeedError::SendFailed(_) => "message was not delivered",
//!         FeedError::NotSignedIn => "sign in first",
//!         _ => "other",
//!     }
//! }
//! ```
//!
//! ## Error Categories
//!
//! The feed distinguishes four failure classes, none of which is fatal:
//!
//! - **Transport**: the remote subscription failed. User-visible, recoverable
//!   by resubscribing, local state is left untouched.
//! - **Send**: appending a message failed. User-visible, never retried
//!   automatically.
//! - **Profile fetch**: a profile lookup failed. Logged only; the display name
//!   degrades to a fallback and the lookup is retried on the next resolve.
//! - **Notification dispatch**: the notification sink refused (for example the
//!   permission was revoked). Logged only, never retried.

use thiserror::Error;

/// Result type for feed operations
///
/// This is a type alias for `Result<T, FeedError>`.
///
/// # Examples
///
/// ```rust
/// use feedsync_core::Result;
///
/// fn example() -> Result<()> {
///     Ok(())
/// }
/// ```
pub type Result<T> = std::result::Result<T, FeedError>;

/// Errors that can occur while synchronizing a feed
///
/// # Automatic Conversions
///
/// - `std::io::Error` → `FeedError::Io`
/// - `serde_json::Error` → `FeedError::Json`
/// - `notify::Error` → `FeedError::Watch`
///
/// # Examples
///
/// ```rust
/// use feedsync_core::FeedError;
///
/// let error = FeedError::Transport("stream closed".to_string());
/// assert_eq!(error.to_string(), "Transport error: stream closed");
///
/// let error = FeedError::NotSignedIn;
/// assert_eq!(error.to_string(), "Not signed in");
/// ```
#[derive(Error, Debug)]
pub enum FeedError {
    /// I/O error (file-backed stores, sockets, etc.)
    ///
    /// Automatically converted from `std::io::Error`.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    ///
    /// Automatically converted from `serde_json::Error`.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// File watcher error from the shared-directory store
    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    /// The remote message subscription failed
    ///
    /// Surfaces as a single user-visible error state. Recover by resubscribing.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use feedsync_core::FeedError;
    ///
    /// let error = FeedError::Transport("connection reset".to_string());
    /// assert!(error.is_recoverable());
    /// ```
    #[error("Transport error: {0}")]
    Transport(String),

    /// Appending a message to the store failed
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Fetching a user profile failed
    #[error("Profile fetch failed for {user_id}: {reason}")]
    ProfileFetch {
        /// Profile that could not be fetched
        user_id: String,
        /// Underlying failure
        reason: String,
    },

    /// Operation requires a signed-in viewer
    #[error("Not signed in")]
    NotSignedIn,

    /// Email and password did not match a registered account
    #[error("Invalid email or password")]
    InvalidCredentials,

    /// Permission denied (notification permission revoked, unreadable store)
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Notification sink failed to show a notification
    #[error("Notification dispatch failed: {0}")]
    NotificationDispatch(String),

    /// Input rejected by validation
    ///
    /// # Examples
    ///
    /// ```rust
    /// use feedsync_core::FeedError;
    ///
    /// let error = FeedError::Validation("Invalid email format.".to_string());
    /// assert_eq!(error.to_string(), "Validation failed: Invalid email format.");
    /// ```
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Operation cancelled (session closed, subscription dropped)
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl FeedError {
    /// Convert an I/O error into a more specific feed error
    ///
    /// # Examples
    ///
    /// ```rust
    /// use feedsync_core::FeedError;
    /// use std::io::{Error, ErrorKind};
    ///
    /// let io_error = Error::new(ErrorKind::PermissionDenied, "read-only");
    /// let error = FeedError::from_io_error(io_error, "opening feed");
    /// assert!(matches!(error, FeedError::PermissionDenied(_)));
    /// ```
    pub fn from_io_error(error: std::io::Error, context: &str) -> Self {
        use std::io::ErrorKind;

        match error.kind() {
            ErrorKind::PermissionDenied => {
                FeedError::PermissionDenied(format!("{}: {}", context, error))
            }
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::TimedOut => FeedError::Transport(format!("{}: {}", context, error)),
            _ => FeedError::Io(error),
        }
    }

    /// Check if this error is recoverable by retrying or resubscribing
    ///
    /// # Examples
    ///
    /// ```rust
    /// use feedsync_core::FeedError;
    ///
    /// assert!(FeedError::Transport("closed".into()).is_recoverable());
    /// assert!(!FeedError::NotSignedIn.is_recoverable());
    /// ```
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FeedError::Transport(_)
                | FeedError::Io(_)
                | FeedError::Watch(_)
                | FeedError::ProfileFetch { .. }
        )
    }

    /// Check if this error needs the user to do something
    pub fn requires_user_action(&self) -> bool {
        matches!(
            self,
            FeedError::NotSignedIn
                | FeedError::InvalidCredentials
                | FeedError::PermissionDenied(_)
                | FeedError::Configuration(_)
                | FeedError::Validation(_)
        )
    }

    /// Get a user-friendly message suitable for a banner or notification
    ///
    /// # Examples
    ///
    /// ```rust
    /// use feedsync_core::FeedError;
    ///
    /// let error = FeedError::SendFailed("store offline".into());
    /// assert_eq!(error.user_message(), "Error sending message: store offline");
    /// ```
    pub fn user_message(&self) -> String {
        match self {
            FeedError::Transport(msg) => format!("Failed to load messages: {}", msg),
            FeedError::SendFailed(msg) => format!("Error sending message: {}", msg),
            FeedError::NotSignedIn => "You need to sign in before sending messages.".to_string(),
            FeedError::InvalidCredentials => "Incorrect email or password.".to_string(),
            FeedError::PermissionDenied(msg) => {
                format!("Permission denied: {}. Check notification permissions.", msg)
            }
            FeedError::Validation(msg) => msg.clone(),
            FeedError::Configuration(msg) => {
                format!("Configuration error: {}. Check your settings.", msg)
            }
            FeedError::ProfileFetch { user_id, .. } => {
                format!("Could not load details for {}.", user_id)
            }
            FeedError::NotificationDispatch(msg) => format!("Could not show notification: {}.", msg),
            FeedError::Cancelled(msg) => format!("Operation cancelled: {}.", msg),
            FeedError::InvalidState(msg) => format!("Invalid state: {}.", msg),
            FeedError::Io(e) => format!("I/O error: {}.", e),
            FeedError::Json(e) => format!("Data format error: {}.", e),
            FeedError::Watch(e) => format!("Failed to watch feed: {}.", e),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        FeedError::InvalidState(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        FeedError::Transport(msg.into())
    }
}
