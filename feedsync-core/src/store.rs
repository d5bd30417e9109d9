//! Collaborator interfaces
//!
//! The feed core never talks to a concrete backend. Message and profile
//! storage, the viewer's identity and the notification surface are reached
//! through the traits in this module, shared as `Arc<dyn Trait>`.
//!
//! ## Subscriptions
//!
//! [`MessageStore::subscribe`] returns a [`Subscription`]: a cancellable
//! handle over a lazy sequence of full [`FeedSnapshot`]s. Consumers await
//! [`Subscription::next_snapshot`] (or use it as a `futures::Stream`).
//! Once cancelled or dropped, the handle never yields again, even if the
//! producer had already queued snapshots. To restart the sequence, subscribe
//! again.

use crate::auth::Credential;
use crate::{FeedSnapshot, Message, Result, UserProfile};
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Buffered snapshots per subscription before the producer waits
const SUBSCRIPTION_BUFFER: usize = 16;

/// Append-only message store with live, ordered subscriptions
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append a message and return the identifier the store assigned
    async fn append(&self, message: Message) -> Result<String>;

    /// Subscribe to the last `limit` messages ordered by time ascending
    ///
    /// The first snapshot is delivered as soon as it is available, then a new
    /// full snapshot on every change.
    async fn subscribe(&self, limit: usize) -> Result<Subscription>;
}

/// User profile lookup
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Fetch a profile, `Ok(None)` when no profile exists for the id
    async fn get(&self, user_id: &str) -> Result<Option<UserProfile>>;

    /// Create or replace a profile
    async fn put(&self, profile: UserProfile) -> Result<()>;
}

/// Sign-in credentials, looked up by email
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Credential registered for `email`, compared case-insensitively
    async fn find(&self, email: &str) -> Result<Option<Credential>>;

    /// Create or replace the credential for its email
    async fn put(&self, credential: Credential) -> Result<()>;
}

/// Who is looking at the feed
pub trait IdentityProvider: Send + Sync {
    /// Current viewer id, `None` when signed out
    fn current_user_id(&self) -> Option<String>;
}

/// Fixed identity, resolved once at startup
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    user_id: Option<String>,
}

impl StaticIdentity {
    /// A signed-in viewer
    pub fn signed_in(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
        }
    }

    /// No viewer
    pub fn signed_out() -> Self {
        Self { user_id: None }
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user_id(&self) -> Option<String> {
        self.user_id.clone()
    }
}

/// What happens when the user taps a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapAction {
    /// Bring the feed back to the foreground
    OpenFeed,
}

impl TapAction {
    /// Action key understood by notification servers and deep-link handlers
    pub fn key(&self) -> &'static str {
        match self {
            TapAction::OpenFeed => "open_chat",
        }
    }
}

/// A user-visible notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Per-instance identifier, distinct for every dispatched notification
    pub id: i32,
    /// Sender display name
    pub title: String,
    /// Message text
    pub body: String,
    /// Tap behaviour
    pub tap_action: TapAction,
}

/// Surface that shows notifications to the user
///
/// Best effort: implementations may fail, for example when the notification
/// permission is missing.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Show a notification
    async fn show(&self, notification: Notification) -> Result<()>;
}

/// Producer half of a [`Subscription`]
#[derive(Debug, Clone)]
pub struct SnapshotSender {
    tx: mpsc::Sender<Result<FeedSnapshot>>,
}

impl SnapshotSender {
    /// Deliver a snapshot or a transport error
    ///
    /// Returns `false` once the subscription is gone; producers should stop.
    pub async fn send(&self, item: Result<FeedSnapshot>) -> bool {
        self.tx.send(item).await.is_ok()
    }

    /// Deliver from a non-async context (file watcher callbacks)
    pub fn blocking_send(&self, item: Result<FeedSnapshot>) -> bool {
        self.tx.blocking_send(item).is_ok()
    }

    /// Whether the consumer has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Wait until the consumer goes away
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Cancellable handle over a stream of feed snapshots
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::Receiver<Result<FeedSnapshot>>,
    producer: Option<JoinHandle<()>>,
    cancelled: bool,
}

impl Subscription {
    /// Create a connected producer/consumer pair
    pub fn channel() -> (SnapshotSender, Subscription) {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        (
            SnapshotSender { tx },
            Subscription {
                rx,
                producer: None,
                cancelled: false,
            },
        )
    }

    /// Tie a producer task to this subscription so cancelling stops it
    pub fn with_producer(mut self, handle: JoinHandle<()>) -> Self {
        self.producer = Some(handle);
        self
    }

    /// Await the next snapshot
    ///
    /// Returns `None` when the producer finished or the subscription was
    /// cancelled.
    pub async fn next_snapshot(&mut self) -> Option<Result<FeedSnapshot>> {
        if self.cancelled {
            return None;
        }
        self.rx.recv().await
    }

    /// Stop delivery; queued snapshots are discarded
    pub fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        self.rx.close();
        if let Some(handle) = self.producer.take() {
            handle.abort();
        }
        debug!("Subscription cancelled");
    }

    /// Whether [`cancel`](Self::cancel) was called
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}

impl Stream for Subscription {
    type Item = Result<FeedSnapshot>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.cancelled {
            return Poll::Ready(None);
        }
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}
