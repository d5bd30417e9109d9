//! Feed session
//!
//! Ties one subscription, synchronizer, profile cache and notification gate
//! together for the lifetime of a viewing session. Snapshots are consumed by
//! a single task, one at a time. A transport error parks the session in an
//! error state until [`FeedSession::resubscribe`] is called.

use crate::activity::ViewerActivity;
use crate::gate::{NotificationGate, DEFAULT_NOTIFICATION_ID_BASE};
use crate::profile_cache::ProfileCache;
use crate::store::{IdentityProvider, MessageStore, NotificationSink, ProfileStore, Subscription};
use crate::synchronizer::{ArrivalDetection, FeedState, FeedSynchronizer};
use crate::{FeedError, Message, Result, FEED_LIMIT};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Session tunables
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Messages kept in view
    pub limit: usize,
    /// Arrival detection strategy
    pub detection: ArrivalDetection,
    /// First notification id
    pub notification_id_base: i32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            limit: FEED_LIMIT,
            detection: ArrivalDetection::default(),
            notification_id_base: DEFAULT_NOTIFICATION_ID_BASE,
        }
    }
}

/// A live view of the feed
pub struct FeedSession {
    config: SessionConfig,
    messages: Arc<dyn MessageStore>,
    identity: Arc<dyn IdentityProvider>,
    cache: Arc<ProfileCache>,
    activity: ViewerActivity,
    state: Arc<watch::Sender<FeedState>>,
    synchronizer: Arc<AsyncMutex<FeedSynchronizer>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl FeedSession {
    /// Create a session; nothing is subscribed until [`start`](Self::start)
    pub fn new(
        config: SessionConfig,
        messages: Arc<dyn MessageStore>,
        profiles: Arc<dyn ProfileStore>,
        identity: Arc<dyn IdentityProvider>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let cache = Arc::new(ProfileCache::new(profiles));
        let gate = Arc::new(NotificationGate::with_id_base(
            sink,
            config.notification_id_base,
        ));
        let activity = ViewerActivity::new();
        let (state, _) = watch::channel(FeedState::default());
        let state = Arc::new(state);

        let synchronizer = FeedSynchronizer::new(
            identity.current_user_id(),
            cache.clone(),
            gate,
            activity.clone(),
            state.clone(),
        )
        .with_detection(config.detection);

        Self {
            config,
            messages,
            identity,
            cache,
            activity,
            state,
            synchronizer: Arc::new(AsyncMutex::new(synchronizer)),
            consumer: Mutex::new(None),
        }
    }

    /// Subscribe and start consuming snapshots
    ///
    /// A subscription failure is also recorded in the session state.
    pub async fn start(&self) -> Result<()> {
        if self.is_running() {
            return Err(FeedError::invalid_state("Feed session already running"));
        }

        let subscription = match self.messages.subscribe(self.config.limit).await {
            Ok(subscription) => subscription,
            Err(e) => {
                let e = as_transport(e);
                error!("Listen failed: {}", e);
                self.set_error(e.user_message());
                return Err(e);
            }
        };

        self.state.send_if_modified(|s| !std::mem::replace(&mut s.subscribed, true));
        let handle = tokio::spawn(consume(
            subscription,
            self.synchronizer.clone(),
            self.state.clone(),
        ));
        *lock(&self.consumer) = Some(handle);

        info!("Feed session started (limit {})", self.config.limit);
        Ok(())
    }

    /// Drop the current subscription, clear the error and subscribe again
    pub async fn resubscribe(&self) -> Result<()> {
        self.stop_consumer();
        self.clear_error();
        info!("Resubscribing to feed");
        self.start().await
    }

    /// Whether the consumer loop is alive
    pub fn is_running(&self) -> bool {
        lock(&self.consumer)
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Current state
    pub fn state(&self) -> FeedState {
        self.state.borrow().clone()
    }

    /// Observe state changes
    pub fn watch_state(&self) -> watch::Receiver<FeedState> {
        self.state.subscribe()
    }

    /// Clear the user-visible error
    pub fn clear_error(&self) {
        self.state.send_if_modified(|state| state.error.take().is_some());
    }

    /// Viewer activity flag for this session
    pub fn activity(&self) -> &ViewerActivity {
        &self.activity
    }

    /// Profiles resolved during this session
    pub fn profiles(&self) -> &Arc<ProfileCache> {
        &self.cache
    }

    /// Send a message as the current viewer
    ///
    /// Text is trimmed; blank text is ignored and returns `Ok(None)`. The
    /// append runs in the background and a failure is reported through the
    /// session state. Nothing is added to the local feed until the store
    /// delivers it back.
    pub fn send_message(&self, text: &str) -> Result<Option<JoinHandle<()>>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }

        let sender_id = self
            .identity
            .current_user_id()
            .ok_or(FeedError::NotSignedIn)?;

        let message = Message::outgoing(text, sender_id);
        let store = self.messages.clone();
        let state = self.state.clone();

        let handle = tokio::spawn(async move {
            match store.append(message).await {
                Ok(id) => debug!("Message sent: {}", id),
                Err(e) => {
                    let e = match e {
                        FeedError::SendFailed(_) => e,
                        other => FeedError::SendFailed(other.to_string()),
                    };
                    warn!("Error sending message: {}", e);
                    state.send_modify(|s| s.error = Some(e.user_message()));
                }
            }
        });

        Ok(Some(handle))
    }

    /// Stop consuming and abort pending profile fetches
    pub fn shutdown(&self) {
        self.stop_consumer();
        self.cache.close();
        info!("Feed session shut down");
    }

    fn stop_consumer(&self) {
        if let Some(handle) = lock(&self.consumer).take() {
            // Dropping the task drops its subscription, which cancels it.
            handle.abort();
        }
        self.state
            .send_if_modified(|s| std::mem::replace(&mut s.subscribed, false));
    }

    fn set_error(&self, message: String) {
        self.state.send_modify(|s| s.error = Some(message));
    }
}

impl Drop for FeedSession {
    fn drop(&mut self) {
        self.stop_consumer();
        self.cache.close();
    }
}

async fn consume(
    mut subscription: Subscription,
    synchronizer: Arc<AsyncMutex<FeedSynchronizer>>,
    state: Arc<watch::Sender<FeedState>>,
) {
    while let Some(item) = subscription.next_snapshot().await {
        match item {
            Ok(snapshot) => {
                synchronizer.lock().await.on_snapshot(snapshot).await;
            }
            Err(e) => {
                let e = as_transport(e);
                error!("Listen failed: {}", e);
                park(&state, &e);
                subscription.cancel();
                return;
            }
        }
    }
    if !subscription.is_cancelled() {
        let e = FeedError::transport("subscription closed by the store");
        warn!("Listen failed: {}", e);
        park(&state, &e);
    }
}

/// Record a subscription failure and mark the feed as no longer live
fn park(state: &watch::Sender<FeedState>, error: &FeedError) {
    state.send_modify(|s| {
        s.error = Some(error.user_message());
        s.subscribed = false;
    });
}

fn as_transport(error: FeedError) -> FeedError {
    match error {
        FeedError::Transport(_) => error,
        other => FeedError::Transport(other.to_string()),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
