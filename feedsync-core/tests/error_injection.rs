//! Error Injection Tests
//!
//! Tests error handling paths through simulated failures:
//! - Subscription loss and resubscription
//! - Send failures
//! - Profile fetch failures
//! - Notification dispatch failures

use async_trait::async_trait;
use feedsync_core::{
    FeedError, FeedSession, FeedState, InMemoryMessageStore, InMemoryProfileStore, Message,
    MessageStore, Notification, NotificationSink, ProfileStore, Result, SessionConfig,
    StaticIdentity, Subscription, UserProfile,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::time::{timeout, Duration};

/// Sink that can be switched between accepting and refusing
#[derive(Default)]
struct SwitchableSink {
    refuse: std::sync::atomic::AtomicBool,
    shown: Mutex<Vec<Notification>>,
    attempts: AtomicUsize,
}

#[async_trait]
impl NotificationSink for SwitchableSink {
    async fn show(&self, notification: Notification) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(FeedError::PermissionDenied("notifications disabled".into()));
        }
        self.shown.lock().unwrap().push(notification);
        Ok(())
    }
}

/// Profile store that fails a fixed number of times before answering
struct UnreliableProfiles {
    inner: InMemoryProfileStore,
    failures_left: AtomicUsize,
    calls: AtomicUsize,
}

#[async_trait]
impl ProfileStore for UnreliableProfiles {
    async fn get(&self, user_id: &str) -> Result<Option<UserProfile>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(FeedError::ProfileFetch {
                user_id: user_id.to_string(),
                reason: "backend unavailable".into(),
            });
        }
        self.inner.get(user_id).await
    }

    async fn put(&self, profile: UserProfile) -> Result<()> {
        self.inner.put(profile).await
    }
}

/// Message store whose writes always fail
struct ReadOnlyStore(InMemoryMessageStore);

#[async_trait]
impl MessageStore for ReadOnlyStore {
    async fn append(&self, _message: Message) -> Result<String> {
        Err(FeedError::SendFailed("feed is read-only".into()))
    }

    async fn subscribe(&self, limit: usize) -> Result<Subscription> {
        self.0.subscribe(limit).await
    }
}

fn bob() -> UserProfile {
    UserProfile {
        user_id: "bob".into(),
        display_name: "Bob".into(),
        email: "bob@example.com".into(),
        ..Default::default()
    }
}

async fn wait_for<F>(rx: &mut watch::Receiver<FeedState>, mut done: F) -> FeedState
where
    F: FnMut(&FeedState) -> bool,
{
    timeout(Duration::from_secs(5), async {
        loop {
            {
                let state = rx.borrow_and_update();
                if done(&state) {
                    return state.clone();
                }
            }
            rx.changed().await.unwrap();
        }
    })
    .await
    .expect("state never reached")
}

#[test]
fn test_error_classification() {
    assert!(FeedError::transport("listener removed").is_recoverable());
    assert!(!FeedError::SendFailed("x".into()).is_recoverable());
    assert!(FeedError::PermissionDenied("notifications".into()).requires_user_action());
    assert!(!FeedError::ProfileFetch {
        user_id: "u".into(),
        reason: "r".into()
    }
    .requires_user_action());
}

#[tokio::test]
async fn test_transport_loss_then_resubscribe() {
    let store = Arc::new(InMemoryMessageStore::new());
    store.append(Message::outgoing("hello", "bob")).await.unwrap();

    let session = FeedSession::new(
        SessionConfig::default(),
        store.clone(),
        Arc::new(InMemoryProfileStore::new()),
        Arc::new(StaticIdentity::signed_in("me")),
        Arc::new(SwitchableSink::default()),
    );
    session.start().await.unwrap();
    let mut rx = session.watch_state();
    wait_for(&mut rx, |s| s.messages.len() == 1).await;

    store.disconnect_all("PERMISSION_DENIED").await;

    let state = wait_for(&mut rx, |s| s.error.is_some()).await;
    assert_eq!(
        state.error.as_deref(),
        Some("Failed to load messages: PERMISSION_DENIED")
    );
    // Local state is left as it was
    assert_eq!(state.messages.len(), 1);

    session.resubscribe().await.unwrap();
    store.append(Message::outgoing("again", "bob")).await.unwrap();

    let state = wait_for(&mut rx, |s| s.messages.len() == 2).await;
    assert!(state.error.is_none());
}

#[tokio::test]
async fn test_send_failure_surfaces_once() {
    let session = FeedSession::new(
        SessionConfig::default(),
        Arc::new(ReadOnlyStore(InMemoryMessageStore::new())),
        Arc::new(InMemoryProfileStore::new()),
        Arc::new(StaticIdentity::signed_in("me")),
        Arc::new(SwitchableSink::default()),
    );

    session.send_message("hi").unwrap().unwrap().await.unwrap();

    assert_eq!(
        session.state().error.as_deref(),
        Some("Error sending message: feed is read-only")
    );
}

#[tokio::test]
async fn test_profile_failure_degrades_to_fallback_name() {
    let store = Arc::new(InMemoryMessageStore::new());
    let profiles = Arc::new(UnreliableProfiles {
        inner: InMemoryProfileStore::with_profiles([bob()]),
        failures_left: AtomicUsize::new(1),
        calls: AtomicUsize::new(0),
    });
    let sink = Arc::new(SwitchableSink::default());

    store.append(Message::outgoing("first", "bob")).await.unwrap();

    let session = FeedSession::new(
        SessionConfig::default(),
        store.clone(),
        profiles.clone(),
        Arc::new(StaticIdentity::signed_in("me")),
        sink.clone(),
    );
    session.start().await.unwrap();
    let mut rx = session.watch_state();
    wait_for(&mut rx, |s| s.messages.len() == 1).await;

    // The first lookup fails, so the next message is titled with the fallback
    timeout(Duration::from_secs(5), async {
        while profiles.calls.load(Ordering::SeqCst) < 1 || session.profiles().is_in_flight("bob") {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    assert!(session.profiles().get("bob").is_none());

    store.append(Message::outgoing("second", "bob")).await.unwrap();
    wait_for(&mut rx, |s| s.messages.len() == 2).await;

    // The same snapshot retries the lookup, which now succeeds
    let mut profile_rx = session.profiles().subscribe();
    timeout(Duration::from_secs(5), profile_rx.wait_for(|m| m.contains_key("bob")))
        .await
        .unwrap()
        .unwrap();

    store.append(Message::outgoing("third", "bob")).await.unwrap();
    wait_for(&mut rx, |s| s.messages.len() == 3).await;
    timeout(Duration::from_secs(5), async {
        while sink.shown.lock().unwrap().len() < 2 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    let titles: Vec<String> = sink
        .shown
        .lock()
        .unwrap()
        .iter()
        .map(|n| n.title.clone())
        .collect();
    assert_eq!(titles, vec!["User bob...".to_string(), "Bob".to_string()]);
}

#[tokio::test]
async fn test_dispatch_failure_is_not_retried() {
    let store = Arc::new(InMemoryMessageStore::new());
    let sink = Arc::new(SwitchableSink::default());
    sink.refuse.store(true, Ordering::SeqCst);

    store.append(Message::outgoing("old", "bob")).await.unwrap();

    let session = FeedSession::new(
        SessionConfig::default(),
        store.clone(),
        Arc::new(InMemoryProfileStore::new()),
        Arc::new(StaticIdentity::signed_in("me")),
        sink.clone(),
    );
    session.start().await.unwrap();
    let mut rx = session.watch_state();
    wait_for(&mut rx, |s| s.messages.len() == 1).await;

    store.append(Message::outgoing("new", "bob")).await.unwrap();
    let state = wait_for(&mut rx, |s| s.messages.len() == 2).await;

    // Give the consumer a moment; dispatch happens right after publishing.
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(sink.attempts.load(Ordering::SeqCst), 1);
    assert!(sink.shown.lock().unwrap().is_empty());
    assert!(state.error.is_none());
}
