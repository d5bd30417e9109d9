//! In-process stores
//!
//! Message and profile stores that live in memory. The message store behaves
//! like the remote feed: it assigns ids and server timestamps on append and
//! every live subscription receives the fresh last-N snapshot.
//!
//! The log is published through a `watch` channel and each subscription runs
//! its own forwarding task. A subscription that is not being read only holds
//! up its own task; appends never wait on subscribers, and a slow subscriber
//! skips straight to the latest snapshot.

use crate::auth::{normalize_email, Credential};
use crate::store::{CredentialStore, MessageStore, ProfileStore, SnapshotSender, Subscription};
use crate::{FeedError, FeedSnapshot, Message, Result, UserProfile};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::{watch, RwLock};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct FeedLog {
    messages: Vec<Message>,
    /// Bumped by every disconnect; subscriptions from an older epoch fail
    epoch: u64,
    disconnect_reason: String,
}

/// Message store held in memory
pub struct InMemoryMessageStore {
    log: watch::Sender<FeedLog>,
}

impl Default for InMemoryMessageStore {
    fn default() -> Self {
        let (log, _) = watch::channel(FeedLog::default());
        Self { log }
    }
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored messages
    pub async fn len(&self) -> usize {
        self.log.borrow().messages.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Fail every live subscription with a transport error
    ///
    /// Subscriptions end after the error, as a dropped remote listener would.
    /// Subscriptions made afterwards are unaffected.
    pub async fn disconnect_all(&self, reason: &str) {
        self.log.send_modify(|log| {
            log.epoch += 1;
            log.disconnect_reason = reason.to_string();
        });
    }

    /// Number of subscriptions whose forwarding task is still alive
    pub async fn subscriber_count(&self) -> usize {
        self.log.receiver_count()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn append(&self, mut message: Message) -> Result<String> {
        message.id = Uuid::new_v4().to_string();
        message.timestamp = Some(Utc::now());
        let id = message.id.clone();

        let mut total = 0;
        self.log.send_modify(|log| {
            log.messages.push(message);
            total = log.messages.len();
        });

        debug!("Stored message {} ({} total)", id, total);
        Ok(id)
    }

    async fn subscribe(&self, limit: usize) -> Result<Subscription> {
        let (sender, subscription) = Subscription::channel();
        let log = self.log.subscribe();
        let epoch = log.borrow().epoch;

        let handle = tokio::spawn(forward(log, epoch, limit, sender));
        Ok(subscription.with_producer(handle))
    }
}

async fn forward(
    mut log: watch::Receiver<FeedLog>,
    epoch: u64,
    limit: usize,
    sender: SnapshotSender,
) {
    loop {
        let item = {
            let current = log.borrow_and_update();
            if current.epoch != epoch {
                Err(FeedError::transport(current.disconnect_reason.clone()))
            } else {
                Ok(FeedSnapshot::from_unordered(current.messages.clone(), limit))
            }
        };

        let disconnected = item.is_err();
        if !sender.send(item).await || disconnected {
            break;
        }
        if log.changed().await.is_err() {
            break;
        }
    }
}

/// Profile store held in memory
#[derive(Default)]
pub struct InMemoryProfileStore {
    profiles: RwLock<HashMap<String, UserProfile>>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with `profiles`
    pub fn with_profiles(profiles: impl IntoIterator<Item = UserProfile>) -> Self {
        Self {
            profiles: RwLock::new(
                profiles
                    .into_iter()
                    .map(|p| (p.user_id.clone(), p))
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn get(&self, user_id: &str) -> Result<Option<UserProfile>> {
        Ok(self.profiles.read().await.get(user_id).cloned())
    }

    async fn put(&self, profile: UserProfile) -> Result<()> {
        self.profiles
            .write()
            .await
            .insert(profile.user_id.clone(), profile);
        Ok(())
    }
}

/// Credential store held in memory
#[derive(Default)]
pub struct InMemoryCredentialStore {
    credentials: RwLock<HashMap<String, Credential>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn find(&self, email: &str) -> Result<Option<Credential>> {
        Ok(self
            .credentials
            .read()
            .await
            .get(&normalize_email(email))
            .cloned())
    }

    async fn put(&self, credential: Credential) -> Result<()> {
        self.credentials
            .write()
            .await
            .insert(normalize_email(&credential.email), credential);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FEED_LIMIT;
    use std::time::Duration;

    #[tokio::test]
    async fn test_subscribe_delivers_current_snapshot_first() {
        let store = InMemoryMessageStore::new();
        store.append(Message::outgoing("one", "bob")).await.unwrap();

        let mut sub = store.subscribe(10).await.unwrap();
        let snapshot = sub.next_snapshot().await.unwrap().unwrap();

        assert_eq!(snapshot.len(), 1);
        assert!(!snapshot[0].id.is_empty());
        assert!(snapshot[0].is_acknowledged());
    }

    async fn wait_for_texts(sub: &mut Subscription, expected: &[&str]) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let snapshot = sub.next_snapshot().await.unwrap().unwrap();
                let texts: Vec<&str> = snapshot.iter().map(|m| m.text.as_str()).collect();
                if texts == expected {
                    return;
                }
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_append_pushes_bounded_snapshot() {
        let store = InMemoryMessageStore::new();
        let mut sub = store.subscribe(2).await.unwrap();
        assert!(sub.next_snapshot().await.unwrap().unwrap().is_empty());

        for text in ["a", "b", "c"] {
            store.append(Message::outgoing(text, "bob")).await.unwrap();
        }

        wait_for_texts(&mut sub, &["b", "c"]).await;
    }

    #[tokio::test]
    async fn test_idle_subscriber_does_not_block_appends() {
        let store = InMemoryMessageStore::new();
        let mut idle = store.subscribe(FEED_LIMIT).await.unwrap();
        let mut reader = store.subscribe(FEED_LIMIT).await.unwrap();

        for n in 0..40 {
            tokio::time::timeout(
                Duration::from_millis(200),
                store.append(Message::outgoing(n.to_string(), "bob")),
            )
            .await
            .expect("append waited on a subscriber")
            .unwrap();
        }

        let all: Vec<String> = (0..40).map(|n| n.to_string()).collect();
        let all: Vec<&str> = all.iter().map(String::as_str).collect();
        wait_for_texts(&mut reader, &all).await;
        // The idle one catches up with the latest state once read
        wait_for_texts(&mut idle, &all).await;
    }

    #[tokio::test]
    async fn test_dropped_subscriptions_are_pruned() {
        let store = InMemoryMessageStore::new();
        let sub = store.subscribe(10).await.unwrap();
        assert_eq!(store.subscriber_count().await, 1);

        drop(sub);
        tokio::time::timeout(Duration::from_secs(5), async {
            while store.subscriber_count().await > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_sends_transport_error() {
        let store = InMemoryMessageStore::new();
        let mut sub = store.subscribe(10).await.unwrap();
        sub.next_snapshot().await;

        store.disconnect_all("server went away").await;

        let err = sub.next_snapshot().await.unwrap().unwrap_err();
        assert!(matches!(err, FeedError::Transport(_)));
        assert!(sub.next_snapshot().await.is_none());
    }

    #[tokio::test]
    async fn test_profile_store() {
        let store = InMemoryProfileStore::with_profiles([UserProfile {
            user_id: "bob".into(),
            display_name: "Bob".into(),
            ..Default::default()
        }]);

        assert_eq!(store.get("bob").await.unwrap().unwrap().display_name, "Bob");
        assert!(store.get("nobody").await.unwrap().is_none());
    }
}
