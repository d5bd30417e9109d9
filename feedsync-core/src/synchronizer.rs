//! Message Feed Synchronizer
//!
//! Consumes ordered feed snapshots, publishes them as the current state,
//! works out which messages are new since the previous snapshot, forwards
//! those to the notification gate and keeps the profile cache warm for every
//! sender in view.
//!
//! ## Arrival detection
//!
//! The default [`ArrivalDetection::LengthDelta`] compares list lengths: when
//! the previous snapshot had `n > 0` messages and the new one has more, the
//! entries from index `n` on are new. Deletions, edits and reorders are not
//! detected, and a snapshot that drops old entries while adding new ones
//! (sliding past the limit) reports nothing. [`ArrivalDetection::IdentityDiff`]
//! compares message ids instead and handles those cases.
//!
//! Both strategies treat the first non-empty snapshot as history: nothing in
//! it is reported as new.

use crate::activity::ViewerActivity;
use crate::gate::{GateOutcome, NotificationGate};
use crate::profile_cache::ProfileCache;
use crate::{FeedSnapshot, Message};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// How newly arrived messages are told apart from history
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrivalDetection {
    /// Everything past the previous snapshot's length
    #[default]
    LengthDelta,
    /// Every message whose id was not in the previous snapshot
    IdentityDiff,
}

/// Observable state of a feed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedState {
    /// Latest snapshot, ascending by time
    pub messages: Vec<Message>,
    /// Single user-visible error, if any
    pub error: Option<String>,
    /// Whether a live subscription is feeding `messages`
    ///
    /// Cleared together with setting `error` when the subscription fails, so
    /// an error seen while this is still `true` came from a send.
    pub subscribed: bool,
}

/// What a snapshot changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotOutcome {
    /// Messages considered newly arrived, in feed order
    pub newly_arrived: Vec<Message>,
    /// Gate decision for each newly arrived message not sent by the viewer
    pub notifications: Vec<GateOutcome>,
    /// Profile fetches started for senders in view
    pub fetches_started: usize,
}

/// Per-session snapshot processor
pub struct FeedSynchronizer {
    viewer_id: Option<String>,
    detection: ArrivalDetection,
    previous_count: usize,
    seen_ids: HashSet<String>,
    cache: Arc<ProfileCache>,
    gate: Arc<NotificationGate>,
    activity: ViewerActivity,
    state: Arc<watch::Sender<FeedState>>,
}

impl FeedSynchronizer {
    /// Create a synchronizer publishing into `state`
    pub fn new(
        viewer_id: Option<String>,
        cache: Arc<ProfileCache>,
        gate: Arc<NotificationGate>,
        activity: ViewerActivity,
        state: Arc<watch::Sender<FeedState>>,
    ) -> Self {
        Self {
            viewer_id,
            detection: ArrivalDetection::default(),
            previous_count: 0,
            seen_ids: HashSet::new(),
            cache,
            gate,
            activity,
            state,
        }
    }

    /// Use a different arrival detection strategy
    pub fn with_detection(mut self, detection: ArrivalDetection) -> Self {
        self.detection = detection;
        self
    }

    /// Active detection strategy
    pub fn detection(&self) -> ArrivalDetection {
        self.detection
    }

    /// Length of the last processed snapshot
    pub fn previous_count(&self) -> usize {
        self.previous_count
    }

    /// Observe published state
    pub fn subscribe(&self) -> watch::Receiver<FeedState> {
        self.state.subscribe()
    }

    /// Process one snapshot
    ///
    /// Must be called from within a Tokio runtime and never concurrently for
    /// the same feed; the caller serializes snapshots.
    pub async fn on_snapshot(&mut self, snapshot: FeedSnapshot) -> SnapshotOutcome {
        let messages = snapshot.into_messages();
        let newly_arrived = self.detect_arrivals(&messages);

        debug!(
            "Snapshot with {} messages, {} new",
            messages.len(),
            newly_arrived.len()
        );

        let senders: Vec<String> = self.unique_senders(&messages);

        self.state.send_modify(|state| state.messages = messages);

        let mut notifications = Vec::new();
        for message in newly_arrived.iter().filter(|m| !self.is_viewer(&m.sender_id)) {
            let sender = self.cache.get(&message.sender_id);
            let outcome = self
                .gate
                .consider(message, self.activity.is_active(), sender.as_ref())
                .await;
            notifications.push(outcome);
        }

        let fetches_started = self.cache.resolve_all(senders.iter().map(String::as_str));

        SnapshotOutcome {
            newly_arrived,
            notifications,
            fetches_started,
        }
    }

    fn detect_arrivals(&mut self, messages: &[Message]) -> Vec<Message> {
        let had_history = self.previous_count > 0;

        let arrived = match self.detection {
            ArrivalDetection::LengthDelta => {
                if had_history && messages.len() > self.previous_count {
                    messages[self.previous_count..].to_vec()
                } else {
                    Vec::new()
                }
            }
            ArrivalDetection::IdentityDiff => {
                let arrived = if had_history {
                    messages
                        .iter()
                        .filter(|m| !self.seen_ids.contains(&m.id))
                        .cloned()
                        .collect()
                } else {
                    Vec::new()
                };
                self.seen_ids = messages.iter().map(|m| m.id.clone()).collect();
                arrived
            }
        };

        self.previous_count = messages.len();
        arrived
    }

    fn unique_senders(&self, messages: &[Message]) -> Vec<String> {
        let mut seen = HashSet::new();
        messages
            .iter()
            .map(|m| m.sender_id.as_str())
            .filter(|id| !id.trim().is_empty() && !self.is_viewer(id))
            .filter(|id| seen.insert(*id))
            .map(str::to_string)
            .collect()
    }

    fn is_viewer(&self, sender_id: &str) -> bool {
        self.viewer_id.as_deref() == Some(sender_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Notification, NotificationSink, ProfileStore};
    use crate::{Result, UserProfile};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Profiles(HashMap<String, UserProfile>);

    #[async_trait]
    impl ProfileStore for Profiles {
        async fn get(&self, user_id: &str) -> Result<Option<UserProfile>> {
            Ok(self.0.get(user_id).cloned())
        }

        async fn put(&self, _profile: UserProfile) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Sink(Mutex<Vec<Notification>>);

    #[async_trait]
    impl NotificationSink for Sink {
        async fn show(&self, notification: Notification) -> Result<()> {
            self.0.lock().unwrap().push(notification);
            Ok(())
        }
    }

    struct Harness {
        sync: FeedSynchronizer,
        sink: Arc<Sink>,
        activity: ViewerActivity,
    }

    fn harness(detection: ArrivalDetection) -> Harness {
        let sink = Arc::new(Sink::default());
        let activity = ViewerActivity::new();
        let (state, _) = watch::channel(FeedState::default());
        let sync = FeedSynchronizer::new(
            Some("me".to_string()),
            Arc::new(ProfileCache::new(Arc::new(Profiles::default()))),
            Arc::new(NotificationGate::new(sink.clone())),
            activity.clone(),
            Arc::new(state),
        )
        .with_detection(detection);
        Harness {
            sync,
            sink,
            activity,
        }
    }

    fn feed(entries: &[(&str, &str)]) -> FeedSnapshot {
        entries.iter()
            .map(|(id, sender)| Message {
                id: id.to_string(),
                text: format!("text {}", id),
                sender_id: sender.to_string(),
                timestamp: None,
            })
            .collect::<Vec<_>>()
            .into()
    }

    #[tokio::test]
    async fn test_initial_load_is_history() {
        let mut h = harness(ArrivalDetection::LengthDelta);

        let outcome = h
            .sync
            .on_snapshot(feed(&[("a", "bob"), ("b", "bob"), ("c", "carol")]))
            .await;

        assert!(outcome.newly_arrived.is_empty());
        assert!(h.sink.0.lock().unwrap().is_empty());
        assert_eq!(h.sync.previous_count(), 3);
        assert_eq!(h.sync.subscribe().borrow().messages.len(), 3);
    }

    #[tokio::test]
    async fn test_growth_notifies_suffix_once() {
        let mut h = harness(ArrivalDetection::LengthDelta);
        h.sync
            .on_snapshot(feed(&[("a", "bob"), ("b", "bob"), ("c", "bob")]))
            .await;

        let five = feed(&[
            ("a", "bob"),
            ("b", "bob"),
            ("c", "bob"),
            ("d", "bob"),
            ("e", "carol"),
        ]);
        let outcome = h.sync.on_snapshot(five.clone()).await;

        let ids: Vec<&str> = outcome.newly_arrived.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["d", "e"]);
        assert_eq!(
            outcome.notifications,
            vec![GateOutcome::Dispatched(1000), GateOutcome::Dispatched(1001)]
        );

        let again = h.sync.on_snapshot(five).await;
        assert!(again.newly_arrived.is_empty());
        assert_eq!(h.sink.0.lock().unwrap().len(), 2);
    }

    /// Growing prefixes of one conversation: `lengths[i]` messages at step `i`
    async fn run_growth(detection: ArrivalDetection, lengths: &[usize]) -> (Vec<String>, usize) {
        let mut h = harness(detection);
        let total = lengths.iter().copied().max().unwrap_or(0);
        let conversation: Vec<(String, &str)> = (0..total)
            .map(|n| (format!("m{}", n), if n % 3 == 0 { "carol" } else { "bob" }))
            .collect();

        let mut arrived = Vec::new();
        for &len in lengths {
            let step: Vec<(&str, &str)> = conversation[..len]
                .iter()
                .map(|(id, sender)| (id.as_str(), *sender))
                .collect();
            let outcome = h.sync.on_snapshot(feed(&step)).await;
            assert_eq!(outcome.notifications.len(), outcome.newly_arrived.len());
            arrived.extend(outcome.newly_arrived.into_iter().map(|m| m.id));
        }
        let shown = h.sink.0.lock().unwrap().len();
        (arrived, shown)
    }

    #[tokio::test]
    async fn test_non_decreasing_sequences_report_exact_suffix() {
        let cases: &[&[usize]] = &[
            &[0, 3, 3, 5, 5, 9, 12],
            &[1, 1, 2, 10],
            &[4, 4, 4],
            &[0, 0, 7, 8],
            &[2, 3, 4, 5, 6, 7],
            &[0, 0, 0],
        ];

        for detection in [ArrivalDetection::LengthDelta, ArrivalDetection::IdentityDiff] {
            for lengths in cases {
                let (arrived, shown) = run_growth(detection, lengths).await;

                let first = lengths.iter().copied().find(|&n| n > 0).unwrap_or(0);
                let last = lengths.last().copied().unwrap_or(0);
                let expected: Vec<String> = (first..last).map(|n| format!("m{}", n)).collect();

                assert_eq!(arrived, expected, "{:?} with {:?}", lengths, detection);
                assert_eq!(shown, expected.len(), "{:?} with {:?}", lengths, detection);
            }
        }
    }

    #[tokio::test]
    async fn test_viewer_messages_are_not_gated() {
        let mut h = harness(ArrivalDetection::LengthDelta);
        h.sync.on_snapshot(feed(&[("a", "bob")])).await;

        let outcome = h.sync.on_snapshot(feed(&[("a", "bob"), ("b", "me")])).await;

        assert_eq!(outcome.newly_arrived.len(), 1);
        assert!(outcome.notifications.is_empty());
    }

    #[tokio::test]
    async fn test_active_viewer_suppresses() {
        let mut h = harness(ArrivalDetection::LengthDelta);
        h.sync.on_snapshot(feed(&[("a", "bob")])).await;

        let _guard = h.activity.enter();
        let outcome = h.sync.on_snapshot(feed(&[("a", "bob"), ("b", "bob")])).await;

        assert_eq!(outcome.notifications, vec![GateOutcome::Suppressed]);
        assert!(h.sink.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sliding_window_missed_by_length_delta() {
        let mut h = harness(ArrivalDetection::LengthDelta);
        h.sync.on_snapshot(feed(&[("a", "bob"), ("b", "bob")])).await;

        let outcome = h.sync.on_snapshot(feed(&[("b", "bob"), ("c", "bob")])).await;
        assert!(outcome.newly_arrived.is_empty());
    }

    #[tokio::test]
    async fn test_identity_diff_catches_sliding_window() {
        let mut h = harness(ArrivalDetection::IdentityDiff);
        h.sync.on_snapshot(feed(&[("a", "bob"), ("b", "bob")])).await;

        let outcome = h.sync.on_snapshot(feed(&[("b", "bob"), ("c", "bob")])).await;
        assert_eq!(outcome.newly_arrived.len(), 1);
        assert_eq!(outcome.newly_arrived[0].id, "c");

        let again = h.sync.on_snapshot(feed(&[("b", "bob"), ("c", "bob")])).await;
        assert!(again.newly_arrived.is_empty());
    }

    #[tokio::test]
    async fn test_senders_resolved_once_without_viewer_or_blank() {
        let mut h = harness(ArrivalDetection::LengthDelta);

        let outcome = h
            .sync
            .on_snapshot(feed(&[("a", "bob"), ("b", "me"), ("c", ""), ("d", "bob"), ("e", "carol")]))
            .await;

        assert_eq!(outcome.fetches_started, 2);
    }
}
