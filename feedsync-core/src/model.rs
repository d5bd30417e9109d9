//! Feed data model
//!
//! Messages, user profiles and the ordered, bounded snapshot delivered by a
//! message store subscription.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::ops::Deref;

/// Default number of messages a subscription keeps (most recent by time)
pub const FEED_LIMIT: usize = 100;

/// A chat message as stored in the remote feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Identifier assigned by the store (empty until stored)
    #[serde(default)]
    pub id: String,

    /// Message text content
    #[serde(default)]
    pub text: String,

    /// Author's user identifier
    #[serde(default)]
    pub sender_id: String,

    /// Server-assigned instant, `None` until the store acknowledges the write
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Message {
    /// Create the ephemeral local copy of a message about to be sent
    pub fn outgoing(text: impl Into<String>, sender_id: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            text: text.into(),
            sender_id: sender_id.into(),
            timestamp: None,
        }
    }

    /// Whether the store has acknowledged this message
    pub fn is_acknowledged(&self) -> bool {
        self.timestamp.is_some()
    }
}

/// A user's public profile
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// User identifier
    #[serde(default)]
    pub user_id: String,

    /// Name chosen by the user
    #[serde(default, alias = "name")]
    pub display_name: String,

    /// Contact email
    #[serde(default)]
    pub email: String,

    /// Contact phone number
    #[serde(default)]
    pub phone: String,

    /// Profile picture location
    #[serde(default, alias = "profilePictureUrl")]
    pub avatar_url: Option<String>,

    /// When the profile document was created
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Ordered point-in-time copy of the feed
///
/// Ascending by timestamp, bounded to the most recent entries. Messages the
/// store has not acknowledged yet sort after every acknowledged one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeedSnapshot {
    messages: Vec<Message>,
}

impl FeedSnapshot {
    /// Wrap a list that is already ordered and bounded
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    /// Order `messages` by time and keep only the last `limit`
    pub fn from_unordered(mut messages: Vec<Message>, limit: usize) -> Self {
        // Stable sort keeps insertion order among equal timestamps.
        messages.sort_by(|a, b| compare_timestamps(a.timestamp, b.timestamp));
        if messages.len() > limit {
            messages.drain(..messages.len() - limit);
        }
        Self { messages }
    }

    /// Messages in feed order
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Consume into the ordered message list
    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}

impl Deref for FeedSnapshot {
    type Target = [Message];

    fn deref(&self) -> &[Message] {
        &self.messages
    }
}

impl From<Vec<Message>> for FeedSnapshot {
    fn from(messages: Vec<Message>) -> Self {
        Self::new(messages)
    }
}

fn compare_timestamps(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
