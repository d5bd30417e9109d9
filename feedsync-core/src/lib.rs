//! Feed Synchronization Core
//!
//! This library keeps a live, bounded view of a shared chat feed in sync,
//! caches the profiles of the people writing in it, and raises a desktop
//! notification for messages that arrive while nobody is looking.

pub mod activity;
pub mod auth;
pub mod file_store;
pub mod fs_utils;
pub mod gate;
pub mod memory;
pub mod profile_cache;
pub mod recovery;
pub mod registration;
pub mod session;
pub mod store;
pub mod synchronizer;

mod error;
mod model;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use activity::{ActiveGuard, ViewerActivity};
pub use auth::{sign_in, Credential};
pub use error::{FeedError, Result};
pub use file_store::{FileCredentialStore, FileMessageStore, FileProfileStore};
pub use gate::{sender_display_name, GateOutcome, NotificationGate, DEFAULT_NOTIFICATION_ID_BASE};
pub use memory::{InMemoryCredentialStore, InMemoryMessageStore, InMemoryProfileStore};
pub use model::{FeedSnapshot, Message, UserProfile, FEED_LIMIT};
pub use profile_cache::{ProfileCache, ProfileMap, Resolution};
pub use recovery::{resubscribe_with_backoff, ResubscribeStrategy};
pub use registration::Registration;
pub use session::{FeedSession, SessionConfig};
pub use store::{
    CredentialStore, IdentityProvider, MessageStore, Notification, NotificationSink, ProfileStore,
    SnapshotSender, StaticIdentity, Subscription, TapAction,
};
pub use synchronizer::{ArrivalDetection, FeedState, FeedSynchronizer, SnapshotOutcome};
