//! Shared-directory stores
//!
//! A feed backed by a plain directory, so several processes pointed at the
//! same place (a synced folder, a network share) see one conversation.
//!
//! ```text
//! <root>/messages.jsonl          one JSON message per line, append-only
//! <root>/profiles/<user_id>.json one profile document per user
//! <root>/credentials/<hash>.json  sign-in credential, named by email hash
//! ```
//!
//! Subscriptions watch the directory with `notify` and redeliver the last-N
//! snapshot whenever the message log changes.

use crate::auth::{normalize_email, Credential};
use crate::fs_utils;
use crate::store::{CredentialStore, MessageStore, ProfileStore, SnapshotSender, Subscription};
use crate::{FeedError, FeedSnapshot, Message, Result, UserProfile};
use async_trait::async_trait;
use chrono::Utc;
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

const MESSAGE_LOG: &str = "messages.jsonl";
const PROFILE_DIR: &str = "profiles";
const CREDENTIAL_DIR: &str = "credentials";

/// Filesystem events buffered between the watcher thread and the producer
const EVENT_BUFFER: usize = 64;

/// Message store over `<root>/messages.jsonl`
#[derive(Debug, Clone)]
pub struct FileMessageStore {
    root: PathBuf,
}

impl FileMessageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of the message log
    pub fn log_path(&self) -> PathBuf {
        self.root.join(MESSAGE_LOG)
    }

    /// All parseable messages in log order
    pub async fn read_all(&self) -> Result<Vec<Message>> {
        read_log(&self.log_path()).await
    }
}

async fn read_log(path: &Path) -> Result<Vec<Message>> {
    let Some(contents) = fs_utils::read_optional(path).await? else {
        return Ok(Vec::new());
    };

    let mut messages = Vec::new();
    for (n, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Message>(line) {
            Ok(message) => messages.push(message),
            // A line being written by another process shows up truncated.
            Err(e) => warn!("Skipping line {} of {}: {}", n + 1, path.display(), e),
        }
    }
    Ok(messages)
}

async fn read_snapshot(path: &Path, limit: usize) -> Result<FeedSnapshot> {
    Ok(FeedSnapshot::from_unordered(read_log(path).await?, limit))
}

#[async_trait]
impl MessageStore for FileMessageStore {
    async fn append(&self, mut message: Message) -> Result<String> {
        message.id = Uuid::new_v4().to_string();
        message.timestamp = Some(Utc::now());

        let line = serde_json::to_string(&message)?;
        fs_utils::append_line(self.log_path(), &line)
            .await
            .map_err(|e| FeedError::SendFailed(e.to_string()))?;

        debug!("Appended message {} to {}", message.id, self.log_path().display());
        Ok(message.id)
    }

    async fn subscribe(&self, limit: usize) -> Result<Subscription> {
        fs_utils::ensure_dir(&self.root).await?;
        let log_path = self.log_path();

        let (events_tx, events_rx) = tokio::sync::mpsc::channel(EVENT_BUFFER);
        let watched = log_path.clone();

        // Use blocking_send within the sync closure
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    if event.paths.iter().any(|p| p.ends_with(MESSAGE_LOG)) {
                        let _ = events_tx.blocking_send(Ok(()));
                    }
                }
                Err(e) => {
                    warn!("Watch error on {}: {:?}", watched.display(), e);
                    let _ = events_tx.blocking_send(Err(e.to_string()));
                }
            },
            Config::default(),
        )?;
        watcher.watch(&self.root, RecursiveMode::NonRecursive)?;

        let initial = read_snapshot(&log_path, limit).await?;
        let (sender, subscription) = Subscription::channel();
        sender.send(Ok(initial.clone())).await;

        info!("Watching {} for new messages", log_path.display());
        let handle = tokio::spawn(watch_log(
            watcher, events_rx, sender, log_path, limit, initial,
        ));

        Ok(subscription.with_producer(handle))
    }
}

/// Log change events from the watcher; `Err` carries a watcher failure
type WatchEvent = std::result::Result<(), String>;

async fn watch_log<W: Send + 'static>(
    // Kept alive for as long as the producer runs
    _watcher: W,
    mut events: tokio::sync::mpsc::Receiver<WatchEvent>,
    sender: SnapshotSender,
    log_path: PathBuf,
    limit: usize,
    mut last: FeedSnapshot,
) {
    while let Some(mut event) = events.recv().await {
        // Coalesce bursts of events from a single write, keeping any failure.
        while let Ok(next) = events.try_recv() {
            if event.is_ok() {
                event = next;
            }
        }

        if let Err(reason) = event {
            let _ = sender
                .send(Err(FeedError::transport(format!(
                    "watching {}: {}",
                    log_path.display(),
                    reason
                ))))
                .await;
            break;
        }

        match read_snapshot(&log_path, limit).await {
            Ok(snapshot) => {
                if snapshot == last {
                    continue;
                }
                last = snapshot.clone();
                if !sender.send(Ok(snapshot)).await {
                    break;
                }
            }
            Err(e) => {
                let _ = sender
                    .send(Err(FeedError::transport(format!(
                        "reading {}: {}",
                        log_path.display(),
                        e
                    ))))
                    .await;
                break;
            }
        }
    }
    debug!("Stopped watching {}", log_path.display());
}

/// Profile store over `<root>/profiles/<user_id>.json`
#[derive(Debug, Clone)]
pub struct FileProfileStore {
    root: PathBuf,
}

impl FileProfileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn profile_path(&self, user_id: &str) -> Result<PathBuf> {
        let valid = !user_id.is_empty()
            && !user_id.starts_with('.')
            && !user_id.contains(['/', '\\']);
        if !valid {
            return Err(FeedError::Validation(format!(
                "Invalid user id: {:?}",
                user_id
            )));
        }
        Ok(self.root.join(PROFILE_DIR).join(format!("{}.json", user_id)))
    }
}

#[async_trait]
impl ProfileStore for FileProfileStore {
    async fn get(&self, user_id: &str) -> Result<Option<UserProfile>> {
        let path = self.profile_path(user_id)?;
        match fs_utils::read_optional(&path).await? {
            Some(contents) => Ok(Some(serde_json::from_str(&contents).map_err(|e| {
                FeedError::ProfileFetch {
                    user_id: user_id.to_string(),
                    reason: e.to_string(),
                }
            })?)),
            None => Ok(None),
        }
    }

    async fn put(&self, profile: UserProfile) -> Result<()> {
        let path = self.profile_path(&profile.user_id)?;
        let data = serde_json::to_vec_pretty(&profile)?;
        fs_utils::write_atomic(&path, &data).await?;
        info!("Saved profile for {}", profile.user_id);
        Ok(())
    }
}

/// Credential store over `<root>/credentials/`
///
/// Files are named by the SHA-256 of the normalized email, so any address
/// maps to a safe file name.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    root: PathBuf,
}

impl FileCredentialStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn credential_path(&self, email: &str) -> PathBuf {
        let digest = Sha256::digest(normalize_email(email).as_bytes());
        self.root
            .join(CREDENTIAL_DIR)
            .join(format!("{}.json", hex::encode(digest)))
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn find(&self, email: &str) -> Result<Option<Credential>> {
        match fs_utils::read_optional(self.credential_path(email)).await? {
            Some(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, credential: Credential) -> Result<()> {
        let path = self.credential_path(&credential.email);
        let data = serde_json::to_vec_pretty(&credential)?;
        fs_utils::write_atomic(&path, &data).await?;
        debug!("Saved credential for {}", credential.user_id);
        Ok(())
    }
}
