//! Profile Cache
//!
//! Memoizes user profile lookups by user id for the lifetime of a feed
//! session.
//!
//! ## Behaviour
//!
//! - [`ProfileCache::resolve`] answers from the cache, or starts exactly one
//!   background fetch per id and answers [`Resolution::Pending`].
//! - The in-flight marker is recorded under the cache lock before the fetch
//!   task is spawned, so two concurrent calls for the same id never start two
//!   fetches.
//! - A successful fetch stores the profile and publishes the new mapping to
//!   observers ([`ProfileCache::subscribe`]).
//! - A failed fetch clears the marker without caching anything; the next
//!   `resolve` retries. Failures are logged, never returned.
//! - A profile that does not exist is remembered as missing and not fetched
//!   again during the session.
//! - Nothing is ever evicted. The mapping grows with the number of distinct
//!   senders seen in the session.
//! - [`ProfileCache::close`] aborts pending fetches; results that arrive
//!   afterwards are discarded.

use crate::store::ProfileStore;
use crate::UserProfile;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

/// Mapping published to cache observers
pub type ProfileMap = HashMap<String, UserProfile>;

/// Outcome of [`ProfileCache::resolve`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Profile is cached
    Ready(UserProfile),
    /// Not available yet (fetch running, profile missing, or id blank)
    Pending,
}

impl Resolution {
    /// The cached profile, if any
    pub fn profile(&self) -> Option<&UserProfile> {
        match self {
            Resolution::Ready(profile) => Some(profile),
            Resolution::Pending => None,
        }
    }
}

/// Lookup bookkeeping for ids that are not cached
#[derive(Debug)]
enum Lookup {
    /// Fetch task running; handle is set right after the spawn
    InFlight(Option<AbortHandle>),
    /// Store answered "not found"
    Missing,
}

#[derive(Debug, Default)]
struct CacheState {
    profiles: ProfileMap,
    lookups: HashMap<String, Lookup>,
    closed: bool,
}

/// Session-scoped profile cache
pub struct ProfileCache {
    store: Arc<dyn ProfileStore>,
    state: Arc<Mutex<CacheState>>,
    updates: watch::Sender<ProfileMap>,
}

impl ProfileCache {
    /// Create an empty cache backed by `store`
    pub fn new(store: Arc<dyn ProfileStore>) -> Self {
        let (updates, _) = watch::channel(ProfileMap::new());
        Self {
            store,
            state: Arc::new(Mutex::new(CacheState::default())),
            updates,
        }
    }

    /// Return the cached profile or start fetching it
    ///
    /// Must be called from within a Tokio runtime. Blank ids are never
    /// fetched.
    pub fn resolve(&self, user_id: &str) -> Resolution {
        self.resolve_inner(user_id).0
    }

    /// Resolve several ids, returning how many new fetches were started
    pub fn resolve_all<'a, I>(&self, user_ids: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        user_ids
            .into_iter()
            .filter(|user_id| self.resolve_inner(user_id).1)
            .count()
    }

    fn resolve_inner(&self, user_id: &str) -> (Resolution, bool) {
        let mut state = lock(&self.state);

        if let Some(profile) = state.profiles.get(user_id) {
            return (Resolution::Ready(profile.clone()), false);
        }
        if state.closed || user_id.trim().is_empty() || state.lookups.contains_key(user_id) {
            return (Resolution::Pending, false);
        }

        state
            .lookups
            .insert(user_id.to_string(), Lookup::InFlight(None));

        let handle = tokio::spawn(fetch_profile(
            self.store.clone(),
            self.state.clone(),
            self.updates.clone(),
            user_id.to_string(),
        ));

        if let Some(Lookup::InFlight(slot)) = state.lookups.get_mut(user_id) {
            *slot = Some(handle.abort_handle());
        }

        debug!("Fetching profile for {}", user_id);
        (Resolution::Pending, true)
    }

    /// Cached profile without triggering a fetch
    pub fn get(&self, user_id: &str) -> Option<UserProfile> {
        lock(&self.state).profiles.get(user_id).cloned()
    }

    /// Copy of the whole mapping
    pub fn profiles(&self) -> ProfileMap {
        lock(&self.state).profiles.clone()
    }

    /// Observe mapping updates
    pub fn subscribe(&self) -> watch::Receiver<ProfileMap> {
        self.updates.subscribe()
    }

    /// Whether a fetch for `user_id` is outstanding
    pub fn is_in_flight(&self, user_id: &str) -> bool {
        matches!(
            lock(&self.state).lookups.get(user_id),
            Some(Lookup::InFlight(_))
        )
    }

    /// Number of cached profiles
    pub fn len(&self) -> usize {
        lock(&self.state).profiles.len()
    }

    /// Whether nothing is cached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Abort pending fetches and stop accepting results
    pub fn close(&self) {
        let mut state = lock(&self.state);
        if state.closed {
            return;
        }
        state.closed = true;

        let mut aborted = 0;
        state.lookups.retain(|_, lookup| match lookup {
            Lookup::InFlight(handle) => {
                if let Some(handle) = handle.take() {
                    handle.abort();
                }
                aborted += 1;
                false
            }
            Lookup::Missing => true,
        });

        info!(
            "Profile cache closed ({} cached, {} fetches aborted)",
            state.profiles.len(),
            aborted
        );
    }
}

impl Drop for ProfileCache {
    fn drop(&mut self) {
        self.close();
    }
}

async fn fetch_profile(
    store: Arc<dyn ProfileStore>,
    state: Arc<Mutex<CacheState>>,
    updates: watch::Sender<ProfileMap>,
    user_id: String,
) {
    let result = store.get(&user_id).await;

    let mut state = lock(&state);
    if state.closed {
        debug!("Discarding profile result for {} after close", user_id);
        return;
    }

    match result {
        Ok(Some(profile)) => {
            debug!("Details fetched for {}: {}", user_id, profile.display_name);
            state.lookups.remove(&user_id);
            state.profiles.insert(user_id, profile);
            updates.send_replace(state.profiles.clone());
        }
        Ok(None) => {
            warn!("Profile not found for {}", user_id);
            state.lookups.insert(user_id, Lookup::Missing);
        }
        Err(e) => {
            warn!("Error fetching profile for {}: {}", user_id, e);
            // Allow a later resolve to retry.
            state.lookups.remove(&user_id);
        }
    }
}

fn lock(state: &Mutex<CacheState>) -> MutexGuard<'_, CacheState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
