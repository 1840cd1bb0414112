//! Thread-Safe Credential Store
//!
//! Username/password lookups for the login and registration form routes.
//! Requests for these routes are handled on worker threads, so the store is
//! shared by every worker and must tolerate concurrent access.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 InMemoryCredentialStore                     │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │           │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Usernames are hashed to a shard, so logins for different users never
//! contend on the same lock.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

/// Number of shards in the in-memory store.
const NUM_SHARDS: usize = 16;

/// Lookup/insert service backing the form routes.
pub trait CredentialStore: Send + Sync {
    /// Stored password for `username`, if the user exists.
    fn password(&self, username: &str) -> Option<String>;

    /// Creates a user. Returns `false` if the name is already taken.
    fn insert(&self, username: &str, password: &str) -> bool;

    /// Checks a login attempt or performs a registration.
    ///
    /// - empty username or password: rejected
    /// - login: succeeds only for an existing user with a matching password
    /// - registration: succeeds only when the name is free, and creates it
    fn verify(&self, username: &str, password: &str, is_login: bool) -> bool {
        if username.is_empty() || password.is_empty() {
            return false;
        }
        match (self.password(username), is_login) {
            (Some(stored), true) => stored == password,
            (Some(_), false) => false,
            (None, true) => false,
            (None, false) => self.insert(username, password),
        }
    }
}

/// Snapshot of store counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CredentialStats {
    pub users: u64,
    pub lookups: u64,
    pub registrations: u64,
}

/// Sharded in-memory [`CredentialStore`].
///
/// # Example
///
/// ```
/// use miniserver::storage::{CredentialStore, InMemoryCredentialStore};
///
/// let store = InMemoryCredentialStore::new();
/// assert!(store.verify("ariz", "secret", false)); // register
/// assert!(store.verify("ariz", "secret", true)); // login
/// assert!(!store.verify("ariz", "wrong", true));
/// ```
pub struct InMemoryCredentialStore {
    shards: Vec<RwLock<HashMap<String, String>>>,
    user_count: AtomicU64,
    lookup_count: AtomicU64,
    registration_count: AtomicU64,
}

impl std::fmt::Debug for InMemoryCredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCredentialStore")
            .field("shards", &self.shards.len())
            .field("users", &self.user_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for InMemoryCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self {
            shards: (0..NUM_SHARDS).map(|_| RwLock::new(HashMap::new())).collect(),
            user_count: AtomicU64::new(0),
            lookup_count: AtomicU64::new(0),
            registration_count: AtomicU64::new(0),
        }
    }

    /// Builds a store pre-populated with `users`. Duplicate names keep the
    /// first password.
    pub fn with_users<'a, I>(users: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let store = Self::new();
        for (name, password) in users {
            store.insert(name, password);
        }
        store
    }

    #[inline]
    fn shard(&self, username: &str) -> &RwLock<HashMap<String, String>> {
        let mut hasher = DefaultHasher::new();
        username.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % NUM_SHARDS]
    }

    pub fn contains(&self, username: &str) -> bool {
        self.shard(username)
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(username)
    }

    pub fn len(&self) -> u64 {
        self.user_count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CredentialStats {
        CredentialStats {
            users: self.user_count.load(Ordering::Relaxed),
            lookups: self.lookup_count.load(Ordering::Relaxed),
            registrations: self.registration_count.load(Ordering::Relaxed),
        }
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn password(&self, username: &str) -> Option<String> {
        self.lookup_count.fetch_add(1, Ordering::Relaxed);
        self.shard(username)
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(username)
            .cloned()
    }

    fn insert(&self, username: &str, password: &str) -> bool {
        let mut users = self
            .shard(username)
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        match users.entry(username.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(password.to_string());
                self.user_count.fetch_add(1, Ordering::Relaxed);
                self.registration_count.fetch_add(1, Ordering::Relaxed);
                true
            }
        }
    }
}
