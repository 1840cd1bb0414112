//! Storage Module
//!
//! Account storage behind the login and registration routes.
//!
//! The request handler only depends on the [`CredentialStore`] trait; the
//! server ships with [`InMemoryCredentialStore`], a sharded `RwLock`
//! map that lives for the lifetime of the process.
//!
//! ## Example
//!
//! ```
//! use miniserver::storage::{CredentialStore, InMemoryCredentialStore};
//! use std::sync::Arc;
//!
//! let store: Arc<dyn CredentialStore> = Arc::new(InMemoryCredentialStore::new());
//! assert!(store.insert("ariz", "pw"));
//! assert!(store.verify("ariz", "pw", true));
//! ```

pub mod credentials;

pub use credentials::{CredentialStats, CredentialStore, InMemoryCredentialStore};
