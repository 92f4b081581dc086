//! veil_store — persistent key & session store for the Veil messenger client.
//!
//! One [`DeviceStore`] holds everything a single owned device address needs
//! to run the encryption protocol against its peers:
//!
//! - the trust table of peer identity keys (trust on first use),
//! - per-peer serialized session state,
//! - the pool of one-time prekeys with a monotonic, never-reused id space,
//! - per-group sender key state,
//! - app state sync keys, version counters and the mutation MAC journal that
//!   keeps the replicated app state consistent with the server copy.
//!
//! The store is a passive, thread-safe facade over a relational backend
//! ([`Database`]: SQLite or Postgres via sqlx). It runs no background work,
//! and the only in-process shared mutable state is the prekey allocation
//! lock. Cryptographic primitives and the wire protocol live elsewhere; key
//! material passes through here as opaque bytes with fixed expected lengths.

pub mod db;
pub mod error;
pub mod keys;
pub mod store;
pub mod types;

pub use db::{Database, Dialect};
pub use error::StoreError;
pub use keys::{KeyPair, PreKey};
pub use store::DeviceStore;
pub use types::{AppStateMutationMAC, AppStateSyncKey};
