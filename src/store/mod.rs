//! The [`DeviceStore`] facade: every table the protocol needs, scoped to one
//! owner identity.

mod app_state;
mod identity;
mod prekeys;
mod sender_key;
mod session;

use tokio::sync::Mutex;

use crate::db::Database;

/// Persistent protocol store for one owned device address.
///
/// Every row written through this handle is keyed by `owner`, so two stores
/// with different owners can safely share one [`Database`].  The store holds
/// no cross-call state apart from the prekey allocation lock; all other
/// consistency comes from the backend's atomic upserts and transactions.
pub struct DeviceStore {
    pub(crate) db: Database,
    owner: String,
    /// Serializes prekey id allocation; see `prekeys.rs`.
    pub(crate) prekey_lock: Mutex<()>,
}

impl DeviceStore {
    pub fn new(db: Database, owner: impl Into<String>) -> Self {
        Self {
            db,
            owner: owner.into(),
            prekey_lock: Mutex::new(()),
        }
    }

    /// The owned device address this store is scoped to.
    pub fn owner(&self) -> &str {
        &self.owner
    }
}
