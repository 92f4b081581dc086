//! Value types crossing the store API.

use serde::{Deserialize, Serialize};

/// Symmetric key material issued by the server for app state sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppStateSyncKey {
    pub key_data: Vec<u8>,
    /// Server-issued key timestamp (unix milliseconds, opaque to the store).
    pub timestamp: i64,
    pub fingerprint: Vec<u8>,
}

/// One (index MAC -> value MAC) journal entry for an app state patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppStateMutationMAC {
    pub index_mac: Vec<u8>,
    pub value_mac: Vec<u8>,
}
