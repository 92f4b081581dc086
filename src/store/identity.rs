//! Identity trust table: trust-on-first-use peer identity keys.

use super::DeviceStore;
use crate::db::on_pool;
use crate::error::StoreError;

const PUT_IDENTITY: &str = "INSERT INTO identity_keys (our_id, their_id, identity) VALUES ($1, $2, $3) \
     ON CONFLICT (our_id, their_id) DO UPDATE SET identity = excluded.identity";
const GET_IDENTITY: &str =
    "SELECT identity FROM identity_keys WHERE our_id = $1 AND their_id = $2";

impl DeviceStore {
    /// Record (or rotate) the identity key for a peer.  Unconditional upsert.
    pub async fn put_identity(&self, their_id: &str, key: [u8; 32]) -> Result<(), StoreError> {
        on_pool!(&self.db.inner, pool => {
            sqlx::query(PUT_IDENTITY)
                .bind(self.owner())
                .bind(their_id)
                .bind(&key[..])
                .execute(pool)
                .await
                .map(|_| ())
        })?;
        Ok(())
    }

    /// Trust-on-first-use check: an unknown peer is provisionally trusted
    /// (the caller is expected to persist the key afterwards); a known peer
    /// is trusted iff the stored key matches byte for byte.
    pub async fn is_trusted_identity(
        &self,
        their_id: &str,
        key: [u8; 32],
    ) -> Result<bool, StoreError> {
        let stored = on_pool!(&self.db.inner, pool => {
            sqlx::query_scalar::<_, Vec<u8>>(GET_IDENTITY)
                .bind(self.owner())
                .bind(their_id)
                .fetch_optional(pool)
                .await
        })?;
        match stored {
            None => Ok(true),
            Some(existing) => {
                if existing.len() != 32 {
                    tracing::warn!(
                        peer = their_id,
                        len = existing.len(),
                        "stored identity key has illegal length"
                    );
                    return Err(StoreError::InvalidLength {
                        expected: 32,
                        got: existing.len(),
                    });
                }
                Ok(existing == key)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::store::testutil::test_store;

    #[tokio::test]
    async fn unknown_peer_is_trusted_on_first_use() {
        let (_db, store) = test_store().await;
        assert!(store
            .is_trusted_identity("peer@test", [7u8; 32])
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn known_peer_must_match_stored_key_exactly() {
        let (_db, store) = test_store().await;
        store.put_identity("peer@test", [7u8; 32]).await.unwrap();
        assert!(store
            .is_trusted_identity("peer@test", [7u8; 32])
            .await
            .unwrap());
        assert!(!store
            .is_trusted_identity("peer@test", [8u8; 32])
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn put_identity_overwrites_on_key_rotation() {
        let (_db, store) = test_store().await;
        store.put_identity("peer@test", [7u8; 32]).await.unwrap();
        store.put_identity("peer@test", [9u8; 32]).await.unwrap();
        assert!(store
            .is_trusted_identity("peer@test", [9u8; 32])
            .await
            .unwrap());
        assert!(!store
            .is_trusted_identity("peer@test", [7u8; 32])
            .await
            .unwrap());
    }
}
