//! One-time prekey pool with a monotonic, never-reused id allocator.
//!
//! The next id is derived from `MAX(key_id)`, so the exclusive lock must be
//! held from the id query through key generation and the insert; two
//! concurrent replenishments could otherwise allocate the same id.

use super::DeviceStore;
use crate::db::on_pool;
use crate::error::StoreError;
use crate::keys::{KeyPair, PreKey};

const GET_LAST_PREKEY_ID: &str = "SELECT MAX(key_id) FROM prekeys WHERE our_id = $1";
const INSERT_PREKEY: &str =
    "INSERT INTO prekeys (our_id, key_id, key, uploaded) VALUES ($1, $2, $3, $4)";
const GET_UNUPLOADED_PREKEYS: &str = "SELECT key_id, key FROM prekeys \
     WHERE our_id = $1 AND uploaded = false ORDER BY key_id LIMIT $2";
const GET_PREKEY: &str = "SELECT key_id, key FROM prekeys WHERE our_id = $1 AND key_id = $2";
const DELETE_PREKEY: &str = "DELETE FROM prekeys WHERE our_id = $1 AND key_id = $2";
const MARK_PREKEYS_UPLOADED: &str =
    "UPDATE prekeys SET uploaded = true WHERE our_id = $1 AND key_id <= $2";
const COUNT_UPLOADED_PREKEYS: &str =
    "SELECT COUNT(*) FROM prekeys WHERE our_id = $1 AND uploaded = true";

fn prekey_from_row(key_id: i64, private: Vec<u8>) -> Result<PreKey, StoreError> {
    let private: [u8; 32] = private.try_into().map_err(|v: Vec<u8>| {
        tracing::warn!(key_id, len = v.len(), "stored prekey has illegal length");
        StoreError::InvalidLength {
            expected: 32,
            got: v.len(),
        }
    })?;
    Ok(PreKey {
        key_id: key_id as u32,
        key_pair: KeyPair::from_private(private),
    })
}

impl DeviceStore {
    /// `MAX(key_id) + 1`, starting at 1 for a fresh owner.  Only call while
    /// holding `prekey_lock`.
    async fn next_prekey_id(&self) -> Result<u32, StoreError> {
        let last = on_pool!(&self.db.inner, pool => {
            sqlx::query_scalar::<_, Option<i64>>(GET_LAST_PREKEY_ID)
                .bind(self.owner())
                .fetch_one(pool)
                .await
        })
        .map_err(|e| StoreError::query("query next prekey ID", e))?;
        Ok(last.unwrap_or(0) as u32 + 1)
    }

    async fn insert_prekey(&self, key: &PreKey, uploaded: bool) -> Result<(), StoreError> {
        on_pool!(&self.db.inner, pool => {
            sqlx::query(INSERT_PREKEY)
                .bind(self.owner())
                .bind(key.key_id as i64)
                .bind(&key.key_pair.private_bytes()[..])
                .bind(uploaded)
                .execute(pool)
                .await
                .map(|_| ())
        })?;
        Ok(())
    }

    /// Allocate the next id and persist a fresh key pair for it, already
    /// flagged as uploaded.
    pub async fn gen_one_prekey(&self) -> Result<PreKey, StoreError> {
        let _guard = self.prekey_lock.lock().await;
        let key = PreKey::generate(self.next_prekey_id().await?);
        self.insert_prekey(&key, true).await?;
        Ok(key)
    }

    /// Return exactly `count` prekeys for upload: existing not-yet-uploaded
    /// keys in ascending id order first, then freshly generated ones
    /// (unuploaded) continuing the id sequence.
    pub async fn get_or_gen_prekeys(&self, count: u32) -> Result<Vec<PreKey>, StoreError> {
        let _guard = self.prekey_lock.lock().await;

        let rows = on_pool!(&self.db.inner, pool => {
            sqlx::query_as::<_, (i64, Vec<u8>)>(GET_UNUPLOADED_PREKEYS)
                .bind(self.owner())
                .bind(count as i64)
                .fetch_all(pool)
                .await
        })
        .map_err(|e| StoreError::query("query existing prekeys", e))?;

        let mut prekeys = Vec::with_capacity(count as usize);
        for (key_id, private) in rows {
            prekeys.push(prekey_from_row(key_id, private)?);
        }

        if (prekeys.len() as u32) < count {
            let mut next_id = self.next_prekey_id().await?;
            tracing::debug!(
                existing = prekeys.len(),
                total = count,
                "generating prekeys to fill batch"
            );
            while (prekeys.len() as u32) < count {
                let key = PreKey::generate(next_id);
                self.insert_prekey(&key, false).await?;
                prekeys.push(key);
                next_id += 1;
            }
        }

        Ok(prekeys)
    }

    pub async fn get_prekey(&self, key_id: u32) -> Result<Option<PreKey>, StoreError> {
        let row = on_pool!(&self.db.inner, pool => {
            sqlx::query_as::<_, (i64, Vec<u8>)>(GET_PREKEY)
                .bind(self.owner())
                .bind(key_id as i64)
                .fetch_optional(pool)
                .await
        })?;
        row.map(|(id, private)| prekey_from_row(id, private))
            .transpose()
    }

    /// Delete a consumed prekey.  The id is permanently retired: callers
    /// only remove keys the peer has already consumed, whose ids the
    /// `MAX(key_id)`-based allocator has moved past, so it never reissues
    /// them.
    pub async fn remove_prekey(&self, key_id: u32) -> Result<(), StoreError> {
        on_pool!(&self.db.inner, pool => {
            sqlx::query(DELETE_PREKEY)
                .bind(self.owner())
                .bind(key_id as i64)
                .execute(pool)
                .await
                .map(|_| ())
        })?;
        Ok(())
    }

    /// Flag every key with id <= `up_to_id` as published to the server.
    pub async fn mark_prekeys_as_uploaded(&self, up_to_id: u32) -> Result<(), StoreError> {
        on_pool!(&self.db.inner, pool => {
            sqlx::query(MARK_PREKEYS_UPLOADED)
                .bind(self.owner())
                .bind(up_to_id as i64)
                .execute(pool)
                .await
                .map(|_| ())
        })?;
        Ok(())
    }

    pub async fn uploaded_prekey_count(&self) -> Result<usize, StoreError> {
        let count = on_pool!(&self.db.inner, pool => {
            sqlx::query_scalar::<_, i64>(COUNT_UPLOADED_PREKEYS)
                .bind(self.owner())
                .fetch_one(pool)
                .await
        })?;
        Ok(count as usize)
    }
}
