//! App state sync storage: sync keys, version/hash pairs, and the mutation
//! MAC journal used to detect and roll back conflicting patches.

use super::DeviceStore;
use crate::db::{on_pool, Db};
use crate::error::StoreError;
use crate::types::{AppStateMutationMAC, AppStateSyncKey};

const PUT_SYNC_KEY: &str = "INSERT INTO app_state_sync_keys (our_id, key_id, key_data, timestamp, fingerprint) \
     VALUES ($1, $2, $3, $4, $5) \
     ON CONFLICT (our_id, key_id) DO UPDATE SET key_data = excluded.key_data, \
     timestamp = excluded.timestamp, fingerprint = excluded.fingerprint";
const GET_SYNC_KEY: &str = "SELECT key_data, timestamp, fingerprint FROM app_state_sync_keys \
     WHERE our_id = $1 AND key_id = $2";

const PUT_VERSION: &str = "INSERT INTO app_state_versions (our_id, name, version, hash) VALUES ($1, $2, $3, $4) \
     ON CONFLICT (our_id, name) DO UPDATE SET version = excluded.version, hash = excluded.hash";
const GET_VERSION: &str =
    "SELECT version, hash FROM app_state_versions WHERE our_id = $1 AND name = $2";
const DELETE_VERSION: &str = "DELETE FROM app_state_versions WHERE our_id = $1 AND name = $2";

const DELETE_MUTATION_MACS_POSTGRES: &str = "DELETE FROM app_state_mutation_macs \
     WHERE our_id = $1 AND name = $2 AND index_mac = ANY($3)";
const DELETE_MUTATION_MACS_GENERIC: &str = "DELETE FROM app_state_mutation_macs \
     WHERE our_id = $1 AND name = $2 AND index_mac IN ";
const GET_MUTATION_MAC: &str = "SELECT value_mac FROM app_state_mutation_macs \
     WHERE our_id = $1 AND name = $2 AND index_mac = $3 ORDER BY version DESC LIMIT 1";

/// Rows per INSERT statement and index MACs per expanded DELETE.  400 insert
/// rows bind 803 parameters (two per row plus the three shared ones), staying
/// under SQLite's default host parameter limit of 999.
const MUTATION_BATCH_SIZE: usize = 400;

fn put_mutation_macs_sql(rows: usize) -> String {
    let mut sql = String::from(
        "INSERT INTO app_state_mutation_macs (our_id, name, version, index_mac, value_mac) VALUES ",
    );
    for i in 0..rows {
        if i > 0 {
            sql.push(',');
        }
        let base = 3 + i * 2;
        sql.push_str(&format!("($1, $2, $3, ${}, ${})", base + 1, base + 2));
    }
    sql
}

impl DeviceStore {
    pub async fn put_app_state_sync_key(
        &self,
        key_id: &[u8],
        key: &AppStateSyncKey,
    ) -> Result<(), StoreError> {
        on_pool!(&self.db.inner, pool => {
            sqlx::query(PUT_SYNC_KEY)
                .bind(self.owner())
                .bind(key_id)
                .bind(&key.key_data)
                .bind(key.timestamp)
                .bind(&key.fingerprint)
                .execute(pool)
                .await
                .map(|_| ())
        })?;
        Ok(())
    }

    /// `None` means the server has not issued this key (yet) — not an error.
    pub async fn get_app_state_sync_key(
        &self,
        key_id: &[u8],
    ) -> Result<Option<AppStateSyncKey>, StoreError> {
        let row = on_pool!(&self.db.inner, pool => {
            sqlx::query_as::<_, (Vec<u8>, i64, Vec<u8>)>(GET_SYNC_KEY)
                .bind(self.owner())
                .bind(key_id)
                .fetch_optional(pool)
                .await
        })?;
        Ok(row.map(|(key_data, timestamp, fingerprint)| AppStateSyncKey {
            key_data,
            timestamp,
            fingerprint,
        }))
    }

    pub async fn put_app_state_version(
        &self,
        name: &str,
        version: u64,
        hash: [u8; 128],
    ) -> Result<(), StoreError> {
        on_pool!(&self.db.inner, pool => {
            sqlx::query(PUT_VERSION)
                .bind(self.owner())
                .bind(name)
                .bind(version as i64)
                .bind(&hash[..])
                .execute(pool)
                .await
                .map(|_| ())
        })?;
        Ok(())
    }

    /// Absence is the defined initial state for a never-synced name:
    /// `(0, [0; 128])`, not an error.
    pub async fn get_app_state_version(
        &self,
        name: &str,
    ) -> Result<(u64, [u8; 128]), StoreError> {
        let row = on_pool!(&self.db.inner, pool => {
            sqlx::query_as::<_, (i64, Vec<u8>)>(GET_VERSION)
                .bind(self.owner())
                .bind(name)
                .fetch_optional(pool)
                .await
        })?;
        match row {
            None => Ok((0, [0u8; 128])),
            Some((version, hash)) => {
                let hash: [u8; 128] = hash.try_into().map_err(|v: Vec<u8>| {
                    tracing::warn!(state = name, len = v.len(), "stored app state hash has illegal length");
                    StoreError::InvalidLength {
                        expected: 128,
                        got: v.len(),
                    }
                })?;
                Ok((version as u64, hash))
            }
        }
    }

    /// Reset a state name to its initial state on next read.
    pub async fn delete_app_state_version(&self, name: &str) -> Result<(), StoreError> {
        on_pool!(&self.db.inner, pool => {
            sqlx::query(DELETE_VERSION)
                .bind(self.owner())
                .bind(name)
                .execute(pool)
                .await
                .map(|_| ())
        })?;
        Ok(())
    }

    /// Append a batch of journal entries tagged with `version`.  Large
    /// batches are chunked (400 rows per statement); when more than one
    /// chunk is needed, all chunks run inside a single transaction so a
    /// failure never leaves half a patch behind.
    pub async fn put_app_state_mutation_macs(
        &self,
        name: &str,
        version: u64,
        mutations: &[AppStateMutationMAC],
    ) -> Result<(), StoreError> {
        if mutations.is_empty() {
            return Ok(());
        }
        if mutations.len() > MUTATION_BATCH_SIZE {
            on_pool!(&self.db.inner, pool => {
                let mut tx = pool
                    .begin()
                    .await
                    .map_err(|e| StoreError::query("start mutation MAC transaction", e))?;
                for chunk in mutations.chunks(MUTATION_BATCH_SIZE) {
                    // An error here drops `tx`, rolling the whole batch back.
                    let sql = put_mutation_macs_sql(chunk.len());
                    let mut query = sqlx::query(&sql)
                        .bind(self.owner())
                        .bind(name)
                        .bind(version as i64);
                    for mutation in chunk {
                        query = query.bind(&mutation.index_mac).bind(&mutation.value_mac);
                    }
                    query.execute(&mut *tx).await?;
                }
                tx.commit()
                    .await
                    .map_err(|e| StoreError::query("commit mutation MAC transaction", e))
            })?;
        } else {
            let sql = put_mutation_macs_sql(mutations.len());
            on_pool!(&self.db.inner, pool => {
                let mut query = sqlx::query(&sql)
                    .bind(self.owner())
                    .bind(name)
                    .bind(version as i64);
                for mutation in mutations {
                    query = query.bind(&mutation.index_mac).bind(&mutation.value_mac);
                }
                query.execute(pool).await.map(|_| ())
            })?;
        }
        Ok(())
    }

    /// Delete every journal row matching any of the given index MACs for
    /// this state name, across all versions.  Postgres gets a single
    /// array-parameter predicate; SQLite an expanded placeholder list,
    /// chunked like the insert path so large sets stay under the host
    /// parameter limit.  A no-op for an empty input.
    pub async fn delete_app_state_mutation_macs(
        &self,
        name: &str,
        index_macs: &[Vec<u8>],
    ) -> Result<(), StoreError> {
        if index_macs.is_empty() {
            return Ok(());
        }
        match &self.db.inner {
            Db::Postgres(pool) => {
                sqlx::query(DELETE_MUTATION_MACS_POSTGRES)
                    .bind(self.owner())
                    .bind(name)
                    .bind(index_macs)
                    .execute(pool)
                    .await?;
            }
            Db::Sqlite(pool) => {
                for chunk in index_macs.chunks(MUTATION_BATCH_SIZE) {
                    let placeholders: Vec<String> = (0..chunk.len())
                        .map(|i| format!("${}", i + 3))
                        .collect();
                    let sql = format!(
                        "{}({})",
                        DELETE_MUTATION_MACS_GENERIC,
                        placeholders.join(",")
                    );
                    let mut query = sqlx::query(&sql).bind(self.owner()).bind(name);
                    for mac in chunk {
                        query = query.bind(mac);
                    }
                    query.execute(pool).await?;
                }
            }
        }
        Ok(())
    }

    /// Value MAC from the highest version recorded for `index_mac`.
    pub async fn get_app_state_mutation_mac(
        &self,
        name: &str,
        index_mac: &[u8],
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let mac = on_pool!(&self.db.inner, pool => {
            sqlx::query_scalar::<_, Vec<u8>>(GET_MUTATION_MAC)
                .bind(self.owner())
                .bind(name)
                .bind(index_mac)
                .fetch_optional(pool)
                .await
        })?;
        Ok(mac)
    }
}

#[cfg(test)]
mod tests {
    use crate::store::testutil::test_store;
    use crate::types::{AppStateMutationMAC, AppStateSyncKey};

    fn mac_pair(index: &str, value: &str) -> AppStateMutationMAC {
        AppStateMutationMAC {
            index_mac: hex::decode(index).unwrap(),
            value_mac: hex::decode(value).unwrap(),
        }
    }

    #[tokio::test]
    async fn sync_key_lookup_distinguishes_absent_from_stored() {
        let (_db, store) = test_store().await;
        assert!(store.get_app_state_sync_key(b"key-1").await.unwrap().is_none());

        let key = AppStateSyncKey {
            key_data: vec![1; 32],
            timestamp: 1_700_000_000_000,
            fingerprint: vec![2; 6],
        };
        store.put_app_state_sync_key(b"key-1", &key).await.unwrap();
        assert_eq!(
            store.get_app_state_sync_key(b"key-1").await.unwrap(),
            Some(key)
        );
    }

    #[tokio::test]
    async fn sync_key_put_overwrites() {
        let (_db, store) = test_store().await;
        let old = AppStateSyncKey {
            key_data: vec![1; 32],
            timestamp: 1,
            fingerprint: vec![0xaa],
        };
        let new = AppStateSyncKey {
            key_data: vec![9; 32],
            timestamp: 2,
            fingerprint: vec![0xbb],
        };
        store.put_app_state_sync_key(b"key-1", &old).await.unwrap();
        store.put_app_state_sync_key(b"key-1", &new).await.unwrap();
        assert_eq!(
            store.get_app_state_sync_key(b"key-1").await.unwrap(),
            Some(new)
        );
    }

    #[tokio::test]
    async fn version_absence_is_the_initial_state() {
        let (_db, store) = test_store().await;
        assert_eq!(
            store.get_app_state_version("critical_block").await.unwrap(),
            (0, [0u8; 128])
        );

        let hash = [3u8; 128];
        store
            .put_app_state_version("critical_block", 5, hash)
            .await
            .unwrap();
        assert_eq!(
            store.get_app_state_version("critical_block").await.unwrap(),
            (5, hash)
        );

        store.delete_app_state_version("critical_block").await.unwrap();
        assert_eq!(
            store.get_app_state_version("critical_block").await.unwrap(),
            (0, [0u8; 128])
        );
    }

    #[tokio::test]
    async fn highest_version_wins_the_mutation_mac_lookup() {
        let (_db, store) = test_store().await;
        let v3 = mac_pair("0102", "aaaa");
        let v7 = mac_pair("0102", "bbbb");
        store
            .put_app_state_mutation_macs("regular", 3, &[v3])
            .await
            .unwrap();
        store
            .put_app_state_mutation_macs("regular", 7, &[v7.clone()])
            .await
            .unwrap();

        assert_eq!(
            store
                .get_app_state_mutation_mac("regular", &v7.index_mac)
                .await
                .unwrap(),
            Some(v7.value_mac)
        );
    }

    #[tokio::test]
    async fn delete_removes_all_versions_of_the_given_index_macs() {
        let (_db, store) = test_store().await;
        let kept = mac_pair("01", "a1");
        let doomed_v1 = mac_pair("02", "b1");
        let doomed_v2 = mac_pair("02", "b2");
        store
            .put_app_state_mutation_macs("regular", 1, &[kept.clone(), doomed_v1.clone()])
            .await
            .unwrap();
        store
            .put_app_state_mutation_macs("regular", 2, &[doomed_v2])
            .await
            .unwrap();

        store
            .delete_app_state_mutation_macs("regular", &[doomed_v1.index_mac.clone()])
            .await
            .unwrap();

        assert!(store
            .get_app_state_mutation_mac("regular", &doomed_v1.index_mac)
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            store
                .get_app_state_mutation_mac("regular", &kept.index_mac)
                .await
                .unwrap(),
            Some(kept.value_mac)
        );
    }

    #[tokio::test]
    async fn empty_inputs_are_no_ops() {
        let (_db, store) = test_store().await;
        store
            .put_app_state_mutation_macs("regular", 1, &[])
            .await
            .unwrap();
        store
            .delete_app_state_mutation_macs("regular", &[])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn journal_rows_are_scoped_by_state_name() {
        let (_db, store) = test_store().await;
        let entry = mac_pair("0a", "0b");
        store
            .put_app_state_mutation_macs("regular", 1, &[entry.clone()])
            .await
            .unwrap();
        assert!(store
            .get_app_state_mutation_mac("critical_block", &entry.index_mac)
            .await
            .unwrap()
            .is_none());
    }
}
