//! Sender key state for group messaging, keyed by (group, member).

use super::DeviceStore;
use crate::db::on_pool;
use crate::error::StoreError;

const PUT_SENDER_KEY: &str =
    "INSERT INTO sender_keys (our_id, chat_id, sender_id, sender_key) VALUES ($1, $2, $3, $4) \
     ON CONFLICT (our_id, chat_id, sender_id) DO UPDATE SET sender_key = excluded.sender_key";
const GET_SENDER_KEY: &str =
    "SELECT sender_key FROM sender_keys WHERE our_id = $1 AND chat_id = $2 AND sender_id = $3";

impl DeviceStore {
    pub async fn put_sender_key(
        &self,
        chat_id: &str,
        sender_id: &str,
        sender_key: &[u8],
    ) -> Result<(), StoreError> {
        on_pool!(&self.db.inner, pool => {
            sqlx::query(PUT_SENDER_KEY)
                .bind(self.owner())
                .bind(chat_id)
                .bind(sender_id)
                .bind(sender_key)
                .execute(pool)
                .await
                .map(|_| ())
        })?;
        Ok(())
    }

    pub async fn get_sender_key(
        &self,
        chat_id: &str,
        sender_id: &str,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let key = on_pool!(&self.db.inner, pool => {
            sqlx::query_scalar::<_, Vec<u8>>(GET_SENDER_KEY)
                .bind(self.owner())
                .bind(chat_id)
                .bind(sender_id)
                .fetch_optional(pool)
                .await
        })?;
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use crate::store::testutil::test_store;

    #[tokio::test]
    async fn sender_key_round_trip_and_overwrite() {
        let (_db, store) = test_store().await;
        assert!(store
            .get_sender_key("group@test", "member@test")
            .await
            .unwrap()
            .is_none());

        store
            .put_sender_key("group@test", "member@test", b"chain-v1")
            .await
            .unwrap();
        store
            .put_sender_key("group@test", "member@test", b"chain-v2")
            .await
            .unwrap();

        assert_eq!(
            store
                .get_sender_key("group@test", "member@test")
                .await
                .unwrap()
                .as_deref(),
            Some(&b"chain-v2"[..])
        );
    }

    #[tokio::test]
    async fn sender_keys_are_keyed_per_member() {
        let (_db, store) = test_store().await;
        store
            .put_sender_key("group@test", "alice@test", b"alice-chain")
            .await
            .unwrap();
        assert!(store
            .get_sender_key("group@test", "bob@test")
            .await
            .unwrap()
            .is_none());
    }
}
