//! Per-peer serialized session state.  The blob is opaque to the store.

use super::DeviceStore;
use crate::db::on_pool;
use crate::error::StoreError;

const GET_SESSION: &str = "SELECT session FROM sessions WHERE our_id = $1 AND their_id = $2";
const HAS_SESSION: &str = "SELECT 1 FROM sessions WHERE our_id = $1 AND their_id = $2";
const PUT_SESSION: &str = "INSERT INTO sessions (our_id, their_id, session) VALUES ($1, $2, $3) \
     ON CONFLICT (our_id, their_id) DO UPDATE SET session = excluded.session";

impl DeviceStore {
    /// `None` means no session has been established yet — not an error.
    pub async fn get_session(&self, their_id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let session = on_pool!(&self.db.inner, pool => {
            sqlx::query_scalar::<_, Vec<u8>>(GET_SESSION)
                .bind(self.owner())
                .bind(their_id)
                .fetch_optional(pool)
                .await
        })?;
        Ok(session)
    }

    pub async fn has_session(&self, their_id: &str) -> Result<bool, StoreError> {
        let has = on_pool!(&self.db.inner, pool => {
            sqlx::query(HAS_SESSION)
                .bind(self.owner())
                .bind(their_id)
                .fetch_optional(pool)
                .await
                .map(|row| row.is_some())
        })?;
        Ok(has)
    }

    pub async fn put_session(&self, their_id: &str, session: &[u8]) -> Result<(), StoreError> {
        on_pool!(&self.db.inner, pool => {
            sqlx::query(PUT_SESSION)
                .bind(self.owner())
                .bind(their_id)
                .bind(session)
                .execute(pool)
                .await
                .map(|_| ())
        })?;
        Ok(())
    }
}
