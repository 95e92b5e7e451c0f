//! Postgres-backed `Store` implementation.
//!
//! Grounded on the teacher's `db.rs` pool bootstrap and query style, but
//! using runtime-checked `sqlx::query`/`sqlx::query_as` rather than the
//! compile-time `query!`/`query_as!` macros — those require a live
//! database connection or a committed `.sqlx` offline cache at build
//! time, neither available here (see DESIGN.md).

use sqlx::PgPool;

use crate::models::device_record::DeviceRecord;
use crate::services::store::{Store, StoreError};

const NONCE_TTL_MINUTES: i64 = 5;

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl Store for PostgresStore {
    async fn issue_nonce(&self, device_id: &str) -> Result<String, StoreError> {
        use base64::{engine::general_purpose::STANDARD, Engine as _};
        use rand::rngs::OsRng;
        use rand::RngCore;

        let mut raw = [0u8; 32];
        OsRng.fill_bytes(&mut raw);
        let nonce = STANDARD.encode(raw);

        sqlx::query(
            r#"
            INSERT INTO device_records (device_id, pending_nonce, nonce_issued_at, counter, created_at, updated_at)
            VALUES ($1, $2, now(), 0, now(), now())
            ON CONFLICT (device_id) DO UPDATE
                SET pending_nonce = EXCLUDED.pending_nonce,
                    nonce_issued_at = EXCLUDED.nonce_issued_at,
                    updated_at = now()
            "#,
        )
        .bind(device_id)
        .bind(&nonce)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(nonce)
    }

    async fn lookup_pending_nonce(&self, device_id: &str) -> Result<Option<String>, StoreError> {
        let record = sqlx::query_as::<_, DeviceRecord>(
            r#"SELECT * FROM device_records WHERE device_id = $1"#,
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        let Some(record) = record else {
            return Ok(None);
        };
        let expired = record
            .nonce_issued_at
            .map(|issued| chrono::Utc::now() - issued > chrono::Duration::minutes(NONCE_TTL_MINUTES))
            .unwrap_or(true);
        if expired {
            return Ok(None);
        }
        Ok(record.pending_nonce)
    }

    async fn lookup_by_key_and_device(
        &self,
        device_id: &str,
        key_id: &str,
    ) -> Result<Option<DeviceRecord>, StoreError> {
        sqlx::query_as::<_, DeviceRecord>(
            r#"SELECT * FROM device_records WHERE device_id = $1 AND key_id = $2"#,
        )
        .bind(device_id)
        .bind(key_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn upsert_attestation(
        &self,
        device_id: &str,
        key_id: &str,
        public_key_pem: &str,
    ) -> Result<(), StoreError> {
        let record = sqlx::query_as::<_, DeviceRecord>(
            r#"SELECT * FROM device_records WHERE device_id = $1"#,
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?
        .ok_or(StoreError::NoPendingNonce)?;

        if record.pending_nonce.is_none() {
            return Err(StoreError::NoPendingNonce);
        }
        let expired = record
            .nonce_issued_at
            .map(|issued| chrono::Utc::now() - issued > chrono::Duration::minutes(NONCE_TTL_MINUTES))
            .unwrap_or(true);
        if expired {
            return Err(StoreError::StaleNonce);
        }

        sqlx::query(
            r#"
            UPDATE device_records
            SET key_id = $2,
                public_key_pem = $3,
                pending_nonce = NULL,
                nonce_issued_at = NULL,
                counter = 0,
                updated_at = now()
            WHERE device_id = $1
            "#,
        )
        .bind(device_id)
        .bind(key_id)
        .bind(public_key_pem)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn advance_counter(
        &self,
        device_id: &str,
        key_id: &str,
        expected_prior: u32,
        new_counter: u32,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE device_records
            SET counter = $4,
                updated_at = now()
            WHERE device_id = $1 AND key_id = $2 AND counter = $3
            "#,
        )
        .bind(device_id)
        .bind(key_id)
        .bind(i64::from(expected_prior))
        .bind(i64::from(new_counter))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query_as::<_, DeviceRecord>(
                r#"SELECT * FROM device_records WHERE device_id = $1 AND key_id = $2"#,
            )
            .bind(device_id)
            .bind(key_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

            return Err(match exists {
                Some(_) => StoreError::ConcurrentModification,
                None => StoreError::NoKeyForDevice,
            });
        }

        Ok(())
    }
}
