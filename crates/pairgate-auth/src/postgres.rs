//! Postgres-backed session store

use async_trait::async_trait;
use pairgate_core::{AuthState, SessionId};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use tracing::{debug, info};

use crate::storage::{SessionStore, StorageResult};

const MAX_CONNECTIONS: u32 = 5;

/// Session records in the `pairgate_sessions` table
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    /// Connect and make sure the table exists
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect(database_url)
            .await?;
        let store = Self::with_pool(pool);
        store.ensure_schema().await?;
        info!("Connected to Postgres session store");
        Ok(store)
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn ensure_schema(&self) -> StorageResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pairgate_sessions (
                session_id TEXT PRIMARY KEY,
                creds JSONB NOT NULL,
                keys JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn save(&self, session_id: &SessionId, auth: &AuthState) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO pairgate_sessions (session_id, creds, keys, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (session_id) DO UPDATE SET
                creds = EXCLUDED.creds,
                keys = EXCLUDED.keys,
                updated_at = NOW()
            "#,
        )
        .bind(session_id.as_str())
        .bind(Json(&auth.creds))
        .bind(Json(&auth.keys))
        .execute(&self.pool)
        .await?;
        debug!("Upserted session {}", session_id);
        Ok(())
    }

    async fn get(&self, session_id: &SessionId) -> StorageResult<Option<AuthState>> {
        let row = sqlx::query_as::<_, (Json<Value>, Json<Value>)>(
            "SELECT creds, keys FROM pairgate_sessions WHERE session_id = $1",
        )
        .bind(session_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(creds, keys)| AuthState::new(creds.0, keys.0)))
    }

    async fn delete(&self, session_id: &SessionId) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM pairgate_sessions WHERE session_id = $1")
            .bind(session_id.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() > 0 {
            debug!("Deleted session {}", session_id);
        }
        Ok(())
    }
}
