//! PostgreSQL key-value store

use super::{next_prefix, Database, DatabaseTransaction, KeyValue};
use crate::config::DatabaseConfig;
use crate::error::{BroadcastError, BroadcastResult};

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Row, Transaction};
use tracing::{debug, info};

/// Key-value store backed by a single PostgreSQL table
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    /// Create a new database handle
    pub async fn new(config: &DatabaseConfig) -> BroadcastResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> BroadcastResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key BYTEA PRIMARY KEY,
                value BYTEA NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database migrations complete");
        Ok(())
    }
}

#[async_trait]
impl Database for PgDatabase {
    async fn transaction(&self, writable: bool) -> BroadcastResult<Box<dyn DatabaseTransaction>> {
        let mut txn = self.pool.begin().await?;

        // Check-then-write sequences must not interleave with other writers
        let mode = if writable {
            "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE"
        } else {
            "SET TRANSACTION READ ONLY"
        };
        sqlx::query(mode).execute(&mut *txn).await?;

        Ok(Box::new(PgTransaction { txn, writable }))
    }

    async fn health_check(&self) -> BroadcastResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

struct PgTransaction {
    txn: Transaction<'static, Postgres>,
    writable: bool,
}

impl PgTransaction {
    fn ensure_writable(&self) -> BroadcastResult<()> {
        if self.writable {
            Ok(())
        } else {
            Err(BroadcastError::Storage(
                "write attempted in read-only transaction".to_string(),
            ))
        }
    }
}

#[async_trait]
impl DatabaseTransaction for PgTransaction {
    async fn get(&mut self, key: &[u8]) -> BroadcastResult<Option<Vec<u8>>> {
        let row = sqlx::query("SELECT value FROM kv_store WHERE key = $1")
            .bind(key)
            .fetch_optional(&mut *self.txn)
            .await?;

        Ok(row.map(|r| r.get::<Vec<u8>, _>("value")))
    }

    async fn set(&mut self, key: &[u8], value: Vec<u8>) -> BroadcastResult<()> {
        self.ensure_writable()?;

        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (key)
            DO UPDATE SET value = $2, updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&mut *self.txn)
        .await?;

        Ok(())
    }

    async fn delete(&mut self, key: &[u8]) -> BroadcastResult<()> {
        self.ensure_writable()?;

        sqlx::query("DELETE FROM kv_store WHERE key = $1")
            .bind(key)
            .execute(&mut *self.txn)
            .await?;

        Ok(())
    }

    async fn scan(&mut self, prefix: &[u8]) -> BroadcastResult<Vec<KeyValue>> {
        // bytea compares bytewise, so a prefix is a contiguous key range
        let rows = match next_prefix(prefix) {
            Some(end) => {
                sqlx::query(
                    "SELECT key, value FROM kv_store WHERE key >= $1 AND key < $2 ORDER BY key",
                )
                .bind(prefix)
                .bind(end)
                .fetch_all(&mut *self.txn)
                .await?
            }
            None => {
                sqlx::query("SELECT key, value FROM kv_store WHERE key >= $1 ORDER BY key")
                    .bind(prefix)
                    .fetch_all(&mut *self.txn)
                    .await?
            }
        };

        debug!("Scanned {} entries", rows.len());

        Ok(rows
            .into_iter()
            .map(|row| (row.get::<Vec<u8>, _>("key"), row.get::<Vec<u8>, _>("value")))
            .collect())
    }

    async fn commit(self: Box<Self>) -> BroadcastResult<()> {
        self.txn.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connect() -> PgDatabase {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let config = DatabaseConfig {
            url,
            max_connections: 4,
            min_connections: 1,
        };
        let db = PgDatabase::new(&config).await.unwrap();
        db.run_migrations().await.unwrap();
        db
    }

    #[tokio::test]
    #[ignore = "requires a PostgreSQL instance at DATABASE_URL"]
    async fn test_postgres_transaction_roundtrip() {
        let db = connect().await;
        let key = b"pg-test/roundtrip".to_vec();

        let mut txn = db.transaction(true).await.unwrap();
        txn.set(&key, b"value".to_vec()).await.unwrap();
        txn.commit().await.unwrap();

        let entries = db.scan(b"pg-test/").await.unwrap();
        assert!(entries.contains(&(key.clone(), b"value".to_vec())));

        // Dropped transactions roll back
        let mut txn = db.transaction(true).await.unwrap();
        txn.delete(&key).await.unwrap();
        drop(txn);

        let mut txn = db.transaction(true).await.unwrap();
        assert_eq!(txn.get(&key).await.unwrap(), Some(b"value".to_vec()));
        txn.delete(&key).await.unwrap();
        txn.commit().await.unwrap();
    }
}
