use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;
use tracing::{debug, error};

use crate::classifier::{FixOutcome, MovementClassifier};
use crate::error::StoreError;
use crate::models::{LocationFix, QueuedLocation, TrackingSession};
use crate::store::{check_storable, PendingLocation, SessionUpdate, Store};

pub mod queries;

pub type DbPool = Pool<Sqlite>;

const SESSION_KEY: &str = "tracking_session";

pub async fn init_pool(database_url: &str) -> Result<DbPool> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

    // One connection, kept forever: store calls are serialized and an
    // in-memory database lives as long as the pool.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    sqlx::query(queries::CREATE_KEY_VALUE_TABLE)
        .execute(&pool)
        .await?;
    sqlx::query(queries::CREATE_LOCATION_QUEUE_TABLE)
        .execute(&pool)
        .await?;
    sqlx::query(queries::CREATE_DEAD_LETTER_TABLE)
        .execute(&pool)
        .await?;

    Ok(pool)
}

async fn read_session(conn: &mut SqliteConnection) -> Result<Option<TrackingSession>, StoreError> {
    let row = sqlx::query(queries::SELECT_VALUE)
        .bind(SESSION_KEY)
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(row) => {
            let raw: String = row.try_get("value")?;
            Ok(Some(serde_json::from_str(&raw)?))
        }
        None => Ok(None),
    }
}

async fn write_session(
    conn: &mut SqliteConnection,
    session: &TrackingSession,
) -> Result<(), StoreError> {
    sqlx::query(queries::UPSERT_VALUE)
        .bind(SESSION_KEY)
        .bind(serde_json::to_string(session)?)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn insert_location(
    conn: &mut SqliteConnection,
    item: &QueuedLocation,
) -> Result<i64, StoreError> {
    check_storable(item)?;
    let result = sqlx::query(queries::INSERT_LOCATION)
        .bind(serde_json::to_string(item)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *conn)
        .await?;
    Ok(result.last_insert_rowid())
}

/// SQLite-backed store; the on-device durable equivalent of the platform
/// key-value storage.
#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Rows moved out of the queue because they could not be decoded.
    pub async fn dead_letter_count(&self) -> Result<usize, StoreError> {
        let row = sqlx::query(queries::COUNT_DEAD_LETTERS)
            .fetch_one(&self.pool)
            .await?;
        let dead: i64 = row.try_get("dead")?;
        Ok(dead.max(0) as usize)
    }

    async fn dead_letter(&self, rejected: Vec<(i64, String, String)>) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for (id, payload, reason) in rejected {
            sqlx::query(queries::INSERT_DEAD_LETTER)
                .bind(id)
                .bind(payload)
                .bind(reason)
                .bind(Utc::now().to_rfc3339())
                .execute(&mut *tx)
                .await?;
            sqlx::query(queries::DELETE_LOCATION)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn load_session(&self) -> Result<Option<TrackingSession>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        read_session(&mut conn).await
    }

    async fn replace_session(
        &self,
        session: &TrackingSession,
        first_item: Option<&QueuedLocation>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        write_session(&mut tx, session).await?;
        if let Some(item) = first_item {
            insert_location(&mut tx, item).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn update_session(
        &self,
        apply: SessionUpdate,
    ) -> Result<Option<TrackingSession>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let Some(mut session) = read_session(&mut tx).await? else {
            return Ok(None);
        };
        apply(&mut session);
        write_session(&mut tx, &session).await?;
        tx.commit().await?;
        Ok(Some(session))
    }

    async fn clear_all(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(queries::DELETE_VALUE)
            .bind(SESSION_KEY)
            .execute(&mut *tx)
            .await?;
        let dropped = sqlx::query(queries::DELETE_ALL_LOCATIONS)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        debug!("Cleared session state and {} pending locations", dropped);
        Ok(())
    }

    async fn accept_fix(
        &self,
        fix: &LocationFix,
        classifier: &MovementClassifier,
    ) -> Result<FixOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let session = read_session(&mut tx).await?.filter(|s| s.is_active);
        let Some(mut session) = session else {
            return Ok(FixOutcome::NoSession);
        };

        let outcome = classifier.apply(&mut session, fix);
        if let FixOutcome::Queued(item, _) = &outcome {
            write_session(&mut tx, &session).await?;
            insert_location(&mut tx, item).await?;
            tx.commit().await?;
        }
        Ok(outcome)
    }

    async fn push_location(&self, item: &QueuedLocation) -> Result<i64, StoreError> {
        let mut conn = self.pool.acquire().await?;
        insert_location(&mut conn, item).await
    }

    async fn pending_locations(&self) -> Result<Vec<PendingLocation>, StoreError> {
        let rows = sqlx::query(queries::SELECT_PENDING_LOCATIONS)
            .fetch_all(&self.pool)
            .await?;

        let mut pending = Vec::with_capacity(rows.len());
        let mut rejected = Vec::new();
        for row in rows {
            let id: i64 = row.try_get("id")?;
            let payload: String = row.try_get("payload")?;
            match serde_json::from_str(&payload) {
                Ok(item) => pending.push(PendingLocation { id, item }),
                Err(e) => {
                    error!("Queued location {} is unreadable, moving to dead letter: {}", id, e);
                    rejected.push((id, payload, e.to_string()));
                }
            }
        }

        if !rejected.is_empty() {
            self.dead_letter(rejected).await?;
        }
        Ok(pending)
    }

    async fn remove_location(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query(queries::DELETE_LOCATION)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear_locations(&self) -> Result<(), StoreError> {
        sqlx::query(queries::DELETE_ALL_LOCATIONS)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn count_locations(&self) -> Result<usize, StoreError> {
        let row = sqlx::query(queries::COUNT_LOCATIONS)
            .fetch_one(&self.pool)
            .await?;
        let pending: i64 = row.try_get("pending")?;
        Ok(pending.max(0) as usize)
    }
}
