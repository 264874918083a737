use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{FromRow, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::store::{AppendOptions, EventStore, batch_target};
use crate::{AggregateId, EventEnvelope, EventId, EventStoreError, Result, Version};

const MAX_CONNECTIONS: u32 = 10;

const SELECT_EVENTS: &str = "SELECT id, event_type, aggregate_id, aggregate_type, version, \
     timestamp, payload, metadata FROM events";

/// Constraint backing the per-stream version check.
const VERSION_CONSTRAINT: &str = "unique_aggregate_version";

/// Event store on a PostgreSQL `events` table.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

#[derive(FromRow)]
struct EventRow {
    id: Uuid,
    event_type: String,
    aggregate_id: Uuid,
    aggregate_type: String,
    version: i64,
    timestamp: DateTime<Utc>,
    payload: Value,
    metadata: Json<HashMap<String, Value>>,
}

impl From<EventRow> for EventEnvelope {
    fn from(row: EventRow) -> Self {
        Self {
            event_id: EventId::from(row.id),
            event_type: row.event_type,
            aggregate_id: AggregateId::from(row.aggregate_id),
            aggregate_type: row.aggregate_type,
            version: Version::new(row.version),
            timestamp: row.timestamp,
            payload: row.payload,
            metadata: row.metadata.0,
        }
    }
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        let (aggregate_id, start) = batch_target(&events)?;
        let mut tx = self.pool.begin().await?;

        if options.expected_version.is_some() {
            let current: i64 = sqlx::query_scalar(
                "SELECT COALESCE(MAX(version), 0) FROM events WHERE aggregate_id = $1",
            )
            .bind(aggregate_id.as_uuid())
            .fetch_one(&mut *tx)
            .await?;
            options.check(aggregate_id, Version::new(current))?;
        }

        let mut insert: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO events \
             (id, event_type, aggregate_id, aggregate_type, version, timestamp, payload, metadata) ",
        );
        insert.push_values(&events, |mut row, event| {
            row.push_bind(event.event_id.as_uuid())
                .push_bind(&event.event_type)
                .push_bind(event.aggregate_id.as_uuid())
                .push_bind(&event.aggregate_type)
                .push_bind(event.version.as_i64())
                .push_bind(event.timestamp)
                .push_bind(&event.payload)
                .push_bind(Json(&event.metadata));
        });

        insert.build().execute(&mut *tx).await.map_err(|err| {
            let violated = err
                .as_database_error()
                .and_then(|db| db.constraint())
                .is_some_and(|constraint| constraint == VERSION_CONSTRAINT);
            if violated {
                EventStoreError::ConcurrencyConflict {
                    aggregate_id,
                    expected: options.expected_version.unwrap_or_default(),
                    actual: start,
                }
            } else {
                EventStoreError::Database(err)
            }
        })?;
        tx.commit().await?;

        let head = events.last().map_or_else(Version::initial, |event| event.version);
        metrics::counter!("event_store_events_appended_total", "backend" => "postgres")
            .increment(events.len() as u64);
        tracing::debug!(%aggregate_id, version = %head, count = events.len(), "events appended");
        Ok(head)
    }

    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>> {
        let sql = format!("{SELECT_EVENTS} WHERE aggregate_id = $1 ORDER BY version");
        let rows: Vec<EventRow> = sqlx::query_as(&sql)
            .bind(aggregate_id.as_uuid())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(EventEnvelope::from).collect())
    }

    async fn get_events_by_type(&self, event_type: &str) -> Result<Vec<EventEnvelope>> {
        let sql = format!("{SELECT_EVENTS} WHERE event_type = $1 ORDER BY timestamp, id");
        let rows: Vec<EventRow> = sqlx::query_as(&sql)
            .bind(event_type)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(EventEnvelope::from).collect())
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        let head: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM events WHERE aggregate_id = $1")
                .bind(aggregate_id.as_uuid())
                .fetch_one(&self.pool)
                .await?;
        Ok(head.map(Version::new))
    }

    async fn aggregate_ids_by_type(&self, aggregate_type: &str) -> Result<Vec<AggregateId>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT aggregate_id FROM events \
             WHERE aggregate_type = $1 AND version = 1 \
             ORDER BY timestamp, aggregate_id",
        )
        .bind(aggregate_type)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().map(AggregateId::from).collect())
    }
}
