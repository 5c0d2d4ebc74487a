use async_trait::async_trait;
use common::{FlowId, SagaKey};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    EntryId, HistoryEntry, HistoryError, HistoryKind, HistoryQuery, Result,
    store::{HistoryStore, HistoryStream},
};

const SELECT_COLUMNS: &str =
    "SELECT id, saga_key, flow_id, kind, action, details, timestamp FROM flow_history";

/// PostgreSQL-backed history store.
#[derive(Clone)]
pub struct PostgresHistoryStore {
    pool: PgPool,
}

impl PostgresHistoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to the given URL and returns a store over a fresh pool.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_entry(row: PgRow) -> Result<HistoryEntry> {
        let kind: String = row.try_get("kind")?;
        let kind = HistoryKind::parse(&kind)
            .ok_or_else(|| HistoryError::Corrupted(format!("unknown kind '{kind}'")))?;

        Ok(HistoryEntry {
            id: EntryId::from_uuid(row.try_get::<Uuid, _>("id")?),
            saga_key: SagaKey::new(row.try_get::<String, _>("saga_key")?),
            flow_id: row.try_get::<Option<String>, _>("flow_id")?.map(FlowId::new),
            kind,
            action: row.try_get("action")?,
            details: row.try_get("details")?,
            timestamp: row.try_get("timestamp")?,
        })
    }
}

#[async_trait]
impl HistoryStore for PostgresHistoryStore {
    async fn append(&self, entries: Vec<HistoryEntry>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for entry in &entries {
            sqlx::query(
                r#"
                INSERT INTO flow_history (id, saga_key, flow_id, kind, action, details, timestamp)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(entry.id.as_uuid())
            .bind(entry.saga_key.as_str())
            .bind(entry.flow_id.as_ref().map(|f| f.as_str()))
            .bind(entry.kind.as_str())
            .bind(&entry.action)
            .bind(&entry.details)
            .bind(entry.timestamp)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn query(&self, query: HistoryQuery) -> Result<Vec<HistoryEntry>> {
        let mut sql = format!("{SELECT_COLUMNS} WHERE 1=1");
        let mut param_count = 0;

        if query.saga_key.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND saga_key = ${param_count}"));
        }
        if query.flow_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND flow_id = ${param_count}"));
        }
        if query.kinds.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND kind = ANY(${param_count})"));
        }
        if query.from_timestamp.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND timestamp >= ${param_count}"));
        }
        if query.to_timestamp.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND timestamp <= ${param_count}"));
        }

        sql.push_str(" ORDER BY sequence ASC");

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }
        if query.offset.is_some() {
            param_count += 1;
            sql.push_str(&format!(" OFFSET ${param_count}"));
        }

        let mut sqlx_query = sqlx::query(&sql);

        if let Some(key) = query.saga_key {
            sqlx_query = sqlx_query.bind(key.as_str().to_string());
        }
        if let Some(flow_id) = query.flow_id {
            sqlx_query = sqlx_query.bind(flow_id.as_str().to_string());
        }
        if let Some(kinds) = query.kinds {
            let kinds: Vec<String> = kinds.iter().map(|k| k.as_str().to_string()).collect();
            sqlx_query = sqlx_query.bind(kinds);
        }
        if let Some(from_ts) = query.from_timestamp {
            sqlx_query = sqlx_query.bind(from_ts);
        }
        if let Some(to_ts) = query.to_timestamp {
            sqlx_query = sqlx_query.bind(to_ts);
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(limit as i64);
        }
        if let Some(offset) = query.offset {
            sqlx_query = sqlx_query.bind(offset as i64);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_entry).collect()
    }

    async fn stream_all(&self) -> Result<HistoryStream> {
        use futures_util::StreamExt;

        let sql = format!("{SELECT_COLUMNS} ORDER BY sequence ASC");
        let pool = self.pool.clone();
        let stream = async_stream_rows(pool, sql).map(|result| match result {
            Ok(row) => Self::row_to_entry(row),
            Err(e) => Err(HistoryError::Database(e)),
        });

        Ok(Box::pin(stream))
    }
}

// `fetch` borrows both the query text and the pool, so both are moved into
// an owning stream.
fn async_stream_rows(
    pool: PgPool,
    sql: String,
) -> impl futures_core::Stream<Item = std::result::Result<PgRow, sqlx::Error>> + Send {
    use futures_util::{StreamExt, stream};

    stream::once(async move {
        let rows = sqlx::query(&sql).fetch_all(&pool).await;
        match rows {
            Ok(rows) => stream::iter(rows.into_iter().map(Ok)).left_stream(),
            Err(e) => stream::iter(std::iter::once(Err(e))).right_stream(),
        }
    })
    .flatten()
}
