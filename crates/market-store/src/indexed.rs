//! Indexed backend: SQLite through `sqlx`.
//!
//! Every collection is a table `(id, order_id, status, data)` where `data`
//! is the JSON body and `order_id`/`status` are indexed copies. Batches run
//! in one SQL transaction. The audit log and usage ledger are append-only
//! tables ordered by an autoincrement `seq`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::SqliteConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info, warn};

use market_types::{
    AuditEvent, MarketError, Result, StoreBackendKind, UsageEntry, UsageFilter,
};

use crate::backend::StoreBackend;
use crate::batch::{WriteBatch, WriteOp};
use crate::record::{Collection, StoredRecord};

const MAX_CONNECTIONS: u32 = 5;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed store with secondary indexes and real transactions.
pub struct IndexedBackend {
    pool: SqlitePool,
    path: PathBuf,
}

impl IndexedBackend {
    /// Open (creating if needed) the database at `path` and ensure the schema.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(storage_err)?;

        let backend = Self { pool, path };
        backend.ensure_schema().await?;
        info!(path = %backend.path.display(), "Opened indexed store");
        Ok(backend)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the pool, waiting for connections to be returned.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn ensure_schema(&self) -> Result<()> {
        let mut statements = Vec::new();
        for collection in Collection::ALL {
            let t = collection.name();
            statements.push(format!(
                "CREATE TABLE IF NOT EXISTS {t} (
                    id TEXT PRIMARY KEY,
                    order_id TEXT,
                    status TEXT NOT NULL,
                    data TEXT NOT NULL
                )"
            ));
            statements.push(format!(
                "CREATE INDEX IF NOT EXISTS idx_{t}_order_id ON {t}(order_id)"
            ));
            statements.push(format!(
                "CREATE INDEX IF NOT EXISTS idx_{t}_status ON {t}(status)"
            ));
            if let Some(exempt) = collection.unique_per_order_except() {
                statements.push(format!(
                    "CREATE UNIQUE INDEX IF NOT EXISTS uq_{t}_active_order
                     ON {t}(order_id) WHERE status != '{exempt}'"
                ));
            }
        }
        statements.push(
            "CREATE TABLE IF NOT EXISTS audit_events (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                kind TEXT NOT NULL,
                ref_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                data TEXT NOT NULL
            )"
            .to_string(),
        );
        statements
            .push("CREATE INDEX IF NOT EXISTS idx_audit_events_ref ON audit_events(ref_id)".into());
        statements.push(
            "CREATE TABLE IF NOT EXISTS usage_ledger (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                timestamp TEXT NOT NULL,
                lease_id TEXT NOT NULL,
                resource_id TEXT NOT NULL,
                provider_actor_id TEXT NOT NULL,
                consumer_actor_id TEXT NOT NULL,
                data TEXT NOT NULL
            )"
            .to_string(),
        );
        statements
            .push("CREATE INDEX IF NOT EXISTS idx_usage_lease ON usage_ledger(lease_id)".into());
        statements.push(
            "CREATE INDEX IF NOT EXISTS idx_usage_provider ON usage_ledger(provider_actor_id)"
                .into(),
        );

        for sql in &statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(storage_err)?;
        }
        Ok(())
    }

    async fn fetch_bodies(&self, sql: &str, binds: &[&str]) -> Result<Vec<Value>> {
        let mut query = sqlx::query_scalar::<_, String>(sql);
        for value in binds {
            query = query.bind(*value);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(storage_err)?;
        rows.iter().map(String::as_str).map(parse_json).collect()
    }
}

async fn apply_op(conn: &mut SqliteConnection, op: WriteOp) -> Result<()> {
    match op {
        WriteOp::Put(row) => upsert(conn, &row).await,
        WriteOp::Remove { collection, id } => {
            let sql = format!("DELETE FROM {} WHERE id = ?", collection.name());
            sqlx::query(&sql)
                .bind(id)
                .execute(&mut *conn)
                .await
                .map_err(storage_err)?;
            Ok(())
        }
        WriteOp::AppendAudit(event) => {
            let data = serde_json::to_string(&event)?;
            sqlx::query(
                "INSERT INTO audit_events (id, kind, ref_id, timestamp, data) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(event.id.to_string())
            .bind(event.kind.to_string())
            .bind(&event.ref_id)
            .bind(event.timestamp.to_rfc3339())
            .bind(data)
            .execute(&mut *conn)
            .await
            .map_err(storage_err)?;
            Ok(())
        }
        WriteOp::AppendUsage(entry) => {
            let data = serde_json::to_string(&entry)?;
            sqlx::query(
                "INSERT INTO usage_ledger
                    (id, timestamp, lease_id, resource_id, provider_actor_id, consumer_actor_id, data)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(entry.ledger_id.to_string())
            .bind(entry.timestamp.to_rfc3339())
            .bind(&entry.draft.lease_id)
            .bind(&entry.draft.resource_id)
            .bind(entry.draft.provider_actor_id.as_str())
            .bind(entry.draft.consumer_actor_id.as_str())
            .bind(data)
            .execute(&mut *conn)
            .await
            .map_err(storage_err)?;
            Ok(())
        }
    }
}

/// Insert or update in place. `INSERT OR REPLACE` is avoided: it would
/// delete a row that clashes on the partial unique index instead of failing.
async fn upsert(conn: &mut SqliteConnection, row: &StoredRecord) -> Result<()> {
    let sql = format!(
        "INSERT INTO {} (id, order_id, status, data) VALUES (?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            order_id = excluded.order_id,
            status = excluded.status,
            data = excluded.data",
        row.collection.name()
    );
    sqlx::query(&sql)
        .bind(&row.id)
        .bind(row.order_id.as_deref())
        .bind(&row.status)
        .bind(serde_json::to_string(&row.body)?)
        .execute(&mut *conn)
        .await
        .map_err(storage_err)?;
    Ok(())
}

#[async_trait]
impl StoreBackend for IndexedBackend {
    fn kind(&self) -> StoreBackendKind {
        StoreBackendKind::Indexed
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>> {
        let sql = format!("SELECT data FROM {} WHERE id = ?", collection.name());
        let data = sqlx::query_scalar::<_, String>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        data.as_deref().map(parse_json).transpose()
    }

    async fn list(&self, collection: Collection) -> Result<Vec<Value>> {
        let sql = format!("SELECT data FROM {} ORDER BY id", collection.name());
        self.fetch_bodies(&sql, &[]).await
    }

    async fn list_by_order(&self, collection: Collection, order_id: &str) -> Result<Vec<Value>> {
        let sql = format!(
            "SELECT data FROM {} WHERE order_id = ? ORDER BY id",
            collection.name()
        );
        self.fetch_bodies(&sql, &[order_id]).await
    }

    async fn list_by_status(&self, collection: Collection, status: &str) -> Result<Vec<Value>> {
        let sql = format!(
            "SELECT data FROM {} WHERE status = ? ORDER BY id",
            collection.name()
        );
        self.fetch_bodies(&sql, &[status]).await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let ops = batch.len();
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        for op in batch.into_ops() {
            if let Err(err) = apply_op(&mut tx, op).await {
                warn!(ops, error = %err, "Indexed batch failed, rolling back");
                tx.rollback().await.map_err(storage_err)?;
                return Err(err);
            }
        }
        tx.commit().await.map_err(storage_err)?;
        debug!(ops, "Indexed batch committed");
        Ok(())
    }

    async fn read_audit_events(&self, limit: usize) -> Result<Vec<AuditEvent>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT data FROM (
                SELECT seq, data FROM audit_events ORDER BY seq DESC LIMIT ?
             ) ORDER BY seq ASC",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        rows.iter()
            .map(|data| serde_json::from_str(data).map_err(MarketError::from))
            .collect()
    }

    async fn list_usage(&self, filter: &UsageFilter) -> Result<Vec<UsageEntry>> {
        let mut sql = String::from("SELECT data FROM usage_ledger WHERE 1 = 1");
        let mut binds: Vec<&str> = Vec::new();
        if let Some(lease) = &filter.lease_id {
            sql.push_str(" AND lease_id = ?");
            binds.push(lease);
        }
        if let Some(resource) = &filter.resource_id {
            sql.push_str(" AND resource_id = ?");
            binds.push(resource);
        }
        if let Some(provider) = &filter.provider_actor_id {
            sql.push_str(" AND provider_actor_id = ?");
            binds.push(provider.as_str());
        }
        if let Some(consumer) = &filter.consumer_actor_id {
            sql.push_str(" AND consumer_actor_id = ?");
            binds.push(consumer.as_str());
        }
        sql.push_str(" ORDER BY seq");

        let mut entries = Vec::new();
        for body in self.fetch_bodies(&sql, &binds).await? {
            let entry: UsageEntry = serde_json::from_value(body)?;
            // Time bounds are compared as timestamps, not as stored text.
            if filter.matches(&entry) {
                entries.push(entry);
            }
        }
        Ok(filter.finish(entries))
    }

    async fn has_any_data(&self) -> Result<bool> {
        let tables = Collection::ALL
            .iter()
            .map(|c| c.name())
            .chain(["audit_events", "usage_ledger"]);
        for table in tables {
            let sql = format!("SELECT EXISTS(SELECT 1 FROM {table})");
            let exists = sqlx::query_scalar::<_, i64>(&sql)
                .fetch_one(&self.pool)
                .await
                .map_err(storage_err)?;
            if exists != 0 {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn parse_json(data: &str) -> Result<Value> {
    serde_json::from_str(data).map_err(MarketError::from)
}

/// Unique-constraint violations surface as `Conflict`, everything else as
/// a storage failure.
fn storage_err(err: sqlx::Error) -> MarketError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            MarketError::Conflict(db.message().to_string())
        }
        _ => MarketError::Storage(err.to_string()),
    }
}
