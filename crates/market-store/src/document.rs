//! Document backend: one JSON document per collection, JSONL logs.
//!
//! Layout under the data directory:
//!
//! ```text
//!   offers.json  orders.json  consents.json  deliveries.json
//!   settlements.json  disputes.json  revocations.json
//!   audit-log.jsonl   usage-ledger.jsonl
//! ```
//!
//! Each `.json` file maps id to entity body. All collections are loaded into
//! memory at open; writes replace the touched files whole (write to a temp
//! file, then rename). A failed commit restores the in-memory snapshot,
//! rewrites the touched files from it, and truncates the logs back to their
//! pre-commit length. This is best-effort: a crash mid-commit can leave a
//! partial batch on disk.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use market_types::{
    AuditEvent, MarketError, Result, StoreBackendKind, UsageEntry, UsageFilter,
};

use crate::backend::StoreBackend;
use crate::batch::{WriteBatch, WriteOp};
use crate::record::{Collection, StoredRecord};

pub const AUDIT_LOG_FILE: &str = "audit-log.jsonl";
pub const USAGE_LEDGER_FILE: &str = "usage-ledger.jsonl";

/// Rows of one collection plus its `order_id` index.
#[derive(Debug, Clone, Default)]
struct CollectionState {
    rows: BTreeMap<String, StoredRecord>,
    by_order: HashMap<String, BTreeSet<String>>,
}

impl CollectionState {
    fn insert(&mut self, row: StoredRecord) {
        self.unindex(&row.id);
        if let Some(order_id) = &row.order_id {
            self.by_order
                .entry(order_id.clone())
                .or_default()
                .insert(row.id.clone());
        }
        self.rows.insert(row.id.clone(), row);
    }

    fn remove(&mut self, id: &str) {
        self.unindex(id);
        self.rows.remove(id);
    }

    fn unindex(&mut self, id: &str) {
        let Some(order_id) = self.rows.get(id).and_then(|r| r.order_id.clone()) else {
            return;
        };
        if let Some(ids) = self.by_order.get_mut(&order_id) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_order.remove(&order_id);
            }
        }
    }

    fn for_order<'a>(&'a self, order_id: &str) -> impl Iterator<Item = &'a StoredRecord> + 'a {
        self.by_order
            .get(order_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.rows.get(id))
    }

    /// Reject a row that would give its order a second non-exempt row.
    fn check_unique(&self, row: &StoredRecord) -> Result<()> {
        let Some(exempt) = row.collection.unique_per_order_except() else {
            return Ok(());
        };
        let Some(order_id) = row.order_id.as_deref() else {
            return Ok(());
        };
        if row.status == exempt {
            return Ok(());
        }
        let clash = self
            .for_order(order_id)
            .any(|other| other.id != row.id && other.status != exempt);
        if clash {
            return Err(MarketError::Conflict(format!(
                "{} already holds an active record for order {order_id}",
                row.collection
            )));
        }
        Ok(())
    }

    fn to_document(&self) -> BTreeMap<&str, &Value> {
        self.rows
            .iter()
            .map(|(id, row)| (id.as_str(), &row.body))
            .collect()
    }
}

#[derive(Debug, Default)]
struct DocumentState {
    collections: BTreeMap<Collection, CollectionState>,
}

impl DocumentState {
    fn collection(&self, collection: Collection) -> Option<&CollectionState> {
        self.collections.get(&collection)
    }

    fn collection_mut(&mut self, collection: Collection) -> &mut CollectionState {
        self.collections.entry(collection).or_default()
    }
}

/// File-backed document store.
pub struct DocumentBackend {
    root: PathBuf,
    state: Mutex<DocumentState>,
}

impl DocumentBackend {
    /// Open (creating if needed) the store rooted at `root` and load every
    /// collection into memory.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;

        let mut state = DocumentState::default();
        let mut loaded = 0usize;
        for collection in Collection::ALL {
            let path = collection_path(&root, collection);
            let Some(bytes) = read_optional(&path).await? else {
                continue;
            };
            let document: BTreeMap<String, Value> = serde_json::from_slice(&bytes)
                .map_err(|e| MarketError::Storage(format!("{}: {e}", path.display())))?;
            let rows = state.collection_mut(collection);
            for (id, body) in document {
                rows.insert(StoredRecord::from_body(collection, id, body)?);
                loaded += 1;
            }
        }

        info!(root = %root.display(), records = loaded, "Opened document store");
        Ok(Self {
            root,
            state: Mutex::new(state),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn audit_path(&self) -> PathBuf {
        self.root.join(AUDIT_LOG_FILE)
    }

    fn usage_path(&self) -> PathBuf {
        self.root.join(USAGE_LEDGER_FILE)
    }

    /// Replace the collection file with the in-memory rows.
    async fn persist(&self, state: &DocumentState, collection: Collection) -> Result<()> {
        let path = collection_path(&self.root, collection);
        let bytes = match state.collection(collection) {
            Some(rows) => serde_json::to_vec_pretty(&rows.to_document())?,
            None => b"{}".to_vec(),
        };
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &bytes).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn apply(&self, state: &mut DocumentState, batch: WriteBatch) -> Result<()> {
        let touched = batch.touched_collections();
        let mut audit_lines = String::new();
        let mut usage_lines = String::new();

        for op in batch.into_ops() {
            match op {
                WriteOp::Put(row) => {
                    let rows = state.collection_mut(row.collection);
                    rows.check_unique(&row)?;
                    rows.insert(row);
                }
                WriteOp::Remove { collection, id } => {
                    state.collection_mut(collection).remove(&id);
                }
                WriteOp::AppendAudit(event) => {
                    audit_lines.push_str(&serde_json::to_string(&event)?);
                    audit_lines.push('\n');
                }
                WriteOp::AppendUsage(entry) => {
                    usage_lines.push_str(&serde_json::to_string(&entry)?);
                    usage_lines.push('\n');
                }
            }
        }

        for collection in touched {
            self.persist(state, collection).await?;
        }
        append_lines(&self.audit_path(), &audit_lines).await?;
        append_lines(&self.usage_path(), &usage_lines).await?;
        Ok(())
    }

    /// Undo a failed commit. Errors are logged; the original error wins.
    async fn restore(
        &self,
        state: &mut DocumentState,
        snapshot: Vec<(Collection, CollectionState)>,
        audit_len: u64,
        usage_len: u64,
    ) {
        for (collection, rows) in snapshot {
            state.collections.insert(collection, rows);
            if let Err(e) = self.persist(state, collection).await {
                error!(collection = %collection, error = %e, "Failed to restore collection file");
            }
        }
        for (path, len) in [(self.audit_path(), audit_len), (self.usage_path(), usage_len)] {
            if let Err(e) = truncate(&path, len).await {
                error!(path = %path.display(), error = %e, "Failed to truncate log");
            }
        }
    }
}

#[async_trait]
impl StoreBackend for DocumentBackend {
    fn kind(&self) -> StoreBackendKind {
        StoreBackendKind::Document
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>> {
        let state = self.state.lock().await;
        Ok(state
            .collection(collection)
            .and_then(|rows| rows.rows.get(id))
            .map(|row| row.body.clone()))
    }

    async fn list(&self, collection: Collection) -> Result<Vec<Value>> {
        let state = self.state.lock().await;
        Ok(state
            .collection(collection)
            .map(|rows| rows.rows.values().map(|r| r.body.clone()).collect())
            .unwrap_or_default())
    }

    async fn list_by_order(&self, collection: Collection, order_id: &str) -> Result<Vec<Value>> {
        let state = self.state.lock().await;
        Ok(state
            .collection(collection)
            .map(|rows| rows.for_order(order_id).map(|r| r.body.clone()).collect())
            .unwrap_or_default())
    }

    async fn list_by_status(&self, collection: Collection, status: &str) -> Result<Vec<Value>> {
        let state = self.state.lock().await;
        Ok(state
            .collection(collection)
            .map(|rows| {
                rows.rows
                    .values()
                    .filter(|r| r.status == status)
                    .map(|r| r.body.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut state = self.state.lock().await;

        let snapshot: Vec<(Collection, CollectionState)> = batch
            .touched_collections()
            .into_iter()
            .map(|c| (c, state.collection(c).cloned().unwrap_or_default()))
            .collect();
        let audit_len = file_len(&self.audit_path()).await?;
        let usage_len = file_len(&self.usage_path()).await?;
        let ops = batch.len();

        match self.apply(&mut state, batch).await {
            Ok(()) => {
                debug!(ops, "Document batch committed");
                Ok(())
            }
            Err(err) => {
                warn!(ops, error = %err, "Document batch failed, restoring snapshot");
                self.restore(&mut state, snapshot, audit_len, usage_len).await;
                Err(err)
            }
        }
    }

    async fn read_audit_events(&self, limit: usize) -> Result<Vec<AuditEvent>> {
        let _state = self.state.lock().await;
        let lines = read_lines(&self.audit_path()).await?;
        let skip = lines.len().saturating_sub(limit);
        lines[skip..]
            .iter()
            .map(|line| serde_json::from_str(line).map_err(MarketError::from))
            .collect()
    }

    async fn list_usage(&self, filter: &UsageFilter) -> Result<Vec<UsageEntry>> {
        let _state = self.state.lock().await;
        let mut entries = Vec::new();
        for line in read_lines(&self.usage_path()).await? {
            let entry: UsageEntry = serde_json::from_str(&line)?;
            if filter.matches(&entry) {
                entries.push(entry);
            }
        }
        Ok(filter.finish(entries))
    }

    async fn has_any_data(&self) -> Result<bool> {
        let state = self.state.lock().await;
        if state.collections.values().any(|rows| !rows.rows.is_empty()) {
            return Ok(true);
        }
        Ok(file_len(&self.audit_path()).await? > 0 || file_len(&self.usage_path()).await? > 0)
    }
}

fn collection_path(root: &Path, collection: Collection) -> PathBuf {
    root.join(format!("{}.json", collection.name()))
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn read_lines(path: &Path) -> Result<Vec<String>> {
    let Some(bytes) = read_optional(path).await? else {
        return Ok(Vec::new());
    };
    let text = String::from_utf8(bytes)
        .map_err(|e| MarketError::Storage(format!("{}: {e}", path.display())))?;
    Ok(text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect())
}

async fn file_len(path: &Path) -> Result<u64> {
    match fs::metadata(path).await {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == IoErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}

async fn append_lines(path: &Path, lines: &str) -> Result<()> {
    if lines.is_empty() {
        return Ok(());
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(lines.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

async fn truncate(path: &Path, len: u64) -> Result<()> {
    if file_len(path).await? <= len {
        return Ok(());
    }
    let file = fs::OpenOptions::new().write(true).open(path).await?;
    file.set_len(len).await?;
    Ok(())
}
