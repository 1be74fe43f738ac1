//! Write batches: the unit of atomicity of the store.
//!
//! A batch is built synchronously (see [`crate::LedgerStore::run_in_transaction`])
//! and applied by a backend in one commit. The indexed backend applies it in
//! a single SQL transaction; the document backend restores its pre-commit
//! snapshot when any step fails.

use market_types::{AuditEvent, Result, UsageEntry};

use crate::record::{Collection, Record, StoredRecord};

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Insert or replace a row by id.
    Put(StoredRecord),
    Remove { collection: Collection, id: String },
    AppendAudit(AuditEvent),
    AppendUsage(UsageEntry),
}

/// Ordered list of writes committed together.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage an upsert of `record`.
    pub fn put<T: Record>(&mut self, record: &T) -> Result<&mut Self> {
        self.ops.push(WriteOp::Put(StoredRecord::from_record(record)?));
        Ok(self)
    }

    pub fn put_row(&mut self, row: StoredRecord) -> &mut Self {
        self.ops.push(WriteOp::Put(row));
        self
    }

    pub fn remove<T: Record>(&mut self, id: &T::Id) -> &mut Self {
        self.ops.push(WriteOp::Remove {
            collection: T::COLLECTION,
            id: id.to_string(),
        });
        self
    }

    pub fn append_audit(&mut self, event: AuditEvent) -> &mut Self {
        self.ops.push(WriteOp::AppendAudit(event));
        self
    }

    pub fn append_usage(&mut self, entry: UsageEntry) -> &mut Self {
        self.ops.push(WriteOp::AppendUsage(entry));
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    #[must_use]
    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    #[must_use]
    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }

    /// Collections touched by `Put`/`Remove` ops, deduplicated.
    #[must_use]
    pub fn touched_collections(&self) -> Vec<Collection> {
        let mut touched: Vec<Collection> = self
            .ops
            .iter()
            .filter_map(|op| match op {
                WriteOp::Put(row) => Some(row.collection),
                WriteOp::Remove { collection, .. } => Some(*collection),
                _ => None,
            })
            .collect();
        touched.sort();
        touched.dedup();
        touched
    }
}
