// proctorwatch/src/store/mod.rs
//
// Violation log store: append-only, read-many.
//
//   append(type)  → record | MissingType
//   list_all()    → records, newest first
//
// There is no update or delete path. Two backends:
//   memory   ephemeral, used by tests and `--store memory`
//   jsonl    one JSON record per line, replayed on open

pub mod jsonl;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::events::ViolationRecord;

pub use jsonl::JsonlStore;
pub use memory::MemoryStore;

#[async_trait]
pub trait ViolationStore: Send + Sync {
    async fn append(&self, kind: &str) -> Result<ViolationRecord, StoreError>;
    async fn list_all(&self) -> Result<Vec<ViolationRecord>, StoreError>;
}

pub type SharedStore = Arc<dyn ViolationStore>;

/// Rejects an empty violation type. Anything else is stored as received.
pub fn validate_type(kind: &str) -> Result<&str, StoreError> {
    if kind.is_empty() {
        return Err(StoreError::MissingType);
    }
    Ok(kind)
}

/// Newest first. Records sharing a timestamp keep reverse insertion order.
pub(crate) fn newest_first(records: &[ViolationRecord]) -> Vec<ViolationRecord> {
    let mut out: Vec<ViolationRecord> = records.iter().rev().cloned().collect();
    out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    out
}
