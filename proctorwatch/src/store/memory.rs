// proctorwatch/src/store/memory.rs

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{newest_first, validate_type, ViolationStore};
use crate::error::StoreError;
use crate::events::ViolationRecord;

#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<Vec<ViolationRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ViolationStore for MemoryStore {
    async fn append(&self, kind: &str) -> Result<ViolationRecord, StoreError> {
        let record = ViolationRecord::new(validate_type(kind)?);
        self.records.write().push(record.clone());
        Ok(record)
    }

    async fn list_all(&self) -> Result<Vec<ViolationRecord>, StoreError> {
        Ok(newest_first(&self.records.read()))
    }
}
