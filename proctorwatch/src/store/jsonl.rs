// proctorwatch/src/store/jsonl.rs
//
// Append-only JSONL violation log.
//
// Every accepted record is written as one line before it becomes visible to
// readers, so a crash can lose at most the in-flight append. On open the
// existing file is replayed into memory; lines that fail to parse are skipped
// with a warning rather than refusing to start.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{newest_first, validate_type, ViolationStore};
use crate::error::StoreError;
use crate::events::ViolationRecord;

pub struct JsonlStore {
    path:    PathBuf,
    records: RwLock<Vec<ViolationRecord>>,
    // Serializes file appends so lines never interleave.
    writer:  Mutex<()>,
}

impl JsonlStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path: PathBuf = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let records = match tokio::fs::read_to_string(&path).await {
            Ok(content) => parse_lines(&path, &content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        info!("Violation log {} opened, {} records", path.display(), records.len());

        Ok(Self { path, records: RwLock::new(records), writer: Mutex::new(()) })
    }
}

fn parse_lines(path: &Path, content: &str) -> Vec<ViolationRecord> {
    let mut out = Vec::new();
    for (n, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() { continue; }
        match serde_json::from_str::<ViolationRecord>(line) {
            Ok(rec) => out.push(rec),
            Err(e)  => warn!("{}:{} skipped corrupt record: {}", path.display(), n + 1, e),
        }
    }
    out
}

async fn ends_with_newline(f: &mut File) -> Result<bool, StoreError> {
    if f.metadata().await?.len() == 0 {
        return Ok(true);
    }
    let mut last = [0u8; 1];
    f.seek(SeekFrom::End(-1)).await?;
    f.read_exact(&mut last).await?;
    Ok(last[0] == b'\n')
}

#[async_trait]
impl ViolationStore for JsonlStore {
    async fn append(&self, kind: &str) -> Result<ViolationRecord, StoreError> {
        let record = ViolationRecord::new(validate_type(kind)?);
        let line   = serde_json::to_string(&record)? + "\n";

        let _guard = self.writer.lock().await;
        let mut f = OpenOptions::new().create(true).read(true).append(true).open(&self.path).await?;
        // A torn earlier write leaves no trailing newline; start a fresh line.
        if !ends_with_newline(&mut f).await? {
            f.write_all(b"\n").await?;
        }
        f.write_all(line.as_bytes()).await?;
        f.flush().await?;
        self.records.write().push(record.clone());
        Ok(record)
    }

    async fn list_all(&self) -> Result<Vec<ViolationRecord>, StoreError> {
        Ok(newest_first(&self.records.read()))
    }
}
