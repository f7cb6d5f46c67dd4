//! File metadata records and the persistence seam.

use crate::structure::StructureSummary;
use crate::value::ColumnType;
use crate::{CsvIngestError, CsvResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use tokio::sync::RwLock;
use uuid::Uuid;

pub type FileId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Uploading,
    Processing,
    Completed,
    Failed,
}

impl FileStatus {
    /// Transitions allowed within one processing run.
    pub fn can_transition_to(self, next: FileStatus) -> bool {
        use FileStatus::*;
        matches!(
            (self, next),
            (Uploading, Processing)
                | (Uploading, Failed)
                | (Processing, Completed)
                | (Processing, Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FileStatus::Uploading => "uploading",
            FileStatus::Processing => "processing",
            FileStatus::Completed => "completed",
            FileStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: FileId,
    pub filename: String,
    /// `None` for pure in-memory files.
    pub location: Option<PathBuf>,
    pub size_bytes: u64,
    pub status: FileStatus,
    /// Estimate after the structural pass, exact after the statistics pass.
    pub row_count: Option<u64>,
    pub columns: Option<Vec<String>>,
    pub column_types: Option<BTreeMap<String, ColumnType>>,
    pub progress: f64,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileRecord {
    pub fn new(filename: impl Into<String>, location: Option<PathBuf>, size_bytes: u64) -> Self {
        Self::with_id(Uuid::new_v4(), filename, location, size_bytes)
    }

    pub fn with_id(
        id: FileId,
        filename: impl Into<String>,
        location: Option<PathBuf>,
        size_bytes: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            filename: filename.into(),
            location,
            size_bytes,
            status: FileStatus::Uploading,
            row_count: None,
            columns: None,
            column_types: None,
            progress: 0.0,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Resets the record for a brand-new processing run.
    pub fn begin_run(&mut self) {
        self.status = FileStatus::Processing;
        self.progress = 0.0;
        self.error = None;
    }

    pub fn transition(&mut self, next: FileStatus) -> CsvResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(CsvIngestError::Validation(format!(
                "file {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Raises progress; a lower value leaves it unchanged.
    pub fn advance_progress(&mut self, progress: f64) {
        self.progress = self.progress.max(progress.clamp(0.0, 100.0));
    }

    pub fn apply_structure(&mut self, summary: &StructureSummary) {
        self.columns = Some(summary.columns.clone());
        self.column_types = Some(summary.column_types.clone());
        self.row_count = Some(summary.estimated_rows);
    }

    pub fn complete(&mut self) -> CsvResult<()> {
        self.transition(FileStatus::Completed)?;
        self.advance_progress(100.0);
        Ok(())
    }

    /// Marks the run failed. Only valid before the run reached a terminal state.
    pub fn fail(&mut self, message: impl Into<String>) -> CsvResult<()> {
        self.transition(FileStatus::Failed)?;
        self.error = Some(message.into());
        Ok(())
    }
}

/// Key-value store of file records, atomic per record.
#[async_trait]
pub trait FileRecordStore: Send + Sync {
    async fn get(&self, id: FileId) -> CsvResult<FileRecord>;
    async fn create(&self, record: FileRecord) -> CsvResult<FileRecord>;
    async fn save(&self, record: &FileRecord) -> CsvResult<()>;
    async fn delete(&self, id: FileId) -> CsvResult<()>;
    async fn list(&self) -> CsvResult<Vec<FileRecord>>;
}

/// In-process store, for tests and single-process embedding.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<FileId, FileRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FileRecordStore for MemoryRecordStore {
    async fn get(&self, id: FileId) -> CsvResult<FileRecord> {
        self.records
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(CsvIngestError::NotFound(id))
    }

    async fn create(&self, record: FileRecord) -> CsvResult<FileRecord> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(CsvIngestError::Store(format!("record {} already exists", record.id)));
        }
        records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn save(&self, record: &FileRecord) -> CsvResult<()> {
        let mut records = self.records.write().await;
        let slot = records
            .get_mut(&record.id)
            .ok_or(CsvIngestError::NotFound(record.id))?;
        *slot = FileRecord {
            updated_at: Utc::now(),
            ..record.clone()
        };
        Ok(())
    }

    async fn delete(&self, id: FileId) -> CsvResult<()> {
        self.records
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(CsvIngestError::NotFound(id))
    }

    async fn list(&self) -> CsvResult<Vec<FileRecord>> {
        let mut all: Vec<_> = self.records.read().await.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }
}
