//! Where uploaded bytes land on disk.

use crate::config::{IngestConfig, DEFAULT_MAX_UPLOAD_BYTES};
use crate::record::{FileId, FileRecord, FileRecordStore};
use crate::{CsvIngestError, CsvResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufWriter};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Directly into the upload directory.
    Permanent,
    /// Into the temp directory; the pipeline promotes it when asked to relocate.
    Temporary,
}

#[derive(Debug, Clone)]
pub struct StorageLayout {
    upload_dir: PathBuf,
    temp_dir: PathBuf,
    max_upload_bytes: u64,
}

impl StorageLayout {
    pub fn new(upload_dir: impl Into<PathBuf>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            temp_dir: temp_dir.into(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    pub fn from_config(config: &IngestConfig) -> Self {
        Self::new(&config.upload_dir, &config.temp_dir)
            .with_max_upload_bytes(config.max_upload_bytes)
    }

    pub fn with_max_upload_bytes(mut self, max: u64) -> Self {
        self.max_upload_bytes = max;
        self
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn is_temporary(&self, path: &Path) -> bool {
        path.starts_with(&self.temp_dir)
    }

    /// Streams `reader` to `<dir>/<id><ext>` and creates an `uploading` record.
    ///
    /// Non-CSV names are rejected before anything is written. A body over
    /// the size ceiling is cut off one byte past it, deleted, and rejected.
    pub async fn store_upload<R>(
        &self,
        store: &dyn FileRecordStore,
        filename: &str,
        reader: &mut R,
        placement: Placement,
    ) -> CsvResult<FileRecord>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        validate_upload(filename, 0, self.max_upload_bytes)?;
        let dir = match placement {
            Placement::Permanent => &self.upload_dir,
            Placement::Temporary => &self.temp_dir,
        };
        fs::create_dir_all(dir).await?;

        let id = Uuid::new_v4();
        let path = dir.join(stored_name(id, filename));
        let mut out = BufWriter::with_capacity(1 << 20, fs::File::create(&path).await?);
        let mut limited = reader.take(self.max_upload_bytes.saturating_add(1));
        let written = tokio::io::copy(&mut limited, &mut out).await?;
        out.flush().await?;
        drop(out);
        if let Err(err) = validate_upload(filename, written, self.max_upload_bytes) {
            fs::remove_file(&path).await?;
            warn!(path = %path.display(), bytes = written, "upload rejected");
            return Err(err);
        }

        let record = FileRecord::with_id(id, filename, Some(path.clone()), written);
        let record = store.create(record).await?;
        info!(file_id = %id, path = %path.display(), bytes = written, ?placement, "stored upload");
        Ok(record)
    }

    /// Record for a payload that is only ever handed to the pipeline in memory.
    pub async fn register_in_memory(
        &self,
        store: &dyn FileRecordStore,
        filename: &str,
        size_bytes: u64,
    ) -> CsvResult<FileRecord> {
        store.create(FileRecord::new(filename, None, size_bytes)).await
    }

    /// Moves a temp file into the upload directory and returns the new path.
    pub async fn promote(&self, temp_path: &Path) -> CsvResult<PathBuf> {
        let name = temp_path.file_name().ok_or_else(|| {
            CsvIngestError::Validation(format!("not a file path: {}", temp_path.display()))
        })?;
        fs::create_dir_all(&self.upload_dir).await?;
        let target = self.upload_dir.join(name);

        if let Err(err) = fs::rename(temp_path, &target).await {
            // rename fails across filesystems
            warn!(error = %err, "rename failed, falling back to copy");
            fs::copy(temp_path, &target).await?;
            fs::remove_file(temp_path).await?;
        }
        Ok(target)
    }

    /// Deletes the file's bytes (when present on disk) and then its record.
    pub async fn remove(&self, store: &dyn FileRecordStore, id: FileId) -> CsvResult<()> {
        let record = store.get(id).await?;
        if let Some(path) = &record.location {
            match fs::remove_file(path).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        store.delete(id).await
    }
}

fn stored_name(id: FileId, filename: &str) -> String {
    match Path::new(filename).extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{id}.{ext}"),
        None => id.to_string(),
    }
}

/// Rejects non-CSV names and payloads over `max_bytes`.
pub fn validate_upload(filename: &str, size_bytes: u64, max_bytes: u64) -> CsvResult<()> {
    let lower = filename.to_ascii_lowercase();
    if ![".csv", ".csv.gz", ".csv.zst"].iter().any(|ext| lower.ends_with(ext)) {
        return Err(CsvIngestError::Validation(format!(
            "file must be a CSV: {filename}"
        )));
    }
    if size_bytes > max_bytes {
        return Err(CsvIngestError::Validation(format!(
            "file of {size_bytes} bytes exceeds the {max_bytes} byte limit"
        )));
    }
    Ok(())
}
