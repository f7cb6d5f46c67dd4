use crate::chunk::{normalize_headers, take_rows, ChunkReader, RowBatch};
use crate::config::IngestConfig;
use crate::io::{QuoteGuard, SourceReader};
use crate::{CsvIngestError, CsvResult};
use csv_async::ByteRecord;
use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, BufReader};
use tracing::debug;

/// Byte offsets of every `stride`-th data row of an uncompressed UTF-8 file.
///
/// Only valid for the exact bytes it was built from; the cache keys it by
/// path and checks the file length before reuse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowIndex {
    columns: Arc<[String]>,
    stride: u64,
    checkpoints: Vec<u64>,
    total_rows: u64,
    source_len: u64,
}

impl RowIndex {
    pub fn new(
        columns: Arc<[String]>,
        stride: u64,
        checkpoints: Vec<u64>,
        total_rows: u64,
        source_len: u64,
    ) -> Self {
        Self {
            columns,
            stride: stride.max(1),
            checkpoints,
            total_rows,
            source_len,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn stride(&self) -> u64 {
        self.stride
    }

    pub fn checkpoints(&self) -> &[u64] {
        &self.checkpoints
    }

    pub fn total_rows(&self) -> u64 {
        self.total_rows
    }

    pub fn source_len(&self) -> u64 {
        self.source_len
    }

    /// Nearest checkpoint at or before `row`, as `(row, byte_offset)`.
    pub fn checkpoint_for(&self, row: u64) -> Option<(u64, u64)> {
        if row >= self.total_rows || self.checkpoints.is_empty() {
            return None;
        }
        let slot = ((row / self.stride) as usize).min(self.checkpoints.len() - 1);
        Some((slot as u64 * self.stride, self.checkpoints[slot]))
    }

    /// Rows `[offset, offset + limit)` read by seeking to the nearest checkpoint.
    pub async fn read_rows(
        &self,
        path: &Path,
        config: &IngestConfig,
        offset: u64,
        limit: usize,
    ) -> CsvResult<RowBatch> {
        let Some((row, byte)) = self.checkpoint_for(offset) else {
            return Ok(RowBatch::new(self.columns.clone(), Vec::new(), offset));
        };
        let mut file = File::open(path).await?;
        file.seek(SeekFrom::Start(byte)).await?;
        let raw: SourceReader = Box::new(BufReader::with_capacity(1 << 20, file));
        let reader = ChunkReader::resume(raw, self.columns.clone(), row, config);
        take_rows(reader, offset - row, limit).await
    }
}

/// Builds a row index for `path`, using the mmap fast path when it applies.
pub async fn build_row_index(path: &Path, config: &IngestConfig) -> CsvResult<RowIndex> {
    #[cfg(feature = "fast_local")]
    {
        let owned = path.to_path_buf();
        let (delimiter, stride) = (config.delimiter, config.index_stride);
        let fast = tokio::task::spawn_blocking(move || {
            crate::fast::fast_local_row_index(&owned, delimiter, stride)
        })
        .await
        .map_err(std::io::Error::other)??;
        if let Some(index) = fast {
            return Ok(index);
        }
    }
    scan_row_index(path, config).await
}

/// Streaming build: one pass with `ByteRecord`, recording each checkpoint row's start byte.
async fn scan_row_index(path: &Path, config: &IngestConfig) -> CsvResult<RowIndex> {
    let file = File::open(path).await?;
    let source_len = file.metadata().await?.len();
    let mut rdr = config
        .reader_builder()
        .create_reader(QuoteGuard::new(file, config.delimiter));

    let headers = rdr.headers().await?;
    if headers.is_empty() {
        return Err(CsvIngestError::parse("no columns to parse from source"));
    }
    let columns: Arc<[String]> = normalize_headers(headers.iter()).into();

    let stride = config.index_stride.max(1);
    let mut checkpoints = Vec::new();
    let mut record = ByteRecord::new();
    let mut row = 0u64;
    while rdr.read_byte_record(&mut record).await? {
        if row % stride == 0 {
            let byte = record.position().map(|p| p.byte()).ok_or_else(|| {
                CsvIngestError::parse(format!("no byte position reported for row {row}"))
            })?;
            checkpoints.push(byte);
        }
        row += 1;
    }

    debug!(path = %path.display(), rows = row, checkpoints = checkpoints.len(), "row index built");
    Ok(RowIndex::new(columns, stride, checkpoints, row, source_len))
}

/// Row indexes shared by concurrent page reads, keyed by file path.
#[derive(Debug, Default)]
pub struct RowIndexCache {
    entries: Mutex<HashMap<PathBuf, Arc<RowIndex>>>,
}

impl RowIndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_build(&self, path: &Path, config: &IngestConfig) -> CsvResult<Arc<RowIndex>> {
        let len = tokio::fs::metadata(path).await?.len();
        if let Some(index) = self.lookup(path, len, config.index_stride) {
            return Ok(index);
        }
        // built outside the lock; a racing builder for the same path just overwrites
        let index = Arc::new(build_row_index(path, config).await?);
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_path_buf(), index.clone());
        Ok(index)
    }

    fn lookup(&self, path: &Path, len: u64, stride: u64) -> Option<Arc<RowIndex>> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .filter(|index| index.source_len == len && index.stride == stride.max(1))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
