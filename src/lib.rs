//! Bounded-memory CSV ingestion: structure inference, streaming statistics
//! and paginated reads over files larger than RAM.
//!
//! - [`ChunkReader`]: lazy fixed-size row batches from a file or buffer
//!   (gzip/zstd and non-UTF-8 charsets handled transparently).
//! - [`analyze_structure`]: columns, type tags and a row estimate from the first batch.
//! - [`collect_statistics`]: one full pass for exact row and null counts.
//! - [`Paginator`]: page reads, index-assisted for deep pages.
//! - [`IngestionPipeline`]: per-file state machine over a [`FileRecordStore`].
//!
//! Fast local path: feature `fast_local` builds row indexes with mmap and
//! parallel newline scanning (uncompressed UTF-8, unquoted files only).
#![cfg_attr(docsrs, feature(doc_cfg))]
//
mod chunk;
mod codec;
mod config;
#[cfg(feature = "fast_local")]
mod fast;
mod index;
mod io;
mod page;
mod pipeline;
mod record;
mod stats;
mod storage;
mod structure;
mod value;

pub use crate::chunk::{read_rows, ChunkReader, RowBatch};
pub use crate::config::{IngestConfig, DEFAULT_BATCH_SIZE, DEFAULT_INDEX_STRIDE};
#[cfg(feature = "fast_local")]
pub use crate::fast::fast_local_row_index;
pub use crate::index::{build_row_index, RowIndex, RowIndexCache};
pub use crate::io::{
    build_csv_reader, ByteSource, Compression, DecodeTally, SourceMeta, SourceReader,
};
pub use crate::page::{Page, PageRequest, Paginator, RowObject, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
pub use crate::pipeline::{IngestionPipeline, ProcessOptions};
pub use crate::record::{FileId, FileRecord, FileRecordStore, FileStatus, MemoryRecordStore};
pub use crate::stats::{collect_statistics, statistics_for, FileStatistics, StatisticsAccumulator};
pub use crate::storage::{validate_upload, Placement, StorageLayout};
pub use crate::structure::{analyze_batch, analyze_structure, StructureSummary};
pub use crate::value::{Cell, ColumnType, NullMarkers, DEFAULT_NULL_MARKERS};

use crate::io::UnterminatedQuote;
use std::fmt;
use thiserror::Error;

/// Where in the source a parse error happened, when the parser knows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourcePosition {
    pub line: Option<u64>,
    pub byte: Option<u64>,
}

impl SourcePosition {
    pub fn at(line: u64, byte: u64) -> Self {
        Self {
            line: Some(line),
            byte: Some(byte),
        }
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.line, self.byte) {
            (Some(line), Some(byte)) => write!(f, "line {line}, byte {byte}"),
            (Some(line), None) => write!(f, "line {line}"),
            (None, Some(byte)) => write!(f, "byte {byte}"),
            (None, None) => f.write_str("unknown position"),
        }
    }
}

/// Error type returned by this crate.
#[derive(Debug, Error)]
pub enum CsvIngestError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("parse error at {position}: {message}")]
    Parse {
        position: SourcePosition,
        message: String,
    },
    #[error("validation error: {0}")]
    Validation(String),
    #[error("file record not found: {0}")]
    NotFound(FileId),
    #[error("file {id} is not readable while {status}")]
    NotReady { id: FileId, status: FileStatus },
    #[error("record store error: {0}")]
    Store(String),
}

impl CsvIngestError {
    /// Parse error with no known position.
    pub fn parse(message: impl Into<String>) -> Self {
        CsvIngestError::Parse {
            position: SourcePosition::default(),
            message: message.into(),
        }
    }
}

impl From<csv_async::Error> for CsvIngestError {
    fn from(err: csv_async::Error) -> Self {
        use csv_async::ErrorKind;

        let position = match err.kind() {
            ErrorKind::Utf8 { pos: Some(pos), .. }
            | ErrorKind::UnequalLengths { pos: Some(pos), .. } => {
                SourcePosition::at(pos.line(), pos.byte())
            }
            _ => SourcePosition::default(),
        };
        let message = match err.kind() {
            ErrorKind::UnequalLengths {
                expected_len, len, ..
            } => format!("expected {expected_len} fields, found {len}"),
            _ => err.to_string(),
        };
        match err.into_kind() {
            ErrorKind::Io(io) => match io
                .get_ref()
                .and_then(|inner| inner.downcast_ref::<UnterminatedQuote>())
            {
                Some(quote) => CsvIngestError::Parse {
                    position: quote.0,
                    message: quote.to_string(),
                },
                None => CsvIngestError::Io(io),
            },
            _ => CsvIngestError::Parse { position, message },
        }
    }
}

pub type CsvResult<T> = std::result::Result<T, CsvIngestError>;
