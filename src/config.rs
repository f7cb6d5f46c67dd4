use crate::value::NullMarkers;
use crate::{CsvIngestError, CsvResult};
use csv_async::AsyncReaderBuilder;
use std::path::PathBuf;

pub const DEFAULT_BATCH_SIZE: usize = 10_000;
pub const DEFAULT_INDEX_STRIDE: u64 = 10_000;
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024 * 1024;

/// Settings shared by every reader, analyzer and pipeline run.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Rows per batch; the memory bound of a run.
    pub batch_size: usize,
    pub delimiter: u8,
    /// csv-async internal buffer.
    pub buffer_capacity: usize,
    pub charset: &'static encoding_rs::Encoding,
    pub null_markers: NullMarkers,
    /// Data rows between row-index checkpoints.
    pub index_stride: u64,
    pub max_upload_bytes: u64,
    pub upload_dir: PathBuf,
    pub temp_dir: PathBuf,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            delimiter: b',',
            buffer_capacity: 1 << 20,
            charset: encoding_rs::UTF_8,
            null_markers: NullMarkers::default(),
            index_stride: DEFAULT_INDEX_STRIDE,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            upload_dir: PathBuf::from("/tmp/csv_uploads"),
            temp_dir: PathBuf::from("/tmp/csv_temp_uploads"),
        }
    }
}

impl IngestConfig {
    /// Defaults overridden by `CSV_INGEST_*` environment variables.
    pub fn from_env() -> CsvResult<Self> {
        let mut config = Self::default();
        if let Some(v) = env_var("CSV_INGEST_BATCH_SIZE") {
            config = config.with_batch_size(parse_env("CSV_INGEST_BATCH_SIZE", &v)?);
        }
        if let Some(v) = env_var("CSV_INGEST_INDEX_STRIDE") {
            config = config.with_index_stride(parse_env("CSV_INGEST_INDEX_STRIDE", &v)?);
        }
        if let Some(v) = env_var("CSV_INGEST_MAX_UPLOAD_BYTES") {
            config.max_upload_bytes = parse_env("CSV_INGEST_MAX_UPLOAD_BYTES", &v)?;
        }
        if let Some(v) = env_var("CSV_INGEST_UPLOAD_DIR") {
            config.upload_dir = PathBuf::from(v);
        }
        if let Some(v) = env_var("CSV_INGEST_TEMP_DIR") {
            config.temp_dir = PathBuf::from(v);
        }
        if let Some(v) = env_var("CSV_INGEST_DELIMITER") {
            match v.as_bytes() {
                [b] => config.delimiter = *b,
                _ => {
                    return Err(CsvIngestError::Validation(format!(
                        "CSV_INGEST_DELIMITER must be a single byte, got {v:?}"
                    )))
                }
            }
        }
        if let Some(v) = env_var("CSV_INGEST_CHARSET") {
            config = config.with_charset_label(&v)?;
        }
        Ok(config)
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_index_stride(mut self, stride: u64) -> Self {
        self.index_stride = stride.max(1);
        self
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_charset(mut self, charset: &'static encoding_rs::Encoding) -> Self {
        self.charset = charset;
        self
    }

    /// Charset by WHATWG label, e.g. `"latin1"` or `"utf-16le"`.
    pub fn with_charset_label(self, label: &str) -> CsvResult<Self> {
        let charset = encoding_rs::Encoding::for_label(label.trim().as_bytes())
            .ok_or_else(|| CsvIngestError::Validation(format!("unknown charset: {label}")))?;
        Ok(self.with_charset(charset))
    }

    pub fn with_null_markers(mut self, markers: NullMarkers) -> Self {
        self.null_markers = markers;
        self
    }

    pub fn with_storage_dirs(mut self, upload_dir: impl Into<PathBuf>, temp_dir: impl Into<PathBuf>) -> Self {
        self.upload_dir = upload_dir.into();
        self.temp_dir = temp_dir.into();
        self
    }

    pub fn with_max_upload_bytes(mut self, max: u64) -> Self {
        self.max_upload_bytes = max;
        self
    }

    /// Strict reader: every row must have the header's field count.
    pub fn reader_builder(&self) -> AsyncReaderBuilder {
        let mut builder = AsyncReaderBuilder::new();
        builder
            .has_headers(true)
            .flexible(false)
            .delimiter(self.delimiter)
            .buffer_capacity(self.buffer_capacity);
        builder
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> CsvResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| CsvIngestError::Validation(format!("invalid value for {key}: {value:?}")))
}
