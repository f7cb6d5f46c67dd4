use crate::config::IngestConfig;
use crate::io::ByteSource;
use crate::record::{FileId, FileRecord, FileRecordStore};
use crate::stats::collect_statistics;
use crate::storage::StorageLayout;
use crate::structure::analyze_structure;
use crate::{CsvIngestError, CsvResult};
use bytes::Bytes;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};

/// Flags a task queue passes along with the file id.
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// Move the file from the temp directory into permanent storage first.
    pub relocate: bool,
    /// Analyze these bytes instead of the record's location; skips the statistics pass.
    pub payload: Option<Bytes>,
}

impl ProcessOptions {
    pub fn relocate() -> Self {
        Self {
            relocate: true,
            payload: None,
        }
    }

    pub fn in_memory(payload: impl Into<Bytes>) -> Self {
        Self {
            relocate: false,
            payload: Some(payload.into()),
        }
    }
}

/// Drives one file through placement, the structural pass and the
/// statistics pass, persisting state after each step.
///
/// A run is sequential and owns its reader, accumulator and record
/// snapshot, so runs for different files can execute concurrently.
/// Re-running a file starts over from step one.
pub struct IngestionPipeline {
    store: Arc<dyn FileRecordStore>,
    layout: StorageLayout,
    config: IngestConfig,
}

impl IngestionPipeline {
    pub fn new(store: Arc<dyn FileRecordStore>, config: IngestConfig) -> Self {
        Self {
            store,
            layout: StorageLayout::from_config(&config),
            config,
        }
    }

    pub fn with_layout(mut self, layout: StorageLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn store(&self) -> &Arc<dyn FileRecordStore> {
        &self.store
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Task entry point. On failure the record is left `failed` with the
    /// error message and the error is returned for the caller's retry policy.
    pub async fn process(&self, file_id: FileId, options: ProcessOptions) -> CsvResult<()> {
        let span = info_span!(
            "ingest",
            file_id = %file_id,
            relocate = options.relocate,
            in_memory = options.payload.is_some()
        );
        self.process_logged(file_id, options).instrument(span).await
    }

    async fn process_logged(&self, file_id: FileId, options: ProcessOptions) -> CsvResult<()> {
        let started = Instant::now();
        let mut record = self.store.get(file_id).await?;
        match self.run(&mut record, options).await {
            Ok(()) => {
                info!(
                    rows = ?record.row_count,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "processing completed"
                );
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "processing failed");
                self.record_failure(record, &err).await;
                Err(err)
            }
        }
    }

    async fn run(&self, record: &mut FileRecord, options: ProcessOptions) -> CsvResult<()> {
        record.begin_run();
        self.store.save(record).await?;
        info!(filename = %record.filename, size_bytes = record.size_bytes, "processing started");

        let (source, on_disk) = match options.payload {
            Some(payload) => (ByteSource::Memory(payload), false),
            None => (ByteSource::Path(self.place(record, options.relocate).await?), true),
        };

        let summary = analyze_structure(&source, &self.config).await?;
        record.apply_structure(&summary);
        record.advance_progress(50.0);
        self.store.save(record).await?;
        info!(
            columns = summary.columns.len(),
            estimated_rows = summary.estimated_rows,
            "structure analyzed"
        );

        // in-memory payloads have nothing stable to re-scan
        if on_disk {
            let stats = collect_statistics(&source, &self.config).await?;
            record.row_count = Some(stats.total_rows);
            self.store.save(record).await?;
            info!(rows = stats.total_rows, "row count confirmed");
        }

        let mut done = record.clone();
        done.complete()?;
        self.store.save(&done).await?;
        *record = done;
        Ok(())
    }

    /// Resolves the on-disk location, promoting it out of the temp directory when asked.
    async fn place(&self, record: &mut FileRecord, relocate: bool) -> CsvResult<PathBuf> {
        let location = record.location.clone().ok_or_else(|| {
            CsvIngestError::Validation(format!(
                "file {} has neither a location nor an in-memory payload",
                record.id
            ))
        })?;
        if !relocate {
            return Ok(location);
        }
        if !self.layout.is_temporary(&location) {
            info!(path = %location.display(), "already in permanent storage");
            return Ok(location);
        }

        let moved = self.layout.promote(&location).await?;
        record.location = Some(moved.clone());
        self.store.save(record).await?;
        info!(from = %location.display(), to = %moved.display(), "moved to permanent storage");
        Ok(moved)
    }

    /// Best effort: a failure here is logged and must not replace `err`.
    async fn record_failure(&self, mut record: FileRecord, err: &CsvIngestError) {
        if let Err(transition) = record.fail(err.to_string()) {
            warn!(error = %transition, "cannot mark file failed");
            return;
        }
        if let Err(persist) = self.store.save(&record).await {
            warn!(error = %persist, original = %err, "could not persist failed state");
        }
    }
}
