use crate::chunk::{ChunkReader, RowBatch};
use crate::config::IngestConfig;
use crate::io::ByteSource;
use crate::record::{FileRecord, FileStatus};
use crate::value::ColumnType;
use crate::{CsvIngestError, CsvResult};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Result of a full statistics pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileStatistics {
    pub total_rows: u64,
    pub columns: Vec<String>,
    pub column_types: BTreeMap<String, ColumnType>,
    pub null_counts: BTreeMap<String, u64>,
    pub memory_usage_estimate: u64,
    pub source_size_bytes: u64,
}

/// Single-pass accumulator. The first batch fixes the schema and type tags;
/// every later batch must carry the same schema.
#[derive(Debug, Default)]
pub struct StatisticsAccumulator {
    schema: Option<Arc<[String]>>,
    column_types: Vec<ColumnType>,
    null_counts: Vec<u64>,
    total_rows: u64,
    memory_usage: u64,
    batches: u64,
}

impl StatisticsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one batch in and drops it.
    pub fn push(&mut self, batch: RowBatch) -> CsvResult<()> {
        match &self.schema {
            None => {
                self.schema = Some(batch.schema().clone());
                self.column_types = batch.column_types();
                self.null_counts = vec![0; batch.columns().len()];
            }
            Some(schema) => {
                if !Arc::ptr_eq(schema, batch.schema()) && schema[..] != batch.columns()[..] {
                    return Err(CsvIngestError::parse(format!(
                        "schema changed at batch {} (row {}): expected {:?}, found {:?}",
                        self.batches,
                        batch.first_row(),
                        schema,
                        batch.columns()
                    )));
                }
            }
        }

        for (total, n) in self.null_counts.iter_mut().zip(batch.null_counts()) {
            *total += n;
        }
        self.total_rows += batch.len() as u64;
        self.memory_usage += batch.memory_usage();
        self.batches += 1;
        Ok(())
    }

    pub fn rows_seen(&self) -> u64 {
        self.total_rows
    }

    /// `header` names the columns when no batch was seen; such columns are typed `string`.
    pub fn finish(self, header: &[String], source_size_bytes: u64) -> FileStatistics {
        let (columns, column_types) = match self.schema {
            Some(schema) => (schema.to_vec(), self.column_types),
            None => (header.to_vec(), vec![ColumnType::String; header.len()]),
        };
        let null_counts = self
            .null_counts
            .into_iter()
            .chain(std::iter::repeat(0))
            .take(columns.len());

        FileStatistics {
            total_rows: self.total_rows,
            column_types: columns.iter().cloned().zip(column_types).collect(),
            null_counts: columns.iter().cloned().zip(null_counts).collect(),
            columns,
            memory_usage_estimate: self.memory_usage,
            source_size_bytes,
        }
    }
}

/// Statistics pass: one ordered scan of `source`, one batch live at a time.
///
/// Each call starts from zero; a failed pass leaves nothing to resume.
pub async fn collect_statistics(source: &ByteSource, config: &IngestConfig) -> CsvResult<FileStatistics> {
    let source_size_bytes = source.len().await?;
    let mut reader = ChunkReader::open(source, config).await?;
    let mut acc = StatisticsAccumulator::new();
    while let Some(batch) = reader.next_batch().await? {
        acc.push(batch)?;
    }
    debug!(rows = acc.rows_seen(), batches = acc.batches, "statistics pass done");
    Ok(acc.finish(reader.columns(), source_size_bytes))
}

/// Statistics for a processed file on stable storage.
pub async fn statistics_for(record: &FileRecord, config: &IngestConfig) -> CsvResult<FileStatistics> {
    if record.status != FileStatus::Completed {
        return Err(CsvIngestError::NotReady {
            id: record.id,
            status: record.status,
        });
    }
    let location = record.location.as_ref().ok_or_else(|| {
        CsvIngestError::Validation(format!("file {} has no stable location to scan", record.id))
    })?;
    collect_statistics(&ByteSource::path(location), config).await
}
