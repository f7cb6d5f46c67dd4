use crate::chunk::{ChunkReader, RowBatch};
use crate::config::IngestConfig;
use crate::io::ByteSource;
use crate::value::ColumnType;
use crate::{CsvIngestError, CsvResult};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Provisional metadata from the structural pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructureSummary {
    pub columns: Vec<String>,
    pub column_types: BTreeMap<String, ColumnType>,
    /// Extrapolated from the first batch; not a count.
    pub estimated_rows: u64,
}

/// Infers columns, type tags and a row estimate from one batch.
///
/// The estimate is `total_bytes / average re-serialized row size`, with
/// `total_bytes` in decoded CSV text, so it drifts whenever the first batch
/// is not representative of the file.
pub fn analyze_batch(batch: &RowBatch, total_bytes: u64, delimiter: u8) -> CsvResult<StructureSummary> {
    if batch.is_empty() {
        return Err(CsvIngestError::parse(
            "cannot infer structure from a batch with no data rows",
        ));
    }

    let columns = batch.columns().to_vec();
    let column_types = columns
        .iter()
        .cloned()
        .zip(batch.column_types())
        .collect();

    let avg_row_bytes = batch.serialized_len(delimiter) as f64 / batch.len() as f64;
    let estimated_rows = (total_bytes as f64 / avg_row_bytes).round().max(1.0) as u64;

    Ok(StructureSummary {
        columns,
        column_types,
        estimated_rows,
    })
}

/// Structural pass: reads only the first batch of `source`.
///
/// Compressed or transcoded sources are sized in decoded bytes, scaled
/// from the stored size by the decode ratio seen while reading that batch.
pub async fn analyze_structure(source: &ByteSource, config: &IngestConfig) -> CsvResult<StructureSummary> {
    let stored_bytes = source.len().await?;
    let (mut reader, tally) = ChunkReader::open_tallied(source, config).await?;
    let first = reader
        .next_batch()
        .await?
        .ok_or_else(|| CsvIngestError::parse("source has a header but no data rows"))?;

    let total_bytes = if source.meta(config.charset).is_byte_addressable() {
        stored_bytes
    } else {
        tally.decoded_total(stored_bytes)
    };
    let summary = analyze_batch(&first, total_bytes, config.delimiter)?;
    debug!(
        columns = summary.columns.len(),
        sampled_rows = first.len(),
        stored_bytes,
        decoded_bytes = total_bytes,
        estimated_rows = summary.estimated_rows,
        "structural pass done"
    );
    Ok(summary)
}
