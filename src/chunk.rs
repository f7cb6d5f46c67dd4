use crate::config::IngestConfig;
use crate::io::{ByteSource, DecodeTally, QuoteGuard, SourceReader};
use crate::value::{Cell, ColumnType, NullMarkers};
use crate::{CsvIngestError, CsvResult, SourcePosition};
use csv_async::{AsyncReader, ByteRecord, StringRecord};
use futures::Stream;
use std::collections::{HashMap, HashSet};
use std::mem::size_of;
use std::sync::Arc;

/// Rows sharing one schema, read in one pass and consumed once.
#[derive(Debug, Clone)]
pub struct RowBatch {
    columns: Arc<[String]>,
    rows: Vec<Vec<Cell>>,
    first_row: u64,
}

impl RowBatch {
    pub fn new(columns: Arc<[String]>, rows: Vec<Vec<Cell>>, first_row: u64) -> Self {
        Self {
            columns,
            rows,
            first_row,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn schema(&self) -> &Arc<[String]> {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<Cell>> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// 0-based index of the first data row within the source.
    pub fn first_row(&self) -> u64 {
        self.first_row
    }

    /// Per-column type tags inferred from this batch's values only.
    pub fn column_types(&self) -> Vec<ColumnType> {
        let mut types = vec![ColumnType::Integer; self.columns.len()];
        for row in &self.rows {
            for (t, cell) in types.iter_mut().zip(row) {
                *t = t.widen(cell);
            }
        }
        types
    }

    pub fn null_counts(&self) -> Vec<u64> {
        let mut counts = vec![0u64; self.columns.len()];
        for row in &self.rows {
            for (count, cell) in counts.iter_mut().zip(row) {
                *count += u64::from(cell.is_null());
            }
        }
        counts
    }

    /// Length of this batch (header included) written back out as CSV.
    pub fn serialized_len(&self, delimiter: u8) -> u64 {
        let header = line_len(self.columns.iter().map(|c| field_len(c, delimiter)));
        let body: u64 = self
            .rows
            .iter()
            .map(|row| {
                line_len(row.iter().map(|cell| match cell {
                    Cell::String(s) => field_len(s, delimiter),
                    Cell::Null => 0,
                    other => other.to_string().len() as u64,
                }))
            })
            .sum();
        header + body
    }

    /// Approximate bytes held in memory by this batch.
    pub fn memory_usage(&self) -> u64 {
        let schema: usize = self
            .columns
            .iter()
            .map(|c| size_of::<String>() + c.capacity())
            .sum();
        let rows: usize = self
            .rows
            .iter()
            .map(|row| {
                size_of::<Vec<Cell>>()
                    + row.capacity() * size_of::<Cell>()
                    + row.iter().map(Cell::heap_size).sum::<usize>()
            })
            .sum();
        (schema + rows) as u64
    }
}

fn field_len(text: &str, delimiter: u8) -> u64 {
    let quotes = text.bytes().filter(|&b| b == b'"').count();
    let needs_quoting =
        quotes > 0 || text.bytes().any(|b| b == delimiter || b == b'\n' || b == b'\r');
    if needs_quoting {
        (text.len() + 2 + quotes) as u64
    } else {
        text.len() as u64
    }
}

/// Fields plus delimiters plus the terminating newline.
fn line_len(fields: impl ExactSizeIterator<Item = u64>) -> u64 {
    let separators = fields.len().saturating_sub(1) as u64;
    fields.sum::<u64>() + separators + 1
}

/// Makes header names usable as unique map keys: blanks become
/// `Unnamed: <i>`, repeats get a `.1`, `.2`, … suffix.
pub(crate) fn normalize_headers<'a>(raw: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut used = HashSet::new();
    let mut suffixes: HashMap<String, usize> = HashMap::new();
    let mut out = Vec::new();
    for (i, name) in raw.enumerate() {
        let base = if name.trim().is_empty() {
            format!("Unnamed: {i}")
        } else {
            name.to_string()
        };
        let mut candidate = base.clone();
        while used.contains(&candidate) {
            let n = suffixes.entry(base.clone()).or_insert(0);
            *n += 1;
            candidate = format!("{base}.{n}");
        }
        used.insert(candidate.clone());
        out.push(candidate);
    }
    out
}

/// Lazy sequence of fixed-size row batches over one independent read cursor.
pub struct ChunkReader {
    reader: AsyncReader<SourceReader>,
    columns: Arc<[String]>,
    batch_size: usize,
    nulls: NullMarkers,
    record: StringRecord,
    rows_read: u64,
    remaining: Option<u64>,
    exhausted: bool,
}

impl ChunkReader {
    /// Opens `source` from the start and reads its header.
    pub async fn open(source: &ByteSource, config: &IngestConfig) -> CsvResult<Self> {
        Self::from_reader(source.open(config.charset).await?, config).await
    }

    /// [`ChunkReader::open`] plus the byte counts of the decode stack below it.
    pub async fn open_tallied(
        source: &ByteSource,
        config: &IngestConfig,
    ) -> CsvResult<(Self, DecodeTally)> {
        let (raw, tally) = source.open_tallied(config.charset).await?;
        Ok((Self::from_reader(raw, config).await?, tally))
    }

    async fn from_reader(raw: SourceReader, config: &IngestConfig) -> CsvResult<Self> {
        let guarded: SourceReader = Box::new(QuoteGuard::new(raw, config.delimiter));
        let mut reader = config.reader_builder().create_reader(guarded);

        let headers = reader.headers().await?;
        if headers.is_empty() || (headers.len() == 1 && headers[0].trim().is_empty()) {
            return Err(CsvIngestError::parse("no columns to parse from source"));
        }
        let columns: Arc<[String]> = normalize_headers(headers.iter()).into();

        Ok(Self::with_reader(reader, columns, 0, config))
    }

    /// Continues a scan from a stream already positioned at data row `first_row`.
    pub(crate) fn resume(
        raw: SourceReader,
        columns: Arc<[String]>,
        first_row: u64,
        config: &IngestConfig,
    ) -> Self {
        let mut builder = config.reader_builder();
        builder.has_headers(false);
        let guarded: SourceReader = Box::new(QuoteGuard::new(raw, config.delimiter));
        Self::with_reader(builder.create_reader(guarded), columns, first_row, config)
    }

    fn with_reader(
        reader: AsyncReader<SourceReader>,
        columns: Arc<[String]>,
        first_row: u64,
        config: &IngestConfig,
    ) -> Self {
        Self {
            reader,
            columns,
            batch_size: config.batch_size.max(1),
            nulls: config.null_markers.clone(),
            record: StringRecord::new(),
            rows_read: first_row,
            remaining: None,
            exhausted: false,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn schema(&self) -> Arc<[String]> {
        self.columns.clone()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Index of the next data row this reader will return.
    pub fn position(&self) -> u64 {
        self.rows_read
    }

    /// Stops the sequence after `limit` more rows.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.remaining = Some(limit);
        self
    }

    /// Next batch of at most `batch_size` rows, `None` once the source is drained.
    pub async fn next_batch(&mut self) -> CsvResult<Option<RowBatch>> {
        let want = match self.remaining {
            Some(remaining) => remaining.min(self.batch_size as u64) as usize,
            None => self.batch_size,
        };
        if self.exhausted || want == 0 {
            return Ok(None);
        }

        let first_row = self.rows_read;
        let mut rows = Vec::with_capacity(want);
        while rows.len() < want {
            if !self.reader.read_record(&mut self.record).await? {
                self.exhausted = true;
                break;
            }
            if self.record.len() != self.columns.len() {
                return Err(CsvIngestError::Parse {
                    position: self
                        .record
                        .position()
                        .map(|p| SourcePosition::at(p.line(), p.byte()))
                        .unwrap_or_default(),
                    message: format!(
                        "expected {} fields, found {}",
                        self.columns.len(),
                        self.record.len()
                    ),
                });
            }
            rows.push(
                self.record
                    .iter()
                    .map(|field| Cell::parse(field, &self.nulls))
                    .collect::<Vec<_>>(),
            );
        }

        let read = rows.len() as u64;
        self.rows_read += read;
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= read;
        }
        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(RowBatch {
            columns: self.columns.clone(),
            rows,
            first_row,
        }))
    }

    /// Skips up to `n` data rows without decoding them; returns how many were skipped.
    pub async fn skip_rows(&mut self, n: u64) -> CsvResult<u64> {
        // ByteRecord avoids per-row UTF-8 validation for rows we throw away
        let mut record = ByteRecord::new();
        let mut skipped = 0u64;
        while skipped < n {
            if !self.reader.read_byte_record(&mut record).await? {
                self.exhausted = true;
                break;
            }
            skipped += 1;
        }
        self.rows_read += skipped;
        Ok(skipped)
    }

    pub fn into_stream(self) -> impl Stream<Item = CsvResult<RowBatch>> + Send {
        futures::stream::try_unfold(self, |mut reader| async move {
            Ok::<_, CsvIngestError>(reader.next_batch().await?.map(|batch| (batch, reader)))
        })
    }
}

/// Rows `[offset, offset + limit)` of `source` (fewer at the end), from a fresh scan.
pub async fn read_rows(
    source: &ByteSource,
    config: &IngestConfig,
    offset: u64,
    limit: usize,
) -> CsvResult<RowBatch> {
    let reader = ChunkReader::open(source, config).await?;
    take_rows(reader, offset, limit).await
}

/// Skips `skip` rows from the reader's current position and reads up to `limit`.
pub(crate) async fn take_rows(
    mut reader: ChunkReader,
    skip: u64,
    limit: usize,
) -> CsvResult<RowBatch> {
    reader.skip_rows(skip).await?;
    let first_row = reader.position();
    let schema = reader.schema();
    reader.batch_size = limit.max(1);
    let mut reader = reader.with_limit(limit as u64);
    Ok(reader
        .next_batch()
        .await?
        .unwrap_or_else(|| RowBatch::new(schema, Vec::new(), first_row)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_and_repeated_headers_get_unique_names() {
        let names = normalize_headers(["id", "", "id", "id", "id.1"].into_iter());
        assert_eq!(names, vec!["id", "Unnamed: 1", "id.1", "id.2", "id.1.1"]);
    }

    #[test]
    fn serialized_len_quotes_fields_that_need_it() {
        let columns: Arc<[String]> = vec!["a".to_string(), "b".to_string()].into();
        let batch = RowBatch::new(
            columns,
            vec![vec![Cell::String("x,y".into()), Cell::Integer(10)]],
            0,
        );
        // "a,b\n" + "\"x,y\",10\n"
        assert_eq!(batch.serialized_len(b','), 4 + 9);
    }
}
