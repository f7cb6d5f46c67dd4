use crate::chunk::{read_rows, RowBatch};
use crate::config::IngestConfig;
use crate::index::RowIndexCache;
use crate::io::ByteSource;
use crate::record::{FileRecord, FileStatus};
use crate::value::{Cell, ColumnType};
use crate::{CsvIngestError, CsvResult};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_PAGE_SIZE: u64 = 100;
pub const MAX_PAGE_SIZE: u64 = 10_000;

/// A normalized page request: `page >= 1`, `page_size` in `[1, MAX_PAGE_SIZE]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u64,
    pub page_size: u64,
}

impl PageRequest {
    /// Clamps raw caller input: a page below 1 becomes 1, an out-of-range
    /// page size becomes [`DEFAULT_PAGE_SIZE`].
    pub fn new(page: i64, page_size: i64) -> Self {
        let page = u64::try_from(page).unwrap_or(0).max(1);
        let page_size = u64::try_from(page_size)
            .ok()
            .filter(|size| (1..=MAX_PAGE_SIZE).contains(size))
            .unwrap_or(DEFAULT_PAGE_SIZE);
        Self { page, page_size }
    }

    pub fn offset(&self) -> u64 {
        (self.page - 1).saturating_mul(self.page_size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// One row keyed by column name, serialized as an ordered map.
#[derive(Debug, Clone, PartialEq)]
pub struct RowObject {
    columns: Arc<[String]>,
    cells: Vec<Cell>,
}

impl RowObject {
    pub fn get(&self, column: &str) -> Option<&Cell> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.cells.get(idx)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }
}

impl Serialize for RowObject {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (column, cell) in self.columns.iter().zip(&self.cells) {
            map.serialize_entry(column, cell)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Page {
    pub data: Vec<RowObject>,
    pub page: u64,
    pub page_size: u64,
    pub total_rows: u64,
    pub total_pages: u64,
    pub has_next: bool,
    pub has_previous: bool,
    pub columns: Vec<String>,
    pub column_types: BTreeMap<String, ColumnType>,
}

/// Page reads over processed files. Holds the row-index cache shared by
/// every read through this paginator.
#[derive(Debug, Default)]
pub struct Paginator {
    config: IngestConfig,
    index: RowIndexCache,
}

impl Paginator {
    pub fn new(config: IngestConfig) -> Self {
        Self {
            config,
            index: RowIndexCache::new(),
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn index_cache(&self) -> &RowIndexCache {
        &self.index
    }

    /// Reads one page of a `completed` file with a location on disk.
    pub async fn read_page(&self, record: &FileRecord, request: PageRequest) -> CsvResult<Page> {
        if record.status != FileStatus::Completed {
            return Err(CsvIngestError::NotReady {
                id: record.id,
                status: record.status,
            });
        }
        let location = record.location.as_deref().ok_or_else(|| {
            CsvIngestError::Validation(format!("file {} has no stable location to page", record.id))
        })?;

        let offset = request.offset();
        let total_rows = record.row_count;
        let batch = if total_rows.is_some_and(|total| offset >= total) {
            None
        } else {
            Some(self.fetch(location, offset, request.page_size as usize).await?)
        };

        let columns = record
            .columns
            .clone()
            .or_else(|| batch.as_ref().map(|b| b.columns().to_vec()))
            .unwrap_or_default();
        let column_types = record.column_types.clone().unwrap_or_default();
        Ok(assemble_page(batch, request, total_rows, columns, column_types))
    }

    /// Rows `[offset, offset + limit)`, through the row index for deep
    /// offsets into byte-addressable files, by a fresh scan otherwise.
    async fn fetch(&self, location: &Path, offset: u64, limit: usize) -> CsvResult<RowBatch> {
        let source = ByteSource::path(location);
        let deep = offset >= self.config.index_stride;
        if deep && source.meta(self.config.charset).is_byte_addressable() {
            let index = self.index.get_or_build(location, &self.config).await?;
            debug!(offset, limit, "page read via row index");
            index.read_rows(location, &self.config, offset, limit).await
        } else {
            read_rows(&source, &self.config, offset, limit).await
        }
    }
}

fn assemble_page(
    batch: Option<RowBatch>,
    request: PageRequest,
    known_total: Option<u64>,
    columns: Vec<String>,
    column_types: BTreeMap<String, ColumnType>,
) -> Page {
    let offset = request.offset();
    let (schema, rows) = match batch {
        Some(batch) => (Some(batch.schema().clone()), batch.into_rows()),
        None => (None, Vec::new()),
    };
    let returned = rows.len() as u64;
    let total_rows = known_total.unwrap_or(offset + returned);
    let total_pages = total_rows.div_ceil(request.page_size);

    let data = match schema {
        Some(schema) => rows
            .into_iter()
            .map(|cells| RowObject {
                columns: schema.clone(),
                cells,
            })
            .collect(),
        None => Vec::new(),
    };

    Page {
        data,
        page: request.page,
        page_size: request.page_size,
        total_rows,
        total_pages,
        has_next: request.page < total_pages,
        has_previous: request.page > 1,
        columns,
        column_types,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_requests_are_clamped() {
        assert_eq!(PageRequest::new(0, 50), PageRequest { page: 1, page_size: 50 });
        assert_eq!(PageRequest::new(-3, 0), PageRequest { page: 1, page_size: 100 });
        assert_eq!(PageRequest::new(2, 10_001).page_size, 100);
        assert_eq!(PageRequest::new(2, 10_000).page_size, 10_000);
        assert_eq!(PageRequest::new(3, 25).offset(), 50);
    }

    #[test]
    fn empty_page_past_the_end_reports_no_next() {
        let page = assemble_page(
            None,
            PageRequest::new(3, 5),
            Some(5),
            vec!["a".into()],
            BTreeMap::new(),
        );
        assert!(page.data.is_empty());
        assert_eq!(page.total_pages, 1);
        assert!(!page.has_next);
        assert!(page.has_previous);
    }
}
