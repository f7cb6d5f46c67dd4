use crate::chunk::normalize_headers;
use crate::index::RowIndex;
use crate::{CsvIngestError, CsvResult};
use memchr::{memchr, memchr_iter, memmem};
use memmap2::MmapOptions;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::thread;

const UTF8_BOM: &[u8] = b"\xef\xbb\xbf";

/// Row index for a local uncompressed UTF-8 CSV using mmap and parallel chunking.
///
/// Returns `Ok(None)` when a newline is not guaranteed to end a record (any
/// quote, carriage return or blank line, or a BOM); the caller then falls
/// back to the streaming builder.
pub fn fast_local_row_index(
    path: &Path,
    delimiter: u8,
    stride: u64,
) -> CsvResult<Option<RowIndex>> {
    let stride = stride.max(1);
    let file = File::open(path)?;
    let len = file.metadata()?.len() as usize;
    if len == 0 {
        return Ok(None);
    }
    let mmap = unsafe { MmapOptions::new().map(&file)? };
    let data: &[u8] = &mmap[..];

    if data.starts_with(UTF8_BOM)
        || data[0] == b'\n'
        || memchr(b'"', data).is_some()
        || memchr(b'\r', data).is_some()
        || memmem::find(data, b"\n\n").is_some()
    {
        return Ok(None);
    }

    let Some(header_end) = memchr(b'\n', data) else {
        return Ok(None);
    };
    let header = std::str::from_utf8(&data[..header_end])
        .map_err(|e| CsvIngestError::parse(format!("header is not UTF-8: {e}")))?;
    let columns: Arc<[String]> = normalize_headers(header.split(char::from(delimiter))).into();

    let body_start = header_end + 1;
    if body_start >= len {
        return Ok(Some(RowIndex::new(columns, stride, Vec::new(), 0, len as u64)));
    }

    // Split the body on row boundaries, one slice per core
    let cores = num_cpus::get().max(1);
    let approx = ((len - body_start) / cores).max(1);
    let mut starts = vec![body_start];
    for k in 1..cores {
        let pos = body_start + k * approx;
        if pos >= len {
            break;
        }
        let next = memchr(b'\n', &data[pos..]).map_or(len, |off| pos + off + 1);
        if next < len && next > starts[starts.len() - 1] {
            starts.push(next);
        }
    }
    starts.push(len);

    // Pass 1: rows per slice
    let counts = thread::scope(|s| {
        let handles: Vec<_> = starts
            .windows(2)
            .map(|w| {
                let slice = &data[w[0]..w[1]];
                s.spawn(move || count_row_starts(slice))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join())
            .collect::<Result<Vec<u64>, _>>()
    })
    .map_err(|_| std::io::Error::other("row count worker panicked"))?;

    let mut first_rows = Vec::with_capacity(counts.len());
    let mut total_rows = 0u64;
    for count in &counts {
        first_rows.push(total_rows);
        total_rows += count;
    }

    // Pass 2: checkpoint offsets per slice, now that global row numbers are known
    let parts = thread::scope(|s| {
        let handles: Vec<_> = starts
            .windows(2)
            .zip(&first_rows)
            .map(|(w, &first_row)| {
                let (base, slice) = (w[0], &data[w[0]..w[1]]);
                s.spawn(move || slice_checkpoints(slice, base, first_row, stride))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join())
            .collect::<Result<Vec<Vec<u64>>, _>>()
    })
    .map_err(|_| std::io::Error::other("row index worker panicked"))?;

    let checkpoints = parts.into_iter().flatten().collect();
    Ok(Some(RowIndex::new(
        columns,
        stride,
        checkpoints,
        total_rows,
        len as u64,
    )))
}

/// Rows starting in `slice`, which itself starts on a row boundary.
fn count_row_starts(slice: &[u8]) -> u64 {
    1 + memchr_iter(b'\n', slice)
        .filter(|&nl| nl + 1 < slice.len())
        .count() as u64
}

fn slice_checkpoints(slice: &[u8], base: usize, first_row: u64, stride: u64) -> Vec<u64> {
    let mut out = Vec::new();
    let mut row = first_row;
    if row % stride == 0 {
        out.push(base as u64);
    }
    for nl in memchr_iter(b'\n', slice) {
        if nl + 1 >= slice.len() {
            break;
        }
        row += 1;
        if row % stride == 0 {
            out.push((base + nl + 1) as u64);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn checkpoints_land_on_row_starts() -> anyhow::Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        write!(file, "id,v\n")?;
        for i in 0..25 {
            writeln!(file, "{i},x{i}")?;
        }
        file.flush()?;

        let index = fast_local_row_index(file.path(), b',', 10)?.expect("unquoted file");
        assert_eq!(index.total_rows(), 25);
        assert_eq!(index.checkpoints().len(), 3);

        let data = std::fs::read(file.path())?;
        for (slot, &byte) in index.checkpoints().iter().enumerate() {
            let expected = format!("{},", slot * 10);
            assert!(data[byte as usize..].starts_with(expected.as_bytes()));
        }
        Ok(())
    }

    #[test]
    fn quoted_files_fall_back() -> anyhow::Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        write!(file, "id,v\n1,\"a\nb\"\n")?;
        file.flush()?;
        assert!(fast_local_row_index(file.path(), b',', 10)?.is_none());
        Ok(())
    }
}
