use csv_ingest_pipeline::{
    build_row_index, collect_statistics, read_rows, ByteSource, Cell, CsvIngestError,
    FileRecord, FileStatus, IngestConfig, PageRequest, Paginator,
};
use std::path::{Path, PathBuf};

const PEOPLE: &str =
    "name,age,city\nJohn,25,NYC\nJane,30,LA\nBob,35,Chicago\nAlice,28,Boston\nCharlie,32,Seattle";

/// A completed record for `path`, as the pipeline would leave it.
async fn completed_record(path: &Path, config: &IngestConfig) -> anyhow::Result<FileRecord> {
    let stats = collect_statistics(&ByteSource::path(path), config).await?;
    let mut record = FileRecord::new("test.csv", Some(path.to_path_buf()), stats.source_size_bytes);
    record.status = FileStatus::Completed;
    record.progress = 100.0;
    record.row_count = Some(stats.total_rows);
    record.columns = Some(stats.columns);
    record.column_types = Some(stats.column_types);
    Ok(record)
}

fn write_csv(dir: &tempfile::TempDir, name: &str, content: &str) -> std::io::Result<PathBuf> {
    let path = dir.path().join(name);
    std::fs::write(&path, content)?;
    Ok(path)
}

fn numbered_csv(rows: usize) -> String {
    let mut s = String::from("id,label,score\n");
    for i in 0..rows {
        if i % 5 == 0 {
            s.push_str(&format!("{i},\"row, {i}\",\n"));
        } else {
            s.push_str(&format!("{i},row{i},{}.5\n", i % 10));
        }
    }
    s
}

#[tokio::test]
async fn second_page_holds_bob_and_alice() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_csv(&dir, "people.csv", PEOPLE)?;
    let config = IngestConfig::default();
    let record = completed_record(&path, &config).await?;

    let paginator = Paginator::new(config);
    let page = paginator.read_page(&record, PageRequest::new(2, 2)).await?;

    let names: Vec<_> = page.data.iter().map(|row| row.get("name").cloned()).collect();
    assert_eq!(
        names,
        vec![Some(Cell::String("Bob".into())), Some(Cell::String("Alice".into()))]
    );
    assert_eq!(page.total_rows, 5);
    assert_eq!(page.total_pages, 3);
    assert!(page.has_next);
    assert!(page.has_previous);
    assert_eq!(page.columns, vec!["name", "age", "city"]);
    Ok(())
}

#[tokio::test]
async fn page_past_the_end_is_empty() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_csv(&dir, "people.csv", PEOPLE)?;
    let config = IngestConfig::default();
    let record = completed_record(&path, &config).await?;

    // offset 10, limit 5
    let page = Paginator::new(config)
        .read_page(&record, PageRequest::new(3, 5))
        .await?;
    assert!(page.data.is_empty());
    assert!(!page.has_next);
    assert_eq!(page.total_pages, 1);
    Ok(())
}

#[tokio::test]
async fn page_lengths_follow_the_remaining_rows() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_csv(&dir, "numbered.csv", &numbered_csv(37))?;
    let config = IngestConfig::default();
    let record = completed_record(&path, &config).await?;
    let paginator = Paginator::new(config);

    for page_size in [1i64, 4, 10, 37, 100] {
        for page in 1i64..=12 {
            let request = PageRequest::new(page, page_size);
            let result = paginator.read_page(&record, request).await?;
            let expected = request.page_size.min(37u64.saturating_sub(request.offset()));
            assert_eq!(result.data.len() as u64, expected, "page={page} size={page_size}");
            if let Some(first) = result.data.first() {
                assert_eq!(first.get("id"), Some(&Cell::Integer(request.offset() as i64)));
            }
        }
    }
    Ok(())
}

#[tokio::test]
async fn invalid_request_values_fall_back_to_defaults() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_csv(&dir, "numbered.csv", &numbered_csv(150))?;
    let config = IngestConfig::default();
    let record = completed_record(&path, &config).await?;

    let page = Paginator::new(config)
        .read_page(&record, PageRequest::new(0, 50_000))
        .await?;
    assert_eq!(page.page, 1);
    assert_eq!(page.page_size, 100);
    assert_eq!(page.data.len(), 100);
    assert!(!page.has_previous);
    Ok(())
}

#[tokio::test]
async fn missing_values_serialize_as_null() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_csv(&dir, "nulls.csv", "name,age\nJane,\nBob,N/A\n")?;
    let config = IngestConfig::default();
    let record = completed_record(&path, &config).await?;

    let page = Paginator::new(config)
        .read_page(&record, PageRequest::default())
        .await?;
    let json = serde_json::to_value(&page)?;
    assert_eq!(json["data"][0]["name"], "Jane");
    assert!(json["data"][0]["age"].is_null());
    assert!(json["data"][1]["age"].is_null());
    assert_eq!(json["column_types"]["age"], "integer");
    assert_eq!(json["has_next"], false);
    Ok(())
}

#[tokio::test]
async fn unfinished_files_are_not_paged() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_csv(&dir, "people.csv", PEOPLE)?;
    let mut record = FileRecord::new("people.csv", Some(path), PEOPLE.len() as u64);
    record.status = FileStatus::Processing;

    let err = Paginator::default()
        .read_page(&record, PageRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CsvIngestError::NotReady {
            status: FileStatus::Processing,
            ..
        }
    ));
    Ok(())
}

#[tokio::test]
async fn deep_pages_via_index_match_fresh_scans() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_csv(&dir, "numbered.csv", &numbered_csv(2_345))?;
    let config = IngestConfig::default().with_index_stride(100);
    let record = completed_record(&path, &config).await?;
    let paginator = Paginator::new(config.clone());
    let source = ByteSource::path(&path);

    for (page, page_size) in [(3i64, 100i64), (7, 33), (24, 100), (71, 33), (2, 1000)] {
        let request = PageRequest::new(page, page_size);
        let indexed = paginator.read_page(&record, request).await?;
        let scanned = read_rows(&source, &config, request.offset(), request.page_size as usize).await?;
        let indexed_cells: Vec<_> = indexed.data.iter().map(|row| row.cells().to_vec()).collect();
        assert_eq!(indexed_cells, scanned.into_rows(), "page={page} size={page_size}");
    }
    assert_eq!(paginator.index_cache().len(), 1);
    Ok(())
}

#[tokio::test]
async fn row_index_checkpoints_every_stride() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_csv(&dir, "numbered.csv", &numbered_csv(250))?;
    let config = IngestConfig::default().with_index_stride(100);
    let index = build_row_index(&path, &config).await?;

    assert_eq!(index.total_rows(), 250);
    assert_eq!(index.checkpoints().len(), 3);
    assert_eq!(index.checkpoint_for(0).map(|(row, _)| row), Some(0));
    assert_eq!(index.checkpoint_for(199).map(|(row, _)| row), Some(100));
    assert_eq!(index.checkpoint_for(250), None);

    let batch = index.read_rows(&path, &config, 205, 3).await?;
    let ids: Vec<_> = batch.rows().iter().map(|row| row[0].clone()).collect();
    assert_eq!(ids, vec![Cell::Integer(205), Cell::Integer(206), Cell::Integer(207)]);
    Ok(())
}
