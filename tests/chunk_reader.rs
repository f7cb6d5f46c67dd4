use csv_ingest_pipeline::{
    read_rows, ByteSource, Cell, ChunkReader, CsvIngestError, IngestConfig, RowBatch,
};
use futures::TryStreamExt;

const PEOPLE: &str =
    "name,age,city\nJohn,25,NYC\nJane,30,LA\nBob,35,Chicago\nAlice,28,Boston\nCharlie,32,Seattle";

fn csv_with_rows(n: usize) -> String {
    let mut s = String::from("id,label\n");
    for i in 0..n {
        s.push_str(&format!("{i},row{i}\n"));
    }
    s
}

fn names(batch: &RowBatch) -> Vec<String> {
    batch.rows().iter().map(|row| row[0].to_string()).collect()
}

#[tokio::test]
async fn batches_cover_every_row_with_full_batches_first() -> anyhow::Result<()> {
    for n in [1usize, 2, 7, 10, 23] {
        for b in [1usize, 3, 10, 50] {
            let source = ByteSource::memory(csv_with_rows(n));
            let config = IngestConfig::default().with_batch_size(b);
            let batches: Vec<RowBatch> = ChunkReader::open(&source, &config)
                .await?
                .into_stream()
                .try_collect()
                .await?;

            let total: usize = batches.iter().map(RowBatch::len).sum();
            assert_eq!(total, n, "n={n} b={b}");
            let (last, full) = batches.split_last().unwrap();
            assert!(full.iter().all(|batch| batch.len() == b), "n={n} b={b}");
            assert!(last.len() <= b && !last.is_empty());
            assert!(batches.iter().all(|batch| batch.columns() == ["id", "label"]));
        }
    }
    Ok(())
}

#[tokio::test]
async fn batches_track_their_first_row() -> anyhow::Result<()> {
    let source = ByteSource::memory(csv_with_rows(10));
    let config = IngestConfig::default().with_batch_size(4);
    let mut reader = ChunkReader::open(&source, &config).await?;
    let mut firsts = Vec::new();
    while let Some(batch) = reader.next_batch().await? {
        firsts.push(batch.first_row());
    }
    assert_eq!(firsts, vec![0, 4, 8]);
    Ok(())
}

#[tokio::test]
async fn bounded_read_returns_the_requested_window() -> anyhow::Result<()> {
    let source = ByteSource::memory(PEOPLE);
    let config = IngestConfig::default();

    let first = read_rows(&source, &config, 0, 2).await?;
    assert_eq!(names(&first), vec!["John", "Jane"]);

    let middle = read_rows(&source, &config, 2, 2).await?;
    assert_eq!(names(&middle), vec!["Bob", "Alice"]);
    assert_eq!(middle.first_row(), 2);

    let tail = read_rows(&source, &config, 4, 10).await?;
    assert_eq!(names(&tail), vec!["Charlie"]);

    let past_end = read_rows(&source, &config, 10, 5).await?;
    assert!(past_end.is_empty());
    assert_eq!(past_end.columns(), ["name", "age", "city"]);
    Ok(())
}

#[tokio::test]
async fn cells_are_typed_and_nulls_canonical() -> anyhow::Result<()> {
    let source = ByteSource::memory("a,b,c\n1,2.5,x\nNA,,null\n");
    let batch = read_rows(&source, &IngestConfig::default(), 0, 10).await?;
    assert_eq!(
        batch.rows(),
        &[
            vec![Cell::Integer(1), Cell::Float(2.5), Cell::String("x".into())],
            vec![Cell::Null, Cell::Null, Cell::Null],
        ]
    );
    Ok(())
}

#[tokio::test]
async fn missing_file_is_an_io_error() {
    let source = ByteSource::path("/nonexistent/file.csv");
    let err = ChunkReader::open(&source, &IngestConfig::default())
        .await
        .err()
        .expect("open should fail");
    assert!(matches!(err, CsvIngestError::Io(_)), "{err:?}");
}

#[tokio::test]
async fn wrong_field_count_names_its_line() -> anyhow::Result<()> {
    let source = ByteSource::memory("a,b\n1,2\n3,4,5\n6,7\n");
    let mut reader = ChunkReader::open(&source, &IngestConfig::default()).await?;
    let err = reader.next_batch().await.unwrap_err();
    match err {
        CsvIngestError::Parse { position, .. } => assert_eq!(position.line, Some(3)),
        other => panic!("expected parse error, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn unterminated_quote_is_a_parse_error() -> anyhow::Result<()> {
    let source = ByteSource::memory("a,b\n\"x,1\n2,3\n");
    let mut reader = ChunkReader::open(&source, &IngestConfig::default()).await?;
    assert!(matches!(
        reader.next_batch().await,
        Err(CsvIngestError::Parse { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn unterminated_quote_in_last_column_is_a_parse_error() -> anyhow::Result<()> {
    let source = ByteSource::memory("a,b\n1,\"2\n3,4\n");
    let mut reader = ChunkReader::open(&source, &IngestConfig::default()).await?;
    match reader.next_batch().await {
        Err(CsvIngestError::Parse { position, message }) => {
            assert_eq!(position.line, Some(2));
            assert_eq!(position.byte, Some(6));
            assert!(message.contains("unterminated"), "{message}");
        }
        other => panic!("expected parse error, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn closed_and_escaped_quotes_still_parse() -> anyhow::Result<()> {
    let source = ByteSource::memory("a,b\n1,\"say \"\"hi\"\"\"\n2,\"x\ny\"\n3,5\" screen\n");
    let batch = read_rows(&source, &IngestConfig::default(), 0, 10).await?;
    let labels: Vec<String> = batch.rows().iter().map(|row| row[1].to_string()).collect();
    assert_eq!(labels, vec!["say \"hi\"", "x\ny", "5\" screen"]);
    Ok(())
}

#[tokio::test]
async fn empty_source_has_no_columns() {
    let result = ChunkReader::open(&ByteSource::memory(""), &IngestConfig::default()).await;
    assert!(matches!(result, Err(CsvIngestError::Parse { .. })));
}

#[tokio::test]
async fn duplicate_headers_are_disambiguated() -> anyhow::Result<()> {
    let source = ByteSource::memory("x,x,\n1,2,3\n");
    let reader = ChunkReader::open(&source, &IngestConfig::default()).await?;
    assert_eq!(reader.columns(), ["x", "x.1", "Unnamed: 2"]);
    Ok(())
}

#[tokio::test]
async fn latin1_source_is_transcoded() -> anyhow::Result<()> {
    let source = ByteSource::memory(&b"city,n\nM\xfcnchen,1\n"[..]);
    let config = IngestConfig::default().with_charset_label("latin1")?;
    let batch = read_rows(&source, &config, 0, 1).await?;
    assert_eq!(batch.rows()[0][0], Cell::String("München".into()));
    Ok(())
}
