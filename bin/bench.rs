use clap::{Arg, ArgAction, Command};
use csv_ingest_pipeline::{
    analyze_structure, collect_statistics, ByteSource, FileRecord, FileStatus, IngestConfig,
    PageRequest, Paginator,
};
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let matches = Command::new("bench")
        .about("Time the structural pass, the statistics pass and a page read on one file")
        .arg(Arg::new("path").long("path").required(true).value_parser(clap::value_parser!(PathBuf)))
        .arg(Arg::new("batch-size").long("batch-size").help("Rows per batch (default from CSV_INGEST_BATCH_SIZE or 10000)").value_parser(clap::value_parser!(usize)))
        .arg(Arg::new("page").long("page").help("Also read this 1-based page after the statistics pass").value_parser(clap::value_parser!(i64)))
        .arg(Arg::new("page-size").long("page-size").default_value("100").value_parser(clap::value_parser!(i64)))
        .arg(Arg::new("json").long("json").help("Print the statistics as JSON").action(ArgAction::SetTrue))
        .get_matches();

    let path = matches.get_one::<PathBuf>("path").unwrap().clone();
    let mut config = IngestConfig::from_env()?;
    if let Some(&batch_size) = matches.get_one::<usize>("batch-size") {
        config = config.with_batch_size(batch_size);
    }
    let source = ByteSource::path(&path);

    let start = Instant::now();
    let structure = analyze_structure(&source, &config).await?;
    let structure_secs = start.elapsed().as_secs_f64();
    println!(
        "source={} columns={:?} estimated_rows={}\nstructure elapsed={:.3}s",
        path.display(),
        structure.columns,
        structure.estimated_rows,
        structure_secs
    );

    let start = Instant::now();
    let stats = collect_statistics(&source, &config).await?;
    let elapsed = start.elapsed().as_secs_f64();
    let rps = (stats.total_rows as f64) / elapsed;
    println!(
        "rows={} null_counts={:?} memory_estimate={}B\nstatistics elapsed={:.1}s rows/sec={:.0}",
        stats.total_rows, stats.null_counts, stats.memory_usage_estimate, elapsed, rps
    );
    if matches.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    }

    if let Some(&page) = matches.get_one::<i64>("page") {
        let page_size = *matches.get_one::<i64>("page-size").unwrap();
        let mut record = FileRecord::new(
            path.file_name().and_then(|s| s.to_str()).unwrap_or_default(),
            Some(path.clone()),
            stats.source_size_bytes,
        );
        record.status = FileStatus::Completed;
        record.row_count = Some(stats.total_rows);
        record.columns = Some(stats.columns.clone());
        record.column_types = Some(stats.column_types.clone());

        let paginator = Paginator::new(config);
        let request = PageRequest::new(page, page_size);
        for attempt in ["cold", "warm"] {
            let start = Instant::now();
            let result = paginator.read_page(&record, request).await?;
            println!(
                "page={} ({attempt}) rows={} total_pages={} elapsed={:.3}s",
                result.page,
                result.data.len(),
                result.total_pages,
                start.elapsed().as_secs_f64()
            );
        }
    }
    Ok(())
}
