use clap::{Arg, ArgAction, Command};
use std::io::{self, Write};

const CITIES: &[&str] = &["NYC", "LA", "Chicago", "Boston", "Seattle", "Austin"];

fn main() -> anyhow::Result<()> {
    let matches = Command::new("gen")
        .about("Write a synthetic CSV with integer, float and string columns to stdout")
        .arg(
            Arg::new("rows")
                .long("rows")
                .value_parser(clap::value_parser!(u64))
                .required(true),
        )
        .arg(
            Arg::new("no_header")
                .long("no-header")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("null_every")
                .long("null-every")
                .help("Leave the score column empty on every Nth row (0 = never)")
                .value_parser(clap::value_parser!(u64))
                .default_value("0"),
        )
        .arg(Arg::new("delim").long("delim").default_value(","))
        .get_matches();

    let rows: u64 = *matches.get_one("rows").unwrap();
    let with_header = !matches.get_flag("no_header");
    let null_every: u64 = *matches.get_one("null_every").unwrap();
    let delim = matches.get_one::<String>("delim").unwrap();

    let mut out = io::BufWriter::new(io::stdout().lock());

    if with_header {
        writeln!(&mut out, "id{d}name{d}score{d}city", d = delim)?;
    }

    // Deterministic data: id, name, score, city
    for i in 0..rows {
        write!(&mut out, "{i}{delim}user_{i:08}{delim}")?;
        if null_every == 0 || (i + 1) % null_every != 0 {
            write!(&mut out, "{}.{:02}", i % 1000, i % 100)?;
        }
        writeln!(&mut out, "{delim}{}", CITIES[(i as usize) % CITIES.len()])?;
        if i % 10_000 == 0 {
            out.flush()?;
        } // keep buffers moving on huge runs
    }

    out.flush()?;
    Ok(())
}
