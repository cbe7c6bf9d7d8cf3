//! # Query digest
//!
//! Reports SQL queries made by a given code path, affecting a given table or
//! database, or issued by a given service, from the sampled query logs
//! stored in Elasticsearch. Queries can also be read from a file with one
//! query per line.
//!
//! ```text
//! query-digest --file=/var/log/queries.log
//! query-digest --path=extensions/wikia/Wall --last-24h
//! query-digest --table=image_view --data-flow
//! query-digest --service=liftigniter-metadata --csv
//! query-digest --database=statsdb --sql-log
//! ```

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use clap::{ArgGroup, Parser};
use query_digest::config::DEFAULT_ES_HOST;
use query_digest::{
    DigestError, OutputMode, RetrievalConfig, RunOptions, SamplingRate, Scope, pipeline, render,
};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Defines the command-line arguments accepted by the program.
#[derive(Parser, Debug)]
#[command(
    name = "query-digest",
    author,
    version,
    about,
    long_about = "A dynamic code analysis tool that processes SQL query logs and reports the queries made by a given feature, service or script, or those using a given table or database."
)]
#[command(group(
    ArgGroup::new("scope").args(["file", "path", "table", "service", "database"]).multiple(false)
))]
#[command(group(
    ArgGroup::new("mode").args(["csv", "simple", "data_flow", "sql_log"]).multiple(false)
))]
struct Args {
    /// SQL file with one query per line.
    #[arg(long)]
    file: Option<PathBuf>,

    /// Code path the queries were made from, e.g. extensions/wikia/Wall.
    #[arg(long)]
    path: Option<String>,

    /// Table the queries read from or write to.
    #[arg(long)]
    table: Option<String>,

    /// Service whose sampled query log should be digested.
    #[arg(long)]
    service: Option<String>,

    /// Database the queries were made against.
    #[arg(long)]
    database: Option<String>,

    /// Write the report as CSV.
    #[arg(long)]
    csv: bool,

    /// List queries only.
    #[arg(long)]
    simple: bool,

    /// Write data-flow graph edges as TSV.
    #[arg(long = "data-flow")]
    data_flow: bool,

    /// Write near-original queries prefixed with their callers.
    #[arg(long = "sql-log")]
    sql_log: bool,

    /// Digest the last 24 hours instead of the last hour.
    #[arg(long = "last-24h")]
    last_24h: bool,

    /// Elasticsearch host storing the query logs.
    #[arg(long, env = "QUERY_DIGEST_ES_HOST", default_value = DEFAULT_ES_HOST)]
    es_host: String,

    /// Maximum number of log messages fetched per log source.
    #[arg(long)]
    limit: Option<usize>,

    /// Sampling rate of the query logs in (0, 1], overrides the per source defaults.
    #[arg(long, value_parser = parse_sampling_rate)]
    sampling_rate: Option<SamplingRate>,

    /// Path for the report. If omitted, output will be sent to stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

impl Args {
    fn output_mode(&self) -> OutputMode {
        if self.csv {
            OutputMode::Csv
        } else if self.simple {
            OutputMode::Simple
        } else if self.data_flow {
            OutputMode::DataFlow
        } else if self.sql_log {
            OutputMode::SqlLog
        } else {
            OutputMode::Grid
        }
    }

    fn period(&self) -> u64 {
        if self.last_24h { 86_400 } else { 3_600 }
    }
}

fn parse_sampling_rate(value: &str) -> Result<SamplingRate, String> {
    let rate: f64 = value
        .parse()
        .map_err(|_| format!("'{value}' is not a number"))?;

    SamplingRate::new(rate).ok_or_else(|| format!("'{value}' is not in (0, 1]"))
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run(args: Args) -> Result<(), DigestError> {
    let mode = args.output_mode();
    let period = args.period();

    let scope = Scope::select(
        args.file,
        args.path,
        args.table,
        args.service,
        args.database,
    )?;
    info!("Digesting queries for {}", scope.describe());

    let options = RunOptions {
        retrieval: RetrievalConfig {
            es_host: args.es_host,
            period,
            ..RetrievalConfig::default()
        },
        limit: args.limit,
        sampling: args.sampling_rate,
    };

    let report = pipeline::run(&scope, &options)?;

    let mut writer: Box<dyn Write> = match &args.output {
        Some(path) => {
            info!("Output file: {}", path.display());
            Box::new(BufWriter::new(File::create(path)?))
        }
        None => Box::new(std::io::stdout().lock()),
    };

    render(&report, mode, &mut writer)?;
    info!("Reported {} kinds of queries", report.data.len());

    Ok(())
}

/// Parses the arguments, runs the digest and maps failures to exit codes.
fn main() {
    init_tracing();

    if let Err(err) = run(Args::parse()) {
        eprintln!("Error: {err}");
        std::process::exit(err.exit_code());
    }
}
