//! Data-flow graph edges between callers and database tables.
//!
//! Each edge is written as one TSV line:
//!
//! ```text
//! (source node)\t(edge label)\t(target node)\t(edge weight)\t(metadata for tooltip)
//! ```
//!
//! Reads flow from the table to the caller, writes from the caller to the
//! table.

use std::fmt;
use std::io::Write;

use tracing::{debug, error};

use crate::caller::{CallerReference, parse_caller};
use crate::digest::AggregatedRecord;
use crate::metadata::{QueryKind, get_query_metadata};

/// One edge of the data-flow graph.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeRecord {
    pub source: String,
    pub edge: String,
    pub target: String,
    /// Group count relative to the largest group, in `[0, 1]`.
    pub weight: f64,
    pub metadata: String,
}

impl fmt::Display for EdgeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{:.2}\t{}",
            self.source, self.edge, self.target, self.weight, self.metadata
        )
    }
}

/// Graph node of a table: `db:table`, or `db:table` taken from a
/// `db.table` qualified name.
fn table_node(dbname: &str, table: &str) -> String {
    if table.contains('.') {
        table.replace('.', ":")
    } else {
        format!("{dbname}:{table}")
    }
}

fn resolve(record: &AggregatedRecord) -> Option<(QueryKind, Vec<String>, CallerReference)> {
    let metadata = match get_query_metadata(&record.query) {
        Ok(metadata) => metadata,
        Err(err) => {
            error!(method = %record.method, "unable to parse query metadata: {err}");
            return None;
        }
    };

    let Some(tables) = metadata.tables else {
        debug!(kind = %metadata.kind, "no tables involved, skipping");
        return None;
    };

    match parse_caller(&record.method, &metadata.kind) {
        Ok(caller) => Some((metadata.kind, tables, caller)),
        Err(err) => {
            error!(query = %record.query, "unable to parse method name: {err}");
            None
        }
    }
}

/// Yields one edge per table the aggregated query touches.
///
/// Nothing is yielded for transaction and status statements or when the
/// query or its caller cannot be parsed. Counts and times in the metadata
/// are scaled by the sampling rate of the record's log source.
pub fn format_edges(
    record: &AggregatedRecord,
    max_count: usize,
) -> impl Iterator<Item = EdgeRecord> + '_ {
    let weight = if max_count == 0 {
        0.0
    } else {
        record.count as f64 / max_count as f64
    };

    let scale = record.sampling.scale();
    let metadata = format!(
        "{}, median time: {:.2} ms, count: {}",
        record.source_host,
        record.time_median * scale,
        (record.count as f64 * scale).round() as u64
    );

    resolve(record)
        .into_iter()
        .flat_map(move |(kind, tables, caller)| {
            let metadata = metadata.clone();
            tables.into_iter().map(move |table| {
                let mut source = table_node(&record.dbname, &table);
                let mut target = caller.target.clone();

                if kind != QueryKind::Select {
                    std::mem::swap(&mut source, &mut target);
                }

                EdgeRecord {
                    source,
                    edge: caller.edge.clone(),
                    target,
                    weight,
                    metadata: metadata.clone(),
                }
            })
        })
}

/// Writes the edges of every record as TSV lines.
///
/// Weights are relative to the most frequent group.
pub fn write_edges<W: Write>(
    out: &mut W,
    data: &[AggregatedRecord],
) -> std::io::Result<usize> {
    let max_count = data.iter().map(|record| record.count).max().unwrap_or(0);
    let mut written = 0;

    for record in data {
        for edge in format_edges(record, max_count) {
            writeln!(out, "{edge}")?;
            written += 1;
        }
    }

    Ok(written)
}
