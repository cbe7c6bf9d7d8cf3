//! Renders a digest report in one of the supported output formats.

use std::io::Write;

use crate::dataflow::write_edges;
use crate::digest::AggregatedRecord;
use crate::error::DigestError;
use crate::pipeline::Report;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Human readable grid table.
    #[default]
    Grid,
    Csv,
    /// One line per query kind.
    Simple,
    /// TSV edges for the data-flow graph.
    DataFlow,
    /// Near-original queries, prefixed with the caller.
    SqlLog,
}

const COLUMNS: [&str; 10] = [
    "query",
    "method",
    "dbname",
    "source_host",
    "count",
    "percentage",
    "time_sum",
    "time_median",
    "rows_sum",
    "rows_median",
];

fn row(record: &AggregatedRecord) -> [String; 10] {
    [
        record.query.clone(),
        record.method.clone(),
        record.dbname.clone(),
        record.source_host.clone(),
        record.count.to_string(),
        record.percentage.clone(),
        record.time_sum.to_string(),
        record.time_median.to_string(),
        record.rows_sum.to_string(),
        record.rows_median.to_string(),
    ]
}

pub fn render<W: Write>(report: &Report, mode: OutputMode, out: &mut W) -> Result<(), DigestError> {
    match mode {
        OutputMode::Grid => {
            writeln!(out, "{}", report.header)?;
            write_grid(out, &report.data)?;
            writeln!(out, "Note: times are in [ms], queries are normalized")?;
        }
        OutputMode::Csv => {
            writeln!(out, "# {}", report.header)?;
            write_csv(out, &report.data)?;
        }
        OutputMode::Simple => {
            writeln!(out, "{}", report.header)?;
            for record in &report.data {
                writeln!(
                    out,
                    "{} {} [{}] db:{} | {}",
                    record.method,
                    record.percentage,
                    record.source_host,
                    record.dbname,
                    record.query
                )?;
            }
        }
        OutputMode::DataFlow => {
            writeln!(out, "# {}", report.header)?;
            write_edges(out, &report.data)?;
        }
        OutputMode::SqlLog => {
            writeln!(out, "-- {}", report.header)?;
            for record in &report.data {
                writeln!(
                    out,
                    "/* {} */ {}",
                    record.method,
                    record.original_query.replace('\n', " ")
                )?;
            }
        }
    }

    out.flush()?;
    Ok(())
}

fn write_csv<W: Write>(out: &mut W, data: &[AggregatedRecord]) -> Result<(), DigestError> {
    let mut wtr = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::NonNumeric)
        .from_writer(out);

    wtr.write_record(COLUMNS)?;
    for record in data {
        wtr.write_record(row(record))?;
    }

    wtr.flush()?;
    Ok(())
}

fn is_numeric(cell: &str) -> bool {
    cell.parse::<f64>().is_ok()
}

fn write_grid<W: Write>(out: &mut W, data: &[AggregatedRecord]) -> std::io::Result<()> {
    let rows: Vec<[String; 10]> = data.iter().map(row).collect();

    let mut widths = COLUMNS.map(|column| column.chars().count());
    for cells in &rows {
        for (width, cell) in widths.iter_mut().zip(cells) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let separator = |fill: char| -> String {
        let mut line = String::from("+");
        for width in widths {
            line.extend(std::iter::repeat_n(fill, width + 2));
            line.push('+');
        }
        line
    };

    let line = |cells: &[String]| -> String {
        let mut line = String::from("|");
        for (cell, width) in cells.iter().zip(widths) {
            if is_numeric(cell) {
                line.push_str(&format!(" {cell:>width$} |"));
            } else {
                line.push_str(&format!(" {cell:<width$} |"));
            }
        }
        line
    };

    let header: Vec<String> = COLUMNS.iter().map(|column| column.to_string()).collect();

    writeln!(out, "{}", separator('-'))?;
    writeln!(out, "{}", line(&header))?;
    writeln!(out, "{}", separator('='))?;
    for cells in &rows {
        writeln!(out, "{}", line(cells))?;
        writeln!(out, "{}", separator('-'))?;
    }

    Ok(())
}
