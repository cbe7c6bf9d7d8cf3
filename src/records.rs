//! Canonical query records and the per log source adapters producing them.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::config::{SamplingRate, SourceKind};
use crate::error::{DigestError, RecordError};
use crate::normalize::{generalize_sql, remove_comments_from_sql};

/// A raw log message as returned by the log store, e.g. an Elasticsearch
/// `_source` object.
pub type RawLogRecord = serde_json::Value;

// e.g. WikiFactory::loadVariableFromDB (from foo::bar)
static RE_CALLED_FROM: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s\(([^)]+)\)").unwrap());

// leading /* method */ comment of a query read from a file
static RE_LEADING_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^/\*([^*]+)\*/").unwrap());

/// One logged query, reduced to the fields the digest works with.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalQueryRecord {
    pub original_query: String,
    pub query: String,
    pub method: String,
    pub dbname: String,
    pub source_host: String,
    pub rows: u64,
    /// Query time in milliseconds.
    pub time: f64,
    pub from_master: Option<bool>,
    /// Sampling rate of the log stream the record came from. Normalizers
    /// leave it unsampled, the pipeline sets the rate of the source profile.
    pub sampling: SamplingRate,
}

/// Maps a raw log message of one log source onto a [`CanonicalQueryRecord`].
pub trait RecordNormalizer {
    fn normalize(&self, raw: &RawLogRecord) -> Result<CanonicalQueryRecord, RecordError>;
}

/// Returns the adapter for records fetched from the log store.
///
/// Files are read line by line with [`FileQueries`] instead.
pub fn normalizer_for(kind: SourceKind) -> Option<Box<dyn RecordNormalizer>> {
    match kind {
        SourceKind::MediaWiki => Some(Box::new(MediaWikiNormalizer)),
        SourceKind::Backend => Some(Box::new(BackendNormalizer)),
        SourceKind::Service => Some(Box::new(ServiceNormalizer)),
        SourceKind::File => None,
    }
}

/// First eight hex digits of the MD5 of a normalized query.
pub fn short_hash(query: &str) -> String {
    let digest = Md5::digest(query.as_bytes());
    let mut hash = format!("{digest:x}");
    hash.truncate(8);
    hash
}

/// `ap-s10` -> `ap`, `k8s-worker-s3` -> `k8s`
pub fn host_prefix(host: &str) -> String {
    host.split('-').next().unwrap_or_default().to_string()
}

/// Numbers in the logs are not always typed consistently.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Numeric {
    Integer(u64),
    Float(f64),
    Text(String),
}

impl Numeric {
    fn as_f64(&self) -> f64 {
        match self {
            Numeric::Integer(value) => *value as f64,
            Numeric::Float(value) => *value,
            Numeric::Text(value) => value.trim().parse().unwrap_or(0.0),
        }
    }

    fn as_u64(&self) -> u64 {
        match self {
            Numeric::Integer(value) => *value,
            Numeric::Float(value) => value.max(0.0) as u64,
            Numeric::Text(value) => value.trim().parse().unwrap_or(0),
        }
    }
}

fn numeric_f64(value: &Option<Numeric>) -> f64 {
    value.as_ref().map_or(0.0, Numeric::as_f64)
}

fn numeric_u64(value: &Option<Numeric>) -> u64 {
    value.as_ref().map_or(0, Numeric::as_u64)
}

#[derive(Debug, Default, Deserialize)]
struct SqlContext {
    method: Option<String>,
    db_name: Option<String>,
    server_role: Option<String>,
    num_rows: Option<Numeric>,
    /// seconds
    elapsed: Option<Numeric>,
}

impl SqlContext {
    fn from_master(&self) -> bool {
        self.server_role.as_deref().unwrap_or("slave") == "master"
    }
}

#[derive(Debug, Default, Deserialize)]
struct WikiFields {
    wiki_dbname: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SqlLogEntry {
    #[serde(rename = "@message")]
    message: Option<String>,
    #[serde(rename = "@context", default)]
    context: SqlContext,
    #[serde(rename = "@fields", default)]
    fields: WikiFields,
    #[serde(rename = "@source_host")]
    source_host: Option<String>,
}

impl SqlLogEntry {
    fn parse(raw: &RawLogRecord) -> Result<Self, RecordError> {
        Ok(SqlLogEntry::deserialize(raw)?)
    }

    fn message(&self) -> Result<&str, RecordError> {
        self.message
            .as_deref()
            .ok_or(RecordError::MissingField("@message"))
    }
}

fn canonical(
    sql: &str,
    method: String,
    dbname: String,
    source_host: &str,
    rows: u64,
    time: f64,
    from_master: Option<bool>,
) -> CanonicalQueryRecord {
    let query = generalize_sql(Some(sql)).unwrap_or_default();

    CanonicalQueryRecord {
        original_query: remove_comments_from_sql(sql),
        query,
        method,
        dbname,
        source_host: host_prefix(source_host),
        rows,
        time,
        from_master,
        sampling: SamplingRate::UNSAMPLED,
    }
}

/// MediaWiki query log (`logstash-mediawiki-sql`).
#[derive(Debug, Clone, Copy, Default)]
pub struct MediaWikiNormalizer;

impl RecordNormalizer for MediaWikiNormalizer {
    fn normalize(&self, raw: &RawLogRecord) -> Result<CanonicalQueryRecord, RecordError> {
        let entry = SqlLogEntry::parse(raw)?;
        let context = &entry.context;

        let method = context
            .method
            .as_deref()
            .ok_or(RecordError::MissingField("@context.method"))?;
        let method = RE_CALLED_FROM.replace_all(method, "").into_owned();

        let db_name = context.db_name.clone().unwrap_or_default();
        let dbname = if entry.fields.wiki_dbname.as_deref() == Some(db_name.as_str()) {
            "local".to_string()
        } else {
            db_name
        };

        Ok(canonical(
            entry.message()?,
            method,
            dbname,
            entry.source_host.as_deref().unwrap_or("ap"),
            numeric_u64(&context.num_rows),
            1000.0 * numeric_f64(&context.elapsed),
            Some(context.from_master()),
        ))
    }
}

/// Perl backend query log (`logstash-backend-sql`).
#[derive(Debug, Clone, Copy, Default)]
pub struct BackendNormalizer;

impl RecordNormalizer for BackendNormalizer {
    fn normalize(&self, raw: &RawLogRecord) -> Result<CanonicalQueryRecord, RecordError> {
        let entry = SqlLogEntry::parse(raw)?;
        let context = &entry.context;

        // e.g. "DB.pm line 171 via phalanx_stats.pl line 158"
        let method = context
            .method
            .clone()
            .ok_or(RecordError::MissingField("@context.method"))?;
        let source_host = entry
            .source_host
            .as_deref()
            .ok_or(RecordError::MissingField("@source_host"))?;

        Ok(canonical(
            entry.message()?,
            method,
            context.db_name.clone().unwrap_or_default(),
            source_host,
            numeric_u64(&context.num_rows),
            1000.0 * numeric_f64(&context.elapsed),
            Some(context.from_master()),
        ))
    }
}

#[derive(Debug, Default, Deserialize)]
struct KubernetesFields {
    host: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ServiceLogEntry {
    raw_query: Option<String>,
    container_name: Option<String>,
    #[serde(default)]
    kubernetes: KubernetesFields,
    rows_number: Option<Numeric>,
    /// milliseconds
    execution_time: Option<Numeric>,
}

/// Query log sampler of a service (`logstash-<service>`).
#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceNormalizer;

impl RecordNormalizer for ServiceNormalizer {
    fn normalize(&self, raw: &RawLogRecord) -> Result<CanonicalQueryRecord, RecordError> {
        let entry = ServiceLogEntry::deserialize(raw)?;

        let sql = entry
            .raw_query
            .as_deref()
            .ok_or(RecordError::MissingField("raw_query"))?;
        let host = entry
            .kubernetes
            .host
            .as_deref()
            .ok_or(RecordError::MissingField("kubernetes.host"))?;

        let mut record = canonical(
            sql,
            String::new(),
            entry.container_name.clone().unwrap_or_default(),
            host,
            numeric_u64(&entry.rows_number),
            numeric_f64(&entry.execution_time),
            None,
        );
        // services do not report callers, group by the query shape instead
        record.method = short_hash(&record.query);

        Ok(record)
    }
}

/// Normalizes a single line of an SQL file.
///
/// The method is taken from a leading `/* ... */` comment, or else is the
/// short hash of the normalized query.
pub fn normalize_line(line: &str) -> CanonicalQueryRecord {
    let comment = RE_LEADING_COMMENT
        .captures(line)
        .map(|caps| caps[1].trim().to_string())
        .filter(|comment| !comment.is_empty());

    let sql = line.trim();
    let query = generalize_sql(Some(sql)).unwrap_or_default();
    let hash = short_hash(&query);

    CanonicalQueryRecord {
        original_query: remove_comments_from_sql(sql),
        query,
        method: comment.unwrap_or_else(|| hash.clone()),
        dbname: "db".to_string(),
        source_host: hash,
        rows: 0,
        time: 0.0,
        from_master: None,
        sampling: SamplingRate::UNSAMPLED,
    }
}

/// Queries read lazily from a file, one per line.
///
/// Blank lines and `--` comment lines are skipped.
pub struct FileQueries {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
}

impl FileQueries {
    pub fn open(path: &Path) -> Result<Self, DigestError> {
        let file = File::open(path).map_err(|source| DigestError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(FileQueries {
            path: path.to_path_buf(),
            lines: BufReader::new(file).lines(),
        })
    }
}

impl Iterator for FileQueries {
    type Item = Result<CanonicalQueryRecord, DigestError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(source) => {
                    return Some(Err(DigestError::Read {
                        path: self.path.clone(),
                        source,
                    }));
                }
            };

            if line.starts_with("--") || line.trim().is_empty() {
                continue;
            }

            return Some(Ok(normalize_line(&line)));
        }
    }
}
