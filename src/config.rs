//! Per log source settings and log store access settings.

use std::fmt;
use std::time::Duration;

/// Default log store, overridable with `--es-host` / `QUERY_DIGEST_ES_HOST`.
pub const DEFAULT_ES_HOST: &str = "http://logs-prod.es.service.sjc.consul:9200";

/// Result ceiling for MediaWiki and backend query logs.
pub const QUERIES_LIMIT: usize = 50_000;

/// Fraction of the real traffic that ends up in a log stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingRate(f64);

impl SamplingRate {
    /// Every query is logged.
    pub const UNSAMPLED: SamplingRate = SamplingRate(1.0);

    /// Returns `None` unless `rate` is in `(0, 1]`.
    pub fn new(rate: f64) -> Option<Self> {
        (rate > 0.0 && rate <= 1.0).then_some(SamplingRate(rate))
    }

    pub fn rate(self) -> f64 {
        self.0
    }

    /// Multiplier turning sampled counts into estimated real counts.
    pub fn scale(self) -> f64 {
        1.0 / self.0
    }
}

impl Default for SamplingRate {
    fn default() -> Self {
        SamplingRate::UNSAMPLED
    }
}

impl fmt::Display for SamplingRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0 * 100.0)
    }
}

/// The log streams queries can be pulled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    MediaWiki,
    Backend,
    Service,
    File,
}

/// Everything needed to query and interpret one log stream.
#[derive(Debug, Clone)]
pub struct SourceProfile {
    pub kind: SourceKind,
    pub index_prefix: String,
    pub sampling: SamplingRate,
    pub limit: usize,
    pub fields: Vec<&'static str>,
}

const MEDIAWIKI_FIELDS: &[&str] = &[
    "@message",
    "@context.method",
    "@context.db_name",
    "@context.server_role",
    "@context.num_rows",
    "@context.elapsed",
    "@fields.wiki_dbname",
    "@source_host",
];

const BACKEND_FIELDS: &[&str] = &[
    "@message",
    "@context.method",
    "@context.db_name",
    "@context.server_role",
    "@context.num_rows",
    "@context.elapsed",
    "@source_host",
];

const SERVICE_FIELDS: &[&str] = &[
    "raw_query",
    "container_name",
    "kubernetes.host",
    "rows_number",
    "execution_time",
];

impl SourceProfile {
    /// MediaWiki SQL log, sampled at 5%.
    pub fn mediawiki() -> Self {
        SourceProfile {
            kind: SourceKind::MediaWiki,
            index_prefix: "logstash-mediawiki-sql".to_string(),
            sampling: SamplingRate(0.05),
            limit: QUERIES_LIMIT,
            fields: MEDIAWIKI_FIELDS.to_vec(),
        }
    }

    /// Perl backend SQL log, not sampled.
    pub fn backend() -> Self {
        SourceProfile {
            kind: SourceKind::Backend,
            index_prefix: "logstash-backend-sql".to_string(),
            sampling: SamplingRate::UNSAMPLED,
            limit: QUERIES_LIMIT,
            fields: BACKEND_FIELDS.to_vec(),
        }
    }

    /// Query log sampler of a given service, sampled at 1%.
    pub fn service(service: &str) -> Self {
        SourceProfile {
            kind: SourceKind::Service,
            index_prefix: format!("logstash-{service}"),
            sampling: SamplingRate(0.01),
            limit: 25_000,
            fields: SERVICE_FIELDS.to_vec(),
        }
    }

    /// Plain SQL file, one query per line.
    pub fn file() -> Self {
        SourceProfile {
            kind: SourceKind::File,
            index_prefix: String::new(),
            sampling: SamplingRate::UNSAMPLED,
            limit: usize::MAX,
            fields: Vec::new(),
        }
    }

    pub fn with_sampling(mut self, sampling: Option<SamplingRate>) -> Self {
        if let Some(sampling) = sampling {
            self.sampling = sampling;
        }
        self
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        if let Some(limit) = limit {
            self.limit = limit;
        }
        self
    }
}

/// How to reach the log store and which time window to scan.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub es_host: String,
    /// Seconds before now to start scanning from.
    pub period: u64,
    /// Time given to log shipping before a message is assumed stored.
    pub safety_delay: u64,
    /// Hits fetched per scroll page.
    pub batch_size: usize,
    pub read_timeout: Duration,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            es_host: DEFAULT_ES_HOST.to_string(),
            period: 3600,
            safety_delay: 5,
            batch_size: 1000,
            read_timeout: Duration::from_secs(10),
        }
    }
}
