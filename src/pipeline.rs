//! Drives a digest run: fetch, normalize, filter and aggregate.
//!
//! Records are consumed one at a time. A record that cannot be normalized
//! is logged and skipped; a log store failure ends the run.

use std::path::Path;

use tracing::{info, warn};

use crate::config::{RetrievalConfig, SamplingRate, SourceProfile};
use crate::digest::{AggregatedRecord, Digest};
use crate::elasticsearch::ElasticsearchQuery;
use crate::error::{DigestError, RetrievalError};
use crate::records::{FileQueries, RawLogRecord, RecordNormalizer, normalizer_for};
use crate::scope::Scope;

/// Settings of a single run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub retrieval: RetrievalConfig,
    /// Overrides the result ceiling of every log source.
    pub limit: Option<usize>,
    /// Overrides the sampling rate of every log source.
    pub sampling: Option<SamplingRate>,
}

/// Aggregated results, ready to be rendered.
#[derive(Debug, Clone)]
pub struct Report {
    pub header: String,
    pub data: Vec<AggregatedRecord>,
    /// Number of queries the report is built from.
    pub total: usize,
}

/// Feeds raw log messages through `normalizer` into `digest`, tagging
/// them with the sampling rate of their log stream.
///
/// Returns the number of records normalized.
pub fn digest_records<I>(
    records: I,
    normalizer: &dyn RecordNormalizer,
    sampling: SamplingRate,
    digest: &mut Digest,
) -> Result<usize, RetrievalError>
where
    I: IntoIterator<Item = Result<RawLogRecord, RetrievalError>>,
{
    let mut normalized = 0;

    for raw in records {
        match normalizer.normalize(&raw?) {
            Ok(mut record) => {
                record.sampling = sampling;
                digest.push(record);
                normalized += 1;
            }
            Err(err) => warn!("Skipping log message: {err}"),
        }
    }

    Ok(normalized)
}

/// Feeds every query of an SQL file into `digest`.
pub fn digest_file(
    path: &Path,
    sampling: SamplingRate,
    digest: &mut Digest,
) -> Result<usize, DigestError> {
    let mut read = 0;

    for record in FileQueries::open(path)? {
        let mut record = record?;
        record.sampling = sampling;
        digest.push(record);
        read += 1;
    }

    Ok(read)
}

/// Collects and aggregates the queries of the given scope.
pub fn run(scope: &Scope, options: &RunOptions) -> Result<Report, DigestError> {
    let mut digest = Digest::new();
    let period_hours = options.retrieval.period as f64 / 3600.0;

    if let Scope::File(path) = scope {
        info!("Digesting queries from {}", scope.describe());
        let profile = SourceProfile::file().with_sampling(options.sampling);
        digest_file(path, profile.sampling, &mut digest)?;
    }

    for search in scope.searches() {
        let profile = search
            .profile
            .with_limit(options.limit)
            .with_sampling(options.sampling);
        let Some(normalizer) = normalizer_for(profile.kind) else {
            continue;
        };

        info!(
            "Query: '{}' for the last {} hour(s)",
            search.query, period_hours
        );

        let es = ElasticsearchQuery::new(&options.retrieval, &profile.index_prefix)?;
        let rows = es.query_by_string(&search.query, &profile.fields, profile.limit);
        digest_records(rows, normalizer.as_ref(), profile.sampling, &mut digest)?;
    }

    if digest.is_empty() {
        return Err(DigestError::NoQueries(scope.describe()));
    }

    let total = digest.total();
    info!(
        "Processing {} queries ({} filtered out)...",
        total,
        digest.filtered()
    );

    let data = digest.finish();
    info!("Got {} kinds of queries", data.len());

    Ok(Report {
        header: format!(
            "Query digest for {}, found {} queries",
            scope.describe(),
            total
        ),
        data,
        total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::write_edges;
    use crate::records::{BackendNormalizer, MediaWikiNormalizer};
    use serde_json::json;

    fn message(sql: &str, method: &str) -> Result<RawLogRecord, RetrievalError> {
        Ok(json!({
            "@message": sql,
            "@context": { "method": method, "db_name": "muppet", "elapsed": 0.001 },
            "@source_host": "ap-s1"
        }))
    }

    #[test]
    fn malformed_records_are_skipped() {
        let records = vec![
            message("SELECT * FROM page WHERE page_id = 1", "Article::load"),
            Ok(json!({ "@message": "SELECT 1" })),
            message("SELECT * FROM page WHERE page_id = 2", "Article::load"),
            message("BEGIN", "Article::load"),
        ];

        let mut digest = Digest::new();
        let normalized = digest_records(records, &MediaWikiNormalizer, SamplingRate::UNSAMPLED, &mut digest).unwrap();

        assert_eq!(normalized, 3);
        assert_eq!(digest.total(), 2);
        assert_eq!(digest.filtered(), 1);

        let data = digest.finish();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].query, "SELECT * FROM page WHERE page_id = N");
        assert_eq!(data[0].count, 2);
    }

    #[test]
    fn retrieval_failure_ends_the_run() {
        let records = vec![
            message("SELECT * FROM page", "Article::load"),
            Err(RetrievalError::Response("boom".into())),
            message("SELECT * FROM page", "Article::load"),
        ];

        let mut digest = Digest::new();
        let result = digest_records(records, &MediaWikiNormalizer, SamplingRate::UNSAMPLED, &mut digest);

        assert!(matches!(result, Err(RetrievalError::Response(_))));
        assert_eq!(digest.total(), 1);
    }

    #[test]
    fn missing_file() {
        let scope = Scope::File("/foo/var/not_existing.sql".into());
        let err = run(&scope, &RunOptions::default()).unwrap_err();

        assert!(matches!(err, DigestError::Read { .. }));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn mixed_sources_keep_their_own_scale() {
        let mut digest = Digest::new();

        let wiki = vec![message("SELECT * FROM `page` WHERE page_id = 1", "Article::load")];
        digest_records(
            wiki,
            &MediaWikiNormalizer,
            SourceProfile::mediawiki().sampling,
            &mut digest,
        )
        .unwrap();

        let backend = vec![Ok(json!({
            "@message": "UPDATE `phalanx_stats` SET ps_matched = ps_matched + 1",
            "@context": {
                "method": "DB.pm line 171 via phalanx_stats.pl line 158",
                "db_name": "specials",
                "elapsed": 0.001
            },
            "@source_host": "job-s1"
        }))];
        digest_records(
            backend,
            &BackendNormalizer,
            SourceProfile::backend().sampling,
            &mut digest,
        )
        .unwrap();

        let mut out = Vec::new();
        write_edges(&mut out, &digest.finish()).unwrap();
        let out = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = out.lines().collect();

        assert_eq!(
            lines,
            vec![
                "muppet:page\tload\tArticle\t1.00\tap, median time: 20.00 ms, count: 20",
                "backend:phalanx_stats.pl\tphalanx_stats.pl:158 (UPDATE)\tspecials:phalanx_stats\t1.00\tjob, median time: 1.00 ms, count: 1",
            ]
        );
    }
}
