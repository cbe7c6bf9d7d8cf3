//! # Query digest
//!
//! Digests sampled SQL query logs into reports grouped by calling code,
//! affected table, database or originating service.
//!
//! Raw log messages are mapped onto canonical records, their queries are
//! generalized into grouping keys (`X` for literals, `N` for numbers), and
//! the groups are summarized. For the data-flow output every aggregated
//! query becomes one edge per table between the caller and the table.
//!
//! ```
//! use query_digest::{generalize_sql, get_query_metadata};
//!
//! let query = generalize_sql(Some("SELECT * FROM `page` WHERE page_id = 42")).unwrap();
//! assert_eq!(query, "SELECT * FROM `page` WHERE page_id = N");
//!
//! let metadata = get_query_metadata(&query).unwrap();
//! assert_eq!(metadata.kind.to_string(), "SELECT");
//! assert_eq!(metadata.tables, Some(vec!["page".to_string()]));
//! ```

pub mod caller;
pub mod config;
pub mod dataflow;
pub mod digest;
pub mod elasticsearch;
pub mod error;
pub mod metadata;
pub mod normalize;
pub mod pipeline;
pub mod records;
pub mod report;
pub mod scope;
pub mod tables;

pub use caller::{CallerReference, CallerShape, parse_caller};
pub use config::{RetrievalConfig, SamplingRate, SourceKind, SourceProfile};
pub use dataflow::{EdgeRecord, format_edges, write_edges};
pub use digest::{AggregatedRecord, Digest, filter_query, median};
pub use error::{CallerParseError, DigestError, MetadataError, RecordError, RetrievalError};
pub use metadata::{QueryKind, QueryMetadata, get_query_metadata};
pub use normalize::{generalize_sql, remove_comments_from_sql};
pub use pipeline::{Report, RunOptions};
pub use records::{CanonicalQueryRecord, RawLogRecord, RecordNormalizer};
pub use report::{OutputMode, render};
pub use scope::Scope;
