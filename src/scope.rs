//! What a digest is about: a file, a code path, a table, a service or a
//! database, and which log searches cover it.

use std::path::PathBuf;

use crate::config::SourceProfile;
use crate::error::DigestError;

const PROD_SJC: &str = r#"@fields.datacenter: "sjc" AND @fields.environment: "prod""#;
const BACKEND_STATEMENTS: &str = r#"program:"backend" AND @context.statement: *"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    File(PathBuf),
    Path(String),
    Table(String),
    Service(String),
    Database(String),
}

/// One log store query feeding the digest.
#[derive(Debug, Clone)]
pub struct Search {
    pub profile: SourceProfile,
    pub query: String,
}

impl Scope {
    /// Picks the only scope given on the command line.
    pub fn select(
        file: Option<PathBuf>,
        path: Option<String>,
        table: Option<String>,
        service: Option<String>,
        database: Option<String>,
    ) -> Result<Self, DigestError> {
        let mut scopes: Vec<Scope> = [
            file.map(Scope::File),
            path.map(Scope::Path),
            table.map(Scope::Table),
            service.map(Scope::Service),
            database.map(Scope::Database),
        ]
        .into_iter()
        .flatten()
        .collect();

        match scopes.len() {
            1 => Ok(scopes.remove(0)),
            0 => Err(DigestError::CommandLine(
                "Either --file, --path, --table, --service or --database needs to be provided"
                    .to_string(),
            )),
            _ => Err(DigestError::CommandLine(
                "Only one of --file, --path, --table, --service or --database can be provided"
                    .to_string(),
            )),
        }
    }

    /// e.g. `"wall_notification" table`
    pub fn describe(&self) -> String {
        match self {
            Scope::File(path) => format!("\"{}\" file", path.display()),
            Scope::Path(path) => format!("\"{path}\" path"),
            Scope::Table(table) => format!("\"{table}\" table"),
            Scope::Service(service) => format!("\"{service}\" service"),
            Scope::Database(database) => format!("\"{database}\" database"),
        }
    }

    /// Log store queries for this scope. Empty for files.
    pub fn searches(&self) -> Vec<Search> {
        match self {
            Scope::File(_) => Vec::new(),
            Scope::Path(path) => vec![Search {
                profile: SourceProfile::mediawiki(),
                query: format!(r#"{PROD_SJC} AND @exception.trace: "{path}""#),
            }],
            Scope::Table(table) => vec![
                Search {
                    profile: SourceProfile::mediawiki(),
                    query: format!(r#"{PROD_SJC} AND @message: "{table}""#),
                },
                Search {
                    profile: SourceProfile::backend(),
                    query: format!(r#"{BACKEND_STATEMENTS} AND @context.statement: "{table}""#),
                },
            ],
            Scope::Database(database) => vec![
                Search {
                    profile: SourceProfile::mediawiki(),
                    query: format!(r#"{PROD_SJC} AND @context.db_name:"{database}""#),
                },
                Search {
                    profile: SourceProfile::backend(),
                    query: format!(r#"{BACKEND_STATEMENTS} AND @context.db_name:"{database}""#),
                },
            ],
            Scope::Service(service) => vec![Search {
                profile: SourceProfile::service(service),
                query: r#"logger_name:"query-log-sampler" AND env: "prod" AND raw_query: *"#
                    .to_string(),
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SamplingRate, SourceKind};

    #[test]
    fn exactly_one_scope() {
        assert_eq!(
            Scope::select(None, Some("extensions/wikia/Wall".into()), None, None, None).unwrap(),
            Scope::Path("extensions/wikia/Wall".into())
        );

        let err = Scope::select(None, None, None, None, None).unwrap_err();
        assert!(matches!(err, DigestError::CommandLine(_)));
        assert_eq!(
            err.to_string(),
            "Either --file, --path, --table, --service or --database needs to be provided"
        );

        let err = Scope::select(None, None, Some("page".into()), None, Some("statsdb".into()))
            .unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn table_scope_reads_both_sql_logs() {
        let searches = Scope::Table("wall_notification".into()).searches();
        assert_eq!(searches.len(), 2);
        assert_eq!(searches[0].profile.kind, SourceKind::MediaWiki);
        assert_eq!(
            searches[0].query,
            r#"@fields.datacenter: "sjc" AND @fields.environment: "prod" AND @message: "wall_notification""#
        );
        assert_eq!(searches[0].profile.sampling.rate(), 0.05);
        assert_eq!(searches[1].profile.kind, SourceKind::Backend);
        assert_eq!(searches[1].profile.sampling, SamplingRate::UNSAMPLED);
        assert_eq!(
            searches[1].query,
            r#"program:"backend" AND @context.statement: * AND @context.statement: "wall_notification""#
        );
    }

    #[test]
    fn service_scope() {
        let scope = Scope::Service("liftigniter-metadata".into());
        assert_eq!(scope.describe(), "\"liftigniter-metadata\" service");

        let searches = scope.searches();
        assert_eq!(searches.len(), 1);

        let profile = &searches[0].profile;
        assert_eq!(profile.kind, SourceKind::Service);
        assert_eq!(profile.index_prefix, "logstash-liftigniter-metadata");
        assert_eq!(profile.sampling.rate(), 0.01);
    }

    #[test]
    fn file_scope() {
        let scope = Scope::File("/var/log/queries.log".into());
        assert!(scope.searches().is_empty());
        assert_eq!(scope.describe(), "\"/var/log/queries.log\" file");
    }
}
