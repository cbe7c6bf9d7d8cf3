//! Operation kind and tables touched by a (normalized) query.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::MetadataError;
use crate::tables::get_query_tables;

// INSERT INTO, DELETE FROM, INSERT OVERWRITE TABLE
static RE_TABLE_CLAUSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:FROM|INTO|TABLE) ([`,.\w]+)").unwrap());

// UPDATE foo SET ...
static RE_UPDATE_TARGET: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)([`\w]+) SET").unwrap());

/// SQL operation category, taken from the first word of the query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKind {
    Select,
    Insert,
    Update,
    Delete,
    Replace,
    Begin,
    Commit,
    Show,
    Set,
    Other(String),
}

impl QueryKind {
    /// Classifies the query by its first whitespace-delimited token.
    pub fn of(query: &str) -> Self {
        let first = query.split_whitespace().next().unwrap_or_default().to_uppercase();
        match first.as_str() {
            "SELECT" => QueryKind::Select,
            "INSERT" => QueryKind::Insert,
            "UPDATE" => QueryKind::Update,
            "DELETE" => QueryKind::Delete,
            "REPLACE" => QueryKind::Replace,
            "BEGIN" => QueryKind::Begin,
            "COMMIT" => QueryKind::Commit,
            "SHOW" => QueryKind::Show,
            "SET" => QueryKind::Set,
            _ => QueryKind::Other(first),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            QueryKind::Select => "SELECT",
            QueryKind::Insert => "INSERT",
            QueryKind::Update => "UPDATE",
            QueryKind::Delete => "DELETE",
            QueryKind::Replace => "REPLACE",
            QueryKind::Begin => "BEGIN",
            QueryKind::Commit => "COMMIT",
            QueryKind::Show => "SHOW",
            QueryKind::Set => "SET",
            QueryKind::Other(kind) => kind,
        }
    }

    /// Transaction and status statements touch no tables.
    pub fn is_table_free(&self) -> bool {
        matches!(
            self,
            QueryKind::Begin | QueryKind::Commit | QueryKind::Show | QueryKind::Set
        )
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a query and the tables it involves.
///
/// `tables` is `None` for transaction and status statements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryMetadata {
    pub kind: QueryKind,
    pub tables: Option<Vec<String>>,
}

/// Returns the kind of the query and the tables it reads from or writes to.
///
/// `SELECT`s go through the join-aware extractor, write statements use the
/// first `FROM`/`INTO`/`TABLE` clause and `UPDATE`s fall back to the
/// identifier in front of `SET`.
pub fn get_query_metadata(query: &str) -> Result<QueryMetadata, MetadataError> {
    let kind = QueryKind::of(query);

    if kind.is_table_free() {
        return Ok(QueryMetadata { kind, tables: None });
    }

    let tables = match kind {
        QueryKind::Select => Some(get_query_tables(query)).filter(|tables| !tables.is_empty()),
        _ => table_clause(query).or_else(|| update_target(&kind, query)),
    };

    match tables {
        Some(tables) => Ok(QueryMetadata {
            kind,
            tables: Some(tables),
        }),
        None => Err(MetadataError {
            query: query.to_string(),
        }),
    }
}

fn table_clause(query: &str) -> Option<Vec<String>> {
    let caps = RE_TABLE_CLAUSE.captures(query)?;
    let tables: Vec<String> = caps[1]
        .split(',')
        .map(|table| table.replace('`', ""))
        .filter(|table| !table.is_empty())
        .collect();

    (!tables.is_empty()).then_some(tables)
}

fn update_target(kind: &QueryKind, query: &str) -> Option<Vec<String>> {
    if *kind != QueryKind::Update {
        return None;
    }

    let caps = RE_UPDATE_TARGET.captures(query)?;
    Some(vec![caps[1].trim_matches('`').to_string()])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(query: &str) -> (String, Option<Vec<String>>) {
        let meta = get_query_metadata(query).unwrap();
        (meta.kind.to_string(), meta.tables)
    }

    fn tables(names: &[&str]) -> Option<Vec<String>> {
        Some(names.iter().map(|name| name.to_string()).collect())
    }

    #[test]
    fn selects() {
        assert_eq!(
            metadata("SELECT * FROM `comments_index` WHERE comment_id = X LIMIT N"),
            ("SELECT".into(), tables(&["comments_index"]))
        );
        assert_eq!(
            metadata("select * from `Comments_index` where comment_id = X limit N"),
            ("SELECT".into(), tables(&["Comments_index"]))
        );
        assert_eq!(
            metadata("SELECT props FROM `page_wikia_props` WHERE page_id = X AND propname = X"),
            ("SELECT".into(), tables(&["page_wikia_props"]))
        );
    }

    #[test]
    fn multi_table_selects() {
        assert_eq!(
            metadata(
                "SELECT props FROM `page_wikia_props`,`foo`,`bar` WHERE page_id = X AND propname = X"
            ),
            ("SELECT".into(), tables(&["page_wikia_props", "foo", "bar"]))
        );
        assert_eq!(
            metadata(
                "SELECT rev_id,rev_page,rev_text_id,rev_timestamp,rev_comment,rev_user_text,rev_user,rev_minor_edit,rev_deleted,rev_len,rev_parent_id,rev_shaN,page_namespace,page_title,page_id,page_latest,user_name FROM `revision` INNER JOIN `page` ON ((page_id = rev_page)) LEFT JOIN `wikicities_cN`.`user` ON ((rev_user != N) AND (user_id = rev_user)) WHERE rev_id = X LIMIT N"
            ),
            ("SELECT".into(), tables(&["revision", "page", "wikicities_cN.user"]))
        );
        assert_eq!(
            metadata(
                "SELECT comments_index.comment_id, count(*) as cnt, last_child_comment_id  FROM `wall_related_pages`,`comments_index`  WHERE page_id = N AND removed = N AND (wall_related_pages.comment_id = comments_index.comment_id)  GROUP BY comments_index.comment_id ORDER BY last_update desc LIMIT 2 "
            ),
            ("SELECT".into(), tables(&["wall_related_pages", "comments_index"]))
        );
    }

    #[test]
    fn writes() {
        assert_eq!(
            metadata("UPDATE `page` SET page_touched = X WHERE page_id = X"),
            ("UPDATE".into(), tables(&["page"]))
        );
        assert_eq!(
            metadata("INSERT INTO `wall_history` (parent_page_id,post_user_id) VALUES (X,X)"),
            ("INSERT".into(), tables(&["wall_history"]))
        );
        assert_eq!(
            metadata("delete from text where old_id not in (select rev_text_id from revision)"),
            ("DELETE".into(), tables(&["text"]))
        );
        assert_eq!(
            metadata("REPLACE INTO `objectcache` (keyname,value,exptime) VALUES (XYZ)"),
            ("REPLACE".into(), tables(&["objectcache"]))
        );
        assert_eq!(
            metadata("INSERT OVERWRITE TABLE statsdb.rollup_events SELECT * FROM events"),
            ("INSERT".into(), tables(&["statsdb.rollup_events"]))
        );
    }

    #[test]
    fn table_free_statements() {
        assert_eq!(metadata("BEGIN"), ("BEGIN".into(), None));
        assert_eq!(metadata("COMMIT"), ("COMMIT".into(), None));
        assert_eq!(metadata("SHOW SLAVE STATUS"), ("SHOW".into(), None));
        assert_eq!(metadata("SET sql_big_selects=N"), ("SET".into(), None));
    }

    #[test]
    fn invalid_queries() {
        for query in ["SELECT INSERT", "FOO BAR", "UPDATE BAR", ""] {
            let err = get_query_metadata(query).unwrap_err();
            assert_eq!(err.to_string(), format!("could not extract metadata for {query}"));
        }
    }
}
