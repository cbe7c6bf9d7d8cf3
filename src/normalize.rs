//! Turns raw SQL into a canonical query shape usable as a grouping key.
//!
//! Literals become `X`, numbers become `N`, long `IN (...)` and `VALUES (...)`
//! lists become `(XYZ)`. The rules are plain regular expressions applied in a
//! fixed order; unbalanced quotes are substituted as matched.

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;

static RE_MULTIPLE_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").unwrap());

// e.g. /* CategoryDataService::getMostVisited N.N.N.N */
static RE_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s?/\*.+\*/").unwrap());

static RE_LIKE_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"LIKE (?:'[^']+'|"[^"]+")"#).unwrap());
static RE_LIKE_CHAIN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(or|and) [^\s]+ LIKE X").unwrap());

static RE_ESCAPED_BACKSLASH: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\\\").unwrap());
static RE_ESCAPED_SINGLE_QUOTE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\'").unwrap());
static RE_ESCAPED_DOUBLE_QUOTE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"\\""#).unwrap());

static RE_SINGLE_QUOTED: Lazy<Regex> = Lazy::new(|| Regex::new(r"'[^']*'").unwrap());
static RE_DOUBLE_QUOTED: Lazy<Regex> = Lazy::new(|| Regex::new(r#""[^"]*""#).unwrap());

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static RE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"-?[0-9]+").unwrap());

// WHERE foo IN ('880987','882618','708228','522330')
static RE_VALUE_LIST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i) (IN|VALUES)\s*\([^,]+,[^)]+\)").unwrap());

/// Removes `/* ... */` comments from the query.
pub fn remove_comments_from_sql(sql: &str) -> String {
    RE_COMMENT.replace_all(sql, "").into_owned()
}

/// Replaces `LIKE '...'` and `LIKE "..."` literals with `LIKE X` and folds repeated
/// `or <column> LIKE X` chains into a single `... LIKE X ...` entry.
pub fn normalize_likes(sql: &str) -> String {
    let sql = sql.replace('%', "");
    let mut sql = RE_LIKE_LITERAL.replace_all(&sql, "LIKE X").into_owned();

    let mut chains: Vec<String> = Vec::new();
    for found in RE_LIKE_CHAIN.find_iter(&sql) {
        if !chains.iter().any(|chain| chain == found.as_str()) {
            chains.push(found.as_str().to_string());
        }
    }

    for chain in chains {
        let Ok(repeated) = Regex::new(&format!(r"(\s?{}){{2,}}", regex::escape(&chain))) else {
            continue;
        };
        let folded = format!(" {chain} ...");
        if let Cow::Owned(replaced) = repeated.replace_all(&sql, regex::NoExpand(&folded)) {
            sql = replaced;
        }
    }

    sql
}

/// Removes most variables from an SQL query and replaces them with `X`, or
/// `N` for numbers.
///
/// Returns `None` when given `None`.
pub fn generalize_sql(sql: Option<&str>) -> Option<String> {
    let sql = sql?;

    let sql = RE_MULTIPLE_SPACES.replace_all(sql, " ");
    let sql = remove_comments_from_sql(&sql);
    let sql = normalize_likes(&sql);

    let sql = RE_ESCAPED_BACKSLASH.replace_all(&sql, "");
    let sql = RE_ESCAPED_SINGLE_QUOTE.replace_all(&sql, "");
    let sql = RE_ESCAPED_DOUBLE_QUOTE.replace_all(&sql, "");
    let sql = RE_SINGLE_QUOTED.replace_all(&sql, "X");
    let sql = RE_DOUBLE_QUOTED.replace_all(&sql, "X");

    let sql = RE_WHITESPACE.replace_all(&sql, " ");
    let sql = RE_NUMBER.replace_all(&sql, "N");
    let sql = RE_VALUE_LIST.replace_all(&sql, " $1 (XYZ)");

    Some(sql.trim().to_string())
}
