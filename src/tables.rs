//! Table references of `SELECT` statements.
//!
//! A light tokenizer walks the query and collects the identifiers that
//! follow `FROM` (including comma separated lists) and any `JOIN`.
//! Backticks are stripped, `db.table` stays a single identifier, and the
//! result keeps the order of first appearance.

use once_cell::sync::Lazy;
use regex::Regex;

static RE_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:`[^`]*`|[\w$]+)(?:\s*\.\s*(?:`[^`]*`|[\w$]+))*|[(),;]|[^\s\w`(),;]+")
        .unwrap()
});

/// Keywords after which a table name is expected.
const TABLE_PREFIXES: &[&str] = &["FROM", "JOIN", "STRAIGHT_JOIN", "INTO", "UPDATE", "TABLE"];

/// Keywords that can never be a table name and close a `FROM a, b` list.
const RESERVED: &[&str] = &[
    "SELECT", "WHERE", "GROUP", "ORDER", "HAVING", "LIMIT", "UNION", "ON", "USING", "SET",
    "INNER", "LEFT", "RIGHT", "OUTER", "CROSS", "NATURAL", "FULL", "JOIN", "STRAIGHT_JOIN",
    "FOR", "LOCK", "PROCEDURE", "INTO", "VALUES", "WINDOW", "AS", "FROM",
];

fn is_reserved(upper: &str) -> bool {
    RESERVED.contains(&upper)
}

fn is_identifier(token: &str) -> bool {
    token
        .chars()
        .next()
        .is_some_and(|c| c == '`' || c == '$' || c.is_alphanumeric() || c == '_')
}

fn clean_identifier(token: &str) -> String {
    token.chars().filter(|c| *c != '`' && !c.is_whitespace()).collect()
}

/// Returns the tables referenced by a `SELECT` query, deduplicated.
pub fn get_query_tables(query: &str) -> Vec<String> {
    let mut tables: Vec<String> = Vec::new();
    let mut expect_table = false;
    let mut in_table_list = false;

    for token in RE_TOKEN.find_iter(query).map(|m| m.as_str()) {
        let upper = token.to_uppercase();

        if TABLE_PREFIXES.contains(&upper.as_str()) {
            expect_table = true;
            in_table_list = upper == "FROM";
            continue;
        }

        if expect_table {
            expect_table = false;
            if is_identifier(token) && !is_reserved(&upper) {
                let table = clean_identifier(token);
                if !table.is_empty() && !tables.contains(&table) {
                    tables.push(table);
                }
            } else if token != "(" {
                in_table_list = false;
            }
            continue;
        }

        if token == "," && in_table_list {
            expect_table = true;
        } else if (is_reserved(&upper) && upper != "AS") || token == ")" || token == ";" {
            in_table_list = false;
        }
    }

    tables
}
