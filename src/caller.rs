//! Caller names as reported by the query logs.
//!
//! Three conventions show up in the `method` field:
//!
//! - bare functions: `wfGetDB`
//! - class methods: `Foo::getBar`, `FavoriteWikisModel:getTopWikisFromDb`
//! - chained backend calls: `DB.pm line 238 via fiximagereview.pl line 123`

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::CallerParseError;
use crate::metadata::QueryKind;

static RE_VIA: Lazy<Regex> = Lazy::new(|| Regex::new(r" via ([^\s]+) line (\d+)").unwrap());

/// The shape a caller name was recognized as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallerShape {
    /// `<inner> via <file> line <n>`
    Chained { file: String, line: String },
    /// A plain function name.
    Bare(String),
    /// `<class>::<method>` or `<class>:<method>`
    Qualified { class: String, method: String },
}

impl CallerShape {
    /// Recognizes the shape of `method`, trying chained, bare and
    /// qualified names in that order.
    pub fn parse(method: &str) -> Result<Self, CallerParseError> {
        if method.contains(" via ") {
            parse_chained(method)
        } else if !method.contains(':') {
            parse_bare(method)
        } else {
            parse_qualified(method)
        }
    }

    /// Graph node and edge label for a query of the given kind.
    pub fn reference(&self, kind: &QueryKind) -> CallerReference {
        match self {
            CallerShape::Chained { file, line } => CallerReference {
                target: format!("backend:{file}"),
                edge: format!("{file}:{line} ({kind})"),
            },
            CallerShape::Bare(name) => CallerReference {
                target: name.clone(),
                edge: name.clone(),
            },
            CallerShape::Qualified { class, method } => CallerReference {
                target: class.clone(),
                edge: method.clone(),
            },
        }
    }
}

/// Where a query call lands in the data-flow graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerReference {
    pub target: String,
    pub edge: String,
}

/// Parses a caller name into a graph node and an edge label.
pub fn parse_caller(method: &str, kind: &QueryKind) -> Result<CallerReference, CallerParseError> {
    CallerShape::parse(method).map(|shape| shape.reference(kind))
}

fn error(method: &str) -> CallerParseError {
    CallerParseError {
        method: method.to_string(),
    }
}

fn parse_chained(method: &str) -> Result<CallerShape, CallerParseError> {
    let caps = RE_VIA.captures(method).ok_or_else(|| error(method))?;

    Ok(CallerShape::Chained {
        file: caps[1].to_string(),
        line: caps[2].to_string(),
    })
}

fn parse_bare(method: &str) -> Result<CallerShape, CallerParseError> {
    if method.is_empty() {
        return Err(error(method));
    }

    Ok(CallerShape::Bare(method.to_string()))
}

fn parse_qualified(method: &str) -> Result<CallerShape, CallerParseError> {
    let separator = if method.contains("::") { "::" } else { ":" };
    let (class, name) = method.rsplit_once(separator).ok_or_else(|| error(method))?;

    if class.is_empty() || name.is_empty() {
        return Err(error(method));
    }

    Ok(CallerShape::Qualified {
        class: class.to_string(),
        method: name.to_string(),
    })
}
