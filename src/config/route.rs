//! Route expression parsing.
//!
//! One route per source maps an object-store root onto a target topic:
//! `INSERT INTO <topic> SELECT * FROM <bucket[/prefix]> [STOREAS <format>]`.
//! Multiple routes are separated by `;`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::OnceLock;

use crate::error::{ConfigError, InvalidRouteSnafu, UnknownFormatSnafu};
use crate::location::RootLocation;

const ROUTE_PATTERN: &str =
    r"(?i)^\s*INSERT\s+INTO\s+`?(?P<topic>[^\s`]+)`?\s+SELECT\s+\*\s+FROM\s+`?(?P<source>[^\s`]+)`?(?:\s+STOREAS\s+`?(?P<format>[^\s`]+)`?)?\s*$";

fn route_regex() -> &'static Regex {
    static ROUTE: OnceLock<Regex> = OnceLock::new();
    ROUTE.get_or_init(|| Regex::new(ROUTE_PATTERN).unwrap())
}

/// Record format stored in the source objects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatKind {
    /// One UTF-8 line per record.
    #[default]
    Text,
    /// One JSON document per line.
    Json,
    /// The whole object as a single record.
    Bytes,
}

impl FromStr for FormatKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(FormatKind::Text),
            "json" => Ok(FormatKind::Json),
            "bytes" => Ok(FormatKind::Bytes),
            _ => UnknownFormatSnafu { format: s }.fail(),
        }
    }
}

/// A parsed (source root, target topic) pair.
#[derive(Debug, Clone)]
pub struct Route {
    pub root: RootLocation,
    pub topic: String,
    pub format: FormatKind,
}

impl Route {
    /// Parse a single route expression.
    pub fn parse(expression: &str) -> Result<Self, ConfigError> {
        let captures = route_regex()
            .captures(expression)
            .ok_or_else(|| InvalidRouteSnafu { expression }.build())?;

        let topic = captures["topic"].to_string();
        let source = &captures["source"];
        let format = match captures.name("format") {
            Some(m) => m.as_str().parse()?,
            None => FormatKind::default(),
        };

        let (bucket, prefix) = match source.split_once('/') {
            Some((bucket, prefix)) if !prefix.is_empty() => (bucket, Some(prefix.to_string())),
            Some((bucket, _)) => (bucket, None),
            None => (source, None),
        };

        if bucket.is_empty() {
            return InvalidRouteSnafu { expression }.fail();
        }

        Ok(Route {
            root: RootLocation::new(bucket, prefix, true),
            topic,
            format,
        })
    }

    /// Parse a `;`-separated list of route expressions.
    pub fn parse_all(expressions: &str) -> Result<Vec<Self>, ConfigError> {
        let routes: Vec<Route> = expressions
            .split(';')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(Route::parse)
            .collect::<Result<_, _>>()?;

        if routes.is_empty() {
            return InvalidRouteSnafu {
                expression: expressions,
            }
            .fail();
        }

        Ok(routes)
    }
}
