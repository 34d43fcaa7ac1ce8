//! Query model and the `{name, p}` query description format.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::{Map, Value};

use super::analysis::parse_datetime;
use super::geo::{parse_distance, GeoPoint};
use super::query_string::parse_query_string;
use crate::error::{DododError, Result};

/// Largest edit distance a fuzzy query accepts.
pub const MAX_FUZZINESS: u8 = 2;

/// How the terms of a match query combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MatchOperator {
    #[default]
    Or,
    And,
}

/// A search query.
///
/// A query with no `field` searches every field included in `_all`.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    MatchAll,
    MatchNone,
    /// Exact term, not analysed.
    Term {
        term: String,
        field: Option<String>,
    },
    /// Analysed text; each term may match fuzzily.
    Match {
        text: String,
        field: Option<String>,
        fuzziness: u8,
        operator: MatchOperator,
    },
    /// Analysed terms in consecutive positions.
    MatchPhrase {
        phrase: String,
        field: Option<String>,
    },
    Prefix {
        prefix: String,
        field: Option<String>,
    },
    /// `*` matches any run of characters, `?` exactly one.
    Wildcard {
        pattern: String,
        field: Option<String>,
    },
    /// Whole-term regular expression.
    Regexp {
        pattern: String,
        field: Option<String>,
    },
    Fuzzy {
        term: String,
        field: Option<String>,
        fuzziness: u8,
        prefix_length: usize,
    },
    NumericRange {
        field: Option<String>,
        min: Option<f64>,
        max: Option<f64>,
        inclusive_min: bool,
        inclusive_max: bool,
    },
    DateRange {
        field: Option<String>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        inclusive_start: bool,
        inclusive_end: bool,
    },
    /// Points within `distance` metres of `center`.
    GeoDistance {
        field: String,
        center: GeoPoint,
        distance: f64,
    },
    Boolean {
        must: Vec<Query>,
        should: Vec<Query>,
        must_not: Vec<Query>,
        /// Should clauses a document has to match.
        min_should: usize,
    },
    Boosted {
        query: Box<Query>,
        boost: f64,
    },
}

impl Query {
    pub fn term(term: impl Into<String>) -> Self {
        Query::Term {
            term: term.into(),
            field: None,
        }
    }

    pub fn matching(text: impl Into<String>) -> Self {
        Query::Match {
            text: text.into(),
            field: None,
            fuzziness: 0,
            operator: MatchOperator::Or,
        }
    }

    /// Parse a query string.
    pub fn query_string(query: &str) -> Result<Self> {
        parse_query_string(query)
    }

    /// Build a query from a `{name, p: {...}}` description.
    ///
    /// Names are matched ignoring case and underscores. An absent or
    /// unrecognised name is a match-all query.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSearchRequest` when a recognised query lacks a
    /// required parameter or carries an invalid one.
    pub fn from_description(description: &Value) -> Result<Self> {
        let empty = Map::new();
        let Some(object) = description.as_object() else {
            return Ok(Query::MatchAll);
        };
        let name = object
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .replace('_', "")
            .to_ascii_lowercase();
        let params = object.get("p").and_then(Value::as_object).unwrap_or(&empty);
        let field = optional_string(params, "field");

        let query = match name.as_str() {
            "querystring" => parse_query_string(&required_string(params, "q")?)?,
            "term" => Query::Term {
                term: required_string(params, "term")?,
                field,
            },
            "match" => Query::Match {
                text: required_string(params, "match")?,
                field,
                fuzziness: fuzziness(params)?.unwrap_or(0),
                operator: match optional_string(params, "operator").as_deref() {
                    None | Some("or") | Some("OR") => MatchOperator::Or,
                    Some("and") | Some("AND") => MatchOperator::And,
                    Some(other) => {
                        return Err(invalid(format!("unknown match operator '{}'", other)))
                    }
                },
            },
            "matchphrase" => Query::MatchPhrase {
                phrase: required_string(params, "match_phrase")?,
                field,
            },
            "prefix" => Query::Prefix {
                prefix: required_string(params, "prefix")?,
                field,
            },
            "wildcard" => Query::Wildcard {
                pattern: required_string(params, "wildcard")?,
                field,
            },
            "regexp" => {
                let pattern = required_string(params, "regexp")?;
                compile_term_regex(&pattern)?;
                Query::Regexp { pattern, field }
            }
            "fuzzy" => Query::Fuzzy {
                term: required_string(params, "term")?,
                field,
                fuzziness: fuzziness(params)?.unwrap_or(1),
                prefix_length: optional_number(params, "prefix")?.unwrap_or(0.0).max(0.0) as usize,
            },
            "numericrange" => Query::NumericRange {
                field,
                min: optional_number(params, "min")?,
                max: optional_number(params, "max")?,
                inclusive_min: optional_bool(params, "inclusive_min").unwrap_or(true),
                inclusive_max: optional_bool(params, "inclusive_max").unwrap_or(false),
            },
            "daterange" => Query::DateRange {
                field,
                start: optional_date(params, "start")?,
                end: optional_date(params, "end")?,
                inclusive_start: optional_bool(params, "inclusive_start").unwrap_or(true),
                inclusive_end: optional_bool(params, "inclusive_end").unwrap_or(false),
            },
            "geodistance" => {
                let lon = optional_number(params, "lon")?
                    .ok_or_else(|| missing("lon"))?;
                let lat = optional_number(params, "lat")?
                    .ok_or_else(|| missing("lat"))?;
                let center = GeoPoint::new(lat, lon)
                    .ok_or_else(|| invalid(format!("point ({}, {}) is out of range", lat, lon)))?;
                let distance = match params.get("distance") {
                    Some(Value::String(s)) => parse_distance(s)?,
                    Some(Value::Number(n)) => n.as_f64().unwrap_or(-1.0),
                    _ => return Err(missing("distance")),
                };
                if distance < 0.0 {
                    return Err(invalid("distance must not be negative".to_string()));
                }
                Query::GeoDistance {
                    field: field.ok_or_else(|| missing("field"))?,
                    center,
                    distance,
                }
            }
            "matchnone" => Query::MatchNone,
            _ => Query::MatchAll,
        };
        Ok(query)
    }

    /// Short human readable form used in explanations.
    pub fn describe(&self) -> String {
        let on = |field: &Option<String>| field.clone().unwrap_or_else(|| "_all".to_string());
        match self {
            Query::MatchAll => "match_all".to_string(),
            Query::MatchNone => "match_none".to_string(),
            Query::Term { term, field } => format!("term({}:{})", on(field), term),
            Query::Match { text, field, .. } => format!("match({}:{})", on(field), text),
            Query::MatchPhrase { phrase, field } => {
                format!("match_phrase({}:\"{}\")", on(field), phrase)
            }
            Query::Prefix { prefix, field } => format!("prefix({}:{}*)", on(field), prefix),
            Query::Wildcard { pattern, field } => format!("wildcard({}:{})", on(field), pattern),
            Query::Regexp { pattern, field } => format!("regexp({}:/{}/)", on(field), pattern),
            Query::Fuzzy {
                term,
                field,
                fuzziness,
                ..
            } => format!("fuzzy({}:{}~{})", on(field), term, fuzziness),
            Query::NumericRange { field, min, max, .. } => {
                format!("numeric_range({}:{:?}..{:?})", on(field), min, max)
            }
            Query::DateRange {
                field, start, end, ..
            } => format!(
                "date_range({}:{}..{})",
                on(field),
                start.map(|d| d.to_rfc3339()).unwrap_or_default(),
                end.map(|d| d.to_rfc3339()).unwrap_or_default()
            ),
            Query::GeoDistance {
                field,
                center,
                distance,
            } => format!(
                "geo_distance({}:{},{} within {}m)",
                field, center.lat, center.lon, distance
            ),
            Query::Boolean { .. } => "boolean".to_string(),
            Query::Boosted { query, boost } => format!("{}^{}", query.describe(), boost),
        }
    }
}

/// Compile `pattern` so that it must match a whole term.
pub(crate) fn compile_term_regex(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{})$", pattern))
        .map_err(|e| invalid(format!("invalid regexp '{}': {}", pattern, e)))
}

/// Translate a `*`/`?` wildcard pattern into a whole-term regex.
pub(crate) fn wildcard_regex(pattern: &str) -> Result<Regex> {
    let mut translated = String::with_capacity(pattern.len() + 8);
    for c in pattern.to_lowercase().chars() {
        match c {
            '*' => translated.push_str(".*"),
            '?' => translated.push('.'),
            other => translated.push_str(&regex::escape(&other.to_string())),
        }
    }
    compile_term_regex(&translated)
}

pub(crate) fn check_fuzziness(fuzziness: u64) -> Result<u8> {
    if fuzziness > u64::from(MAX_FUZZINESS) {
        return Err(invalid(format!(
            "fuzziness {} exceeds the maximum of {}",
            fuzziness, MAX_FUZZINESS
        )));
    }
    Ok(fuzziness as u8)
}

fn invalid(message: String) -> DododError {
    DododError::InvalidSearchRequest(message)
}

fn missing(key: &str) -> DododError {
    invalid(format!("missing query parameter '{}'", key))
}

fn required_string(params: &Map<String, Value>, key: &str) -> Result<String> {
    optional_string(params, key).ok_or_else(|| missing(key))
}

fn optional_string(params: &Map<String, Value>, key: &str) -> Option<String> {
    match params.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn optional_number(params: &Map<String, Value>, key: &str) -> Result<Option<f64>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| invalid(format!("parameter '{}' is not a number", key))),
        Some(_) => Err(invalid(format!("parameter '{}' is not a number", key))),
    }
}

fn optional_bool(params: &Map<String, Value>, key: &str) -> Option<bool> {
    match params.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => crate::mapping::parse_bool(s),
        _ => None,
    }
}

fn optional_date(params: &Map<String, Value>, key: &str) -> Result<Option<DateTime<Utc>>> {
    match optional_string(params, key) {
        None => Ok(None),
        Some(s) if s.is_empty() => Ok(None),
        Some(s) => parse_datetime(&s)
            .map(Some)
            .ok_or_else(|| invalid(format!("parameter '{}' is not a date: '{}'", key, s))),
    }
}

fn fuzziness(params: &Map<String, Value>) -> Result<Option<u8>> {
    match optional_number(params, "fuzziness")? {
        None => Ok(None),
        Some(n) if n < 0.0 => Err(invalid("fuzziness must not be negative".to_string())),
        Some(n) => check_fuzziness(n as u64).map(Some),
    }
}
