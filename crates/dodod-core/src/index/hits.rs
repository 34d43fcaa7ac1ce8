//! Sorting, paging and hit assembly.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use rusqlite::{Connection, OptionalExtension};
use serde_json::{Map, Value};

use super::analysis::tokenize;
use super::executor::Matches;
use super::request::{HighlightStyle, SearchRequest};
use super::result::{Explanation, Location, SearchHit};
use crate::error::Result;

/// Longest highlighted fragment, in bytes.
const FRAGMENT_SIZE: usize = 200;

/// Bytes kept before the first match when a fragment is cut.
const FRAGMENT_CONTEXT: usize = 40;

#[derive(Debug, Clone, PartialEq)]
enum SortValue {
    Number(f64),
    Text(String),
    Missing,
}

impl SortValue {
    fn render(&self) -> String {
        match self {
            SortValue::Number(n) => n.to_string(),
            SortValue::Text(s) => s.clone(),
            SortValue::Missing => String::new(),
        }
    }

    /// Read a cursor value as the same kind of value as `self`.
    fn cursor_like(&self, cursor: &str) -> SortValue {
        if cursor.is_empty() {
            return SortValue::Missing;
        }
        match self {
            SortValue::Text(_) => SortValue::Text(cursor.to_string()),
            _ => cursor
                .parse()
                .map(SortValue::Number)
                .unwrap_or_else(|_| SortValue::Text(cursor.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SortKey {
    field: String,
    descending: bool,
}

/// Sort keys of a request; `_id` is always the last tie-breaker.
fn sort_keys(sort: &[String]) -> Vec<SortKey> {
    let mut keys: Vec<SortKey> = if sort.is_empty() {
        vec![SortKey {
            field: "_score".to_string(),
            descending: true,
        }]
    } else {
        sort.iter()
            .filter(|s| !s.is_empty())
            .map(|s| match s.strip_prefix('-') {
                Some(field) => SortKey {
                    field: field.to_string(),
                    descending: true,
                },
                None => SortKey {
                    field: s.trim_start_matches('+').to_string(),
                    descending: false,
                },
            })
            .collect()
    };
    if !keys.iter().any(|k| k.field == "_id") {
        keys.push(SortKey {
            field: "_id".to_string(),
            descending: false,
        });
    }
    keys
}

/// Missing values sort last in either direction.
fn compare_values(a: &SortValue, b: &SortValue, descending: bool) -> Ordering {
    let ordering = match (a, b) {
        (SortValue::Missing, SortValue::Missing) => return Ordering::Equal,
        (SortValue::Missing, _) => return Ordering::Greater,
        (_, SortValue::Missing) => return Ordering::Less,
        (SortValue::Number(x), SortValue::Number(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (SortValue::Text(x), SortValue::Text(y)) => x.cmp(y),
        (SortValue::Number(_), SortValue::Text(_)) => Ordering::Less,
        (SortValue::Text(_), SortValue::Number(_)) => Ordering::Greater,
    };
    if descending {
        ordering.reverse()
    } else {
        ordering
    }
}

/// First value of `field` per document: numeric, then keyword, then text.
fn field_values(conn: &Connection, field: &str) -> Result<HashMap<String, SortValue>> {
    let mut values = HashMap::new();

    let mut stmt =
        conn.prepare("SELECT doc_id, value FROM numeric_fields WHERE field = ?1 ORDER BY rowid")?;
    let rows = stmt.query_map([field], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
    })?;
    for row in rows {
        let (id, value) = row?;
        values.entry(id).or_insert(SortValue::Number(value));
    }

    for sql in [
        "SELECT doc_id, term FROM keyword_fields WHERE field = ?1 ORDER BY rowid",
        "SELECT doc_id, content FROM text_fields WHERE field = ?1 ORDER BY rowid",
    ] {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([field], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (id, value) = row?;
            values.entry(id).or_insert(SortValue::Text(value));
        }
    }
    Ok(values)
}

struct Candidate {
    id: String,
    score: f64,
    explanation: Option<Explanation>,
    keys: Vec<SortValue>,
}

impl Candidate {
    fn compare(&self, other: &Candidate, keys: &[SortKey]) -> Ordering {
        for (i, key) in keys.iter().enumerate() {
            let ordering = compare_values(&self.keys[i], &other.keys[i], key.descending);
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    fn compare_cursor(&self, cursor: &[String], keys: &[SortKey]) -> Ordering {
        for ((value, raw), key) in self.keys.iter().zip(cursor).zip(keys) {
            let ordering = compare_values(value, &value.cursor_like(raw), key.descending);
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

/// One page of hits plus the total count and best score.
pub(crate) struct Page {
    pub total: u64,
    pub max_score: f64,
    pub hits: Vec<SearchHit>,
}

pub(crate) fn collect(
    conn: &Connection,
    request: &SearchRequest,
    matches: Matches,
    terms: &BTreeSet<String>,
) -> Result<Page> {
    let total = matches.len() as u64;
    let keys = sort_keys(&request.sort);
    let scoring_disabled = request.scoring_disabled();

    let mut by_field: HashMap<&str, HashMap<String, SortValue>> = HashMap::new();
    for key in &keys {
        if !key.field.starts_with('_') && !by_field.contains_key(key.field.as_str()) {
            by_field.insert(key.field.as_str(), field_values(conn, &key.field)?);
        }
    }

    let mut max_score: f64 = 0.0;
    let mut candidates: Vec<Candidate> = matches
        .into_iter()
        .map(|(id, scored)| {
            let score = if scoring_disabled { 0.0 } else { scored.score };
            max_score = max_score.max(score);
            let keys = keys
                .iter()
                .map(|key| match key.field.as_str() {
                    "_id" => SortValue::Text(id.clone()),
                    "_score" => SortValue::Number(score),
                    field => by_field
                        .get(field)
                        .and_then(|values| values.get(&id))
                        .cloned()
                        .unwrap_or(SortValue::Missing),
                })
                .collect();
            Candidate {
                id,
                score,
                explanation: scored.explanation,
                keys,
            }
        })
        .collect();
    candidates.sort_by(|a, b| a.compare(b, &keys));

    let page: Vec<Candidate> = if !request.search_after.is_empty() {
        candidates
            .into_iter()
            .filter(|c| c.compare_cursor(&request.search_after, &keys) == Ordering::Greater)
            .take(request.size)
            .collect()
    } else if !request.search_before.is_empty() {
        let before: Vec<Candidate> = candidates
            .into_iter()
            .filter(|c| c.compare_cursor(&request.search_before, &keys) == Ordering::Less)
            .collect();
        let skip = before.len().saturating_sub(request.size);
        before.into_iter().skip(skip).collect()
    } else {
        candidates
            .into_iter()
            .skip(request.from)
            .take(request.size)
            .collect()
    };

    let mut hits = Vec::with_capacity(page.len());
    for candidate in page {
        hits.push(build_hit(conn, request, candidate, terms)?);
    }
    Ok(Page {
        total,
        max_score,
        hits,
    })
}

fn build_hit(
    conn: &Connection,
    request: &SearchRequest,
    candidate: Candidate,
    terms: &BTreeSet<String>,
) -> Result<SearchHit> {
    let stored: Option<(String, String)> = conn
        .query_row(
            "SELECT doc_type, stored FROM docs WHERE id = ?1",
            [&candidate.id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let (doc_type, stored) = match stored {
        Some((doc_type, json)) => (doc_type, serde_json::from_str::<Map<String, Value>>(&json)?),
        None => (String::new(), Map::new()),
    };

    let fields = if request.fields.iter().any(|f| f == "*") {
        stored.clone()
    } else {
        request
            .fields
            .iter()
            .filter_map(|f| stored.get(f).map(|v| (f.clone(), v.clone())))
            .collect()
    };

    let mut fragments = BTreeMap::new();
    if let Some(highlight) = &request.highlight {
        for (field, value) in &stored {
            if !highlight.fields.is_empty() && !highlight.fields.contains(field) {
                continue;
            }
            let marked: Vec<String> = strings(value)
                .into_iter()
                .filter_map(|text| fragment(text, terms, highlight.style))
                .collect();
            if !marked.is_empty() {
                fragments.insert(field.clone(), marked);
            }
        }
    }

    let mut locations: BTreeMap<String, BTreeMap<String, Vec<Location>>> = BTreeMap::new();
    if request.include_locations {
        for (field, value) in &stored {
            for text in strings(value) {
                for token in tokenize(text) {
                    if terms.contains(&token.term) {
                        locations
                            .entry(field.clone())
                            .or_default()
                            .entry(token.term)
                            .or_default()
                            .push(Location {
                                pos: token.position,
                                start: token.start,
                                end: token.end,
                            });
                    }
                }
            }
        }
    }

    Ok(SearchHit {
        sort: candidate.keys.iter().map(SortValue::render).collect(),
        id: candidate.id,
        doc_type,
        score: candidate.score,
        fields,
        fragments,
        locations,
        explanation: if request.explain {
            candidate.explanation
        } else {
            None
        },
        data: None,
    })
}

fn strings(value: &Value) -> Vec<&str> {
    match value {
        Value::String(s) => vec![s.as_str()],
        Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

/// `text` with matched terms marked, cut around the first match when long.
fn fragment(text: &str, terms: &BTreeSet<String>, style: HighlightStyle) -> Option<String> {
    let matched: Vec<_> = tokenize(text)
        .into_iter()
        .filter(|token| terms.contains(&token.term))
        .collect();
    let first = matched.first()?;

    let (start, end) = if text.len() <= FRAGMENT_SIZE {
        (0, text.len())
    } else {
        let mut start = first.start.saturating_sub(FRAGMENT_CONTEXT);
        while !text.is_char_boundary(start) {
            start -= 1;
        }
        let mut end = (start + FRAGMENT_SIZE).min(text.len());
        while !text.is_char_boundary(end) {
            end += 1;
        }
        (start, end)
    };

    let (open, close) = style.marks();
    let mut out = String::with_capacity(end - start + matched.len() * 16);
    let mut cursor = start;
    for token in matched.iter().filter(|t| t.start >= start && t.end <= end) {
        out.push_str(&text[cursor..token.start]);
        out.push_str(open);
        out.push_str(&text[token.start..token.end]);
        out.push_str(close);
        cursor = token.end;
    }
    out.push_str(&text[cursor..end]);
    Some(out)
}
