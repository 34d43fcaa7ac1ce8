//! Term and range facets over the matching documents.

use std::collections::{HashMap, HashSet};

use rusqlite::Connection;
use tracing::Span;

use super::analysis::{datetime_value, parse_datetime, NumericKind};
use super::request::FacetRequest;
use super::result::{DateRangeFacet, FacetResult, NumericRangeFacet, TermFacet};
use crate::error::Result;

/// Compute one facet over the documents in `matched`.
pub(crate) fn compute(
    conn: &Connection,
    request: &FacetRequest,
    matched: &HashSet<&str>,
    span: &Span,
) -> Result<FacetResult> {
    if request.is_range_facet() {
        range_facet(conn, request, matched, span)
    } else {
        term_facet(conn, request, matched)
    }
}

fn term_facet(
    conn: &Connection,
    request: &FacetRequest,
    matched: &HashSet<&str>,
) -> Result<FacetResult> {
    let mut pairs: HashSet<(String, String)> = HashSet::new();

    let mut keyword_stmt =
        conn.prepare("SELECT doc_id, term FROM keyword_fields WHERE field = ?1")?;
    let mut text_stmt = conn.prepare(
        r#"
            SELECT f.doc_id, t.term
            FROM text_terms t
            JOIN text_fields f ON f.rowid = t.doc
            WHERE f.field = ?1
            "#,
    )?;
    for stmt in [&mut keyword_stmt, &mut text_stmt] {
        let rows = stmt.query_map([&request.field], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (doc_id, term) = row?;
            if matched.contains(doc_id.as_str()) {
                pairs.insert((doc_id, term));
            }
        }
    }

    let mut counts: HashMap<&str, u64> = HashMap::new();
    let mut with_field: HashSet<&str> = HashSet::new();
    for (doc_id, term) in &pairs {
        *counts.entry(term.as_str()).or_default() += 1;
        with_field.insert(doc_id.as_str());
    }

    let mut terms: Vec<TermFacet> = counts
        .into_iter()
        .map(|(term, count)| TermFacet {
            term: term.to_string(),
            count,
        })
        .collect();
    terms.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.term.cmp(&b.term)));
    terms.truncate(request.size);

    let total = pairs.len() as u64;
    let shown: u64 = terms.iter().map(|t| t.count).sum();
    Ok(FacetResult {
        field: request.field.clone(),
        total,
        missing: (matched.len() - with_field.len()) as u64,
        other: total - shown,
        terms,
        ..FacetResult::default()
    })
}

fn values_by_document(
    conn: &Connection,
    field: &str,
    kind: NumericKind,
    matched: &HashSet<&str>,
) -> Result<HashMap<String, Vec<f64>>> {
    let mut stmt =
        conn.prepare("SELECT doc_id, value FROM numeric_fields WHERE field = ?1 AND kind = ?2")?;
    let rows = stmt.query_map([field, kind.as_str()], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
    })?;

    let mut values: HashMap<String, Vec<f64>> = HashMap::new();
    for row in rows {
        let (doc_id, value) = row?;
        if matched.contains(doc_id.as_str()) {
            values.entry(doc_id).or_default().push(value);
        }
    }
    Ok(values)
}

fn in_range(value: f64, min: Option<f64>, max: Option<f64>) -> bool {
    min.map_or(true, |min| value >= min) && max.map_or(true, |max| value < max)
}

fn range_facet(
    conn: &Connection,
    request: &FacetRequest,
    matched: &HashSet<&str>,
    span: &Span,
) -> Result<FacetResult> {
    let mut result = FacetResult {
        field: request.field.clone(),
        ..FacetResult::default()
    };
    let mut documents: HashSet<String> = HashSet::new();
    let mut counted: HashSet<String> = HashSet::new();

    if !request.numeric_ranges.is_empty() {
        let values = values_by_document(conn, &request.field, NumericKind::Numeric, matched)?;
        for range in &request.numeric_ranges {
            let mut count = 0;
            for (doc_id, doc_values) in &values {
                if doc_values.iter().any(|v| in_range(*v, range.min, range.max)) {
                    count += 1;
                    counted.insert(doc_id.clone());
                }
            }
            result.numeric_ranges.push(NumericRangeFacet {
                name: range.name.clone(),
                min: range.min,
                max: range.max,
                count,
            });
        }
        documents.extend(values.into_keys());
    }

    if !request.date_ranges.is_empty() {
        let values = values_by_document(conn, &request.field, NumericKind::DateTime, matched)?;
        for range in &request.date_ranges {
            let bound = |raw: &Option<String>| -> Option<f64> {
                let raw = raw.as_deref().filter(|s| !s.is_empty())?;
                match parse_datetime(raw) {
                    Some(parsed) => Some(datetime_value(parsed)),
                    None => {
                        tracing::warn!(
                            parent: span,
                            facet = %request.name,
                            range = %range.name,
                            bound = raw,
                            "unparsable date bound; treating range as unbounded"
                        );
                        None
                    }
                }
            };
            let (start, end) = (bound(&range.start), bound(&range.end));

            let mut count = 0;
            for (doc_id, doc_values) in &values {
                if doc_values.iter().any(|v| in_range(*v, start, end)) {
                    count += 1;
                    counted.insert(doc_id.clone());
                }
            }
            result.date_ranges.push(DateRangeFacet {
                name: range.name.clone(),
                start: range.start.clone(),
                end: range.end.clone(),
                count,
            });
        }
        documents.extend(values.into_keys());
    }

    result.total = documents.len() as u64;
    result.missing = (matched.len() - documents.len()) as u64;
    result.other = (documents.len() - counted.len()) as u64;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_is_half_open() {
        assert!(in_range(1.0, Some(1.0), Some(2.0)));
        assert!(!in_range(2.0, Some(1.0), Some(2.0)));
        assert!(in_range(-5.0, None, Some(0.0)));
        assert!(in_range(5.0, None, None));
    }
}
