//! Query-string syntax.
//!
//! Whitespace separated clauses of the form `[+|-][field:]value[^boost]`.
//! A clause without a prefix should match, `+` must match and `-` must not.
//! Values are bare terms, `"phrases"`, `/regexps/`, `term~N` fuzzy terms,
//! wildcard terms with `*` or `?`, or comparisons `>n`, `>=n`, `<n`, `<=n`.

use super::analysis::parse_datetime;
use super::query::{check_fuzziness, compile_term_regex, MatchOperator, Query};
use crate::error::{DododError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Occur {
    Should,
    Must,
    MustNot,
}

/// Parse `input` into a query. An empty string matches nothing.
///
/// # Errors
///
/// Returns `InvalidSearchRequest` for unterminated quotes or regexps,
/// invalid regexps, fuzziness above 2 and comparisons without a number or
/// date.
pub fn parse_query_string(input: &str) -> Result<Query> {
    let mut must = Vec::new();
    let mut should = Vec::new();
    let mut must_not = Vec::new();

    for clause in split_clauses(input)? {
        let (occur, query) = parse_clause(&clause)?;
        match occur {
            Occur::Should => should.push(query),
            Occur::Must => must.push(query),
            Occur::MustNot => must_not.push(query),
        }
    }

    if must.is_empty() && must_not.is_empty() {
        match should.len() {
            0 => return Ok(Query::MatchNone),
            1 => return Ok(should.remove(0)),
            _ => {}
        }
    }

    let min_should = usize::from(must.is_empty() && !should.is_empty());
    Ok(Query::Boolean {
        must,
        should,
        must_not,
        min_should,
    })
}

fn split_clauses(input: &str) -> Result<Vec<String>> {
    let mut clauses = Vec::new();
    let mut current = String::new();
    let mut open: Option<char> = None;
    let mut escaped = false;

    for c in input.chars() {
        if let Some(delimiter) = open {
            current.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == delimiter {
                open = None;
            }
            continue;
        }

        if c.is_whitespace() {
            if !current.is_empty() {
                clauses.push(std::mem::take(&mut current));
            }
            continue;
        }

        let at_value_start = current.is_empty()
            || current.ends_with(|p: char| matches!(p, '+' | '-' | ':' | '>' | '<' | '='));
        if c == '"' || (c == '/' && at_value_start) {
            open = Some(c);
        }
        current.push(c);
    }

    if let Some(delimiter) = open {
        return Err(DododError::InvalidSearchRequest(format!(
            "unterminated {} in query string",
            if delimiter == '"' { "quote" } else { "regexp" }
        )));
    }
    if !current.is_empty() {
        clauses.push(current);
    }
    Ok(clauses)
}

fn parse_clause(raw: &str) -> Result<(Occur, Query)> {
    let (occur, rest) = match raw.chars().next() {
        Some('+') if raw.len() > 1 => (Occur::Must, &raw[1..]),
        Some('-') if raw.len() > 1 => (Occur::MustNot, &raw[1..]),
        _ => (Occur::Should, raw),
    };

    let (rest, boost) = split_boost(rest);
    let (field, value) = split_field(rest);
    let query = parse_value(field, value)?;

    let query = match boost {
        Some(boost) => Query::Boosted {
            query: Box::new(query),
            boost,
        },
        None => query,
    };
    Ok((occur, query))
}

fn split_boost(clause: &str) -> (&str, Option<f64>) {
    if let Some(index) = clause.rfind('^') {
        let (head, tail) = clause.split_at(index);
        let tail = &tail[1..];
        if !head.is_empty() && !tail.contains(['"', '/']) {
            if let Ok(boost) = tail.parse::<f64>() {
                return (head, Some(boost));
            }
        }
    }
    (clause, None)
}

fn split_field(clause: &str) -> (Option<String>, &str) {
    let delimiter = clause.find(['"', '/']).unwrap_or(clause.len());
    match clause[..delimiter].find(':') {
        Some(index) if index > 0 => (Some(clause[..index].to_string()), &clause[index + 1..]),
        _ => (None, clause),
    }
}

fn parse_value(field: Option<String>, value: &str) -> Result<Query> {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        return Ok(Query::MatchPhrase {
            phrase: unescape(&value[1..value.len() - 1]),
            field,
        });
    }

    if value.len() >= 2 && value.starts_with('/') && value.ends_with('/') {
        let pattern = value[1..value.len() - 1].to_string();
        compile_term_regex(&pattern)?;
        return Ok(Query::Regexp { pattern, field });
    }

    for (operator, inclusive, lower) in [
        (">=", true, true),
        ("<=", true, false),
        (">", false, true),
        ("<", false, false),
    ] {
        if let Some(bound) = value.strip_prefix(operator) {
            return comparison(field, bound, inclusive, lower);
        }
    }

    if let Some((term, edits)) = value.rsplit_once('~') {
        if !term.is_empty() && (edits.is_empty() || edits.chars().all(|c| c.is_ascii_digit())) {
            let fuzziness = if edits.is_empty() {
                1
            } else {
                check_fuzziness(edits.parse().unwrap_or(u64::MAX))?
            };
            return Ok(Query::Fuzzy {
                term: unescape(term),
                field,
                fuzziness,
                prefix_length: 0,
            });
        }
    }

    if value.contains(['*', '?']) {
        return Ok(Query::Wildcard {
            pattern: value.to_string(),
            field,
        });
    }

    let text = unescape(value);
    let matching = Query::Match {
        text: text.clone(),
        field: field.clone(),
        fuzziness: 0,
        operator: MatchOperator::Or,
    };
    match text.parse::<f64>() {
        Ok(number) if number.is_finite() => Ok(Query::Boolean {
            must: Vec::new(),
            should: vec![
                matching,
                Query::NumericRange {
                    field,
                    min: Some(number),
                    max: Some(number),
                    inclusive_min: true,
                    inclusive_max: true,
                },
            ],
            must_not: Vec::new(),
            min_should: 1,
        }),
        _ => Ok(matching),
    }
}

fn comparison(field: Option<String>, bound: &str, inclusive: bool, lower: bool) -> Result<Query> {
    let quoted = bound.len() >= 2 && bound.starts_with('"') && bound.ends_with('"');
    let text = if quoted {
        &bound[1..bound.len() - 1]
    } else {
        bound
    };

    if !quoted {
        if let Ok(number) = text.parse::<f64>() {
            let (min, max) = if lower {
                (Some(number), None)
            } else {
                (None, Some(number))
            };
            return Ok(Query::NumericRange {
                field,
                min,
                max,
                inclusive_min: inclusive,
                inclusive_max: inclusive,
            });
        }
    }

    let date = parse_datetime(text).ok_or_else(|| {
        DododError::InvalidSearchRequest(format!(
            "comparison needs a number or a date, got '{}'",
            bound
        ))
    })?;
    let (start, end) = if lower {
        (Some(date), None)
    } else {
        (None, Some(date))
    };
    Ok(Query::DateRange {
        field,
        start,
        end,
        inclusive_start: inclusive,
        inclusive_end: inclusive,
    })
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}
