//! Query execution against the index tables.
//!
//! Every query node evaluates to the set of matching document ids with a
//! score. Text terms are scored by FTS5 BM25 (negated so that higher is
//! better); keyword, numeric and geo matches score 1.0; compound nodes sum
//! the scores of their matching children.

use std::collections::{BTreeSet, HashMap};

use rusqlite::{params, Connection};

use super::analysis::{analyze_terms, datetime_value, NumericKind};
use super::geo::{haversine_distance, GeoPoint};
use super::query::{compile_term_regex, wildcard_regex, MatchOperator, Query};
use super::result::Explanation;
use super::store::CancelToken;
use crate::error::{DododError, Result};

/// Most terms a prefix, wildcard, regexp or fuzzy query may expand to.
const MAX_EXPANSIONS: usize = 1024;

/// Score lost per edit by a fuzzy match.
const FUZZY_EDIT_PENALTY: f64 = 0.2;

#[derive(Debug, Clone)]
pub(crate) struct Scored {
    pub score: f64,
    pub explanation: Option<Explanation>,
}

impl Scored {
    fn absorb(&mut self, other: Scored) {
        self.score += other.score;
        if let Some(mine) = self.explanation.as_mut() {
            mine.value = self.score;
            if let Some(theirs) = other.explanation {
                mine.children.push(theirs);
            }
        }
    }

    fn scale(&mut self, factor: f64, message: String) {
        self.score *= factor;
        if let Some(inner) = self.explanation.take() {
            let mut outer = Explanation::new(self.score, message);
            outer.children.push(inner);
            self.explanation = Some(outer);
        }
    }
}

pub(crate) type Matches = HashMap<String, Scored>;

pub(crate) struct Executor<'a> {
    conn: &'a Connection,
    cancel: Option<&'a CancelToken>,
    explain: bool,
    /// Analysed terms that matched, for highlighting and locations.
    terms: BTreeSet<String>,
}

impl<'a> Executor<'a> {
    pub fn new(conn: &'a Connection, cancel: Option<&'a CancelToken>, explain: bool) -> Self {
        Self {
            conn,
            cancel,
            explain,
            terms: BTreeSet::new(),
        }
    }

    pub fn into_terms(self) -> BTreeSet<String> {
        self.terms
    }

    pub fn execute(&mut self, query: &Query) -> Result<Matches> {
        if let Some(cancel) = self.cancel {
            cancel.check()?;
        }

        match query {
            Query::MatchAll => self.all_documents(1.0),
            Query::MatchNone => Ok(Matches::new()),
            Query::Term { term, field } => self.term(term, field.as_deref()),
            Query::Match {
                text,
                field,
                fuzziness,
                operator,
            } => self.matching(text, field.as_deref(), *fuzziness, *operator),
            Query::MatchPhrase { phrase, field } => self.phrase(phrase, field.as_deref()),
            Query::Prefix { prefix, field } => {
                let prefix = prefix.to_lowercase();
                let label = query.describe();
                self.expand(field.as_deref(), &label, |term| {
                    term.to_lowercase().starts_with(&prefix).then_some(1.0)
                })
            }
            Query::Wildcard { pattern, field } => {
                let regex = wildcard_regex(pattern)?;
                let label = query.describe();
                self.expand(field.as_deref(), &label, |term| {
                    regex.is_match(&term.to_lowercase()).then_some(1.0)
                })
            }
            Query::Regexp { pattern, field } => {
                let regex = compile_term_regex(pattern)?;
                let label = query.describe();
                self.expand(field.as_deref(), &label, |term| {
                    regex.is_match(term).then_some(1.0)
                })
            }
            Query::Fuzzy {
                term,
                field,
                fuzziness,
                prefix_length,
            } => self.fuzzy(term, field.as_deref(), *fuzziness, *prefix_length),
            Query::NumericRange {
                field,
                min,
                max,
                inclusive_min,
                inclusive_max,
            } => self.range(
                NumericKind::Numeric,
                field.as_deref(),
                (*min, *inclusive_min),
                (*max, *inclusive_max),
                &query.describe(),
            ),
            Query::DateRange {
                field,
                start,
                end,
                inclusive_start,
                inclusive_end,
            } => self.range(
                NumericKind::DateTime,
                field.as_deref(),
                (start.map(datetime_value), *inclusive_start),
                (end.map(datetime_value), *inclusive_end),
                &query.describe(),
            ),
            Query::GeoDistance {
                field,
                center,
                distance,
            } => self.geo_distance(field, *center, *distance, &query.describe()),
            Query::Boolean {
                must,
                should,
                must_not,
                min_should,
            } => self.boolean(must, should, must_not, *min_should),
            Query::Boosted { query, boost } => {
                let mut matches = self.execute(query)?;
                let message = format!("boost {}", boost);
                for scored in matches.values_mut() {
                    scored.scale(*boost, message.clone());
                }
                Ok(matches)
            }
        }
    }

    fn leaf(&self, score: f64, message: impl FnOnce() -> String) -> Scored {
        Scored {
            score,
            explanation: self.explain.then(|| Explanation::new(score, message())),
        }
    }

    fn node(&self, message: &str) -> Scored {
        Scored {
            score: 0.0,
            explanation: self.explain.then(|| Explanation::new(0.0, message)),
        }
    }

    fn union(&self, message: &str, parts: Vec<Matches>) -> Matches {
        let mut out = Matches::new();
        for part in parts {
            for (id, scored) in part {
                out.entry(id)
                    .or_insert_with(|| self.node(message))
                    .absorb(scored);
            }
        }
        out
    }

    fn intersect(&self, message: &str, parts: Vec<Matches>) -> Matches {
        let mut parts = parts.into_iter();
        let Some(first) = parts.next() else {
            return Matches::new();
        };

        let mut out: Matches = first
            .into_iter()
            .map(|(id, scored)| {
                let mut node = self.node(message);
                node.absorb(scored);
                (id, node)
            })
            .collect();
        for mut part in parts {
            out.retain(|id, node| match part.remove(id) {
                Some(scored) => {
                    node.absorb(scored);
                    true
                }
                None => false,
            });
        }
        out
    }

    fn all_documents(&self, score: f64) -> Result<Matches> {
        let mut stmt = self.conn.prepare("SELECT id FROM docs")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut out = Matches::new();
        for id in rows {
            out.insert(id?, self.leaf(score, || "match_all".to_string()));
        }
        Ok(out)
    }

    /// Documents whose text in `field` (or `_all`) matches an FTS5 expression.
    ///
    /// A document has one row per text field, so row scores are summed here.
    /// FTS5 refuses `bm25()` under an aggregate.
    fn fts(&self, expression: &str, field: Option<&str>, label: &str) -> Result<Matches> {
        let mut stmt = self.conn.prepare(
            r#"
                SELECT doc_id, -bm25(text_fields)
                FROM text_fields
                WHERE text_fields MATCH ?1
                  AND (field = ?2 OR (?2 IS NULL AND in_all = 1))
                "#,
        )?;
        let rows = stmt.query_map(params![expression, field], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?;

        let mut scores: HashMap<String, f64> = HashMap::new();
        for row in rows {
            let (id, score) = row?;
            *scores.entry(id).or_insert(0.0) += score;
        }
        Ok(scores
            .into_iter()
            .map(|(id, score)| {
                let scored = self.leaf(score, || format!("bm25 of {}", label));
                (id, scored)
            })
            .collect())
    }

    /// Documents carrying exactly `term` in a keyword field.
    fn keyword(&self, term: &str, field: Option<&str>, label: &str) -> Result<Matches> {
        let mut stmt = self.conn.prepare(
            r#"
                SELECT DISTINCT doc_id FROM keyword_fields
                WHERE term = ?1 AND (field = ?2 OR (?2 IS NULL AND in_all = 1))
                "#,
        )?;
        let rows = stmt.query_map(params![term, field], |row| row.get::<_, String>(0))?;

        let mut out = Matches::new();
        for id in rows {
            out.insert(id?, self.leaf(1.0, || format!("keyword {}", label)));
        }
        Ok(out)
    }

    fn text_term(&mut self, term: &str, field: Option<&str>) -> Result<Matches> {
        let matches = self.fts(&quote(term), field, term)?;
        if !matches.is_empty() {
            self.terms.insert(term.to_string());
        }
        Ok(matches)
    }

    fn term(&mut self, term: &str, field: Option<&str>) -> Result<Matches> {
        let mut parts = vec![self.keyword(term, field, term)?];
        // Only a term that survives analysis unchanged can match text.
        let analysed = analyze_terms(term);
        if analysed.len() == 1 && analysed[0] == term {
            parts.push(self.text_term(term, field)?);
        }
        Ok(self.union(&format!("term {}", term), parts))
    }

    fn matching(
        &mut self,
        text: &str,
        field: Option<&str>,
        fuzziness: u8,
        operator: MatchOperator,
    ) -> Result<Matches> {
        let mut per_term = Vec::new();
        for term in analyze_terms(text) {
            per_term.push(if fuzziness > 0 {
                self.fuzzy(&term, field, fuzziness, 0)?
            } else {
                self.text_term(&term, field)?
            });
        }

        let label = format!("match {}", text);
        let text_matches = match operator {
            MatchOperator::Or => self.union(&label, per_term),
            MatchOperator::And => self.intersect(&label, per_term),
        };
        let keyword_matches = self.keyword(text, field, text)?;
        Ok(self.union(&label, vec![text_matches, keyword_matches]))
    }

    fn phrase(&mut self, phrase: &str, field: Option<&str>) -> Result<Matches> {
        let terms = analyze_terms(phrase);
        let mut parts = vec![self.keyword(phrase, field, phrase)?];
        if !terms.is_empty() {
            let matches = self.fts(&quote(&terms.join(" ")), field, phrase)?;
            if !matches.is_empty() {
                self.terms.extend(terms);
            }
            parts.push(matches);
        }
        Ok(self.union(&format!("phrase \"{}\"", phrase), parts))
    }

    fn fuzzy(
        &mut self,
        term: &str,
        field: Option<&str>,
        fuzziness: u8,
        prefix_length: usize,
    ) -> Result<Matches> {
        let target: Vec<char> = term.to_lowercase().chars().collect();
        let prefix: String = target.iter().take(prefix_length).collect();
        let label = format!("fuzzy {}~{}", term, fuzziness);

        self.expand(field, &label, |candidate| {
            let candidate = candidate.to_lowercase();
            if !candidate.starts_with(&prefix) {
                return None;
            }
            let candidate: Vec<char> = candidate.chars().collect();
            // Lengths further apart than the allowed edits cannot match.
            if candidate.len().abs_diff(target.len()) > usize::from(fuzziness) {
                return None;
            }
            let edits = edit_distance(&target, &candidate);
            (edits <= usize::from(fuzziness))
                .then(|| (1.0 - FUZZY_EDIT_PENALTY * edits as f64).max(0.0))
        })
    }

    /// Match every indexed term accepted by `matcher`, weighted by its result.
    fn expand<F>(&mut self, field: Option<&str>, label: &str, matcher: F) -> Result<Matches>
    where
        F: Fn(&str) -> Option<f64>,
    {
        let mut candidates = Vec::new();
        {
            let mut stmt = self.conn.prepare("SELECT term FROM text_vocab")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            for term in rows {
                let term = term?;
                if let Some(weight) = matcher(&term) {
                    candidates.push((term, weight));
                }
            }
        }
        if candidates.len() > MAX_EXPANSIONS {
            return Err(DododError::InvalidSearchRequest(format!(
                "{} expands to more than {} terms",
                label, MAX_EXPANSIONS
            )));
        }

        let mut parts = Vec::with_capacity(candidates.len() + 1);
        for (term, weight) in candidates {
            let mut matches = self.text_term(&term, field)?;
            if weight < 1.0 {
                let message = format!("{} matched {}", label, term);
                for scored in matches.values_mut() {
                    scored.scale(weight, message.clone());
                }
            }
            parts.push(matches);
        }

        let mut keyword_matches = Matches::new();
        let mut stmt = self.conn.prepare(
            r#"
                SELECT doc_id, term FROM keyword_fields
                WHERE field = ?1 OR (?1 IS NULL AND in_all = 1)
                "#,
        )?;
        let rows = stmt.query_map(params![field], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (id, term) = row?;
            if let Some(weight) = matcher(&term) {
                let scored = self.leaf(weight, || format!("{} matched keyword {}", label, term));
                keyword_matches
                    .entry(id)
                    .or_insert_with(|| self.node(label))
                    .absorb(scored);
            }
        }
        parts.push(keyword_matches);

        Ok(self.union(label, parts))
    }

    fn range(
        &self,
        kind: NumericKind,
        field: Option<&str>,
        (min, inclusive_min): (Option<f64>, bool),
        (max, inclusive_max): (Option<f64>, bool),
        label: &str,
    ) -> Result<Matches> {
        let mut stmt = self.conn.prepare(
            r#"
                SELECT DISTINCT doc_id FROM numeric_fields
                WHERE kind = ?1
                  AND (field = ?2 OR (?2 IS NULL AND in_all = 1))
                  AND (?3 IS NULL OR value > ?3 OR (?4 AND value = ?3))
                  AND (?5 IS NULL OR value < ?5 OR (?6 AND value = ?5))
                "#,
        )?;
        let rows = stmt.query_map(
            params![kind.as_str(), field, min, inclusive_min, max, inclusive_max],
            |row| row.get::<_, String>(0),
        )?;

        let mut out = Matches::new();
        for id in rows {
            out.insert(id?, self.leaf(1.0, || label.to_string()));
        }
        Ok(out)
    }

    fn geo_distance(
        &self,
        field: &str,
        center: GeoPoint,
        distance: f64,
        label: &str,
    ) -> Result<Matches> {
        let mut stmt = self
            .conn
            .prepare("SELECT doc_id, lat, lon FROM geo_fields WHERE field = ?1")?;
        let rows = stmt.query_map([field], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, f64>(2)?,
            ))
        })?;

        let mut out = Matches::new();
        for row in rows {
            let (id, lat, lon) = row?;
            if haversine_distance(center, GeoPoint { lat, lon }) <= distance {
                out.entry(id)
                    .or_insert_with(|| self.leaf(1.0, || label.to_string()));
            }
        }
        Ok(out)
    }

    fn boolean(
        &mut self,
        must: &[Query],
        should: &[Query],
        must_not: &[Query],
        min_should: usize,
    ) -> Result<Matches> {
        let mut must_matches = Vec::with_capacity(must.len());
        for query in must {
            must_matches.push(self.execute(query)?);
        }
        let mut should_matches = Vec::with_capacity(should.len());
        for query in should {
            should_matches.push(self.execute(query)?);
        }

        let mut candidates = if !must.is_empty() {
            self.intersect("sum of", must_matches)
        } else if !should.is_empty() {
            should_matches
                .iter()
                .flat_map(|matches| matches.keys())
                .map(|id| (id.clone(), self.node("sum of")))
                .collect()
        } else {
            self.all_documents(1.0)?
        };

        let required = if must.is_empty() {
            min_should.max(usize::from(!should.is_empty()))
        } else {
            min_should
        };
        candidates.retain(|id, node| {
            let mut matched = 0;
            for matches in &should_matches {
                if let Some(scored) = matches.get(id) {
                    matched += 1;
                    node.absorb(scored.clone());
                }
            }
            matched >= required
        });

        for query in must_not {
            for id in self.execute(query)?.keys() {
                candidates.remove(id);
            }
        }
        Ok(candidates)
    }
}

/// Quote `text` as an FTS5 string.
fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "\"\""))
}

/// Levenshtein distance over characters, two rows at a time.
pub(crate) fn edit_distance(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    #[test]
    fn test_edit_distance() {
        assert_eq!(edit_distance(&chars("kitten"), &chars("sitting")), 3);
        assert_eq!(edit_distance(&chars("value"), &chars("value")), 0);
        assert_eq!(edit_distance(&chars(""), &chars("abc")), 3);
        assert_eq!(edit_distance(&chars("héllo"), &chars("hello")), 1);
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("value"), "\"value\"");
        assert_eq!(quote("say \"hi\""), "\"say \"\"hi\"\"\"");
    }
}
