//! Search requests.

use serde_json::{Map, Value};

use super::query::Query;
use crate::error::{DododError, Result};

/// Hits per page when a request does not say.
pub const DEFAULT_SIZE: usize = 10;

/// Terms per facet when a facet request does not say.
const DEFAULT_FACET_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HighlightStyle {
    #[default]
    Html,
    Ansi,
}

impl HighlightStyle {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "" | "html" => Ok(HighlightStyle::Html),
            "ansi" => Ok(HighlightStyle::Ansi),
            other => Err(DododError::InvalidSearchRequest(format!(
                "unknown highlight style '{}'",
                other
            ))),
        }
    }

    /// Opening and closing marks around a matched term.
    pub fn marks(self) -> (&'static str, &'static str) {
        match self {
            HighlightStyle::Html => ("<mark>", "</mark>"),
            HighlightStyle::Ansi => ("\x1b[43m", "\x1b[0m"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HighlightRequest {
    pub style: HighlightStyle,
    /// Fields to highlight; empty means every stored text field.
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NumericRangeRequest {
    pub name: String,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// Date bounds are kept as given; unparsable bounds are unbounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateRangeRequest {
    pub name: String,
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FacetRequest {
    pub name: String,
    pub field: String,
    pub size: usize,
    pub numeric_ranges: Vec<NumericRangeRequest>,
    pub date_ranges: Vec<DateRangeRequest>,
}

impl FacetRequest {
    /// A term facet.
    pub fn terms(name: impl Into<String>, field: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            field: field.into(),
            size,
            numeric_ranges: Vec::new(),
            date_ranges: Vec::new(),
        }
    }

    pub fn with_numeric_range(mut self, name: &str, min: Option<f64>, max: Option<f64>) -> Self {
        self.numeric_ranges.push(NumericRangeRequest {
            name: name.to_string(),
            min,
            max,
        });
        self
    }

    pub fn with_date_range(mut self, name: &str, start: Option<&str>, end: Option<&str>) -> Self {
        self.date_ranges.push(DateRangeRequest {
            name: name.to_string(),
            start: start.map(str::to_string),
            end: end.map(str::to_string),
        });
        self
    }

    pub fn is_range_facet(&self) -> bool {
        !self.numeric_ranges.is_empty() || !self.date_ranges.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query: Query,
    /// Hits per page; 0 returns only totals and facets.
    pub size: usize,
    pub from: usize,
    /// Stored fields to return with each hit; `"*"` returns all of them.
    pub fields: Vec<String>,
    /// Sort keys: `_id`, `_score` or a field name, `-` for descending.
    pub sort: Vec<String>,
    pub explain: bool,
    pub include_locations: bool,
    /// `"none"` zeroes every score.
    pub score: Option<String>,
    pub search_after: Vec<String>,
    pub search_before: Vec<String>,
    pub highlight: Option<HighlightRequest>,
    pub facets: Vec<FacetRequest>,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self::new(Query::MatchAll)
    }
}

impl SearchRequest {
    pub fn new(query: Query) -> Self {
        Self {
            query,
            size: DEFAULT_SIZE,
            from: 0,
            fields: Vec::new(),
            sort: Vec::new(),
            explain: false,
            include_locations: false,
            score: None,
            search_after: Vec::new(),
            search_before: Vec::new(),
            highlight: None,
            facets: Vec::new(),
        }
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn with_from(mut self, from: usize) -> Self {
        self.from = from;
        self
    }

    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_sort<I, S>(mut self, sort: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sort = sort.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_explain(mut self, explain: bool) -> Self {
        self.explain = explain;
        self
    }

    pub fn with_locations(mut self, include: bool) -> Self {
        self.include_locations = include;
        self
    }

    pub fn with_highlight(mut self, highlight: HighlightRequest) -> Self {
        self.highlight = Some(highlight);
        self
    }

    pub fn with_facet(mut self, facet: FacetRequest) -> Self {
        self.facets.push(facet);
        self
    }

    pub fn with_search_after(mut self, after: Vec<String>) -> Self {
        self.search_after = after;
        self
    }

    pub fn with_search_before(mut self, before: Vec<String>) -> Self {
        self.search_before = before;
        self
    }

    pub fn scoring_disabled(&self) -> bool {
        self.score.as_deref() == Some("none")
    }

    /// Check option combinations the engine cannot honour.
    pub fn validate(&self) -> Result<()> {
        if !self.search_after.is_empty() && !self.search_before.is_empty() {
            return Err(DododError::InvalidSearchRequest(
                "search_after and search_before are mutually exclusive".to_string(),
            ));
        }
        if self.from > 0 && (!self.search_after.is_empty() || !self.search_before.is_empty()) {
            return Err(DododError::InvalidSearchRequest(
                "from must be 0 with search_after or search_before".to_string(),
            ));
        }
        if let Some(score) = self.score.as_deref() {
            if !score.is_empty() && score != "none" {
                return Err(DododError::InvalidSearchRequest(format!(
                    "unknown score mode '{}'",
                    score
                )));
            }
        }
        for facet in &self.facets {
            if facet.field.is_empty() {
                return Err(DododError::InvalidSearchRequest(format!(
                    "facet '{}' has no field",
                    facet.name
                )));
            }
        }
        Ok(())
    }

    /// Build a request from its map form.
    ///
    /// ```
    /// use dodod_core::index::SearchRequest;
    /// use serde_json::json;
    ///
    /// let request = SearchRequest::from_value(&json!({
    ///     "query": {"name": "QueryString", "p": {"q": "value"}},
    ///     "size": 5,
    ///     "facets": [{"name": "kinds", "field": "kind", "size": 3}]
    /// }))
    /// .unwrap();
    /// assert_eq!(request.size, 5);
    /// assert_eq!(request.facets[0].size, 3);
    /// ```
    pub fn from_value(value: &Value) -> Result<Self> {
        let object = value.as_object().ok_or_else(|| {
            DododError::InvalidSearchRequest("search request must be an object".to_string())
        })?;

        let mut request = Self::new(match object.get("query") {
            Some(description) => Query::from_description(description)?,
            None => Query::MatchAll,
        });

        if let Some(size) = optional_count(object, "size")? {
            request.size = size;
        }
        request.from = optional_count(object, "from")?.unwrap_or(0);
        request.fields = string_list(object, "fields")?;
        request.sort = string_list(object, "sort")?;
        request.explain = flag(object, "explain");
        request.include_locations = flag(object, "include_locations");
        request.score = object
            .get("score")
            .and_then(Value::as_str)
            .map(str::to_string);
        request.search_after = string_list(object, "search_after")?;
        request.search_before = string_list(object, "search_before")?;

        if let Some(highlight) = object.get("highlight").and_then(Value::as_object) {
            request.highlight = Some(HighlightRequest {
                style: HighlightStyle::from_name(
                    highlight.get("style").and_then(Value::as_str).unwrap_or_default(),
                )?,
                fields: string_list(highlight, "fields")?,
            });
        }

        if let Some(facets) = object.get("facets") {
            let facets = facets.as_array().ok_or_else(|| {
                DododError::InvalidSearchRequest("facets must be a list".to_string())
            })?;
            for facet in facets {
                request.facets.push(facet_from_value(facet)?);
            }
        }

        request.validate()?;
        Ok(request)
    }
}

fn facet_from_value(value: &Value) -> Result<FacetRequest> {
    let object = value
        .as_object()
        .ok_or_else(|| DododError::InvalidSearchRequest("facet must be an object".to_string()))?;
    let text = |key: &str| object.get(key).and_then(Value::as_str).unwrap_or_default();

    let mut facet = FacetRequest::terms(
        text("name"),
        text("field"),
        optional_count(object, "size")?.unwrap_or(DEFAULT_FACET_SIZE),
    );

    if let Some(ranges) = object.get("numeric_range").and_then(Value::as_array) {
        for range in ranges {
            let bound = |key: &str| range.get(key).and_then(Value::as_f64);
            facet.numeric_ranges.push(NumericRangeRequest {
                name: range
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                min: bound("min"),
                max: bound("max"),
            });
        }
    }

    if let Some(ranges) = object.get("date_time_range").and_then(Value::as_array) {
        for range in ranges {
            let bound = |key: &str| range.get(key).and_then(Value::as_str).map(str::to_string);
            facet.date_ranges.push(DateRangeRequest {
                name: bound("name").unwrap_or_default(),
                start: bound("start"),
                end: bound("end"),
            });
        }
    }

    if facet.name.is_empty() {
        facet.name = facet.field.clone();
    }
    Ok(facet)
}

fn optional_count(object: &Map<String, Value>, key: &str) -> Result<Option<usize>> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .or_else(|| value.as_f64().filter(|n| *n >= 0.0).map(|n| n as u64))
            .map(|n| Some(n as usize))
            .ok_or_else(|| {
                DododError::InvalidSearchRequest(format!("'{}' must be a non-negative number", key))
            }),
    }
}

fn flag(object: &Map<String, Value>, key: &str) -> bool {
    object.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn string_list(object: &Map<String, Value>, key: &str) -> Result<Vec<String>> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(s)) => Ok(vec![s.clone()]),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                Value::Number(n) => Ok(n.to_string()),
                _ => Err(DododError::InvalidSearchRequest(format!(
                    "'{}' must be a list of strings",
                    key
                ))),
            })
            .collect(),
        Some(_) => Err(DododError::InvalidSearchRequest(format!(
            "'{}' must be a list of strings",
            key
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let request = SearchRequest::from_value(&json!({})).unwrap();
        assert_eq!(request.query, Query::MatchAll);
        assert_eq!(request.size, DEFAULT_SIZE);
        assert_eq!(request.from, 0);
        assert!(request.highlight.is_none());
    }

    #[test]
    fn test_full_request() {
        let request = SearchRequest::from_value(&json!({
            "query": {"name": "term", "p": {"term": "value", "field": "body"}},
            "size": 3,
            "from": 6,
            "fields": ["*"],
            "sort": ["-views", "_id"],
            "explain": true,
            "include_locations": true,
            "score": "none",
            "highlight": {"style": "ansi", "fields": ["body"]},
            "facets": [
                {"name": "popularity", "field": "views", "numeric_range": [
                    {"name": "low", "max": 10},
                    {"name": "high", "min": 10}
                ]},
                {"name": "era", "field": "created", "date_time_range": [
                    {"name": "old", "end": "2000-01-01T00:00:00Z"}
                ]}
            ]
        }))
        .unwrap();

        assert_eq!(request.size, 3);
        assert_eq!(request.from, 6);
        assert_eq!(request.sort, vec!["-views", "_id"]);
        assert!(request.scoring_disabled());
        assert_eq!(
            request.highlight,
            Some(HighlightRequest {
                style: HighlightStyle::Ansi,
                fields: vec!["body".to_string()]
            })
        );
        assert_eq!(request.facets[0].numeric_ranges.len(), 2);
        assert_eq!(request.facets[0].numeric_ranges[0].max, Some(10.0));
        assert_eq!(
            request.facets[1].date_ranges[0].end.as_deref(),
            Some("2000-01-01T00:00:00Z")
        );
    }

    #[test]
    fn test_from_with_cursor_rejected() {
        let result = SearchRequest::from_value(&json!({
            "from": 5,
            "search_after": ["1.5", "doc-3"]
        }));
        assert!(matches!(result, Err(DododError::InvalidSearchRequest(_))));
    }

    #[test]
    fn test_bad_shapes_rejected() {
        assert!(SearchRequest::from_value(&json!([])).is_err());
        assert!(SearchRequest::from_value(&json!({"size": -1})).is_err());
        assert!(SearchRequest::from_value(&json!({"facets": {}})).is_err());
        assert!(SearchRequest::from_value(&json!({"highlight": {"style": "bold"}})).is_err());
        assert!(SearchRequest::from_value(&json!({"score": "max"})).is_err());
    }
}
