//! Search results.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

fn as_nanos<S: Serializer>(took: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(took.as_nanos()).unwrap_or(u64::MAX))
}

/// Score breakdown of one hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Explanation {
    pub value: f64,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Explanation>,
}

impl Explanation {
    pub fn new(value: f64, message: impl Into<String>) -> Self {
        Self {
            value,
            message: message.into(),
            children: Vec::new(),
        }
    }
}

/// Position of a matched term in a stored field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Location {
    /// 1-based token position.
    pub pos: usize,
    /// Byte offsets.
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub score: f64,
    /// Sort key values, usable as `search_after` / `search_before`.
    pub sort: Vec<String>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub fields: Map<String, Value>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub fragments: BTreeMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub locations: BTreeMap<String, BTreeMap<String, Vec<Location>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<Explanation>,
    /// Document payload re-read from the record store.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TermFacet {
    pub term: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumericRangeFacet {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateRangeFacet {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FacetResult {
    pub field: String,
    pub total: u64,
    pub missing: u64,
    pub other: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub terms: Vec<TermFacet>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub numeric_ranges: Vec<NumericRangeFacet>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub date_ranges: Vec<DateRangeFacet>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchResult {
    /// Every matching document, regardless of paging.
    pub total: u64,
    pub max_score: f64,
    #[serde(serialize_with = "as_nanos")]
    pub took: Duration,
    pub hits: Vec<SearchHit>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub facets: BTreeMap<String, FacetResult>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_result_shape() {
        let result = SearchResult {
            total: 1,
            max_score: 1.5,
            took: Duration::from_micros(3),
            hits: vec![SearchHit {
                id: "1".to_string(),
                doc_type: "Note".to_string(),
                score: 1.5,
                sort: vec!["1.5".to_string(), "1".to_string()],
                fields: Map::new(),
                fragments: BTreeMap::new(),
                locations: BTreeMap::new(),
                explanation: None,
                data: Some(json!({"id": "1"})),
            }],
            facets: BTreeMap::new(),
        };

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["took"], 3_000);
        assert_eq!(value["hits"][0]["type"], "Note");
        assert_eq!(value["hits"][0]["data"]["id"], "1");
        assert!(value["hits"][0].get("fields").is_none());
        assert!(value.get("facets").is_none());
    }
}
