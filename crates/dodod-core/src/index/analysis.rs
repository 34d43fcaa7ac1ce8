//! Field extraction and text analysis.
//!
//! A document payload is walked against its type's mapping and flattened
//! into the rows the index tables hold. Nested fields are named by their
//! dotted path.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};

use super::geo::GeoPoint;
use crate::error::{DododError, Result};
use crate::mapping::{Analyzer, DocumentMapping, FieldMapping, FieldType, IndexMapping, Property};

/// A token of analysed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Lower-cased term.
    pub term: String,
    /// 1-based position in the field.
    pub position: usize,
    /// Byte offsets in the original text.
    pub start: usize,
    pub end: usize,
}

/// Split `text` into lower-cased alphanumeric tokens.
///
/// Matches the FTS5 `unicode61` tokenizer closely enough for highlighting
/// and term locations.
pub fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;

    let push = |tokens: &mut Vec<Token>, s: usize, e: usize| {
        tokens.push(Token {
            term: text[s..e].to_lowercase(),
            position: tokens.len() + 1,
            start: s,
            end: e,
        });
    };

    for (offset, c) in text.char_indices() {
        if c.is_alphanumeric() {
            if start.is_none() {
                start = Some(offset);
            }
        } else if let Some(s) = start.take() {
            push(&mut tokens, s, offset);
        }
    }
    if let Some(s) = start {
        push(&mut tokens, s, text.len());
    }
    tokens
}

/// Lower-cased terms of `text`.
pub fn analyze_terms(text: &str) -> Vec<String> {
    tokenize(text).into_iter().map(|t| t.term).collect()
}

/// Parse an RFC 3339 timestamp, or a plain date / date-time in UTC.
pub fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Some(parsed.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|parsed| parsed.and_utc())
}

fn parse_with_format(value: &str, format: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_str(value, format) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
        return Some(parsed.and_utc());
    }
    NaiveDate::parse_from_str(value, format)
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|parsed| parsed.and_utc())
}

/// Milliseconds since the epoch, as indexed for date fields.
pub fn datetime_value(value: DateTime<Utc>) -> f64 {
    value.timestamp_millis() as f64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericKind {
    Numeric,
    DateTime,
}

impl NumericKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NumericKind::Numeric => "numeric",
            NumericKind::DateTime => "datetime",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextEntry {
    pub field: String,
    pub in_all: bool,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeywordEntry {
    pub field: String,
    pub in_all: bool,
    pub term: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NumericEntry {
    pub field: String,
    pub in_all: bool,
    pub kind: NumericKind,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeoEntry {
    pub field: String,
    pub point: GeoPoint,
}

/// A document flattened into index rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalyzedDocument {
    pub id: String,
    pub doc_type: String,
    pub text: Vec<TextEntry>,
    pub keywords: Vec<KeywordEntry>,
    pub numbers: Vec<NumericEntry>,
    pub geo: Vec<GeoEntry>,
    /// Stored field values by indexed name.
    pub stored: Map<String, Value>,
}

impl AnalyzedDocument {
    fn store(&mut self, field: &str, value: &Value) {
        match self.stored.get_mut(field) {
            None => {
                self.stored.insert(field.to_string(), value.clone());
            }
            Some(Value::Array(items)) => items.push(value.clone()),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value.clone()]);
            }
        }
    }
}

/// Flatten `payload` of a document of `doc_type` according to `mapping`.
///
/// Values that do not fit their mapped type are skipped.
///
/// # Errors
///
/// Returns `Index` if the payload is not a JSON object.
pub fn analyze(
    id: &str,
    doc_type: &str,
    payload: &Value,
    mapping: &IndexMapping,
) -> Result<AnalyzedDocument> {
    let object = payload.as_object().ok_or_else(|| {
        DododError::Index(format!("document '{}' payload is not an object", id))
    })?;

    let doc_mapping = mapping.mapping_for(doc_type);
    let analyzer = doc_mapping
        .default_analyzer
        .unwrap_or(mapping.default_analyzer);

    let mut doc = AnalyzedDocument {
        id: id.to_string(),
        doc_type: doc_type.to_string(),
        ..AnalyzedDocument::default()
    };
    if doc_mapping.enabled {
        walk(&mut doc, object, doc_mapping, "", analyzer);
    }
    Ok(doc)
}

fn walk(
    doc: &mut AnalyzedDocument,
    object: &Map<String, Value>,
    mapping: &DocumentMapping,
    prefix: &str,
    analyzer: Analyzer,
) {
    for (key, value) in object {
        match mapping.property(key) {
            Some(Property::Field(field)) => {
                let name = format!("{}{}", prefix, field.name.as_deref().unwrap_or(key));
                index_field(doc, &name, field, value, analyzer);
            }
            Some(Property::Document(sub)) => {
                if !sub.enabled {
                    continue;
                }
                let sub_analyzer = sub.default_analyzer.unwrap_or(analyzer);
                let sub_prefix = format!("{}{}.", prefix, key);
                for item in elements(value) {
                    if let Value::Object(inner) = item {
                        walk(doc, inner, sub, &sub_prefix, sub_analyzer);
                    }
                }
            }
            None if mapping.dynamic => {
                let name = format!("{}{}", prefix, key);
                index_dynamic(doc, &name, value, analyzer);
            }
            None => {}
        }
    }
}

fn elements(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}

fn index_field(
    doc: &mut AnalyzedDocument,
    name: &str,
    field: &FieldMapping,
    value: &Value,
    analyzer: Analyzer,
) {
    if let Value::Array(items) = value {
        // A [lon, lat] pair is a single geo point.
        if field.field_type != FieldType::GeoPoint || GeoPoint::from_value(value).is_none() {
            for item in items {
                index_field(doc, name, field, item, analyzer);
            }
            return;
        }
    }
    if value.is_null() {
        return;
    }

    if field.store {
        doc.store(name, value);
    }
    if !field.index {
        return;
    }

    let in_all = field.include_in_all;
    match field.field_type {
        FieldType::Text => {
            let content = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => return,
            };
            match field.analyzer.unwrap_or(analyzer) {
                Analyzer::Keyword => doc.keywords.push(KeywordEntry {
                    field: name.to_string(),
                    in_all,
                    term: content,
                }),
                _ => doc.text.push(TextEntry {
                    field: name.to_string(),
                    in_all,
                    content,
                }),
            }
        }
        FieldType::Numeric => {
            let number = match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            };
            if let Some(number) = number.filter(|n| n.is_finite()) {
                doc.numbers.push(NumericEntry {
                    field: name.to_string(),
                    in_all,
                    kind: NumericKind::Numeric,
                    value: number,
                });
            }
        }
        FieldType::Boolean => {
            let flag = match value {
                Value::Bool(b) => Some(*b),
                Value::String(s) if s == "true" => Some(true),
                Value::String(s) if s == "false" => Some(false),
                _ => None,
            };
            if let Some(flag) = flag {
                doc.keywords.push(KeywordEntry {
                    field: name.to_string(),
                    in_all,
                    term: flag.to_string(),
                });
            }
        }
        FieldType::DateTime => {
            let parsed = match (value, field.date_format.as_deref()) {
                (Value::String(s), Some(format)) => {
                    parse_with_format(s, format).or_else(|| parse_datetime(s))
                }
                (Value::String(s), None) => parse_datetime(s),
                _ => None,
            };
            if let Some(parsed) = parsed {
                doc.numbers.push(NumericEntry {
                    field: name.to_string(),
                    in_all,
                    kind: NumericKind::DateTime,
                    value: datetime_value(parsed),
                });
            }
        }
        FieldType::GeoPoint => {
            if let Some(point) = GeoPoint::from_value(value) {
                doc.geo.push(GeoEntry {
                    field: name.to_string(),
                    point,
                });
            }
        }
    }
}

fn index_dynamic(doc: &mut AnalyzedDocument, name: &str, value: &Value, analyzer: Analyzer) {
    let field_type = match value {
        Value::Null => return,
        Value::Array(items) => {
            for item in items {
                index_dynamic(doc, name, item, analyzer);
            }
            return;
        }
        Value::Object(inner) => {
            let prefix = format!("{}.", name);
            walk(doc, inner, &DocumentMapping::default(), &prefix, analyzer);
            return;
        }
        Value::String(s) if parse_datetime(s).is_some() => FieldType::DateTime,
        Value::String(_) => FieldType::Text,
        Value::Number(_) => FieldType::Numeric,
        Value::Bool(_) => FieldType::Boolean,
    };
    index_field(doc, name, &FieldMapping::new(field_type), value, analyzer);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::FieldMapping;
    use serde_json::json;

    fn note_mapping() -> IndexMapping {
        let mut address = DocumentMapping {
            dynamic: false,
            ..DocumentMapping::default()
        };
        address.add_field("city", FieldMapping::text());

        let mut note = DocumentMapping {
            dynamic: false,
            ..DocumentMapping::default()
        };
        note.add_field("body", FieldMapping::text());
        let mut code = FieldMapping::text();
        code.analyzer = Some(Analyzer::Keyword);
        note.add_field("code", code);
        note.add_field("views", FieldMapping::numeric());
        note.add_field("done", FieldMapping::boolean());
        note.add_field("created", FieldMapping::datetime());
        let mut location = FieldMapping::geopoint();
        location.name = Some("where".to_string());
        note.add_field("location", location);
        note.add_sub_document("address", address);
        note.add_sub_document("secret", DocumentMapping::disabled());

        let mut mapping = IndexMapping::default();
        mapping.add_document_mapping("Note", note);
        mapping
    }

    #[test]
    fn test_tokenize_offsets() {
        let tokens = tokenize("Hello, wide World!");
        let terms: Vec<&str> = tokens.iter().map(|t| t.term.as_str()).collect();
        assert_eq!(terms, vec!["hello", "wide", "world"]);
        assert_eq!((tokens[2].start, tokens[2].end), (12, 17));
        assert_eq!(tokens[2].position, 3);
    }

    #[test]
    fn test_tokenize_unicode() {
        assert_eq!(analyze_terms("Café déjà-vu 42"), vec!["café", "déjà", "vu", "42"]);
        assert!(tokenize("  --  ").is_empty());
    }

    #[test]
    fn test_parse_datetime_formats() {
        assert!(parse_datetime("2021-03-04T05:06:07Z").is_some());
        assert!(parse_datetime("2021-03-04T05:06:07+08:00").is_some());
        assert!(parse_datetime("2021-03-04").is_some());
        assert!(parse_datetime("12:00").is_none());
    }

    #[test]
    fn test_analyze_mapped_document() {
        let payload = json!({
            "body": "Hello world",
            "code": "AB-12",
            "views": 7,
            "done": true,
            "created": "2021-03-04T05:06:07Z",
            "location": "wecpjc2b27ev",
            "address": {"city": "Hong Kong"},
            "secret": {"pin": "1234"},
            "unmapped": "ignored"
        });
        let doc = analyze("1", "Note", &payload, &note_mapping()).unwrap();

        let text_fields: Vec<&str> = doc.text.iter().map(|t| t.field.as_str()).collect();
        assert_eq!(text_fields, vec!["address.city", "body"]);
        assert_eq!(doc.keywords.len(), 2);
        assert!(doc
            .keywords
            .iter()
            .any(|k| k.field == "code" && k.term == "AB-12"));
        assert!(doc.keywords.iter().any(|k| k.field == "done" && k.term == "true"));
        assert_eq!(doc.numbers.len(), 2);
        assert_eq!(doc.geo[0].field, "where");
        assert!(!doc.stored.contains_key("unmapped"));
        assert!(!doc.stored.contains_key("secret.pin"));
    }

    #[test]
    fn test_analyze_dynamic_document() {
        let payload = json!({
            "title": "dynamic text",
            "count": 3,
            "when": "2020-01-01T00:00:00Z",
            "tags": ["a", "b"],
            "inner": {"deep": "value"}
        });
        let doc = analyze("2", "Unregistered", &payload, &IndexMapping::default()).unwrap();

        assert!(doc.text.iter().any(|t| t.field == "inner.deep"));
        assert_eq!(doc.text.iter().filter(|t| t.field == "tags").count(), 2);
        assert!(doc
            .numbers
            .iter()
            .any(|n| n.field == "when" && n.kind == NumericKind::DateTime));
        assert_eq!(doc.stored["tags"], json!(["a", "b"]));
    }

    #[test]
    fn test_uncoercible_values_skipped() {
        let payload = json!({"views": "many", "created": "12:00", "done": "maybe"});
        let doc = analyze("3", "Note", &payload, &note_mapping()).unwrap();
        assert!(doc.numbers.is_empty());
        assert!(doc.keywords.is_empty());
    }

    #[test]
    fn test_non_object_payload_rejected() {
        assert!(analyze("4", "Note", &json!([1, 2]), &note_mapping()).is_err());
    }
}
