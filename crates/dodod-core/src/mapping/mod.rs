//! Index mapping model.
//!
//! An [`IndexMapping`] tells the index how to treat each field of each
//! registered document type. It is derived from field descriptors on every
//! open and never persisted; only its fingerprint is recorded by the index.

mod compiler;

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{DododError, Result};

pub use compiler::{compile_document_mapping, parse_bool};

/// Text analysis applied to a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Analyzer {
    /// Unicode word tokens, lower-cased.
    Standard,
    /// Unicode word tokens, lower-cased. The default.
    Simple,
    /// The whole value as a single exact term.
    Keyword,
}

impl Analyzer {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "standard" => Ok(Analyzer::Standard),
            "simple" => Ok(Analyzer::Simple),
            "keyword" => Ok(Analyzer::Keyword),
            other => Err(DododError::InvalidMapping(format!(
                "unknown analyzer '{}'",
                other
            ))),
        }
    }

    pub fn is_tokenized(self) -> bool {
        !matches!(self, Analyzer::Keyword)
    }
}

/// Value type of an indexed field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Numeric,
    Boolean,
    DateTime,
    GeoPoint,
}

impl FieldType {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "text" => Ok(FieldType::Text),
            "numeric" => Ok(FieldType::Numeric),
            "boolean" => Ok(FieldType::Boolean),
            "datetime" => Ok(FieldType::DateTime),
            "geopoint" => Ok(FieldType::GeoPoint),
            other => Err(DododError::InvalidMapping(format!(
                "unknown field type '{}'",
                other
            ))),
        }
    }
}

/// Indexing configuration of a single field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldMapping {
    /// Name the field is indexed under; defaults to its property key.
    pub name: Option<String>,
    pub field_type: FieldType,
    /// Analyzer override; text fields fall back to the document default.
    pub analyzer: Option<Analyzer>,
    pub store: bool,
    pub index: bool,
    pub include_term_vectors: bool,
    pub include_in_all: bool,
    pub doc_values: bool,
    pub date_format: Option<String>,
}

impl FieldMapping {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            name: None,
            field_type,
            analyzer: None,
            store: true,
            index: true,
            include_term_vectors: field_type == FieldType::Text,
            include_in_all: true,
            doc_values: true,
            date_format: None,
        }
    }

    pub fn text() -> Self {
        Self::new(FieldType::Text)
    }

    pub fn numeric() -> Self {
        Self::new(FieldType::Numeric)
    }

    pub fn boolean() -> Self {
        Self::new(FieldType::Boolean)
    }

    pub fn datetime() -> Self {
        Self::new(FieldType::DateTime)
    }

    pub fn geopoint() -> Self {
        Self::new(FieldType::GeoPoint)
    }
}

/// A property of a document mapping.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Property {
    Field(FieldMapping),
    Document(DocumentMapping),
}

/// Mapping of one document type or sub-document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentMapping {
    pub enabled: bool,
    /// Index properties that have no explicit mapping.
    pub dynamic: bool,
    pub default_analyzer: Option<Analyzer>,
    /// Keyed by the property's key in the serialized document.
    pub properties: BTreeMap<String, Property>,
}

impl Default for DocumentMapping {
    fn default() -> Self {
        Self {
            enabled: true,
            dynamic: true,
            default_analyzer: None,
            properties: BTreeMap::new(),
        }
    }
}

impl DocumentMapping {
    /// A sub-mapping whose content is never indexed.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn add_field(&mut self, key: impl Into<String>, field: FieldMapping) {
        self.properties.insert(key.into(), Property::Field(field));
    }

    pub fn add_sub_document(&mut self, key: impl Into<String>, mapping: DocumentMapping) {
        self.properties
            .insert(key.into(), Property::Document(mapping));
    }

    pub fn property(&self, key: &str) -> Option<&Property> {
        self.properties.get(key)
    }
}

/// Mapping of every registered type plus the dynamic default.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexMapping {
    pub types: BTreeMap<String, DocumentMapping>,
    /// Applied to documents whose type has no explicit mapping.
    pub default_mapping: DocumentMapping,
    pub default_analyzer: Analyzer,
}

impl Default for IndexMapping {
    fn default() -> Self {
        Self {
            types: BTreeMap::new(),
            default_mapping: DocumentMapping::default(),
            default_analyzer: Analyzer::Simple,
        }
    }
}

impl IndexMapping {
    pub fn add_document_mapping(&mut self, type_name: impl Into<String>, mapping: DocumentMapping) {
        self.types.insert(type_name.into(), mapping);
    }

    /// Mapping that applies to documents of `type_name`.
    pub fn mapping_for(&self, type_name: &str) -> &DocumentMapping {
        self.types.get(type_name).unwrap_or(&self.default_mapping)
    }

    /// Stable hash of the mapping, used to detect schema drift between opens.
    pub fn fingerprint(&self) -> Result<String> {
        let encoded = serde_json::to_vec(self)?;
        Ok(blake3::hash(&encoded).to_hex().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analyzer_names() {
        assert_eq!(Analyzer::from_name("keyword").unwrap(), Analyzer::Keyword);
        assert!(Analyzer::from_name("porter").is_err());
        assert!(!Analyzer::Keyword.is_tokenized());
    }

    #[test]
    fn test_unmapped_type_uses_default() {
        let mut mapping = IndexMapping::default();
        let mut note = DocumentMapping::default();
        note.add_field("body", FieldMapping::text());
        mapping.add_document_mapping("Note", note.clone());

        assert_eq!(mapping.mapping_for("Note"), &note);
        assert!(mapping.mapping_for("Other").properties.is_empty());
    }

    #[test]
    fn test_fingerprint_tracks_changes() {
        let mut mapping = IndexMapping::default();
        let before = mapping.fingerprint().unwrap();
        assert_eq!(before, mapping.fingerprint().unwrap());

        mapping.add_document_mapping("Note", DocumentMapping::default());
        assert_ne!(before, mapping.fingerprint().unwrap());
    }
}
