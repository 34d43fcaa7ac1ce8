//! Compiles field descriptors into index mappings.

use super::{Analyzer, DocumentMapping, FieldMapping, FieldType};
use crate::document::{FieldDescriptor, FieldKind};
use crate::error::{DododError, Result};

/// Nesting depth at which a type graph is assumed to be cyclic.
const MAX_NESTING_DEPTH: usize = 32;

/// Compile the mapping of one document type.
///
/// Properties are keyed by serialized name; each field mapping is indexed
/// under its override name when one is declared. Nested document fields
/// compile recursively into sub-mappings. Sequence, map and byte fields are
/// not indexed.
///
/// # Errors
///
/// Returns `NonBooleanValueForBooleanField` when a boolean option carries
/// another literal and `InvalidMapping` for unknown analyzers or field types.
pub fn compile_document_mapping(fields: &[FieldDescriptor]) -> Result<DocumentMapping> {
    compile_at_depth(fields, 0)
}

fn compile_at_depth(fields: &[FieldDescriptor], depth: usize) -> Result<DocumentMapping> {
    if depth > MAX_NESTING_DEPTH {
        return Err(DododError::InvalidMapping(
            "nested document types are too deep or cyclic".to_string(),
        ));
    }

    // Undeclared and skipped fields stay out of the index.
    let mut mapping = DocumentMapping {
        dynamic: false,
        default_analyzer: Some(Analyzer::Simple),
        ..DocumentMapping::default()
    };

    for field in fields {
        let key = field.json_name();

        if field.is_disabled() {
            mapping.add_sub_document(key, DocumentMapping::disabled());
            continue;
        }

        let mut field_mapping = match field.kind() {
            kind if kind.is_numeric() => FieldMapping::numeric(),
            kind if kind.is_collection() => continue,
            FieldKind::Bool => FieldMapping::boolean(),
            FieldKind::Timestamp => FieldMapping::datetime(),
            FieldKind::Nested(type_name) => {
                let nested = field.nested_schema().ok_or_else(|| {
                    DododError::InvalidMapping(format!(
                        "field '{}' names nested type '{}' without its schema",
                        field.name(),
                        type_name
                    ))
                })?;
                let sub = compile_at_depth(&(nested.fields)(), depth + 1)?;
                mapping.add_sub_document(key, sub);
                continue;
            }
            _ => FieldMapping::text(),
        };

        field_mapping.name = Some(field.mapping_name().to_string());
        for (option, value) in field.options() {
            apply_option(&mut field_mapping, option, value)?;
        }
        mapping.add_field(key, field_mapping);
    }

    Ok(mapping)
}

fn apply_option(mapping: &mut FieldMapping, key: &str, value: &str) -> Result<()> {
    let flag = || {
        parse_bool(value).ok_or_else(|| DododError::NonBooleanValueForBooleanField {
            key: key.to_string(),
            value: value.to_string(),
        })
    };

    match key {
        "store" => mapping.store = flag()?,
        "index" => mapping.index = flag()?,
        "include_term_vectors" => mapping.include_term_vectors = flag()?,
        "include_in_all" => mapping.include_in_all = flag()?,
        "doc_values" => mapping.doc_values = flag()?,
        "geo_hash" => {
            if flag()? {
                mapping.field_type = FieldType::GeoPoint;
            }
        }
        "analyzer" => mapping.analyzer = Some(Analyzer::from_name(value)?),
        "type" => mapping.field_type = FieldType::from_name(value)?,
        "date_format" => mapping.date_format = Some(value.to_string()),
        // Unknown keys have no mapping attribute to set.
        _ => {}
    }
    Ok(())
}

/// Parse a boolean literal: `1 t T TRUE true True 0 f F FALSE false False`.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentSchema;
    use crate::mapping::Property;

    struct Address;

    impl DocumentSchema for Address {
        const TYPE_NAME: &'static str = "Address";

        fn fields() -> Vec<FieldDescriptor> {
            vec![
                FieldDescriptor::new("city", FieldKind::String),
                FieldDescriptor::nested::<Country>("country"),
            ]
        }
    }

    struct Country;

    impl DocumentSchema for Country {
        const TYPE_NAME: &'static str = "Country";

        fn fields() -> Vec<FieldDescriptor> {
            vec![FieldDescriptor::new("code", FieldKind::String).option("analyzer", "keyword")]
        }
    }

    struct Looping;

    impl DocumentSchema for Looping {
        const TYPE_NAME: &'static str = "Looping";

        fn fields() -> Vec<FieldDescriptor> {
            vec![FieldDescriptor::nested::<Looping>("next")]
        }
    }

    fn field<'a>(mapping: &'a DocumentMapping, key: &str) -> &'a FieldMapping {
        match mapping.property(key) {
            Some(Property::Field(field)) => field,
            other => panic!("expected field mapping for {}, got {:?}", key, other),
        }
    }

    fn sub<'a>(mapping: &'a DocumentMapping, key: &str) -> &'a DocumentMapping {
        match mapping.property(key) {
            Some(Property::Document(doc)) => doc,
            other => panic!("expected sub-document for {}, got {:?}", key, other),
        }
    }

    #[test]
    fn test_kind_inference() {
        let fields = vec![
            FieldDescriptor::new("Count", FieldKind::U8).serde("count"),
            FieldDescriptor::new("ratio", FieldKind::F32),
            FieldDescriptor::new("active", FieldKind::Bool),
            FieldDescriptor::new("created", FieldKind::Timestamp),
            FieldDescriptor::new("title", FieldKind::String),
            FieldDescriptor::new("meta", FieldKind::Struct("Meta")),
            FieldDescriptor::new("tags", FieldKind::Sequence),
            FieldDescriptor::new("attrs", FieldKind::Map),
        ];
        let mapping = compile_document_mapping(&fields).unwrap();

        assert_eq!(field(&mapping, "count").field_type, FieldType::Numeric);
        assert_eq!(field(&mapping, "ratio").field_type, FieldType::Numeric);
        assert_eq!(field(&mapping, "active").field_type, FieldType::Boolean);
        assert_eq!(field(&mapping, "created").field_type, FieldType::DateTime);
        assert_eq!(field(&mapping, "title").field_type, FieldType::Text);
        assert_eq!(field(&mapping, "meta").field_type, FieldType::Text);
        assert!(mapping.property("tags").is_none());
        assert!(mapping.property("attrs").is_none());
        assert!(mapping.property("Count").is_none());
        assert!(!mapping.dynamic);
    }

    #[test]
    fn test_index_override_name() {
        let fields = vec![FieldDescriptor::new("Title", FieldKind::String)
            .serde("title")
            .index_as("headline")];
        let mapping = compile_document_mapping(&fields).unwrap();

        assert_eq!(field(&mapping, "title").name.as_deref(), Some("headline"));
    }

    #[test]
    fn test_disabled_field() {
        let fields = vec![FieldDescriptor::new("secret", FieldKind::String).disabled()];
        let mapping = compile_document_mapping(&fields).unwrap();

        assert!(!sub(&mapping, "secret").enabled);
    }

    #[test]
    fn test_multi_level_nesting() {
        let fields = vec![FieldDescriptor::nested::<Address>("address")];
        let mapping = compile_document_mapping(&fields).unwrap();

        let address = sub(&mapping, "address");
        assert_eq!(field(address, "city").field_type, FieldType::Text);
        let country = sub(address, "country");
        assert_eq!(field(country, "code").analyzer, Some(Analyzer::Keyword));
    }

    #[test]
    fn test_cyclic_nesting_rejected() {
        let fields = vec![FieldDescriptor::nested::<Looping>("next")];
        let result = compile_document_mapping(&fields);
        assert!(matches!(result, Err(DododError::InvalidMapping(_))));
    }

    #[test]
    fn test_boolean_options() {
        let fields = vec![FieldDescriptor::new("location", FieldKind::String)
            .option("geo_hash", "true")
            .option("store", "F")
            .option("include_in_all", "0")
            .option("unknown_key", "whatever")];
        let mapping = compile_document_mapping(&fields).unwrap();

        let location = field(&mapping, "location");
        assert_eq!(location.field_type, FieldType::GeoPoint);
        assert!(!location.store);
        assert!(!location.include_in_all);
    }

    #[test]
    fn test_non_boolean_literal_rejected() {
        let fields = vec![FieldDescriptor::new("location", FieldKind::String)
            .option("geo_hash", "yes")];
        let result = compile_document_mapping(&fields);
        assert!(matches!(
            result,
            Err(DododError::NonBooleanValueForBooleanField { key, value })
                if key == "geo_hash" && value == "yes"
        ));
    }

    #[test]
    fn test_unknown_analyzer_rejected() {
        let fields =
            vec![FieldDescriptor::new("title", FieldKind::String).option("analyzer", "porter")];
        assert!(matches!(
            compile_document_mapping(&fields),
            Err(DododError::InvalidMapping(_))
        ));
    }

    #[test]
    fn test_parse_bool_literals() {
        for literal in ["1", "t", "T", "TRUE", "true", "True"] {
            assert_eq!(parse_bool(literal), Some(true));
        }
        for literal in ["0", "f", "F", "FALSE", "false", "False"] {
            assert_eq!(parse_bool(literal), Some(false));
        }
        assert_eq!(parse_bool("yes"), None);
        assert_eq!(parse_bool("tRUE"), None);
    }
}
