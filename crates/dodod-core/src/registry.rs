//! Schema registry of document types.
//!
//! Field names form one namespace shared by every registered type: two
//! types may declare the same field only with the same kind.

use std::collections::{BTreeMap, HashMap};

use crate::document::{factory_for, Document, DocumentFactory, FieldKind, Model};
use crate::error::{DododError, Result};
use crate::mapping::{compile_document_mapping, DocumentMapping, IndexMapping};

/// A registered document type.
#[derive(Debug, Clone)]
pub struct DocumentType {
    name: String,
    fields: BTreeMap<String, FieldKind>,
    mapping: DocumentMapping,
    factory: DocumentFactory,
}

impl DocumentType {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Serialized field name to kind.
    pub fn fields(&self) -> &BTreeMap<String, FieldKind> {
        &self.fields
    }

    pub fn mapping(&self) -> &DocumentMapping {
        &self.mapping
    }

    /// Fresh zero value of the type.
    pub fn instantiate(&self) -> Box<dyn Document> {
        (self.factory)()
    }
}

/// Registered document types and the global field map.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    types: BTreeMap<String, DocumentType>,
    /// Field name to kind and the type that introduced it.
    fields: HashMap<String, (FieldKind, String)>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T`, compiling its index mapping.
    ///
    /// Registration is all-or-nothing: a failing type leaves the registry unchanged.
    ///
    /// # Errors
    ///
    /// - `DocumentTypeAlreadyRegistered` if the type name is known
    /// - `FieldTypeMismatch` if a field is known from another type with another kind
    /// - mapping errors from the compiler
    pub fn register<T: Model>(&mut self) -> Result<()> {
        let name = T::TYPE_NAME;
        if name.is_empty() {
            return Err(DododError::InvalidDocument(
                "document type name can not be empty".to_string(),
            ));
        }
        if self.types.contains_key(name) {
            return Err(DododError::DocumentTypeAlreadyRegistered(name.to_string()));
        }

        let descriptors = T::fields();
        let fields: BTreeMap<String, FieldKind> = descriptors
            .iter()
            .map(|field| (field.json_name().to_string(), field.kind()))
            .collect();

        for (field, kind) in &fields {
            if let Some((registered, owner)) = self.fields.get(field) {
                if registered != kind {
                    return Err(DododError::FieldTypeMismatch {
                        field: field.clone(),
                        registered: format!("{} (from {})", registered, owner),
                        requested: format!("{} (from {})", kind, name),
                    });
                }
            }
        }

        let mapping = compile_document_mapping(&descriptors)?;

        for (field, kind) in &fields {
            self.fields
                .entry(field.clone())
                .or_insert_with(|| (*kind, name.to_string()));
        }
        self.types.insert(
            name.to_string(),
            DocumentType {
                name: name.to_string(),
                fields,
                mapping,
                factory: factory_for::<T>,
            },
        );
        Ok(())
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    pub fn document_type(&self, type_name: &str) -> Option<&DocumentType> {
        self.types.get(type_name)
    }

    /// Fresh zero value of a registered type.
    ///
    /// # Errors
    ///
    /// Returns `DocumentTypeNotRegistered` for unknown names.
    pub fn instantiate(&self, type_name: &str) -> Result<Box<dyn Document>> {
        self.types
            .get(type_name)
            .map(DocumentType::instantiate)
            .ok_or_else(|| DododError::DocumentTypeNotRegistered(type_name.to_string()))
    }

    /// Every known field name, once.
    pub fn registered_fields(&self) -> Vec<String> {
        let mut names: Vec<String> = self.fields.keys().cloned().collect();
        names.sort();
        names
    }

    /// Type name to a zero-value prototype.
    pub fn registered_types(&self) -> BTreeMap<String, Box<dyn Document>> {
        self.types
            .iter()
            .map(|(name, doc_type)| (name.clone(), doc_type.instantiate()))
            .collect()
    }

    /// Assemble the index mapping of every registered type.
    pub fn index_mapping(&self) -> IndexMapping {
        let mut mapping = IndexMapping::default();
        for (name, doc_type) in &self.types {
            mapping.add_document_mapping(name.clone(), doc_type.mapping.clone());
        }
        mapping
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentSchema, FieldDescriptor};
    use serde::{Deserialize, Serialize};

    macro_rules! model {
        ($ty:ident, $name:literal, $($field:literal => $kind:expr),*) => {
            #[derive(Debug, Default, Serialize, Deserialize)]
            struct $ty {
                id: String,
            }

            impl DocumentSchema for $ty {
                const TYPE_NAME: &'static str = $name;

                fn fields() -> Vec<FieldDescriptor> {
                    vec![
                        FieldDescriptor::new("id", FieldKind::String),
                        $(FieldDescriptor::new($field, $kind)),*
                    ]
                }
            }

            impl Model for $ty {
                fn id(&self) -> &str {
                    &self.id
                }
            }
        };
    }

    model!(First, "First", "mixed_type" => FieldKind::String, "count" => FieldKind::I64);
    model!(Second, "Second", "mixed_type" => FieldKind::String, "flag" => FieldKind::Bool);
    model!(Clashing, "Clashing", "count" => FieldKind::String);
    model!(Headline, "Headline", "title" => FieldKind::String);

    #[test]
    fn test_register_and_union_fields() {
        let mut registry = SchemaRegistry::new();
        registry.register::<First>().unwrap();
        registry.register::<Second>().unwrap();

        assert_eq!(
            registry.registered_fields(),
            vec!["count", "flag", "id", "mixed_type"]
        );
        assert_eq!(registry.registered_types().len(), 2);
        assert!(registry.is_registered("Second"));
    }

    #[test]
    fn test_duplicate_type_rejected() {
        let mut registry = SchemaRegistry::new();
        registry.register::<First>().unwrap();

        let result = registry.register::<First>();
        assert!(matches!(
            result,
            Err(DododError::DocumentTypeAlreadyRegistered(name)) if name == "First"
        ));
    }

    #[test]
    fn test_field_kind_mismatch_rejected() {
        let mut registry = SchemaRegistry::new();
        registry.register::<First>().unwrap();

        let result = registry.register::<Clashing>();
        assert!(matches!(
            result,
            Err(DododError::FieldTypeMismatch { field, .. }) if field == "count"
        ));
        // Failed registration leaves no trace.
        assert!(!registry.is_registered("Clashing"));
        assert_eq!(registry.registered_fields(), vec!["count", "id", "mixed_type"]);
    }

    #[test]
    fn test_instantiate_unknown_type() {
        let registry = SchemaRegistry::new();
        assert!(matches!(
            registry.instantiate("Missing"),
            Err(DododError::DocumentTypeNotRegistered(_))
        ));
    }

    #[test]
    fn test_index_mapping_per_type() {
        let mut registry = SchemaRegistry::new();
        registry.register::<First>().unwrap();
        registry.register::<Headline>().unwrap();

        let mapping = registry.index_mapping();
        assert!(mapping.types.contains_key("First"));
        assert!(mapping.types.contains_key("Headline"));
        assert!(mapping.mapping_for("First").property("count").is_some());
    }
}
