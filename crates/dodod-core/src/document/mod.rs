//! Document model.
//!
//! Application types describe themselves statically through
//! [`DocumentSchema`] and [`Model`]; the store works with them through the
//! object-safe [`Document`] view, which every `Model` gets for free.
//!
//! ```
//! use dodod_core::document::{DocumentSchema, FieldDescriptor, FieldKind, Model};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Default, Serialize, Deserialize)]
//! struct Note {
//!     id: String,
//!     body: String,
//! }
//!
//! impl DocumentSchema for Note {
//!     const TYPE_NAME: &'static str = "Note";
//!
//!     fn fields() -> Vec<FieldDescriptor> {
//!         vec![
//!             FieldDescriptor::new("id", FieldKind::String),
//!             FieldDescriptor::new("body", FieldKind::String),
//!         ]
//!     }
//! }
//!
//! impl Model for Note {
//!     fn id(&self) -> &str {
//!         &self.id
//!     }
//! }
//! ```

mod field;

use std::any::Any;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{DododError, Result};

pub use field::{FieldDescriptor, FieldKind, NestedSchema};

/// Static schema of a document type, also implemented by nested types.
pub trait DocumentSchema {
    /// Name the type is registered and framed under.
    const TYPE_NAME: &'static str;

    /// Declared fields, in declaration order.
    fn fields() -> Vec<FieldDescriptor>;
}

/// A storable document type.
pub trait Model:
    DocumentSchema + Serialize + DeserializeOwned + Default + Send + Sync + 'static
{
    fn id(&self) -> &str;
}

/// Runtime view of a stored document.
pub trait Document: Send + Sync + 'static {
    /// Identifier the document is stored under.
    fn document_id(&self) -> &str;

    /// Registered type name.
    fn document_type(&self) -> &str;

    /// Serialize the document fields.
    fn to_value(&self) -> Result<Value>;

    /// Replace the document fields with a serialized payload.
    fn load_payload(&mut self, payload: &[u8]) -> Result<()>;

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T: Model> Document for T {
    fn document_id(&self) -> &str {
        Model::id(self)
    }

    fn document_type(&self) -> &str {
        T::TYPE_NAME
    }

    fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn load_payload(&mut self, payload: &[u8]) -> Result<()> {
        *self = serde_json::from_slice(payload)
            .map_err(|e| DododError::InvalidData(format!("payload does not decode: {}", e)))?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

impl std::fmt::Debug for dyn Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("id", &self.document_id())
            .field("type", &self.document_type())
            .finish()
    }
}

/// Recover the concrete type of a decoded document.
pub fn downcast<T: Model>(document: Box<dyn Document>) -> Option<Box<T>> {
    document.into_any().downcast::<T>().ok()
}

/// Borrow the concrete type of a document.
pub fn downcast_ref<T: Model>(document: &dyn Document) -> Option<&T> {
    document.as_any().downcast_ref::<T>()
}

/// Zero-value factory for a registered type.
pub type DocumentFactory = fn() -> Box<dyn Document>;

pub(crate) fn factory_for<T: Model>() -> Box<dyn Document> {
    Box::new(T::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: String,
        body: String,
    }

    impl DocumentSchema for Note {
        const TYPE_NAME: &'static str = "Note";

        fn fields() -> Vec<FieldDescriptor> {
            vec![
                FieldDescriptor::new("id", FieldKind::String),
                FieldDescriptor::new("body", FieldKind::String),
            ]
        }
    }

    impl Model for Note {
        fn id(&self) -> &str {
            &self.id
        }
    }

    #[test]
    fn test_blanket_document_impl() {
        let note = Note {
            id: "n1".to_string(),
            body: "hello".to_string(),
        };
        let doc: &dyn Document = &note;
        assert_eq!(doc.document_id(), "n1");
        assert_eq!(doc.document_type(), "Note");
        assert_eq!(doc.to_value().unwrap()["body"], "hello");
    }

    #[test]
    fn test_factory_and_downcast() {
        let mut doc = factory_for::<Note>();
        doc.load_payload(br#"{"id":"n2","body":"text"}"#).unwrap();

        let note = downcast::<Note>(doc).unwrap();
        assert_eq!(note.id, "n2");
        assert_eq!(note.body, "text");
    }

    #[test]
    fn test_load_payload_rejects_garbage() {
        let mut doc = factory_for::<Note>();
        let result = doc.load_payload(b"not json");
        assert!(matches!(result, Err(DododError::InvalidData(_))));
    }
}
