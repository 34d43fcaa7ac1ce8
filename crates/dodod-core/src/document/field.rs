//! Static field descriptors declared by document types.

use std::fmt;

use super::DocumentSchema;

/// Kind of a declared field.
///
/// Two registered types may share a field name only when their kinds are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    String,
    /// A point in time, serialized as an RFC 3339 string.
    Timestamp,
    /// A nested document type, mapped recursively.
    Nested(&'static str),
    /// An opaque struct that is not itself a document type.
    Struct(&'static str),
    Sequence,
    Map,
    Bytes,
}

impl FieldKind {
    /// Integer and floating-point kinds.
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            FieldKind::I8
                | FieldKind::I16
                | FieldKind::I32
                | FieldKind::I64
                | FieldKind::U8
                | FieldKind::U16
                | FieldKind::U32
                | FieldKind::U64
                | FieldKind::F32
                | FieldKind::F64
        )
    }

    /// Kinds the index mapping compiler does not index.
    pub fn is_collection(self) -> bool {
        matches!(self, FieldKind::Sequence | FieldKind::Map | FieldKind::Bytes)
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Bool => write!(f, "bool"),
            FieldKind::I8 => write!(f, "i8"),
            FieldKind::I16 => write!(f, "i16"),
            FieldKind::I32 => write!(f, "i32"),
            FieldKind::I64 => write!(f, "i64"),
            FieldKind::U8 => write!(f, "u8"),
            FieldKind::U16 => write!(f, "u16"),
            FieldKind::U32 => write!(f, "u32"),
            FieldKind::U64 => write!(f, "u64"),
            FieldKind::F32 => write!(f, "f32"),
            FieldKind::F64 => write!(f, "f64"),
            FieldKind::String => write!(f, "string"),
            FieldKind::Timestamp => write!(f, "timestamp"),
            FieldKind::Nested(name) => write!(f, "nested<{}>", name),
            FieldKind::Struct(name) => write!(f, "struct<{}>", name),
            FieldKind::Sequence => write!(f, "sequence"),
            FieldKind::Map => write!(f, "map"),
            FieldKind::Bytes => write!(f, "bytes"),
        }
    }
}

/// Schema of a nested document type, captured without instantiating it.
#[derive(Clone, Copy)]
pub struct NestedSchema {
    pub type_name: &'static str,
    pub fields: fn() -> Vec<FieldDescriptor>,
}

impl fmt::Debug for NestedSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NestedSchema")
            .field("type_name", &self.type_name)
            .finish()
    }
}

/// One declared field of a document type.
///
/// ```
/// use dodod_core::document::{FieldDescriptor, FieldKind};
///
/// let field = FieldDescriptor::new("Location", FieldKind::String)
///     .serde("location")
///     .option("geo_hash", "true");
/// assert_eq!(field.json_name(), "location");
/// ```
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    name: &'static str,
    serde_name: Option<&'static str>,
    index_name: Option<&'static str>,
    kind: FieldKind,
    nested: Option<NestedSchema>,
    options: Vec<(String, String)>,
    disabled: bool,
}

impl FieldDescriptor {
    pub fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            serde_name: None,
            index_name: None,
            kind,
            nested: None,
            options: Vec::new(),
            disabled: false,
        }
    }

    /// A field holding another document type, mapped as a sub-document.
    pub fn nested<T: DocumentSchema>(name: &'static str) -> Self {
        let mut field = Self::new(name, FieldKind::Nested(T::TYPE_NAME));
        field.nested = Some(NestedSchema {
            type_name: T::TYPE_NAME,
            fields: T::fields,
        });
        field
    }

    /// Serialized (JSON) name, when it differs from the field identifier.
    pub fn serde(mut self, name: &'static str) -> Self {
        self.serde_name = Some(name);
        self
    }

    /// Name the field is indexed under, overriding the serialized name.
    pub fn index_as(mut self, name: &'static str) -> Self {
        self.index_name = Some(name);
        self
    }

    /// Mapping override applied onto the compiled field mapping.
    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.push((key.into(), value.into()));
        self
    }

    /// Exclude the field from the index.
    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn nested_schema(&self) -> Option<&NestedSchema> {
        self.nested.as_ref()
    }

    pub fn options(&self) -> &[(String, String)] {
        &self.options
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn index_name(&self) -> Option<&'static str> {
        self.index_name
    }

    /// Key of the field in the serialized payload.
    pub fn json_name(&self) -> &'static str {
        self.serde_name.unwrap_or(self.name)
    }

    /// Name used in the index: override tag, then serialized name, then identifier.
    pub fn mapping_name(&self) -> &'static str {
        self.index_name.unwrap_or_else(|| self.json_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Address;

    impl DocumentSchema for Address {
        const TYPE_NAME: &'static str = "Address";

        fn fields() -> Vec<FieldDescriptor> {
            vec![FieldDescriptor::new("city", FieldKind::String)]
        }
    }

    #[test]
    fn test_name_precedence() {
        let plain = FieldDescriptor::new("Title", FieldKind::String);
        assert_eq!(plain.mapping_name(), "Title");

        let serde = FieldDescriptor::new("Title", FieldKind::String).serde("title");
        assert_eq!(serde.mapping_name(), "title");

        let tagged = FieldDescriptor::new("Title", FieldKind::String)
            .serde("title")
            .index_as("headline");
        assert_eq!(tagged.mapping_name(), "headline");
        assert_eq!(tagged.json_name(), "title");
    }

    #[test]
    fn test_nested_descriptor() {
        let field = FieldDescriptor::nested::<Address>("address");
        assert_eq!(field.kind(), FieldKind::Nested("Address"));
        let nested = field.nested_schema().unwrap();
        assert_eq!((nested.fields)().len(), 1);
    }

    #[test]
    fn test_kind_classification() {
        assert!(FieldKind::U16.is_numeric());
        assert!(FieldKind::F64.is_numeric());
        assert!(!FieldKind::String.is_numeric());
        assert!(FieldKind::Map.is_collection());
        assert_eq!(FieldKind::Nested("Address").to_string(), "nested<Address>");
    }
}
