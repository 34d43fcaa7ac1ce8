//! Binary document envelope.
//!
//! Wire format, all lengths big-endian `u32`:
//!
//! ```text
//! [type_name_length][type_name (UTF-8)][payload_length][payload (JSON object)]
//! ```
//!
//! Buffers that violate the framing are rejected as a whole; nothing is
//! decoded from a partially valid envelope.

use crate::document::Document;
use crate::error::{DododError, Result};
use crate::registry::SchemaRegistry;

const LENGTH_PREFIX: usize = 4;
const HEADER_LENGTH: usize = LENGTH_PREFIX * 2;

/// Borrowed view of a framed envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope<'a> {
    pub type_name: &'a str,
    pub payload: &'a [u8],
}

impl<'a> Envelope<'a> {
    /// Validate the framing of `bytes` and borrow its parts.
    ///
    /// # Errors
    ///
    /// Returns `InvalidData` if the buffer is shorter than 8 bytes, shorter
    /// than `8 + type_name_length`, carries a non-UTF-8 type name, or its
    /// payload length disagrees with the remaining bytes.
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < HEADER_LENGTH {
            return Err(DododError::InvalidData(format!(
                "envelope is {} bytes, shorter than its {} byte header",
                bytes.len(),
                HEADER_LENGTH
            )));
        }

        let type_len = read_length(&bytes[..LENGTH_PREFIX])?;
        let type_end = LENGTH_PREFIX
            .checked_add(type_len)
            .ok_or_else(|| DododError::InvalidData("type name length overflows".to_string()))?;
        if type_end + LENGTH_PREFIX > bytes.len() {
            return Err(DododError::InvalidData(format!(
                "type name length {} exceeds envelope of {} bytes",
                type_len,
                bytes.len()
            )));
        }

        let type_name = std::str::from_utf8(&bytes[LENGTH_PREFIX..type_end])
            .map_err(|_| DododError::InvalidData("type name is not UTF-8".to_string()))?;

        let payload_start = type_end + LENGTH_PREFIX;
        let payload_len = read_length(&bytes[type_end..payload_start])?;
        if bytes.len() - payload_start != payload_len {
            return Err(DododError::InvalidData(format!(
                "payload length {} does not match the {} remaining bytes",
                payload_len,
                bytes.len() - payload_start
            )));
        }

        Ok(Self {
            type_name,
            payload: &bytes[payload_start..],
        })
    }
}

fn read_length(prefix: &[u8]) -> Result<usize> {
    let prefix: [u8; LENGTH_PREFIX] = prefix
        .try_into()
        .map_err(|_| DododError::InvalidData("truncated length prefix".to_string()))?;
    usize::try_from(u32::from_be_bytes(prefix))
        .map_err(|_| DododError::InvalidData("length prefix does not fit".to_string()))
}

fn write_length(out: &mut Vec<u8>, len: usize, what: &str) -> Result<()> {
    let len = u32::try_from(len)
        .map_err(|_| DododError::InvalidDocument(format!("{} is too large to frame", what)))?;
    out.extend_from_slice(&len.to_be_bytes());
    Ok(())
}

/// Frame a document as an envelope.
///
/// # Errors
///
/// Returns `InvalidDocument` if the document has no type name or does not
/// serialize to a JSON object.
pub fn encode(document: &dyn Document) -> Result<Vec<u8>> {
    let type_name = document.document_type();
    if type_name.is_empty() {
        return Err(DododError::InvalidDocument(
            "document has no type name".to_string(),
        ));
    }

    let value = document
        .to_value()
        .map_err(|e| DododError::InvalidDocument(e.to_string()))?;
    if !value.is_object() {
        return Err(DododError::InvalidDocument(format!(
            "document '{}' does not serialize to an object",
            document.document_id()
        )));
    }
    let payload = serde_json::to_vec(&value)?;

    let mut out = Vec::with_capacity(HEADER_LENGTH + type_name.len() + payload.len());
    write_length(&mut out, type_name.len(), "type name")?;
    out.extend_from_slice(type_name.as_bytes());
    write_length(&mut out, payload.len(), "payload")?;
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Decode an envelope into a fresh instance of its registered type.
///
/// # Errors
///
/// Returns `InvalidData` for framing violations and
/// `DocumentTypeNotRegistered` when the embedded type name is unknown.
pub fn decode(bytes: &[u8], registry: &SchemaRegistry) -> Result<Box<dyn Document>> {
    let envelope = Envelope::parse(bytes)?;
    let mut document = registry.instantiate(envelope.type_name)?;
    document.load_payload(envelope.payload)?;
    Ok(document)
}

/// Decode an envelope into a caller-supplied value, skipping the registry.
///
/// The embedded type name is not compared with the target's type.
pub fn decode_into(bytes: &[u8], target: &mut dyn Document) -> Result<()> {
    let envelope = Envelope::parse(bytes)?;
    target.load_payload(envelope.payload)
}
