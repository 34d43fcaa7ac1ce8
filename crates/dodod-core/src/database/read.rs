//! Reads that resolve ids against the record store only.

use crate::document::Document;
use crate::envelope;
use crate::error::{DododError, Result};

use super::Database;

impl Database {
    /// Decode the documents stored under `ids`.
    ///
    /// Empty and unknown ids are skipped. Returns the number of documents
    /// found alongside them.
    pub fn read(&self, ids: &[&str]) -> Result<(u64, Vec<Box<dyn Document>>)> {
        let engines = self.engines()?;
        let wanted: Vec<&str> = ids.iter().copied().filter(|id| !id.is_empty()).collect();

        let mut documents = Vec::with_capacity(wanted.len());
        for bytes in engines.records.get_many(&wanted)?.into_iter().flatten() {
            documents.push(envelope::decode(&bytes, &self.registry)?);
        }
        Ok((documents.len() as u64, documents))
    }

    /// Fill each target from the record stored under its own id.
    ///
    /// Targets with an empty or unknown id are left untouched. Returns the
    /// number of targets filled.
    pub fn get_document(&self, targets: &mut [&mut dyn Document]) -> Result<u64> {
        let engines = self.engines()?;
        let ids: Vec<String> = targets
            .iter()
            .map(|target| target.document_id().to_string())
            .collect();
        let lookup: Vec<&str> = ids.iter().map(String::as_str).collect();
        let found = engines.records.get_many(&lookup)?;

        let mut count = 0;
        for ((target, id), bytes) in targets.iter_mut().zip(&ids).zip(found) {
            if id.is_empty() {
                continue;
            }
            if let Some(bytes) = bytes {
                envelope::decode_into(&bytes, &mut **target)?;
                count += 1;
            }
        }
        Ok(count)
    }

    /// Like [`read`](Self::read), but with one slot per requested id.
    ///
    /// A missing id carries `NotFound`, an empty id `IdCanNotBeEmpty` and an
    /// undecodable record its decode error. The count covers the slots that
    /// hold a document.
    pub fn get_document_with_error(
        &self,
        ids: &[&str],
    ) -> Result<(u64, Vec<Result<Box<dyn Document>>>)> {
        let engines = self.engines()?;
        let found = engines.records.get_many(ids)?;

        let slots: Vec<Result<Box<dyn Document>>> = ids
            .iter()
            .zip(found)
            .map(|(id, bytes)| {
                if id.is_empty() {
                    return Err(DododError::IdCanNotBeEmpty);
                }
                match bytes {
                    Some(bytes) => envelope::decode(&bytes, &self.registry),
                    None => Err(DododError::NotFound((*id).to_string())),
                }
            })
            .collect();
        let count = slots.iter().filter(|slot| slot.is_ok()).count() as u64;
        Ok((count, slots))
    }
}
