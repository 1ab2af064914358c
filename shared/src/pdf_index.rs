use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const PDF_DATA_URL_PREFIX: &str = "data:application/pdf;base64,";

/// A generated PDF kept in local storage. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdfRecord {
    pub id: i64,
    pub name: String,
    /// UTC creation day, `YYYY-MM-DD`.
    pub date: String,
    #[serde(rename = "dataUrl", alias = "content")]
    pub content: String,
}

impl PdfRecord {
    pub fn download_filename(&self) -> String {
        format!("{}.pdf", self.name)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IndexError {
    #[error("PDF name cannot be empty")]
    EmptyName,

    #[error("PDF content must be a PDF data URL")]
    InvalidContent,

    #[error("could not encode PDF index: {0}")]
    Encode(String),
}

/// Progress of reading the stored copy of the index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoadState {
    #[default]
    Unloaded,
    Loading,
    Loaded,
}

/// A full-list write handed to storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexWrite {
    /// Records stored for the first time by this write.
    pub record_ids: Vec<i64>,
    pub bytes: Vec<u8>,
}

/// Append-only, insertion-ordered collection of saved PDFs.
///
/// The stored copy is only ever replaced once it has been read, and at most
/// one write is outstanding at a time.
#[derive(Debug, Default)]
pub struct PdfIndex {
    records: Vec<PdfRecord>,
    last_id: i64,
    load: LoadState,
    unsaved: Vec<i64>,
    writing: Option<Vec<i64>>,
}

impl PdfIndex {
    pub fn list(&self) -> &[PdfRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_hydrated(&self) -> bool {
        self.load == LoadState::Loaded
    }

    pub fn load_state(&self) -> LoadState {
        self.load
    }

    /// Records not yet confirmed by storage.
    pub fn unsaved(&self) -> &[i64] {
        &self.unsaved
    }

    pub fn is_writing(&self) -> bool {
        self.writing.is_some()
    }

    pub fn append(
        &mut self,
        name: &str,
        content: String,
        now: DateTime<Utc>,
    ) -> Result<PdfRecord, IndexError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(IndexError::EmptyName);
        }
        if !content.starts_with(PDF_DATA_URL_PREFIX) {
            return Err(IndexError::InvalidContent);
        }

        // Ids double as creation timestamps but must stay strictly increasing
        // even when the clock stalls or goes backwards.
        let id = now.timestamp_millis().max(self.last_id.saturating_add(1));
        let record = PdfRecord {
            id,
            name: name.to_string(),
            date: now.format("%Y-%m-%d").to_string(),
            content,
        };

        self.last_id = id;
        self.records.push(record.clone());
        self.unsaved.push(id);
        Ok(record)
    }

    /// Marks a read of the stored copy as started. Returns `false` when one is
    /// already outstanding or the index is loaded.
    pub fn begin_read(&mut self) -> bool {
        if self.load != LoadState::Unloaded {
            return false;
        }
        self.load = LoadState::Loading;
        true
    }

    /// The stored copy could not be read. Writes stay blocked until a later
    /// read succeeds. Returns `false` if no read was outstanding.
    pub fn read_failed(&mut self) -> bool {
        if self.load != LoadState::Loading {
            return false;
        }
        self.load = LoadState::Unloaded;
        true
    }

    /// Loads the persisted collection. Records appended before this call are
    /// kept after the stored ones and stay unsaved. Returns `false` when the
    /// index was already loaded and nothing changed.
    pub fn hydrate(&mut self, stored: Option<&[u8]>) -> bool {
        if self.is_hydrated() {
            tracing::debug!("PDF index already hydrated");
            return false;
        }

        let stored = match stored {
            None => Vec::new(),
            Some(bytes) if bytes.is_empty() => Vec::new(),
            Some(bytes) => match serde_json::from_slice::<Vec<PdfRecord>>(bytes) {
                Ok(records) => records,
                Err(e) => {
                    tracing::warn!(error = %e, "stored PDF index is corrupt, starting empty");
                    Vec::new()
                }
            },
        };

        let mut records = stored;
        let mut last_id = records.iter().map(|r| r.id).max().unwrap_or(0);
        let mut unsaved = Vec::new();

        for mut record in std::mem::take(&mut self.records) {
            if record.id <= last_id {
                record.id = last_id + 1;
            }
            last_id = record.id;
            unsaved.push(record.id);
            records.push(record);
        }

        self.last_id = last_id.max(self.last_id);
        self.records = records;
        self.unsaved = unsaved;
        self.load = LoadState::Loaded;
        true
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, IndexError> {
        serde_json::to_vec(&self.records).map_err(|e| IndexError::Encode(e.to_string()))
    }

    /// Starts writing the full list if there is anything unsaved, the stored
    /// copy has been read and no other write is outstanding.
    ///
    /// When encoding fails the unsaved records are rolled back.
    pub fn begin_write(&mut self) -> Result<Option<IndexWrite>, IndexError> {
        if !self.is_hydrated() || self.writing.is_some() || self.unsaved.is_empty() {
            return Ok(None);
        }

        let bytes = match self.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                for id in std::mem::take(&mut self.unsaved) {
                    self.rollback(id);
                }
                return Err(e);
            }
        };

        let record_ids = self.unsaved.clone();
        self.writing = Some(record_ids.clone());
        Ok(Some(IndexWrite { record_ids, bytes }))
    }

    /// Confirms the outstanding write. Returns the records it stored.
    pub fn write_succeeded(&mut self) -> Vec<i64> {
        let stored = self.writing.take().unwrap_or_default();
        self.unsaved.retain(|id| !stored.contains(id));
        stored
    }

    /// Drops the records of the outstanding write, so the list matches
    /// storage again. Returns the ids removed.
    pub fn write_failed(&mut self) -> Vec<i64> {
        let failed = self.writing.take().unwrap_or_default();
        for id in &failed {
            self.rollback(*id);
        }
        failed
    }

    /// Drops a record whose write to storage failed. Returns whether it was present.
    pub fn rollback(&mut self, id: i64) -> bool {
        let before = self.records.len();
        self.records.retain(|r| r.id != id);
        self.unsaved.retain(|u| *u != id);
        before != self.records.len()
    }
}
