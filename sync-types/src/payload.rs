//! Kind-specific task payloads.
//!
//! A task's payload is a closed sum type: every consumer matches on
//! [`TaskPayload`] and the compiler enforces that each kind is handled.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use crate::task::TaskKind;
use crate::TypesError;

/// Metadata for one file in an upload, sent with the finalize call so the
/// receiving end can verify what it assembled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// File name (unique within one upload task).
    pub name: String,
    /// Total size in bytes.
    pub size: u64,
    /// Last modification time (unix millis).
    pub modified_at: u64,
    /// BLAKE3 digest of the full content, hex encoded.
    pub checksum: String,
}

impl FileDescriptor {
    /// Describe a file from its full content.
    pub fn describe(name: &str, modified_at: u64, content: &[u8]) -> Self {
        Self {
            name: name.to_string(),
            size: content.len() as u64,
            modified_at,
            checksum: hex::encode(blake3::hash(content).as_bytes()),
        }
    }
}

/// A fixed-size slice of one file, independently uploadable.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Position of this chunk in the task's chunk list.
    pub index: u32,
    /// Name of the file this chunk was cut from.
    pub source_file: String,
    /// Byte offset within the source file.
    pub offset: u64,
    /// Number of bytes in `data`.
    pub size: u64,
    /// Chunk content.
    pub data: Vec<u8>,
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("index", &self.index)
            .field("source_file", &self.source_file)
            .field("offset", &self.offset)
            .field("size", &self.size)
            .field("data", &format!("[{} bytes]", self.data.len()))
            .finish()
    }
}

/// Payload of a resumable file upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileUploadPayload {
    /// Descriptors of every file in the upload.
    pub files: Vec<FileDescriptor>,
    /// Ordered chunk list; `chunks[i].index == i`.
    pub chunks: Vec<Chunk>,
    /// Indices confirmed by the transport. Only ever grows.
    pub acknowledged: BTreeSet<u32>,
}

impl FileUploadPayload {
    /// Build a payload with nothing acknowledged yet.
    pub fn new(files: Vec<FileDescriptor>, chunks: Vec<Chunk>) -> Self {
        Self {
            files,
            chunks,
            acknowledged: BTreeSet::new(),
        }
    }

    /// Number of chunks in the upload.
    pub fn total_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// Number of acknowledged chunks.
    pub fn acknowledged_count(&self) -> usize {
        self.acknowledged.len()
    }

    /// True once every chunk has been acknowledged.
    pub fn is_complete(&self) -> bool {
        self.acknowledged.len() == self.chunks.len()
    }

    /// Completion percentage (0..=100). An upload with no chunks is 100%.
    pub fn percent(&self) -> u8 {
        if self.chunks.is_empty() {
            return 100;
        }
        ((self.acknowledged.len() * 100) / self.chunks.len()) as u8
    }

    fn validate(&self) -> Result<(), TypesError> {
        if self.files.is_empty() {
            return Err(TypesError::InvalidPayload(
                "upload must contain at least one file".into(),
            ));
        }

        let mut names = HashSet::new();
        for file in &self.files {
            if !names.insert(file.name.as_str()) {
                return Err(TypesError::InvalidPayload(format!(
                    "duplicate file name: {}",
                    file.name
                )));
            }
        }

        for (position, chunk) in self.chunks.iter().enumerate() {
            if chunk.index as usize != position {
                return Err(TypesError::InvalidPayload(format!(
                    "chunk at position {} has index {}",
                    position, chunk.index
                )));
            }
            if !names.contains(chunk.source_file.as_str()) {
                return Err(TypesError::InvalidPayload(format!(
                    "chunk {} references unknown file {}",
                    chunk.index, chunk.source_file
                )));
            }
            if chunk.size != chunk.data.len() as u64 {
                return Err(TypesError::InvalidPayload(format!(
                    "chunk {} declares {} bytes but carries {}",
                    chunk.index,
                    chunk.size,
                    chunk.data.len()
                )));
            }
        }

        if let Some(&highest) = self.acknowledged.iter().next_back() {
            if highest as usize >= self.chunks.len() {
                return Err(TypesError::InvalidPayload(format!(
                    "acknowledged index {} out of range (0..{})",
                    highest,
                    self.chunks.len()
                )));
            }
        }

        Ok(())
    }
}

/// A single field of a record body, stamped with its last write time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    /// Field value (opaque JSON).
    pub value: serde_json::Value,
    /// When this field was last written (unix millis).
    pub updated_at: u64,
}

impl FieldValue {
    /// Create a field value.
    pub fn new(value: serde_json::Value, updated_at: u64) -> Self {
        Self { value, updated_at }
    }
}

/// Record body: field name to timestamped value.
pub type RecordBody = BTreeMap<String, FieldValue>;

/// A locally modified analysis record waiting to be pushed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRecordPayload {
    /// Identifier of the record in the remote document store.
    pub record_id: String,
    /// Last version this client knows the server assigned.
    pub local_version: u64,
    /// Record fields.
    pub body: RecordBody,
    /// When the client produced this payload (unix millis).
    pub client_timestamp: u64,
}

/// The remote copy of a record as returned by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// Identifier of the record.
    pub record_id: String,
    /// Server-assigned version.
    pub version: u64,
    /// Record fields.
    pub body: RecordBody,
    /// When the server last modified the record (unix millis).
    pub updated_at: u64,
}

/// User preferences pushed with overwrite-by-latest-device semantics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferencesPayload {
    /// Device that produced these preferences.
    pub device_id: String,
    /// Preference values.
    pub values: BTreeMap<String, serde_json::Value>,
    /// When the preferences were captured (unix millis).
    pub updated_at: u64,
}

/// Result of merging a local record against a newer remote version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Version the local edit was based on.
    pub local_version: u64,
    /// Version found on the server.
    pub remote_version: u64,
    /// Merged body to push.
    pub merged_body: RecordBody,
    /// Fields present on both sides with different values.
    pub detected_fields: BTreeSet<String>,
}

/// Kind-specific data carried by a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskPayload {
    /// Resumable, chunked file upload.
    FileUpload(FileUploadPayload),
    /// Analysis record with conflict detection.
    DataRecord(DataRecordPayload),
    /// User preferences.
    Preferences(PreferencesPayload),
}

impl TaskPayload {
    /// The kind tag of this payload.
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::FileUpload(_) => TaskKind::FileUpload,
            Self::DataRecord(_) => TaskKind::DataRecord,
            Self::Preferences(_) => TaskKind::Preferences,
        }
    }

    /// Check structural invariants before a payload is accepted.
    pub fn validate(&self) -> Result<(), TypesError> {
        match self {
            Self::FileUpload(upload) => upload.validate(),
            Self::DataRecord(record) => {
                if record.record_id.trim().is_empty() {
                    return Err(TypesError::InvalidPayload("record id is empty".into()));
                }
                // Dot segments cannot address a record in a URL path.
                if matches!(record.record_id.as_str(), "." | "..") {
                    return Err(TypesError::InvalidPayload(format!(
                        "record id {:?} is reserved",
                        record.record_id
                    )));
                }
                Ok(())
            }
            Self::Preferences(prefs) => {
                if prefs.device_id.trim().is_empty() {
                    return Err(TypesError::InvalidPayload("device id is empty".into()));
                }
                Ok(())
            }
        }
    }
}
