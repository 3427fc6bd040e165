//! File chunking for resumable uploads.
//!
//! Splitting is pure and deterministic: the same files always produce the
//! same chunk boundaries. That is what lets a task reloaded from the store
//! resume from its acknowledged set alone.
//!
//! Chunks never span files. Each file is cut at multiples of the chunk size
//! and chunk indices run across the whole upload in file order.

use sync_types::{Chunk, FileDescriptor, FileUploadPayload};
use thiserror::Error;

/// Default chunk size (1 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Errors from chunking and checkpoint bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkError {
    /// Chunk size must be positive.
    #[error("chunk size must be greater than zero")]
    ZeroChunkSize,

    /// Nothing to upload.
    #[error("upload contains no files")]
    NoFiles,

    /// Two files share a name.
    #[error("duplicate file name: {0}")]
    DuplicateFile(String),

    /// Chunk index outside the task's chunk list.
    #[error("chunk index {index} out of range (upload has {total} chunks)")]
    IndexOutOfRange {
        /// The offending index.
        index: u32,
        /// Number of chunks in the upload.
        total: usize,
    },

    /// More chunks than an index can address.
    #[error("upload needs more than u32::MAX chunks")]
    TooManyChunks,
}

/// A file to upload, with its full content.
#[derive(Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// File name, unique within one upload.
    pub name: String,
    /// Last modification time (unix millis).
    pub modified_at: u64,
    /// File content.
    pub content: Vec<u8>,
}

impl SourceFile {
    /// Create a source file.
    pub fn new(name: &str, modified_at: u64, content: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            modified_at,
            content,
        }
    }

    /// Descriptor for the finalize call.
    pub fn descriptor(&self) -> FileDescriptor {
        FileDescriptor::describe(&self.name, self.modified_at, &self.content)
    }
}

impl std::fmt::Debug for SourceFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceFile")
            .field("name", &self.name)
            .field("modified_at", &self.modified_at)
            .field("content", &format!("[{} bytes]", self.content.len()))
            .finish()
    }
}

/// Splits files into fixed-size chunks.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
}

impl Chunker {
    /// Create a chunker with the given chunk size in bytes.
    pub fn new(chunk_size: usize) -> Result<Self, ChunkError> {
        if chunk_size == 0 {
            return Err(ChunkError::ZeroChunkSize);
        }
        Ok(Self { chunk_size })
    }

    /// The configured chunk size.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Split files into an ordered chunk list.
    pub fn split(&self, files: &[SourceFile]) -> Result<Vec<Chunk>, ChunkError> {
        if files.is_empty() {
            return Err(ChunkError::NoFiles);
        }

        let mut seen = std::collections::HashSet::new();
        let mut chunks = Vec::new();

        for file in files {
            if !seen.insert(file.name.as_str()) {
                return Err(ChunkError::DuplicateFile(file.name.clone()));
            }

            for (n, piece) in file.content.chunks(self.chunk_size).enumerate() {
                let index = u32::try_from(chunks.len()).map_err(|_| ChunkError::TooManyChunks)?;
                chunks.push(Chunk {
                    index,
                    source_file: file.name.clone(),
                    offset: (n * self.chunk_size) as u64,
                    size: piece.len() as u64,
                    data: piece.to_vec(),
                });
            }
        }

        Ok(chunks)
    }

    /// Build a complete upload payload (descriptors plus chunks).
    pub fn prepare(&self, files: &[SourceFile]) -> Result<FileUploadPayload, ChunkError> {
        let chunks = self.split(files)?;
        let descriptors = files.iter().map(SourceFile::descriptor).collect();
        Ok(FileUploadPayload::new(descriptors, chunks))
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Chunks not yet acknowledged, in index order.
pub fn pending_chunks(payload: &FileUploadPayload) -> impl Iterator<Item = &Chunk> + '_ {
    payload
        .chunks
        .iter()
        .filter(move |c| !payload.acknowledged.contains(&c.index))
}

/// Index of the first chunk that still needs uploading.
pub fn resume_point(payload: &FileUploadPayload) -> Option<u32> {
    pending_chunks(payload).next().map(|c| c.index)
}

/// Record a transport acknowledgement for one chunk.
///
/// Returns `Ok(true)` if the index was newly added, `Ok(false)` if it was
/// already acknowledged. The set never shrinks.
pub fn acknowledge(payload: &mut FileUploadPayload, index: u32) -> Result<bool, ChunkError> {
    if index as usize >= payload.chunks.len() {
        return Err(ChunkError::IndexOutOfRange {
            index,
            total: payload.chunks.len(),
        });
    }
    Ok(payload.acknowledged.insert(index))
}
