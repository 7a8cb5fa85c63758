use std::sync::Arc;

/// Sealed result of a stopped capture session.
///
/// Immutable once produced; clones share the same buffer.
#[derive(Debug, Clone)]
pub struct CapturedMedia {
    buffer: Arc<[u8]>,
    mime_type: String,
    duration_ms: u64,
    chunk_count: usize,
}

impl CapturedMedia {
    pub fn new(buffer: Vec<u8>, mime_type: impl Into<String>, duration_ms: u64, chunk_count: usize) -> Self {
        Self {
            buffer: buffer.into(),
            mime_type: mime_type.into(),
            duration_ms,
            chunk_count,
        }
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn shared_buffer(&self) -> Arc<[u8]> {
        Arc::clone(&self.buffer)
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn size_bytes(&self) -> u64 {
        self.buffer.len() as u64
    }

    /// Active recording time, net of pauses
    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }
}
