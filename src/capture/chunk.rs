use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// A periodically emitted slice of the in-progress recording
#[derive(Debug, Clone)]
pub struct MediaChunk {
    /// Chunk number (0-indexed, in emission order)
    pub index: u64,
    /// Opaque encoded media bytes
    pub data: Vec<u8>,
    /// Milliseconds since the stream started
    pub timestamp_ms: u64,
}

impl MediaChunk {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Ordered, append-only chunk sequence
#[derive(Debug, Default)]
pub struct ChunkBuffer {
    chunks: Vec<MediaChunk>,
    total_bytes: u64,
}

impl ChunkBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: MediaChunk) {
        self.total_bytes += chunk.len() as u64;
        self.chunks.push(chunk);
    }

    /// Number of chunks received
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Sum of all chunk lengths
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn chunks(&self) -> &[MediaChunk] {
        &self.chunks
    }

    /// Concatenate all chunks in arrival order
    pub fn concat(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(self.total_bytes as usize);
        for chunk in &self.chunks {
            buffer.extend_from_slice(&chunk.data);
        }
        buffer
    }
}

/// Drains a stream's chunk receiver into a shared buffer.
///
/// The task ends when the backend closes the channel, which it does after
/// its tracks are stopped and the final slice is flushed.
pub struct ChunkRecorder;

impl ChunkRecorder {
    pub fn spawn(
        mut chunk_rx: mpsc::Receiver<MediaChunk>,
        buffer: Arc<Mutex<ChunkBuffer>>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Chunk recorder started");

            while let Some(chunk) = chunk_rx.recv().await {
                debug!(
                    "Chunk {} received: {} bytes at {:.1}s",
                    chunk.index,
                    chunk.len(),
                    chunk.timestamp_ms as f64 / 1000.0
                );
                buffer.lock().push(chunk);
            }

            let buffer = buffer.lock();
            info!(
                "Chunk recorder finished: {} chunks, {} bytes",
                buffer.len(),
                buffer.total_bytes()
            );
        })
    }
}
