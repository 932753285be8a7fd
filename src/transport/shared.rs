//! Zero-copy buffers shared between the UI thread and the worker

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use crate::error::TransportError;

use super::FileActions;

/// A fixed-size byte region aliased by both threads.
///
/// Cloning shares the region. Bytes are accessed through offset-indexed
/// copies only; synchronisation comes from whichever protocol owns the
/// buffer (lock word, generation counter).
#[derive(Clone)]
pub struct SharedBuffer {
    bytes: Arc<[AtomicU8]>,
}

impl SharedBuffer {
    pub fn new(len: usize) -> Self {
        Self {
            bytes: (0..len).map(|_| AtomicU8::new(0)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Copy `data` into the buffer at `offset`
    pub fn write_at(&self, offset: usize, data: &[u8]) -> Result<(), TransportError> {
        let region = self.region(offset, data.len())?;
        for (slot, &byte) in region.iter().zip(data) {
            slot.store(byte, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Copy `out.len()` bytes starting at `offset` into `out`
    pub fn read_at(&self, offset: usize, out: &mut [u8]) -> Result<(), TransportError> {
        let region = self.region(offset, out.len())?;
        for (byte, slot) in out.iter_mut().zip(region) {
            *byte = slot.load(Ordering::Relaxed);
        }
        Ok(())
    }

    /// Whether both handles refer to the same region
    pub fn same_region(&self, other: &SharedBuffer) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes)
    }

    fn region(&self, offset: usize, len: usize) -> Result<&[AtomicU8], TransportError> {
        let end = offset.checked_add(len).unwrap_or(usize::MAX);
        self.bytes
            .get(offset..end)
            .ok_or(TransportError::BufferTooSmall {
                needed: end,
                capacity: self.bytes.len(),
            })
    }
}

impl std::fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedBuffer")
            .field("len", &self.len())
            .finish()
    }
}

/// Single-slot mailbox carrying [`FileActions`] from the UI to the worker.
///
/// The UI publishes only after the worker acknowledged the previous
/// generation, and the worker reads only a generation it has not yet
/// acknowledged, so the payload region is never read and written at once.
pub struct FilesMailbox {
    generation: AtomicU32,
    acked: AtomicU32,
    len: AtomicU32,
    data: SharedBuffer,
}

impl FilesMailbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            generation: AtomicU32::new(0),
            acked: AtomicU32::new(0),
            len: AtomicU32::new(0),
            data: SharedBuffer::new(capacity),
        }
    }

    /// Payload capacity in bytes
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Whether the worker has taken the last published batch
    pub fn is_idle(&self) -> bool {
        self.generation.load(Ordering::Acquire) == self.acked.load(Ordering::Acquire)
    }

    /// Publish a batch. Returns `Ok(false)` if the previous one is still
    /// waiting to be taken.
    pub fn publish(&self, actions: &FileActions) -> Result<bool, TransportError> {
        if !self.is_idle() {
            return Ok(false);
        }

        let payload = serde_json::to_vec(actions)?;
        if payload.len() > self.capacity() || payload.len() > u32::MAX as usize {
            return Err(TransportError::BufferTooSmall {
                needed: payload.len(),
                capacity: self.capacity(),
            });
        }

        self.data.write_at(0, &payload)?;
        self.len.store(payload.len() as u32, Ordering::Relaxed);
        let generation = self.generation.load(Ordering::Relaxed).wrapping_add(1);
        self.generation.store(generation, Ordering::Release);
        Ok(true)
    }

    /// Take the pending batch, if any, and acknowledge it.
    pub fn take(&self) -> Result<Option<FileActions>, TransportError> {
        let generation = self.generation.load(Ordering::Acquire);
        if generation == self.acked.load(Ordering::Relaxed) {
            return Ok(None);
        }

        let len = self.len.load(Ordering::Relaxed) as usize;
        let mut payload = vec![0u8; len];
        self.data.read_at(0, &mut payload)?;
        self.acked.store(generation, Ordering::Release);

        Ok(Some(serde_json::from_slice(&payload)?))
    }
}

impl std::fmt::Debug for FilesMailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilesMailbox")
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .field("acked", &self.acked.load(Ordering::Relaxed))
            .field("capacity", &self.capacity())
            .finish()
    }
}
