//! Host memory interface handed to library instances

use bytes::BytesMut;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Host memory provider for a library instance
///
/// An allocator is passed at instance creation and lives exactly as long as
/// the instance. Blocks are zero-filled and must be returned through `free`
/// with the length they were last sized to.
pub trait InstanceAllocator: Send + Sync + std::fmt::Debug {
    /// Allocates a zero-filled block of `size` bytes
    fn allocate(&self, size: usize) -> BytesMut;

    /// Resizes `block` to `size` bytes, preserving its prefix
    fn reallocate(&self, block: BytesMut, size: usize) -> BytesMut;

    /// Returns `block` to the allocator
    fn free(&self, block: BytesMut);
}

/// Heap-backed allocator that tracks outstanding bytes
#[derive(Debug, Default)]
pub struct SystemAllocator {
    outstanding: AtomicUsize,
}

impl SystemAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes handed out and not yet freed
    pub fn outstanding_bytes(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }
}

impl InstanceAllocator for SystemAllocator {
    fn allocate(&self, size: usize) -> BytesMut {
        self.outstanding.fetch_add(size, Ordering::AcqRel);
        BytesMut::zeroed(size)
    }

    fn reallocate(&self, mut block: BytesMut, size: usize) -> BytesMut {
        let previous = block.len();
        if size >= previous {
            self.outstanding.fetch_add(size - previous, Ordering::AcqRel);
        } else {
            self.outstanding.fetch_sub(previous - size, Ordering::AcqRel);
        }
        block.resize(size, 0);
        block
    }

    fn free(&self, block: BytesMut) {
        self.outstanding.fetch_sub(block.len(), Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outstanding_bytes_follow_block_lifetime() {
        let allocator = SystemAllocator::new();

        let block = allocator.allocate(64);
        assert_eq!(block.len(), 64);
        assert!(block.iter().all(|byte| *byte == 0));
        assert_eq!(allocator.outstanding_bytes(), 64);

        let mut block = allocator.reallocate(block, 256);
        block[0] = 7;
        assert_eq!(allocator.outstanding_bytes(), 256);

        let block = allocator.reallocate(block, 16);
        assert_eq!(block[0], 7);
        assert_eq!(allocator.outstanding_bytes(), 16);

        allocator.free(block);
        assert_eq!(allocator.outstanding_bytes(), 0);
    }
}
