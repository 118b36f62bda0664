//! Scoped upload memory for per-dispatch constant blobs
//!
//! Allocations are bump-allocated from backend constant buffers. Memory is
//! never reused within a frame; `begin_frame` rewinds the cursor once the
//! host has submitted the previous frame's command stream.

use crate::backend::Backend;
use crate::error::Result;
use crate::layout::ConstantView;

const DEFAULT_PAGE_SIZE: u64 = 64 * 1024;
const CONSTANT_GRANULARITY: u64 = 16;

/// A lease on upload memory, owned by the dispatch that requested it
///
/// Leases are not `Clone`; handing one back through
/// [`ConstantUploadArena::release`] ends it.
#[derive(Debug, PartialEq, Eq)]
pub struct ConstantAllocation {
    page: usize,
    offset: u64,
    size: u64,
}

impl ConstantAllocation {
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Allocated size, rounded up to the constant granularity
    pub fn size(&self) -> u64 {
        self.size
    }
}

struct Page<C> {
    buffer: C,
    size: u64,
}

/// Bump allocator over backend constant buffers
pub struct ConstantUploadArena<B: Backend> {
    pages: Vec<Page<B::ConstantBuffer>>,
    page_size: u64,
    alignment: u64,
    page: usize,
    cursor: u64,
    live: usize,
    staging: Vec<u8>,
}

impl<B: Backend> ConstantUploadArena<B> {
    /// Creates an empty arena; pages are created on first use
    ///
    /// # Arguments
    /// * `alignment` - Required offset alignment of constant bindings
    pub fn new(alignment: u64) -> Self {
        Self::with_page_size(alignment, DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(alignment: u64, page_size: u64) -> Self {
        Self {
            pages: Vec::new(),
            page_size: page_size.max(CONSTANT_GRANULARITY),
            alignment: alignment.max(1),
            page: 0,
            cursor: 0,
            live: 0,
            staging: Vec::new(),
        }
    }

    /// Copies `data` into fresh upload memory
    pub fn allocate(&mut self, backend: &B, data: &[u8]) -> Result<ConstantAllocation> {
        let size = (data.len() as u64).max(1).next_multiple_of(CONSTANT_GRANULARITY);

        let mut offset = self.cursor.next_multiple_of(self.alignment);
        let fits = self.pages.get(self.page).is_some_and(|page| offset + size <= page.size);
        if !fits {
            self.advance_page(backend, size)?;
            offset = 0;
        }

        self.staging.clear();
        self.staging.extend_from_slice(data);
        self.staging.resize(size as usize, 0);
        backend.write_constants(&self.pages[self.page].buffer, offset, &self.staging);

        self.cursor = offset + size;
        self.live += 1;
        Ok(ConstantAllocation { page: self.page, offset, size })
    }

    /// View of an allocation for binding at range 0
    pub fn view(&self, allocation: &ConstantAllocation) -> ConstantView<'_, B::ConstantBuffer> {
        ConstantView {
            buffer: &self.pages[allocation.page].buffer,
            offset: allocation.offset,
            size: allocation.size,
        }
    }

    /// Ends a lease once its consumer has been recorded
    pub fn release(&mut self, _allocation: ConstantAllocation) {
        self.live = self.live.saturating_sub(1);
    }

    /// Rewinds to the first page for a new frame
    ///
    /// The previous frame's command stream must have been submitted: its
    /// pending constant writes are flushed at submission, before anything
    /// recorded after this call.
    pub fn begin_frame(&mut self) {
        if self.live > 0 {
            tracing::warn!(live = self.live, "Constant allocations were not released before the frame boundary");
            self.live = 0;
        }
        self.page = 0;
        self.cursor = 0;
    }

    /// Number of leases handed out and not yet released
    pub fn live_allocations(&self) -> usize {
        self.live
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn advance_page(&mut self, backend: &B, size: u64) -> Result<()> {
        let next = if self.pages.is_empty() { 0 } else { self.page + 1 };

        // Pages are kept across frames, so a reused page only needs to be large enough.
        if self.pages.get(next).is_some_and(|page| page.size >= size) {
            self.page = next;
            return Ok(());
        }

        if size > self.page_size {
            self.page_size = size.next_power_of_two();
        }
        let page = Page {
            buffer: backend.create_constant_buffer(self.page_size)?,
            size: self.page_size,
        };
        tracing::debug!(page = next, size = self.page_size, "Created constant upload page");

        if next < self.pages.len() {
            self.pages[next] = page;
        } else {
            self.pages.push(page);
        }
        self.page = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBackend;

    #[test]
    fn test_allocations_are_aligned_and_disjoint() {
        let backend = MockBackend::new();
        let mut arena = ConstantUploadArena::<MockBackend>::with_page_size(256, 1024);

        let first = arena.allocate(&backend, &[1; 20]).unwrap();
        let second = arena.allocate(&backend, &[2; 8]).unwrap();

        assert_eq!(first.offset(), 0);
        assert_eq!(first.size(), 32);
        assert_eq!(second.offset(), 256);
        assert_eq!(second.size(), 16);
        assert_eq!(arena.live_allocations(), 2);

        let writes = backend.constant_writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].2.len(), 32);
        assert_eq!(&writes[0].2[..20], &[1; 20]);
        assert!(writes[0].2[20..].iter().all(|byte| *byte == 0));

        arena.release(first);
        arena.release(second);
        assert_eq!(arena.live_allocations(), 0);
    }

    #[test]
    fn test_grows_new_page_when_full() {
        let backend = MockBackend::new();
        let mut arena = ConstantUploadArena::<MockBackend>::with_page_size(256, 512);

        let allocations: Vec<_> = (0..3).map(|_| arena.allocate(&backend, &[0; 64]).unwrap()).collect();
        assert_eq!(arena.page_count(), 2);
        assert_eq!(allocations[2].offset(), 0);

        let view = arena.view(&allocations[2]);
        assert_eq!(view.size, 64);
        for allocation in allocations {
            arena.release(allocation);
        }
    }

    #[test]
    fn test_begin_frame_reuses_pages() {
        let backend = MockBackend::new();
        let mut arena = ConstantUploadArena::<MockBackend>::with_page_size(16, 64);

        for _ in 0..2 {
            arena.begin_frame();
            let a = arena.allocate(&backend, &[0; 48]).unwrap();
            let b = arena.allocate(&backend, &[0; 48]).unwrap();
            arena.release(a);
            arena.release(b);
        }

        assert_eq!(arena.page_count(), 2);
        assert_eq!(backend.constant_buffers_created(), 2);
    }

    #[test]
    fn test_oversized_blob_gets_dedicated_page() {
        let backend = MockBackend::new();
        let mut arena = ConstantUploadArena::<MockBackend>::with_page_size(16, 64);

        let allocation = arena.allocate(&backend, &[7; 100]).unwrap();
        assert_eq!(allocation.size(), 112);
        assert_eq!(arena.view(&allocation).offset, 0);
        arena.release(allocation);
    }
}
