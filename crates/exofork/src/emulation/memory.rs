//! Emulated physical memory.

use alloc::{vec, vec::Vec};

use crate::{FrameNumber, layout::PAGE_SIZE};

/// Holds metadata for one emulated physical frame.
#[derive(Debug, Default, Clone, Copy)]
struct Frame {
    /// Number of page-table entries (or page tables) referring to this frame.
    refs: u32,
    allocated: bool,
}

/// A fixed pool of page frames backed by a host buffer.
///
/// Frames come back zeroed from [`allocate`](Self::allocate) with a reference
/// count of zero; the caller installs the first reference. A frame returns to
/// the pool when its last reference is dropped.
pub struct PhysicalMemory {
    memory: Vec<u8>,
    frames: Vec<Frame>,
    free: Vec<FrameNumber>,
}

impl PhysicalMemory {
    /// Creates a pool of `frame_count` frames.
    pub fn new(frame_count: usize) -> Self {
        Self {
            memory: vec![0u8; frame_count * PAGE_SIZE],
            frames: vec![Frame::default(); frame_count],
            // Lowest frame numbers are handed out first.
            free: (0..frame_count).rev().map(FrameNumber::new).collect(),
        }
    }

    /// Allocates a zeroed frame, or `None` when the pool is empty.
    pub fn allocate(&mut self) -> Option<FrameNumber> {
        let frame = self.free.pop()?;
        self.frames[frame.as_usize()] = Frame {
            refs: 0,
            allocated: true,
        };
        self.page_mut(frame).fill(0);
        Some(frame)
    }

    /// Returns an allocated frame that never gained a reference.
    pub fn free(&mut self, frame: FrameNumber) {
        let meta = &mut self.frames[frame.as_usize()];
        debug_assert!(meta.allocated, "freeing unallocated frame {:?}", frame);
        debug_assert_eq!(meta.refs, 0, "freeing referenced frame {:?}", frame);
        if meta.allocated {
            meta.allocated = false;
            self.free.push(frame);
        }
    }

    pub fn incref(&mut self, frame: FrameNumber) {
        self.frames[frame.as_usize()].refs += 1;
    }

    /// Drops one reference, freeing the frame when none remain.
    pub fn decref(&mut self, frame: FrameNumber) {
        let meta = &mut self.frames[frame.as_usize()];
        debug_assert!(meta.refs > 0, "reference underflow on {:?}", frame);
        meta.refs = meta.refs.saturating_sub(1);
        if meta.refs == 0 {
            self.free(frame);
        }
    }

    /// Returns the reference count of `frame`.
    pub fn refs(&self, frame: FrameNumber) -> u32 {
        self.frames
            .get(frame.as_usize())
            .map_or(0, |meta| meta.refs)
    }

    /// Returns the number of unallocated frames.
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Returns the contents of `frame`.
    pub fn page(&self, frame: FrameNumber) -> &[u8] {
        let start = frame.start().as_usize();
        &self.memory[start..start + PAGE_SIZE]
    }

    /// Returns the contents of `frame` for writing.
    pub fn page_mut(&mut self, frame: FrameNumber) -> &mut [u8] {
        let start = frame.start().as_usize();
        &mut self.memory[start..start + PAGE_SIZE]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_is_zeroed_and_exhaustible() {
        let mut memory = PhysicalMemory::new(2);
        let a = memory.allocate().unwrap();
        memory.page_mut(a)[0] = 0xAA;
        let b = memory.allocate().unwrap();
        assert_ne!(a, b);
        assert!(memory.allocate().is_none());

        memory.free(a);
        let again = memory.allocate().unwrap();
        assert_eq!(again, a);
        assert_eq!(memory.page(again)[0], 0);
    }

    #[test]
    fn last_reference_frees_frame() {
        let mut memory = PhysicalMemory::new(1);
        let frame = memory.allocate().unwrap();
        memory.incref(frame);
        memory.incref(frame);
        assert_eq!(memory.refs(frame), 2);

        memory.decref(frame);
        assert_eq!(memory.free_count(), 0);
        memory.decref(frame);
        assert_eq!(memory.free_count(), 1);
        assert_eq!(memory.refs(frame), 0);
    }

    #[test]
    fn frames_do_not_overlap() {
        let mut memory = PhysicalMemory::new(2);
        let a = memory.allocate().unwrap();
        let b = memory.allocate().unwrap();
        memory.page_mut(a).fill(1);
        memory.page_mut(b).fill(2);
        assert!(memory.page(a).iter().all(|&byte| byte == 1));
        assert!(memory.page(b).iter().all(|&byte| byte == 2));
    }
}
