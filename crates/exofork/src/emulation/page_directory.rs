//! Two-level page tables for emulated environments.
//!
//! The layout matches 32-bit x86: a directory index selects a page table
//! covering 4 MiB, a table index selects a 4 KiB page. Page tables live in
//! frames taken from [`PhysicalMemory`], so building one can run out of memory
//! just like mapping a page can.

use alloc::{boxed::Box, collections::BTreeMap};
use core::fmt;

use crate::{
    FrameNumber, PageFlags, VirtualAddress,
    layout::{self, ENTRIES_PER_TABLE, PAGE_SHIFT, PDX_SHIFT},
};

use super::memory::PhysicalMemory;

/// A single page table entry.
///
/// The entry format:
/// - Bits 0-11: Flags (hardware bits plus three software bits)
/// - Bits 12-31: Frame number
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct PageEntry(usize);

impl PageEntry {
    const FLAGS_MASK: usize = 0xFFF;

    /// Creates an entry mapping `frame` with `flags`.
    pub fn new(frame: FrameNumber, flags: PageFlags) -> Self {
        let flag_bits = flags.to_raw() as usize & Self::FLAGS_MASK;
        Self((frame.as_usize() << PAGE_SHIFT) | flag_bits)
    }

    /// Returns the mapped frame, or `None` if the entry is not present.
    pub fn frame(self) -> Option<FrameNumber> {
        if self.is_present() {
            Some(FrameNumber::new(self.0 >> PAGE_SHIFT))
        } else {
            None
        }
    }

    pub fn flags(self) -> PageFlags {
        PageFlags::from_raw((self.0 & Self::FLAGS_MASK) as u64)
    }

    pub fn is_present(self) -> bool {
        self.flags().is_present()
    }

    /// Clears this entry (sets it to zero).
    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

impl fmt::Debug for PageEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.frame() {
            Some(frame) => write!(f, "PageEntry({} -> {:?})", self.flags(), frame),
            None => write!(f, "PageEntry(empty)"),
        }
    }
}

/// One second-level table and the frame that backs it.
struct PageTable {
    frame: FrameNumber,
    entries: Box<[PageEntry; ENTRIES_PER_TABLE]>,
}

impl PageTable {
    fn new(frame: FrameNumber) -> Self {
        Self {
            frame,
            entries: Box::new([PageEntry::default(); ENTRIES_PER_TABLE]),
        }
    }
}

/// The page directory of one environment.
///
/// Only directory slots with a table are stored.
#[derive(Default)]
pub struct PageDirectory {
    tables: BTreeMap<usize, PageTable>,
}

impl PageDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the directory entry covering `va` as the owning environment
    /// sees it through its read-only self-map.
    pub fn directory_entry(&self, va: VirtualAddress) -> PageFlags {
        if self.tables.contains_key(&layout::pdx(va.as_usize())) {
            PageFlags::USER_RW
        } else {
            PageFlags::empty()
        }
    }

    /// Returns a copy of the entry for `va`, empty if no table covers it.
    pub fn entry(&self, va: VirtualAddress) -> PageEntry {
        let addr = va.as_usize();
        self.tables
            .get(&layout::pdx(addr))
            .map(|table| table.entries[layout::ptx(addr)])
            .unwrap_or_default()
    }

    /// Walks to the entry for `va`.
    ///
    /// Returns None if the covering page table does not exist.
    pub fn walk(&mut self, va: VirtualAddress) -> Option<&mut PageEntry> {
        let addr = va.as_usize();
        let table = self.tables.get_mut(&layout::pdx(addr))?;
        Some(&mut table.entries[layout::ptx(addr)])
    }

    /// Walks to the entry for `va`, allocating the page table if needed.
    ///
    /// Returns None if a table was needed and `memory` has no free frame.
    pub fn walk_or_create(
        &mut self,
        va: VirtualAddress,
        memory: &mut PhysicalMemory,
    ) -> Option<&mut PageEntry> {
        let addr = va.as_usize();
        let index = layout::pdx(addr);

        if !self.tables.contains_key(&index) {
            let frame = memory.allocate()?;
            memory.incref(frame);
            self.tables.insert(index, PageTable::new(frame));
        }

        let table = self.tables.get_mut(&index)?;
        Some(&mut table.entries[layout::ptx(addr)])
    }

    /// Iterates over every present entry in address order.
    pub fn mappings(&self) -> impl Iterator<Item = (VirtualAddress, PageEntry)> + '_ {
        self.tables.iter().flat_map(|(&pdx, table)| {
            table
                .entries
                .iter()
                .enumerate()
                .filter(|(_, entry)| entry.is_present())
                .map(move |(ptx, &entry)| {
                    let va = (pdx << PDX_SHIFT) | (ptx << PAGE_SHIFT);
                    (VirtualAddress::new(va), entry)
                })
        })
    }

    /// Drops every mapping and page table, releasing their frames.
    pub fn release(self, memory: &mut PhysicalMemory) {
        for table in self.tables.into_values() {
            for entry in table.entries.iter() {
                if let Some(frame) = entry.frame() {
                    memory.decref(frame);
                }
            }
            memory.decref(table.frame);
        }
    }
}
