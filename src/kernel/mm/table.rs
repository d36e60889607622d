// Copyright 2025 The Rustee Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Translation Table Arena
//!
//! This module turns the laid-out memory map into translation tables. The
//! tables are hardware-shaped (a radix tree of fixed-size nodes, nine VA
//! bits per level, entries either invalid, a block, or a pointer to a finer
//! table) but hardware-neutral: the actual entry encoding, the ordering
//! barrier and TLB maintenance are behind the [`TableHw`] trait.
//!
//! # Design
//!
//! Every region is mapped at the finest level at which its virtual address,
//! physical address, remaining length and granule line up; when no level
//! fits, the covering entry is split into a finer-grained table and the
//! walk descends. Programming an entry that is already valid means two
//! regions disagree about the same virtual address, which is fatal.
//!
//! Regions without physical backing get their tables allocated down to
//! their granule level with all entries left invalid, so runtime updates
//! never allocate on the mapping path.

use core::sync::atomic::{fence, AtomicUsize, Ordering};

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;

use crate::kernel::mm::layout::{
    is_aligned, MemAttr, PAddr, VAddr, SMALL_PAGE_SHIFT, SMALL_PAGE_SIZE,
};
use crate::kernel::mm::map::MemoryRegion;

/// VA bits resolved per table level
pub const TABLE_LEVEL_BITS: u32 = 9;

/// Entries per non-root table node
pub const TABLE_ENTRIES: usize = 1 << TABLE_LEVEL_BITS;

/// Decoded view of one table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Invalid,
    Block { pa: PAddr, attr: MemAttr },
    Table { pa: PAddr },
}

/// Hardware face of the table engine: entry codec plus the two
/// synchronization primitives the update protocol needs.
pub trait TableHw: Send + Sync {
    /// Encode a block/page entry
    fn encode_block(&self, pa: PAddr, attr: MemAttr) -> u64;

    /// Encode a pointer to a next-level table
    fn encode_table(&self, table_pa: PAddr) -> u64;

    /// Decode a raw entry
    fn decode(&self, raw: u64) -> EntryKind;

    /// Make prior table writes visible before they can be walked
    fn write_barrier(&self);

    /// Invalidate all cached translations
    fn tlb_invalidate_all(&self);
}

/// Software entry encoding: attributes in the low bits, the physical
/// address above them. Good enough for hosted use and for any platform
/// that re-encodes entries on the way to real hardware.
#[derive(Debug, Default)]
pub struct GenericHw {
    barriers: AtomicUsize,
    tlb_flushes: AtomicUsize,
}

impl GenericHw {
    pub fn new() -> Self {
        GenericHw::default()
    }

    /// Number of write barriers issued so far
    pub fn barriers(&self) -> usize {
        self.barriers.load(Ordering::Relaxed)
    }

    /// Number of global TLB invalidations issued so far
    pub fn tlb_flushes(&self) -> usize {
        self.tlb_flushes.load(Ordering::Relaxed)
    }
}

const ATTR_MASK: u64 = (1 << SMALL_PAGE_SHIFT) - 1;

impl TableHw for GenericHw {
    fn encode_block(&self, pa: PAddr, attr: MemAttr) -> u64 {
        pa as u64 | attr.bits() as u64
    }

    fn encode_table(&self, table_pa: PAddr) -> u64 {
        table_pa as u64 | (MemAttr::VALID | MemAttr::TABLE).bits() as u64
    }

    fn decode(&self, raw: u64) -> EntryKind {
        let attr = MemAttr::from_bits_truncate((raw & ATTR_MASK) as u32);
        if !attr.contains(MemAttr::VALID) {
            return EntryKind::Invalid;
        }
        let pa = (raw & !ATTR_MASK) as PAddr;
        if attr.contains(MemAttr::TABLE) {
            EntryKind::Table { pa }
        } else {
            EntryKind::Block { pa, attr }
        }
    }

    fn write_barrier(&self) {
        fence(Ordering::Release);
        self.barriers.fetch_add(1, Ordering::Relaxed);
    }

    fn tlb_invalidate_all(&self) {
        self.tlb_flushes.fetch_add(1, Ordering::Relaxed);
    }
}

/// One table node. Its "physical address" is synthetic, derived from the
/// arena index, and only ever fed back into the owning arena.
#[derive(Debug)]
struct TableNode {
    /// VA bytes covered by one entry, as a shift
    shift: u32,
    /// First VA covered by this node
    va_base: VAddr,
    entries: Vec<u64>,
}

/// Arena of translation table nodes plus the hardware codec.
pub struct TableArena {
    nodes: Vec<TableNode>,
    hw: Box<dyn TableHw>,
    va_width: u32,
}

/// Coarsest entry shift for an address width: the root entry resolves
/// whatever is left above the nine-bits-per-level levels.
const fn base_shift(va_width: u32) -> u32 {
    ((va_width - SMALL_PAGE_SHIFT - 1) / TABLE_LEVEL_BITS) * TABLE_LEVEL_BITS + SMALL_PAGE_SHIFT
}

fn node_pa(index: usize) -> PAddr {
    (index + 1) << SMALL_PAGE_SHIFT
}

fn node_index(pa: PAddr) -> usize {
    (pa >> SMALL_PAGE_SHIFT) - 1
}

impl TableArena {
    pub fn new(va_width: u32, hw: Box<dyn TableHw>) -> Self {
        let shift = base_shift(va_width);
        let root = TableNode {
            shift,
            va_base: 0,
            entries: vec![0; 1 << (va_width - shift)],
        };
        TableArena {
            nodes: vec![root],
            hw,
            va_width,
        }
    }

    pub fn hw(&self) -> &dyn TableHw {
        &*self.hw
    }

    /// Number of allocated table nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn entry_index(&self, node: usize, va: VAddr) -> usize {
        let n = &self.nodes[node];
        let index = (va - n.va_base) >> n.shift;
        if index >= n.entries.len() {
            panic!("va {:#x} outside the {}-bit address space", va, self.va_width);
        }
        index
    }

    /// Follow table pointers from the root to the finest existing node
    /// covering `va`.
    fn walk_deepest(&self, va: VAddr) -> usize {
        let mut node = 0;
        loop {
            let index = self.entry_index(node, va);
            match self.hw.decode(self.nodes[node].entries[index]) {
                EntryKind::Table { pa } => node = node_index(pa),
                _ => return node,
            }
        }
    }

    /// Replace the entry with a pointer to a new one-level-finer table
    /// covering the same range. A valid block entry is rewritten as the
    /// equivalent set of finer blocks, so the translation never changes.
    fn split_entry(&mut self, node: usize, index: usize) -> usize {
        let parent_shift = self.nodes[node].shift;
        if parent_shift == SMALL_PAGE_SHIFT {
            panic!("cannot split a page-granularity entry");
        }
        let child_shift = parent_shift - TABLE_LEVEL_BITS;
        let va_base = self.nodes[node].va_base + (index << parent_shift);

        let old = self.hw.decode(self.nodes[node].entries[index]);
        let mut entries = vec![0u64; TABLE_ENTRIES];
        match old {
            EntryKind::Invalid => (),
            EntryKind::Block { pa, attr } => {
                for (i, e) in entries.iter_mut().enumerate() {
                    *e = self.hw.encode_block(pa + (i << child_shift), attr);
                }
            }
            EntryKind::Table { pa } => return node_index(pa),
        }

        let child = self.nodes.len();
        self.nodes.push(TableNode {
            shift: child_shift,
            va_base,
            entries,
        });
        self.nodes[node].entries[index] = self.hw.encode_table(node_pa(child));
        child
    }

    /// Block maps are allowed only when everything lines up: both
    /// addresses on the block boundary, enough length left, and a granule
    /// at least as coarse as the block.
    fn can_map_at_level(region: &MemoryRegion, va: VAddr, pa: PAddr, left: usize, block: usize) -> bool {
        if region.granule != 0 && region.granule < block {
            return false;
        }
        is_aligned(va, block) && is_aligned(pa, block) && left >= block
    }

    /// Map one region of the finished memory map.
    ///
    /// Physless regions only get their tables allocated; their entries are
    /// programmed later through [`TableArena::map_at_shift`].
    pub fn map_region(&mut self, region: &MemoryRegion) {
        if !is_aligned(region.va, SMALL_PAGE_SIZE)
            || !is_aligned(region.pa, SMALL_PAGE_SIZE)
            || !is_aligned(region.size, SMALL_PAGE_SIZE)
        {
            panic!(
                "cannot map {} va {:#x} pa {:#x} size {:#x}",
                region.area.tag(),
                region.va,
                region.pa,
                region.size
            );
        }
        let backed = region.attr.contains(MemAttr::VALID);
        let mut va = region.va;
        let mut pa = region.pa;
        let mut left = region.size;

        while left > 0 {
            let mut node = self.walk_deepest(va);
            loop {
                let block = 1usize << self.nodes[node].shift;
                if Self::can_map_at_level(region, va, pa, left, block) {
                    if backed {
                        let index = self.entry_index(node, va);
                        if self.hw.decode(self.nodes[node].entries[index]) != EntryKind::Invalid {
                            panic!("page is already mapped at va {:#x}", va);
                        }
                        self.nodes[node].entries[index] = self.hw.encode_block(pa, region.attr);
                    }
                    va += block;
                    if backed {
                        pa += block;
                    }
                    left -= block;
                    break;
                }
                let index = self.entry_index(node, va);
                node = self.split_entry(node, index);
            }
        }
    }

    /// Program a single entry of `1 << shift` bytes. The covering tables
    /// must already exist or be splittable down to that level; an entry
    /// that is already valid is fatal.
    pub fn map_at_shift(&mut self, va: VAddr, pa: PAddr, attr: MemAttr, shift: u32) {
        let mut node = self.walk_deepest(va);
        while self.nodes[node].shift > shift {
            let index = self.entry_index(node, va);
            node = self.split_entry(node, index);
        }
        if self.nodes[node].shift != shift {
            panic!(
                "no {}-shift table covering va {:#x}",
                shift, va
            );
        }
        let index = self.entry_index(node, va);
        if self.hw.decode(self.nodes[node].entries[index]) != EntryKind::Invalid {
            panic!("page is already mapped at va {:#x}", va);
        }
        self.nodes[node].entries[index] = self.hw.encode_block(pa, attr);
    }

    /// Invalidate every entry covering `[va, va + size)`, at whatever
    /// levels the range is mapped at. Clearing the middle of a coarser
    /// block is fatal since it would tear a mapping we do not own.
    pub fn clear_range(&mut self, va: VAddr, size: usize) {
        let mut va = va;
        let mut left = size;
        while left > 0 {
            let node = self.walk_deepest(va);
            let block = 1usize << self.nodes[node].shift;
            if !is_aligned(va, block) || left < block {
                panic!("clearing va {:#x} would tear a {:#x}-byte block", va, block);
            }
            let index = self.entry_index(node, va);
            self.nodes[node].entries[index] = 0;
            va += block;
            left -= block;
        }
    }

    /// Walk the tables for `va`. Returns the physical address and the
    /// attributes when a valid leaf entry covers it.
    pub fn resolve(&self, va: VAddr) -> Option<(PAddr, MemAttr)> {
        let node = self.walk_deepest(va);
        let index = self.entry_index(node, va);
        match self.hw.decode(self.nodes[node].entries[index]) {
            EntryKind::Block { pa, attr } => {
                let block = 1usize << self.nodes[node].shift;
                Some((pa + (va & (block - 1)), attr))
            }
            _ => None,
        }
    }
}

impl core::fmt::Debug for TableArena {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TableArena")
            .field("va_width", &self.va_width)
            .field("nodes", &self.nodes.len())
            .finish()
    }
}
