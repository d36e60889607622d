// Copyright 2025 The Rustee Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Runtime Map Index Service
//!
//! [`CoreVm`] owns the finished memory map and the translation tables and
//! serves everything the rest of the kernel needs from them: address
//! translation, membership predicates, and the few structural map changes
//! allowed after boot.
//!
//! # Concurrency
//!
//! Mutations serialize on one spinlock. Readers never take it: every
//! mutation rebuilds an immutable [`MapSnapshot`] and publishes it with a
//! single release-ordered pointer swap, after a table write barrier, so a
//! concurrent lookup sees either the old map or the new one and never a
//! torn entry. Superseded snapshots are retired, not freed, for the life
//! of the service, so memory use grows with the number of structural map
//! changes: one map copy per [`CoreVm::add_mapping`] /
//! [`CoreVm::remove_mapping`] call. The embedding kernel must treat these
//! as rare reconfiguration events, not a per-request path.

use core::sync::atomic::{AtomicPtr, Ordering};

use spin::Mutex;

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::kernel::mm::assign::init_mem_map;
use crate::kernel::mm::layout::{
    align_down, is_aligned, is_buffer_inside, MemArea, MemAttr, MmConfig, PAddr, SecurityWindows,
    VAddr, SMALL_PAGE_SHIFT, SMALL_PAGE_SIZE,
};
use crate::kernel::mm::map::{
    collect_mem_ranges, find_map_by_pa, find_map_by_type, find_map_by_type_and_pa, find_map_by_va,
    GrowthPolicy, MemoryMap, MemoryRegion,
};
use crate::kernel::mm::table::{TableArena, TableHw};
use crate::kernel::mm::{MmError, Result};

/// Physical buffer membership classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemClass {
    /// Secure-only memory
    Secure,
    /// Non-secure memory (shared window or discovered DRAM)
    NonSecure,
    /// The non-secure shared memory window
    NsecShm,
    /// The secure data-path window
    SdpMem,
    /// Mapped write-back cacheable
    Cached,
}

/// An immutable, VA-sorted copy of the memory map, safe to read without
/// any locking.
#[derive(Debug)]
pub struct MapSnapshot {
    regions: Vec<MemoryRegion>,
}

impl MapSnapshot {
    pub fn regions(&self) -> &[MemoryRegion] {
        &self.regions
    }
}

struct VmInner {
    map: MemoryMap,
    tables: TableArena,
    /// Superseded snapshots, kept alive because unlocked readers may
    /// still hold them. Grows by one entry per structural map change;
    /// see the module doc for the resulting contract.
    retired: Vec<&'static MapSnapshot>,
}

/// The core address-space service.
pub struct CoreVm {
    inner: Mutex<VmInner>,
    snap: AtomicPtr<MapSnapshot>,
    windows: SecurityWindows,
}

fn make_snapshot(map: &MemoryMap) -> *mut MapSnapshot {
    let mut regions = map.regions().to_vec();
    regions.sort_unstable_by_key(|r| r.va);
    Box::into_raw(Box::new(MapSnapshot { regions }))
}

/// Build a [`CoreVm`] from a platform configuration: collect, lay out,
/// validate, program the tables. Returns the service and the ASLR offset
/// from the link address.
pub fn boot_core_vm(cfg: &MmConfig, seed: usize, hw: Box<dyn TableHw>) -> (CoreVm, usize) {
    let windows = cfg.windows();

    let mut map = MemoryMap::new(cfg.map_capacity, GrowthPolicy::BootDouble);
    collect_mem_ranges(&mut map, cfg);
    let offs = init_mem_map(&mut map, cfg, seed);
    map.check(&windows);

    let mut tables = TableArena::new(cfg.va_width, hw);
    for r in map.regions() {
        if r.size != 0 {
            tables.map_region(r);
        }
    }
    tables.hw().write_barrier();

    (CoreVm::new(map, tables, windows), offs)
}

impl CoreVm {
    /// Wrap a finished map and its programmed tables.
    pub fn new(map: MemoryMap, tables: TableArena, windows: SecurityWindows) -> Self {
        let snap = AtomicPtr::new(make_snapshot(&map));
        CoreVm {
            inner: Mutex::new(VmInner {
                map,
                tables,
                retired: Vec::new(),
            }),
            snap,
            windows,
        }
    }

    /// The current published snapshot. Never blocks.
    pub fn snapshot(&self) -> &MapSnapshot {
        // the pointer is only ever replaced with another live snapshot
        // and old ones are retired, never freed
        unsafe { &*self.snap.load(Ordering::Acquire) }
    }

    fn publish(&self, inner: &mut VmInner) {
        let fresh = make_snapshot(&inner.map);
        let old = self.snap.swap(fresh, Ordering::AcqRel);
        inner.retired.push(unsafe { &*old });
    }

    pub fn windows(&self) -> &SecurityWindows {
        &self.windows
    }

    // ------------------------------------------------------------------
    // Lookups (lock-free)
    // ------------------------------------------------------------------

    /// Translate a core virtual address to its physical address.
    ///
    /// Virtual space without physical backing translates to `None`, pages
    /// mapped into it page-by-page included.
    pub fn translate_va(&self, va: VAddr) -> Option<PAddr> {
        let snap = self.snapshot();
        let r = find_map_by_va(snap.regions(), va)?;
        if !r.attr.contains(MemAttr::VALID) {
            return None;
        }
        Some(r.pa + (va - r.va))
    }

    /// Translate a physical buffer of the given memory class to its core
    /// virtual address.
    pub fn translate_pa(&self, pa: PAddr, area: MemArea, len: usize) -> Option<VAddr> {
        let snap = self.snapshot();
        let r = find_map_by_type_and_pa(snap.regions(), area, pa, len)?;
        if !r.attr.contains(MemAttr::VALID) {
            return None;
        }
        Some(r.va + (pa - r.pa))
    }

    /// Area classification of a physical address, if mapped.
    pub fn area_by_pa(&self, pa: PAddr) -> Option<MemArea> {
        find_map_by_pa(self.snapshot().regions(), pa).map(|r| r.area)
    }

    /// VA range of the first region of the given area type.
    pub fn mem_by_type(&self, area: MemArea) -> Option<(VAddr, usize)> {
        find_map_by_type(self.snapshot().regions(), area).map(|r| (r.va, r.size))
    }

    /// Does the physical buffer `[pa, pa + len)` belong to `class`?
    pub fn pbuf_is(&self, class: MemClass, pa: PAddr, len: usize) -> bool {
        match class {
            MemClass::Secure => self.windows.pa_is_secure(pa, len),
            MemClass::NonSecure => {
                self.windows.pa_is_nsec_shared(pa, len)
                    || self.snapshot().regions().iter().any(|r| {
                        r.area == MemArea::NsecRam && is_buffer_inside(pa, len, r.pa, r.size)
                    })
            }
            MemClass::NsecShm => self.windows.pa_is_nsec_shared(pa, len),
            MemClass::SdpMem => self.windows.pa_is_sdp(pa, len),
            MemClass::Cached => self.snapshot().regions().iter().any(|r| {
                r.attr.contains(MemAttr::VALID | MemAttr::CACHED)
                    && is_buffer_inside(pa, len, r.pa, r.size)
            }),
        }
    }

    /// Does the virtual buffer `[va, va + len)` translate into `class`?
    pub fn vbuf_is(&self, class: MemClass, va: VAddr, len: usize) -> bool {
        match self.translate_va(va) {
            Some(pa) => self.pbuf_is(class, pa, len),
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Structural changes (serialized)
    // ------------------------------------------------------------------

    /// Map a contiguous physical buffer, carving virtual space from the
    /// front of the reserved region.
    ///
    /// A buffer this service already maps with the same area type simply
    /// reports the existing address.
    pub fn add_mapping(&self, area: MemArea, pa: PAddr, len: usize) -> Result<VAddr> {
        if len == 0 || pa.checked_add(len).is_none() {
            return Err(MmError::BadParameters);
        }
        let mut inner = self.inner.lock();

        if let Some(r) = find_map_by_type_and_pa(inner.map.regions(), area, pa, len) {
            if r.attr.contains(MemAttr::VALID) {
                return Ok(r.va + (pa - r.pa));
            }
        }

        let res_index = match inner
            .map
            .regions()
            .iter()
            .position(|r| r.area == MemArea::ResVaspace)
        {
            Some(n) => n,
            None => return Err(MmError::OutOfSpace),
        };
        let res = inner.map.regions()[res_index];
        let granule = res.granule;
        let start = align_down(pa, granule);
        let len_rounded = match (len + (pa - start)).checked_add(granule - 1) {
            Some(l) => align_down(l, granule),
            None => return Err(MmError::BadParameters),
        };
        if len_rounded > res.size {
            return Err(MmError::OutOfSpace);
        }

        let region = MemoryRegion {
            area,
            pa: start,
            va: res.va,
            size: len_rounded,
            granule,
            attr: area.attr(),
            dynamic: true,
        };
        // shrink the reserved space from the front
        {
            let res = &mut inner.map.regions_mut()[res_index];
            res.va += len_rounded;
            res.size -= len_rounded;
        }

        let shift = granule.trailing_zeros();
        let mut off = 0;
        while off < region.size {
            inner
                .tables
                .map_at_shift(region.va + off, region.pa + off, region.attr, shift);
            off += granule;
        }
        inner.tables.hw().write_barrier();

        inner.map.push(region);
        self.publish(&mut inner);
        Ok(region.va + (pa - start))
    }

    /// Remove a mapping previously created by [`CoreVm::add_mapping`].
    ///
    /// The range must cover the whole dynamic region after granule
    /// rounding; anything else is `NotFound`. A range that resolves to a
    /// statically placed region means the caller is trying to unmap the
    /// kernel out from under itself, which is fatal.
    pub fn remove_mapping(&self, area: MemArea, va: VAddr, len: usize) -> Result {
        if len == 0 {
            return Err(MmError::BadParameters);
        }
        let mut inner = self.inner.lock();

        let index = match inner
            .map
            .regions()
            .iter()
            .position(|r| r.size != 0 && r.contains_va(va))
        {
            Some(n) => n,
            None => return Err(MmError::NotFound),
        };
        let r = inner.map.regions()[index];
        if !r.dynamic {
            panic!(
                "attempt to unmap statically placed {} at va {:#x}",
                r.area.tag(),
                va
            );
        }
        let start = align_down(va, r.granule);
        let len_rounded = match len
            .checked_add(va - start)
            .and_then(|l| l.checked_add(r.granule - 1))
        {
            Some(l) => align_down(l, r.granule),
            None => return Err(MmError::BadParameters),
        };
        if r.area != area || r.va != start || r.size != len_rounded {
            return Err(MmError::NotFound);
        }

        inner.tables.clear_range(r.va, r.size);
        inner.tables.hw().tlb_invalidate_all();

        // hand the space back when it still borders the reserved region
        if let Some(res_index) = inner
            .map
            .regions()
            .iter()
            .position(|m| m.area == MemArea::ResVaspace && m.va == r.end_va())
        {
            let res = &mut inner.map.regions_mut()[res_index];
            res.va = r.va;
            res.size += r.size;
        }

        inner.map.remove(index);
        self.publish(&mut inner);
        Ok(())
    }

    /// Map externally supplied, possibly discontiguous small pages into a
    /// dynamic region. The pages never become executable; asking for that
    /// is fatal, as is a target outside the dynamic virtual space.
    pub fn map_pages(&self, va: VAddr, pages: &[PAddr], area: MemArea) -> Result {
        let attr = area.attr();
        if attr.contains(MemAttr::EXEC) {
            panic!("refusing to map dynamic pages executable");
        }
        if !is_aligned(va, SMALL_PAGE_SIZE) {
            return Err(MmError::BadParameters);
        }
        let len = match pages.len().checked_mul(SMALL_PAGE_SIZE) {
            Some(l) => l,
            None => return Err(MmError::BadParameters),
        };
        let mut inner = self.inner.lock();

        let region = match find_map_by_va(inner.map.regions(), va) {
            Some(r) if is_buffer_inside(va, len, r.va, r.size) => *r,
            _ => panic!("va {:#x} does not belong to any mapped region", va),
        };
        if !region.area.is_dynamic() {
            panic!(
                "mapping pages into statically placed {} at va {:#x}",
                region.area.tag(),
                va
            );
        }

        for (n, &pa) in pages.iter().enumerate() {
            if !is_aligned(pa, SMALL_PAGE_SIZE) {
                // roll the partial work back before reporting
                if n > 0 {
                    inner.tables.clear_range(va, n * SMALL_PAGE_SIZE);
                    inner.tables.hw().tlb_invalidate_all();
                }
                return Err(MmError::BadParameters);
            }
            inner
                .tables
                .map_at_shift(va + n * SMALL_PAGE_SIZE, pa, attr, SMALL_PAGE_SHIFT);
        }
        inner.tables.hw().write_barrier();
        Ok(())
    }

    /// Drop small pages mapped through [`CoreVm::map_pages`].
    pub fn unmap_pages(&self, va: VAddr, count: usize) -> Result {
        if !is_aligned(va, SMALL_PAGE_SIZE) {
            return Err(MmError::BadParameters);
        }
        let len = match count.checked_mul(SMALL_PAGE_SIZE) {
            Some(l) => l,
            None => return Err(MmError::BadParameters),
        };
        let mut inner = self.inner.lock();

        let region = match find_map_by_va(inner.map.regions(), va) {
            Some(r) if is_buffer_inside(va, len, r.va, r.size) => *r,
            _ => panic!("va {:#x} does not belong to any mapped region", va),
        };
        if !region.area.is_dynamic() {
            panic!(
                "unmapping pages from statically placed {} at va {:#x}",
                region.area.tag(),
                va
            );
        }

        inner.tables.clear_range(va, len);
        inner.tables.hw().tlb_invalidate_all();
        Ok(())
    }

    /// Switch map storage to exact heap growth once the general allocator
    /// is up.
    pub fn enable_heap_growth(&self) {
        self.inner.lock().map.set_growth(GrowthPolicy::HeapExact);
    }

    /// Dump the current snapshot through the log facade.
    pub fn dump(&self) {
        crate::kernel::mm::debug::dump_map(self.snapshot().regions());
    }
}

impl Drop for CoreVm {
    fn drop(&mut self) {
        // no readers can outlive the service, so the snapshots can go
        let inner = self.inner.get_mut();
        for s in inner.retired.drain(..) {
            unsafe { drop(Box::from_raw(s as *const MapSnapshot as *mut MapSnapshot)) };
        }
        let current = *self.snap.get_mut();
        unsafe { drop(Box::from_raw(current)) };
    }
}
