// Copyright 2025 The Rustee Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Core Memory Map
//!
//! This module owns the ordered collection of memory regions that describes
//! the whole core address space, and the boot-time operations that build it:
//! collecting platform ranges, merging same-type neighbours, and carving
//! reserved windows out of overlapping regions.
//!
//! # Design
//!
//! The map is kept sorted at all times. Before virtual addresses exist the
//! sort key is `(area, pa)` so that same-type regions are adjacent and merge
//! in one pass; after VA assignment the map is re-sorted by ascending VA and
//! stays that way for the rest of the kernel's life.
//!
//! Entry storage growth is a pluggable policy because the map is built twice
//! over during boot: first while only the bump allocator exists (doubling is
//! cheap there, the memory is reclaimed wholesale) and later on the general
//! heap (exact growth, the allocation is permanent).

use log::{debug, error};

use alloc::vec::Vec;

use crate::kernel::mm::layout::{
    is_buffer_inside, is_buffer_intersect, MemArea, MemAttr, MmConfig, PAddr, PhysArea,
    SecurityWindows, VAddr, SMALL_PAGE_SIZE,
};

/// ============================================================================
/// Regions
/// ============================================================================

/// One contiguous region of the core memory map.
///
/// `va`, `granule` and `attr` stay zero until the assignment phase has run;
/// pure virtual-space reservations keep `pa == 0` forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub area: MemArea,
    pub pa: PAddr,
    pub va: VAddr,
    pub size: usize,
    /// Mapping granule, small page or directory-sized block
    pub granule: usize,
    pub attr: MemAttr,
    /// Created by a runtime mapping request (and thus removable)
    pub dynamic: bool,
}

impl MemoryRegion {
    /// A physical region, before VA assignment
    pub fn phys(area: MemArea, pa: PAddr, size: usize) -> Self {
        MemoryRegion {
            area,
            pa,
            va: 0,
            size,
            granule: 0,
            attr: MemAttr::empty(),
            dynamic: false,
        }
    }

    /// A virtual-space reservation without physical backing
    pub fn va_space(area: MemArea, size: usize) -> Self {
        MemoryRegion {
            area,
            pa: 0,
            va: 0,
            size,
            granule: 0,
            attr: MemAttr::empty(),
            dynamic: false,
        }
    }

    /// Exclusive physical end address
    pub fn end_pa(&self) -> PAddr {
        self.pa + self.size
    }

    /// Exclusive virtual end address
    pub fn end_va(&self) -> VAddr {
        self.va + self.size
    }

    pub fn contains_pa(&self, pa: PAddr) -> bool {
        pa >= self.pa && pa < self.end_pa()
    }

    pub fn contains_va(&self, va: VAddr) -> bool {
        va >= self.va && va < self.end_va()
    }
}

/// Same area type and physically touching or overlapping
fn regions_mergeable(a: &MemoryRegion, b: &MemoryRegion) -> bool {
    a.area == b.area && a.pa <= b.end_pa() && b.pa <= a.end_pa()
}

/// Extend `a` to the union of both extents
fn merge_into(a: &mut MemoryRegion, b: &MemoryRegion) {
    let end = a.end_pa().max(b.end_pa());
    a.pa = a.pa.min(b.pa);
    a.size = end - a.pa;
}

/// ============================================================================
/// The Map and Its Growth Policy
/// ============================================================================

/// How the map reacts when its entry budget runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrowthPolicy {
    /// Running out of entries is fatal
    Fixed,
    /// Double the budget (boot bump allocator, memory reclaimed later)
    BootDouble,
    /// Grow by exactly one entry (general heap, allocation is permanent)
    HeapExact,
}

/// The ordered core memory map.
#[derive(Debug, Clone)]
pub struct MemoryMap {
    regions: Vec<MemoryRegion>,
    capacity: usize,
    growth: GrowthPolicy,
}

impl MemoryMap {
    pub fn new(capacity: usize, growth: GrowthPolicy) -> Self {
        MemoryMap {
            regions: Vec::with_capacity(capacity),
            capacity,
            growth,
        }
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn regions(&self) -> &[MemoryRegion] {
        &self.regions
    }

    pub fn regions_mut(&mut self) -> &mut [MemoryRegion] {
        &mut self.regions
    }

    pub fn growth(&self) -> GrowthPolicy {
        self.growth
    }

    /// Switch the growth policy once the general allocator is available.
    pub fn set_growth(&mut self, growth: GrowthPolicy) {
        self.growth = growth;
    }

    fn ensure_slot(&mut self) {
        if self.regions.len() < self.capacity {
            return;
        }
        match self.growth {
            GrowthPolicy::Fixed => {
                panic!("out of entries ({}) in the core memory map", self.capacity)
            }
            GrowthPolicy::BootDouble => {
                self.capacity *= 2;
                self.regions.reserve(self.capacity - self.regions.len());
                debug!("boot memory map grown to {} entries", self.capacity);
            }
            GrowthPolicy::HeapExact => {
                self.capacity += 1;
                self.regions.reserve(1);
            }
        }
    }

    /// Append a region at the end (the map must be re-sorted afterwards if
    /// order matters to the caller).
    pub fn push(&mut self, region: MemoryRegion) {
        self.ensure_slot();
        self.regions.push(region);
    }

    pub fn remove(&mut self, index: usize) -> MemoryRegion {
        self.regions.remove(index)
    }

    /// Register physical memory, keeping the map sorted by `(area, pa)` and
    /// merging same-type regions that touch or overlap. After a merge both
    /// neighbours are re-checked once, which is all it can take since the
    /// map was merged before the insertion.
    pub fn add_phys_mem(&mut self, name: &str, area: MemArea, pa: PAddr, size: usize) {
        if size == 0 {
            debug!("ignoring empty physical area {} ({})", name, area.tag());
            return;
        }
        if pa.checked_add(size).is_none() {
            panic!("physical area {} wraps the address space", name);
        }
        debug!(
            "registering {} type {} addr {:#x} size {:#x}",
            name,
            area.tag(),
            pa,
            size
        );

        let mut n = 0;
        while n < self.regions.len() {
            let r = &self.regions[n];
            if (area, pa) <= (r.area, r.pa) {
                break;
            }
            n += 1;
        }

        let new = MemoryRegion::phys(area, pa, size);

        if n < self.regions.len() && regions_mergeable(&new, &self.regions[n]) {
            merge_into(&mut self.regions[n], &new);
            if n + 1 < self.regions.len() {
                let next = self.regions[n + 1];
                if regions_mergeable(&self.regions[n], &next) {
                    merge_into(&mut self.regions[n], &next);
                    self.regions.remove(n + 1);
                }
            }
            if n > 0 {
                let cur = self.regions[n];
                if regions_mergeable(&self.regions[n - 1], &cur) {
                    merge_into(&mut self.regions[n - 1], &cur);
                    self.regions.remove(n);
                }
            }
            return;
        }

        if n > 0 {
            let prev = self.regions[n - 1];
            if regions_mergeable(&prev, &new) {
                merge_into(&mut self.regions[n - 1], &new);
                if n < self.regions.len() {
                    let cur = self.regions[n];
                    if regions_mergeable(&self.regions[n - 1], &cur) {
                        merge_into(&mut self.regions[n - 1], &cur);
                        self.regions.remove(n);
                    }
                }
                return;
            }
        }

        self.ensure_slot();
        self.regions.insert(n, new);
    }

    /// Reserve virtual space without physical backing, inserted in area
    /// type order.
    pub fn add_va_space(&mut self, area: MemArea, size: usize) {
        if size == 0 {
            debug!("ignoring empty virtual space reservation ({})", area.tag());
            return;
        }
        debug!("reserving {} size {:#x}", area.tag(), size);
        let mut n = 0;
        while n < self.regions.len() && self.regions[n].area < area {
            n += 1;
        }
        self.ensure_slot();
        self.regions.insert(n, MemoryRegion::va_space(area, size));
    }

    /// Carve `window` out of every region for which `exempt` is false:
    /// a fully covered region is deleted, a strictly interior window splits
    /// the region in two, anything else trims an edge.
    pub fn carve_out(&mut self, window: PhysArea, exempt: impl Fn(MemArea) -> bool) {
        if window.is_empty() {
            return;
        }
        let mut n = 0;
        while n < self.regions.len() {
            let r = self.regions[n];
            if exempt(r.area)
                || r.area.is_va_space()
                || !is_buffer_intersect(r.pa, r.size, window.base, window.size)
            {
                n += 1;
                continue;
            }
            debug!(
                "carving [{:#x}..{:#x}] out of {} [{:#x}..{:#x}]",
                window.base,
                window.end(),
                r.area.tag(),
                r.pa,
                r.end_pa()
            );
            if is_buffer_inside(r.pa, r.size, window.base, window.size) {
                // fully covered, drop the region
                self.regions.remove(n);
                continue;
            }
            if window.base > r.pa && window.end() < r.end_pa() {
                // strictly interior, split in two
                let mut tail = r;
                tail.pa = window.end();
                tail.size = r.end_pa() - window.end();
                self.regions[n].size = window.base - r.pa;
                self.ensure_slot();
                self.regions.insert(n + 1, tail);
                n += 2;
                continue;
            }
            if window.base <= r.pa {
                // trim the front
                self.regions[n].pa = window.end();
                self.regions[n].size = r.end_pa() - window.end();
            } else {
                // trim the tail
                self.regions[n].size = window.base - r.pa;
            }
            n += 1;
        }
    }

    /// Sort the map by ascending virtual address. This is the final order;
    /// the runtime lookup paths depend on it.
    pub fn sort_by_va(&mut self) {
        self.regions.sort_unstable_by_key(|r| r.va);
    }

    /// Validate the finished map against the security windows.
    ///
    /// Secure RAM must sit inside a secure window, the shared-memory region
    /// inside the non-secure window, and nothing except the covering region
    /// may still intersect a reserved window after carving. Any violation
    /// means the platform configuration lied to us, which is fatal.
    pub fn check(&self, windows: &SecurityWindows) {
        for r in &self.regions {
            if r.area.is_va_space() {
                continue;
            }
            match r.area {
                MemArea::KernelRx
                | MemArea::KernelRo
                | MemArea::KernelRw
                | MemArea::SecRamOverall
                | MemArea::SecRam => {
                    if !windows.pa_is_secure(r.pa, r.size) {
                        panic!(
                            "{} [{:#x}..{:#x}] outside secure memory",
                            r.area.tag(),
                            r.pa,
                            r.end_pa()
                        );
                    }
                }
                MemArea::NsecShm => {
                    if !windows.pa_is_nsec_shared(r.pa, r.size) {
                        panic!(
                            "NSEC_SHM [{:#x}..{:#x}] outside the non-secure shared window",
                            r.pa,
                            r.end_pa()
                        );
                    }
                }
                _ => {
                    for w in windows.nsec_shared.iter().chain(windows.sdp.iter()) {
                        if w.intersects_buf(r.pa, r.size) {
                            panic!(
                                "{} [{:#x}..{:#x}] intersects reserved window [{:#x}..{:#x}]",
                                r.area.tag(),
                                r.pa,
                                r.end_pa(),
                                w.base,
                                w.end()
                            );
                        }
                    }
                }
            }
        }
    }
}

/// ============================================================================
/// Lookups
/// ============================================================================
///
/// These run against a region slice so the same code serves both the
/// mutable boot-time map and the published read snapshots.

pub fn find_map_by_va(regions: &[MemoryRegion], va: VAddr) -> Option<&MemoryRegion> {
    regions.iter().find(|r| r.size != 0 && r.contains_va(va))
}

pub fn find_map_by_type(regions: &[MemoryRegion], area: MemArea) -> Option<&MemoryRegion> {
    regions.iter().find(|r| r.area == area)
}

pub fn find_map_by_type_and_pa(
    regions: &[MemoryRegion],
    area: MemArea,
    pa: PAddr,
    len: usize,
) -> Option<&MemoryRegion> {
    regions
        .iter()
        .find(|r| r.area == area && is_buffer_inside(pa, len.max(1), r.pa, r.size))
}

/// First physically backed region containing `pa`
pub fn find_map_by_pa(regions: &[MemoryRegion], pa: PAddr) -> Option<&MemoryRegion> {
    regions
        .iter()
        .find(|r| !r.area.is_va_space() && r.size != 0 && r.contains_pa(pa))
}

/// ============================================================================
/// Collector
/// ============================================================================

/// Gather every physical range the platform registered into `map`, carve
/// the reserved windows, and append the runtime virtual-space reservations.
pub fn collect_mem_ranges(map: &mut MemoryMap, cfg: &MmConfig) {
    let windows = cfg.windows();

    // Kernel image split plus the covering secure RAM region. The covering
    // region spans what the image segments do not.
    if cfg.kernel_rx.is_empty() {
        map.add_phys_mem(
            "secure_ram",
            MemArea::SecRamOverall,
            cfg.secure_ram.base,
            cfg.secure_ram.size,
        );
    } else {
        map.add_phys_mem(
            "secure_ram_head",
            MemArea::SecRamOverall,
            cfg.secure_ram.base,
            cfg.kernel_initial_offs(),
        );
        map.add_phys_mem("kernel_rx", MemArea::KernelRx, cfg.kernel_rx.base, cfg.kernel_rx.size);
        map.add_phys_mem("kernel_ro", MemArea::KernelRo, cfg.kernel_ro.base, cfg.kernel_ro.size);
        map.add_phys_mem("kernel_rw", MemArea::KernelRw, cfg.kernel_rw.base, cfg.kernel_rw.size);
        if cfg.secure_ram.end() > cfg.kernel_rw.end() {
            map.add_phys_mem(
                "secure_ram_tail",
                MemArea::SecRamOverall,
                cfg.kernel_rw.end(),
                cfg.secure_ram.end() - cfg.kernel_rw.end(),
            );
        }
    }
    if let Some(extra) = cfg.secure_ram_extra {
        map.add_phys_mem("secure_ram_extra", MemArea::SecRam, extra.base, extra.size);
    }

    for entry in &cfg.static_mem {
        map.add_phys_mem(entry.name, entry.area, entry.base, entry.size);
    }

    // Manifest-declared device regions come pre-normalized; anything that
    // still is not page-granular cannot be mapped and is skipped.
    for entry in &cfg.device_mem {
        if entry.base % SMALL_PAGE_SIZE != 0 || entry.size % SMALL_PAGE_SIZE != 0 {
            error!(
                "skipping misaligned device region {} addr {:#x} size {:#x}",
                entry.name, entry.base, entry.size
            );
            continue;
        }
        map.add_phys_mem(entry.name, entry.area, entry.base, entry.size);
    }

    if let Some(shm) = cfg.nsec_shared {
        map.add_phys_mem("nsec_shared", MemArea::NsecShm, shm.base, shm.size);
    }

    let mut ddr = cfg.discovered_nsec_ddr.clone();
    ddr.sort_unstable_by_key(|area| area.base);
    for area in &ddr {
        map.add_phys_mem("nsec_ddr", MemArea::NsecRam, area.base, area.size);
    }

    // Reserved windows become holes. The secure windows are only pulled out
    // of non-secure memory; the shared and data-path windows out of
    // everything except the covering region and the window's own mapping.
    for sec in windows.secure {
        map.carve_out(sec, |area| area.is_secure());
    }
    if let Some(shm) = windows.nsec_shared {
        map.carve_out(shm, |area| {
            area == MemArea::NsecShm || area == MemArea::SecRamOverall
        });
    }
    if let Some(sdp) = windows.sdp {
        map.carve_out(sdp, |area| area == MemArea::SecRamOverall);
    }

    map.add_va_space(MemArea::ResVaspace, cfg.res_vaspace_size);
    map.add_va_space(MemArea::DynVaspace, cfg.dyn_vaspace_size);
}
