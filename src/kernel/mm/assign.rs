// Copyright 2025 The Rustee Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Granularity Planning and Virtual Address Assignment
//!
//! Once the memory map is collected this module decides, per region, the
//! mapping granule, and then lays every region out in the core virtual
//! address space around a single anchor address.
//!
//! # Design
//!
//! The kernel image RAM family (and the pager space behind it) must stay
//! contiguous at its link-time offsets from the anchor, so it is packed
//! first. Every other region is placed below the anchor when the anchor
//! sits in the upper half of the address space and above the packed family
//! otherwise. Directory-sized padding is inserted whenever consecutive
//! placements change security domain or shared class, so one last-level
//! table never serves two worlds.
//!
//! Assignment is written to fail soft: any overflow or collision makes the
//! whole candidate anchor report failure so that the randomization loop can
//! try the next candidate. Only the final fixed anchor is allowed to panic.

use log::{debug, error, info};

use crate::kernel::mm::layout::{
    align_down, is_aligned, is_buffer_intersect, MemArea, MmConfig, VAddr, PGDIR_MASK, PGDIR_SIZE,
    SMALL_PAGE_SIZE,
};
use crate::kernel::mm::map::{MemoryMap, MemoryRegion};
use crate::kernel::mm::debug::dump_map;

/// Part of the contiguously packed block at the anchor
fn map_is_kernel_family(region: &MemoryRegion) -> bool {
    region.area.is_kernel_ram() || region.area == MemArea::PagerVaspace
}

/// Pick the mapping granule for every region.
///
/// The kernel image family is always mapped with small pages. Everything
/// else gets a directory-sized block unless the region is too small or its
/// physical base does not sit on a block boundary; such regions fall back
/// to small pages. A region that cannot even be mapped with small pages is
/// a platform configuration error.
pub fn assign_granularity(map: &mut MemoryMap) {
    for r in map.regions_mut() {
        if r.area.is_kernel_ram() {
            r.granule = SMALL_PAGE_SIZE;
        } else if r.size < PGDIR_SIZE || !is_aligned(r.pa, PGDIR_SIZE) {
            r.granule = SMALL_PAGE_SIZE;
        } else {
            r.granule = PGDIR_SIZE;
        }
        if !is_aligned(r.pa, SMALL_PAGE_SIZE) || !is_aligned(r.size, SMALL_PAGE_SIZE) {
            panic!(
                "impossible memory alignment for {} addr {:#x} size {:#x}",
                r.area.tag(),
                r.pa,
                r.size
            );
        }
    }
}

/// Sort the map so regions sharing a translation table end up together:
/// by granule, then physical address, keeping secure and shared mappings
/// apart from the rest.
pub fn sort_for_tables(map: &mut MemoryMap) {
    map.regions_mut().sort_unstable_by_key(|r| {
        (r.granule, r.pa, r.area.is_secure(), r.area.is_shared())
    });
}

/// Reserve virtual space for the part of the image that is demand-paged:
/// whatever is left of the core VA budget once the packed image is
/// accounted for. Inserted right behind the image so the family packing
/// picks it up.
pub fn add_pager_vaspace(map: &mut MemoryMap, cfg: &MmConfig) {
    if !cfg.with_pager {
        return;
    }
    let mut used = cfg.kernel_initial_offs();
    let mut last = None;
    for (n, r) in map.regions().iter().enumerate() {
        if r.area.is_kernel_ram() {
            used += r.size;
            last = Some(n);
        }
    }
    let size = cfg.core_va_size.saturating_sub(used);
    if size == 0 {
        return;
    }
    let at = match last {
        Some(n) => n + 1,
        None => map.len(),
    };
    let mut region = MemoryRegion::va_space(MemArea::PagerVaspace, size);
    region.granule = SMALL_PAGE_SIZE;
    debug!("reserving {:#x} bytes of pager virtual space", size);
    // keep the sort order: the pager space packs right after the image
    let tail: alloc::vec::Vec<_> = (at..map.len()).map(|_| map.remove(at)).collect();
    map.push(region);
    for r in tail {
        map.push(r);
    }
}

fn checked_align_up(va: VAddr, align: usize) -> Option<VAddr> {
    Some(align_down(va.checked_add(align - 1)?, align))
}

/// Lay the whole map out around `anchor`, packing the kernel family in one
/// direction and everything else in the other. Returns false when the
/// anchor cannot host the map (overflow, misalignment or an invalid VA),
/// leaving the caller free to try another anchor.
fn assign_mem_va_dir(anchor: VAddr, map: &mut MemoryMap, cfg: &MmConfig, at_top: bool) -> bool {
    // zero is reserved as the unassigned marker, so it cannot be an anchor
    if anchor == 0 {
        return false;
    }

    for r in map.regions_mut() {
        r.va = 0;
        r.attr = r.area.attr();
    }

    // The kernel image family keeps its link-time offsets from the anchor
    // and always grows upwards.
    let mut va = match anchor.checked_add(cfg.kernel_initial_offs()) {
        Some(va) => va,
        None => return false,
    };
    for r in map.regions_mut() {
        if !map_is_kernel_family(r) {
            continue;
        }
        if !is_aligned(va, r.granule) || !is_aligned(r.size, r.granule) {
            return false;
        }
        r.va = va;
        va = match va.checked_add(r.size) {
            Some(end) => end,
            None => return false,
        };
        if va >= cfg.va_size() {
            return false;
        }
    }

    let mut va_is_secure = true;
    let mut va_is_shared = false;

    if at_top {
        // everything else goes below the anchor, growing downwards
        let mut va = anchor;
        for n in 0..map.len() {
            let r = map.regions()[n];
            if r.va != 0 {
                continue;
            }
            if va_is_secure != r.area.is_secure() {
                va_is_secure = !va_is_secure;
                va = align_down(va, PGDIR_SIZE);
            } else if va_is_shared != r.area.is_shared() {
                va_is_shared = !va_is_shared;
                va = align_down(va, PGDIR_SIZE);
            }
            va = match va.checked_sub(r.size) {
                Some(v) => v,
                None => return false,
            };
            va = align_down(va, r.granule);
            // align va with pa modulo the block size so large regions can
            // use directory maps
            if r.size > 2 * PGDIR_SIZE {
                va = match va.checked_sub(PGDIR_SIZE) {
                    Some(v) => v,
                    None => return false,
                };
                va += r.pa.wrapping_sub(va) & PGDIR_MASK;
            }
            map.regions_mut()[n].va = va;
        }
    } else {
        // everything else goes above the packed family, growing upwards;
        // `va` continues from the family end
        for n in 0..map.len() {
            let r = map.regions()[n];
            if r.va != 0 {
                continue;
            }
            if va_is_secure != r.area.is_secure() {
                va_is_secure = !va_is_secure;
                va = match checked_align_up(va, PGDIR_SIZE) {
                    Some(v) => v,
                    None => return false,
                };
            } else if va_is_shared != r.area.is_shared() {
                va_is_shared = !va_is_shared;
                va = match checked_align_up(va, PGDIR_SIZE) {
                    Some(v) => v,
                    None => return false,
                };
            }
            va = match checked_align_up(va, r.granule) {
                Some(v) => v,
                None => return false,
            };
            if r.size > 2 * PGDIR_SIZE {
                let offs = r.pa.wrapping_sub(va) & PGDIR_MASK;
                va = match va.checked_add(offs) {
                    Some(v) => v,
                    None => return false,
                };
            }
            map.regions_mut()[n].va = va;
            va = match va.checked_add(r.size) {
                Some(v) => v,
                None => return false,
            };
            if va >= cfg.va_size() {
                return false;
            }
        }
    }

    true
}

/// The anchor decides the packing direction: an anchor in the upper half
/// of the address space puts the kernel on top.
pub fn place_kernel_at_top(anchor: VAddr, cfg: &MmConfig) -> bool {
    anchor > cfg.va_size() / 2
}

/// Assign virtual addresses for the given anchor.
pub fn assign_mem_va(anchor: VAddr, map: &mut MemoryMap, cfg: &MmConfig) -> bool {
    assign_mem_va_dir(anchor, map, cfg, place_kernel_at_top(anchor, cfg))
}

/// Add the transient identity mapping of the early MMU-enable code, which
/// must live at `va == pa`. Fails when that spot is already taken by the
/// current layout.
pub fn add_id_map(map: &mut MemoryMap, cfg: &MmConfig) -> bool {
    let area = match cfg.id_map {
        Some(area) => area,
        None => return true,
    };
    let start = align_down(area.base, SMALL_PAGE_SIZE);
    let end = match checked_align_up(area.end(), SMALL_PAGE_SIZE) {
        Some(end) => end,
        None => return false,
    };
    let len = end - start;

    for r in map.regions() {
        if is_buffer_intersect(r.va, r.size, start, len) {
            return false;
        }
    }

    let region = MemoryRegion {
        area: MemArea::IdentityRx,
        pa: start,
        va: start,
        size: len,
        // a directory-sized granule could save a table here at an
        // increased risk of clashing with the rest of the map
        granule: SMALL_PAGE_SIZE,
        attr: MemArea::IdentityRx.attr(),
        dynamic: false,
    };
    map.push(region);
    true
}

/// Derive one randomized anchor candidate from the seed.
///
/// A splitmix-style mixer, masked into the addressable width and aligned
/// to a directory block. Bad candidates (zero, out of room) are rejected
/// by the assignment pass, not here.
pub fn aslr_candidate(cfg: &MmConfig, seed: usize, n: usize) -> VAddr {
    let mut z = (seed as u64).wrapping_add((n as u64 + 1).wrapping_mul(0x9e37_79b9_7f4a_7c15));
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^= z >> 31;
    align_down(z as usize & (cfg.va_size() - 1), PGDIR_SIZE)
}

/// Try each candidate anchor in turn, then fall back to the fixed anchor.
/// Returns the offset of the mapped kernel from its link address.
///
/// The fixed anchor maps the kernel at its physical addresses, so it needs
/// no identity mapping and is not allowed to fail.
pub(crate) fn layout_with_candidates(
    map: &mut MemoryMap,
    cfg: &MmConfig,
    candidates: &[VAddr],
) -> usize {
    let start_addr = cfg.fixed_anchor();

    for &ba in candidates {
        if assign_mem_va(ba, map, cfg) && add_id_map(map, cfg) {
            let offs = ba.wrapping_sub(start_addr);
            info!("mapping core at {:#x} offs {:#x}", ba, offs);
            return offs;
        }
        debug!("failed to map core at {:#x}", ba);
    }
    if !candidates.is_empty() {
        error!("failed to map core at any randomized address");
    }

    if !assign_mem_va(start_addr, map, cfg) {
        panic!("failed to map core at the fixed anchor {:#x}", start_addr);
    }
    0
}

/// Plan granules and lay out the collected map. With a nonzero seed up to
/// `cfg.aslr_candidates` randomized anchors are tried first. Returns the
/// offset of the mapped kernel from its link address.
pub fn init_mem_map(map: &mut MemoryMap, cfg: &MmConfig, seed: usize) -> usize {
    assign_granularity(map);
    // group regions that can share translation tables
    sort_for_tables(map);
    add_pager_vaspace(map, cfg);

    let mut candidates = alloc::vec::Vec::new();
    if seed != 0 {
        for n in 0..cfg.aslr_candidates {
            candidates.push(aslr_candidate(cfg, seed, n));
        }
    }
    let offs = layout_with_candidates(map, cfg, &candidates);

    map.sort_by_va();
    dump_map(map.regions());
    offs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::mm::layout::{PhysArea, SMALL_PAGE_SIZE};
    use crate::kernel::mm::map::{collect_mem_ranges, find_map_by_type, GrowthPolicy};

    fn map_with(regions: &[MemoryRegion]) -> MemoryMap {
        let mut map = MemoryMap::new(16, GrowthPolicy::BootDouble);
        for r in regions {
            map.push(*r);
        }
        map
    }

    fn assert_va_disjoint(map: &MemoryMap) {
        let mut placed: alloc::vec::Vec<_> = map
            .regions()
            .iter()
            .filter(|r| r.size != 0 && r.va != 0)
            .collect();
        placed.sort_by_key(|r| r.va);
        for pair in placed.windows(2) {
            assert!(
                pair[0].end_va() <= pair[1].va,
                "{} [{:#x}..{:#x}] overlaps {} at {:#x}",
                pair[0].area.tag(),
                pair[0].va,
                pair[0].end_va(),
                pair[1].area.tag(),
                pair[1].va
            );
        }
    }

    #[test]
    fn test_granularity_rules() {
        let mut map = map_with(&[
            MemoryRegion::phys(MemArea::KernelRx, 0x0e10_0000, 0x8_0000),
            MemoryRegion::phys(MemArea::NsecRam, 0x4000_0000, 0x1000_0000),
            MemoryRegion::phys(MemArea::SecIo, 0x0900_0000, 0x1000),
            MemoryRegion::phys(MemArea::NsecRam, 0x5010_0000, 0x40_0000),
        ]);
        assign_granularity(&mut map);
        // image is always small-paged, even though it is block aligned
        assert_eq!(map.regions()[0].granule, SMALL_PAGE_SIZE);
        // large aligned DRAM gets directory blocks
        assert_eq!(map.regions()[1].granule, PGDIR_SIZE);
        // too small for a block
        assert_eq!(map.regions()[2].granule, SMALL_PAGE_SIZE);
        // base not on a block boundary
        assert_eq!(map.regions()[3].granule, SMALL_PAGE_SIZE);
    }

    #[test]
    #[should_panic]
    fn test_subpage_alignment_is_fatal() {
        let mut map = map_with(&[MemoryRegion::phys(MemArea::SecIo, 0x0900_0100, 0x1000)]);
        assign_granularity(&mut map);
    }

    #[test]
    fn test_sort_groups_by_granule_then_pa() {
        let mut map = map_with(&[
            MemoryRegion::phys(MemArea::NsecRam, 0x4000_0000, 0x1000_0000),
            MemoryRegion::phys(MemArea::KernelRx, 0x0e10_0000, 0x8_0000),
            MemoryRegion::phys(MemArea::SecIo, 0x0900_0000, 0x1000),
        ]);
        assign_granularity(&mut map);
        sort_for_tables(&mut map);
        let order: alloc::vec::Vec<_> = map.regions().iter().map(|r| r.area).collect();
        assert_eq!(
            order,
            alloc::vec![MemArea::SecIo, MemArea::KernelRx, MemArea::NsecRam]
        );
    }

    fn family_cfg() -> MmConfig {
        MmConfig {
            secure_ram: PhysArea::new(0x1000, 0x3000),
            kernel_rx: PhysArea::new(0x1000, 0x2000),
            kernel_rw: PhysArea::new(0x3000, 0x1000),
            va_width: 32,
            ..Default::default()
        }
    }

    #[test]
    fn test_family_packs_contiguously_from_anchor() {
        let cfg = family_cfg();
        let mut map = map_with(&[
            MemoryRegion::phys(MemArea::KernelRx, 0x1000, 0x2000),
            MemoryRegion::phys(MemArea::KernelRw, 0x3000, 0x1000),
        ]);
        assign_granularity(&mut map);
        sort_for_tables(&mut map);
        assert!(assign_mem_va(0x1000, &mut map, &cfg));

        let rx = find_map_by_type(map.regions(), MemArea::KernelRx).unwrap();
        let rw = find_map_by_type(map.regions(), MemArea::KernelRw).unwrap();
        assert_eq!(rx.va, 0x1000);
        assert_eq!(rw.va, 0x3000);
        assert_eq!(rx.end_va(), rw.va);
        assert_va_disjoint(&map);
    }

    #[test]
    fn test_anchor_low_places_others_above() {
        let cfg = family_cfg();
        let mut map = map_with(&[
            MemoryRegion::phys(MemArea::KernelRx, 0x1000, 0x2000),
            MemoryRegion::phys(MemArea::KernelRw, 0x3000, 0x1000),
            MemoryRegion::phys(MemArea::SecIo, 0x0900_0000, 0x1000),
        ]);
        assign_granularity(&mut map);
        sort_for_tables(&mut map);
        assert!(!place_kernel_at_top(0x1000, &cfg));
        assert!(assign_mem_va(0x1000, &mut map, &cfg));
        let io = find_map_by_type(map.regions(), MemArea::SecIo).unwrap();
        let rw = find_map_by_type(map.regions(), MemArea::KernelRw).unwrap();
        assert!(io.va >= rw.end_va());
        assert_va_disjoint(&map);
    }

    #[test]
    fn test_anchor_high_places_others_below() {
        let cfg = MmConfig {
            va_width: 32,
            secure_ram: PhysArea::new(0xe000_0000, 0x10_0000),
            kernel_rx: PhysArea::new(0xe000_0000, 0x10_0000),
            ..Default::default()
        };
        let anchor = 0xe000_0000;
        assert!(place_kernel_at_top(anchor, &cfg));
        let mut map = map_with(&[
            MemoryRegion::phys(MemArea::KernelRx, 0xe000_0000, 0x10_0000),
            MemoryRegion::phys(MemArea::SecIo, 0x0900_0000, 0x1000),
        ]);
        assign_granularity(&mut map);
        sort_for_tables(&mut map);
        assert!(assign_mem_va(anchor, &mut map, &cfg));
        let io = find_map_by_type(map.regions(), MemArea::SecIo).unwrap();
        assert!(io.end_va() <= anchor);
        assert_va_disjoint(&map);
    }

    #[test]
    fn test_security_transition_gets_block_padding() {
        let cfg = family_cfg();
        let mut map = map_with(&[
            MemoryRegion::phys(MemArea::SecIo, 0x0900_0000, 0x1000),
            MemoryRegion::phys(MemArea::NsecIo, 0x0a00_0000, 0x1000),
        ]);
        assign_granularity(&mut map);
        sort_for_tables(&mut map);
        assert!(assign_mem_va(0x1000, &mut map, &cfg));
        let nsec = find_map_by_type(map.regions(), MemArea::NsecIo).unwrap();
        // the non-secure mapping must start on its own directory block
        assert!(is_aligned(nsec.va, PGDIR_SIZE));
        assert_va_disjoint(&map);
    }

    #[test]
    fn test_large_region_va_matches_pa_modulo_block() {
        let cfg = MmConfig {
            va_width: 32,
            secure_ram: PhysArea::new(0x1000, 0x1000),
            kernel_rx: PhysArea::new(0x1000, 0x1000),
            ..Default::default()
        };
        let mut map = map_with(&[
            MemoryRegion::phys(MemArea::KernelRx, 0x1000, 0x1000),
            // > 2 blocks, base off a block boundary by 0x10_0000
            MemoryRegion::phys(MemArea::NsecRam, 0x4010_0000, 0x80_0000),
        ]);
        assign_granularity(&mut map);
        sort_for_tables(&mut map);
        assert!(assign_mem_va(0x1000, &mut map, &cfg));
        let ram = find_map_by_type(map.regions(), MemArea::NsecRam).unwrap();
        assert_eq!(ram.va & PGDIR_MASK, ram.pa & PGDIR_MASK);
        assert_va_disjoint(&map);
    }

    #[test]
    fn test_zero_anchor_is_rejected() {
        let cfg = family_cfg();
        let mut map = map_with(&[MemoryRegion::phys(MemArea::KernelRx, 0x1000, 0x2000)]);
        assign_granularity(&mut map);
        assert!(!assign_mem_va(0, &mut map, &cfg));
    }

    #[test]
    fn test_id_map_appends_identity_region() {
        let mut cfg = family_cfg();
        cfg.id_map = Some(PhysArea::new(0x0070_0000, 0x800));
        let mut map = map_with(&[
            MemoryRegion::phys(MemArea::KernelRx, 0x1000, 0x2000),
            MemoryRegion::phys(MemArea::KernelRw, 0x3000, 0x1000),
        ]);
        assign_granularity(&mut map);
        sort_for_tables(&mut map);
        assert!(assign_mem_va(0x1000, &mut map, &cfg));
        assert!(add_id_map(&mut map, &cfg));
        let id = find_map_by_type(map.regions(), MemArea::IdentityRx).unwrap();
        assert_eq!(id.va, id.pa);
        assert_eq!(id.va, 0x0070_0000);
        assert_eq!(id.size, SMALL_PAGE_SIZE);
        assert_va_disjoint(&map);
    }

    #[test]
    fn test_id_map_collision_fails_candidate() {
        let mut cfg = family_cfg();
        // identity range right where the image is mapped
        cfg.id_map = Some(PhysArea::new(0x1800, 0x100));
        let mut map = map_with(&[MemoryRegion::phys(MemArea::KernelRx, 0x1000, 0x2000)]);
        assign_granularity(&mut map);
        assert!(assign_mem_va(0x1000, &mut map, &cfg));
        assert!(!add_id_map(&mut map, &cfg));
    }

    #[test]
    fn test_all_candidates_fail_falls_back_to_fixed_anchor() {
        let cfg = family_cfg();
        let mut map = map_with(&[
            MemoryRegion::phys(MemArea::KernelRx, 0x1000, 0x2000),
            MemoryRegion::phys(MemArea::KernelRw, 0x3000, 0x1000),
        ]);
        assign_granularity(&mut map);
        sort_for_tables(&mut map);
        // zero is never a valid anchor, so every candidate collides
        let offs = layout_with_candidates(&mut map, &cfg, &[0, 0, 0]);
        assert_eq!(offs, 0);
        let rx = find_map_by_type(map.regions(), MemArea::KernelRx).unwrap();
        assert_eq!(rx.va, cfg.fixed_anchor());
        assert_va_disjoint(&map);
    }

    #[test]
    fn test_full_layout_with_seed() {
        let cfg = MmConfig {
            secure_ram: PhysArea::new(0x0e00_0000, 0x0100_0000),
            kernel_rx: PhysArea::new(0x0e10_0000, 0x8_0000),
            kernel_ro: PhysArea::new(0x0e18_0000, 0x2_0000),
            kernel_rw: PhysArea::new(0x0e1a_0000, 0x6_0000),
            nsec_shared: Some(PhysArea::new(0x4200_0000, 0x20_0000)),
            discovered_nsec_ddr: alloc::vec![PhysArea::new(0x4000_0000, 0x1000_0000)],
            id_map: Some(PhysArea::new(0x0e10_0000, 0x1000)),
            ..Default::default()
        };
        let mut map = MemoryMap::new(16, GrowthPolicy::BootDouble);
        collect_mem_ranges(&mut map, &cfg);
        let offs = init_mem_map(&mut map, &cfg, 0x1234_5678);

        assert_va_disjoint(&map);
        // family stays contiguous wherever it landed
        let rx = find_map_by_type(map.regions(), MemArea::KernelRx).unwrap();
        let ro = find_map_by_type(map.regions(), MemArea::KernelRo).unwrap();
        let rw = find_map_by_type(map.regions(), MemArea::KernelRw).unwrap();
        assert_eq!(rx.end_va(), ro.va);
        assert_eq!(ro.end_va(), rw.va);
        // the image moved by the reported offset
        assert_eq!(rx.va, cfg.kernel_rx.base.wrapping_add(offs));
        // final order is by ascending VA
        for pair in map.regions().windows(2) {
            assert!(pair[0].va <= pair[1].va);
        }
        map.check(&cfg.windows());
    }

    #[test]
    fn test_layout_without_seed_uses_fixed_anchor() {
        let cfg = MmConfig {
            secure_ram: PhysArea::new(0x0e00_0000, 0x0100_0000),
            kernel_rx: PhysArea::new(0x0e10_0000, 0x8_0000),
            kernel_ro: PhysArea::new(0x0e18_0000, 0x2_0000),
            kernel_rw: PhysArea::new(0x0e1a_0000, 0x6_0000),
            ..Default::default()
        };
        let mut map = MemoryMap::new(16, GrowthPolicy::BootDouble);
        collect_mem_ranges(&mut map, &cfg);
        let offs = init_mem_map(&mut map, &cfg, 0);
        assert_eq!(offs, 0);
        let rx = find_map_by_type(map.regions(), MemArea::KernelRx).unwrap();
        assert_eq!(rx.va, cfg.kernel_rx.base);
    }

    #[test]
    fn test_pager_vaspace_fills_core_va_budget() {
        let cfg = MmConfig {
            secure_ram: PhysArea::new(0x0e00_0000, 0x0100_0000),
            kernel_rx: PhysArea::new(0x0e00_0000, 0x8_0000),
            kernel_ro: PhysArea::new(0x0e08_0000, 0x2_0000),
            kernel_rw: PhysArea::new(0x0e0a_0000, 0x6_0000),
            core_va_size: 0x20_0000,
            with_pager: true,
            ..Default::default()
        };
        let mut map = MemoryMap::new(16, GrowthPolicy::BootDouble);
        collect_mem_ranges(&mut map, &cfg);
        let _ = init_mem_map(&mut map, &cfg, 0);

        let pager = find_map_by_type(map.regions(), MemArea::PagerVaspace).unwrap();
        assert_eq!(pager.size, 0x20_0000 - 0x10_0000);
        // packed directly after the image
        let rw = find_map_by_type(map.regions(), MemArea::KernelRw).unwrap();
        assert_eq!(pager.va, rw.end_va());
        assert_va_disjoint(&map);
    }
}
