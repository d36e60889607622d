// Copyright 2025 The Rustee Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Property-based tests for the map builder and the layout engine:
//! coverage is preserved by merging and carving, and every layout the
//! engine accepts is disjoint and aligned.

use proptest::prelude::*;

use super::assign::init_mem_map;
use super::layout::{
    align_down, align_up, is_aligned, MemArea, PhysArea, MmConfig, PAddr, PGDIR_SIZE,
    SMALL_PAGE_SIZE,
};
use super::map::{GrowthPolicy, MemoryMap};

fn arb_page_range() -> impl Strategy<Value = (PAddr, usize)> {
    (0usize..0x8_0000, 1usize..64).prop_map(|(page, pages)| {
        (page * SMALL_PAGE_SIZE, pages * SMALL_PAGE_SIZE)
    })
}

/// Total bytes in the union of a set of ranges, by sweep
fn union_bytes(ranges: &[(PAddr, usize)]) -> usize {
    let mut sorted: alloc::vec::Vec<_> = ranges.to_vec();
    sorted.sort_unstable();
    let mut total = 0;
    let mut end = 0;
    for &(base, size) in &sorted {
        let stop = base + size;
        if base > end {
            total += size;
            end = stop;
        } else if stop > end {
            total += stop - end;
            end = stop;
        }
    }
    total
}

proptest! {
    #[test]
    fn alignment_brackets_the_address(addr in 0usize..(1usize << 48), shift in 12u32..22) {
        let align = 1usize << shift;
        let down = align_down(addr, align);
        let up = align_up(addr, align);
        prop_assert!(down <= addr);
        prop_assert!(addr - down < align);
        prop_assert!(is_aligned(down, align));
        prop_assert!(is_aligned(up, align));
        prop_assert!(up >= addr);
        prop_assert!(up - addr < align);
    }

    #[test]
    fn merge_preserves_coverage(ranges in proptest::collection::vec(arb_page_range(), 1..12)) {
        let mut map = MemoryMap::new(4, GrowthPolicy::BootDouble);
        for &(base, size) in &ranges {
            map.add_phys_mem("prop", MemArea::NsecRam, base, size);
        }
        // merged regions are sorted, pairwise disjoint and non-touching
        for pair in map.regions().windows(2) {
            prop_assert!(pair[0].end_pa() < pair[1].pa);
        }
        let covered: usize = map.regions().iter().map(|r| r.size).sum();
        prop_assert_eq!(covered, union_bytes(&ranges));
    }

    #[test]
    fn merge_is_idempotent(ranges in proptest::collection::vec(arb_page_range(), 1..8)) {
        let mut map = MemoryMap::new(4, GrowthPolicy::BootDouble);
        for &(base, size) in &ranges {
            map.add_phys_mem("prop", MemArea::NsecRam, base, size);
        }
        let once = map.regions().to_vec();
        for &(base, size) in &ranges {
            map.add_phys_mem("prop_again", MemArea::NsecRam, base, size);
        }
        prop_assert_eq!(map.regions(), &once[..]);
    }

    #[test]
    fn carve_out_excludes_the_window(
        ranges in proptest::collection::vec(arb_page_range(), 1..8),
        window in arb_page_range(),
    ) {
        let window = PhysArea::new(window.0, window.1);
        let mut map = MemoryMap::new(4, GrowthPolicy::BootDouble);
        for &(base, size) in &ranges {
            map.add_phys_mem("prop", MemArea::NsecRam, base, size);
        }
        let before: usize = map.regions().iter().map(|r| r.size).sum();
        map.carve_out(window, |_| false);
        for r in map.regions() {
            prop_assert!(!window.intersects_buf(r.pa, r.size));
            prop_assert!(r.size > 0);
        }
        // nothing outside the window was lost
        let after: usize = map.regions().iter().map(|r| r.size).sum();
        prop_assert!(after <= before);
        prop_assert!(before - after <= window.size);
    }

    #[test]
    fn layout_is_disjoint_and_aligned(
        ram_block in 8usize..512,
        seed in any::<usize>(),
    ) {
        // secure RAM somewhere in the first gigabyte, block aligned
        let ram_base = ram_block * PGDIR_SIZE;
        let cfg = MmConfig {
            secure_ram: PhysArea::new(ram_base, 0x0100_0000),
            kernel_rx: PhysArea::new(ram_base + 0x10_0000, 0x8_0000),
            kernel_ro: PhysArea::new(ram_base + 0x18_0000, 0x2_0000),
            kernel_rw: PhysArea::new(ram_base + 0x1a_0000, 0x6_0000),
            nsec_shared: Some(PhysArea::new(0x4200_0000, 0x20_0000)),
            discovered_nsec_ddr: alloc::vec![PhysArea::new(0x4000_0000, 0x1000_0000)],
            ..Default::default()
        };
        let mut map = MemoryMap::new(cfg.map_capacity, GrowthPolicy::BootDouble);
        super::map::collect_mem_ranges(&mut map, &cfg);
        init_mem_map(&mut map, &cfg, seed);

        let regions: alloc::vec::Vec<_> =
            map.regions().iter().filter(|r| r.size > 0).collect();
        for r in &regions {
            prop_assert!(r.granule > 0);
            prop_assert!(is_aligned(r.va, r.granule));
            prop_assert!(is_aligned(r.size, SMALL_PAGE_SIZE));
            prop_assert!(r.end_va() <= cfg.va_size());
        }
        // no two regions share a virtual byte
        for (i, a) in regions.iter().enumerate() {
            for b in regions.iter().skip(i + 1) {
                prop_assert!(a.end_va() <= b.va || b.end_va() <= a.va);
            }
        }
        // the image keeps its link-time internal offsets
        let rx = super::map::find_map_by_type(map.regions(), MemArea::KernelRx).unwrap();
        let ro = super::map::find_map_by_type(map.regions(), MemArea::KernelRo).unwrap();
        let rw = super::map::find_map_by_type(map.regions(), MemArea::KernelRw).unwrap();
        prop_assert_eq!(ro.va - rx.va, ro.pa - rx.pa);
        prop_assert_eq!(rw.va - rx.va, rw.pa - rx.pa);
    }

    #[test]
    fn layout_is_deterministic(seed in any::<usize>()) {
        let cfg = MmConfig {
            secure_ram: PhysArea::new(0x0e00_0000, 0x0100_0000),
            kernel_rx: PhysArea::new(0x0e10_0000, 0x8_0000),
            kernel_ro: PhysArea::new(0x0e18_0000, 0x2_0000),
            kernel_rw: PhysArea::new(0x0e1a_0000, 0x6_0000),
            discovered_nsec_ddr: alloc::vec![PhysArea::new(0x4000_0000, 0x1000_0000)],
            ..Default::default()
        };
        let mut first = MemoryMap::new(cfg.map_capacity, GrowthPolicy::BootDouble);
        super::map::collect_mem_ranges(&mut first, &cfg);
        let offs_first = init_mem_map(&mut first, &cfg, seed);
        let mut second = MemoryMap::new(cfg.map_capacity, GrowthPolicy::BootDouble);
        super::map::collect_mem_ranges(&mut second, &cfg);
        let offs_second = init_mem_map(&mut second, &cfg, seed);
        prop_assert_eq!(offs_first, offs_second);
        prop_assert_eq!(first.regions(), second.regions());
    }
}
