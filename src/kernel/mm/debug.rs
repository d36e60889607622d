// Copyright 2025 The Rustee Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Memory Map Dump
//!
//! Human-readable dump of a region list through the log facade, used right
//! after layout and available to the embedding kernel for postmortems.

use log::debug;

use crate::kernel::mm::layout::SMALL_PAGE_SIZE;
use crate::kernel::mm::map::MemoryRegion;

/// Log one line per region: area, VA range, backing PA and granule.
pub fn dump_map(regions: &[MemoryRegion]) {
    for r in regions {
        let granule = match r.granule {
            SMALL_PAGE_SIZE => "smallpg",
            0 => "unset",
            _ => "pgdir",
        };
        debug!(
            "type {:<15} va {:#010x}..{:#010x} pa {:#010x}..{:#010x} size {:#08x} ({})",
            r.area.tag(),
            r.va,
            r.end_va(),
            r.pa,
            r.end_pa(),
            r.size,
            granule
        );
    }
}
