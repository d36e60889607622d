// Copyright 2025 The Rustee Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Physical Memory Layout Definitions
//!
//! This module defines the vocabulary of the memory-map engine: address
//! types, mapping granules, the memory-area classification used by every
//! region in the core map, and the security windows discovered at boot.
//!
//! # Design Principles
//!
//! 1. **Two granules only** - Regions are mapped either with small pages or
//!    with directory-sized blocks, never anything in between
//! 2. **Attributes derive from the area type** - A region's mapping
//!    attributes are a pure function of its [`MemArea`]
//! 3. **Windows are immutable** - The secure / non-secure partition is fixed
//!    once discovered; afterwards it only answers membership queries

use bitflags::bitflags;

use alloc::vec::Vec;

/// Virtual address type
pub type VAddr = usize;

/// Physical address type
pub type PAddr = usize;

/// Small page size (4KB)
pub const SMALL_PAGE_SIZE: usize = 4096;

/// Small page shift for quick division/multiplication
pub const SMALL_PAGE_SHIFT: u32 = 12;

/// Mask for small-page-aligned addresses
pub const SMALL_PAGE_MASK: usize = SMALL_PAGE_SIZE - 1;

/// Directory-sized block shift (one last-level table's worth of VA)
pub const PGDIR_SHIFT: u32 = 21;

/// Directory-sized block (2MB)
pub const PGDIR_SIZE: usize = 1 << PGDIR_SHIFT;

/// Mask for block-aligned addresses
pub const PGDIR_MASK: usize = PGDIR_SIZE - 1;

/// Align an address down to a power-of-two boundary
#[inline]
pub const fn align_down(addr: usize, align: usize) -> usize {
    addr & !(align - 1)
}

/// Align an address up to a power-of-two boundary
#[inline]
pub const fn align_up(addr: usize, align: usize) -> usize {
    (addr + align - 1) & !(align - 1)
}

/// Check whether an address sits on a power-of-two boundary
#[inline]
pub const fn is_aligned(addr: usize, align: usize) -> bool {
    addr & (align - 1) == 0
}

/// Align down to a small page
#[inline]
pub const fn page_align_down(addr: usize) -> usize {
    align_down(addr, SMALL_PAGE_SIZE)
}

/// Align up to a small page
#[inline]
pub const fn page_align_up(addr: usize) -> usize {
    align_up(addr, SMALL_PAGE_SIZE)
}

/// Check small-page alignment
#[inline]
pub const fn is_page_aligned(addr: usize) -> bool {
    is_aligned(addr, SMALL_PAGE_SIZE)
}

/// Check that `[b, b + bl)` lies fully inside `[a, a + al)`.
///
/// Empty buffers are never inside anything and arithmetic overflow makes
/// the answer `false` rather than wrapping.
pub fn is_buffer_inside(b: usize, bl: usize, a: usize, al: usize) -> bool {
    if bl == 0 || al == 0 {
        return false;
    }
    let b_end = match b.checked_add(bl) {
        Some(end) => end,
        None => return false,
    };
    let a_end = match a.checked_add(al) {
        Some(end) => end,
        None => return false,
    };
    b >= a && b_end <= a_end
}

/// Check that `[b, b + bl)` and `[a, a + al)` share at least one byte.
pub fn is_buffer_intersect(b: usize, bl: usize, a: usize, al: usize) -> bool {
    if bl == 0 || al == 0 {
        return false;
    }
    let b_end = match b.checked_add(bl) {
        Some(end) => end,
        None => return false,
    };
    let a_end = match a.checked_add(al) {
        Some(end) => end,
        None => return false,
    };
    b < a_end && a < b_end
}

bitflags! {
    /// Mapping attributes carried by a memory-map region.
    ///
    /// These are the architecture-neutral bits; a `TableHw` implementation
    /// turns them into whatever the hardware table format wants.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MemAttr: u32 {
        /// Entry is valid / present
        const VALID  = 1 << 0;
        /// Secure-world mapping
        const SECURE = 1 << 1;
        /// Readable
        const READ   = 1 << 2;
        /// Writable
        const WRITE  = 1 << 3;
        /// Executable
        const EXEC   = 1 << 4;
        /// Write-back cacheable normal memory
        const CACHED = 1 << 5;
        /// Device memory attributes
        const DEVICE = 1 << 6;
        /// Entry points at a next-level table
        const TABLE  = 1 << 7;
    }
}

/// ============================================================================
/// Memory Area Classification
/// ============================================================================

/// Classification of every region in the core memory map.
///
/// The declaration order is the insertion order of the map before virtual
/// addresses are assigned; regions of the same area type sort by physical
/// address within their group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MemArea {
    /// Kernel image, executable part
    KernelRx,
    /// Kernel image, read-only data
    KernelRo,
    /// Kernel image, writable data and heap
    KernelRw,
    /// Covering region for the whole secure RAM carveout
    SecRamOverall,
    /// Additional secure RAM outside the kernel image
    SecRam,
    /// Non-secure DRAM discovered from firmware
    NsecRam,
    /// Non-secure shared memory window
    NsecShm,
    /// Secure device registers
    SecIo,
    /// Non-secure device registers
    NsecIo,
    /// External device tree blob
    ExtDt,
    /// Reserved virtual space carved at runtime by contiguous mappings
    ResVaspace,
    /// Dynamic virtual space populated page-by-page at runtime
    DynVaspace,
    /// Virtual space reserved for the demand-paged part of the image
    PagerVaspace,
    /// Transient identity mapping of the early MMU-enable code
    IdentityRx,
}

impl MemArea {
    /// Derive the mapping attributes for a region of this area type.
    ///
    /// Pure virtual-space reservations carry no attributes at all; their
    /// entries are programmed when something is mapped into them.
    pub fn attr(self) -> MemAttr {
        let rw = MemAttr::READ | MemAttr::WRITE;
        match self {
            MemArea::KernelRx | MemArea::IdentityRx => {
                MemAttr::VALID | MemAttr::SECURE | MemAttr::READ | MemAttr::EXEC | MemAttr::CACHED
            }
            MemArea::KernelRo | MemArea::ExtDt => {
                MemAttr::VALID | MemAttr::SECURE | MemAttr::READ | MemAttr::CACHED
            }
            MemArea::KernelRw | MemArea::SecRamOverall | MemArea::SecRam => {
                MemAttr::VALID | MemAttr::SECURE | rw | MemAttr::CACHED
            }
            MemArea::NsecRam | MemArea::NsecShm => MemAttr::VALID | rw | MemAttr::CACHED,
            MemArea::SecIo => MemAttr::VALID | MemAttr::SECURE | rw | MemAttr::DEVICE,
            MemArea::NsecIo => MemAttr::VALID | rw | MemAttr::DEVICE,
            MemArea::ResVaspace | MemArea::DynVaspace | MemArea::PagerVaspace => MemAttr::empty(),
        }
    }

    /// Secure-world side of the partition?
    pub fn is_secure(self) -> bool {
        self.attr().contains(MemAttr::SECURE)
    }

    /// Part of the kernel image RAM family that must stay VA-contiguous
    pub fn is_kernel_ram(self) -> bool {
        matches!(self, MemArea::KernelRx | MemArea::KernelRo | MemArea::KernelRw)
    }

    /// May regions of this type be created/destroyed after boot?
    pub fn is_dynamic(self) -> bool {
        matches!(self, MemArea::ResVaspace | MemArea::DynVaspace)
    }

    /// Crosses the secure / normal-world boundary (shared with the
    /// non-secure side)
    pub fn is_shared(self) -> bool {
        matches!(self, MemArea::NsecShm | MemArea::DynVaspace)
    }

    /// Pure virtual-space reservation without physical backing
    pub fn is_va_space(self) -> bool {
        matches!(
            self,
            MemArea::ResVaspace | MemArea::DynVaspace | MemArea::PagerVaspace
        )
    }

    /// Short tag used by the map dump
    pub fn tag(self) -> &'static str {
        match self {
            MemArea::KernelRx => "KERNEL_RX",
            MemArea::KernelRo => "KERNEL_RO",
            MemArea::KernelRw => "KERNEL_RW",
            MemArea::SecRamOverall => "SEC_RAM_OVERALL",
            MemArea::SecRam => "SEC_RAM",
            MemArea::NsecRam => "NSEC_RAM",
            MemArea::NsecShm => "NSEC_SHM",
            MemArea::SecIo => "IO_SEC",
            MemArea::NsecIo => "IO_NSEC",
            MemArea::ExtDt => "EXT_DT",
            MemArea::ResVaspace => "RES_VASPACE",
            MemArea::DynVaspace => "DYN_VASPACE",
            MemArea::PagerVaspace => "PAGER_VASPACE",
            MemArea::IdentityRx => "IDENTITY_RX",
        }
    }
}

/// ============================================================================
/// Physical Areas and Security Windows
/// ============================================================================

/// A physical address range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PhysArea {
    pub base: PAddr,
    pub size: usize,
}

impl PhysArea {
    pub const fn new(base: PAddr, size: usize) -> Self {
        PhysArea { base, size }
    }

    pub const fn empty() -> Self {
        PhysArea { base: 0, size: 0 }
    }

    pub const fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Exclusive end address
    pub const fn end(&self) -> PAddr {
        self.base + self.size
    }

    /// Does `[pa, pa + len)` lie fully inside this area?
    pub fn contains_buf(&self, pa: PAddr, len: usize) -> bool {
        is_buffer_inside(pa, len, self.base, self.size)
    }

    /// Does `[pa, pa + len)` share at least one byte with this area?
    pub fn intersects_buf(&self, pa: PAddr, len: usize) -> bool {
        is_buffer_intersect(pa, len, self.base, self.size)
    }
}

/// The secure / non-secure partition of physical memory, fixed at boot.
///
/// After discovery this only answers membership queries; it is never
/// mutated again.
#[derive(Debug, Clone, Default)]
pub struct SecurityWindows {
    /// Secure-only RAM windows (the second one may be empty)
    pub secure: [PhysArea; 2],
    /// Non-secure shared memory window
    pub nsec_shared: Option<PhysArea>,
    /// Secure data-path window
    pub sdp: Option<PhysArea>,
}

impl SecurityWindows {
    /// Panic if the partition contradicts itself.
    ///
    /// A secure window overlapping the non-secure shared window means the
    /// platform configuration is wrong and nothing built on top of it can
    /// be trusted.
    pub fn validate(&self) {
        if let Some(shm) = self.nsec_shared {
            for sec in &self.secure {
                if sec.intersects_buf(shm.base, shm.size) {
                    panic!(
                        "secure memory [{:#x}..{:#x}] overlaps non-secure shared memory [{:#x}..{:#x}]",
                        sec.base,
                        sec.end(),
                        shm.base,
                        shm.end()
                    );
                }
            }
        }
    }

    /// Is `[pa, pa + len)` entirely secure-only memory?
    pub fn pa_is_secure(&self, pa: PAddr, len: usize) -> bool {
        self.secure.iter().any(|area| area.contains_buf(pa, len))
    }

    /// Is `[pa, pa + len)` entirely inside the non-secure shared window?
    pub fn pa_is_nsec_shared(&self, pa: PAddr, len: usize) -> bool {
        match self.nsec_shared {
            Some(area) => area.contains_buf(pa, len),
            None => false,
        }
    }

    /// Is `[pa, pa + len)` entirely inside the secure data-path window?
    pub fn pa_is_sdp(&self, pa: PAddr, len: usize) -> bool {
        match self.sdp {
            Some(area) => area.contains_buf(pa, len),
            None => false,
        }
    }
}

/// ============================================================================
/// Platform Configuration
/// ============================================================================

/// A named static memory range registered by the platform.
#[derive(Debug, Clone, Copy)]
pub struct PhysEntry {
    pub name: &'static str,
    pub area: MemArea,
    pub base: PAddr,
    pub size: usize,
}

/// Everything the engine needs to know about the platform, pre-normalized
/// by earlier boot stages (no device-tree or boot-argument parsing here).
#[derive(Debug, Clone)]
pub struct MmConfig {
    /// Overall secure RAM window; its base is also the fixed VA anchor
    pub secure_ram: PhysArea,
    /// Optional second secure window
    pub secure_ram_extra: Option<PhysArea>,
    /// Non-secure shared memory window
    pub nsec_shared: Option<PhysArea>,
    /// Secure data-path window
    pub sdp: Option<PhysArea>,
    /// Kernel image, executable segment
    pub kernel_rx: PhysArea,
    /// Kernel image, read-only data segment
    pub kernel_ro: PhysArea,
    /// Kernel image, writable data segment
    pub kernel_rw: PhysArea,
    /// Virtual address budget for the kernel image plus pager space
    pub core_va_size: usize,
    /// Reserve virtual space for the demand-paged part of the image
    pub with_pager: bool,
    /// Early MMU-enable code that needs a transient identity mapping
    pub id_map: Option<PhysArea>,
    /// Static platform memory (secure RAM, device windows, DT blob, ...)
    pub static_mem: Vec<PhysEntry>,
    /// Manifest-declared secure device regions
    pub device_mem: Vec<PhysEntry>,
    /// Firmware-discovered non-secure DRAM
    pub discovered_nsec_ddr: Vec<PhysArea>,
    /// Size of the reserved virtual space for contiguous runtime mappings
    pub res_vaspace_size: usize,
    /// Size of the dynamic virtual space for page-granular runtime mappings
    pub dyn_vaspace_size: usize,
    /// Width of the core virtual address space in bits
    pub va_width: u32,
    /// Number of randomized base-address candidates tried before falling
    /// back to the fixed anchor
    pub aslr_candidates: usize,
    /// Initial memory-map entry budget
    pub map_capacity: usize,
}

impl MmConfig {
    /// Total virtual address space size
    pub const fn va_size(&self) -> usize {
        1 << self.va_width
    }

    /// The non-randomized VA anchor: identity placement of secure RAM
    pub const fn fixed_anchor(&self) -> VAddr {
        self.secure_ram.base
    }

    /// Offset of the executable segment from the secure RAM base.
    ///
    /// The kernel image family is packed starting at anchor + this offset
    /// so that the image keeps its link-time offsets from the RAM base.
    pub const fn kernel_initial_offs(&self) -> usize {
        self.kernel_rx.base - self.secure_ram.base
    }

    /// Build the immutable security windows from this configuration.
    pub fn windows(&self) -> SecurityWindows {
        let windows = SecurityWindows {
            secure: [
                self.secure_ram,
                self.secure_ram_extra.unwrap_or(PhysArea::empty()),
            ],
            nsec_shared: self.nsec_shared,
            sdp: self.sdp,
        };
        windows.validate();
        windows
    }
}

impl Default for MmConfig {
    fn default() -> Self {
        MmConfig {
            secure_ram: PhysArea::empty(),
            secure_ram_extra: None,
            nsec_shared: None,
            sdp: None,
            kernel_rx: PhysArea::empty(),
            kernel_ro: PhysArea::empty(),
            kernel_rw: PhysArea::empty(),
            core_va_size: PGDIR_SIZE,
            with_pager: false,
            id_map: None,
            static_mem: Vec::new(),
            device_mem: Vec::new(),
            discovered_nsec_ddr: Vec::new(),
            res_vaspace_size: 10 * 1024 * 1024,
            dyn_vaspace_size: 2 * 1024 * 1024,
            va_width: 48,
            aslr_candidates: 3,
            map_capacity: 40,
        }
    }
}
