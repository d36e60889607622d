// Copyright 2025 The Rustee Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Core Memory Map Engine
//!
//! This module builds the single authoritative map between physical memory
//! and the core virtual address space of a trusted execution environment
//! kernel, and serves every translation query and structural map change
//! after boot.
//!
//! # Design Goals
//!
//! 1. **One map** - every view of the address space (lookups, predicates,
//!    the translation tables) derives from the same region list
//! 2. **Deterministic layout** - identical inputs and seed give an
//!    identical map
//! 3. **Fail loud** - structural impossibilities at boot and invariant
//!    violations at runtime panic; only recoverable request errors are
//!    returned as [`MmError`]
//! 4. **Lock-free reads** - lookups run against immutable published
//!    snapshots, never against state being mutated
//!
//! # Organization
//!
//! - [`layout`] - address types, granules, area classification, windows
//! - [`map`] - the region collector, merge and carve-out engine
//! - [`assign`] - granularity planning and VA assignment with ASLR
//! - [`table`] - the translation table arena
//! - [`aspace`] - the runtime map index service
//! - [`debug`] - map dumps

pub mod layout;
pub mod map;
pub mod assign;
pub mod table;
pub mod aspace;
pub mod debug;

#[cfg(test)]
mod tests_prop;

use spin::Once;

use alloc::boxed::Box;

// Re-exports for convenience
pub use layout::{
    MemArea,
    MemAttr,
    MmConfig,
    PhysArea,
    PhysEntry,
    SecurityWindows,
    PAddr,
    VAddr,
    PGDIR_SHIFT,
    PGDIR_SIZE,
    SMALL_PAGE_SHIFT,
    SMALL_PAGE_SIZE,
    page_align_down,
    page_align_up,
    is_page_aligned,
};

pub use map::{GrowthPolicy, MemoryMap, MemoryRegion};

pub use table::{EntryKind, GenericHw, TableArena, TableHw};

pub use aspace::{boot_core_vm, CoreVm, MapSnapshot, MemClass};

/// Memory map engine errors.
///
/// Only recoverable request errors live here; invariant violations panic.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmError {
    /// Malformed caller input (zero length, misalignment, overflow)
    BadParameters = 1,

    /// The reserved virtual space cannot host the request
    OutOfSpace = 2,

    /// No mapping matches the given range
    NotFound = 3,
}

impl MmError {
    /// Convert to raw status code
    pub const fn as_raw(self) -> i32 {
        self as i32
    }
}

/// Result type for memory map operations
pub type Result<T = ()> = core::result::Result<T, MmError>;

static CORE_VM: Once<CoreVm> = Once::new();

/// Boot the memory map engine and publish the singleton service.
///
/// With a nonzero `seed` the core is mapped at a randomized address when
/// possible; the returned offset is the distance from the link address.
/// Must be called exactly once, early in boot.
pub fn init_mm(
    cfg: &MmConfig,
    seed: usize,
    hw: Box<dyn TableHw>,
) -> (&'static CoreVm, usize) {
    if CORE_VM.get().is_some() {
        panic!("memory map engine initialized twice");
    }
    let (vm, offs) = boot_core_vm(cfg, seed, hw);
    (CORE_VM.call_once(|| vm), offs)
}

/// The singleton map service. Panics before [`init_mm`] has run.
pub fn core_vm() -> &'static CoreVm {
    match CORE_VM.get() {
        Some(vm) => vm,
        None => panic!("memory map engine not initialized"),
    }
}
