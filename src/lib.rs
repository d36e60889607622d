// Copyright 2025 The Rustee Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Rustee core address-space engine
//!
//! This crate builds and owns the kernel memory map of a trusted execution
//! environment: the single authoritative description of which physical memory
//! the TEE core uses, where each piece lands in the core virtual address
//! space, and how the translation tables encode it.
//!
//! The crate is `no_std` + `alloc`; the embedding kernel supplies the
//! allocator and the panic handler. All tests run hosted.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod kernel;

pub use kernel::mm;
