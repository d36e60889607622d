// Copyright 2025 The Rustee Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Kernel subsystems
//!
//! Only the memory-map engine lives in this crate; the embedding kernel
//! supplies the rest.

pub mod mm;
