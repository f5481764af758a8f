// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2023.

//! Owned execution-context resources for allocated interrupt vectors.
//!
//! Every vector the selector allocates owns two pieces of memory: a register
//! save area the context-save path writes the interrupted CPU state into,
//! and a dedicated stack the handler runs on. Both are created when a
//! handler attaches and released when it detaches.

use alloc::vec::Vec;

use kernel::ErrorCode;

/// 64-bit words in one register save area: the A0..A31 and B0..B31 register
/// pairs plus the saved control registers (AMR, CSR, ITSR, IRP, ILC, RILC).
const SAVE_AREA_WORDS: usize = 35;

fn alloc_words(words: usize) -> Result<Vec<u64>, ErrorCode> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(words).map_err(|_| ErrorCode::NOMEM)?;
    buf.resize(words, 0);
    Ok(buf)
}

/// CPU register save area for one allocated vector.
pub struct RegisterSnapshot {
    words: Vec<u64>,
}

impl RegisterSnapshot {
    /// Allocate a zeroed save area.
    pub fn new() -> Result<RegisterSnapshot, ErrorCode> {
        Ok(RegisterSnapshot {
            words: alloc_words(SAVE_AREA_WORDS)?,
        })
    }

    /// Base of the save area. The context-save path writes through this
    /// pointer while an interrupt for the owning vector is live.
    pub fn save_area(&self) -> *mut u64 {
        self.words.as_ptr() as *mut u64
    }
}

/// Dedicated stack for one attached handler.
///
/// The C64x+ stack grows downward, so the initial stack pointer is the one
/// past the end address of the owned region.
pub struct ExecutionStack {
    words: Vec<u64>,
}

impl ExecutionStack {
    /// Allocate a stack of `size` bytes, rounded down to 64-bit words.
    /// A size below one word is malformed.
    pub fn new(size: usize) -> Result<ExecutionStack, ErrorCode> {
        let words = size >> 3;
        if words == 0 {
            return Err(ErrorCode::INVAL);
        }
        Ok(ExecutionStack {
            words: alloc_words(words)?,
        })
    }

    /// Initial top-of-stack pointer, 8-byte aligned.
    pub fn top(&self) -> *const u64 {
        self.words.as_ptr().wrapping_add(self.words.len())
    }
}

#[cfg(test)]
mod tests {
    use super::{ExecutionStack, RegisterSnapshot};
    use kernel::ErrorCode;

    #[test]
    fn snapshot_exposes_aligned_save_area() {
        let snapshot = RegisterSnapshot::new().unwrap();
        let base = snapshot.save_area();
        assert!(!base.is_null());
        assert_eq!(base as usize % 8, 0);
    }

    #[test]
    fn stack_rounds_size_down_to_words() {
        let stack = ExecutionStack::new(1000).unwrap();
        let words = 1000 >> 3;
        assert_eq!(
            stack.top() as usize,
            stack.words.as_ptr() as usize + words * 8
        );
    }

    #[test]
    fn stack_top_is_aligned() {
        let stack = ExecutionStack::new(4096).unwrap();
        assert_eq!(stack.top() as usize % 8, 0);
    }

    #[test]
    fn malformed_stack_size_is_rejected() {
        assert_eq!(ExecutionStack::new(0).err(), Some(ErrorCode::INVAL));
        assert_eq!(ExecutionStack::new(7).err(), Some(ErrorCode::INVAL));
    }
}
