// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2023.

//! Interfaces for attaching handlers to multiplexed hardware interrupt
//! vectors.
//!
//! A chip's interrupt selector routes a large set of logical interrupt
//! sources onto a small set of physical CPU vectors. Drivers do not know the
//! routing; they hold an attachment handle implementing [`Interrupt`] and
//! bind a [`Handler`] to a source through it. The CPU side of the machinery
//! (the vector entry stubs and the global mask) lives in the architecture
//! layer and is reached through [`VectorOps`] and [`InterruptGate`].

use crate::errorcode::ErrorCode;

/// A task-like object that services one interrupt source.
///
/// The selector runs the handler on a dedicated stack with a dedicated
/// register save area, both sized and created at attach time.
pub trait Handler {
    /// Entry point, invoked in interrupt context by the dispatch routine.
    fn handle(&self);

    /// Bytes of dedicated stack this handler needs while running.
    fn stack_size(&self) -> usize;
}

/// Capability interface of one interrupt attachment point.
///
/// A handle holds at most one vector allocation at a time. Every operation
/// other than [`attach`](Interrupt::attach) is defined while unallocated:
/// the default bodies below do nothing and return the documented defaults,
/// so a handle that never attached behaves as a null implementation.
pub trait Interrupt<'a> {
    /// Chip-specific register-snapshot type used by the context save path.
    type Snapshot;

    /// Bind `handler` to the logical interrupt `source`, allocating a
    /// physical vector for it.
    fn attach(&self, handler: &'a dyn Handler, source: u32) -> Result<(), ErrorCode> {
        let _ = (handler, source);
        Err(ErrorCode::NOSUPPORT)
    }

    /// Release the held allocation, if any. Safe to call repeatedly.
    fn detach(&self) {}

    /// Branch to the allocated vector as if the interrupt fired.
    fn jump(&self) {}

    /// Clear the pending status of the allocated vector.
    fn clear(&self) {}

    /// Raise the pending status of the allocated vector in software.
    fn set(&self) {}

    /// Mask the allocated vector.
    ///
    /// Returns the enable state the vector had before the call, `false`
    /// while unallocated. Pass the returned value to
    /// [`enable`](Interrupt::enable) to restore the prior state; the pairing
    /// composes under nesting.
    fn disable(&self) -> bool {
        false
    }

    /// Restore the allocated vector's enable state.
    ///
    /// `true` unmasks the vector; `false` leaves it as it is.
    fn enable(&self, status: bool) {
        let _ = status;
    }

    /// Rebind the context save path to the allocation's own register
    /// snapshot.
    fn reset_register(&self) {}

    /// Rebind the context save path to `snapshot`.
    ///
    /// Ownership is not transferred; the caller keeps the snapshot alive for
    /// as long as the binding stands.
    fn set_register(&self, snapshot: &Self::Snapshot) {
        let _ = snapshot;
    }

    /// The allocated vector number, or `None` while unallocated.
    fn vector(&self) -> Option<u32> {
        None
    }
}

/// The global maskable-interrupt gate.
///
/// Disabling and restoring the global mask is the only synchronization
/// primitive in this subsystem; every vector-table mutation runs bracketed
/// by it. Implemented by the architecture layer.
pub trait InterruptGate {
    /// Disable all maskable interrupts. Returns whether they were enabled,
    /// so nested critical sections restore the true prior state.
    fn disable(&self) -> bool;

    /// Restore the global mask to a state previously returned by
    /// [`disable`](InterruptGate::disable). `true` enables all maskable
    /// interrupts, `false` leaves them disabled.
    fn restore(&self, was_enabled: bool);
}

/// Run `f` with all maskable interrupts disabled.
pub fn atomic<R>(gate: &dyn InterruptGate, f: impl FnOnce() -> R) -> R {
    let enabled = gate.disable();
    let res = f();
    gate.restore(enabled);
    res
}

/// Per-vector CPU primitives.
///
/// These act on the CPU's interrupt enable/flag registers, which only the
/// architecture's assembly layer can reach; the selector drives them through
/// this trait. All operations take the physical vector number.
pub trait VectorOps {
    /// Branch to the vector's entry point.
    fn jump(&self, vector: u32);

    /// Clear the vector's pending flag.
    fn clear(&self, vector: u32);

    /// Raise the vector's pending flag.
    fn set(&self, vector: u32);

    /// Mask the vector, returning its previous enable state.
    fn disable(&self, vector: u32) -> bool;

    /// Restore the vector's enable state; `true` unmasks it.
    fn enable(&self, vector: u32, status: bool);
}
