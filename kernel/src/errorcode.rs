// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2023.

//! Standard error enum for invoking operations

/// Standard errors.
///
/// Fallible operations return `Result<_, ErrorCode>`; there are no success
/// cases in this enum. Operations that are defined to do nothing in a given
/// state (for example, driving a detached interrupt handle) return their
/// documented default instead of an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum ErrorCode {
    /// Generic failure condition
    FAIL = 0,
    /// Underlying system is busy; retry
    BUSY = 1,
    /// The state requested is already set
    ALREADY = 2,
    /// The component is powered down
    OFF = 3,
    /// Reservation required before use
    RESERVE = 4,
    /// An invalid parameter was passed
    INVAL = 5,
    /// Parameter passed was too large
    SIZE = 6,
    /// Memory required not available
    NOMEM = 7,
    /// Operation or command is unsupported
    NOSUPPORT = 8,
    /// Device does not exist
    NODEVICE = 9,
}

impl From<ErrorCode> for usize {
    fn from(err: ErrorCode) -> usize {
        err as usize
    }
}
