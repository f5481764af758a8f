// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2023.

//! Core interfaces shared by the chip crates.
//!
//! This crate holds the Hardware Interface Layer (HIL) trait definitions,
//! the common error vocabulary, and the utility types chip drivers use to
//! model memory-mapped hardware.

#![no_std]

pub mod errorcode;
pub mod hil;
pub mod utilities;

pub use errorcode::ErrorCode;
