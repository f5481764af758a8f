// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2023.

//! Phase-locked loop controller (PLLC).
//!
//! Multiplies the oscillator input up to the CPU clock. The controller is a
//! single shared resource: callers reserve it with [`Pll::claim`] before
//! reprogramming, and every GO transition is polled with a bounded loop so
//! nothing in the subsystem can spin forever on wedged hardware.

use core::cell::Cell;

use kernel::hil::interrupt::{atomic, InterruptGate};
use kernel::utilities::registers::interfaces::{ReadWriteable, Readable, Writeable};
use kernel::utilities::registers::{register_bitfields, register_structs, ReadOnly, ReadWrite};
use kernel::utilities::StaticRef;
use kernel::ErrorCode;

use log::{debug, warn};

use crate::Config;

pub const PLL_BASE: StaticRef<PllRegisters> =
    unsafe { StaticRef::new(0x029A_0000 as *const PllRegisters) };

/// Bound on status polls for GO transitions and lock acquisition.
const MAX_POLLS: usize = 10_000;

/// Largest supported multiplier (PLLM is programmed as multiplier - 1).
const MAX_MULTIPLIER: u64 = 32;

register_structs! {
    /// PLL controller register map.
    pub PllRegisters {
        /// Peripheral identification.
        (0x000 => pid: ReadOnly<u32>),
        (0x004 => _reserved0),
        /// PLL control.
        (0x100 => pllctl: ReadWrite<u32, PLLCTL::Register>),
        (0x104 => _reserved1),
        /// PLL multiplier.
        (0x110 => pllm: ReadWrite<u32, PLLM::Register>),
        /// Pre-divider.
        (0x114 => prediv: ReadWrite<u32, PLLDIV::Register>),
        (0x118 => _reserved2),
        /// Divider GO command.
        (0x138 => pllcmd: ReadWrite<u32, PLLCMD::Register>),
        /// PLL status.
        (0x13C => pllstat: ReadOnly<u32, PLLSTAT::Register>),
        /// Divider alignment control.
        (0x140 => alnctl: ReadWrite<u32>),
        /// Divider-change status.
        (0x144 => dchange: ReadOnly<u32>),
        /// Clock enable.
        (0x148 => cken: ReadWrite<u32>),
        /// Clock status.
        (0x14C => ckstat: ReadOnly<u32>),
        /// System clock status.
        (0x150 => systat: ReadOnly<u32>),
        (0x154 => _reserved3),
        /// System clock divider 4.
        (0x160 => plldiv4: ReadWrite<u32, PLLDIV::Register>),
        /// System clock divider 5.
        (0x164 => plldiv5: ReadWrite<u32, PLLDIV::Register>),
        (0x168 => @END),
    }
}

register_bitfields![u32,
    PLLCTL [
        /// PLL mode enable.
        PLLEN OFFSET(0) NUMBITS(1) [],
        /// PLL power down.
        PLLPWRDN OFFSET(1) NUMBITS(1) [],
        /// PLL reset.
        PLLRST OFFSET(3) NUMBITS(1) [],
        /// PLLEN pin source; cleared so software owns the mode.
        PLLENSRC OFFSET(5) NUMBITS(1) []
    ],
    PLLM [
        /// Multiplier value; the VCO runs at PLLM + 1 times the input.
        PLLM OFFSET(0) NUMBITS(6) []
    ],
    PLLDIV [
        /// Divider ratio, RATIO + 1.
        RATIO OFFSET(0) NUMBITS(5) [],
        /// Divider enable.
        DEN OFFSET(15) NUMBITS(1) []
    ],
    PLLCMD [
        /// Initiate a divider GO transition.
        GOSET OFFSET(0) NUMBITS(1) []
    ],
    PLLSTAT [
        /// GO transition in progress.
        GOSTAT OFFSET(0) NUMBITS(1) [],
        /// PLL locked onto the programmed frequency.
        LOCK OFFSET(1) NUMBITS(1) []
    ]
];

/// The PLL controller.
pub struct Pll<'a> {
    registers: StaticRef<PllRegisters>,
    gate: &'a dyn InterruptGate,
    lock: Cell<bool>,
}

impl<'a> Pll<'a> {
    pub const fn new(base: StaticRef<PllRegisters>, gate: &'a dyn InterruptGate) -> Pll<'a> {
        Pll {
            registers: base,
            gate,
            lock: Cell::new(false),
        }
    }

    /// Reserve the controller for reprogramming.
    pub fn claim(&self) -> Result<(), ErrorCode> {
        atomic(self.gate, || {
            if self.lock.get() {
                return Err(ErrorCode::BUSY);
            }
            self.lock.set(true);
            Ok(())
        })
    }

    /// Return the controller to the pool.
    pub fn release(&self) {
        atomic(self.gate, || {
            self.lock.set(false);
        });
    }

    /// Program the PLL so the core runs at `config.cpu_clock_hz` from the
    /// `config.osc_clock_hz` oscillator input.
    ///
    /// The controller must be claimed first. The PLL is bypassed while the
    /// multiplier changes, so the core keeps running from the oscillator
    /// until the new frequency is locked.
    pub fn configure(&self, config: &Config) -> Result<(), ErrorCode> {
        if config.cpu_clock_hz == 0 || config.osc_clock_hz == 0 {
            return Err(ErrorCode::INVAL);
        }
        if !self.lock.get() {
            return Err(ErrorCode::RESERVE);
        }
        let multiplier = config.cpu_clock_hz / config.osc_clock_hz;
        if multiplier == 0 || multiplier > MAX_MULTIPLIER {
            return Err(ErrorCode::INVAL);
        }
        let regs = self.registers;
        // Take the mode pin out of the loop and bypass while reprogramming.
        regs.pllctl.modify(PLLCTL::PLLENSRC::CLEAR);
        regs.pllctl.modify(PLLCTL::PLLEN::CLEAR);
        regs.pllctl.modify(PLLCTL::PLLRST::SET);
        regs.pllm.write(PLLM::PLLM.val((multiplier - 1) as u32));
        regs.prediv.write(PLLDIV::RATIO.val(0) + PLLDIV::DEN::SET);
        // Re-align every system clock divider in one GO transition.
        regs.alnctl.set(0xffff_ffff);
        regs.pllcmd.modify(PLLCMD::GOSET::SET);
        self.wait_go_complete()?;
        regs.pllctl.modify(PLLCTL::PLLRST::CLEAR);
        self.wait_locked()?;
        regs.pllctl.modify(PLLCTL::PLLEN::SET);
        debug!("pll: locked, core at {} Hz", config.cpu_clock_hz);
        Ok(())
    }

    fn wait_go_complete(&self) -> Result<(), ErrorCode> {
        for _ in 0..MAX_POLLS {
            if !self.registers.pllstat.is_set(PLLSTAT::GOSTAT) {
                return Ok(());
            }
        }
        warn!("pll: GO transition did not complete");
        Err(ErrorCode::FAIL)
    }

    fn wait_locked(&self) -> Result<(), ErrorCode> {
        for _ in 0..MAX_POLLS {
            if self.registers.pllstat.is_set(PLLSTAT::LOCK) {
                return Ok(());
            }
        }
        warn!("pll: lock timed out");
        Err(ErrorCode::FAIL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::boxed::Box;
    use core::mem::MaybeUninit;
    use core::ptr;

    struct FakeGate {
        enabled: Cell<bool>,
    }

    impl InterruptGate for FakeGate {
        fn disable(&self) -> bool {
            let was = self.enabled.get();
            self.enabled.set(false);
            was
        }

        fn restore(&self, was_enabled: bool) {
            if was_enabled {
                self.enabled.set(true);
            }
        }
    }

    struct Harness {
        pll: &'static Pll<'static>,
        base: StaticRef<PllRegisters>,
        /// Writable view of the simulated block, for priming read-only
        /// status bits the driver can only poll.
        raw: *mut u8,
    }

    fn pll() -> Harness {
        let gate = Box::leak(Box::new(FakeGate {
            enabled: Cell::new(true),
        }));
        let block: &'static mut MaybeUninit<PllRegisters> =
            Box::leak(Box::new(MaybeUninit::zeroed()));
        let raw = block.as_mut_ptr() as *mut u8;
        let base = unsafe { StaticRef::new(raw as *const PllRegisters) };
        Harness {
            pll: Box::leak(Box::new(Pll::new(base, gate))),
            base,
            raw,
        }
    }

    fn config() -> Config {
        Config {
            cpu_clock_hz: 600_000_000,
            osc_clock_hz: 50_000_000,
            nested_interrupts: false,
        }
    }

    /// The status register is read-only through the driver view; tests poke
    /// the simulated block directly.
    fn prime_status(h: &Harness, value: u32) {
        unsafe { ptr::write_volatile(h.raw.add(0x13C) as *mut u32, value) }
    }

    #[test]
    fn claim_is_exclusive_until_release() {
        let h = pll();
        h.pll.claim().unwrap();
        assert_eq!(h.pll.claim().err(), Some(ErrorCode::BUSY));
        h.pll.release();
        h.pll.claim().unwrap();
    }

    #[test]
    fn configure_requires_a_claim() {
        let h = pll();
        prime_status(&h, 0b10);
        assert_eq!(h.pll.configure(&config()).err(), Some(ErrorCode::RESERVE));
    }

    #[test]
    fn configure_programs_the_multiplier() {
        let h = pll();
        prime_status(&h, 0b10);
        h.pll.claim().unwrap();
        h.pll.configure(&config()).unwrap();
        // 600 MHz from 50 MHz is x12, programmed as 11.
        assert_eq!(h.base.pllm.read(PLLM::PLLM), 11);
        assert_eq!(h.base.pllctl.read(PLLCTL::PLLEN), 1);
        assert_eq!(h.base.pllctl.read(PLLCTL::PLLRST), 0);
        assert_eq!(h.base.prediv.read(PLLDIV::DEN), 1);
    }

    #[test]
    fn configure_rejects_out_of_range_ratios() {
        let h = pll();
        prime_status(&h, 0b10);
        h.pll.claim().unwrap();
        let too_fast = Config {
            cpu_clock_hz: 50_000_000_000,
            ..config()
        };
        assert_eq!(h.pll.configure(&too_fast).err(), Some(ErrorCode::INVAL));
        let no_osc = Config {
            osc_clock_hz: 0,
            ..config()
        };
        assert_eq!(h.pll.configure(&no_osc).err(), Some(ErrorCode::INVAL));
    }

    #[test]
    fn configure_times_out_without_lock() {
        let h = pll();
        h.pll.claim().unwrap();
        // Simulated hardware never raises LOCK; the bounded poll gives up.
        assert_eq!(h.pll.configure(&config()).err(), Some(ErrorCode::FAIL));
    }
}
