// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2023.

//! 64-bit timers (Timer64).
//!
//! The chip carries two 64-bit timers. [`TimerUnit`] is the claim registry
//! the platform initializes once; drivers obtain a [`Timer64`] through
//! [`TimerUnit::claim`], which takes the instance out of reset stopped, with
//! the watchdog disabled and the timer clock derived from the CPU clock
//! divider.

use core::cell::Cell;

use kernel::hil::interrupt::{atomic, InterruptGate};
use kernel::hil::time::Timer;
use kernel::utilities::registers::interfaces::{ReadWriteable, Readable, Writeable};
use kernel::utilities::registers::{register_bitfields, register_structs, ReadOnly, ReadWrite};
use kernel::utilities::StaticRef;
use kernel::ErrorCode;

use log::debug;

use crate::intc::Source;
use crate::Config;

/// Number of Timer64 instances on the chip.
pub const NUM_TIMERS: usize = 2;

pub const TIMER_BASES: [StaticRef<TimerRegisters>; NUM_TIMERS] = unsafe {
    [
        StaticRef::new(0x0294_0000 as *const TimerRegisters),
        StaticRef::new(0x0298_0000 as *const TimerRegisters),
    ]
};

register_structs! {
    /// Timer64 register map.
    pub TimerRegisters {
        /// Peripheral identification.
        (0x00 => pid12: ReadOnly<u32>),
        /// Emulation management and clock speed.
        (0x04 => emumgt_clkspd: ReadWrite<u32, EMUMGT_CLKSPD::Register>),
        (0x08 => _reserved0),
        /// Counter, low half.
        (0x10 => cntlo: ReadWrite<u32>),
        /// Counter, high half.
        (0x14 => cnthi: ReadWrite<u32>),
        /// Period, low half.
        (0x18 => prdlo: ReadWrite<u32>),
        /// Period, high half.
        (0x1C => prdhi: ReadWrite<u32>),
        /// Timer control.
        (0x20 => tcr: ReadWrite<u32, TCR::Register>),
        /// Timer global control.
        (0x24 => tgcr: ReadWrite<u32, TGCR::Register>),
        /// Watchdog control.
        (0x28 => wdtcr: ReadWrite<u32, WDTCR::Register>),
        (0x2C => @END),
    }
}

register_bitfields![u32,
    EMUMGT_CLKSPD [
        /// Free-run through emulation halts.
        FREE OFFSET(0) NUMBITS(1) [],
        /// Soft stop mode during emulation halts.
        SOFT OFFSET(1) NUMBITS(1) [],
        /// Divider between the CPU clock and the timer input clock.
        CLKDIV OFFSET(16) NUMBITS(4) []
    ],
    TCR [
        /// Lower counter enable mode.
        ENAMODE_LO OFFSET(6) NUMBITS(2) [
            Disabled = 0,
            Once = 1,
            Continuous = 2
        ],
        /// Lower counter clock source.
        CLKSRC_LO OFFSET(8) NUMBITS(1) [],
        /// Lower counter input enable.
        TIEN_LO OFFSET(9) NUMBITS(1) [],
        /// Higher counter enable mode.
        ENAMODE_HI OFFSET(22) NUMBITS(2) []
    ],
    TGCR [
        /// Lower counter out of reset.
        TIMLORS OFFSET(0) NUMBITS(1) [],
        /// Higher counter out of reset.
        TIMHIRS OFFSET(1) NUMBITS(1) [],
        /// Timer mode: one 64-bit counter, dual 32-bit, or watchdog.
        TIMMODE OFFSET(2) NUMBITS(2) [
            Dual64 = 0,
            Dual32Unchained = 1,
            Watchdog = 2,
            Dual32Chained = 3
        ]
    ],
    WDTCR [
        /// Watchdog enable.
        WDEN OFFSET(14) NUMBITS(1) [],
        /// Watchdog access key.
        WDKEY OFFSET(16) NUMBITS(16) []
    ]
];

/// Claim registry for the chip's timers.
///
/// Holds the per-instance lock flags the original keeps next to the
/// hardware; claim and release run under the global gate like every other
/// shared-state mutation in this subsystem.
pub struct TimerUnit<'a> {
    gate: &'a dyn InterruptGate,
    bases: [StaticRef<TimerRegisters>; NUM_TIMERS],
    locks: [Cell<bool>; NUM_TIMERS],
    cpu_clock_hz: Cell<u64>,
    ready: Cell<bool>,
}

impl<'a> TimerUnit<'a> {
    pub const fn new(
        gate: &'a dyn InterruptGate,
        bases: [StaticRef<TimerRegisters>; NUM_TIMERS],
    ) -> TimerUnit<'a> {
        TimerUnit {
            gate,
            bases,
            locks: [const { Cell::new(false) }; NUM_TIMERS],
            cpu_clock_hz: Cell::new(0),
            ready: Cell::new(false),
        }
    }

    /// Store the configuration and unlock every instance.
    pub fn init(&self, config: &Config) -> Result<(), ErrorCode> {
        self.ready.set(false);
        if config.cpu_clock_hz == 0 {
            return Err(ErrorCode::INVAL);
        }
        atomic(self.gate, || {
            for lock in self.locks.iter() {
                lock.set(false);
            }
            self.cpu_clock_hz.set(config.cpu_clock_hz);
            self.ready.set(true);
        });
        Ok(())
    }

    /// Refuse further claims until the next [`TimerUnit::init`].
    pub fn deinit(&self) {
        atomic(self.gate, || {
            for lock in self.locks.iter() {
                lock.set(false);
            }
            self.ready.set(false);
        });
    }

    /// Claim timer `index`, taking it out of reset in a stopped state.
    pub fn claim(&'a self, index: usize) -> Result<Timer64<'a>, ErrorCode> {
        atomic(self.gate, || {
            if !self.ready.get() {
                return Err(ErrorCode::OFF);
            }
            if index >= NUM_TIMERS {
                return Err(ErrorCode::INVAL);
            }
            if self.locks[index].get() {
                return Err(ErrorCode::BUSY);
            }
            let registers = self.bases[index];
            // Keep counting through emulation halts; the watchdog stays out
            // of the picture.
            registers
                .emumgt_clkspd
                .modify(EMUMGT_CLKSPD::FREE::CLEAR + EMUMGT_CLKSPD::SOFT::CLEAR);
            registers.wdtcr.modify(WDTCR::WDEN::CLEAR);
            let clkdiv = registers.emumgt_clkspd.read(EMUMGT_CLKSPD::CLKDIV);
            if clkdiv == 0 {
                return Err(ErrorCode::FAIL);
            }
            let timer_clock = self.cpu_clock_hz.get() / u64::from(clkdiv);
            // Park the counter stopped, in 64-bit mode, out of reset.
            registers.tcr.set(0);
            registers.tgcr.set(0);
            registers
                .tgcr
                .modify(TGCR::TIMMODE::Dual64 + TGCR::TIMHIRS::SET + TGCR::TIMLORS::SET);
            self.locks[index].set(true);
            debug!("timer{}: claimed, clock {} Hz", index, timer_clock);
            Ok(Timer64 {
                unit: self,
                registers,
                index,
                timer_clock,
            })
        })
    }
}

/// One claimed 64-bit timer.
pub struct Timer64<'a> {
    unit: &'a TimerUnit<'a>,
    registers: StaticRef<TimerRegisters>,
    index: usize,
    timer_clock: u64,
}

impl<'a> Timer64<'a> {
    /// Index of this timer instance.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Stop the timer and return it to the registry.
    pub fn release(self) {
        atomic(self.unit.gate, || {
            self.stop();
            self.unit.locks[self.index].set(false);
        });
    }

    fn is_started(&self) -> bool {
        self.registers.tcr.read(TCR::ENAMODE_LO) != 0
    }
}

impl<'a> Timer for Timer64<'a> {
    fn count(&self) -> u64 {
        let hi = u64::from(self.registers.cnthi.get());
        (hi << 32) | u64::from(self.registers.cntlo.get())
    }

    fn set_count(&self, count: u64) {
        if count > self.period() {
            return;
        }
        let was_started = self.is_started();
        if was_started {
            self.stop();
        }
        self.registers.cntlo.set(count as u32);
        self.registers.cnthi.set((count >> 32) as u32);
        if was_started {
            self.start();
        }
    }

    fn period(&self) -> u64 {
        let hi = u64::from(self.registers.prdhi.get());
        (hi << 32) | u64::from(self.registers.prdlo.get())
    }

    fn set_period_us(&self, us: u64) {
        let prd = if us == 0 {
            u64::MAX
        } else {
            us.saturating_mul(self.timer_clock) / 1_000_000
        };
        let was_started = self.is_started();
        if was_started {
            self.stop();
        }
        self.registers.prdlo.set(prd as u32);
        self.registers.prdhi.set((prd >> 32) as u32);
        if was_started {
            self.start();
        }
    }

    fn start(&self) {
        self.registers.tcr.modify(TCR::ENAMODE_LO::Continuous);
    }

    fn stop(&self) {
        self.registers.tcr.modify(TCR::ENAMODE_LO::Disabled);
    }

    fn digits(&self) -> u32 {
        64
    }

    fn internal_clock(&self) -> u64 {
        self.timer_clock
    }

    fn is_interrupting(&self) -> bool {
        true
    }

    fn interrupt_source(&self) -> Option<u32> {
        match self.index {
            0 => Some(Source::Tintlo0.id()),
            1 => Some(Source::Tintlo1.id()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::boxed::Box;
    use core::mem::MaybeUninit;

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

    fn fake_registers() -> StaticRef<TimerRegisters> {
        let block: &'static mut MaybeUninit<TimerRegisters> =
            Box::leak(Box::new(MaybeUninit::zeroed()));
        unsafe { StaticRef::new(block.as_ptr()) }
    }

    fn unit() -> (&'static TimerUnit<'static>, [StaticRef<TimerRegisters>; 2]) {
        let gate = Box::leak(Box::new(FakeGate {
            enabled: Cell::new(true),
        }));
        let bases = [fake_registers(), fake_registers()];
        let unit = Box::leak(Box::new(TimerUnit::new(gate, bases)));
        (unit, bases)
    }

    fn config() -> Config {
        Config {
            cpu_clock_hz: 600_000_000,
            osc_clock_hz: 50_000_000,
            nested_interrupts: false,
        }
    }

    /// Hardware presents a nonzero divider after reset; the zeroed fake
    /// block needs it set by hand.
    fn prime_clkdiv(base: StaticRef<TimerRegisters>, div: u32) {
        base.emumgt_clkspd.modify(EMUMGT_CLKSPD::CLKDIV.val(div));
    }

    #[test]
    fn claim_before_init_fails() {
        let (unit, _bases) = unit();
        assert_eq!(unit.claim(0).err(), Some(ErrorCode::OFF));
    }

    #[test]
    fn claim_rejects_bad_index() {
        let (unit, _bases) = unit();
        unit.init(&config()).unwrap();
        assert_eq!(unit.claim(NUM_TIMERS).err(), Some(ErrorCode::INVAL));
    }

    #[test]
    fn claim_fails_on_dead_clock_divider() {
        let (unit, _bases) = unit();
        unit.init(&config()).unwrap();
        assert_eq!(unit.claim(0).err(), Some(ErrorCode::FAIL));
    }

    #[test]
    fn claim_derives_clock_and_parks_timer() {
        let (unit, bases) = unit();
        unit.init(&config()).unwrap();
        prime_clkdiv(bases[0], 6);
        let timer = unit.claim(0).unwrap();
        assert_eq!(timer.internal_clock(), 100_000_000);
        assert_eq!(bases[0].tcr.read(TCR::ENAMODE_LO), 0);
        assert_eq!(bases[0].tgcr.read(TGCR::TIMLORS), 1);
        assert_eq!(bases[0].tgcr.read(TGCR::TIMHIRS), 1);
        assert_eq!(bases[0].wdtcr.read(WDTCR::WDEN), 0);
    }

    #[test]
    fn double_claim_is_rejected_until_release() {
        let (unit, bases) = unit();
        unit.init(&config()).unwrap();
        prime_clkdiv(bases[1], 6);
        let timer = unit.claim(1).unwrap();
        assert_eq!(unit.claim(1).err(), Some(ErrorCode::BUSY));
        timer.release();
        let again = unit.claim(1).unwrap();
        assert_eq!(again.index(), 1);
    }

    #[test]
    fn period_programming_uses_the_derived_clock() {
        let (unit, bases) = unit();
        unit.init(&config()).unwrap();
        prime_clkdiv(bases[0], 6);
        let timer = unit.claim(0).unwrap();
        // 100 MHz timer clock: 50 us is 5000 ticks.
        timer.set_period_us(50);
        assert_eq!(timer.period(), 5000);
        assert_eq!(bases[0].prdlo.get(), 5000);
        assert_eq!(bases[0].prdhi.get(), 0);
        // Zero selects the maximum period.
        timer.set_period_us(0);
        assert_eq!(timer.period(), u64::MAX);
    }

    #[test]
    fn counter_loads_are_bounded_by_the_period() {
        let (unit, bases) = unit();
        unit.init(&config()).unwrap();
        prime_clkdiv(bases[0], 6);
        let timer = unit.claim(0).unwrap();
        timer.set_period_us(50);
        timer.set_count(7000);
        assert_eq!(timer.count(), 0);
        timer.set_count(1234);
        assert_eq!(timer.count(), 1234);
    }

    #[test]
    fn start_and_stop_toggle_the_enable_mode() {
        let (unit, bases) = unit();
        unit.init(&config()).unwrap();
        prime_clkdiv(bases[0], 6);
        let timer = unit.claim(0).unwrap();
        timer.start();
        assert_eq!(bases[0].tcr.read(TCR::ENAMODE_LO), 2);
        timer.stop();
        assert_eq!(bases[0].tcr.read(TCR::ENAMODE_LO), 0);
    }

    #[test]
    fn interrupt_plumbing_matches_the_event_map() {
        let (unit, bases) = unit();
        unit.init(&config()).unwrap();
        prime_clkdiv(bases[0], 6);
        prime_clkdiv(bases[1], 6);
        let timer0 = unit.claim(0).unwrap();
        let timer1 = unit.claim(1).unwrap();
        assert!(timer0.is_interrupting());
        assert_eq!(timer0.digits(), 64);
        assert_eq!(timer0.interrupt_source(), Some(67));
        assert_eq!(timer1.interrupt_source(), Some(69));
    }

    #[test]
    fn deinit_blocks_claims() {
        let (unit, bases) = unit();
        unit.init(&config()).unwrap();
        prime_clkdiv(bases[0], 6);
        unit.deinit();
        assert_eq!(unit.claim(0).err(), Some(ErrorCode::OFF));
        unit.init(&config()).unwrap();
        assert!(unit.claim(0).is_ok());
    }
}
