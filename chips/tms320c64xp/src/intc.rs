// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2023.

//! Interrupt selector (INTC) for the C64x+ megamodule.
//!
//! The CPU recognizes twelve maskable interrupt vectors (INT4..INT15) while
//! the megamodule generates up to 128 system events. The selector owns the
//! routing: it allocates a physical vector for a logical source, creates the
//! execution context the vector runs its handler in, and programs the
//! source-select mux so the event reaches the chosen vector.
//!
//! An [`Intc`] value is the vector table registry. The platform creates one
//! next to its [`InterruptGate`] and [`VectorOps`] implementations, calls
//! [`Intc::init`] once, and hands out [`InterruptHandle`]s to drivers. The
//! hardware dispatch path enters through [`Intc::handle_interrupt`] with the
//! table index of the vector that fired.

use core::cell::Cell;
use core::mem::{align_of, offset_of, size_of};
use core::ptr;

use kernel::hil::interrupt::{atomic, Handler, Interrupt, InterruptGate, VectorOps};
use kernel::utilities::cells::{OptionalCell, VolatileCell};
use kernel::utilities::registers::interfaces::{ReadWriteable, Writeable};
use kernel::utilities::registers::{
    register_bitfields, register_structs, ReadOnly, ReadWrite, WriteOnly,
};
use kernel::utilities::StaticRef;
use kernel::ErrorCode;

use log::debug;

use crate::context::{ExecutionStack, RegisterSnapshot};
use crate::Config;

/// Number of maskable CPU vectors served by the selector.
pub const NUM_VECTORS: usize = 12;

/// Number of logical system events the selector can route.
pub const NUM_SOURCES: u32 = 128;

/// First maskable vector. INT0..INT3 are fixed-purpose (reset, NMI and the
/// reserved pair) and never pass through the mux.
const VECTOR_BASE: u32 = 4;

/// Source value a freed slot reports. DSPINT is a real enumerated source;
/// slot state is defined by handler presence, never by this value.
const DEFAULT_SOURCE: u32 = Source::DspInt as u32;

/// Source a released vector is routed back to. Event combiner 0 output,
/// which is also a real enumerated source.
const DEFAULT_ROUTE: u32 = Source::Evt0 as u32;

pub const INTC_BASE: StaticRef<IntcRegisters> =
    unsafe { StaticRef::new(0x0180_0000 as *const IntcRegisters) };

register_structs! {
    /// C64x+ megamodule interrupt controller.
    pub IntcRegisters {
        /// Event flag registers, one bit per system event.
        (0x000 => evtflag: [ReadOnly<u32>; 4]),
        (0x010 => _reserved0),
        /// Event set registers.
        (0x020 => evtset: [WriteOnly<u32>; 4]),
        (0x030 => _reserved1),
        /// Event clear registers.
        (0x040 => evtclr: [WriteOnly<u32>; 4]),
        (0x050 => _reserved2),
        /// Event mask registers.
        (0x080 => evtmask: [ReadWrite<u32>; 4]),
        (0x090 => _reserved3),
        /// Masked event flag registers.
        (0x0A0 => mevtflag: [ReadOnly<u32>; 4]),
        (0x0B0 => _reserved4),
        /// Exception mask registers.
        (0x0C0 => expmask: [ReadWrite<u32>; 4]),
        (0x0D0 => _reserved5),
        /// Masked exception flag registers.
        (0x0E0 => mexpflag: [ReadOnly<u32>; 4]),
        (0x0F0 => _reserved6),
        /// Interrupt mux registers, four source-select fields each.
        /// `intmux[0]` covers the fixed vectors and is never written.
        (0x100 => intmux: [ReadWrite<u32, INTMUX::Register>; 4]),
        (0x110 => _reserved7),
        /// Advanced event generator mux.
        (0x140 => aegmux: [ReadWrite<u32>; 2]),
        (0x148 => _reserved8),
        /// Interrupt exception status.
        (0x180 => intxstat: ReadOnly<u32>),
        /// Interrupt exception clear.
        (0x184 => intxclr: WriteOnly<u32>),
        /// Dropped interrupt mask.
        (0x188 => intdmask: ReadWrite<u32>),
        (0x18C => @END),
    }
}

register_bitfields![u32,
    INTMUX [
        /// Source select for vector 4n+0 of this register's group.
        INTSEL0 OFFSET(0) NUMBITS(6) [],
        /// Source select for vector 4n+1.
        INTSEL1 OFFSET(8) NUMBITS(6) [],
        /// Source select for vector 4n+2.
        INTSEL2 OFFSET(16) NUMBITS(6) [],
        /// Source select for vector 4n+3.
        INTSEL3 OFFSET(24) NUMBITS(6) []
    ]
];

/// System events recognized by the interrupt selector.
///
/// The values are fixed by the megamodule event map; software only chooses
/// which of them to route.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum Source {
    /// Event combiner 0 output, for events 1..31.
    Evt0 = 0,
    /// Event combiner 1 output, for events 32..63.
    Evt1 = 1,
    /// Event combiner 2 output, for events 64..95.
    Evt2 = 2,
    /// Event combiner 3 output, for events 96..127.
    Evt3 = 3,
    /// EMU host scan access, DTDMA transfer complete or AET interrupt.
    EmuDtdma = 9,
    /// EMU real-time data exchange receive complete.
    EmuRtdxRx = 11,
    /// EMU RTDX transmit complete.
    EmuRtdxTx = 12,
    /// IDMA channel 0 interrupt.
    Idma0 = 13,
    /// IDMA channel 1 interrupt.
    Idma1 = 14,
    /// HPI-to-DSP interrupt.
    DspInt = 15,
    /// I2C interrupt.
    I2cInt = 16,
    /// Ethernet MAC interrupt.
    MacInt = 17,
    /// EMIFA error interrupt.
    AeAsyncErr = 18,
    /// RapidIO interrupt 0.
    IntDst0 = 20,
    /// RapidIO interrupt 1.
    IntDst1 = 21,
    /// RapidIO interrupt 2.
    IntDst2 = 22,
    /// RapidIO interrupt 3.
    IntDst3 = 23,
    /// EDMA3 channel global completion interrupt.
    Edma3ccGint = 24,
    /// Ethernet MAC receive interrupt.
    MacRxInt = 25,
    /// Ethernet MAC transmit interrupt.
    MacTxInt = 26,
    /// Ethernet MAC receive threshold interrupt.
    MacThresh = 27,
    /// RapidIO interrupt 4.
    IntDst4 = 28,
    /// RapidIO interrupt 5.
    IntDst5 = 29,
    /// RapidIO interrupt 6.
    IntDst6 = 30,
    /// VCP2 error interrupt.
    Vcp2Int = 32,
    /// TCP2_A error interrupt.
    Tcp2aInt = 33,
    /// TCP2_B error interrupt.
    Tcp2bInt = 34,
    /// UTOPIA interrupt.
    Uint = 36,
    /// McBSP0 receive interrupt.
    Rint0 = 40,
    /// McBSP0 transmit interrupt.
    Xint0 = 41,
    /// McBSP1 receive interrupt.
    Rint1 = 42,
    /// McBSP1 transmit interrupt.
    Xint1 = 43,
    /// GPIO interrupt 0.
    Gpint0 = 51,
    /// GPIO interrupt 1.
    Gpint1 = 52,
    /// GPIO interrupt 2.
    Gpint2 = 53,
    /// GPIO interrupt 3.
    Gpint3 = 54,
    /// GPIO interrupt 4.
    Gpint4 = 55,
    /// GPIO interrupt 5.
    Gpint5 = 56,
    /// GPIO interrupt 6.
    Gpint6 = 57,
    /// GPIO interrupt 7.
    Gpint7 = 58,
    /// GPIO interrupt 8.
    Gpint8 = 59,
    /// GPIO interrupt 9.
    Gpint9 = 60,
    /// GPIO interrupt 10.
    Gpint10 = 61,
    /// GPIO interrupt 11.
    Gpint11 = 62,
    /// GPIO interrupt 12.
    Gpint12 = 63,
    /// GPIO interrupt 13.
    Gpint13 = 64,
    /// GPIO interrupt 14.
    Gpint14 = 65,
    /// GPIO interrupt 15.
    Gpint15 = 66,
    /// Timer 0 lower counter interrupt.
    Tintlo0 = 67,
    /// Timer 0 higher counter interrupt.
    Tinthi0 = 68,
    /// Timer 1 lower counter interrupt.
    Tintlo1 = 69,
    /// Timer 1 higher counter interrupt.
    Tinthi1 = 70,
    /// EDMA3CC completion interrupt, mask 0.
    Edma3ccInt0 = 71,
    /// EDMA3CC completion interrupt, mask 1.
    Edma3ccInt1 = 72,
    /// EDMA3CC completion interrupt, mask 2.
    Edma3ccInt2 = 73,
    /// EDMA3CC completion interrupt, mask 3.
    Edma3ccInt3 = 74,
    /// EDMA3CC completion interrupt, mask 4.
    Edma3ccInt4 = 75,
    /// EDMA3CC completion interrupt, mask 5.
    Edma3ccInt5 = 76,
    /// EDMA3CC completion interrupt, mask 6.
    Edma3ccInt6 = 77,
    /// EDMA3CC completion interrupt, mask 7.
    Edma3ccInt7 = 78,
    /// EDMA3CC error interrupt.
    Edma3ccErrint = 79,
    /// EDMA3TC0 error interrupt.
    Edma3tc0Errint = 81,
    /// EDMA3TC1 error interrupt.
    Edma3tc1Errint = 82,
    /// EDMA3TC2 error interrupt.
    Edma3tc2Errint = 83,
    /// EDMA3TC3 error interrupt.
    Edma3tc3Errint = 84,
    /// EDMA3CC AET event.
    Edma3ccAet = 85,
    /// EDMA3TC4 error interrupt.
    Edma3tc4Errint = 86,
    /// EDMA3TC5 error interrupt.
    Edma3tc5Errint = 87,
    /// ETB overflow.
    EtbOvflInt = 94,
    /// ETB underflow.
    EtbUnflInt = 95,
    /// Selector dropped a CPU interrupt event.
    IntErr = 96,
    /// EMC invalid IDMA parameters.
    EmcIdmaErr = 97,
    /// EFI interrupt from side A.
    EfiIntA = 100,
    /// EFI interrupt from side B.
    EfiIntB = 101,
    /// L1P single bit error detected during DMA read.
    L1pEd1 = 113,
    /// L2 single bit error detected.
    L2Ed1 = 116,
    /// L2 two bit error detected.
    L2Ed2 = 117,
    /// Powerdown sleep interrupt.
    PdcInt = 118,
    /// CPU memory protection fault.
    SysCmpa = 119,
    /// L1P CPU memory protection fault.
    L1pCmpa = 120,
    /// L1P DMA memory protection fault.
    L1pDmpa = 121,
    /// L1D CPU memory protection fault.
    L1dCmpa = 122,
    /// L1D DMA memory protection fault.
    L1dDmpa = 123,
    /// L2 CPU memory protection fault.
    L2Cmpa = 124,
    /// L2 DMA memory protection fault.
    L2Dmpa = 125,
    /// IDMA CPU memory protection fault.
    IdmaCmpa = 126,
    /// IDMA bus error interrupt.
    IdmaBusErr = 127,
}

impl Source {
    /// The event number this source carries on the selector inputs.
    pub const fn id(self) -> u32 {
        self as u32
    }
}

/// Low-level half of a vector context.
///
/// The vector entry stub reads this record directly during context save and
/// restore: word 0 is the register save area pointer, word 1 the initial
/// stack pointer. Exactly two machine words at an 8-byte-aligned address;
/// the layout is an ABI shared with the assembly side and must not change.
#[repr(C, align(8))]
pub struct ContextLow {
    /// Base of the CPU register save area.
    reg: VolatileCell<*mut u64>,
    /// Top of stack loaded into SP while the handler runs.
    tos: VolatileCell<*const u64>,
}

const _: () = assert!(align_of::<ContextLow>() == 8);
const _: () = assert!(offset_of!(ContextLow, reg) == 0);
const _: () = assert!(offset_of!(ContextLow, tos) == size_of::<*mut u64>());

impl ContextLow {
    const fn new() -> ContextLow {
        ContextLow {
            reg: VolatileCell::new(ptr::null_mut()),
            tos: VolatileCell::new(ptr::null()),
        }
    }

    fn bind(&self, reg: *mut u64, tos: *const u64) {
        self.reg.set(reg);
        self.tos.set(tos);
    }

    fn set_reg(&self, reg: *mut u64) {
        self.reg.set(reg);
    }

    fn clear(&self) {
        self.reg.set(ptr::null_mut());
        self.tos.set(ptr::null());
    }

    /// True while no handler context is bound to this record.
    pub fn is_clear(&self) -> bool {
        self.reg.get().is_null() && self.tos.get().is_null()
    }
}

/// Kernel-level half of a vector context: slot bookkeeping plus the owned
/// save resources. A slot is allocated exactly when it holds a handler.
struct Context<'a> {
    /// Physical vector number, 0 while free.
    number: Cell<u32>,
    /// Routed logical source, `DEFAULT_SOURCE` while free.
    source: Cell<u32>,
    /// The attached handler.
    handler: OptionalCell<&'a dyn Handler>,
    /// Register save area owned by this slot.
    snapshot: OptionalCell<RegisterSnapshot>,
    /// Dedicated handler stack owned by this slot.
    stack: OptionalCell<ExecutionStack>,
}

impl<'a> Context<'a> {
    const fn new() -> Context<'a> {
        Context {
            number: Cell::new(0),
            source: Cell::new(DEFAULT_SOURCE),
            handler: OptionalCell::empty(),
            snapshot: OptionalCell::empty(),
            stack: OptionalCell::empty(),
        }
    }
}

/// The interrupt selector.
///
/// Owns the vector table (the high-level contexts paired index-for-index
/// with the [`ContextLow`] records the hardware consumes) and the mux
/// register view. Every table mutation runs inside one gate critical
/// section, so the dispatch path never observes a half-written context.
pub struct Intc<'a> {
    registers: StaticRef<IntcRegisters>,
    gate: &'a dyn InterruptGate,
    vectors: &'a dyn VectorOps,
    contexts: [Context<'a>; NUM_VECTORS],
    low: [ContextLow; NUM_VECTORS],
    ready: Cell<bool>,
    nested: Cell<bool>,
}

impl<'a> Intc<'a> {
    pub const fn new(
        base: StaticRef<IntcRegisters>,
        gate: &'a dyn InterruptGate,
        vectors: &'a dyn VectorOps,
    ) -> Intc<'a> {
        Intc {
            registers: base,
            gate,
            vectors,
            contexts: [const { Context::new() }; NUM_VECTORS],
            low: [const { ContextLow::new() }; NUM_VECTORS],
            ready: Cell::new(false),
            nested: Cell::new(false),
        }
    }

    /// Bring the selector to its post-reset state and start accepting
    /// attachments.
    ///
    /// Clears every pending event flag, zeroes both context tables
    /// (releasing whatever an earlier run left allocated) and latches the
    /// reentrancy mode. Re-initialization after [`Intc::deinit`] reproduces
    /// the same zeroed state.
    pub fn init(&self, config: &Config) -> Result<(), ErrorCode> {
        self.ready.set(false);
        if config.cpu_clock_hz == 0 {
            return Err(ErrorCode::INVAL);
        }
        atomic(self.gate, || {
            self.nested.set(config.nested_interrupts);
            for group in self.registers.evtclr.iter() {
                group.set(0xffff_ffff);
            }
            for index in 0..NUM_VECTORS {
                self.clear_slot(index);
            }
            self.ready.set(true);
        });
        debug!(
            "intc: ready, {} vectors, nested={}",
            NUM_VECTORS, config.nested_interrupts
        );
        Ok(())
    }

    /// Tear the selector down: release every allocated slot and refuse
    /// further attachments until the next [`Intc::init`].
    pub fn deinit(&self) {
        atomic(self.gate, || {
            for index in 0..NUM_VECTORS {
                if self.contexts[index].handler.is_some() {
                    self.release_locked(index);
                }
            }
            self.ready.set(false);
        });
    }

    /// Dispatch routine entered by the raw vector stub with the table index
    /// of the vector that fired.
    ///
    /// In nested mode the fired source stays masked while the global mask is
    /// reopened for the duration of the handler, bounding preemption to this
    /// window; the prior states are restored before returning to the stub.
    pub fn handle_interrupt(&self, index: usize) {
        let Some(ctx) = self.contexts.get(index) else {
            return;
        };
        if ctx.handler.is_none() {
            return;
        }
        if self.nested.get() {
            let number = ctx.number.get();
            let was_enabled = self.vectors.disable(number);
            self.gate.restore(true);
            ctx.handler.map(|handler| handler.handle());
            self.gate.disable();
            self.vectors.enable(number, was_enabled);
        } else {
            ctx.handler.map(|handler| handler.handle());
        }
    }

    /// The low-level context table the vector entry stubs index.
    pub fn low_contexts(&self) -> &[ContextLow; NUM_VECTORS] {
        &self.low
    }

    /// Allocate a slot for `source`. Runs under the gate.
    fn allocate_locked(&self, handler: &'a dyn Handler, source: u32) -> Result<usize, ErrorCode> {
        if !self.ready.get() {
            return Err(ErrorCode::OFF);
        }
        if source >= NUM_SOURCES {
            return Err(ErrorCode::INVAL);
        }
        // Exactly one handler may own a logical source at a time.
        if self
            .contexts
            .iter()
            .any(|ctx| ctx.handler.is_some() && ctx.source.get() == source)
        {
            return Err(ErrorCode::BUSY);
        }
        // First free slot in table order.
        let index = self
            .contexts
            .iter()
            .position(|ctx| ctx.handler.is_none())
            .ok_or(ErrorCode::NOMEM)?;
        let number = index as u32 + VECTOR_BASE;
        // Failures from here on must leave the table untouched: both owned
        // resources are created and the mux is programmed before the slot is
        // populated, so an early return drops whatever exists so far.
        let snapshot = RegisterSnapshot::new()?;
        let stack = ExecutionStack::new(handler.stack_size())?;
        self.set_mux(source, number)?;
        let ctx = &self.contexts[index];
        self.low[index].bind(snapshot.save_area(), stack.top());
        ctx.number.set(number);
        ctx.source.set(source);
        ctx.handler.set(handler);
        ctx.snapshot.set(snapshot);
        ctx.stack.set(stack);
        Ok(index)
    }

    /// Tear down one allocated slot. Runs under the gate.
    fn release_locked(&self, index: usize) {
        let ctx = &self.contexts[index];
        let number = ctx.number.get();
        let source = ctx.source.get();
        self.vectors.disable(number);
        self.vectors.clear(number);
        // Drop the event flag the source may have left pending.
        self.registers.evtclr[(source >> 5) as usize].set(1 << (source & 0x1f));
        self.reset_mux(number);
        self.clear_slot(index);
    }

    /// Zero one slot back to the freshly initialized state.
    fn clear_slot(&self, index: usize) {
        let ctx = &self.contexts[index];
        ctx.handler.clear();
        ctx.snapshot.clear();
        ctx.stack.clear();
        ctx.number.set(0);
        ctx.source.set(DEFAULT_SOURCE);
        self.low[index].clear();
    }

    /// Program the source-select field feeding physical vector `vector`.
    ///
    /// Each mux register carries four 6-bit fields: vector `v` lives in
    /// register `v >> 2`, field `v & 3`. Only the twelve maskable vectors
    /// are programmable.
    fn set_mux(&self, source: u32, vector: u32) -> Result<(), ErrorCode> {
        if vector < VECTOR_BASE || vector > 15 {
            return Err(ErrorCode::INVAL);
        }
        let mux = &self.registers.intmux[(vector >> 2) as usize];
        let select = source & 0x3f;
        match vector & 0x3 {
            0 => mux.modify(INTMUX::INTSEL0.val(select)),
            1 => mux.modify(INTMUX::INTSEL1.val(select)),
            2 => mux.modify(INTMUX::INTSEL2.val(select)),
            _ => mux.modify(INTMUX::INTSEL3.val(select)),
        }
        Ok(())
    }

    /// Route a released vector back to the default source.
    fn reset_mux(&self, vector: u32) {
        let _ = self.set_mux(DEFAULT_ROUTE, vector);
    }
}

/// One attachment point onto the selector.
///
/// Peripheral drivers each hold a handle. A handle owns at most one vector
/// allocation at a time; while it holds none, every pass-through operation
/// is a defined no-op per the [`Interrupt`] defaults.
pub struct InterruptHandle<'a> {
    intc: &'a Intc<'a>,
    slot: OptionalCell<usize>,
}

impl<'a> InterruptHandle<'a> {
    pub const fn new(intc: &'a Intc<'a>) -> InterruptHandle<'a> {
        InterruptHandle {
            intc,
            slot: OptionalCell::empty(),
        }
    }

    fn vector_number(&self) -> Option<u32> {
        self.slot.map(|index| self.intc.contexts[index].number.get())
    }
}

impl<'a> Interrupt<'a> for InterruptHandle<'a> {
    type Snapshot = RegisterSnapshot;

    fn attach(&self, handler: &'a dyn Handler, source: u32) -> Result<(), ErrorCode> {
        atomic(self.intc.gate, || {
            if self.slot.is_some() {
                return Err(ErrorCode::ALREADY);
            }
            let index = self.intc.allocate_locked(handler, source)?;
            self.slot.set(index);
            debug!(
                "intc: source {} routed to vector {}",
                source,
                index as u32 + VECTOR_BASE
            );
            Ok(())
        })
    }

    fn detach(&self) {
        atomic(self.intc.gate, || {
            if let Some(index) = self.slot.take() {
                self.intc.release_locked(index);
                debug!("intc: vector {} released", index as u32 + VECTOR_BASE);
            }
        });
    }

    fn jump(&self) {
        if let Some(number) = self.vector_number() {
            self.intc.vectors.jump(number);
        }
    }

    fn clear(&self) {
        if let Some(number) = self.vector_number() {
            self.intc.vectors.clear(number);
        }
    }

    fn set(&self) {
        if let Some(number) = self.vector_number() {
            self.intc.vectors.set(number);
        }
    }

    fn disable(&self) -> bool {
        self.vector_number()
            .map_or(false, |number| self.intc.vectors.disable(number))
    }

    fn enable(&self, status: bool) {
        if let Some(number) = self.vector_number() {
            self.intc.vectors.enable(number, status);
        }
    }

    fn reset_register(&self) {
        self.slot.map(|index| {
            let ctx = &self.intc.contexts[index];
            ctx.snapshot
                .map_ref(|snapshot| self.intc.low[index].set_reg(snapshot.save_area()));
        });
    }

    fn set_register(&self, snapshot: &RegisterSnapshot) {
        self.slot
            .map(|index| self.intc.low[index].set_reg(snapshot.save_area()));
    }

    fn vector(&self) -> Option<u32> {
        self.vector_number()
    }
}
