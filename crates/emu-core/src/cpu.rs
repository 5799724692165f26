//! CPU core trait.
//!
//! The interpreter is an external collaborator consumed through this
//! narrow ABI: run for a bounded number of cycles against the system bus,
//! expose registers by name, and present the arbitrated interrupt level.
//! Bus faults and timeslice truncation are communicated through pending
//! state on [`System`] that the core observes at instruction boundaries,
//! so there is exactly one boundary between the interpreter and the
//! fabric.

use crate::system::System;

/// Exception vector for a bus error (bad decode).
pub const VECTOR_BUS_ERROR: u8 = 2;
/// Exception vector for an address error (misaligned word access).
pub const VECTOR_ADDRESS_ERROR: u8 = 3;
/// Exception vector for an illegal instruction.
pub const VECTOR_ILLEGAL: u8 = 4;

/// Register names for the adapter's register I/O surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg {
    /// Data register 0..=7.
    D(u8),
    /// Address register 0..=7 (A7 is the active stack pointer).
    A(u8),
    Pc,
    Sr,
    /// The active stack pointer.
    Sp,
    Usp,
    Ssp,
}

/// Register file access, usable while the core itself is borrowed.
pub trait RegAccess {
    fn get_reg(&self, reg: Reg) -> u32;
    fn set_reg(&mut self, reg: Reg, value: u32);
}

/// An execution engine driving the system bus.
pub trait CpuCore: RegAccess {
    /// Assert the reset line: reload initial SSP/PC state.
    fn reset(&mut self, sys: &mut System);

    /// Execute for up to `cycles` cycles and return the cycles consumed.
    ///
    /// The return value never exceeds `cycles`. The core returns early
    /// when the system ends the timeslice (pending fault, stop request).
    /// A core that can make no progress returns 0; the loop then lets
    /// scheduled time pass.
    fn execute(&mut self, sys: &mut System, cycles: u64) -> u64;

    /// Present the arbitrated interrupt priority level on the IRQ pins.
    /// Cores may also resample [`System::irq_level`] between instructions.
    fn set_irq(&mut self, level: u8);

    /// Disassemble the instruction at `pc`: text and byte length. Cores
    /// without a disassembler return `None`.
    fn disassemble(&mut self, _sys: &System, _pc: u32) -> Option<(String, u32)> {
        None
    }
}
