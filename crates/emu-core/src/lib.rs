//! Core bus fabric and device substrate for 68k-family machine emulation.
//!
//! The flat 32-bit address space decodes through a 4 KiB page table to
//! RAM/ROM buffers or device register handlers. Devices react to bus
//! cycles, schedule future work in CPU-cycle time, and assert prioritized
//! interrupt lines. One execution context drives everything; the CPU
//! interpreter sits behind the narrow [`CpuCore`] ABI.

mod bus;
mod cpu;
mod device;
mod error;
mod irq;
mod sched;
mod symbols;
mod system;
mod trace;

pub use bus::{DeviceWindow, MemRegion, PageHit, PageMap, MAX_DEVICES, MAX_REGIONS, PAGE_SIZE};
pub use cpu::{
    CpuCore, Reg, RegAccess, VECTOR_ADDRESS_ERROR, VECTOR_BUS_ERROR, VECTOR_ILLEGAL,
};
pub use device::{Access, Device, DeviceHost, DeviceId, RegisterMap, Width};
pub use error::{DeviceFault, MapError, StopReason};
pub use irq::{autovector, InterruptController, AUTOVECTOR_BASE, SPURIOUS_VECTOR};
pub use sched::Scheduler;
pub use symbols::{Resolved, Symbol, SymbolTable};
pub use system::{BusConfig, BusFault, FaultKind, IllegalHook, System};
pub use trace::{MapClass, TraceKind, TraceRecord, TraceSink};
