//! 68k single-board-computer machine.
//!
//! Ties a CPU core to the bus fabric with a quantum loop: each iteration
//! runs the core for at most `quantum` cycles — less when a scheduled
//! device callback is due sooner — then advances the global clock, fires
//! due callbacks, and refreshes the interrupt pins. Reset order follows
//! the hardware: devices first, then the CPU, then the initial IPL.

mod boards;
mod config;
mod natfeats;
mod trace_fmt;

pub use boards::{
    build, BuildError, BuiltBoard, ConsoleInput, SBC_DUART_BASE, SBC_DUART_IPL, SBC_IDE_BASE,
    SBC_IDE_IPL, SIMPLE_DISK_BASE, SIMPLE_TIMER_BASE, SIMPLE_UART_BASE, SIMPLE_UART_IPL,
    TIMER_CYCLES_PER_TICK,
};
pub use config::{Board, ConfigError, CpuModel, MachineConfig};
pub use natfeats::{NatFeats, NATFEAT_CALL, NATFEAT_ID, NATFEAT_VERSION};
pub use trace_fmt::format_record;

use emu_core::{CpuCore, StopReason, SymbolTable, System};

/// Default upper bound on cycles per quantum.
pub const DEFAULT_QUANTUM: u64 = 100_000;

/// The emulator: a CPU core coupled to the system fabric.
pub struct Emulator<C: CpuCore> {
    pub sys: System,
    pub cpu: C,
    pub symbols: SymbolTable,
    quantum: u64,
    reset_contents: bool,
}

impl<C: CpuCore> Emulator<C> {
    #[must_use]
    pub fn new(sys: System, cpu: C) -> Self {
        Self {
            sys,
            cpu,
            symbols: SymbolTable::new(),
            quantum: DEFAULT_QUANTUM,
            reset_contents: false,
        }
    }

    #[must_use]
    pub fn with_quantum(mut self, quantum: u64) -> Self {
        self.quantum = quantum.max(1);
        self
    }

    #[must_use]
    pub fn with_reset_contents(mut self, reset_contents: bool) -> Self {
        self.reset_contents = reset_contents;
        self
    }

    /// Feed symbols from a loaded image into the symbolicator.
    pub fn load_symbols<I>(&mut self, image: &str, symbols: I)
    where
        I: IntoIterator<Item = (String, u32, u32)>,
    {
        self.symbols.add_image(image, symbols);
    }

    /// Full machine reset: devices, then the CPU, then the IPL pins.
    /// Region contents are preserved unless `reset_contents` is set.
    pub fn reset(&mut self) {
        self.sys.take_stop();
        self.sys.reset_devices(self.reset_contents);
        self.cpu.reset(&mut self.sys);
        self.cpu.set_irq(self.sys.irq_level());
    }

    /// Run one quantum. Returns the stop reason once one is set.
    pub fn step_quantum(&mut self) -> Option<StopReason> {
        self.sys.begin_slice();
        let now = self.sys.clock();
        let limit = now + self.quantum;
        let deadline = self.sys.earliest_deadline().map_or(limit, |d| d.min(limit));
        let slice = deadline.saturating_sub(now).max(1);
        let used = self.cpu.execute(&mut self.sys, slice);
        // A core with nothing to run still lets scheduled time pass.
        self.sys.advance_clock(if used == 0 { slice } else { used });
        self.sys.run_due_callbacks();
        self.cpu.set_irq(self.sys.irq_level());
        self.sys.stop_reason().cloned()
    }

    /// Run until a stop is requested.
    pub fn run(&mut self) -> StopReason {
        loop {
            if let Some(reason) = self.step_quantum() {
                log::debug!(target: "machine", "stopping: {reason:?}");
                return reason;
            }
        }
    }

    /// Run until a stop is requested or `max_cycles` have elapsed.
    pub fn run_for(&mut self, max_cycles: u64) -> Option<StopReason> {
        let end = self.sys.clock() + max_cycles;
        while self.sys.clock() < end {
            if let Some(reason) = self.step_quantum() {
                return Some(reason);
            }
        }
        None
    }
}
