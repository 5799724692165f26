//! The system fabric: page-mapped bus, devices, scheduler, interrupts.
//!
//! `System` owns everything the CPU core talks to. Memory accesses decode
//! through the page table to region buffers or device register handlers;
//! devices reach back (scheduling, interrupt lines) only through the
//! [`DeviceHost`] handle, so a single mutable owner drives the whole
//! machine. Faults and timeslice truncation are pending state the core
//! observes at instruction boundaries rather than re-entrant calls.

use crate::bus::{DeviceWindow, MemRegion, PageHit, PageMap, MAX_DEVICES};
use crate::cpu::{RegAccess, VECTOR_ADDRESS_ERROR, VECTOR_BUS_ERROR};
use crate::device::{Device, DeviceHost, DeviceId, Width};
use crate::error::{MapError, StopReason};
use crate::irq::{autovector, InterruptController, SPURIOUS_VECTOR};
use crate::sched::Scheduler;
use crate::trace::{MapClass, TraceKind, TraceRecord, TraceSink};

/// Fault classes delivered to the CPU as exceptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Unmapped page or failed device decode.
    Bus,
    /// Misaligned word/long access.
    Address,
}

/// A pending guest-visible fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusFault {
    pub kind: FaultKind,
    pub addr: u32,
    pub write: bool,
}

impl BusFault {
    /// Exception vector this fault is delivered through.
    #[must_use]
    pub const fn vector(self) -> u8 {
        match self.kind {
            FaultKind::Bus => VECTOR_BUS_ERROR,
            FaultKind::Address => VECTOR_ADDRESS_ERROR,
        }
    }
}

/// Fault-generation knobs. These are emulator policy, independent of the
/// CPU model: with a knob off, the access completes benignly (reads
/// return 0 or degrade to byte cycles, writes are dropped) and only the
/// trace record remains.
#[derive(Debug, Clone, Copy)]
pub struct BusConfig {
    pub bus_error_on_unmapped: bool,
    pub address_error_on_unaligned: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            bus_error_on_unmapped: true,
            address_error_on_unaligned: true,
        }
    }
}

/// Hook offered illegal-instruction traps before they reach the guest's
/// exception vector. Returning `true` consumes the instruction.
pub trait IllegalHook {
    fn handle(&mut self, sys: &mut System, regs: &mut dyn RegAccess) -> bool;
}

/// The bus fabric and device/time substrate.
pub struct System {
    map: PageMap,
    devices: Vec<Option<Box<dyn Device>>>,
    /// Per-device trace gate, ANDed with the global enable.
    device_trace: Vec<bool>,
    sched: Scheduler,
    irq: InterruptController,
    clock: u64,
    config: BusConfig,
    trace_enabled: bool,
    trace_sink: Option<TraceSink>,
    pending_fault: Option<BusFault>,
    slice_over: bool,
    stop: Option<StopReason>,
    illegal_hook: Option<Box<dyn IllegalHook>>,
}

impl Default for System {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl System {
    #[must_use]
    pub fn new(config: BusConfig) -> Self {
        Self {
            map: PageMap::new(),
            devices: Vec::new(),
            device_trace: Vec::new(),
            sched: Scheduler::new(),
            irq: InterruptController::new(),
            clock: 0,
            config,
            trace_enabled: false,
            trace_sink: None,
            pending_fault: None,
            slice_over: false,
            stop: None,
            illegal_hook: None,
        }
    }

    // --- clock ---

    #[must_use]
    pub fn clock(&self) -> u64 {
        self.clock
    }

    /// Advance the global cycle clock. Only the emulator loop calls this,
    /// after a successful CPU step.
    pub fn advance_clock(&mut self, cycles: u64) {
        self.clock += cycles;
    }

    // --- configuration ---

    #[must_use]
    pub fn bus_config(&self) -> BusConfig {
        self.config
    }

    pub fn set_bus_config(&mut self, config: BusConfig) {
        self.config = config;
    }

    // --- tracing ---

    pub fn set_trace_sink(&mut self, sink: TraceSink) {
        self.trace_sink = Some(sink);
    }

    pub fn clear_trace_sink(&mut self) {
        self.trace_sink = None;
    }

    pub fn set_trace_enabled(&mut self, enabled: bool) {
        self.trace_enabled = enabled;
    }

    fn trace(&mut self, kind: TraceKind, addr: u32, width: u8, value: u32) {
        if !self.trace_enabled {
            return;
        }
        if let Some(sink) = self.trace_sink.as_mut() {
            sink(&TraceRecord {
                kind,
                addr,
                width,
                value,
            });
        }
    }

    /// Instruction-start marker from the CPU adapter. The fetch itself
    /// does not produce a memory-read record.
    pub fn trace_instr(&mut self, pc: u32, opcode: u16) {
        self.trace(TraceKind::Instr, pc, 0, u32::from(opcode));
    }

    // --- mapping operations ---

    /// Map a RAM/ROM region. `initial` is truncated or zero-padded to
    /// `size`.
    pub fn add_memory(
        &mut self,
        base: u32,
        size: u32,
        writable: bool,
        initial: Option<&[u8]>,
    ) -> Result<(), MapError> {
        self.map.add_memory(base, size, writable, initial)?;
        let class = if writable { MapClass::Ram } else { MapClass::Rom };
        self.trace(TraceKind::MemMap, base, 0, class as u32);
        Ok(())
    }

    /// Unmap the region based at `base`.
    pub fn remove_memory(&mut self, base: u32) -> Result<(), MapError> {
        self.map.remove_memory(base)?;
        self.trace(TraceKind::MemUnmap, base, 0, 0);
        Ok(())
    }

    /// Move the region based at `src` to a disjoint free `dst`.
    pub fn move_memory(&mut self, src: u32, dst: u32) -> Result<(), MapError> {
        self.map.move_memory(src, dst)?;
        self.trace(TraceKind::MemMove, src, 0, dst);
        Ok(())
    }

    /// Register a device and map its window at `[base, base + len)`.
    pub fn add_device(
        &mut self,
        base: u32,
        len: u32,
        device: Box<dyn Device>,
    ) -> Result<DeviceId, MapError> {
        if self.devices.len() >= MAX_DEVICES {
            return Err(MapError::TooMany);
        }
        let id = self.devices.len();
        self.map.add_device(base, len, id)?;
        log::debug!(target: "bus", "mapped device {} at {base:#010x}+{len:#x}", device.name());
        self.devices.push(Some(device));
        self.device_trace.push(true);
        self.trace(TraceKind::MemMap, base, 0, MapClass::Device as u32);
        Ok(id)
    }

    /// Gate one device's register-access trace records.
    pub fn set_device_trace_enabled(&mut self, id: DeviceId, enabled: bool) {
        if let Some(gate) = self.device_trace.get_mut(id) {
            *gate = enabled;
        }
    }

    #[must_use]
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    // --- CPU-facing bus ABI ---

    pub fn read8(&mut self, addr: u32) -> u32 {
        self.access_read(addr, Width::Byte, true)
    }

    pub fn read16(&mut self, addr: u32) -> u32 {
        self.access_read(addr, Width::Word, true)
    }

    pub fn read32(&mut self, addr: u32) -> u32 {
        self.access_read(addr, Width::Long, true)
    }

    /// Instruction fetch: identical decode and fault behavior to
    /// [`Self::read16`], but successful fetches bypass the trace tap.
    pub fn fetch16(&mut self, addr: u32) -> u32 {
        self.access_read(addr, Width::Word, false)
    }

    pub fn write8(&mut self, addr: u32, value: u32) {
        self.access_write(addr, Width::Byte, value & 0xFF);
    }

    pub fn write16(&mut self, addr: u32, value: u32) {
        self.access_write(addr, Width::Word, value & 0xFFFF);
    }

    pub fn write32(&mut self, addr: u32, value: u32) {
        self.access_write(addr, Width::Long, value);
    }

    fn access_read(&mut self, addr: u32, width: Width, trace_ok: bool) -> u32 {
        if width != Width::Byte && addr & 1 != 0 {
            if self.config.address_error_on_unaligned {
                self.trace(TraceKind::InvalidRead, addr, width.bits(), 0);
                self.raise_fault(FaultKind::Address, addr, false);
                return 0;
            }
            // Alignment checking off: degrade to byte cycles.
            let mut value = 0u32;
            for i in 0..width.bytes() {
                value = (value << 8) | self.access_read(addr.wrapping_add(i), Width::Byte, trace_ok);
            }
            return value;
        }
        match self.map.lookup(addr) {
            PageHit::Buffer(slot) => {
                let Some(region) = self.map.region(slot) else {
                    return self.invalid_read(addr, width);
                };
                if region.contains(addr, width.bytes()) {
                    let value = Self::region_read(region, addr, width);
                    if trace_ok {
                        self.trace(TraceKind::MemRead, addr, width.bits(), value);
                    }
                    value
                } else {
                    // An aligned long can straddle the end of a region;
                    // split into the two word cycles the CPU would issue.
                    let hi = self.access_read(addr, Width::Word, trace_ok);
                    let lo = self.access_read(addr.wrapping_add(2), Width::Word, trace_ok);
                    (hi << 16) | lo
                }
            }
            PageHit::Device(slot) => match self.device_read(slot, addr, width) {
                Some(value) => {
                    let value = value & width.mask();
                    if self.device_trace_enabled(slot) {
                        self.trace(TraceKind::DevRead, addr, width.bits(), value);
                    }
                    value
                }
                None => self.invalid_read(addr, width),
            },
            PageHit::Invalid => self.invalid_read(addr, width),
        }
    }

    fn device_trace_enabled(&self, slot: usize) -> bool {
        self.map
            .window(slot)
            .and_then(|w| self.device_trace.get(w.device).copied())
            .unwrap_or(true)
    }

    fn access_write(&mut self, addr: u32, width: Width, value: u32) {
        if width != Width::Byte && addr & 1 != 0 {
            if self.config.address_error_on_unaligned {
                self.trace(TraceKind::InvalidWrite, addr, width.bits(), value);
                self.raise_fault(FaultKind::Address, addr, true);
                return;
            }
            for i in 0..width.bytes() {
                let shift = 8 * (width.bytes() - 1 - i);
                self.access_write(addr.wrapping_add(i), Width::Byte, (value >> shift) & 0xFF);
            }
            return;
        }
        match self.map.lookup(addr) {
            PageHit::Buffer(slot) => {
                let Some(region) = self.map.region(slot) else {
                    self.invalid_write(addr, width, value);
                    return;
                };
                // Writes to read-only regions fault like unmapped pages.
                if !region.writable() {
                    self.invalid_write(addr, width, value);
                    return;
                }
                if region.contains(addr, width.bytes()) {
                    let Some(region) = self.map.region_mut(slot) else {
                        return;
                    };
                    Self::region_write(region, addr, width, value);
                    self.trace(TraceKind::MemWrite, addr, width.bits(), value);
                } else {
                    self.access_write(addr, Width::Word, value >> 16);
                    self.access_write(addr.wrapping_add(2), Width::Word, value & 0xFFFF);
                }
            }
            PageHit::Device(slot) => {
                if self.device_write(slot, addr, width, value).is_some() {
                    if self.device_trace_enabled(slot) {
                        self.trace(TraceKind::DevWrite, addr, width.bits(), value);
                    }
                } else {
                    self.invalid_write(addr, width, value);
                }
            }
            PageHit::Invalid => self.invalid_write(addr, width, value),
        }
    }

    fn region_read(region: &MemRegion, addr: u32, width: Width) -> u32 {
        let off = (addr - region.base()) as usize;
        let b = region.bytes();
        match width {
            Width::Byte => u32::from(b[off]),
            Width::Word => u32::from(u16::from_be_bytes([b[off], b[off + 1]])),
            Width::Long => u32::from_be_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]]),
        }
    }

    fn region_write(region: &mut MemRegion, addr: u32, width: Width, value: u32) {
        let off = (addr - region.base()) as usize;
        let b = region.bytes_mut();
        match width {
            Width::Byte => b[off] = value as u8,
            Width::Word => b[off..off + 2].copy_from_slice(&(value as u16).to_be_bytes()),
            Width::Long => b[off..off + 4].copy_from_slice(&value.to_be_bytes()),
        }
    }

    fn invalid_read(&mut self, addr: u32, width: Width) -> u32 {
        self.trace(TraceKind::InvalidRead, addr, width.bits(), 0);
        if self.config.bus_error_on_unmapped {
            self.raise_fault(FaultKind::Bus, addr, false);
        }
        0
    }

    fn invalid_write(&mut self, addr: u32, width: Width, value: u32) {
        self.trace(TraceKind::InvalidWrite, addr, width.bits(), value);
        if self.config.bus_error_on_unmapped {
            self.raise_fault(FaultKind::Bus, addr, true);
        }
    }

    fn raise_fault(&mut self, kind: FaultKind, addr: u32, write: bool) {
        // First fault wins within one instruction.
        if self.pending_fault.is_none() {
            self.pending_fault = Some(BusFault { kind, addr, write });
        }
        self.slice_over = true;
    }

    // --- device dispatch ---

    fn window_offset(window: DeviceWindow, addr: u32, width: Width) -> Option<u32> {
        let end = u64::from(window.base) + u64::from(window.len);
        if addr < window.base || u64::from(addr) + u64::from(width.bytes()) > end {
            return None;
        }
        Some(addr - window.base)
    }

    fn with_device<R>(
        &mut self,
        id: DeviceId,
        f: impl FnOnce(&mut dyn Device, &mut DeviceHost<'_>) -> R,
    ) -> Option<R> {
        let mut device = self.devices.get_mut(id)?.take()?;
        let mut host = DeviceHost::new(id, self.clock, &mut self.sched, &mut self.irq);
        let result = f(device.as_mut(), &mut host);
        self.devices[id] = Some(device);
        Some(result)
    }

    fn device_read(&mut self, slot: usize, addr: u32, width: Width) -> Option<u32> {
        let window = self.map.window(slot)?;
        let offset = Self::window_offset(window, addr, width)?;
        self.with_device(window.device, |dev, host| dev.read(host, offset, width))?
    }

    fn device_write(&mut self, slot: usize, addr: u32, width: Width, value: u32) -> Option<()> {
        let window = self.map.window(slot)?;
        let offset = Self::window_offset(window, addr, width)?;
        self.with_device(window.device, |dev, host| {
            dev.write(host, offset, width, value)
        })?
    }

    // --- non-perturbing reads (disassembler, hooks) ---

    /// Read one byte without touching devices, traces, or fault state.
    #[must_use]
    pub fn peek8(&self, addr: u32) -> Option<u8> {
        match self.map.lookup(addr) {
            PageHit::Buffer(slot) => {
                let region = self.map.region(slot)?;
                if region.contains(addr, 1) {
                    Some(region.bytes()[(addr - region.base()) as usize])
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn peek16(&self, addr: u32) -> Option<u16> {
        let hi = self.peek8(addr)?;
        let lo = self.peek8(addr.wrapping_add(1))?;
        Some(u16::from_be_bytes([hi, lo]))
    }

    /// Disassembler word read: never dispatches to devices, never traces,
    /// never faults. Returns the sentinel `0xFFFF` on miss.
    #[must_use]
    pub fn read_disasm_16(&self, addr: u32) -> u32 {
        u32::from(self.peek16(addr).unwrap_or(0xFFFF))
    }

    /// Disassembler long read; `0xFFFF_FFFF` on miss.
    #[must_use]
    pub fn read_disasm_32(&self, addr: u32) -> u32 {
        match (self.peek16(addr), self.peek16(addr.wrapping_add(2))) {
            (Some(hi), Some(lo)) => (u32::from(hi) << 16) | u32::from(lo),
            _ => 0xFFFF_FFFF,
        }
    }

    // --- interrupts ---

    /// Effective interrupt priority level on the CPU pins.
    #[must_use]
    pub fn irq_level(&self) -> u8 {
        self.irq.current_ipl()
    }

    /// Interrupt acknowledge at `level`: pick one asserter (round-robin)
    /// and return its vector byte, the autovector when the device supplies
    /// none, or the spurious vector when nothing asserts the level.
    pub fn ack_irq(&mut self, level: u8) -> u8 {
        let Some(id) = self.irq.acknowledge(level) else {
            return SPURIOUS_VECTOR;
        };
        let vector = self
            .devices
            .get_mut(id)
            .and_then(Option::as_mut)
            .and_then(|dev| dev.vector(level));
        vector.unwrap_or_else(|| autovector(level))
    }

    // --- faults, timeslice, stop ---

    /// Take the pending fault, if any. The CPU core polls this after each
    /// memory access and turns it into the matching exception.
    pub fn take_fault(&mut self) -> Option<BusFault> {
        self.pending_fault.take()
    }

    /// True when the core should return from its timeslice early.
    #[must_use]
    pub fn slice_over(&self) -> bool {
        self.slice_over
    }

    /// Ask the core to wind down its current timeslice.
    pub fn end_timeslice(&mut self) {
        self.slice_over = true;
    }

    /// Clear the timeslice flag; the loop calls this before each quantum.
    pub fn begin_slice(&mut self) {
        self.slice_over = false;
    }

    /// Request a loop exit. The first reason sticks.
    pub fn request_stop(&mut self, reason: StopReason) {
        if self.stop.is_none() {
            self.stop = Some(reason);
        }
        self.slice_over = true;
    }

    #[must_use]
    pub fn stop_reason(&self) -> Option<&StopReason> {
        self.stop.as_ref()
    }

    pub fn take_stop(&mut self) -> Option<StopReason> {
        self.stop.take()
    }

    // --- scheduler interface for the loop ---

    /// Deadline of the earliest scheduled callback.
    pub fn earliest_deadline(&mut self) -> Option<u64> {
        self.sched.earliest_deadline()
    }

    /// Run every callback whose deadline has arrived, in deadline order.
    /// A callback failure requests a fatal stop and abandons the sweep.
    pub fn run_due_callbacks(&mut self) {
        while let Some((id, tag)) = self.sched.pop_due(self.clock) {
            let outcome = self.with_device(id, |dev, host| {
                (dev.tick(host, &tag), dev.name().to_owned())
            });
            if let Some((Err(fault), name)) = outcome {
                self.request_stop(StopReason::Fatal(format!("{name}: {fault}")));
                return;
            }
        }
    }

    // --- reset ---

    /// Reset the device substrate: cancel callbacks, release interrupt
    /// lines, return each device to power-on state. When
    /// `reset_contents` is set, regions also restore their construction
    /// image. The page table itself is unchanged.
    pub fn reset_devices(&mut self, reset_contents: bool) {
        if reset_contents {
            for region in self.map.regions_mut() {
                region.reinit();
            }
        }
        for id in 0..self.devices.len() {
            self.sched.cancel_device(id);
            self.irq.deassert_line(id);
            self.with_device(id, |dev, host| dev.reset(host));
        }
        self.pending_fault = None;
    }

    // --- illegal-instruction hook ---

    pub fn set_illegal_hook(&mut self, hook: Box<dyn IllegalHook>) {
        self.illegal_hook = Some(hook);
    }

    /// Offer an illegal-instruction trap to the installed hook. Returns
    /// `true` when the hook consumed the instruction.
    pub fn illegal_instruction(&mut self, regs: &mut dyn RegAccess) -> bool {
        let Some(mut hook) = self.illegal_hook.take() else {
            return false;
        };
        let handled = hook.handle(self, regs);
        if self.illegal_hook.is_none() {
            self.illegal_hook = Some(hook);
        }
        handled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeviceFault;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// A device with one byte register at +0 and one word register at +2.
    struct Latch {
        byte: u8,
        word: u16,
    }

    impl Device for Latch {
        fn name(&self) -> &str {
            "latch"
        }

        fn reset(&mut self, _host: &mut DeviceHost<'_>) {
            self.byte = 0;
            self.word = 0;
        }

        fn read(&mut self, _host: &mut DeviceHost<'_>, offset: u32, width: Width) -> Option<u32> {
            match (offset, width) {
                (0, Width::Byte) => Some(u32::from(self.byte)),
                (2, Width::Word) => Some(u32::from(self.word)),
                _ => None,
            }
        }

        fn write(
            &mut self,
            _host: &mut DeviceHost<'_>,
            offset: u32,
            width: Width,
            value: u32,
        ) -> Option<()> {
            match (offset, width) {
                (0, Width::Byte) => {
                    self.byte = value as u8;
                    Some(())
                }
                (2, Width::Word) => {
                    self.word = value as u16;
                    Some(())
                }
                _ => None,
            }
        }
    }

    fn sys_with_ram() -> System {
        let mut sys = System::default();
        sys.add_memory(0x1000, 0x2000, true, None).unwrap();
        sys
    }

    fn collect_traces(sys: &mut System) -> Rc<RefCell<Vec<TraceRecord>>> {
        let records = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&records);
        sys.set_trace_sink(Box::new(move |r| sink.borrow_mut().push(*r)));
        sys.set_trace_enabled(true);
        records
    }

    #[test]
    fn big_endian_round_trip_across_widths() {
        let mut sys = sys_with_ram();
        sys.write32(0x1000, 0x1122_3344);
        assert_eq!(sys.read32(0x1000), 0x1122_3344);
        assert_eq!(sys.read16(0x1000), 0x1122);
        assert_eq!(sys.read16(0x1002), 0x3344);
        assert_eq!(sys.read8(0x1000), 0x11);
        assert_eq!(sys.read8(0x1003), 0x44);
        assert!(sys.take_fault().is_none());
    }

    #[test]
    fn unmapped_read_faults_and_traces() {
        let mut sys = sys_with_ram();
        let records = collect_traces(&mut sys);
        assert_eq!(sys.read16(0x40_0000), 0);
        let fault = sys.take_fault().unwrap();
        assert_eq!(fault.kind, FaultKind::Bus);
        assert_eq!(fault.addr, 0x40_0000);
        assert!(sys.slice_over());
        let recs = records.borrow();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].kind, TraceKind::InvalidRead);
    }

    #[test]
    fn bus_error_disabled_reads_zero_without_fault() {
        let mut sys = System::new(BusConfig {
            bus_error_on_unmapped: false,
            address_error_on_unaligned: true,
        });
        let records = collect_traces(&mut sys);
        assert_eq!(sys.read32(0x40_0000), 0);
        assert!(sys.take_fault().is_none());
        assert!(!sys.slice_over());
        assert_eq!(records.borrow()[0].kind, TraceKind::InvalidRead);
    }

    #[test]
    fn misaligned_word_access_is_an_address_error() {
        let mut sys = sys_with_ram();
        sys.read16(0x1001);
        assert_eq!(sys.take_fault().unwrap().kind, FaultKind::Address);
        sys.begin_slice();
        sys.write32(0x1003, 0);
        assert_eq!(sys.take_fault().unwrap().kind, FaultKind::Address);
    }

    #[test]
    fn misaligned_access_degrades_to_bytes_when_disabled() {
        let mut sys = System::new(BusConfig {
            bus_error_on_unmapped: true,
            address_error_on_unaligned: false,
        });
        sys.add_memory(0x1000, 0x1000, true, None).unwrap();
        sys.write32(0x1001, 0xAABB_CCDD);
        assert!(sys.take_fault().is_none());
        assert_eq!(sys.read8(0x1001), 0xAA);
        assert_eq!(sys.read8(0x1004), 0xDD);
        assert_eq!(sys.read32(0x1001), 0xAABB_CCDD);
    }

    #[test]
    fn rom_write_is_dropped_and_faults() {
        let mut sys = System::default();
        sys.add_memory(0x0, 0x1000, false, Some(&[0xC0, 0xFF])).unwrap();
        sys.write8(0x0, 0x55);
        assert!(sys.take_fault().unwrap().write);
        sys.begin_slice();
        assert_eq!(sys.read8(0x0), 0xC0);
    }

    #[test]
    fn device_register_round_trip() {
        let mut sys = System::default();
        sys.add_device(0x2000, 4, Box::new(Latch { byte: 0, word: 0 }))
            .unwrap();
        sys.write8(0x2000, 0x7E);
        sys.write16(0x2002, 0xBEEF);
        assert_eq!(sys.read8(0x2000), 0x7E);
        assert_eq!(sys.read16(0x2002), 0xBEEF);
        assert!(sys.take_fault().is_none());
    }

    #[test]
    fn undecoded_device_offset_faults() {
        let mut sys = System::default();
        sys.add_device(0x2000, 4, Box::new(Latch { byte: 0, word: 0 }))
            .unwrap();
        // In-page but past the declared window length.
        sys.read8(0x2004);
        assert_eq!(sys.take_fault().unwrap().kind, FaultKind::Bus);
        sys.begin_slice();
        // Decoded offset, undecoded width.
        sys.read32(0x2000);
        assert_eq!(sys.take_fault().unwrap().kind, FaultKind::Bus);
    }

    #[test]
    fn disasm_reads_do_not_trace_or_fault() {
        let mut sys = sys_with_ram();
        sys.write16(0x1000, 0x4E71);
        let records = collect_traces(&mut sys);
        records.borrow_mut().clear();
        assert_eq!(sys.read_disasm_16(0x1000), 0x4E71);
        assert_eq!(sys.read_disasm_16(0x40_0000), 0xFFFF);
        assert_eq!(sys.read_disasm_32(0x40_0000), 0xFFFF_FFFF);
        assert!(sys.take_fault().is_none());
        assert!(records.borrow().is_empty());
    }

    #[test]
    fn fetch_bypasses_trace_but_still_faults() {
        let mut sys = sys_with_ram();
        sys.write16(0x1000, 0x4E71);
        let records = collect_traces(&mut sys);
        records.borrow_mut().clear();
        assert_eq!(sys.fetch16(0x1000), 0x4E71);
        assert!(records.borrow().is_empty());
        sys.fetch16(0x40_0000);
        assert_eq!(sys.take_fault().unwrap().kind, FaultKind::Bus);
        assert_eq!(records.borrow()[0].kind, TraceKind::InvalidRead);
    }

    #[test]
    fn ghost_mappings_fault_after_removal() {
        let mut sys = sys_with_ram();
        sys.write8(0x1000, 0xAA);
        sys.remove_memory(0x1000).unwrap();
        assert_eq!(sys.read8(0x1000), 0);
        assert_eq!(sys.take_fault().unwrap().kind, FaultKind::Bus);
    }

    #[test]
    fn device_trace_gate_filters_records() {
        let mut sys = System::default();
        let id = sys
            .add_device(0x2000, 4, Box::new(Latch { byte: 0, word: 0 }))
            .unwrap();
        let records = collect_traces(&mut sys);
        sys.write8(0x2000, 1);
        assert_eq!(records.borrow().len(), 1);
        sys.set_device_trace_enabled(id, false);
        sys.write8(0x2000, 2);
        assert_eq!(records.borrow().len(), 1, "gated device emits no records");
        sys.set_device_trace_enabled(id, true);
        sys.read8(0x2000);
        assert_eq!(records.borrow().len(), 2);
    }

    /// A device whose callback fails.
    struct Faulty;

    impl Device for Faulty {
        fn name(&self) -> &str {
            "faulty"
        }
        fn reset(&mut self, _host: &mut DeviceHost<'_>) {}
        fn read(&mut self, _h: &mut DeviceHost<'_>, _o: u32, _w: Width) -> Option<u32> {
            None
        }
        fn write(&mut self, _h: &mut DeviceHost<'_>, _o: u32, _w: Width, _v: u32) -> Option<()> {
            None
        }
        fn tick(&mut self, _host: &mut DeviceHost<'_>, _tag: &str) -> Result<(), DeviceFault> {
            Err(DeviceFault::new("backing store lost"))
        }
    }

    #[test]
    fn callback_failure_is_fatal() {
        let mut sys = System::default();
        let id = sys.add_device(0x3000, 4, Box::new(Faulty)).unwrap();
        sys.with_device(id, |_dev, host| host.schedule_after("t", 10));
        sys.advance_clock(10);
        sys.run_due_callbacks();
        match sys.stop_reason() {
            Some(StopReason::Fatal(msg)) => assert!(msg.contains("faulty")),
            other => panic!("expected fatal stop, got {other:?}"),
        }
    }
}
