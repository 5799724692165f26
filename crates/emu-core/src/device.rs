//! Peripheral model.
//!
//! A device decodes byte-granular register offsets inside its mapped
//! window, drives one prioritized interrupt line, and schedules future
//! work in CPU-cycle time. Devices never touch the bus: everything they
//! may do to the rest of the system goes through the [`DeviceHost`]
//! handle passed into each entry point.

use crate::error::DeviceFault;
use crate::irq::InterruptController;
use crate::sched::Scheduler;

/// Index of a registered device within the system.
pub type DeviceId = usize;

/// Access width of a bus cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Width {
    Byte,
    Word,
    Long,
}

impl Width {
    #[must_use]
    pub const fn bits(self) -> u8 {
        match self {
            Self::Byte => 8,
            Self::Word => 16,
            Self::Long => 32,
        }
    }

    #[must_use]
    pub const fn bytes(self) -> u32 {
        match self {
            Self::Byte => 1,
            Self::Word => 2,
            Self::Long => 4,
        }
    }

    #[must_use]
    pub const fn mask(self) -> u32 {
        match self {
            Self::Byte => 0xFF,
            Self::Word => 0xFFFF,
            Self::Long => 0xFFFF_FFFF,
        }
    }
}

/// Capabilities handed to a device while one of its entry points runs.
pub struct DeviceHost<'a> {
    id: DeviceId,
    clock: u64,
    sched: &'a mut Scheduler,
    irq: &'a mut InterruptController,
}

impl<'a> DeviceHost<'a> {
    pub(crate) fn new(
        id: DeviceId,
        clock: u64,
        sched: &'a mut Scheduler,
        irq: &'a mut InterruptController,
    ) -> Self {
        Self {
            id,
            clock,
            sched,
            irq,
        }
    }

    /// Current global cycle clock.
    #[must_use]
    pub fn now(&self) -> u64 {
        self.clock
    }

    /// Schedule `tag` to fire `cycles` from now. Re-scheduling a live tag
    /// replaces its deadline.
    pub fn schedule_after(&mut self, tag: &str, cycles: u64) {
        self.sched
            .schedule(self.id, tag, self.clock.saturating_add(cycles));
    }

    /// Schedule `tag` for an absolute cycle deadline.
    pub fn schedule_at(&mut self, tag: &str, deadline: u64) {
        self.sched.schedule(self.id, tag, deadline);
    }

    /// Cancel `tag`. Unknown tags are a no-op.
    pub fn cancel(&mut self, tag: &str) {
        self.sched.cancel(self.id, tag);
    }

    #[must_use]
    pub fn is_scheduled(&self, tag: &str) -> bool {
        self.sched.is_scheduled(self.id, tag)
    }

    /// Drive this device's interrupt line at `level` (0 deasserts).
    pub fn assert_ipl(&mut self, level: u8) {
        self.irq.assert_line(self.id, level);
    }

    /// Release this device's interrupt line.
    pub fn deassert_ipl(&mut self) {
        self.irq.deassert_line(self.id);
    }

    /// Level this device currently drives, 0 when deasserted.
    #[must_use]
    pub fn asserted_ipl(&self) -> u8 {
        self.irq.asserted_level(self.id)
    }
}

/// A memory-mapped peripheral.
pub trait Device {
    /// Stable name used in logs and fatal-stop messages.
    fn name(&self) -> &str;

    /// Return to power-on register state. The system has already released
    /// the device's interrupt line and cancelled its callbacks.
    fn reset(&mut self, host: &mut DeviceHost<'_>);

    /// Decode a read at `offset` within the device window. `None` means
    /// the `(offset, width)` pair does not decode; the bus turns that
    /// into a fault or an open-bus read per its configuration.
    fn read(&mut self, host: &mut DeviceHost<'_>, offset: u32, width: Width) -> Option<u32>;

    /// Decode a write at `offset`. `None` means not decoded.
    fn write(
        &mut self,
        host: &mut DeviceHost<'_>,
        offset: u32,
        width: Width,
        value: u32,
    ) -> Option<()>;

    /// Vector byte delivered when the CPU acknowledges `level`. `None`
    /// selects the autovector.
    fn vector(&mut self, _level: u8) -> Option<u8> {
        None
    }

    /// Scheduled-callback delivery for `tag`. Failures here are fatal to
    /// the emulator, never ignored.
    fn tick(&mut self, _host: &mut DeviceHost<'_>, _tag: &str) -> Result<(), DeviceFault> {
        Ok(())
    }
}

/// Access class of a decoded register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    R,
    W,
    Rw,
}

impl Access {
    #[must_use]
    const fn readable(self) -> bool {
        matches!(self, Self::R | Self::Rw)
    }

    #[must_use]
    const fn writable(self) -> bool {
        matches!(self, Self::W | Self::Rw)
    }
}

/// Declarative register decode table: `(offset, width, access)` tuples.
///
/// Devices consult this before their register `match` so undeclared
/// offsets and widths uniformly fail to decode.
#[derive(Debug, Default, Clone)]
pub struct RegisterMap {
    entries: Vec<(u32, Width, Access)>,
}

impl RegisterMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration of one register.
    #[must_use]
    pub fn reg(mut self, offset: u32, width: Width, access: Access) -> Self {
        self.entries.push((offset, width, access));
        self
    }

    #[must_use]
    pub fn decodes_read(&self, offset: u32, width: Width) -> bool {
        self.entries
            .iter()
            .any(|&(o, w, a)| o == offset && w == width && a.readable())
    }

    #[must_use]
    pub fn decodes_write(&self, offset: u32, width: Width) -> bool {
        self.entries
            .iter()
            .any(|&(o, w, a)| o == offset && w == width && a.writable())
    }
}
