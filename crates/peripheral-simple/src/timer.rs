//! Simple countdown timer.
//!
//! | offset | width | read | write |
//! |---|---|---|---|
//! | 0x00 | long | remaining count | autoload count |
//! | 0x05 | byte | VECTOR | VECTOR |
//!
//! The counter decrements once every `cycles_per_tick` cycles of the
//! global clock. Writing a non-zero COUNT arms it; on reaching zero it
//! raises IPL 6 with the programmed vector and reloads. Reading COUNT
//! acknowledges a pending interrupt; writing COUNT re-arms and also
//! acknowledges.

use emu_core::{Access, Device, DeviceFault, DeviceHost, RegisterMap, Width};

/// The timer's interrupt line is wired to IPL 6.
pub const TIMER_IPL: u8 = 6;

const REG_COUNT: u32 = 0x00;
const REG_VECTOR: u32 = 0x05;

const EXPIRE_TAG: &str = "expire";

/// Simple timer device.
pub struct SimpleTimer {
    regs: RegisterMap,
    /// Global-clock cycles per counter decrement.
    cycles_per_tick: u64,
    autoload: u32,
    vector: u8,
    /// Absolute deadline of the armed countdown, if running.
    deadline: Option<u64>,
}

impl SimpleTimer {
    #[must_use]
    pub fn new(cycles_per_tick: u64) -> Self {
        let regs = RegisterMap::new()
            .reg(REG_COUNT, Width::Long, Access::Rw)
            .reg(REG_VECTOR, Width::Byte, Access::Rw);
        Self {
            regs,
            cycles_per_tick: cycles_per_tick.max(1),
            autoload: 0,
            vector: 0,
            deadline: None,
        }
    }

    fn remaining(&self, now: u64) -> u32 {
        match self.deadline {
            Some(deadline) => (deadline.saturating_sub(now) / self.cycles_per_tick) as u32,
            None => 0,
        }
    }

    fn arm(&mut self, host: &mut DeviceHost<'_>, count: u32) {
        self.autoload = count;
        if count == 0 {
            self.deadline = None;
            host.cancel(EXPIRE_TAG);
            return;
        }
        let deadline = host.now() + u64::from(count) * self.cycles_per_tick;
        self.deadline = Some(deadline);
        host.schedule_at(EXPIRE_TAG, deadline);
    }
}

impl Device for SimpleTimer {
    fn name(&self) -> &str {
        "timer"
    }

    fn reset(&mut self, host: &mut DeviceHost<'_>) {
        self.autoload = 0;
        self.vector = 0;
        self.deadline = None;
        host.cancel(EXPIRE_TAG);
        host.deassert_ipl();
    }

    fn read(&mut self, host: &mut DeviceHost<'_>, offset: u32, width: Width) -> Option<u32> {
        if !self.regs.decodes_read(offset, width) {
            return None;
        }
        match offset {
            REG_COUNT => {
                host.deassert_ipl();
                Some(self.remaining(host.now()))
            }
            REG_VECTOR => Some(u32::from(self.vector)),
            _ => None,
        }
    }

    fn write(
        &mut self,
        host: &mut DeviceHost<'_>,
        offset: u32,
        width: Width,
        value: u32,
    ) -> Option<()> {
        if !self.regs.decodes_write(offset, width) {
            return None;
        }
        match offset {
            REG_COUNT => {
                host.deassert_ipl();
                self.arm(host, value);
            }
            REG_VECTOR => self.vector = value as u8,
            _ => return None,
        }
        Some(())
    }

    fn vector(&mut self, _level: u8) -> Option<u8> {
        if self.vector == 0 { None } else { Some(self.vector) }
    }

    fn tick(&mut self, host: &mut DeviceHost<'_>, tag: &str) -> Result<(), DeviceFault> {
        if tag == EXPIRE_TAG {
            host.assert_ipl(TIMER_IPL);
            // Reload and keep running.
            let count = self.autoload;
            self.arm(host, count);
        }
        Ok(())
    }
}
