//! Simple UART.
//!
//! Byte registers on odd addresses (the part sits on the low byte lane):
//!
//! | offset | read | write |
//! |---|---|---|
//! | 0x01 | SR | — |
//! | 0x03 | DR (dequeue rx) | DR (transmit) |
//! | 0x05 | CR | CR |
//! | 0x07 | VR | VR |
//!
//! The transmitter is always ready (the host sink never stalls). Receive
//! data arrives from the host through a shared queue and is noticed on a
//! polling callback, so an enabled receive interrupt fires without the
//! guest touching the device.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::Write;
use std::rc::Rc;

use emu_core::{Access, Device, DeviceHost, RegisterMap, Width};

pub const SR_RXRDY: u8 = 0x01;
pub const SR_TXRDY: u8 = 0x02;

/// CR bit: interrupt when receive data is available.
pub const CR_RX_INTEN: u8 = 0x01;
/// CR bit: interrupt while the transmitter is ready.
pub const CR_TX_INTEN: u8 = 0x02;

const REG_SR: u32 = 0x01;
const REG_DR: u32 = 0x03;
const REG_CR: u32 = 0x05;
const REG_VR: u32 = 0x07;

/// Cycles between host-input polls while receive interrupts are enabled.
const RX_POLL_CYCLES: u64 = 1024;
const RX_POLL_TAG: &str = "rx-poll";

/// Host-side handle for injecting received bytes.
#[derive(Clone, Default)]
pub struct UartInput(Rc<RefCell<VecDeque<u8>>>);

impl UartInput {
    pub fn push(&self, byte: u8) {
        self.0.borrow_mut().push_back(byte);
    }

    pub fn push_str(&self, s: &str) {
        self.0.borrow_mut().extend(s.bytes());
    }
}

/// Simple UART device.
pub struct SimpleUart {
    regs: RegisterMap,
    ipl: u8,
    cr: u8,
    vr: u8,
    input: UartInput,
    out: Box<dyn Write>,
}

impl SimpleUart {
    #[must_use]
    pub fn new(ipl: u8) -> Self {
        let regs = RegisterMap::new()
            .reg(REG_SR, Width::Byte, Access::R)
            .reg(REG_DR, Width::Byte, Access::Rw)
            .reg(REG_CR, Width::Byte, Access::Rw)
            .reg(REG_VR, Width::Byte, Access::Rw);
        Self {
            regs,
            ipl,
            cr: 0,
            vr: 0,
            input: UartInput::default(),
            out: Box::new(std::io::stdout()),
        }
    }

    /// Replace the transmit sink (defaults to host stdout).
    #[must_use]
    pub fn with_output(mut self, out: Box<dyn Write>) -> Self {
        self.out = out;
        self
    }

    /// Handle for pushing received bytes from the host side.
    #[must_use]
    pub fn input(&self) -> UartInput {
        self.input.clone()
    }

    fn sr(&self) -> u8 {
        let mut sr = SR_TXRDY;
        if !self.input.0.borrow().is_empty() {
            sr |= SR_RXRDY;
        }
        sr
    }

    fn update_irq(&self, host: &mut DeviceHost<'_>) {
        let sr = self.sr();
        let pending = (self.cr & CR_RX_INTEN != 0 && sr & SR_RXRDY != 0)
            || (self.cr & CR_TX_INTEN != 0 && sr & SR_TXRDY != 0);
        if pending {
            host.assert_ipl(self.ipl);
        } else {
            host.deassert_ipl();
        }
    }
}

impl Device for SimpleUart {
    fn name(&self) -> &str {
        "uart"
    }

    fn reset(&mut self, host: &mut DeviceHost<'_>) {
        self.cr = 0;
        self.vr = 0;
        self.input.0.borrow_mut().clear();
        host.cancel(RX_POLL_TAG);
        host.deassert_ipl();
    }

    fn read(&mut self, host: &mut DeviceHost<'_>, offset: u32, width: Width) -> Option<u32> {
        if !self.regs.decodes_read(offset, width) {
            return None;
        }
        let value = match offset {
            REG_SR => self.sr(),
            REG_DR => {
                let byte = self.input.0.borrow_mut().pop_front().unwrap_or(0);
                self.update_irq(host);
                byte
            }
            REG_CR => self.cr,
            REG_VR => self.vr,
            _ => return None,
        };
        Some(u32::from(value))
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
        let value = value as u8;
        match offset {
            REG_DR => {
                if let Err(err) = self.out.write_all(&[value]).and_then(|()| self.out.flush()) {
                    log::warn!(target: "uart", "transmit sink: {err}");
                }
            }
            REG_CR => {
                self.cr = value;
                if self.cr & CR_RX_INTEN != 0 {
                    host.schedule_after(RX_POLL_TAG, RX_POLL_CYCLES);
                } else {
                    host.cancel(RX_POLL_TAG);
                }
                self.update_irq(host);
            }
            REG_VR => self.vr = value,
            _ => return None,
        }
        Some(())
    }

    fn vector(&mut self, _level: u8) -> Option<u8> {
        if self.vr == 0 { None } else { Some(self.vr) }
    }

    fn tick(&mut self, host: &mut DeviceHost<'_>, tag: &str) -> Result<(), emu_core::DeviceFault> {
        if tag == RX_POLL_TAG {
            self.update_irq(host);
            if self.cr & CR_RX_INTEN != 0 {
                host.schedule_after(RX_POLL_TAG, RX_POLL_CYCLES);
            }
        }
        Ok(())
    }
}
