//! Motorola MC68681 DUART.
//!
//! Two serial channels, a 16-bit counter/timer, an interrupt controller
//! with per-source masking (IMR/ISR) and a programmable vector (IVR), and
//! the input/output port registers. The register file is byte-granular
//! over a 16-byte window:
//!
//! | offset | read | write |
//! |---|---|---|
//! | 0x0 | MRA | MRA |
//! | 0x1 | SRA | CSRA |
//! | 0x2 | — | CRA |
//! | 0x3 | RBA | TBA |
//! | 0x4 | IPCR | ACR |
//! | 0x5 | ISR | IMR |
//! | 0x6 | CUR | CTUR |
//! | 0x7 | CLR | CTLR |
//! | 0x8 | MRB | MRB |
//! | 0x9 | SRB | CSRB |
//! | 0xA | — | CRB |
//! | 0xB | RBB | TBB |
//! | 0xC | IVR | IVR |
//! | 0xD | IP | OPCR |
//! | 0xE | start counter | OP set |
//! | 0xF | stop counter | OP reset |
//!
//! Host-side console bytes arrive through a shared queue per channel and
//! are moved into the 3-deep receive FIFO on a polling callback, so an
//! unmasked RxRDY interrupt fires without guest involvement. The
//! counter/timer runs on the cycle scheduler: timer mode free-runs and
//! re-raises the counter-ready interrupt on every underflow, counter mode
//! is one-shot until restarted.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::Write;
use std::rc::Rc;

use emu_core::{Device, DeviceFault, DeviceHost, Width};

// Status register bits.
pub const SR_RXRDY: u8 = 0x01;
pub const SR_FFULL: u8 = 0x02;
pub const SR_TXRDY: u8 = 0x04;
pub const SR_TXEMT: u8 = 0x08;
pub const SR_OVERRUN: u8 = 0x10;

// Interrupt status/mask bits.
pub const ISR_TXRDY_A: u8 = 0x01;
pub const ISR_RXRDY_A: u8 = 0x02;
pub const ISR_COUNTER: u8 = 0x08;
pub const ISR_TXRDY_B: u8 = 0x10;
pub const ISR_RXRDY_B: u8 = 0x20;

const FIFO_DEPTH: usize = 3;
const RX_POLL_CYCLES: u64 = 1024;
const RX_POLL_TAG: &str = "rx-poll";
const COUNTER_TAG: &str = "counter";

/// Cycles per counter/timer decrement (crystal prescale seen from the
/// CPU clock).
const COUNTER_DIVISOR: u64 = 16;

/// Host handle for injecting received bytes into one channel.
#[derive(Clone, Default)]
pub struct DuartInput(Rc<RefCell<VecDeque<u8>>>);

impl DuartInput {
    pub fn push(&self, byte: u8) {
        self.0.borrow_mut().push_back(byte);
    }

    pub fn push_str(&self, s: &str) {
        self.0.borrow_mut().extend(s.bytes());
    }
}

struct Channel {
    mr1: u8,
    mr2: u8,
    /// Mode-register pointer: false selects MR1, true MR2.
    mr2_selected: bool,
    csr: u8,
    rx_enabled: bool,
    tx_enabled: bool,
    overrun: bool,
    fifo: VecDeque<u8>,
    pending: DuartInput,
    out: Box<dyn Write>,
}

impl Channel {
    fn new() -> Self {
        Self {
            mr1: 0,
            mr2: 0,
            mr2_selected: false,
            csr: 0,
            rx_enabled: false,
            tx_enabled: false,
            overrun: false,
            fifo: VecDeque::with_capacity(FIFO_DEPTH),
            pending: DuartInput::default(),
            out: Box::new(std::io::sink()),
        }
    }

    fn power_on(&mut self) {
        self.mr1 = 0;
        self.mr2 = 0;
        self.mr2_selected = false;
        self.csr = 0;
        self.rx_enabled = false;
        self.tx_enabled = false;
        self.overrun = false;
        self.fifo.clear();
        self.pending.0.borrow_mut().clear();
    }

    fn sr(&self) -> u8 {
        let mut sr = 0;
        if !self.fifo.is_empty() {
            sr |= SR_RXRDY;
        }
        if self.fifo.len() >= FIFO_DEPTH {
            sr |= SR_FFULL;
        }
        if self.tx_enabled {
            // The host sink never stalls, so an enabled transmitter is
            // always ready and empty.
            sr |= SR_TXRDY | SR_TXEMT;
        }
        if self.overrun {
            sr |= SR_OVERRUN;
        }
        sr
    }

    fn read_mr(&mut self) -> u8 {
        let value = if self.mr2_selected { self.mr2 } else { self.mr1 };
        self.mr2_selected = true;
        value
    }

    fn write_mr(&mut self, value: u8) {
        if self.mr2_selected {
            self.mr2 = value;
        } else {
            self.mr1 = value;
            self.mr2_selected = true;
        }
    }

    fn read_rb(&mut self) -> u8 {
        self.fifo.pop_front().unwrap_or(0)
    }

    fn write_tb(&mut self, value: u8, label: char) {
        if !self.tx_enabled {
            log::debug!(target: "duart", "channel {label}: TB write with transmitter disabled");
            return;
        }
        if let Err(err) = self.out.write_all(&[value]).and_then(|()| self.out.flush()) {
            log::warn!(target: "duart", "channel {label} sink: {err}");
        }
    }

    /// CR command: misc command in bits 6..4, enables/disables in 3..0.
    fn command(&mut self, value: u8) {
        match (value >> 4) & 0x07 {
            0x1 => self.mr2_selected = false,
            0x2 => {
                self.rx_enabled = false;
                self.fifo.clear();
            }
            0x3 => self.tx_enabled = false,
            0x4 => self.overrun = false,
            _ => {}
        }
        if value & 0x01 != 0 {
            self.rx_enabled = true;
        }
        if value & 0x02 != 0 {
            self.rx_enabled = false;
        }
        if value & 0x04 != 0 {
            self.tx_enabled = true;
        }
        if value & 0x08 != 0 {
            self.tx_enabled = false;
        }
    }

    /// Move pending host bytes into the FIFO. Returns true when anything
    /// was transferred.
    fn drain_pending(&mut self) -> bool {
        if !self.rx_enabled {
            return false;
        }
        let mut moved = false;
        let mut pending = self.pending.0.borrow_mut();
        while let Some(&byte) = pending.front() {
            if self.fifo.len() >= FIFO_DEPTH {
                self.overrun = true;
                break;
            }
            pending.pop_front();
            self.fifo.push_back(byte);
            moved = true;
        }
        moved
    }
}

/// MC68681 DUART device.
pub struct Mc68681 {
    ipl: u8,
    channel_a: Channel,
    channel_b: Channel,
    acr: u8,
    imr: u8,
    /// Sticky interrupt sources (counter ready); serial sources are
    /// computed from live channel state.
    isr_sticky: u8,
    ivr: u8,
    opcr: u8,
    op: u8,
    ip: u8,
    /// Counter/timer preload (CTUR:CTLR).
    ct_preload: u16,
    /// Absolute deadline of the running counter, if started.
    ct_deadline: Option<u64>,
}

impl Mc68681 {
    /// `ipl` is the board-wired interrupt priority level.
    #[must_use]
    pub fn new(ipl: u8) -> Self {
        Self {
            ipl,
            channel_a: Channel::new(),
            channel_b: Channel::new(),
            acr: 0,
            imr: 0,
            isr_sticky: 0,
            ivr: 0x0F,
            opcr: 0,
            op: 0,
            ip: 0xFF,
            ct_preload: 0,
            ct_deadline: None,
        }
    }

    /// Route channel A transmit data to `out` (defaults to a sink).
    #[must_use]
    pub fn with_output_a(mut self, out: Box<dyn Write>) -> Self {
        self.channel_a.out = out;
        self
    }

    /// Route channel B transmit data to `out`.
    #[must_use]
    pub fn with_output_b(mut self, out: Box<dyn Write>) -> Self {
        self.channel_b.out = out;
        self
    }

    /// Host handle for channel A receive data.
    #[must_use]
    pub fn input_a(&self) -> DuartInput {
        self.channel_a.pending.clone()
    }

    /// Host handle for channel B receive data.
    #[must_use]
    pub fn input_b(&self) -> DuartInput {
        self.channel_b.pending.clone()
    }

    fn isr(&self) -> u8 {
        let mut isr = self.isr_sticky;
        let sr_a = self.channel_a.sr();
        let sr_b = self.channel_b.sr();
        if sr_a & SR_TXRDY != 0 {
            isr |= ISR_TXRDY_A;
        }
        if sr_a & SR_RXRDY != 0 {
            isr |= ISR_RXRDY_A;
        }
        if sr_b & SR_TXRDY != 0 {
            isr |= ISR_TXRDY_B;
        }
        if sr_b & SR_RXRDY != 0 {
            isr |= ISR_RXRDY_B;
        }
        isr
    }

    fn update_irq(&self, host: &mut DeviceHost<'_>) {
        if self.isr() & self.imr != 0 {
            host.assert_ipl(self.ipl);
        } else {
            host.deassert_ipl();
        }
    }

    /// Timer mode is ACR bit 6; counter mode otherwise.
    fn timer_mode(&self) -> bool {
        self.acr & 0x40 != 0
    }

    fn ct_remaining(&self, now: u64) -> u16 {
        match self.ct_deadline {
            Some(deadline) => (deadline.saturating_sub(now) / COUNTER_DIVISOR) as u16,
            None => self.ct_preload,
        }
    }

    fn start_counter(&mut self, host: &mut DeviceHost<'_>) {
        let ticks = if self.ct_preload == 0 {
            0x1_0000
        } else {
            u64::from(self.ct_preload)
        };
        let deadline = host.now() + ticks * COUNTER_DIVISOR;
        self.ct_deadline = Some(deadline);
        host.schedule_at(COUNTER_TAG, deadline);
    }

    fn stop_counter(&mut self, host: &mut DeviceHost<'_>) {
        self.ct_deadline = None;
        host.cancel(COUNTER_TAG);
        self.isr_sticky &= !ISR_COUNTER;
        self.update_irq(host);
    }

    fn schedule_rx_poll(&self, host: &mut DeviceHost<'_>) {
        if self.channel_a.rx_enabled || self.channel_b.rx_enabled {
            host.schedule_after(RX_POLL_TAG, RX_POLL_CYCLES);
        } else {
            host.cancel(RX_POLL_TAG);
        }
    }
}

impl Device for Mc68681 {
    fn name(&self) -> &str {
        "duart"
    }

    fn reset(&mut self, host: &mut DeviceHost<'_>) {
        self.channel_a.power_on();
        self.channel_b.power_on();
        self.acr = 0;
        self.imr = 0;
        self.isr_sticky = 0;
        self.ivr = 0x0F;
        self.opcr = 0;
        self.op = 0;
        self.ct_preload = 0;
        self.ct_deadline = None;
        host.cancel(RX_POLL_TAG);
        host.cancel(COUNTER_TAG);
        host.deassert_ipl();
    }

    fn read(&mut self, host: &mut DeviceHost<'_>, offset: u32, width: Width) -> Option<u32> {
        if width != Width::Byte || offset > 0xF {
            return None;
        }
        let value = match offset {
            0x0 => self.channel_a.read_mr(),
            0x1 => self.channel_a.sr(),
            0x3 => {
                let byte = self.channel_a.read_rb();
                self.update_irq(host);
                byte
            }
            0x4 => 0, // IPCR: no input-port change tracking
            0x5 => self.isr(),
            0x6 => (self.ct_remaining(host.now()) >> 8) as u8,
            0x7 => self.ct_remaining(host.now()) as u8,
            0x8 => self.channel_b.read_mr(),
            0x9 => self.channel_b.sr(),
            0xB => {
                let byte = self.channel_b.read_rb();
                self.update_irq(host);
                byte
            }
            0xC => self.ivr,
            0xD => self.ip,
            0xE => {
                self.start_counter(host);
                0
            }
            0xF => {
                self.stop_counter(host);
                0
            }
            // CRA/CRB positions read as zero.
            _ => 0,
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
        if width != Width::Byte || offset > 0xF {
            return None;
        }
        let value = value as u8;
        match offset {
            0x0 => self.channel_a.write_mr(value),
            0x1 => self.channel_a.csr = value,
            0x2 => {
                self.channel_a.command(value);
                self.schedule_rx_poll(host);
                self.update_irq(host);
            }
            0x3 => self.channel_a.write_tb(value, 'A'),
            0x4 => self.acr = value,
            0x5 => {
                self.imr = value;
                self.update_irq(host);
            }
            0x6 => self.ct_preload = (self.ct_preload & 0x00FF) | (u16::from(value) << 8),
            0x7 => self.ct_preload = (self.ct_preload & 0xFF00) | u16::from(value),
            0x8 => self.channel_b.write_mr(value),
            0x9 => self.channel_b.csr = value,
            0xA => {
                self.channel_b.command(value);
                self.schedule_rx_poll(host);
                self.update_irq(host);
            }
            0xB => self.channel_b.write_tb(value, 'B'),
            0xC => self.ivr = value,
            0xD => self.opcr = value,
            0xE => self.op |= value,
            0xF => self.op &= !value,
            _ => return None,
        }
        Some(())
    }

    fn vector(&mut self, _level: u8) -> Option<u8> {
        Some(self.ivr)
    }

    fn tick(&mut self, host: &mut DeviceHost<'_>, tag: &str) -> Result<(), DeviceFault> {
        match tag {
            RX_POLL_TAG => {
                let moved_a = self.channel_a.drain_pending();
                let moved_b = self.channel_b.drain_pending();
                if moved_a || moved_b {
                    self.update_irq(host);
                }
                self.schedule_rx_poll(host);
            }
            COUNTER_TAG => {
                self.isr_sticky |= ISR_COUNTER;
                if self.timer_mode() {
                    // Timer mode free-runs: reload and keep counting.
                    self.start_counter(host);
                } else {
                    self.ct_deadline = None;
                }
                self.update_irq(host);
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emu_core::System;

    const BASE: u32 = 0xFF_F000;

    // Channel command bytes: enable rx = 0x01, enable tx = 0x04.
    const CMD_RX_ENABLE: u32 = 0x01;
    const CMD_TX_ENABLE: u32 = 0x04;

    fn duart_sys() -> (System, DuartInput) {
        let mut sys = System::default();
        let duart = Mc68681::new(4);
        let input = duart.input_a();
        sys.add_device(BASE, 0x10, Box::new(duart)).unwrap();
        (sys, input)
    }

    fn pump(sys: &mut System, cycles: u64) {
        sys.advance_clock(cycles);
        sys.run_due_callbacks();
    }

    #[test]
    fn word_access_does_not_decode() {
        let (mut sys, _input) = duart_sys();
        sys.read16(BASE);
        assert!(sys.take_fault().is_some());
    }

    #[test]
    fn transmitter_status_follows_enable() {
        let (mut sys, _input) = duart_sys();
        assert_eq!(sys.read8(BASE + 0x1) as u8 & SR_TXRDY, 0);
        sys.write8(BASE + 0x2, CMD_TX_ENABLE);
        assert_eq!(
            sys.read8(BASE + 0x1) as u8 & (SR_TXRDY | SR_TXEMT),
            SR_TXRDY | SR_TXEMT
        );
    }

    #[test]
    fn receive_fifo_fills_from_host_queue() {
        let (mut sys, input) = duart_sys();
        sys.write8(BASE + 0x2, CMD_RX_ENABLE);
        input.push_str("ok");
        pump(&mut sys, RX_POLL_CYCLES * 2);
        assert_ne!(sys.read8(BASE + 0x1) as u8 & SR_RXRDY, 0);
        assert_eq!(sys.read8(BASE + 0x3), u32::from(b'o'));
        assert_eq!(sys.read8(BASE + 0x3), u32::from(b'k'));
        assert_eq!(sys.read8(BASE + 0x1) as u8 & SR_RXRDY, 0);
    }

    #[test]
    fn fifo_overflow_sets_overrun() {
        let (mut sys, input) = duart_sys();
        sys.write8(BASE + 0x2, CMD_RX_ENABLE);
        input.push_str("abcde");
        pump(&mut sys, RX_POLL_CYCLES * 2);
        let sr = sys.read8(BASE + 0x1) as u8;
        assert_ne!(sr & SR_FFULL, 0);
        assert_ne!(sr & SR_OVERRUN, 0);
        // Reset-error-status command clears the overrun flag.
        sys.write8(BASE + 0x2, 0x40);
        assert_eq!(sys.read8(BASE + 0x1) as u8 & SR_OVERRUN, 0);
    }

    #[test]
    fn rx_interrupt_uses_programmed_vector() {
        let (mut sys, input) = duart_sys();
        sys.write8(BASE + 0xC, 0x45); // IVR
        sys.write8(BASE + 0x5, u32::from(ISR_RXRDY_A)); // IMR
        sys.write8(BASE + 0x2, CMD_RX_ENABLE);
        input.push(b'!');
        assert_eq!(sys.irq_level(), 0);
        pump(&mut sys, RX_POLL_CYCLES * 2);
        assert_eq!(sys.irq_level(), 4);
        assert_eq!(sys.ack_irq(4), 0x45);
        sys.read8(BASE + 0x3); // drain
        assert_eq!(sys.irq_level(), 0);
    }

    #[test]
    fn counter_underflow_interrupts_and_timer_mode_reloads() {
        let (mut sys, _input) = duart_sys();
        sys.write8(BASE + 0x4, 0x40); // ACR: timer mode
        sys.write8(BASE + 0x5, u32::from(ISR_COUNTER)); // IMR
        sys.write8(BASE + 0x6, 0); // CTUR
        sys.write8(BASE + 0x7, 10); // CTLR
        sys.read8(BASE + 0xE); // start
        pump(&mut sys, 10 * COUNTER_DIVISOR);
        assert_eq!(sys.irq_level(), 4);
        assert_ne!(sys.read8(BASE + 0x5) as u8 & ISR_COUNTER, 0);
        // Stop command clears the sticky bit and the line.
        sys.read8(BASE + 0xF);
        assert_eq!(sys.irq_level(), 0);
    }

    #[test]
    fn timer_mode_fires_repeatedly() {
        let (mut sys, _input) = duart_sys();
        sys.write8(BASE + 0x4, 0x40);
        sys.write8(BASE + 0x5, u32::from(ISR_COUNTER));
        sys.write8(BASE + 0x7, 4);
        sys.read8(BASE + 0xE);
        for _ in 0..3 {
            pump(&mut sys, 4 * COUNTER_DIVISOR);
            assert_eq!(sys.irq_level(), 4);
            sys.read8(BASE + 0xF); // stop clears
            assert_eq!(sys.irq_level(), 0);
            sys.read8(BASE + 0xE); // restart
        }
    }

    #[test]
    fn mode_register_pointer_advances_and_resets() {
        let (mut sys, _input) = duart_sys();
        sys.write8(BASE + 0x0, 0x13); // MR1A
        sys.write8(BASE + 0x0, 0x07); // MR2A
        assert_eq!(sys.read8(BASE + 0x0), 0x07);
        sys.write8(BASE + 0x2, 0x10); // reset MR pointer
        assert_eq!(sys.read8(BASE + 0x0), 0x13);
    }
}
