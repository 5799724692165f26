//! Reference board assemblies.

use emu_core::{MapError, System, PAGE_SIZE};
use ide_cf::IdeCf;
use motorola_68681::{DuartInput, Mc68681};
use peripheral_simple::{SimpleDisk, SimpleTimer, SimpleUart, UartInput};
use thiserror::Error;

use crate::config::{Board, MachineConfig};
use crate::natfeats::NatFeats;

// Simple board device windows.
pub const SIMPLE_UART_BASE: u32 = 0x00FF_0000;
pub const SIMPLE_TIMER_BASE: u32 = 0x00FF_1000;
pub const SIMPLE_DISK_BASE: u32 = 0x00FF_2000;

// SBC board device windows.
pub const SBC_IDE_BASE: u32 = 0x00FF_E000;
pub const SBC_DUART_BASE: u32 = 0x00FF_F000;

pub const SIMPLE_UART_IPL: u8 = 4;
pub const SBC_DUART_IPL: u8 = 4;
pub const SBC_IDE_IPL: u8 = 2;

/// Global-clock cycles per simple-timer decrement.
pub const TIMER_CYCLES_PER_TICK: u64 = 16;

/// Host handle to the board's console input, whichever UART backs it.
#[derive(Clone)]
pub enum ConsoleInput {
    Uart(UartInput),
    Duart(DuartInput),
}

impl ConsoleInput {
    pub fn push(&self, byte: u8) {
        match self {
            Self::Uart(input) => input.push(byte),
            Self::Duart(input) => input.push(byte),
        }
    }

    pub fn push_str(&self, s: &str) {
        match self {
            Self::Uart(input) => input.push_str(s),
            Self::Duart(input) => input.push_str(s),
        }
    }
}

/// An assembled board: the system plus its host-side handles.
pub struct BuiltBoard {
    pub sys: System,
    pub console: ConsoleInput,
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("mapping: {0}")]
    Map(#[from] MapError),
    #[error("image file: {0}")]
    Io(#[from] std::io::Error),
    #[error("disk image: {0}")]
    Media(#[from] ide_cf::MediaError),
}

/// Assemble the configured board: memory map, devices, native-features
/// hook. The CPU core is the caller's to supply.
pub fn build(config: &MachineConfig) -> Result<BuiltBoard, BuildError> {
    let mut sys = System::new(config.bus_config());
    sys.add_memory(config.ram_base, config.ram_size, true, None)?;
    if let Some(path) = &config.rom_image {
        let image = std::fs::read(path)?;
        let size = (image.len() as u32).div_ceil(PAGE_SIZE) * PAGE_SIZE;
        sys.add_memory(config.rom_base, size.max(PAGE_SIZE), false, Some(&image))?;
    }

    let console = match config.board {
        Board::Simple => {
            let uart = SimpleUart::new(SIMPLE_UART_IPL);
            let input = uart.input();
            sys.add_device(SIMPLE_UART_BASE, 8, Box::new(uart))?;
            let timer = SimpleTimer::new(TIMER_CYCLES_PER_TICK);
            sys.add_device(SIMPLE_TIMER_BASE, 8, Box::new(timer))?;
            let disk = match &config.disk_image {
                Some(path) => SimpleDisk::open(path)?,
                None => SimpleDisk::new(),
            };
            sys.add_device(SIMPLE_DISK_BASE, 0x10, Box::new(disk))?;
            ConsoleInput::Uart(input)
        }
        Board::Sbc => {
            let duart = Mc68681::new(SBC_DUART_IPL)
                .with_output_a(Box::new(std::io::stdout()));
            let input = duart.input_a();
            sys.add_device(SBC_DUART_BASE, 0x10, Box::new(duart))?;
            let cf = match &config.disk_image {
                Some(path) => IdeCf::open(path, SBC_IDE_IPL)?,
                None => IdeCf::new(SBC_IDE_IPL),
            };
            sys.add_device(SBC_IDE_BASE, 0x10, Box::new(cf))?;
            ConsoleInput::Duart(input)
        }
    };

    sys.set_illegal_hook(Box::new(NatFeats::new()));
    Ok(BuiltBoard { sys, console })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_board_maps_ram_and_devices() {
        let board = build(&MachineConfig::default()).unwrap();
        let mut sys = board.sys;
        sys.write32(0x1000, 0xDEAD_BEEF);
        assert_eq!(sys.read32(0x1000), 0xDEAD_BEEF);
        // UART status register decodes.
        assert!(sys.read8(SIMPLE_UART_BASE + 1) != 0);
        // Timer count register decodes.
        assert_eq!(sys.read32(SIMPLE_TIMER_BASE), 0);
        assert!(sys.take_fault().is_none());
    }

    #[test]
    fn sbc_board_maps_duart_and_ide() {
        let config = MachineConfig {
            board: Board::Sbc,
            ..MachineConfig::default()
        };
        let board = build(&config).unwrap();
        let mut sys = board.sys;
        // DUART IVR resets to 0x0F.
        assert_eq!(sys.read8(SBC_DUART_BASE + 0xC), 0x0F);
        // No media attached: IDE status reads 0.
        assert_eq!(sys.read8(SBC_IDE_BASE + 7), 0);
        assert!(sys.take_fault().is_none());
    }
}
