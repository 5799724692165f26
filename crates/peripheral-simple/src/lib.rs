//! Simple peripherals: a polled/interrupting UART, a countdown timer, and
//! a sector-addressed disk.
//!
//! These are deliberately minimal register blocks, enough to boot test
//! programs and exercise the bus fabric, scheduler, and interrupt paths
//! without modeling a real part.

mod disk;
mod timer;
mod uart;

pub use disk::{
    SimpleDisk, DISK_CMD_READ, DISK_CMD_WRITE, DISK_SECTOR_SIZE, DISK_STATUS_DATA_READY,
    DISK_STATUS_ERROR, DISK_STATUS_IDLE, DISK_STATUS_NOT_READY,
};
pub use timer::{SimpleTimer, TIMER_IPL};
pub use uart::{SimpleUart, UartInput, CR_RX_INTEN, CR_TX_INTEN, SR_RXRDY, SR_TXRDY};
