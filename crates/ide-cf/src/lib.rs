//! IDE/CompactFlash register block.
//!
//! A 16-byte task-file window speaking enough of the ATA protocol for a
//! boot ROM: LBA28 addressing, READ SECTORS (0x20), WRITE SECTORS (0x30)
//! and IDENTIFY DEVICE (0xEC) with programmed I/O through the 16-bit data
//! port. The device-1 select bit is honored but only device 0 is backed.
//! The backing store is a raw little-endian-neutral byte image of whole
//! 512-byte sectors, mounted read/write and bounds-checked against the
//! file size.
//!
//! | offset | read | write |
//! |---|---|---|
//! | 0x0 | DATA (16-bit) | DATA (16-bit) |
//! | 0x1 | ERROR | FEATURES |
//! | 0x2 | SECTOR COUNT | SECTOR COUNT |
//! | 0x3 | LBA 7:0 | LBA 7:0 |
//! | 0x4 | LBA 15:8 | LBA 15:8 |
//! | 0x5 | LBA 23:16 | LBA 23:16 |
//! | 0x6 | DEVICE/LBA 27:24 | DEVICE/LBA 27:24 |
//! | 0x7 | STATUS | COMMAND |
//! | 0xE | ALT STATUS | DEVICE CONTROL |

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use emu_core::{Device, DeviceHost, Width};
use thiserror::Error;

pub const SECTOR_SIZE: u32 = 512;

// Status register bits.
pub const STATUS_ERR: u8 = 0x01;
pub const STATUS_DRQ: u8 = 0x08;
pub const STATUS_DF: u8 = 0x20;
pub const STATUS_DRDY: u8 = 0x40;
pub const STATUS_BSY: u8 = 0x80;

// Error register bits.
pub const ERROR_ABRT: u8 = 0x04;
pub const ERROR_IDNF: u8 = 0x10;

// Commands.
pub const CMD_READ_SECTORS: u8 = 0x20;
pub const CMD_WRITE_SECTORS: u8 = 0x30;
pub const CMD_IDENTIFY_DEVICE: u8 = 0xEC;

const REG_DATA: u32 = 0x0;
const REG_ERROR_FEATURES: u32 = 0x1;
const REG_SECTOR_COUNT: u32 = 0x2;
const REG_LBA_LOW: u32 = 0x3;
const REG_LBA_MID: u32 = 0x4;
const REG_LBA_HIGH: u32 = 0x5;
const REG_DEVICE: u32 = 0x6;
const REG_STATUS_CMD: u32 = 0x7;
const REG_ALT_STATUS_CTRL: u32 = 0xE;

const DEVICE_SELECT_1: u8 = 0x10;
const DEVICE_LBA_MODE: u8 = 0x40;

/// Device-control bit: interrupt disable.
const CTRL_NIEN: u8 = 0x02;

/// Errors attaching a backing image.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("backing file: {0}")]
    Io(#[from] std::io::Error),
    #[error("image length {0} is not a whole number of sectors")]
    NotSectorAligned(u64),
}

struct Media {
    file: File,
    sectors: u32,
}

enum Transfer {
    None,
    /// Data staged for the guest (read / identify).
    Out { buf: Vec<u8>, pos: usize },
    /// Collecting guest data; flushed to the media sector by sector.
    In { buf: Vec<u8>, expected: usize, lba: u32 },
}

/// IDE/CompactFlash device.
pub struct IdeCf {
    /// Board-wired interrupt level; 0 disables interrupt delivery.
    ipl: u8,
    media: Option<Media>,
    error: u8,
    sector_count: u8,
    lba_low: u8,
    lba_mid: u8,
    lba_high: u8,
    device: u8,
    status: u8,
    control: u8,
    transfer: Transfer,
}

impl IdeCf {
    #[must_use]
    pub fn new(ipl: u8) -> Self {
        Self {
            ipl,
            media: None,
            error: 0,
            sector_count: 0,
            lba_low: 0,
            lba_mid: 0,
            lba_high: 0,
            device: 0,
            status: 0,
            control: 0,
            transfer: Transfer::None,
        }
    }

    /// Attach a backing image, mounted read/write.
    pub fn attach(&mut self, file: File) -> Result<(), MediaError> {
        let len = file.metadata()?.len();
        if len % u64::from(SECTOR_SIZE) != 0 {
            return Err(MediaError::NotSectorAligned(len));
        }
        let sectors = (len / u64::from(SECTOR_SIZE)) as u32;
        self.media = Some(Media { file, sectors });
        self.status = STATUS_DRDY;
        Ok(())
    }

    /// Open `path` read/write and attach it.
    pub fn open(path: &Path, ipl: u8) -> Result<Self, MediaError> {
        let mut cf = Self::new(ipl);
        let file = File::options().read(true).write(true).open(path)?;
        cf.attach(file)?;
        Ok(cf)
    }

    #[must_use]
    pub fn size_sectors(&self) -> u32 {
        self.media.as_ref().map_or(0, |m| m.sectors)
    }

    fn device1_selected(&self) -> bool {
        self.device & DEVICE_SELECT_1 != 0
    }

    fn lba(&self) -> u32 {
        (u32::from(self.device & 0x0F) << 24)
            | (u32::from(self.lba_high) << 16)
            | (u32::from(self.lba_mid) << 8)
            | u32::from(self.lba_low)
    }

    /// Requested transfer length; a zero count is rejected rather than
    /// meaning 256 sectors.
    fn xfer_sectors(&self) -> u32 {
        u32::from(self.sector_count)
    }

    fn abort(&mut self, error: u8) {
        self.error = error;
        self.status = if self.media.is_some() {
            STATUS_DRDY | STATUS_ERR
        } else {
            STATUS_ERR
        };
        self.transfer = Transfer::None;
    }

    fn raise_intrq(&self, host: &mut DeviceHost<'_>) {
        if self.ipl != 0 && self.control & CTRL_NIEN == 0 {
            host.assert_ipl(self.ipl);
        }
    }

    fn command(&mut self, host: &mut DeviceHost<'_>, cmd: u8) {
        if self.device1_selected() {
            // Only device 0 is backed; commands to device 1 go nowhere.
            log::debug!(target: "ide", "command {cmd:#04x} to unbacked device 1");
            return;
        }
        if self.media.is_none() {
            self.abort(ERROR_ABRT);
            return;
        }
        self.error = 0;
        match cmd {
            CMD_READ_SECTORS => self.start_read(host),
            CMD_WRITE_SECTORS => self.start_write(),
            CMD_IDENTIFY_DEVICE => self.start_identify(host),
            _ => {
                log::debug!(target: "ide", "unsupported command {cmd:#04x}");
                self.abort(ERROR_ABRT);
            }
        }
    }

    fn check_range(&mut self) -> Option<(u32, u32)> {
        let count = self.xfer_sectors();
        if count == 0 {
            self.abort(ERROR_ABRT);
            return None;
        }
        if self.device & DEVICE_LBA_MODE == 0 {
            // CHS addressing is not wired up.
            self.abort(ERROR_ABRT);
            return None;
        }
        let lba = self.lba();
        let total = self.size_sectors();
        if u64::from(lba) + u64::from(count) > u64::from(total) {
            self.abort(ERROR_IDNF);
            return None;
        }
        Some((lba, count))
    }

    fn start_read(&mut self, host: &mut DeviceHost<'_>) {
        let Some((lba, count)) = self.check_range() else {
            return;
        };
        let Some(media) = self.media.as_mut() else {
            return;
        };
        let mut buf = vec![0u8; (count * SECTOR_SIZE) as usize];
        let offset = u64::from(lba) * u64::from(SECTOR_SIZE);
        let result = media
            .file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| media.file.read_exact(&mut buf));
        match result {
            Ok(()) => {
                self.transfer = Transfer::Out { buf, pos: 0 };
                self.status = STATUS_DRDY | STATUS_DRQ;
                self.raise_intrq(host);
            }
            Err(err) => {
                log::error!(target: "ide", "read lba {lba}: {err}");
                self.error = ERROR_ABRT;
                self.status = STATUS_DRDY | STATUS_DF | STATUS_ERR;
            }
        }
    }

    fn start_write(&mut self) {
        let Some((lba, count)) = self.check_range() else {
            return;
        };
        let expected = (count * SECTOR_SIZE) as usize;
        self.transfer = Transfer::In {
            buf: Vec::with_capacity(expected),
            expected,
            lba,
        };
        self.status = STATUS_DRDY | STATUS_DRQ;
    }

    fn start_identify(&mut self, host: &mut DeviceHost<'_>) {
        let buf = identify_block(self.size_sectors());
        self.transfer = Transfer::Out { buf, pos: 0 };
        self.status = STATUS_DRDY | STATUS_DRQ;
        self.raise_intrq(host);
    }

    /// Pop the next data word (little-endian within the word, per ATA).
    fn pump_out(&mut self) -> u16 {
        let Transfer::Out { buf, pos } = &mut self.transfer else {
            return 0;
        };
        if *pos + 2 > buf.len() {
            return 0;
        }
        let value = u16::from_le_bytes([buf[*pos], buf[*pos + 1]]);
        *pos += 2;
        if *pos >= buf.len() {
            self.transfer = Transfer::None;
            self.status = STATUS_DRDY;
        }
        value
    }

    fn pump_in(&mut self, host: &mut DeviceHost<'_>, value: u16) {
        let Transfer::In { buf, expected, lba } = &mut self.transfer else {
            return;
        };
        buf.extend_from_slice(&value.to_le_bytes());
        if buf.len() < *expected {
            return;
        }
        let lba = *lba;
        let data = std::mem::take(buf);
        self.transfer = Transfer::None;
        let Some(media) = self.media.as_mut() else {
            self.abort(ERROR_ABRT);
            return;
        };
        let offset = u64::from(lba) * u64::from(SECTOR_SIZE);
        let result = media
            .file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| media.file.write_all(&data))
            .and_then(|()| media.file.flush());
        match result {
            Ok(()) => {
                self.status = STATUS_DRDY;
                self.raise_intrq(host);
            }
            Err(err) => {
                log::error!(target: "ide", "write lba {lba}: {err}");
                self.error = ERROR_ABRT;
                self.status = STATUS_DRDY | STATUS_DF | STATUS_ERR;
            }
        }
    }

    fn read_status(&mut self, host: &mut DeviceHost<'_>) -> u8 {
        // Reading the status register clears INTRQ.
        host.deassert_ipl();
        if self.device1_selected() { 0 } else { self.status }
    }
}

impl Device for IdeCf {
    fn name(&self) -> &str {
        "ide"
    }

    fn reset(&mut self, host: &mut DeviceHost<'_>) {
        self.error = 0;
        self.sector_count = 0;
        self.lba_low = 0;
        self.lba_mid = 0;
        self.lba_high = 0;
        self.device = 0;
        self.control = 0;
        self.transfer = Transfer::None;
        self.status = if self.media.is_some() { STATUS_DRDY } else { 0 };
        host.deassert_ipl();
    }

    fn read(&mut self, host: &mut DeviceHost<'_>, offset: u32, width: Width) -> Option<u32> {
        match (offset, width) {
            (REG_DATA, Width::Word) => Some(u32::from(self.pump_out())),
            (REG_ERROR_FEATURES, Width::Byte) => Some(u32::from(self.error)),
            (REG_SECTOR_COUNT, Width::Byte) => Some(u32::from(self.sector_count)),
            (REG_LBA_LOW, Width::Byte) => Some(u32::from(self.lba_low)),
            (REG_LBA_MID, Width::Byte) => Some(u32::from(self.lba_mid)),
            (REG_LBA_HIGH, Width::Byte) => Some(u32::from(self.lba_high)),
            (REG_DEVICE, Width::Byte) => Some(u32::from(self.device)),
            (REG_STATUS_CMD, Width::Byte) => Some(u32::from(self.read_status(host))),
            (REG_ALT_STATUS_CTRL, Width::Byte) => {
                let status = if self.device1_selected() { 0 } else { self.status };
                Some(u32::from(status))
            }
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
        let byte = value as u8;
        match (offset, width) {
            (REG_DATA, Width::Word) => self.pump_in(host, value as u16),
            (REG_ERROR_FEATURES, Width::Byte) => {} // features: ignored
            (REG_SECTOR_COUNT, Width::Byte) => self.sector_count = byte,
            (REG_LBA_LOW, Width::Byte) => self.lba_low = byte,
            (REG_LBA_MID, Width::Byte) => self.lba_mid = byte,
            (REG_LBA_HIGH, Width::Byte) => self.lba_high = byte,
            (REG_DEVICE, Width::Byte) => self.device = byte,
            (REG_STATUS_CMD, Width::Byte) => self.command(host, byte),
            (REG_ALT_STATUS_CTRL, Width::Byte) => {
                self.control = byte;
                if self.control & CTRL_NIEN != 0 {
                    host.deassert_ipl();
                }
            }
            _ => return None,
        }
        Some(())
    }
}

/// Write an ATA identify string: ASCII characters packed big-endian
/// within each 16-bit word, space padded.
fn put_identify_string(words: &mut [u16], start: usize, len_words: usize, s: &str) {
    let mut bytes = s.bytes().chain(std::iter::repeat(b' '));
    for w in 0..len_words {
        let hi = bytes.next().unwrap_or(b' ');
        let lo = bytes.next().unwrap_or(b' ');
        words[start + w] = (u16::from(hi) << 8) | u16::from(lo);
    }
}

/// Build the 512-byte IDENTIFY DEVICE block for a card of `sectors`.
fn identify_block(sectors: u32) -> Vec<u8> {
    let mut words = [0u16; 256];
    // General configuration: non-magnetic, removable — the CF signature.
    words[0] = 0x848A;
    let spt = 63u32;
    let heads = 16u32;
    let cylinders = (sectors / (spt * heads)).min(0xFFFF);
    words[1] = cylinders as u16;
    words[3] = heads as u16;
    words[6] = spt as u16;
    put_identify_string(&mut words, 10, 10, "SBC68K-CF-0001");
    put_identify_string(&mut words, 23, 4, "1.0");
    put_identify_string(&mut words, 27, 20, "EMULATED CF CARD");
    words[47] = 0x8001; // one sector per interrupt
    words[49] = 0x0200; // LBA supported
    words[60] = sectors as u16;
    words[61] = (sectors >> 16) as u16;
    let mut buf = Vec::with_capacity(512);
    for word in words {
        buf.extend_from_slice(&word.to_le_bytes());
    }
    buf
}
