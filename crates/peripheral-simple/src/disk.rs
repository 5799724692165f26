//! Simple sector-addressed disk.
//!
//! | offset | width | read | write |
//! |---|---|---|---|
//! | 0x00 | long | SECTOR | SECTOR |
//! | 0x04 | long | media size in sectors | transfer sector count |
//! | 0x08 | byte | STATUS | CMD |
//! | 0x0C | long | DATA window | DATA window |
//!
//! Transfers are programmed I/O: write SECTOR and COUNT, issue
//! `DISK_CMD_READ`/`DISK_CMD_WRITE`, then pump DATA one long at a time.
//! The status falls back to IDLE once the whole transfer has moved.
//! Out-of-range and zero-length transfers set ERROR without touching the
//! media. The backing store is a raw byte image of whole 512-byte
//! sectors.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use emu_core::{Access, Device, DeviceHost, RegisterMap, Width};

pub const DISK_SECTOR_SIZE: u32 = 512;

pub const DISK_CMD_READ: u8 = 0x01;
pub const DISK_CMD_WRITE: u8 = 0x02;

pub const DISK_STATUS_IDLE: u8 = 0;
pub const DISK_STATUS_NOT_READY: u8 = 1;
pub const DISK_STATUS_ERROR: u8 = 2;
pub const DISK_STATUS_DATA_READY: u8 = 3;

const REG_SECTOR: u32 = 0x00;
const REG_COUNT: u32 = 0x04;
const REG_STATUS_CMD: u32 = 0x08;
const REG_DATA: u32 = 0x0C;

struct Media {
    file: File,
    sectors: u32,
}

enum Transfer {
    None,
    /// Data staged for the guest to read out.
    Read { buf: Vec<u8>, pos: usize },
    /// Collecting guest data; written out when the transfer completes.
    Write { buf: Vec<u8>, expected: usize, lba: u32 },
}

/// Simple disk device.
pub struct SimpleDisk {
    regs: RegisterMap,
    media: Option<Media>,
    sector: u32,
    count: u32,
    status: u8,
    transfer: Transfer,
}

impl SimpleDisk {
    #[must_use]
    pub fn new() -> Self {
        let regs = RegisterMap::new()
            .reg(REG_SECTOR, Width::Long, Access::Rw)
            .reg(REG_COUNT, Width::Long, Access::Rw)
            .reg(REG_STATUS_CMD, Width::Byte, Access::Rw)
            .reg(REG_DATA, Width::Long, Access::Rw);
        Self {
            regs,
            media: None,
            sector: 0,
            count: 0,
            status: DISK_STATUS_NOT_READY,
            transfer: Transfer::None,
        }
    }

    /// Attach a backing image. The file length must be a whole number of
    /// sectors; a trailing partial sector is ignored.
    pub fn attach(&mut self, file: File) -> std::io::Result<()> {
        let len = file.metadata()?.len();
        let sectors = (len / u64::from(DISK_SECTOR_SIZE)) as u32;
        self.media = Some(Media { file, sectors });
        self.status = DISK_STATUS_IDLE;
        Ok(())
    }

    /// Open `path` read/write and attach it.
    pub fn open(path: &std::path::Path) -> std::io::Result<Self> {
        let mut disk = Self::new();
        let file = File::options().read(true).write(true).open(path)?;
        disk.attach(file)?;
        Ok(disk)
    }

    #[must_use]
    pub fn size_sectors(&self) -> u32 {
        self.media.as_ref().map_or(0, |m| m.sectors)
    }

    fn valid_range(&self, sector: u32, count: u32) -> bool {
        let Some(media) = &self.media else {
            return false;
        };
        count > 0 && u64::from(sector) + u64::from(count) <= u64::from(media.sectors)
    }

    fn start_read(&mut self) {
        if !self.valid_range(self.sector, self.count) {
            self.status = DISK_STATUS_ERROR;
            return;
        }
        let Some(media) = self.media.as_mut() else {
            self.status = DISK_STATUS_NOT_READY;
            return;
        };
        let bytes = (self.count * DISK_SECTOR_SIZE) as usize;
        let mut buf = vec![0u8; bytes];
        let offset = u64::from(self.sector) * u64::from(DISK_SECTOR_SIZE);
        let result = media
            .file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| media.file.read_exact(&mut buf));
        match result {
            Ok(()) => {
                self.transfer = Transfer::Read { buf, pos: 0 };
                self.status = DISK_STATUS_DATA_READY;
            }
            Err(err) => {
                log::error!(target: "disk", "read lba {}: {err}", self.sector);
                self.status = DISK_STATUS_ERROR;
            }
        }
    }

    fn start_write(&mut self) {
        if !self.valid_range(self.sector, self.count) {
            self.status = DISK_STATUS_ERROR;
            return;
        }
        let expected = (self.count * DISK_SECTOR_SIZE) as usize;
        self.transfer = Transfer::Write {
            buf: Vec::with_capacity(expected),
            expected,
            lba: self.sector,
        };
        self.status = DISK_STATUS_DATA_READY;
    }

    fn pump_read(&mut self) -> u32 {
        let Transfer::Read { buf, pos } = &mut self.transfer else {
            return 0;
        };
        if *pos + 4 > buf.len() {
            return 0;
        }
        let value = u32::from_be_bytes([buf[*pos], buf[*pos + 1], buf[*pos + 2], buf[*pos + 3]]);
        *pos += 4;
        if *pos >= buf.len() {
            self.transfer = Transfer::None;
            self.status = DISK_STATUS_IDLE;
        }
        value
    }

    fn pump_write(&mut self, value: u32) {
        let Transfer::Write { buf, expected, lba } = &mut self.transfer else {
            return;
        };
        buf.extend_from_slice(&value.to_be_bytes());
        if buf.len() < *expected {
            return;
        }
        let lba = *lba;
        let data = std::mem::take(buf);
        self.transfer = Transfer::None;
        let Some(media) = self.media.as_mut() else {
            self.status = DISK_STATUS_NOT_READY;
            return;
        };
        let offset = u64::from(lba) * u64::from(DISK_SECTOR_SIZE);
        let result = media
            .file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| media.file.write_all(&data))
            .and_then(|()| media.file.flush());
        match result {
            Ok(()) => self.status = DISK_STATUS_IDLE,
            Err(err) => {
                log::error!(target: "disk", "write lba {lba}: {err}");
                self.status = DISK_STATUS_ERROR;
            }
        }
    }
}

impl Default for SimpleDisk {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for SimpleDisk {
    fn name(&self) -> &str {
        "disk"
    }

    fn reset(&mut self, _host: &mut DeviceHost<'_>) {
        self.sector = 0;
        self.count = 0;
        self.transfer = Transfer::None;
        self.status = if self.media.is_some() {
            DISK_STATUS_IDLE
        } else {
            DISK_STATUS_NOT_READY
        };
    }

    fn read(&mut self, _host: &mut DeviceHost<'_>, offset: u32, width: Width) -> Option<u32> {
        if !self.regs.decodes_read(offset, width) {
            return None;
        }
        match offset {
            REG_SECTOR => Some(self.sector),
            REG_COUNT => Some(self.size_sectors()),
            REG_STATUS_CMD => Some(u32::from(self.status)),
            REG_DATA => Some(self.pump_read()),
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
        if !self.regs.decodes_write(offset, width) {
            return None;
        }
        match offset {
            REG_SECTOR => self.sector = value,
            REG_COUNT => self.count = value,
            REG_STATUS_CMD => match value as u8 {
                DISK_CMD_READ => self.start_read(),
                DISK_CMD_WRITE => self.start_write(),
                cmd => {
                    log::debug!(target: "disk", "unknown command {cmd:#04x}");
                    self.status = DISK_STATUS_ERROR;
                }
            },
            REG_DATA => self.pump_write(value),
            _ => return None,
        }
        Some(())
    }
}
