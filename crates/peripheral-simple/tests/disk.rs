//! Simple-disk transfers against a real backing image.

use std::io::Write;

use emu_core::System;
use peripheral_simple::{
    SimpleDisk, DISK_CMD_READ, DISK_CMD_WRITE, DISK_SECTOR_SIZE, DISK_STATUS_DATA_READY,
    DISK_STATUS_ERROR, DISK_STATUS_IDLE,
};

const BASE: u32 = 0xFF_2000;
const REG_SECTOR: u32 = BASE;
const REG_COUNT: u32 = BASE + 0x04;
const REG_STATUS_CMD: u32 = BASE + 0x08;
const REG_DATA: u32 = BASE + 0x0C;

/// Eight sectors of repeating `"1234567\n"`.
fn image_file() -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().expect("temp image");
    for _ in 0..(8 * DISK_SECTOR_SIZE / 8) {
        f.write_all(b"1234567\n").expect("fill image");
    }
    f.flush().expect("flush image");
    f
}

fn disk_sys(image: &tempfile::NamedTempFile) -> System {
    let mut sys = System::default();
    let disk = SimpleDisk::open(image.path()).expect("open image");
    assert_eq!(disk.size_sectors(), 8);
    sys.add_device(BASE, 0x10, Box::new(disk)).unwrap();
    sys
}

fn issue(sys: &mut System, sector: u32, count: u32, cmd: u8) -> u8 {
    sys.write32(REG_SECTOR, sector);
    sys.write32(REG_COUNT, count);
    sys.write8(REG_STATUS_CMD, u32::from(cmd));
    sys.read8(REG_STATUS_CMD) as u8
}

fn pump_read(sys: &mut System, longs: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(longs * 4);
    for _ in 0..longs {
        out.extend_from_slice(&sys.read32(REG_DATA).to_be_bytes());
    }
    out
}

#[test]
fn invalid_transfers_set_error() {
    let image = image_file();
    let mut sys = disk_sys(&image);
    assert_eq!(issue(&mut sys, 0, 0, DISK_CMD_READ), DISK_STATUS_ERROR);
    assert_eq!(issue(&mut sys, 1000, 1, DISK_CMD_READ), DISK_STATUS_ERROR);
    assert_eq!(issue(&mut sys, 7, 2, DISK_CMD_READ), DISK_STATUS_ERROR);
}

#[test]
fn read_one_sector() {
    let image = image_file();
    let mut sys = disk_sys(&image);
    assert_eq!(issue(&mut sys, 0, 1, DISK_CMD_READ), DISK_STATUS_DATA_READY);
    let data = pump_read(&mut sys, DISK_SECTOR_SIZE as usize / 4);
    assert_eq!(&data[..8], b"1234567\n");
    assert_eq!(sys.read8(REG_STATUS_CMD) as u8, DISK_STATUS_IDLE);
}

#[test]
fn write_then_read_back() {
    let image = image_file();
    let mut sys = disk_sys(&image);

    assert_eq!(issue(&mut sys, 3, 1, DISK_CMD_WRITE), DISK_STATUS_DATA_READY);
    for _ in 0..(DISK_SECTOR_SIZE / 4) {
        sys.write32(REG_DATA, 0x5555_5555);
    }
    assert_eq!(sys.read8(REG_STATUS_CMD) as u8, DISK_STATUS_IDLE);

    assert_eq!(issue(&mut sys, 3, 2, DISK_CMD_READ), DISK_STATUS_DATA_READY);
    let data = pump_read(&mut sys, 2 * DISK_SECTOR_SIZE as usize / 4);
    assert!(data[..512].iter().all(|&b| b == 0x55));
    assert_eq!(&data[512..520], b"1234567\n");
    assert_eq!(sys.read8(REG_STATUS_CMD) as u8, DISK_STATUS_IDLE);
}

#[test]
fn size_register_reads_media_sectors() {
    let image = image_file();
    let mut sys = disk_sys(&image);
    assert_eq!(sys.read32(REG_COUNT), 8);
}
