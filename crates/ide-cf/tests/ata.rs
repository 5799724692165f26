//! ATA command protocol against a real backing image.

use std::io::Write;

use emu_core::System;
use ide_cf::{
    IdeCf, CMD_IDENTIFY_DEVICE, CMD_READ_SECTORS, CMD_WRITE_SECTORS, ERROR_ABRT, ERROR_IDNF,
    SECTOR_SIZE, STATUS_DRDY, STATUS_DRQ, STATUS_ERR,
};

const BASE: u32 = 0xFF_E000;
const DATA: u32 = BASE;
const ERROR: u32 = BASE + 1;
const COUNT: u32 = BASE + 2;
const LBA_LOW: u32 = BASE + 3;
const LBA_MID: u32 = BASE + 4;
const LBA_HIGH: u32 = BASE + 5;
const DEVICE: u32 = BASE + 6;
const STATUS_CMD: u32 = BASE + 7;

const LBA_DEV0: u32 = 0xE0; // LBA mode, device 0

fn image_file(sectors: u32) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().expect("temp image");
    for s in 0..sectors {
        let sector = vec![s as u8; SECTOR_SIZE as usize];
        f.write_all(&sector).expect("fill image");
    }
    f.flush().expect("flush image");
    f
}

fn cf_sys(image: &tempfile::NamedTempFile) -> System {
    let mut sys = System::default();
    let cf = IdeCf::open(image.path(), 0).expect("open image");
    sys.add_device(BASE, 0x10, Box::new(cf)).unwrap();
    sys
}

fn setup_lba(sys: &mut System, lba: u32, count: u32) {
    sys.write8(COUNT, count);
    sys.write8(LBA_LOW, lba & 0xFF);
    sys.write8(LBA_MID, (lba >> 8) & 0xFF);
    sys.write8(LBA_HIGH, (lba >> 16) & 0xFF);
    sys.write8(DEVICE, LBA_DEV0 | ((lba >> 24) & 0x0F));
}

fn status(sys: &mut System) -> u8 {
    sys.read8(STATUS_CMD) as u8
}

fn pump_words(sys: &mut System, words: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(words * 2);
    for _ in 0..words {
        let w = sys.read16(DATA) as u16;
        out.extend_from_slice(&w.to_le_bytes());
    }
    out
}

#[test]
fn drive_is_ready_after_attach() {
    let image = image_file(16);
    let mut sys = cf_sys(&image);
    assert_eq!(status(&mut sys) & STATUS_DRDY, STATUS_DRDY);
}

#[test]
fn read_sectors_delivers_file_content() {
    let image = image_file(16);
    let mut sys = cf_sys(&image);
    setup_lba(&mut sys, 5, 2);
    sys.write8(STATUS_CMD, u32::from(CMD_READ_SECTORS));
    assert_eq!(status(&mut sys) & STATUS_DRQ, STATUS_DRQ);
    let data = pump_words(&mut sys, 2 * SECTOR_SIZE as usize / 2);
    assert!(data[..512].iter().all(|&b| b == 5));
    assert!(data[512..].iter().all(|&b| b == 6));
    assert_eq!(status(&mut sys), STATUS_DRDY);
}

#[test]
fn write_sectors_round_trip() {
    let image = image_file(16);
    let mut sys = cf_sys(&image);
    setup_lba(&mut sys, 9, 1);
    sys.write8(STATUS_CMD, u32::from(CMD_WRITE_SECTORS));
    assert_eq!(status(&mut sys) & STATUS_DRQ, STATUS_DRQ);
    for _ in 0..(SECTOR_SIZE / 2) {
        sys.write16(DATA, 0xA55A);
    }
    assert_eq!(status(&mut sys), STATUS_DRDY);

    setup_lba(&mut sys, 9, 1);
    sys.write8(STATUS_CMD, u32::from(CMD_READ_SECTORS));
    let data = pump_words(&mut sys, SECTOR_SIZE as usize / 2);
    assert_eq!(data[0], 0x5A);
    assert_eq!(data[1], 0xA5);
    assert!(data.chunks(2).all(|c| c == [0x5A, 0xA5]));
}

#[test]
fn out_of_range_lba_sets_idnf() {
    let image = image_file(16);
    let mut sys = cf_sys(&image);
    setup_lba(&mut sys, 15, 2);
    sys.write8(STATUS_CMD, u32::from(CMD_READ_SECTORS));
    assert_eq!(status(&mut sys) & STATUS_ERR, STATUS_ERR);
    assert_eq!(sys.read8(ERROR) as u8, ERROR_IDNF);
}

#[test]
fn zero_sector_count_aborts() {
    let image = image_file(16);
    let mut sys = cf_sys(&image);
    setup_lba(&mut sys, 0, 0);
    sys.write8(STATUS_CMD, u32::from(CMD_READ_SECTORS));
    assert_eq!(status(&mut sys) & STATUS_ERR, STATUS_ERR);
    assert_eq!(sys.read8(ERROR) as u8, ERROR_ABRT);
}

#[test]
fn identify_reports_geometry() {
    let image = image_file(16);
    let mut sys = cf_sys(&image);
    sys.write8(DEVICE, LBA_DEV0);
    sys.write8(STATUS_CMD, u32::from(CMD_IDENTIFY_DEVICE));
    assert_eq!(status(&mut sys) & STATUS_DRQ, STATUS_DRQ);
    let block = pump_words(&mut sys, 256);
    let w0 = u16::from_le_bytes([block[0], block[1]]);
    assert_eq!(w0, 0x848A);
    let w60 = u16::from_le_bytes([block[120], block[121]]);
    let w61 = u16::from_le_bytes([block[122], block[123]]);
    assert_eq!((u32::from(w61) << 16) | u32::from(w60), 16);
    assert_eq!(status(&mut sys), STATUS_DRDY);
}

#[test]
fn device_1_is_unbacked() {
    let image = image_file(16);
    let mut sys = cf_sys(&image);
    sys.write8(DEVICE, LBA_DEV0 | 0x10);
    assert_eq!(status(&mut sys), 0);
    sys.write8(STATUS_CMD, u32::from(CMD_IDENTIFY_DEVICE));
    assert_eq!(status(&mut sys), 0);
    // Back to device 0: still ready, no error latched.
    sys.write8(DEVICE, LBA_DEV0);
    assert_eq!(status(&mut sys), STATUS_DRDY);
    assert_eq!(sys.read8(ERROR), 0);
}
