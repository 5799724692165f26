//! Machine configuration.

use std::path::{Path, PathBuf};

use emu_core::BusConfig;
use serde::Deserialize;
use thiserror::Error;

/// CPU model knob. The interpreter is external; the model only drives
/// emulator policy defaults (a 68000 faults on misaligned word access,
/// a 68020 does not).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum CpuModel {
    M68000,
    M68010,
    M68020,
}

impl CpuModel {
    #[must_use]
    pub fn faults_on_unaligned(self) -> bool {
        !matches!(self, Self::M68020)
    }
}

/// Which reference board to assemble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Board {
    /// RAM + ROM + simple UART/timer/disk.
    Simple,
    /// RAM + ROM + 68681 DUART + IDE/CF.
    Sbc,
}

/// Full machine description, loadable from JSON.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MachineConfig {
    pub board: Board,
    pub cpu_model: CpuModel,
    pub ram_base: u32,
    pub ram_size: u32,
    pub rom_base: u32,
    pub rom_image: Option<PathBuf>,
    pub disk_image: Option<PathBuf>,
    pub bus_error_on_unmapped: bool,
    /// `None` defaults from the CPU model.
    pub address_error_on_unaligned: Option<bool>,
    /// Upper bound on cycles per quantum.
    pub quantum: u64,
    /// Restore region contents from their construction images on reset.
    pub reset_contents: bool,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            board: Board::Simple,
            cpu_model: CpuModel::M68000,
            ram_base: 0,
            ram_size: 0x10_0000,
            rom_base: 0x00F0_0000,
            rom_image: None,
            disk_image: None,
            bus_error_on_unmapped: true,
            address_error_on_unaligned: None,
            quantum: crate::DEFAULT_QUANTUM,
            reset_contents: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse: {0}")]
    Parse(#[from] serde_json::Error),
}

impl MachineConfig {
    /// Load a board description from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }

    /// Fault knobs for the bus, with the alignment default taken from
    /// the CPU model.
    #[must_use]
    pub fn bus_config(&self) -> BusConfig {
        BusConfig {
            bus_error_on_unmapped: self.bus_error_on_unmapped,
            address_error_on_unaligned: self
                .address_error_on_unaligned
                .unwrap_or_else(|| self.cpu_model.faults_on_unaligned()),
        }
    }
}
