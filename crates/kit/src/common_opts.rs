//! Option groups shared by the import command

use clap::Parser;
use color_eyre::eyre::{eyre, Result};
use std::fmt;

use crate::hardware::{DiskBus, Firmware, OsType, ScsiController};
use crate::utils::parse_memory_to_mb;

pub const DEFAULT_MEMORY_USER_STR: &str = "2048";
pub const DEFAULT_NET: &str = "virtio,bridge=vmbr0";

/// CPU, memory and network sizing for the new VM
#[derive(Parser, Debug, Clone)]
pub struct HardwareOpts {
    #[clap(
        long,
        default_value = DEFAULT_MEMORY_USER_STR,
        help = "Memory size (e.g. 4G, 2048M, or plain number for MB)"
    )]
    pub memory: String,

    /// Number of CPU cores per socket
    #[clap(long, default_value_t = 2)]
    pub cores: u32,

    /// Number of CPU sockets
    #[clap(long, default_value_t = 1)]
    pub sockets: u32,

    /// Network device specification passed to `qm` as net0
    #[clap(long, default_value = DEFAULT_NET)]
    pub net: String,
}

impl HardwareOpts {
    pub fn memory_mb(&self) -> Result<u32> {
        parse_memory_to_mb(&self.memory)
    }

    pub fn validate(&self) -> Result<()> {
        self.memory_mb()?;
        if self.cores == 0 {
            return Err(eyre!("--cores must be at least 1"));
        }
        if self.sockets == 0 {
            return Err(eyre!("--sockets must be at least 1"));
        }
        if self.net.trim().is_empty() {
            return Err(eyre!("--net cannot be empty"));
        }
        Ok(())
    }
}

impl fmt::Display for HardwareOpts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "memory={} sockets={} cores={} net0={}",
            self.memory, self.sockets, self.cores, self.net
        )
    }
}

/// Overrides for settings that are otherwise detected from the OVF descriptor
#[derive(Parser, Debug, Clone, Default)]
pub struct FirmwareOpts {
    /// Boot with UEFI (OVMF) regardless of the descriptor
    #[clap(long, conflicts_with = "bios")]
    pub uefi: bool,

    /// Boot with legacy BIOS regardless of the descriptor
    #[clap(long)]
    pub bios: bool,

    /// Bus to attach the imported disks to
    #[clap(long, value_enum)]
    pub disk_bus: Option<DiskBus>,

    /// SCSI controller model, used when the disk bus is scsi
    #[clap(long, value_enum)]
    pub scsi_controller: Option<ScsiController>,

    /// Guest OS type
    #[clap(long, value_enum)]
    pub ostype: Option<OsType>,
}

impl FirmwareOpts {
    /// Firmware explicitly requested on the command line, if any
    pub fn firmware(&self) -> Option<Firmware> {
        match (self.uefi, self.bios) {
            (true, _) => Some(Firmware::Uefi),
            (_, true) => Some(Firmware::Bios),
            _ => None,
        }
    }
}
