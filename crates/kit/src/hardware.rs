//! Virtual hardware choices for an imported VM and their `qm` spellings.

use clap::ValueEnum;
use color_eyre::eyre::{eyre, Result};

/// Firmware the guest boots with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Firmware {
    /// Legacy BIOS (SeaBIOS)
    #[default]
    Bios,
    /// UEFI (OVMF) on a q35 machine
    Uefi,
}

/// Bus the imported disks are attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum DiskBus {
    Scsi,
    /// SATA through an AHCI controller
    #[default]
    Sata,
    Ide,
    Virtio,
}

impl DiskBus {
    /// Device slots available for data disks on this bus, in attachment order.
    ///
    /// `ide2` is left free for the CD-ROM drive.
    pub fn slots(self) -> &'static [u8] {
        static SCSI: [u8; 31] = [
            0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23,
            24, 25, 26, 27, 28, 29, 30,
        ];
        match self {
            DiskBus::Scsi => &SCSI,
            DiskBus::Sata => &SCSI[..6],
            DiskBus::Ide => &[0, 1, 3],
            DiskBus::Virtio => &SCSI[..16],
        }
    }

    /// Device key for `slot`, e.g. `scsi0`, as used by `qm set --<key>`.
    pub fn device(self, slot: u8) -> String {
        format!("{self}{slot}")
    }

    /// Assign a device key to each of `count` disks, in order.
    pub fn assign(self, count: usize) -> Result<Vec<String>> {
        let slots = self.slots();
        if count > slots.len() {
            return Err(eyre!(
                "{count} disks do not fit on the {self} bus (at most {})",
                slots.len()
            ));
        }
        Ok(slots[..count].iter().map(|&s| self.device(s)).collect())
    }
}

/// SCSI host adapter model (`qm --scsihw`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, strum::Display)]
pub enum ScsiController {
    #[default]
    #[strum(serialize = "virtio-scsi-pci")]
    #[value(name = "virtio-scsi-pci")]
    VirtioScsiPci,
    /// LSI Logic, as emulated by VMware and VirtualBox
    #[strum(serialize = "lsi")]
    Lsi,
    /// VMware paravirtual SCSI
    #[strum(serialize = "pvscsi")]
    Pvscsi,
}

/// Guest operating system class (`qm --ostype`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum OsType {
    /// Linux 2.6 and newer kernels
    L26,
    /// Windows 10/2016 and newer
    Win10,
    #[default]
    Other,
}
