//! Resolve options and descriptor hints into a concrete VM configuration,
//! and apply it through a [`VmManager`].

use color_eyre::eyre::Context;
use color_eyre::Result;
use tracing::{debug, info};

use crate::hardware::{DiskBus, Firmware, OsType, ScsiController};
use crate::ovf::OvfHints;
use crate::qemu_img::DiskImage;
use crate::qm::VmManager;
use crate::utils::human_size;

/// Device key the rescue ISO is attached to
pub const CDROM_DEVICE: &str = "ide2";

/// A disk and the device it will be attached as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedDisk {
    pub image: DiskImage,
    pub device: String,
}

/// Everything needed to issue the `qm` command sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmPlan {
    pub vmid: u32,
    pub name: String,
    pub storage: String,
    pub memory_mb: u32,
    pub cores: u32,
    pub sockets: u32,
    pub net: String,
    pub firmware: Firmware,
    pub bus: DiskBus,
    pub controller: ScsiController,
    pub ostype: OsType,
    /// System disk first
    pub disks: Vec<PlannedDisk>,
    pub rescue_iso: Option<String>,
    pub start: bool,
}

/// Settings given explicitly on the command line; these win over hints.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub firmware: Option<Firmware>,
    pub bus: Option<DiskBus>,
    pub controller: Option<ScsiController>,
    pub ostype: Option<OsType>,
}

/// Identity and sizing of the VM being planned
#[derive(Debug, Clone)]
pub struct VmSpec {
    pub vmid: u32,
    pub name: String,
    pub storage: String,
    pub memory_mb: u32,
    pub cores: u32,
    pub sockets: u32,
    pub net: String,
    pub rescue_iso: Option<String>,
    pub start: bool,
}

impl VmPlan {
    /// Combine flags, hints and defaults. `disks` must already be sorted.
    pub fn resolve(
        spec: VmSpec,
        overrides: &Overrides,
        hints: &OvfHints,
        disks: Vec<DiskImage>,
    ) -> Result<Self> {
        let firmware = overrides.firmware.or(hints.firmware).unwrap_or_default();
        let bus = overrides.bus.or(hints.bus).unwrap_or_default();
        let controller = overrides.controller.or(hints.controller).unwrap_or_default();
        let ostype = overrides.ostype.or(hints.ostype).unwrap_or_default();
        debug!("Resolved firmware={firmware} bus={bus} scsihw={controller} ostype={ostype}");

        let devices = bus.assign(disks.len())?;
        let disks = disks
            .into_iter()
            .zip(devices)
            .map(|(image, device)| PlannedDisk { image, device })
            .collect();

        Ok(Self {
            vmid: spec.vmid,
            name: spec.name,
            storage: spec.storage,
            memory_mb: spec.memory_mb,
            cores: spec.cores,
            sockets: spec.sockets,
            net: spec.net,
            firmware,
            bus,
            controller,
            ostype,
            disks,
            rescue_iso: spec.rescue_iso,
            start: spec.start,
        })
    }

    /// Device key of the system disk
    pub fn boot_device(&self) -> &str {
        self.disks
            .first()
            .map(|d| d.device.as_str())
            .unwrap_or_default()
    }

    /// Arguments for `qm create <vmid>`
    pub fn create_args(&self) -> Vec<String> {
        let mut args = vec![
            "--name".to_owned(),
            self.name.clone(),
            "--memory".to_owned(),
            self.memory_mb.to_string(),
            "--cores".to_owned(),
            self.cores.to_string(),
            "--sockets".to_owned(),
            self.sockets.to_string(),
            "--net0".to_owned(),
            self.net.clone(),
            "--ostype".to_owned(),
            self.ostype.to_string(),
        ];
        if self.bus == DiskBus::Scsi {
            args.push("--scsihw".to_owned());
            args.push(self.controller.to_string());
        }
        if self.firmware == Firmware::Uefi {
            args.extend([
                "--bios".to_owned(),
                "ovmf".to_owned(),
                "--machine".to_owned(),
                "q35".to_owned(),
                "--efidisk0".to_owned(),
                format!("{}:1,efitype=4m,pre-enrolled-keys=0", self.storage),
            ]);
        }
        args
    }

    /// Value for `qm set --boot`
    pub fn boot_order(&self) -> String {
        match self.rescue_iso {
            Some(_) => format!("order={CDROM_DEVICE};{}", self.boot_device()),
            None => format!("order={}", self.boot_device()),
        }
    }

    /// Issue the full command sequence. Returns the imported volume of each
    /// disk, in plan order.
    pub fn apply(&self, qm: &mut dyn VmManager) -> Result<Vec<String>> {
        let vmid = self.vmid;
        info!("Creating VM {vmid} ({})", self.name);
        qm.create(vmid, &self.create_args())
            .with_context(|| format!("Creating VM {vmid}"))?;
        // The VM is left in place on failure
        self.configure(qm)
            .with_context(|| format!("VM {vmid} was created; remove it with: qm destroy {vmid}"))
    }

    /// Everything after `qm create`: disks, CD-ROM, boot order and start.
    fn configure(&self, qm: &mut dyn VmManager) -> Result<Vec<String>> {
        let vmid = self.vmid;
        let mut volumes = Vec::with_capacity(self.disks.len());
        for disk in &self.disks {
            info!(
                "Importing {} ({}) as {}",
                disk.image.file_name(),
                human_size(disk.image.virtual_size),
                disk.device
            );
            let volume = qm
                .import_disk(vmid, &disk.image.path, &self.storage)
                .with_context(|| format!("Importing {}", disk.image.path))?;
            qm.set(vmid, &[format!("--{}", disk.device), volume.clone()])
                .with_context(|| format!("Attaching {volume} as {}", disk.device))?;
            volumes.push(volume);
        }

        if let Some(iso) = &self.rescue_iso {
            info!("Attaching rescue ISO {iso}");
            qm.set(
                vmid,
                &[format!("--{CDROM_DEVICE}"), format!("{iso},media=cdrom")],
            )
            .with_context(|| format!("Attaching rescue ISO {iso}"))?;
        }

        qm.set(vmid, &["--boot".to_owned(), self.boot_order()])
            .context("Setting boot order")?;

        if self.start {
            info!("Starting VM {vmid}");
            qm.start(vmid)
                .with_context(|| format!("Starting VM {vmid}"))?;
        }
        Ok(volumes)
    }
}
