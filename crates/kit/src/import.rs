//! Import an OVA appliance as a new Proxmox VM
//!
//! # Workflow
//!
//! 1. **Validation**: flags are checked before any external tool runs
//! 2. **Preflight**: `tar`, `qemu-img` and `qm` must be on `PATH`, and the
//!    VMID must be unused
//! 3. **Extraction**: the OVA is unpacked with `tar` into a temporary work
//!    directory, removed afterwards unless `--keep-temp` is given
//! 4. **Detection**: the OVF descriptor is searched for firmware, disk bus,
//!    SCSI controller and guest OS keywords
//! 5. **Disk ordering**: each disk image is probed with `qemu-img info`; the
//!    largest becomes the system disk
//! 6. **Configuration**: `qm create`, then `qm importdisk` and `qm set` per
//!    disk, then the boot order
//! 7. **Rescue**: with `--rescue-iso`, the ISO is attached, boots first, and
//!    manual recovery steps are printed
//!
//! ```bash
//! ova-import --vmid 120 --name appliance --storage local-lvm --ova appliance.ova
//!
//! # Force UEFI on virtio, keep the extracted files around
//! ova-import --vmid 121 --name web --storage tank --ova web.ova \
//!     --uefi --disk-bus virtio --keep-temp
//! ```

use std::fmt::Write as _;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use color_eyre::eyre::{eyre, Context};
use color_eyre::Result;
use indicatif::HumanDuration;
use tracing::{debug, info, warn};

use crate::archive::{self, Workdir};
use crate::command_run::program_available;
use crate::common_opts::{FirmwareOpts, HardwareOpts};
use crate::ovf::OvfHints;
use crate::plan::{Overrides, VmPlan, VmSpec};
use crate::qm::{DryRun, Qm, VmManager};
use crate::utils::{human_size, validate_vm_name, validate_vmid};
use crate::{qemu_img, rescue};

/// Import an OVA virtual appliance into Proxmox VE
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct ImportOpts {
    /// ID of the VM to create (100-999999999)
    #[clap(long)]
    pub vmid: u32,

    /// Name of the VM to create
    #[clap(long)]
    pub name: String,

    /// Proxmox storage to import the disks into (e.g. local-lvm)
    #[clap(long)]
    pub storage: String,

    /// Path to the OVA archive
    #[clap(long)]
    pub ova: Utf8PathBuf,

    #[clap(flatten)]
    pub hardware: HardwareOpts,

    #[clap(flatten)]
    pub firmware: FirmwareOpts,

    /// Do not remove the extracted archive contents
    #[clap(long)]
    pub keep_temp: bool,

    /// Directory to create the temporary extraction directory in
    #[clap(long)]
    pub workdir: Option<Utf8PathBuf>,

    /// ISO volume to attach as a bootable rescue CD-ROM (e.g. local:iso/systemrescue.iso)
    #[clap(long)]
    pub rescue_iso: Option<String>,

    /// Start the VM once it is configured
    #[clap(long)]
    pub start: bool,

    /// Print the qm commands instead of running them
    #[clap(long)]
    pub dry_run: bool,
}

impl ImportOpts {
    /// Check everything that can be checked without running a tool
    pub fn validate(&self) -> Result<()> {
        validate_vmid(self.vmid)?;
        validate_vm_name(&self.name)?;
        if self.storage.trim().is_empty() {
            return Err(eyre!("--storage cannot be empty"));
        }
        if !self.ova.exists() {
            return Err(eyre!("OVA file does not exist: {}", self.ova));
        }
        if !self.ova.is_file() {
            return Err(eyre!("OVA path is not a file: {}", self.ova));
        }
        if let Some(dir) = &self.workdir {
            if !dir.is_dir() {
                return Err(eyre!("Work directory does not exist: {dir}"));
            }
        }
        if let Some(iso) = &self.rescue_iso {
            if !iso.contains(':') {
                return Err(eyre!(
                    "Invalid rescue ISO '{iso}': expected a storage volume like local:iso/rescue.iso"
                ));
            }
        }
        self.hardware.validate()
    }

    fn overrides(&self) -> Overrides {
        Overrides {
            firmware: self.firmware.firmware(),
            bus: self.firmware.disk_bus,
            controller: self.firmware.scsi_controller,
            ostype: self.firmware.ostype,
        }
    }

    fn spec(&self) -> Result<VmSpec> {
        Ok(VmSpec {
            vmid: self.vmid,
            name: self.name.clone(),
            storage: self.storage.clone(),
            memory_mb: self.hardware.memory_mb()?,
            cores: self.hardware.cores,
            sockets: self.hardware.sockets,
            net: self.hardware.net.clone(),
            rescue_iso: self.rescue_iso.clone(),
            start: self.start,
        })
    }
}

fn preflight(dry_run: bool) -> Result<()> {
    let mut tools = vec!["tar", "qemu-img"];
    if !dry_run {
        tools.push("qm");
    }
    let missing: Vec<_> = tools
        .into_iter()
        .filter(|t| !program_available(t))
        .collect();
    if !missing.is_empty() {
        return Err(eyre!(
            "Required tools not found in PATH: {}",
            missing.join(", ")
        ));
    }
    Ok(())
}

/// Extract, inspect and plan. The work directory is returned so the caller
/// controls how long the extracted disks live.
fn prepare(opts: &ImportOpts) -> Result<(VmPlan, Workdir)> {
    let workdir = Workdir::new(opts.workdir.as_deref(), opts.keep_temp)?;
    archive::extract(&opts.ova, workdir.path())?;

    let hints = match archive::find_descriptor(workdir.path())? {
        Some(ovf) => OvfHints::from_file(&ovf)?,
        None => {
            warn!("No OVF descriptor in {}; using defaults", opts.ova);
            OvfHints::default()
        }
    };

    let paths = archive::find_disks(workdir.path())?;
    let disks = qemu_img::probe_all(&paths)?;

    let plan = VmPlan::resolve(opts.spec()?, &opts.overrides(), &hints, disks)?;
    debug!("Plan: {plan:?}");
    Ok((plan, workdir))
}

fn summary(plan: &VmPlan, volumes: &[String], kept: Option<&Utf8Path>, dry_run: bool) -> String {
    let mut out = String::new();
    let outcome = if dry_run {
        "would be imported (dry run, nothing was changed)"
    } else {
        "imported"
    };
    let _ = writeln!(out, "VM {} ({}) {outcome}", plan.vmid, plan.name);
    let _ = writeln!(out, "  firmware: {}", plan.firmware);
    let _ = writeln!(out, "  disk bus: {}", plan.bus);
    for (disk, volume) in plan.disks.iter().zip(volumes) {
        let _ = writeln!(
            out,
            "  {}: {volume} <- {} ({}, {})",
            disk.device,
            disk.image.file_name(),
            disk.image.format,
            human_size(disk.image.virtual_size)
        );
    }
    if let Some(dir) = kept {
        let _ = writeln!(out, "  extracted files kept in {dir}");
    }
    out
}

/// Run an import against `qm`, which must not already know `opts.vmid`.
pub fn run_with(opts: &ImportOpts, qm: &mut dyn VmManager) -> Result<VmPlan> {
    if qm.exists(opts.vmid)? {
        return Err(eyre!("VM {} already exists", opts.vmid));
    }

    let (plan, workdir) = prepare(opts)?;
    let volumes = plan.apply(qm)?;

    let kept = workdir.kept().then(|| workdir.path());
    println!();
    print!("{}", summary(&plan, &volumes, kept, opts.dry_run));
    if let Some(text) = rescue::instructions(&plan) {
        println!();
        print!("{text}");
    }
    Ok(plan)
}

/// Entry point for the command line.
pub fn run(opts: ImportOpts) -> Result<()> {
    let started = Instant::now();
    opts.validate()?;
    preflight(opts.dry_run)?;
    debug!("Hardware: {}", opts.hardware);

    if opts.dry_run {
        run_with(&opts, &mut DryRun::new())?;
    } else {
        run_with(&opts, &mut Qm::default())
            .with_context(|| format!("Importing {} as VM {}", opts.ova, opts.vmid))?;
    }
    info!("Finished in {}", HumanDuration(started.elapsed()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::tests::{disk, RecordingQm};

    fn parse(args: &[&str]) -> std::result::Result<ImportOpts, clap::Error> {
        ImportOpts::try_parse_from(std::iter::once("ova-import").chain(args.iter().copied()))
    }

    const REQUIRED: &[&str] = &[
        "--vmid", "120", "--name", "appliance", "--storage", "local-lvm", "--ova", "/nonexistent.ova",
    ];

    #[test]
    fn test_required_flags() {
        for skip in ["--vmid", "--name", "--storage", "--ova"] {
            let args: Vec<&str> = REQUIRED
                .chunks(2)
                .filter(|kv| kv[0] != skip)
                .flatten()
                .copied()
                .collect();
            let err = parse(&args).unwrap_err();
            assert_eq!(
                err.kind(),
                clap::error::ErrorKind::MissingRequiredArgument,
                "{skip}"
            );
        }
    }

    #[test]
    fn test_defaults() {
        let opts = parse(REQUIRED).unwrap();
        assert_eq!(opts.hardware.memory_mb().unwrap(), 2048);
        assert_eq!(opts.hardware.cores, 2);
        assert_eq!(opts.hardware.sockets, 1);
        assert_eq!(opts.hardware.net, "virtio,bridge=vmbr0");
        assert_eq!(opts.firmware.firmware(), None);
        assert!(!opts.keep_temp && !opts.dry_run && !opts.start);
    }

    #[test]
    fn test_uefi_conflicts_with_bios() {
        let mut args = REQUIRED.to_vec();
        args.extend(["--uefi", "--bios"]);
        let err = parse(&args).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);

        let mut args = REQUIRED.to_vec();
        args.extend(["--uefi", "--disk-bus", "virtio", "--scsi-controller", "lsi"]);
        let opts = parse(&args).unwrap();
        assert_eq!(opts.firmware.firmware(), Some(crate::hardware::Firmware::Uefi));
        assert_eq!(opts.firmware.disk_bus, Some(crate::hardware::DiskBus::Virtio));
    }

    #[test]
    fn test_invalid_disk_bus() {
        let mut args = REQUIRED.to_vec();
        args.extend(["--disk-bus", "nvme"]);
        assert!(parse(&args).is_err());
    }

    #[test]
    fn test_validate() {
        let td = tempfile::tempdir().unwrap();
        let ova = Utf8PathBuf::try_from(td.path().join("a.ova")).unwrap();
        std::fs::write(&ova, b"").unwrap();

        let mut opts = parse(REQUIRED).unwrap();
        let err = opts.validate().unwrap_err();
        assert!(err.to_string().contains("does not exist"), "{err}");

        opts.ova = ova.clone();
        opts.validate().unwrap();

        opts.vmid = 42;
        assert!(opts.validate().is_err());
        opts.vmid = 120;

        opts.name = "bad_name".into();
        assert!(opts.validate().is_err());
        opts.name = "appliance".into();

        opts.hardware.cores = 0;
        assert!(opts.validate().is_err());
        opts.hardware.cores = 2;

        opts.rescue_iso = Some("rescue.iso".into());
        assert!(opts.validate().is_err());
        opts.rescue_iso = Some("local:iso/rescue.iso".into());
        opts.validate().unwrap();

        opts.ova = Utf8PathBuf::try_from(td.path().to_path_buf()).unwrap();
        let err = opts.validate().unwrap_err();
        assert!(err.to_string().contains("not a file"), "{err}");
    }

    #[test]
    fn test_existing_vmid_rejected_before_extraction() {
        let mut opts = parse(REQUIRED).unwrap();
        opts.vmid = 130;
        let mut qm = RecordingQm {
            existing: vec![130],
            ..Default::default()
        };
        let err = run_with(&opts, &mut qm).unwrap_err();
        assert!(err.to_string().contains("already exists"), "{err}");
        assert!(qm.calls.is_empty());
    }

    #[test]
    fn test_summary_marks_dry_run() {
        let opts = parse(REQUIRED).unwrap();
        let plan = VmPlan::resolve(
            opts.spec().unwrap(),
            &opts.overrides(),
            &OvfHints::default(),
            vec![disk("os.vmdk", 1 << 30)],
        )
        .unwrap();
        let volumes = ["local-lvm:vm-120-disk-0".to_owned()];

        let real = summary(&plan, &volumes, None, false);
        assert!(real.starts_with("VM 120 (appliance) imported\n"), "{real}");
        assert!(real.contains("sata0: local-lvm:vm-120-disk-0 <- os.vmdk (vmdk, 1.00 GiB)"), "{real}");

        let dry = summary(&plan, &volumes, Some(Utf8Path::new("/var/tmp/w")), true);
        assert!(dry.starts_with("VM 120 (appliance) would be imported (dry run"), "{dry}");
        assert!(!dry.contains(") imported"), "{dry}");
        assert!(dry.contains("extracted files kept in /var/tmp/w"), "{dry}");
    }
}
