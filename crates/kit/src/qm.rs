//! Proxmox `qm` integration
//!
//! [`VmManager`] is the set of VM-manager operations an import needs. [`Qm`]
//! runs the real CLI; [`DryRun`] prints what would be run.

use std::process::Command;

use camino::Utf8Path;
use color_eyre::eyre::{eyre, Context};
use color_eyre::Result;
use tracing::debug;

use crate::command_run::{describe, program_available, CommandRun};

/// Operations against the host's VM manager
pub trait VmManager {
    /// Whether a guest with this VMID is already defined
    fn exists(&mut self, vmid: u32) -> Result<bool>;

    /// `qm create <vmid> <args>`
    fn create(&mut self, vmid: u32, args: &[String]) -> Result<()>;

    /// Import `disk` into `storage` as an unused volume of the VM, returning
    /// the volume reference (e.g. `local-lvm:vm-100-disk-0`).
    fn import_disk(&mut self, vmid: u32, disk: &Utf8Path, storage: &str) -> Result<String>;

    /// `qm set <vmid> <args>`
    fn set(&mut self, vmid: u32, args: &[String]) -> Result<()>;

    fn start(&mut self, vmid: u32) -> Result<()>;
}

/// The `qm` binary on this host
#[derive(Debug)]
pub struct Qm {
    program: String,
}

impl Default for Qm {
    fn default() -> Self {
        Self {
            program: "qm".to_owned(),
        }
    }
}

impl Qm {
    #[cfg(test)]
    pub(crate) fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, vmid: u32, verb: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg(verb).arg(vmid.to_string());
        cmd
    }
}

impl VmManager for Qm {
    fn exists(&mut self, vmid: u32) -> Result<bool> {
        let output = self
            .command(vmid, "status")
            .output()
            .with_context(|| format!("Failed to run {} status", self.program))?;
        Ok(output.status.success())
    }

    fn create(&mut self, vmid: u32, args: &[String]) -> Result<()> {
        self.command(vmid, "create").args(args).run()
    }

    fn import_disk(&mut self, vmid: u32, disk: &Utf8Path, storage: &str) -> Result<String> {
        let output = self
            .command(vmid, "importdisk")
            .arg(disk)
            .arg(storage)
            .run_get_string()?;
        debug!("importdisk output: {output}");
        parse_imported_volume(&output)
            .with_context(|| format!("Importing {disk} into storage {storage}"))
    }

    fn set(&mut self, vmid: u32, args: &[String]) -> Result<()> {
        self.command(vmid, "set").args(args).run()
    }

    fn start(&mut self, vmid: u32) -> Result<()> {
        self.command(vmid, "start").run()
    }
}

/// Prints the `qm` invocations instead of running them.
///
/// When a host is attached, existence checks are still answered by it so a
/// dry run catches VMID collisions; nothing else touches the host.
#[derive(Debug, Default)]
pub struct DryRun {
    host: Option<Qm>,
    imported: usize,
}

impl DryRun {
    /// Dry run that consults `qm` on this host if it is installed.
    pub fn new() -> Self {
        let host = program_available("qm").then(Qm::default);
        if host.is_none() {
            debug!("qm not found; skipping VMID collision check");
        }
        Self { host, imported: 0 }
    }

    pub fn with_host(host: Qm) -> Self {
        Self {
            host: Some(host),
            imported: 0,
        }
    }

    fn print(vmid: u32, verb: &str, args: &[&str]) {
        let mut cmd = Command::new("qm");
        cmd.arg(verb).arg(vmid.to_string()).args(args);
        println!("{}", describe(&cmd));
    }
}

impl VmManager for DryRun {
    fn exists(&mut self, vmid: u32) -> Result<bool> {
        match self.host.as_mut() {
            Some(host) => host.exists(vmid),
            None => Ok(false),
        }
    }

    fn create(&mut self, vmid: u32, args: &[String]) -> Result<()> {
        Self::print(vmid, "create", &args.iter().map(String::as_str).collect::<Vec<_>>());
        Ok(())
    }

    fn import_disk(&mut self, vmid: u32, disk: &Utf8Path, storage: &str) -> Result<String> {
        Self::print(vmid, "importdisk", &[disk.as_str(), storage]);
        // The real name is chosen by the storage plugin; this is the usual shape
        let volume = format!("{storage}:vm-{vmid}-disk-{}", self.imported);
        self.imported += 1;
        Ok(volume)
    }

    fn set(&mut self, vmid: u32, args: &[String]) -> Result<()> {
        Self::print(vmid, "set", &args.iter().map(String::as_str).collect::<Vec<_>>());
        Ok(())
    }

    fn start(&mut self, vmid: u32) -> Result<()> {
        Self::print(vmid, "start", &[]);
        Ok(())
    }
}

/// Extract the volume reference from `qm importdisk` output.
///
/// Older releases print `Successfully imported disk as 'unused0:local-lvm:vm-100-disk-0'`,
/// newer ones `unused0: successfully imported disk 'local-lvm:vm-100-disk-0'`.
pub fn parse_imported_volume(output: &str) -> Result<String> {
    output
        .lines()
        .filter(|l| l.to_ascii_lowercase().contains("imported disk"))
        .find_map(|line| {
            let (head, _) = line.rsplit_once('\'')?;
            let (_, quoted) = head.rsplit_once('\'')?;
            let volume = match quoted.split_once(':') {
                Some((key, rest)) if key.starts_with("unused") => rest,
                _ => quoted,
            };
            (!volume.is_empty()).then(|| volume.to_owned())
        })
        .ok_or_else(|| eyre!("Could not find imported volume reference in qm output"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn test_parse_legacy_output() {
        let out = indoc! {"
            importing disk '/tmp/ova-import-x/disk1.vmdk' to VM 100 ...
              Logical volume \"vm-100-disk-0\" created.
            transferred 20.0 GiB of 20.0 GiB (100.00%)
            Successfully imported disk as 'unused0:local-lvm:vm-100-disk-0'
        "};
        assert_eq!(parse_imported_volume(out).unwrap(), "local-lvm:vm-100-disk-0");
    }

    #[test]
    fn test_parse_current_output() {
        let out = indoc! {"
            importing disk '/tmp/ova-import-x/disk2.vmdk' to VM 101 ...
            transferred 1.0 GiB of 1.0 GiB (100.00%)
            unused1: successfully imported disk 'tank:vm-101-disk-1'
        "};
        assert_eq!(parse_imported_volume(out).unwrap(), "tank:vm-101-disk-1");
    }

    #[test]
    fn test_parse_directory_storage() {
        let out = "Successfully imported disk as 'unused0:local:101/vm-101-disk-0.raw'\n";
        assert_eq!(
            parse_imported_volume(out).unwrap(),
            "local:101/vm-101-disk-0.raw"
        );
    }

    #[test]
    fn test_parse_missing_reference() {
        for out in ["", "transferred 1.0 GiB\n", "successfully imported disk\n"] {
            let err = parse_imported_volume(out).unwrap_err();
            assert!(err.to_string().contains("Could not find"), "{out:?}");
        }
    }

    #[test]
    fn test_dry_run_placeholder_volumes() {
        let mut dry = DryRun::default();
        let a = dry.import_disk(100, Utf8Path::new("/w/a.vmdk"), "local-lvm").unwrap();
        let b = dry.import_disk(100, Utf8Path::new("/w/b.vmdk"), "local-lvm").unwrap();
        assert_eq!(a, "local-lvm:vm-100-disk-0");
        assert_eq!(b, "local-lvm:vm-100-disk-1");
        assert!(!dry.exists(100).unwrap());
    }

    /// Stand-in `qm` that appends its argv to `argv.log` next to itself.
    /// `status` succeeds only for VMID 100.
    const STUB_QM: &str = indoc! {r#"
        #!/bin/sh
        echo "$@" >> "$(dirname "$0")/argv.log"
        case "$1" in
          status) [ "$2" = 100 ] ;;
          importdisk)
            echo "importing disk '$3' to VM $2 ..."
            echo "unused0: successfully imported disk 'local-lvm:vm-100-disk-0'"
            ;;
          fail) echo "unable to parse value" >&2; exit 255 ;;
        esac
    "#};

    fn stub_qm() -> (tempfile::TempDir, Qm) {
        use std::os::unix::fs::PermissionsExt;
        let td = tempfile::tempdir().unwrap();
        let stub = td.path().join("qm");
        std::fs::write(&stub, STUB_QM).unwrap();
        std::fs::set_permissions(&stub, std::fs::Permissions::from_mode(0o755)).unwrap();
        let qm = Qm::with_program(stub.to_str().unwrap());
        (td, qm)
    }

    fn logged_argv(td: &tempfile::TempDir) -> Vec<String> {
        std::fs::read_to_string(td.path().join("argv.log"))
            .unwrap()
            .lines()
            .map(str::to_owned)
            .collect()
    }

    #[test]
    fn test_qm_invocations() {
        let (td, mut qm) = stub_qm();
        assert!(qm.exists(100).unwrap());
        assert!(!qm.exists(101).unwrap());
        qm.create(100, &["--name".into(), "appliance".into()]).unwrap();
        let volume = qm
            .import_disk(100, Utf8Path::new("/work/disk1.vmdk"), "local-lvm")
            .unwrap();
        assert_eq!(volume, "local-lvm:vm-100-disk-0");
        qm.set(100, &["--scsi0".into(), volume]).unwrap();
        qm.start(100).unwrap();
        assert_eq!(
            logged_argv(&td),
            [
                "status 100",
                "status 101",
                "create 100 --name appliance",
                "importdisk 100 /work/disk1.vmdk local-lvm",
                "set 100 --scsi0 local-lvm:vm-100-disk-0",
                "start 100",
            ]
        );
    }

    #[test]
    fn test_qm_failure_carries_stderr() {
        let (_td, mut qm) = stub_qm();
        let err = qm
            .command(100, "fail")
            .run()
            .unwrap_err();
        assert!(format!("{err:?}").contains("unable to parse value"), "{err:?}");
    }

    #[test]
    fn test_dry_run_asks_host_for_existing_vmid() {
        let (td, qm) = stub_qm();
        let mut dry = DryRun::with_host(qm);
        assert!(dry.exists(100).unwrap());
        assert!(!dry.exists(102).unwrap());
        dry.create(102, &[]).unwrap();
        dry.import_disk(102, Utf8Path::new("/w/a.vmdk"), "local-lvm").unwrap();
        // Only the existence checks reached the host
        assert_eq!(logged_argv(&td), ["status 100", "status 102"]);
    }
}
