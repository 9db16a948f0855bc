//! Integration tests for ova-import
//!
//! These run the built binary. Disk probing is served by a stub `qemu-img`
//! placed first on `PATH`, and `qm` is never invoked: every import runs
//! with `--dry-run`.

use std::os::unix::fs::PermissionsExt;
use std::process::Output;

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::{eyre, Context};
use color_eyre::Result;
use libtest_mimic::{Arguments, Trial};
use xshell::{cmd, Shell};

/// Get the path to the ova-import binary, checking OVA_IMPORT_PATH first
pub(crate) fn get_binary() -> Result<String> {
    if let Ok(path) = std::env::var("OVA_IMPORT_PATH") {
        return Ok(path);
    }
    // Force the user to set this if we're running from the project dir
    if let Some(path) = ["target/debug/ova-import", "target/release/ova-import"]
        .into_iter()
        .find(|p| Utf8Path::new(p).exists())
    {
        return Err(eyre!(
            "Detected {path} - set OVA_IMPORT_PATH={path} to run using this binary"
        ));
    }
    Ok("ova-import".to_owned())
}

/// Captured output from a command with decoded stdout/stderr strings
pub(crate) struct CapturedOutput {
    pub output: Output,
    pub stdout: String,
    pub stderr: String,
}

impl CapturedOutput {
    pub fn new(output: Output) -> Self {
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        Self {
            output,
            stdout,
            stderr,
        }
    }

    pub fn assert_success(&self, context: &str) {
        assert!(
            self.output.status.success(),
            "{} failed: {}",
            context,
            self.stderr
        );
    }

    pub fn assert_failure(&self, context: &str) {
        assert!(
            !self.output.status.success(),
            "{} unexpectedly succeeded: {}",
            context,
            self.stdout
        );
    }
}

/// Run ova-import with `path_prefix` prepended to PATH, capturing output
fn run_import(args: &[&str], path_prefix: Option<&Utf8Path>) -> Result<CapturedOutput> {
    let bin = get_binary()?;
    let mut cmd = std::process::Command::new(bin);
    cmd.args(args);
    if let Some(prefix) = path_prefix {
        let path = std::env::var("PATH").unwrap_or_default();
        cmd.env("PATH", format!("{prefix}:{path}"));
    }
    let output = cmd.output().context("Running ova-import")?;
    Ok(CapturedOutput::new(output))
}

const STUB_QEMU_IMG: &str = r#"#!/bin/sh
# qemu-img info --output=json <path>: report the file length as virtual size
case "$1" in
  info) size=$(wc -c < "$3"); printf '{"virtual-size": %d, "format": "vmdk"}\n' "$size" ;;
  *) exit 0 ;;
esac
"#;

const OVF: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Envelope xmlns="http://schemas.dmtf.org/ovf/envelope/1">
  <VirtualSystem ovf:id="appliance">
    <OperatingSystemSection ovf:id="101" vmw:osType="debian11_64Guest"/>
    <VirtualHardwareSection>
      <Item><rasd:ResourceSubType>lsilogic</rasd:ResourceSubType></Item>
      <vmw:Config ovf:required="false" vmw:key="firmware" vmw:value="efi"/>
    </VirtualHardwareSection>
  </VirtualSystem>
</Envelope>
"#;

/// The `qm` command lines a dry run printed, split back into arguments
fn qm_invocations(stdout: &str) -> Vec<Vec<String>> {
    stdout
        .lines()
        .filter(|l| l.starts_with("qm "))
        .map(|l| shlex::split(l).unwrap_or_else(|| panic!("unparseable line: {l}")))
        .collect()
}

/// Lay out a fixture directory with a stub qemu-img and a two-disk OVA
fn fixture(sh: &Shell) -> Result<(tempfile::TempDir, Utf8PathBuf)> {
    let td = tempfile::tempdir()?;
    let root = Utf8PathBuf::try_from(td.path().to_path_buf())?;

    let bin = root.join("bin");
    std::fs::create_dir(&bin)?;
    let stub = bin.join("qemu-img");
    std::fs::write(&stub, STUB_QEMU_IMG)?;
    std::fs::set_permissions(&stub, std::fs::Permissions::from_mode(0o755))?;

    let src = root.join("src");
    std::fs::create_dir(&src)?;
    std::fs::write(src.join("appliance.ovf"), OVF)?;
    std::fs::write(src.join("appliance-disk1.vmdk"), vec![0u8; 4096])?;
    std::fs::write(src.join("appliance-disk2.vmdk"), vec![0u8; 1024])?;
    std::fs::write(src.join("appliance.mf"), "SHA256(appliance.ovf)= 00\n")?;

    let ova = root.join("appliance.ova");
    cmd!(
        sh,
        "tar -cf {ova} -C {src} appliance.ovf appliance-disk2.vmdk appliance-disk1.vmdk appliance.mf"
    )
    .run()?;
    Ok((td, root))
}

fn test_help() -> Result<()> {
    let out = run_import(&["--help"], None)?;
    out.assert_success("ova-import --help");
    for flag in ["--vmid", "--name", "--storage", "--ova", "--rescue-iso", "--keep-temp"] {
        assert!(out.stdout.contains(flag), "help is missing {flag}");
    }
    Ok(())
}

fn test_missing_required_flags() -> Result<()> {
    let out = run_import(&["--vmid", "150", "--name", "x"], None)?;
    out.assert_failure("missing --storage/--ova");
    assert!(out.stderr.contains("--storage"), "{}", out.stderr);
    Ok(())
}

fn test_nonexistent_ova() -> Result<()> {
    let out = run_import(
        &[
            "--vmid", "150", "--name", "x", "--storage", "local-lvm", "--ova",
            "/nonexistent/appliance.ova", "--dry-run",
        ],
        None,
    )?;
    out.assert_failure("nonexistent OVA");
    assert!(out.stderr.contains("does not exist"), "{}", out.stderr);
    Ok(())
}

fn test_dry_run_import() -> Result<()> {
    let sh = Shell::new()?;
    let (_td, root) = fixture(&sh)?;
    let ova = root.join("appliance.ova");
    let work = root.join("work");
    std::fs::create_dir(&work)?;

    let out = run_import(
        &[
            "--vmid", "150", "--name", "appliance", "--storage", "local-lvm",
            "--ova", ova.as_str(), "--memory", "4G",
            "--rescue-iso", "local:iso/systemrescue.iso",
            "--workdir", work.as_str(), "--keep-temp", "--dry-run",
        ],
        Some(&root.join("bin")),
    )?;
    out.assert_success("dry-run import");

    let qm = qm_invocations(&out.stdout);
    assert_eq!(qm.len(), 7, "{}", out.stdout);
    let create = qm[0].join(" ");
    assert!(create.starts_with("qm create 150 --name appliance --memory 4096"), "{create}");
    assert!(create.contains("--scsihw lsi"), "{create}");
    assert!(create.contains("--bios ovmf --machine q35"), "{create}");
    assert!(create.contains("--ostype l26"), "{create}");
    assert!(create.contains("--net0 virtio,bridge=vmbr0"), "{create}");
    // Largest disk is imported first and becomes scsi0
    assert_eq!(qm[1][..3], ["qm", "importdisk", "150"]);
    assert!(qm[1][3].ends_with("/appliance-disk1.vmdk"), "{:?}", qm[1]);
    assert_eq!(qm[2], ["qm", "set", "150", "--scsi0", "local-lvm:vm-150-disk-0"]);
    assert!(qm[3][3].ends_with("/appliance-disk2.vmdk"), "{:?}", qm[3]);
    assert_eq!(qm[4], ["qm", "set", "150", "--scsi1", "local-lvm:vm-150-disk-1"]);
    assert_eq!(
        qm[5],
        ["qm", "set", "150", "--ide2", "local:iso/systemrescue.iso,media=cdrom"]
    );
    assert_eq!(qm[6], ["qm", "set", "150", "--boot", "order=ide2;scsi0"]);

    assert!(out.stdout.contains("Manual recovery steps"), "{}", out.stdout);
    assert!(
        out.stdout.contains("VM 150 (appliance) would be imported (dry run"),
        "{}",
        out.stdout
    );

    let kept: Vec<_> = work.read_dir_utf8()?.collect::<std::io::Result<_>>()?;
    assert_eq!(kept.len(), 1, "expected one kept work directory");
    assert!(kept[0].path().join("appliance-disk1.vmdk").exists());
    Ok(())
}

fn test_dry_run_cleans_workdir() -> Result<()> {
    let sh = Shell::new()?;
    let (_td, root) = fixture(&sh)?;
    let ova = root.join("appliance.ova");
    let work = root.join("work");
    std::fs::create_dir(&work)?;

    let out = run_import(
        &[
            "--vmid", "151", "--name", "appliance", "--storage", "local-lvm",
            "--ova", ova.as_str(), "--bios", "--disk-bus", "sata",
            "--workdir", work.as_str(), "--dry-run",
        ],
        Some(&root.join("bin")),
    )?;
    out.assert_success("dry-run import");
    assert!(!out.stdout.contains("ovmf"), "{}", out.stdout);
    let qm = qm_invocations(&out.stdout);
    assert!(qm.contains(&vec![
        "qm".to_owned(),
        "set".into(),
        "151".into(),
        "--sata0".into(),
        "local-lvm:vm-151-disk-0".into(),
    ]));
    assert_eq!(
        qm.last().unwrap(),
        &["qm", "set", "151", "--boot", "order=sata0"]
    );
    assert_eq!(work.read_dir_utf8()?.count(), 0, "work directory not removed");
    Ok(())
}

fn test_archive_without_disks() -> Result<()> {
    let sh = Shell::new()?;
    let (_td, root) = fixture(&sh)?;
    let ova = root.join("empty.ova");
    let src = root.join("src");
    cmd!(sh, "tar -cf {ova} -C {src} appliance.ovf").run()?;

    let out = run_import(
        &[
            "--vmid", "152", "--name", "empty", "--storage", "local-lvm",
            "--ova", ova.as_str(), "--dry-run",
        ],
        Some(&root.join("bin")),
    )?;
    out.assert_failure("OVA without disks");
    assert!(out.stderr.contains("No disk images found"), "{}", out.stderr);
    Ok(())
}

fn main() {
    let args = Arguments::from_args();

    let tests: Vec<(&'static str, fn() -> Result<()>)> = vec![
        ("test_help", test_help),
        ("test_missing_required_flags", test_missing_required_flags),
        ("test_nonexistent_ova", test_nonexistent_ova),
        ("test_dry_run_import", test_dry_run_import),
        ("test_dry_run_cleans_workdir", test_dry_run_cleans_workdir),
        ("test_archive_without_disks", test_archive_without_disks),
    ];
    let tests = tests
        .into_iter()
        .map(|(name, f)| Trial::test(name, move || f().map_err(|e| format!("{:?}", e).into())))
        .collect();

    libtest_mimic::run(&args, tests).exit();
}
