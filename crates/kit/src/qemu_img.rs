//! Disk image probing via `qemu-img info`.

use std::cmp::Reverse;
use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::Context;
use color_eyre::Result;
use serde::Deserialize;
use tracing::debug;

use crate::command_run::CommandRun;
use crate::utils::human_size;

/// Subset of `qemu-img info --output=json`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct QemuImgInfo {
    pub virtual_size: u64,
    pub format: String,
    #[serde(default)]
    pub actual_size: Option<u64>,
}

/// A disk image found in the archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskImage {
    pub path: Utf8PathBuf,
    pub virtual_size: u64,
    pub format: String,
}

impl DiskImage {
    pub fn file_name(&self) -> &str {
        self.path.file_name().unwrap_or(self.path.as_str())
    }
}

pub fn info(path: &Utf8Path) -> Result<QemuImgInfo> {
    Command::new("qemu-img")
        .args(["info", "--output=json"])
        .arg(path)
        .run_and_parse_json()
        .with_context(|| format!("Inspecting disk image {path}"))
}

/// Order disks so the largest, which is taken to be the system disk, comes
/// first. Ties go by file name so repeated runs attach disks identically.
pub fn sort_disks(disks: &mut [DiskImage]) {
    disks.sort_by(|a, b| {
        Reverse(a.virtual_size)
            .cmp(&Reverse(b.virtual_size))
            .then_with(|| a.file_name().cmp(b.file_name()))
    });
}

/// Probe every disk and return them in attachment order.
pub fn probe_all(paths: &[Utf8PathBuf]) -> Result<Vec<DiskImage>> {
    let mut disks = paths
        .iter()
        .map(|path| {
            let info = info(path)?;
            debug!(
                "{path}: format={} virtual-size={} actual-size={:?}",
                info.format,
                human_size(info.virtual_size),
                info.actual_size
            );
            Ok(DiskImage {
                path: path.clone(),
                virtual_size: info.virtual_size,
                format: info.format,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    sort_disks(&mut disks);
    Ok(disks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disk(name: &str, size: u64) -> DiskImage {
        DiskImage {
            path: Utf8PathBuf::from("/work").join(name),
            virtual_size: size,
            format: "vmdk".into(),
        }
    }

    #[test]
    fn test_parse_info_json() {
        let json = r#"{
            "virtual-size": 21474836480,
            "filename": "appliance-disk1.vmdk",
            "cluster-size": 65536,
            "format": "vmdk",
            "actual-size": 1394761728,
            "dirty-flag": false
        }"#;
        let info: QemuImgInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.virtual_size, 21474836480);
        assert_eq!(info.format, "vmdk");
        assert_eq!(info.actual_size, Some(1394761728));

        let info: QemuImgInfo =
            serde_json::from_str(r#"{"virtual-size": 1, "format": "raw"}"#).unwrap();
        assert_eq!(info.actual_size, None);
    }

    #[test]
    fn test_sort_largest_first() {
        let mut disks = vec![disk("data.vmdk", 10), disk("os.vmdk", 40), disk("logs.vmdk", 20)];
        sort_disks(&mut disks);
        let names: Vec<_> = disks.iter().map(|d| d.file_name()).collect();
        assert_eq!(names, ["os.vmdk", "logs.vmdk", "data.vmdk"]);
    }

    #[test]
    fn test_sort_tie_break_by_name() {
        let mut disks = vec![disk("disk3.vmdk", 8), disk("disk1.vmdk", 8), disk("disk2.vmdk", 8)];
        sort_disks(&mut disks);
        let names: Vec<_> = disks.iter().map(|d| d.file_name()).collect();
        assert_eq!(names, ["disk1.vmdk", "disk2.vmdk", "disk3.vmdk"]);
    }
}
