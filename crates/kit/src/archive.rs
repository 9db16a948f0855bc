//! OVA extraction into a scoped work directory.
//!
//! An OVA is a plain tar file holding the OVF descriptor, an optional
//! manifest and one or more disk images. Extraction is delegated to `tar`.

use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::{eyre, Context};
use color_eyre::Result;
use tempfile::TempDir;
use tracing::{debug, info};

use crate::command_run::CommandRun;

const WORKDIR_PREFIX: &str = "ova-import-";

/// File extensions recognised as disk images inside an OVA
pub const DISK_EXTENSIONS: &[&str] = &["vmdk", "qcow2", "vhd", "vhdx", "img", "raw"];

/// Temporary extraction directory, removed on drop unless kept
#[derive(Debug)]
pub struct Workdir {
    dir: Option<TempDir>,
    path: Utf8PathBuf,
    keep: bool,
}

impl Workdir {
    /// Create a fresh directory under `parent` (the system temp dir if `None`).
    pub fn new(parent: Option<&Utf8Path>, keep: bool) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(WORKDIR_PREFIX);
        let dir = match parent {
            Some(p) => builder
                .tempdir_in(p)
                .with_context(|| format!("Creating work directory in {p}"))?,
            None => builder.tempdir().context("Creating work directory")?,
        };
        let path = Utf8PathBuf::try_from(dir.path().to_path_buf())
            .context("Work directory path is not UTF-8")?;
        debug!("Using work directory {path}");
        Ok(Self {
            dir: Some(dir),
            path,
            keep,
        })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn kept(&self) -> bool {
        self.keep
    }
}

impl Drop for Workdir {
    fn drop(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        if self.keep {
            let path = dir.keep();
            info!("Keeping work directory {}", path.display());
        } else if let Err(e) = dir.close() {
            tracing::warn!("Failed to remove work directory {}: {e}", self.path);
        }
    }
}

/// Unpack `ova` into `dest` with `tar`.
pub fn extract(ova: &Utf8Path, dest: &Utf8Path) -> Result<()> {
    info!("Extracting {ova}");
    Command::new("tar")
        .arg("-xf")
        .arg(ova)
        .arg("-C")
        .arg(dest)
        .arg("--no-same-owner")
        .run()
        .with_context(|| format!("Extracting OVA {ova}"))
}

fn has_extension(path: &Utf8Path, candidates: &[&str]) -> bool {
    path.extension()
        .is_some_and(|ext| candidates.iter().any(|c| ext.eq_ignore_ascii_case(c)))
}

/// Regular files directly in `dir`, sorted by name.
fn sorted_files(dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>> {
    let mut files = Vec::new();
    for entry in dir
        .read_dir_utf8()
        .with_context(|| format!("Reading {dir}"))?
    {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

/// The OVF descriptor in an extracted OVA, if there is one.
pub fn find_descriptor(dir: &Utf8Path) -> Result<Option<Utf8PathBuf>> {
    Ok(sorted_files(dir)?
        .into_iter()
        .find(|p| has_extension(p, &["ovf"])))
}

/// All disk images in an extracted OVA; fails if there are none.
pub fn find_disks(dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>> {
    let disks: Vec<_> = sorted_files(dir)?
        .into_iter()
        .filter(|p| has_extension(p, DISK_EXTENSIONS))
        .collect();
    if disks.is_empty() {
        return Err(eyre!(
            "No disk images found in archive (looked for: {})",
            DISK_EXTENSIONS.join(", ")
        ));
    }
    debug!("Found disks: {disks:?}");
    Ok(disks)
}
