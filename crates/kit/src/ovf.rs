//! Keyword detection over an OVF descriptor.
//!
//! OVF files written by VMware, VirtualBox and friends disagree on how they
//! spell firmware and controller details, so rather than modelling the XML
//! this does case-insensitive substring matching and only reports what it
//! is reasonably sure about. Anything undetected is left as `None` for the
//! caller to default.

use camino::Utf8Path;
use color_eyre::eyre::Context;
use color_eyre::Result;
use tracing::debug;

use crate::hardware::{DiskBus, Firmware, OsType, ScsiController};

/// Settings inferred from a descriptor; `None` means no keyword matched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OvfHints {
    pub firmware: Option<Firmware>,
    pub bus: Option<DiskBus>,
    pub controller: Option<ScsiController>,
    pub ostype: Option<OsType>,
}

const LINUX_KEYWORDS: &[&str] = &[
    "linux", "ubuntu", "debian", "centos", "rhel", "fedora", "suse", "other3x",
];

impl OvfHints {
    pub fn from_file(path: &Utf8Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Reading OVF descriptor {path}"))?;
        let hints = Self::detect(&text);
        debug!("Descriptor hints for {path}: {hints:?}");
        Ok(hints)
    }

    pub fn detect(descriptor: &str) -> Self {
        let text = descriptor.to_ascii_lowercase();
        Self {
            firmware: detect_firmware(&text),
            bus: detect_bus(&text),
            controller: detect_controller(&text),
            ostype: detect_ostype(&text),
        }
    }
}

fn detect_firmware(text: &str) -> Option<Firmware> {
    let lines: Vec<&str> = text.lines().filter(|l| l.contains("firmware")).collect();
    if lines.iter().any(|l| l.contains("efi")) {
        Some(Firmware::Uefi)
    } else if lines.iter().any(|l| l.contains("bios")) {
        Some(Firmware::Bios)
    } else {
        None
    }
}

fn has_word(text: &str, word: &str) -> bool {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .any(|w| w == word)
}

fn detect_bus(text: &str) -> Option<DiskBus> {
    if text.contains("sata") || text.contains("ahci") {
        Some(DiskBus::Sata)
    } else if text.contains("scsi") || text.contains("lsilogic") || text.contains("buslogic") {
        Some(DiskBus::Scsi)
    } else if text.contains("piix") || has_word(text, "ide") {
        Some(DiskBus::Ide)
    } else {
        None
    }
}

fn detect_controller(text: &str) -> Option<ScsiController> {
    if text.contains("pvscsi") {
        Some(ScsiController::Pvscsi)
    } else if text.contains("lsilogic") || text.contains("buslogic") {
        Some(ScsiController::Lsi)
    } else {
        None
    }
}

fn detect_ostype(text: &str) -> Option<OsType> {
    // Prefer the dedicated section; its description often names the product
    let section = text
        .find("<operatingsystemsection")
        .map(|start| {
            let rest = &text[start..];
            let end = rest
                .find("</operatingsystemsection>")
                .unwrap_or(rest.len());
            rest[..end].to_owned()
        })
        .unwrap_or_else(|| {
            text.lines()
                .filter(|l| l.contains("ostype"))
                .collect::<Vec<_>>()
                .join("\n")
        });
    if section.contains("windows") {
        Some(OsType::Win10)
    } else if LINUX_KEYWORDS.iter().any(|k| section.contains(k)) {
        Some(OsType::L26)
    } else {
        None
    }
}
