use color_eyre::eyre::{eyre, Context};
use color_eyre::Result;

/// Lowest VMID Proxmox hands out; 0-99 are reserved.
pub(crate) const MIN_VMID: u32 = 100;
pub(crate) const MAX_VMID: u32 = 999_999_999;

/// Smallest memory size `qm create` accepts, in MiB.
pub(crate) const MIN_MEMORY_MB: u32 = 16;

/// Convert a unit string to bytes multiplier
fn unit_to_bytes(unit: &str) -> Option<u128> {
    match unit {
        "B" | "bytes" => Some(1),
        "k" | "K" | "KiB" => Some(1024),
        "M" | "MiB" => Some(1024u128.pow(2)),
        "G" | "GiB" => Some(1024u128.pow(3)),
        "T" | "TiB" => Some(1024u128.pow(4)),
        _ => None,
    }
}

/// Parse a memory string (like "2G", "1024M", "512") to megabytes
pub(crate) fn parse_memory_to_mb(memory_str: &str) -> Result<u32> {
    let memory_str = memory_str.trim();

    if memory_str.is_empty() {
        return Err(eyre!("Memory string cannot be empty"));
    }

    // Try to strip unit suffix, checking case-insensitively
    let (number_str, unit) = if let Some(num) = memory_str
        .strip_suffix('G')
        .or_else(|| memory_str.strip_suffix('g'))
    {
        (num, "GiB")
    } else if let Some(num) = memory_str
        .strip_suffix('M')
        .or_else(|| memory_str.strip_suffix('m'))
    {
        (num, "MiB")
    } else if let Some(num) = memory_str
        .strip_suffix('K')
        .or_else(|| memory_str.strip_suffix('k'))
    {
        (num, "KiB")
    } else {
        // No suffix, assume megabytes
        (memory_str, "MiB")
    };

    let number: f64 = number_str
        .parse()
        .with_context(|| format!("Invalid number in memory specification: {memory_str}"))?;
    if !number.is_finite() || number < 0.0 {
        return Err(eyre!("Invalid memory size: {memory_str}"));
    }

    let bytes_per_unit =
        unit_to_bytes(unit).ok_or_else(|| eyre!("Unknown unit: {}", unit))? as f64;

    let mib = 1024.0 * 1024.0;
    let total_mb = (number * bytes_per_unit) / mib;

    if total_mb < MIN_MEMORY_MB as f64 {
        return Err(eyre!(
            "Memory size {memory_str} is below the minimum of {MIN_MEMORY_MB} MiB"
        ));
    }
    if total_mb > u32::MAX as f64 {
        return Err(eyre!("Memory size {memory_str} is too large"));
    }

    Ok(total_mb as u32)
}

/// Validate a Proxmox VMID
pub(crate) fn validate_vmid(vmid: u32) -> Result<()> {
    if !(MIN_VMID..=MAX_VMID).contains(&vmid) {
        return Err(eyre!(
            "Invalid VMID {vmid}: must be between {MIN_VMID} and {MAX_VMID}"
        ));
    }
    Ok(())
}

/// Validate a VM name; Proxmox requires a DNS name.
pub(crate) fn validate_vm_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(eyre!("VM name cannot be empty"));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '.'))
    {
        return Err(eyre!(
            "Invalid VM name '{name}': character '{c}' is not allowed (use letters, digits, '-' and '.')"
        ));
    }
    for label in name.split('.') {
        if label.is_empty() || label.starts_with('-') || label.ends_with('-') {
            return Err(eyre!(
                "Invalid VM name '{name}': each dot-separated part must be non-empty and not start or end with '-'"
            ));
        }
    }
    Ok(())
}

/// Format a byte count for humans (e.g. "20 GiB")
pub(crate) fn human_size(bytes: u64) -> String {
    indicatif::BinaryBytes(bytes).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_memory_to_mb() {
        assert_eq!(parse_memory_to_mb("2048").unwrap(), 2048);
        assert_eq!(parse_memory_to_mb("4G").unwrap(), 4096);
        assert_eq!(parse_memory_to_mb("4g").unwrap(), 4096);
        assert_eq!(parse_memory_to_mb("512M").unwrap(), 512);
        assert_eq!(parse_memory_to_mb("1.5G").unwrap(), 1536);
        assert_eq!(parse_memory_to_mb("65536K").unwrap(), 64);
    }

    #[test]
    fn test_parse_memory_invalid() {
        assert!(parse_memory_to_mb("").is_err());
        assert!(parse_memory_to_mb("lots").is_err());
        assert!(parse_memory_to_mb("-1G").is_err());
        let err = parse_memory_to_mb("8").unwrap_err();
        assert!(err.to_string().contains("minimum"), "{err}");
    }

    #[test]
    fn test_validate_vmid() {
        assert!(validate_vmid(100).is_ok());
        assert!(validate_vmid(MAX_VMID).is_ok());
        assert!(validate_vmid(99).is_err());
        assert!(validate_vmid(0).is_err());
        assert!(validate_vmid(MAX_VMID + 1).is_err());
    }

    #[test]
    fn test_validate_vm_name() {
        for ok in ["web01", "web-01", "app.example.com", "A1"] {
            assert!(validate_vm_name(ok).is_ok(), "{ok}");
        }
        for bad in ["", "-web", "web-", "web_01", "my vm", "a..b", ".a", "a."] {
            assert!(validate_vm_name(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(20 * 1024 * 1024 * 1024), "20.00 GiB");
    }
}
