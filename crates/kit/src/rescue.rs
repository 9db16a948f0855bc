//! Manual recovery steps printed when a rescue ISO is attached.
//!
//! Appliances exported from VMware or VirtualBox frequently fail to find
//! their root disk on the first boot under KVM, because the guest lacks a
//! driver for the new bus or refers to disks by a device name that changed.
//! Fixing that requires a human with a shell in the guest; this only tells
//! them what to do.

use indoc::formatdoc;

use crate::hardware::OsType;
use crate::plan::{VmPlan, CDROM_DEVICE};

/// Build the recovery instructions for `plan`. Returns `None` if no rescue
/// ISO is attached.
pub fn instructions(plan: &VmPlan) -> Option<String> {
    let iso = plan.rescue_iso.as_deref()?;
    let vmid = plan.vmid;
    let bus = plan.bus;
    let disk = plan.boot_device();

    let heading = match plan.ostype {
        OsType::Other => "Linux or other guest",
        _ => "Linux guest",
    };
    // --start already booted it into the rescue system
    let console_step = if plan.start {
        format!("1. The VM is running; open its console (qm terminal {vmid}, or the web UI).")
    } else {
        formatdoc! {"
            1. Start the VM and open its console:
                 qm start {vmid}"
        }
    };
    let guest_steps = match plan.ostype {
        OsType::Win10 => formatdoc! {"
            3. Windows guest:
               - If it does not boot from {bus}, either load the VirtIO drivers
                 (virtio-win ISO) with DISM from the rescue shell, or switch the
                 system disk to SATA:
                   qm set {vmid} --delete {disk}
                   qm set {vmid} --sata0 <volume shown by qm config {vmid}>
               - Remove VMware Tools after the first successful boot."
        },
        OsType::L26 | OsType::Other => formatdoc! {"
            3. {heading}:
               - chroot into the mounted root filesystem, e.g.
                   mount /dev/sdX1 /mnt && for d in dev proc sys; do mount --rbind /$d /mnt/$d; done
                   chroot /mnt
               - Rebuild the initramfs with drivers for the {bus} bus
                 (dracut -f --regenerate-all, or update-initramfs -u -k all).
               - Replace /dev/sdX or /dev/hdX references in /etc/fstab and the
                 bootloader configuration with UUID= entries (see blkid)."
        },
    };

    Some(formatdoc! {"
        Rescue ISO {iso} is attached as {CDROM_DEVICE} and boots first.

        Manual recovery steps:
        {console_step}
        2. Boot the rescue system and mount the system disk ({disk}).
        {guest_steps}
        4. Shut down, then detach the ISO and boot from the system disk:
             qm set {vmid} --delete {CDROM_DEVICE} --boot order={disk}
    "})
}
