//! Partition classification.

use crate::partition_types as pt;
use crate::{Device, Flag};

/// Whether this partition carries an EFI System Partition type identifier.
pub fn is_esp(device: &Device) -> bool {
    pt::ESP_IDS.contains(&device.parttype().as_str())
}

/// Whether this partition qualifies as a Linux root candidate.
///
/// Two gates combined with AND: the partition type identifier must be
/// Linux-eligible or pass-through (no identifier, or the generic basic-data
/// GUID), and the filesystem type must be an accepted root filesystem.
pub fn is_linux_root(device: &Device) -> bool {
    let parttype = device.parttype();
    let parttype = parttype.as_str();
    let type_ok =
        pt::LINUX_ROOT_IDS.contains(&parttype) || pt::PASSTHROUGH_IDS.contains(&parttype);
    let fs_ok = pt::ROOT_FILESYSTEMS.contains(&device.fstype());
    type_ok && fs_ok
}

/// Listing filter criteria. A zeroed filter admits every partition.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    /// Only admit partitions strictly larger than this many MiB.
    pub min_size_mib: u64,
    /// Exclude the partition carrying this filesystem UUID (typically the
    /// live boot medium).
    pub exclude_uuid: Option<String>,
    /// Only admit swap partitions.
    pub swap_only: bool,
    /// Exclude swap partitions.
    pub no_swap: bool,
    /// Exclude EFI and reserved partition types.
    pub no_efi: bool,
    /// Exclude removable devices.
    pub no_removable: bool,
}

impl ListFilter {
    /// Whether a partition passes the listing filter.
    pub fn admits(&self, device: &Device) -> bool {
        if !device.is_partition() {
            return false;
        }
        let parttype = device.parttype();
        let parttype = parttype.as_str();
        if pt::BOOT_RECORD_IDS.contains(&parttype) {
            return false;
        }
        // An empty identifier is never excluded by type alone.
        if self.no_efi && pt::EFI_RESERVED_IDS.contains(&parttype) {
            return false;
        }
        if device.fstype() == "iso9660" {
            return false;
        }
        if self.swap_only && device.fstype() != "swap" {
            return false;
        }
        if self.no_swap && device.fstype() == "swap" {
            return false;
        }
        if let Some(uuid) = self.exclude_uuid.as_deref() {
            if !uuid.is_empty() && device.uuid() == uuid {
                return false;
            }
        }
        if self.no_removable && device.removable == Flag::Yes {
            return false;
        }
        device.size_mib() > self.min_size_mib
    }

    /// Whether a whole drive passes the listing filter.
    pub fn admits_drive(&self, device: &Device) -> bool {
        if !device.is_disk() {
            return false;
        }
        if self.no_removable && device.removable == Flag::Yes {
            return false;
        }
        device.size_mib() > self.min_size_mib
    }
}
