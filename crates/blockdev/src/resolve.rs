//! Drive and ESP resolution.

use anyhow::Result;
use fn_error_context::context;

use crate::{classify, leaf_name, lookup, Device, DeviceError};

// Controllers whose device nodes end in a digit; their partitions carry
// an explicit `p<N>` suffix (mmcblk0p3, nvme0n1p1, md0p1, loop0p1).
const P_SUFFIX_FAMILIES: &[&str] = &["mmcblk", "nvme", "md", "loop"];

/// Map a partition (or drive) leaf name to its owning drive's name.
///
/// `p<N>` suffixes after a digit are stripped (`mmcblk0p3` -> `mmcblk0`,
/// `nvme0n1p1` -> `nvme0n1`); other names lose up to two trailing
/// partition digits (`sda1`, `sda12` -> `sda`). Idempotent on bare drive
/// names.
pub fn drive_of(name: &str) -> Result<String, DeviceError> {
    if name.is_empty() {
        return Err(DeviceError::NoDevice);
    }
    if let Some(stem) = strip_p_suffix(name) {
        return Ok(stem.to_string());
    }
    // Bare controller-prefixed drive names end in namespace digits that
    // must not be mistaken for a partition number.
    if P_SUFFIX_FAMILIES.iter().any(|f| name.starts_with(f)) {
        return Ok(name.to_string());
    }
    let stem_len = name.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    if stem_len == 0 {
        return Ok(name.to_string());
    }
    let strip = (name.len() - stem_len).min(2);
    Ok(name[..name.len() - strip].to_string())
}

fn strip_p_suffix(name: &str) -> Option<&str> {
    let stem_len = name.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    if stem_len == name.len() || stem_len == 0 {
        return None;
    }
    let stem = &name[..stem_len];
    let drive = stem.strip_suffix('p')?;
    // only a partition marker when it follows the controller digits
    drive
        .ends_with(|c: char| c.is_ascii_digit())
        .then_some(drive)
}

/// Resolve an ESP within a device snapshot.
///
/// When `input` names a partition it is validated directly; when it names
/// a drive, the drive's partitions are scanned in inspector order and the
/// first ESP-typed one wins.
pub fn resolve_esp_in<'a>(devices: &'a [Device], input: &str) -> Result<&'a Device, DeviceError> {
    let name = leaf_name(input);
    let device = lookup(devices, input)?;
    if drive_of(name)? == name {
        if !device.is_disk() {
            return Err(DeviceError::NotABlockDevice(name.to_string()));
        }
        device
            .partitions()
            .find(|p| classify::is_esp(p))
            .ok_or_else(|| DeviceError::NoEspFound(name.to_string()))
    } else {
        if !device.is_partition() {
            return Err(DeviceError::NotABlockDevice(name.to_string()));
        }
        if classify::is_esp(device) {
            Ok(device)
        } else {
            Err(DeviceError::NotEsp(name.to_string()))
        }
    }
}

/// Query the inspector and resolve an ESP from a partition or drive name.
#[context("Resolving EFI system partition for {input}")]
pub fn resolve_esp(input: &str) -> Result<Device> {
    let devices = crate::list(None)?;
    let esp = resolve_esp_in(&devices, input)?;
    Ok(esp.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition_types as pt;

    #[test]
    fn test_drive_of() {
        assert_eq!(drive_of("sda1").unwrap(), "sda");
        assert_eq!(drive_of("sda12").unwrap(), "sda");
        assert_eq!(drive_of("vdb3").unwrap(), "vdb");
        assert_eq!(drive_of("mmcblk0p3").unwrap(), "mmcblk0");
        assert_eq!(drive_of("nvme0n1p1").unwrap(), "nvme0n1");
        assert_eq!(drive_of("nvme0n1p12").unwrap(), "nvme0n1");
        assert_eq!(drive_of("md0p1").unwrap(), "md0");
        assert_eq!(drive_of(""), Err(DeviceError::NoDevice));
    }

    #[test]
    fn test_drive_of_idempotent() {
        for name in ["sda", "vdb", "mmcblk0", "nvme0n1", "md127"] {
            let once = drive_of(name).unwrap();
            assert_eq!(once, name);
            assert_eq!(drive_of(&once).unwrap(), once);
        }
        let once = drive_of("sda12").unwrap();
        assert_eq!(drive_of(&once).unwrap(), once);
    }

    fn drive(name: &str, children: Vec<Device>) -> Device {
        Device {
            name: name.into(),
            kind: "disk".into(),
            children,
            ..Default::default()
        }
    }

    fn part(name: &str, parttype: &str) -> Device {
        Device {
            name: name.into(),
            kind: "part".into(),
            parttype: Some(parttype.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve_esp_on_drive() {
        let devices = vec![drive(
            "sda",
            vec![part("sda1", pt::LINUX_DATA_MBR), part("sda2", pt::ESP_MBR)],
        )];
        let esp = resolve_esp_in(&devices, "sda").unwrap();
        assert_eq!(esp.name, "sda2");
        // first match in inspector order wins
        let devices = vec![drive(
            "sda",
            vec![part("sda1", pt::ESP), part("sda2", pt::ESP_MBR)],
        )];
        assert_eq!(resolve_esp_in(&devices, "sda").unwrap().name, "sda1");
    }

    #[test]
    fn test_resolve_esp_explicit_partition() {
        let devices = vec![drive(
            "sda",
            vec![part("sda1", pt::ESP), part("sda2", pt::LINUX_DATA)],
        )];
        assert_eq!(resolve_esp_in(&devices, "sda1").unwrap().name, "sda1");
        assert_eq!(resolve_esp_in(&devices, "/dev/sda1").unwrap().name, "sda1");
        assert_eq!(
            resolve_esp_in(&devices, "sda2"),
            Err(DeviceError::NotEsp("sda2".into()))
        );
    }

    #[test]
    fn test_resolve_esp_errors() {
        let devices = vec![drive("sda", vec![part("sda1", pt::LINUX_DATA_MBR)])];
        assert_eq!(
            resolve_esp_in(&devices, "sda"),
            Err(DeviceError::NoEspFound("sda".into()))
        );
        assert_eq!(
            resolve_esp_in(&devices, "sdq1"),
            Err(DeviceError::NoSuchDevice("sdq1".into()))
        );
        assert_eq!(resolve_esp_in(&devices, ""), Err(DeviceError::NoDevice));
    }
}
