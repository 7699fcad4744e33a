//! Block device inspection.
//!
//! Wraps `lsblk --json` and exposes one structured record per device or
//! partition. Records are rebuilt fresh on every query and never cached;
//! the kernel's view of the block layer is the only source of truth.

use std::process::Command;

use anyhow::Result;
use bootprep_utils::CommandRunExt;
use fn_error_context::context;
use serde::Deserialize;

mod classify;
pub mod partition_types;
mod resolve;

pub use classify::{is_esp, is_linux_root, ListFilter};
pub use resolve::{drive_of, resolve_esp, resolve_esp_in};

/// The fields we ask lsblk for, in order.
const LSBLK_FIELDS: &str = "NAME,TYPE,SIZE,FSTYPE,PARTTYPE,UUID,LABEL,MODEL,RM,ROTA,MOUNTPOINTS";

/// Errors for device lookup, classification and ESP resolution.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DeviceError {
    /// An empty device argument was supplied.
    #[error("no device specified")]
    NoDevice,
    /// The named device does not exist.
    #[error("no such device: {0}")]
    NoSuchDevice(String),
    /// The path exists but is not a disk or partition.
    #[error("not a block device: {0}")]
    NotABlockDevice(String),
    /// The partition's type identifier is not an ESP identifier.
    #[error("{0} is not an EFI system partition")]
    NotEsp(String),
    /// No ESP-typed partition exists on the scanned drive.
    #[error("no EFI system partition found on {0}")]
    NoEspFound(String),
    /// The partition does not carry a recognized Linux root filesystem.
    #[error("{0} does not contain a recognized Linux root filesystem")]
    NotLinuxRoot(String),
}

/// A tri-state device flag (removable, rotational).
///
/// `Unknown` covers sysfs values that are neither clearly set nor clearly
/// unset; some USB enclosures report such values, and they must not be
/// silently folded into `No`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flag {
    /// The flag is set.
    Yes,
    /// The flag is unset.
    No,
    /// The underlying value was absent or ambiguous.
    #[default]
    Unknown,
}

impl Flag {
    fn from_value(v: &serde_json::Value) -> Flag {
        use serde_json::Value;
        match v {
            Value::Bool(true) => Flag::Yes,
            Value::Bool(false) => Flag::No,
            Value::Number(n) => match n.as_u64() {
                Some(1) => Flag::Yes,
                Some(0) => Flag::No,
                _ => Flag::Unknown,
            },
            Value::String(s) => match s.trim() {
                "1" | "true" => Flag::Yes,
                "0" | "false" => Flag::No,
                _ => Flag::Unknown,
            },
            _ => Flag::Unknown,
        }
    }
}

impl std::fmt::Display for Flag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Flag::Yes => "yes",
            Flag::No => "no",
            Flag::Unknown => "?",
        };
        f.write_str(s)
    }
}

fn deserialize_flag<'de, D>(deserializer: D) -> Result<Flag, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let v = serde_json::Value::deserialize(deserializer)?;
    Ok(Flag::from_value(&v))
}

// lsblk emits SIZE as a JSON number with --bytes on current util-linux,
// but as a string on older releases. Normalize to 512-byte sectors.
fn deserialize_sectors<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde_json::Value;
    let v = Value::deserialize(deserializer)?;
    let bytes = match &v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    Ok(bytes.map(|b| b / 512))
}

/// One device or partition as reported by the inspector.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Device {
    /// Leaf device name (e.g. `sda2`), unique within one snapshot.
    pub name: String,
    /// Device type as reported by lsblk: `disk`, `part`, `rom`, ...
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Device size in 512-byte sectors, when known.
    #[serde(rename = "size", default, deserialize_with = "deserialize_sectors")]
    pub size_sectors: Option<u64>,
    /// Filesystem type; `None` when unformatted or unknown.
    pub fstype: Option<String>,
    /// Partition type identifier: a legacy `0x..` code or a GPT type GUID.
    pub parttype: Option<String>,
    /// Filesystem UUID.
    pub uuid: Option<String>,
    /// Filesystem label.
    pub label: Option<String>,
    /// Hardware model string (drives only).
    pub model: Option<String>,
    /// Removable-media flag.
    #[serde(rename = "rm", default, deserialize_with = "deserialize_flag")]
    pub removable: Flag,
    /// Rotational (spinning media) flag.
    #[serde(rename = "rota", default, deserialize_with = "deserialize_flag")]
    pub rotational: Flag,
    /// Current mount targets, in mount-table order. lsblk emits `null`
    /// placeholders for unmounted filesystems.
    #[serde(default)]
    pub mountpoints: Vec<Option<String>>,
    /// Partitions of a disk, in inspector listing order.
    #[serde(default)]
    pub children: Vec<Device>,
}

impl Device {
    /// Whether this record is a whole drive.
    pub fn is_disk(&self) -> bool {
        self.kind == "disk"
    }

    /// Whether this record is a partition.
    pub fn is_partition(&self) -> bool {
        self.kind == "part"
    }

    /// Filesystem type, empty when unknown.
    pub fn fstype(&self) -> &str {
        self.fstype.as_deref().unwrap_or("")
    }

    /// Partition type identifier, normalized to lowercase. An empty
    /// string means "no partition table / undetermined", which is a
    /// valid state distinct from any known code.
    pub fn parttype(&self) -> String {
        self.parttype.as_deref().unwrap_or("").to_ascii_lowercase()
    }

    /// Filesystem UUID, empty when unknown.
    pub fn uuid(&self) -> &str {
        self.uuid.as_deref().unwrap_or("")
    }

    /// Filesystem label, empty when unset.
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or("")
    }

    /// Device size in 512-byte sectors, zero when unknown.
    pub fn size_sectors(&self) -> u64 {
        self.size_sectors.unwrap_or(0)
    }

    /// Device size in whole MiB.
    pub fn size_mib(&self) -> u64 {
        self.size_sectors() / 2048
    }

    /// Current mount targets, skipping lsblk's `null` placeholders.
    pub fn mountpoints(&self) -> impl Iterator<Item = &str> {
        self.mountpoints.iter().filter_map(|m| m.as_deref())
    }

    /// Child partitions, in inspector listing order.
    pub fn partitions(&self) -> impl Iterator<Item = &Device> {
        self.children.iter().filter(|c| c.is_partition())
    }

    /// The `/dev` node path for this device.
    pub fn node(&self) -> String {
        format!("/dev/{}", self.name)
    }
}

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    blockdevices: Vec<Device>,
}

fn lsblk_command() -> Command {
    let mut cmd = Command::new("lsblk");
    cmd.args(["--json", "--bytes", "--output", LSBLK_FIELDS]);
    cmd
}

/// Query all block devices, optionally restricted to one major number.
#[context("Listing block devices")]
pub fn list(major: Option<u32>) -> Result<Vec<Device>> {
    let mut cmd = lsblk_command();
    if let Some(major) = major {
        cmd.arg("--include").arg(major.to_string());
    }
    let out: LsblkOutput = cmd.log_debug().run_and_parse_json()?;
    Ok(out.blockdevices)
}

/// Map a leaf name or node path to a `/dev` node path.
pub fn devpath(dev: &str) -> String {
    if dev.starts_with('/') {
        dev.to_string()
    } else {
        format!("/dev/{dev}")
    }
}

/// Strip a `/dev/` prefix, leaving the leaf name.
pub fn leaf_name(dev: &str) -> &str {
    dev.strip_prefix("/dev/").unwrap_or(dev)
}

/// Find a device or partition by leaf name in a device snapshot.
pub fn find_by_name<'a>(devices: &'a [Device], name: &str) -> Option<&'a Device> {
    for d in devices {
        if d.name == name {
            return Some(d);
        }
        if let Some(c) = find_by_name(&d.children, name) {
            return Some(c);
        }
    }
    None
}

/// Look up a device by name or node path, requiring it to exist as a
/// block device.
pub fn lookup<'a>(devices: &'a [Device], input: &str) -> Result<&'a Device, DeviceError> {
    let name = leaf_name(input);
    if name.is_empty() {
        return Err(DeviceError::NoDevice);
    }
    match find_by_name(devices, name) {
        Some(d) => Ok(d),
        None => {
            // Present on disk but unknown to the inspector: a node that
            // is not a block device (or has vanished mid-run).
            if std::path::Path::new(&devpath(name)).exists() {
                Err(DeviceError::NotABlockDevice(name.to_string()))
            } else {
                Err(DeviceError::NoSuchDevice(name.to_string()))
            }
        }
    }
}
