//! Partition type identifiers.
//!
//! Identifiers come in two forms: a legacy single-byte MBR code rendered
//! `0x..`, or a GPT type GUID. GPT values follow the UAPI Group's
//! Discoverable Partitions Specification.
//!
//! Reference: <https://uapi-group.org/specifications/specs/discoverable_partitions_specification/>

/// EFI System Partition (GPT)
pub const ESP: &str = "c12a7328-f81f-11d2-ba4b-00a0c93ec93b";

/// EFI System Partition (MBR)
pub const ESP_MBR: &str = "0xef";

/// Generic Linux filesystem data partition (GPT)
pub const LINUX_DATA: &str = "0fc63daf-8483-4772-8e79-3d69d8477de4";

/// Linux data partition (MBR)
pub const LINUX_DATA_MBR: &str = "0x83";

/// Swap partition (GPT)
pub const SWAP: &str = "0657fd6d-a4ab-43c4-84e5-0933c84b4f4f";

/// Linux swap partition (MBR)
pub const SWAP_MBR: &str = "0x82";

/// Home partition (/home)
pub const HOME: &str = "933ac7e1-2eb4-4f13-b844-0e14e2aef915";

/// Root partition for 32-bit x86
pub const ROOT_X86: &str = "44479540-f297-41b2-9af7-d131d5f0458a";

/// Root partition for 64-bit x86/AMD64
pub const ROOT_X86_64: &str = "4f68bce3-e8cd-4db1-96e7-fbcaf984b709";

/// Microsoft basic data partition
pub const BASIC_DATA: &str = "ebd0a0a2-b9e5-4433-87c0-68b6b72699c7";

/// Microsoft reserved partition
pub const MICROSOFT_RESERVED: &str = "e3c9e316-0b5c-4db8-817d-f92df00215ae";

/// Windows Recovery Environment (GPT)
pub const WINDOWS_RE: &str = "de94bba4-06d1-4d40-a16a-bfd50179d6ac";

/// Windows Recovery Environment (MBR)
pub const WINDOWS_RE_MBR: &str = "0x27";

/// FAT32 with LBA addressing (MBR)
pub const FAT32_LBA_MBR: &str = "0xc";

/// Identifiers naming an EFI System Partition.
pub const ESP_IDS: &[&str] = &[ESP_MBR, ESP];

/// Identifiers eligible to carry a Linux root filesystem.
pub const LINUX_ROOT_IDS: &[&str] = &[
    LINUX_DATA_MBR,
    SWAP_MBR,
    LINUX_DATA,
    SWAP,
    HOME,
    ROOT_X86,
    ROOT_X86_64,
];

/// Identifiers that neither accept nor reject a partition on their own;
/// the filesystem type is the deciding signal. The empty string is the
/// "no partition table / undetermined" state.
pub const PASSTHROUGH_IDS: &[&str] = &["", BASIC_DATA];

/// Extended/boot-record container codes; these hold no filesystem and are
/// always skipped in listings (0x5 classic, 0xf LBA, 0x85 Linux extended).
pub const BOOT_RECORD_IDS: &[&str] = &["0x5", "0xf", "0x85"];

/// EFI and reserved identifiers, excluded from listings on request.
pub const EFI_RESERVED_IDS: &[&str] = &[
    FAT32_LBA_MBR,
    WINDOWS_RE_MBR,
    ESP_MBR,
    ESP,
    MICROSOFT_RESERVED,
    WINDOWS_RE,
];

/// Filesystem types accepted as a Linux root.
pub const ROOT_FILESYSTEMS: &[&str] = &[
    "btrfs", "ext2", "ext3", "ext4", "jfs", "nilfs2", "reiser4", "reiserfs", "ufs", "xfs",
];
