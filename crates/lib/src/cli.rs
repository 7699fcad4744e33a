//! CLI argument definitions and dispatch.

use std::ffi::OsString;

use anyhow::Result;
use camino::Utf8PathBuf;
use clap::Parser;

/// Top-level arguments.
#[derive(Debug, Parser)]
#[clap(name = "bootprep", version, about)]
pub struct Cli {
    /// Enable debug logging (RUST_LOG still takes precedence)
    #[clap(long, short = 'v', global = true)]
    pub verbose: bool,

    /// The command to run.
    #[clap(subcommand)]
    pub cmd: Cmd,
}

/// Subcommands.
#[derive(Debug, clap::Subcommand)]
pub enum Cmd {
    /// Install a UEFI-mode GRUB bootloader onto a Linux root partition
    ///
    /// Mounts the target root under a scratch mountpoint, bind-mounts
    /// /sys /proc /dev into it, mounts the EFI system partition beneath
    /// boot/efi, and runs grub-install and grub-mkconfig inside a chroot
    /// of the mounted root. Everything is unmounted again on success,
    /// failure, or a termination signal.
    Install(InstallOpts),

    /// List block devices and partitions
    List(ListOpts),
}

/// Options for the install command
#[derive(Debug, Parser)]
pub struct InstallOpts {
    /// Partition carrying the Linux root filesystem (e.g. /dev/sda2)
    #[clap(required_unless_present = "clean_only")]
    pub device: Option<String>,

    /// EFI system partition, or a drive to scan for one
    ///
    /// Defaults to scanning the drive that holds DEVICE.
    #[clap(long)]
    pub esp: Option<String>,

    /// GRUB platform target (e.g. x86_64-efi); defaults to the running
    /// architecture
    #[clap(long, conflicts_with = "bits")]
    pub target: Option<String>,

    /// Select the EFI word size (32 or 64) instead of a full platform
    /// target
    #[clap(long, conflicts_with = "target")]
    pub bits: Option<u8>,

    /// Directory holding the GRUB platform files (grub-install
    /// --directory)
    #[clap(long)]
    pub directory: Option<Utf8PathBuf>,

    /// Scratch mountpoint for the target root
    #[clap(long, default_value = "/mnt/bootprep")]
    pub mountpoint: Utf8PathBuf,

    /// EFI bootloader identifier (grub-install --bootloader-id)
    #[clap(long, default_value = "GRUB")]
    pub bootloader_id: String,

    /// Proceed even when preflight checks fail (UEFI boot, Linux root
    /// detection), and pass --force to grub-install
    #[clap(long)]
    pub force: bool,

    /// Print the commands that would run without executing them
    #[clap(long)]
    pub pretend: bool,

    /// Suppress progress output
    #[clap(long)]
    pub quiet: bool,

    /// Leave the scratch mountpoint mounted for diagnosis
    #[clap(long)]
    pub no_clean: bool,

    /// Only unmount a leftover scratch mountpoint, then exit
    #[clap(long, conflicts_with_all = ["no_clean", "pretend"])]
    pub clean_only: bool,
}

/// Options for the list command
#[derive(Debug, Parser)]
pub struct ListOpts {
    /// Show whole drives instead of partitions
    #[clap(long)]
    pub drives: bool,

    /// Only list devices strictly larger than this many MiB
    #[clap(long, default_value_t = 0)]
    pub min_size: u64,

    /// Exclude the partition with this filesystem UUID (e.g. the live
    /// boot medium)
    #[clap(long)]
    pub exclude_uuid: Option<String>,

    /// Only show swap partitions
    #[clap(long, conflicts_with = "no_swap")]
    pub swap_only: bool,

    /// Hide swap partitions
    #[clap(long)]
    pub no_swap: bool,

    /// Hide EFI and reserved partition types
    #[clap(long)]
    pub no_efi: bool,

    /// Hide removable devices
    #[clap(long)]
    pub no_removable: bool,

    /// Also show rotational/removable flags, partition count and labels
    #[clap(long)]
    pub full: bool,

    /// Shorten well-known filesystem names (vfat -> Fat32, ...)
    #[clap(long)]
    pub simplify: bool,

    /// Separate fields with tabs for machine consumption
    #[clap(long)]
    pub tabs: bool,

    /// Print a header row
    #[clap(long)]
    pub header: bool,

    /// Restrict to devices with the given major number
    #[clap(long)]
    pub major: Option<u32>,

    /// Prefix device names with /dev/
    #[clap(long)]
    pub prefix: bool,

    /// Limit output to these devices (drives or partitions)
    pub devices: Vec<String>,
}

/// Parse arguments, initialize tracing and run the selected command.
pub fn run_from_iter<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    bootprep_utils::initialize_tracing(cli.verbose);
    tracing::trace!("starting {}", bootprep_utils::NAME);
    match cli.cmd {
        Cmd::Install(opts) => crate::install::run(opts),
        Cmd::List(opts) => crate::listing::run(opts),
    }
}
