//! # bootprep
//!
//! Installs a UEFI-mode GRUB bootloader onto a chosen Linux root
//! partition, and lists block devices/partitions with useful metadata.
//!
//! The `bootprep` binary (`crates/cli`) is a thin wrapper that delegates
//! to [`cli::run_from_iter`]. The API is internal and not stable for
//! external consumption.

/// Command-line interface implementation (clap-based)
pub mod cli;
mod install;
mod listing;
