//! Mount sequencing for the install path.
//!
//! All mutating actions go through the [`Mounter`] seam, so the same
//! sequence can run for real, be rendered as a dry-run trace, or be
//! recorded in tests. [`MountStack`] owns the scratch mountpoint for the
//! duration of an install and guarantees teardown on every exit path via
//! `Drop`; teardown is a single recursive unmount because every later
//! mount target nests beneath the scratch mountpoint.

use std::cell::RefCell;
use std::process::Command;

use anyhow::{Context, Result};
use bootprep_utils::{shell_join, CommandRunExt};
use camino::{Utf8Path, Utf8PathBuf};
use fn_error_context::context;

/// Host directories bind-mounted into the target root, in mount order.
pub const SYSTEM_BIND_DIRS: &[&str] = &["sys", "proc", "dev"];

/// Mount-state errors.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// The scratch mountpoint is already mounted.
    #[error("mountpoint {0} is already in use")]
    AlreadyMounted(Utf8PathBuf),
}

// Mount targets in /proc/self/mounts escape blanks and a few control
// characters as three-digit octal sequences.
fn unescape_mount_path(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let mut octal = String::new();
        for _ in 0..3 {
            match chars.peek() {
                Some(d) if d.is_digit(8) => {
                    octal.push(*d);
                    chars.next();
                }
                _ => break,
            }
        }
        match u8::from_str_radix(&octal, 8) {
            Ok(b) if octal.len() == 3 => out.push(b as char),
            _ => {
                out.push('\\');
                out.push_str(&octal);
            }
        }
    }
    out
}

/// Whether `target` appears as a mount target in a mount table in
/// `/proc/self/mounts` format.
pub fn mount_table_contains(table: &str, target: &Utf8Path) -> bool {
    let wanted = target.as_str().trim_end_matches('/');
    let wanted = if wanted.is_empty() { "/" } else { wanted };
    table
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|t| unescape_mount_path(t) == wanted)
}

/// Whether `target` is currently a mountpoint on the host.
#[context("Checking mount state of {target}")]
pub fn is_mounted(target: &Utf8Path) -> Result<bool> {
    let table = std::fs::read_to_string("/proc/self/mounts").context("reading mount table")?;
    Ok(mount_table_contains(&table, target))
}

/// The seam every mutating action goes through.
pub trait Mounter: std::fmt::Debug {
    /// Create a directory and any missing parents.
    fn create_dir_all(&self, path: &Utf8Path) -> Result<()>;
    /// Mount a block device on a directory.
    fn mount(&self, source: &str, target: &Utf8Path) -> Result<()>;
    /// Bind-mount an existing directory tree at a second location.
    fn bind_mount(&self, source: &Utf8Path, target: &Utf8Path) -> Result<()>;
    /// Recursively unmount a mountpoint and everything beneath it.
    fn unmount_recursive(&self, target: &Utf8Path) -> Result<()>;
    /// Run a program inside a chroot of `root`, inheriting stdio.
    fn run_in_root(&self, root: &Utf8Path, argv: &[&str]) -> Result<()>;
    /// Whether `target` is currently mounted.
    fn is_mounted(&self, target: &Utf8Path) -> Result<bool>;
}

/// Performs mounts on the host via util-linux.
#[derive(Debug, Default)]
pub struct HostMounter;

impl Mounter for HostMounter {
    fn create_dir_all(&self, path: &Utf8Path) -> Result<()> {
        std::fs::create_dir_all(path).with_context(|| format!("creating {path}"))
    }

    #[context("Mounting {source} on {target}")]
    fn mount(&self, source: &str, target: &Utf8Path) -> Result<()> {
        Command::new("mount")
            .args([source, target.as_str()])
            .log_debug()
            .run_capture_stderr()
    }

    #[context("Bind-mounting {source} on {target}")]
    fn bind_mount(&self, source: &Utf8Path, target: &Utf8Path) -> Result<()> {
        Command::new("mount")
            .args(["--bind", source.as_str(), target.as_str()])
            .log_debug()
            .run_capture_stderr()
    }

    #[context("Unmounting {target}")]
    fn unmount_recursive(&self, target: &Utf8Path) -> Result<()> {
        Command::new("umount")
            .args(["-R", target.as_str()])
            .log_debug()
            .run_capture_stderr()
    }

    #[context("Running in {root}")]
    fn run_in_root(&self, root: &Utf8Path, argv: &[&str]) -> Result<()> {
        Command::new("chroot")
            .arg(root.as_str())
            .args(argv)
            .log_debug()
            .run_inherited_with_cmd_context()
    }

    fn is_mounted(&self, target: &Utf8Path) -> Result<bool> {
        is_mounted(target)
    }
}

/// Prints each action as the shell command it stands for, without
/// performing it, and records the rendered lines. Virtual mount state
/// keeps the rendered sequence consistent (the final unmount still
/// appears in the trace).
#[derive(Debug, Default)]
pub struct DryRunMounter {
    mounted: RefCell<Vec<Utf8PathBuf>>,
    trace: RefCell<Vec<String>>,
}

impl DryRunMounter {
    fn emit(&self, words: &[&str]) {
        let line = shell_join(words.iter().copied());
        println!("{line}");
        self.trace.borrow_mut().push(line);
    }

    /// The action lines rendered so far, in order.
    pub fn trace(&self) -> Vec<String> {
        self.trace.borrow().clone()
    }
}

impl Mounter for DryRunMounter {
    fn create_dir_all(&self, path: &Utf8Path) -> Result<()> {
        self.emit(&["mkdir", "-p", path.as_str()]);
        Ok(())
    }

    fn mount(&self, source: &str, target: &Utf8Path) -> Result<()> {
        self.emit(&["mount", source, target.as_str()]);
        self.mounted.borrow_mut().push(target.to_owned());
        Ok(())
    }

    fn bind_mount(&self, source: &Utf8Path, target: &Utf8Path) -> Result<()> {
        self.emit(&["mount", "--bind", source.as_str(), target.as_str()]);
        self.mounted.borrow_mut().push(target.to_owned());
        Ok(())
    }

    fn unmount_recursive(&self, target: &Utf8Path) -> Result<()> {
        self.emit(&["umount", "-R", target.as_str()]);
        self.mounted
            .borrow_mut()
            .retain(|t| !t.starts_with(target));
        Ok(())
    }

    fn run_in_root(&self, root: &Utf8Path, argv: &[&str]) -> Result<()> {
        let mut words = vec!["chroot", root.as_str()];
        words.extend_from_slice(argv);
        self.emit(&words);
        Ok(())
    }

    fn is_mounted(&self, target: &Utf8Path) -> Result<bool> {
        if self.mounted.borrow().iter().any(|t| t == target) {
            return Ok(true);
        }
        // The real table still matters for the precondition check.
        is_mounted(target)
    }
}

/// One mount recorded in the plan, in the order it was performed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// Mount target directory.
    pub target: Utf8PathBuf,
    /// Block device node, or the bound source directory.
    pub source: String,
    /// Whether this entry is a bind mount.
    pub bind: bool,
}

/// Idempotent teardown of a scratch mountpoint.
///
/// A no-op when `leave_mounted` is set; otherwise recursively unmounts
/// `root` iff it is currently mounted. Safe to call any number of times.
pub fn cleanup_mountpoint(mounter: &dyn Mounter, root: &Utf8Path, leave_mounted: bool) -> Result<()> {
    if leave_mounted {
        tracing::debug!("leaving {root} mounted");
        return Ok(());
    }
    if mounter.is_mounted(root)? {
        mounter.unmount_recursive(root)?;
    }
    Ok(())
}

/// The mount sequence for one install, with teardown guaranteed on drop.
#[derive(Debug)]
pub struct MountStack<'a> {
    mounter: &'a dyn Mounter,
    root: Utf8PathBuf,
    plan: Vec<MountEntry>,
    leave_mounted: bool,
}

impl<'a> MountStack<'a> {
    /// Claim `root` as the scratch mountpoint. Fails with
    /// [`StateError::AlreadyMounted`] if something is mounted there.
    pub fn begin(
        mounter: &'a dyn Mounter,
        root: impl Into<Utf8PathBuf>,
        leave_mounted: bool,
    ) -> Result<Self> {
        let root = root.into();
        if mounter.is_mounted(&root)? {
            return Err(StateError::AlreadyMounted(root).into());
        }
        Ok(Self {
            mounter,
            root,
            plan: Vec::new(),
            leave_mounted,
        })
    }

    /// The scratch mountpoint.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Mounts performed so far, in order.
    pub fn plan(&self) -> &[MountEntry] {
        &self.plan
    }

    /// Create the scratch mountpoint and mount the root partition there.
    pub fn mount_root(&mut self, device: &str) -> Result<()> {
        self.mounter.create_dir_all(&self.root)?;
        self.mounter.mount(device, &self.root)?;
        self.plan.push(MountEntry {
            target: self.root.clone(),
            source: device.to_string(),
            bind: false,
        });
        Ok(())
    }

    /// Bind-mount the host's /sys, /proc and /dev beneath the target root.
    pub fn bind_system_dirs(&mut self) -> Result<()> {
        for dir in SYSTEM_BIND_DIRS {
            let source = Utf8PathBuf::from(format!("/{dir}"));
            let target = self.root.join(dir);
            self.mounter.create_dir_all(&target)?;
            self.mounter.bind_mount(&source, &target)?;
            self.plan.push(MountEntry {
                target,
                source: source.into_string(),
                bind: true,
            });
        }
        Ok(())
    }

    /// Create `relative` beneath the target root and mount a device there.
    pub fn mount_under(&mut self, source: &str, relative: &Utf8Path) -> Result<()> {
        let target = self.root.join(relative);
        self.mounter.create_dir_all(&target)?;
        self.mounter.mount(source, &target)?;
        self.plan.push(MountEntry {
            target,
            source: source.to_string(),
            bind: false,
        });
        Ok(())
    }

    /// Run a program inside the mounted target root.
    pub fn run_in_root(&self, argv: &[&str]) -> Result<()> {
        self.mounter.run_in_root(&self.root, argv)
    }

    /// Tear down whatever is mounted beneath the scratch mountpoint.
    /// Idempotent; the `Drop` impl becomes a no-op after an explicit call.
    pub fn cleanup(&self) -> Result<()> {
        cleanup_mountpoint(self.mounter, &self.root, self.leave_mounted)
    }
}

impl Drop for MountStack<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.cleanup() {
            tracing::warn!("Failed to unmount {}: {e:#}", self.root);
        }
    }
}
