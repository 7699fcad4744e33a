//! The bootloader install sequence.
//!
//! Preflight checks run before anything mutates; after that the mount
//! sequence is owned by a [`MountStack`] whose teardown runs on success,
//! on error, and on a termination signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, ensure, Result};
use bootprep_blockdev as blockdev;
use bootprep_mount::{cleanup_mountpoint, DryRunMounter, HostMounter, MountStack, Mounter};
use camino::{Utf8Path, Utf8PathBuf};
use fn_error_context::context;

use crate::cli::InstallOpts;

/// Mountpoint for the ESP, relative to the target root.
pub(crate) const EFI_DIR: &str = "boot/efi";

/// Everything the mount/install sequence needs, resolved up front.
#[derive(Debug, Clone)]
struct InstallConfig {
    root_device: String,
    esp_device: String,
    mountpoint: Utf8PathBuf,
    platform: String,
    directory: Option<Utf8PathBuf>,
    bootloader_id: String,
    force: bool,
    leave_mounted: bool,
    quiet: bool,
}

#[context("Installing bootloader")]
pub(crate) fn run(opts: InstallOpts) -> Result<()> {
    if opts.clean_only {
        ensure!(
            rustix::process::getuid().is_root(),
            "must run as root to unmount"
        );
        return cleanup_mountpoint(&HostMounter, &opts.mountpoint, false);
    }

    // Privilege and environment checks come before any device inspection.
    if !opts.pretend {
        ensure!(
            rustix::process::getuid().is_root(),
            "must run as root (use --pretend to preview)"
        );
    }
    if !opts.force {
        ensure!(
            Utf8Path::new("/sys/firmware/efi").try_exists()?,
            "this system is not booted via UEFI (use --force to override)"
        );
    }
    let platform = grub_platform(opts.target.as_deref(), opts.bits)?;

    let device = opts
        .device
        .as_deref()
        .ok_or(blockdev::DeviceError::NoDevice)?;
    let devices = blockdev::list(None)?;
    let record = blockdev::lookup(&devices, device)?;
    if !record.is_partition() {
        bail!(
            "{device} is a whole drive; pass the partition carrying the root filesystem"
        );
    }
    if !opts.force && !blockdev::is_linux_root(record) {
        return Err(blockdev::DeviceError::NotLinuxRoot(record.name.clone()).into());
    }

    let esp_input = match &opts.esp {
        Some(esp) => esp.clone(),
        None => blockdev::drive_of(&record.name)?,
    };
    let esp = blockdev::resolve_esp_in(&devices, &esp_input)?;
    tracing::debug!("resolved ESP: {}", esp.name);

    let cfg = InstallConfig {
        root_device: record.node(),
        esp_device: esp.node(),
        mountpoint: opts.mountpoint.clone(),
        platform,
        directory: opts.directory.clone(),
        bootloader_id: opts.bootloader_id.clone(),
        force: opts.force,
        leave_mounted: opts.no_clean,
        quiet: opts.quiet || opts.pretend,
    };

    if opts.pretend {
        let mounter = DryRunMounter::default();
        execute(&mounter, &cfg, None)
    } else {
        let armed = arm_signal_cleanup(&cfg.mountpoint, cfg.leave_mounted);
        execute(&HostMounter, &cfg, Some(&armed))
    }
}

/// The mount/install state machine. Forward transitions only; a failure
/// anywhere unwinds through the [`MountStack`] guard.
fn execute(mounter: &dyn Mounter, cfg: &InstallConfig, armed: Option<&AtomicBool>) -> Result<()> {
    let mut stack = MountStack::begin(mounter, cfg.mountpoint.clone(), cfg.leave_mounted)?;
    // The signal handler may only tear down once this run owns the
    // mountpoint; until then a signal must not touch someone else's mount.
    if let Some(armed) = armed {
        armed.store(true, Ordering::SeqCst);
    }

    progress(cfg, &format!("Mounting {} on {}", cfg.root_device, stack.root()));
    stack.mount_root(&cfg.root_device)?;
    stack.bind_system_dirs()?;

    progress(cfg, &format!("Mounting {} on {}/{EFI_DIR}", cfg.esp_device, stack.root()));
    stack.mount_under(&cfg.esp_device, Utf8Path::new(EFI_DIR))?;

    progress(cfg, "Installing bootloader via grub-install");
    let install_argv = grub_install_argv(cfg);
    let install_argv: Vec<&str> = install_argv.iter().map(|s| s.as_str()).collect();
    stack.run_in_root(&install_argv)?;

    progress(cfg, "Generating GRUB configuration");
    stack.run_in_root(&["grub-mkconfig", "-o", "/boot/grub/grub.cfg"])?;

    stack.cleanup()?;
    progress(cfg, "Bootloader installed");
    Ok(())
}

fn progress(cfg: &InstallConfig, msg: &str) {
    if !cfg.quiet {
        println!("{msg}");
    }
}

/// Register cleanup to run on SIGINT/SIGTERM. The handler performs the
/// same idempotent teardown as the scope guard, then exits nonzero. The
/// returned flag gates the teardown; it stays unset until this run has
/// claimed the scratch mountpoint.
fn arm_signal_cleanup(mountpoint: &Utf8Path, leave_mounted: bool) -> Arc<AtomicBool> {
    let armed = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&armed);
    let mountpoint = mountpoint.to_owned();
    let result = ctrlc::set_handler(move || {
        if flag.load(Ordering::SeqCst) {
            if let Err(e) = cleanup_mountpoint(&HostMounter, &mountpoint, leave_mounted) {
                tracing::error!("cleanup after termination signal failed: {e:#}");
            }
        }
        std::process::exit(1);
    });
    if let Err(e) = result {
        tracing::warn!("could not install termination handler: {e}");
    }
    armed
}

/// Map the target selection to a GRUB platform triple.
fn grub_platform(target: Option<&str>, bits: Option<u8>) -> Result<String> {
    if let Some(target) = target {
        return Ok(target.to_string());
    }
    let uname = rustix::system::uname();
    let machine = uname.machine().to_string_lossy().into_owned();
    match bits {
        Some(32) => match machine.as_str() {
            "x86_64" | "i686" | "i586" | "i386" => Ok("i386-efi".to_string()),
            other => bail!("no 32-bit EFI platform for architecture {other}"),
        },
        Some(64) | None => match machine.as_str() {
            "x86_64" => Ok("x86_64-efi".to_string()),
            "aarch64" => Ok("arm64-efi".to_string()),
            "riscv64" => Ok("riscv64-efi".to_string()),
            "loongarch64" => Ok("loongarch64-efi".to_string()),
            other => bail!("unexpected platform architecture {other}"),
        },
        Some(n) => bail!("unsupported EFI word size {n}"),
    }
}

fn grub_install_argv(cfg: &InstallConfig) -> Vec<String> {
    let mut argv = vec![
        "grub-install".to_string(),
        format!("--target={}", cfg.platform),
        format!("--efi-directory=/{EFI_DIR}"),
        format!("--bootloader-id={}", cfg.bootloader_id),
    ];
    if let Some(dir) = &cfg.directory {
        argv.push(format!("--directory={dir}"));
    }
    if cfg.force {
        argv.push("--force".to_string());
    }
    argv
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Records every action; optionally fails when an action line starts
    /// with `fail_on`.
    #[derive(Debug, Default)]
    struct RecordingMounter {
        log: RefCell<Vec<String>>,
        mounted: RefCell<Vec<Utf8PathBuf>>,
        fail_on: Option<String>,
    }

    impl RecordingMounter {
        fn act(&self, entry: String) -> Result<()> {
            let fail = self
                .fail_on
                .as_deref()
                .is_some_and(|f| entry.starts_with(f));
            self.log.borrow_mut().push(entry.clone());
            if fail {
                bail!("injected failure at: {entry}");
            }
            Ok(())
        }

        fn log(&self) -> Vec<String> {
            self.log.borrow().clone()
        }
    }

    impl Mounter for RecordingMounter {
        fn create_dir_all(&self, path: &Utf8Path) -> Result<()> {
            self.act(format!("mkdir {path}"))
        }

        fn mount(&self, source: &str, target: &Utf8Path) -> Result<()> {
            self.act(format!("mount {source} {target}"))?;
            self.mounted.borrow_mut().push(target.to_owned());
            Ok(())
        }

        fn bind_mount(&self, source: &Utf8Path, target: &Utf8Path) -> Result<()> {
            self.act(format!("bind {source} {target}"))?;
            self.mounted.borrow_mut().push(target.to_owned());
            Ok(())
        }

        fn unmount_recursive(&self, target: &Utf8Path) -> Result<()> {
            self.act(format!("umount {target}"))?;
            self.mounted.borrow_mut().retain(|t| !t.starts_with(target));
            Ok(())
        }

        fn run_in_root(&self, root: &Utf8Path, argv: &[&str]) -> Result<()> {
            self.act(format!("chroot {root} {}", argv.join(" ")))
        }

        fn is_mounted(&self, target: &Utf8Path) -> Result<bool> {
            Ok(self.mounted.borrow().iter().any(|t| t == target))
        }
    }

    fn config() -> InstallConfig {
        InstallConfig {
            root_device: "/dev/sda2".into(),
            esp_device: "/dev/sda1".into(),
            mountpoint: "/mnt/bootprep".into(),
            platform: "x86_64-efi".into(),
            directory: None,
            bootloader_id: "GRUB".into(),
            force: false,
            leave_mounted: false,
            quiet: true,
        }
    }

    #[test]
    fn test_install_sequence_order() {
        let m = RecordingMounter::default();
        execute(&m, &config(), None).unwrap();
        similar_asserts::assert_eq!(
            m.log(),
            vec![
                "mkdir /mnt/bootprep".to_string(),
                "mount /dev/sda2 /mnt/bootprep".into(),
                "mkdir /mnt/bootprep/sys".into(),
                "bind /sys /mnt/bootprep/sys".into(),
                "mkdir /mnt/bootprep/proc".into(),
                "bind /proc /mnt/bootprep/proc".into(),
                "mkdir /mnt/bootprep/dev".into(),
                "bind /dev /mnt/bootprep/dev".into(),
                "mkdir /mnt/bootprep/boot/efi".into(),
                "mount /dev/sda1 /mnt/bootprep/boot/efi".into(),
                "chroot /mnt/bootprep grub-install --target=x86_64-efi \
                 --efi-directory=/boot/efi --bootloader-id=GRUB"
                    .into(),
                "chroot /mnt/bootprep grub-mkconfig -o /boot/grub/grub.cfg".into(),
                "umount /mnt/bootprep".into(),
            ]
        );
        // explicit cleanup ran; the Drop guard had nothing left to do
        assert!(!m.is_mounted(Utf8Path::new("/mnt/bootprep")).unwrap());
    }

    #[test]
    fn test_failure_at_bind_step_unwinds() {
        let m = RecordingMounter {
            fail_on: Some("bind /proc".into()),
            ..Default::default()
        };
        let err = execute(&m, &config(), None).unwrap_err();
        assert!(err.to_string().contains("injected failure"));

        let log = m.log();
        // cleanup unmounted the scratch mountpoint...
        assert_eq!(log.last().unwrap(), "umount /mnt/bootprep");
        assert!(!m.is_mounted(Utf8Path::new("/mnt/bootprep")).unwrap());
        // ...and nothing after the failure point ran
        assert!(!log.iter().any(|l| l.contains("/dev/sda1")));
        assert!(!log.iter().any(|l| l.starts_with("chroot")));
        assert!(!log.iter().any(|l| l.contains("bind /dev")));
    }

    #[test]
    fn test_failure_during_install_step_unwinds() {
        let m = RecordingMounter {
            fail_on: Some("chroot /mnt/bootprep grub-install".into()),
            ..Default::default()
        };
        assert!(execute(&m, &config(), None).is_err());
        let log = m.log();
        assert_eq!(log.last().unwrap(), "umount /mnt/bootprep");
        assert!(!log.iter().any(|l| l.contains("grub-mkconfig")));
    }

    #[test]
    fn test_leave_mounted() {
        let m = RecordingMounter::default();
        let cfg = InstallConfig {
            leave_mounted: true,
            ..config()
        };
        execute(&m, &cfg, None).unwrap();
        assert!(!m.log().iter().any(|l| l.starts_with("umount")));
        assert!(m.is_mounted(Utf8Path::new("/mnt/bootprep")).unwrap());
    }

    #[test]
    fn test_already_mounted_is_fatal() {
        let m = RecordingMounter::default();
        m.mount("/dev/sdz1", Utf8Path::new("/mnt/bootprep")).unwrap();
        let err = execute(&m, &config(), None).unwrap_err();
        assert!(err.to_string().contains("already in use"));
        // no further action was attempted
        assert_eq!(m.log().len(), 1);
    }

    #[test]
    fn test_signal_teardown_arms_after_claim() {
        // a failed claim leaves the signal-path teardown disarmed
        let m = RecordingMounter::default();
        m.mount("/dev/sdz1", Utf8Path::new("/mnt/bootprep")).unwrap();
        let armed = AtomicBool::new(false);
        assert!(execute(&m, &config(), Some(&armed)).is_err());
        assert!(!armed.load(Ordering::SeqCst));

        let m = RecordingMounter::default();
        let armed = AtomicBool::new(false);
        execute(&m, &config(), Some(&armed)).unwrap();
        assert!(armed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_pretend_renders_full_trace() {
        let m = DryRunMounter::default();
        let cfg = InstallConfig {
            mountpoint: "/nonexistent/bootprep-root".into(),
            ..config()
        };
        execute(&m, &cfg, None).unwrap();
        similar_asserts::assert_eq!(
            m.trace(),
            vec![
                "mkdir -p /nonexistent/bootprep-root".to_string(),
                "mount /dev/sda2 /nonexistent/bootprep-root".into(),
                "mkdir -p /nonexistent/bootprep-root/sys".into(),
                "mount --bind /sys /nonexistent/bootprep-root/sys".into(),
                "mkdir -p /nonexistent/bootprep-root/proc".into(),
                "mount --bind /proc /nonexistent/bootprep-root/proc".into(),
                "mkdir -p /nonexistent/bootprep-root/dev".into(),
                "mount --bind /dev /nonexistent/bootprep-root/dev".into(),
                "mkdir -p /nonexistent/bootprep-root/boot/efi".into(),
                "mount /dev/sda1 /nonexistent/bootprep-root/boot/efi".into(),
                "chroot /nonexistent/bootprep-root grub-install --target=x86_64-efi \
                 --efi-directory=/boot/efi --bootloader-id=GRUB"
                    .into(),
                "chroot /nonexistent/bootprep-root grub-mkconfig -o /boot/grub/grub.cfg".into(),
                "umount -R /nonexistent/bootprep-root".into(),
            ]
        );
    }

    #[test]
    fn test_grub_platform() {
        assert_eq!(
            grub_platform(Some("arm64-efi"), None).unwrap(),
            "arm64-efi"
        );
        assert!(grub_platform(None, Some(16)).is_err());
        #[cfg(target_arch = "x86_64")]
        {
            assert_eq!(grub_platform(None, None).unwrap(), "x86_64-efi");
            assert_eq!(grub_platform(None, Some(32)).unwrap(), "i386-efi");
            assert_eq!(grub_platform(None, Some(64)).unwrap(), "x86_64-efi");
        }
    }

    #[test]
    fn test_grub_install_argv() {
        let mut cfg = config();
        cfg.directory = Some("/usr/lib/grub/x86_64-efi".into());
        cfg.force = true;
        assert_eq!(
            grub_install_argv(&cfg),
            vec![
                "grub-install",
                "--target=x86_64-efi",
                "--efi-directory=/boot/efi",
                "--bootloader-id=GRUB",
                "--directory=/usr/lib/grub/x86_64-efi",
                "--force",
            ]
        );
    }
}
