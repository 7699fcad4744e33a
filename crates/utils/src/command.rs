//! Helpers for running external commands.

use std::process::{Command, Stdio};

use anyhow::{Context, Result};

/// Render a word sequence as a single shell-quoted line, suitable for
/// logging and for dry-run traces.
pub fn shell_join<'a>(words: impl IntoIterator<Item = &'a str>) -> String {
    let words = words.into_iter().collect::<Vec<_>>();
    shlex::try_join(words.iter().copied()).unwrap_or_else(|_| words.join(" "))
}

/// Render a command as a single shell-quoted line.
pub fn command_line(cmd: &Command) -> String {
    let words = std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|a| a.to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    shell_join(words.iter().map(|s| s.as_str()))
}

/// Extension helpers for [`std::process::Command`].
pub trait CommandRunExt {
    /// Log the full command line at debug level; returns `self` for chaining.
    fn log_debug(&mut self) -> &mut Self;
    /// Run the command, discarding stdout and capturing stderr. On a
    /// nonzero exit the captured stderr becomes part of the error.
    fn run_capture_stderr(&mut self) -> Result<()>;
    /// Run the command with inherited stdio, verifying a successful exit.
    fn run_inherited_with_cmd_context(&mut self) -> Result<()>;
    /// Run the command, parsing its stdout as JSON and capturing stderr
    /// for error reporting.
    fn run_and_parse_json<T: serde::de::DeserializeOwned>(&mut self) -> Result<T>;
}

impl CommandRunExt for Command {
    fn log_debug(&mut self) -> &mut Self {
        tracing::debug!("exec: {}", command_line(self));
        self
    }

    fn run_capture_stderr(&mut self) -> Result<()> {
        let label = self.get_program().to_string_lossy().into_owned();
        let output = self
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .with_context(|| format!("spawning {label}"))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("{label} failed ({}): {}", output.status, stderr.trim());
        }
        Ok(())
    }

    fn run_inherited_with_cmd_context(&mut self) -> Result<()> {
        let label = command_line(self);
        let status = self.status().with_context(|| format!("spawning {label}"))?;
        if !status.success() {
            anyhow::bail!("{label} failed: {status}");
        }
        Ok(())
    }

    fn run_and_parse_json<T: serde::de::DeserializeOwned>(&mut self) -> Result<T> {
        let label = self.get_program().to_string_lossy().into_owned();
        let output = self
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .with_context(|| format!("spawning {label}"))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("{label} failed ({}): {}", output.status, stderr.trim());
        }
        serde_json::from_slice(&output.stdout).with_context(|| format!("parsing {label} output"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_rendering() {
        let mut c = Command::new("mount");
        c.args(["/dev/sda1", "/mnt/bootprep"]);
        assert_eq!(command_line(&c), "mount /dev/sda1 /mnt/bootprep");

        let mut c = Command::new("mount");
        c.args(["LABEL=my root", "/mnt/bootprep"]);
        similar_asserts::assert_eq!(command_line(&c), "mount 'LABEL=my root' /mnt/bootprep");
    }

    #[test]
    fn test_run_capture_stderr() {
        assert!(Command::new("true").run_capture_stderr().is_ok());
        let err = Command::new("false").run_capture_stderr().unwrap_err();
        assert!(err.to_string().contains("false"));
    }
}
