//! Helpers for running the external tools (`tar`, `qemu-img`, `qm`) synchronously.

use std::ffi::OsStr;
use std::io::{Read, Seek};
use std::process::{Command, Stdio};

use color_eyre::eyre::{eyre, Context, Result};

/// Helpers intended for [`std::process::Command`].
pub trait CommandRun {
    /// Execute the child process, returning an error carrying the tail of
    /// stderr if it exits unsuccessfully.
    fn run(&mut self) -> Result<()>;

    /// Execute the child process and capture its stdout as a string.
    fn run_get_string(&mut self) -> Result<String>;

    /// Execute the child process, parsing its stdout as JSON.
    fn run_and_parse_json<T: serde::de::DeserializeOwned>(&mut self) -> Result<T>;
}

/// Helpers intended for [`std::process::ExitStatus`].
pub trait ExitStatusExt {
    /// If the exit status signals it was not successful, return an error.
    /// The command line is left to the caller to add as context.
    fn check_status(&self, stderr: std::fs::File) -> Result<()>;
}

impl ExitStatusExt for std::process::ExitStatus {
    fn check_status(&self, stderr: std::fs::File) -> Result<()> {
        if self.success() {
            return Ok(());
        }
        let stderr_buf = last_utf8_content_from_file(stderr);
        Err(eyre!("Subprocess failed: {self}\n{}", stderr_buf.trim_end()))
    }
}

fn last_utf8_content_from_file(mut f: std::fs::File) -> String {
    // Only the trailing bytes; tar and qm can be very chatty
    const MAX_STDERR_BYTES: u64 = 1024;
    let size = f
        .metadata()
        .map_err(|e| {
            tracing::warn!("failed to fstat: {e}");
        })
        .map(|m| m.len())
        .unwrap_or(0)
        .min(MAX_STDERR_BYTES);
    let mut stderr_buf = Vec::with_capacity(size as usize);
    let r = match f
        .seek(std::io::SeekFrom::End(-(size as i64)))
        .and_then(|_| f.read_to_end(&mut stderr_buf))
    {
        Ok(_) => String::from_utf8_lossy(&stderr_buf),
        Err(e) => {
            tracing::warn!("failed seek+read: {e}");
            "<failed to read stderr>".into()
        }
    };
    r.into_owned()
}

/// Render a command line for logs and dry-run output, shell-quoted.
pub fn describe(cmd: &Command) -> String {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|a| {
            let a = a.to_string_lossy();
            shlex::try_quote(&a)
                .map(|q| q.into_owned())
                .unwrap_or_else(|_| a.to_string())
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Check whether `program` can be spawned from `PATH`.
pub fn program_available(program: impl AsRef<OsStr>) -> bool {
    let program = program.as_ref();
    // `qm` and `tar` both accept --help; qemu-img prints usage and exits 0 too
    Command::new(program)
        .arg("--help")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok()
}

impl CommandRun for Command {
    fn run(&mut self) -> Result<()> {
        let stderr = tempfile::tempfile()?;
        self.stderr(stderr.try_clone()?);
        let desc = describe(self);
        tracing::debug!("exec: {desc}");
        self.status()
            .with_context(|| format!("Failed to spawn {desc}"))?
            .check_status(stderr)
            .with_context(|| format!("Command failed: {desc}"))
    }

    fn run_get_string(&mut self) -> Result<String> {
        let mut stdout = tempfile::tempfile()?;
        self.stdout(stdout.try_clone()?);
        self.run()?;
        stdout.seek(std::io::SeekFrom::Start(0)).context("seek")?;
        let mut s = String::new();
        stdout
            .read_to_string(&mut s)
            .context("Reading subprocess stdout")?;
        Ok(s)
    }

    fn run_and_parse_json<T: serde::de::DeserializeOwned>(&mut self) -> Result<T> {
        let desc = describe(self);
        let output = self.run_get_string()?;
        serde_json::from_str(&output).with_context(|| format!("Parsing JSON output of {desc}"))
    }
}
