use std::{
    io::Read,
    path::Path,
    process::{Command, Stdio},
    thread,
};

use anyhow::{Context, Result};

const MAX_CAPTURE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// How much of the child's output the caller cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capture {
    /// stdout and stderr captured.
    Both,
    /// stdout captured; stdin and stderr go to the null device.
    StdoutOnly,
}

/// Execute a program with stdin closed and capture its output.
///
/// # Errors
///
/// Returns an error when the program cannot be spawned or its streams cannot be read.
pub fn run_command(program: &Path, args: &[String], cwd: &Path, capture: Capture) -> Result<RunOutput> {
    let mut command = Command::new(program);
    command.args(args).current_dir(cwd).stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(match capture {
        Capture::Both => Stdio::piped(),
        Capture::StdoutOnly => Stdio::null(),
    });

    let mut child = command
        .spawn()
        .with_context(|| format!("failed to start {}", program.display()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow::anyhow!("stdout missing for {}", program.display()))?;
    let stderr = child.stderr.take();
    let stdout_handle = thread::spawn(move || read_to_string_limited(stdout));
    let stderr_handle = stderr.map(|stream| thread::spawn(move || read_to_string_limited(stream)));

    let status = child
        .wait()
        .with_context(|| format!("failed to wait for {}", program.display()))?;
    let stdout = stdout_handle
        .join()
        .map_err(|_| anyhow::anyhow!("stdout thread panicked"))??;
    let stderr = match stderr_handle {
        Some(handle) => handle
            .join()
            .map_err(|_| anyhow::anyhow!("stderr thread panicked"))??,
        None => String::new(),
    };
    Ok(RunOutput {
        code: status.code().unwrap_or(-1),
        stdout,
        stderr,
    })
}

fn read_to_string_limited(mut reader: impl Read) -> Result<String> {
    let mut buffer = Vec::new();
    let mut truncated = false;
    let mut chunk = [0u8; 8192];
    loop {
        let read = reader.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        let remaining = MAX_CAPTURE_BYTES.saturating_sub(buffer.len());
        if remaining < read {
            truncated = true;
        }
        buffer.extend_from_slice(&chunk[..read.min(remaining)]);
    }
    let mut text = String::from_utf8_lossy(&buffer).to_string();
    if truncated {
        text.push_str("\n[...truncated...]\n");
    }
    Ok(text)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn captures_stdout_and_exit_code() -> Result<()> {
        let temp = tempdir()?;
        let output = run_command(
            Path::new("/bin/sh"),
            &["-c".to_string(), "echo hello; echo oops >&2; exit 3".to_string()],
            temp.path(),
            Capture::Both,
        )?;
        assert_eq!(output.code, 3);
        assert_eq!(output.stdout, "hello\n");
        assert_eq!(output.stderr, "oops\n");
        Ok(())
    }

    #[test]
    fn stdout_only_discards_stderr() -> Result<()> {
        let temp = tempdir()?;
        let output = run_command(
            Path::new("/bin/sh"),
            &["-c".to_string(), "echo hi; echo noise >&2".to_string()],
            temp.path(),
            Capture::StdoutOnly,
        )?;
        assert!(output.success());
        assert_eq!(output.stdout, "hi\n");
        assert!(output.stderr.is_empty());
        Ok(())
    }
}
