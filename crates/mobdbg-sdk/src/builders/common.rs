//! Common utilities shared by the toolchain, build, packaging and device modules.
//!
//! Every external collaborator (rustup, cargo, Gradle, adb, jdb) is driven
//! through [`capture`], which runs a command with piped output, optionally
//! under a timeout, and turns a non-zero exit into a [`CommandError`] that
//! carries stdout and stderr for the final error message.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::types::MobdbgError;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Failure of a single external command.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("failed to start: {0}. Ensure the tool is installed and available on PATH")]
    Spawn(#[source] std::io::Error),

    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error("exit status {status}\n\nStdout:\n{stdout}\n\nStderr:\n{stderr}")]
    Failed {
        status: ExitStatus,
        stdout: String,
        stderr: String,
    },
}

/// Renders a command line for logs and error messages.
pub fn describe(cmd: &Command) -> String {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|s| s.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Runs `cmd` to completion, capturing stdout and stderr.
///
/// With a `timeout` the child is killed once it runs past the deadline.
/// A non-zero exit status is an error.
pub fn capture(mut cmd: Command, timeout: Option<Duration>) -> Result<Output, CommandError> {
    tracing::debug!("running `{}`", describe(&cmd));
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let output = match timeout {
        None => cmd.output().map_err(CommandError::Spawn)?,
        Some(limit) => {
            let child = cmd.spawn().map_err(CommandError::Spawn)?;
            wait_with_timeout(child, limit)?
        }
    };

    if !output.status.success() {
        return Err(CommandError::Failed {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(output)
}

/// Like [`capture`] but returns stdout decoded as UTF-8 (lossy).
pub fn capture_stdout(cmd: Command, timeout: Option<Duration>) -> Result<String, CommandError> {
    let output = capture(cmd, timeout)?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn wait_with_timeout(
    mut child: std::process::Child,
    limit: Duration,
) -> Result<Output, CommandError> {
    // Drain both pipes on helper threads so a chatty child cannot block on a full pipe.
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_reader = thread::spawn(move || read_pipe(stdout));
    let stderr_reader = thread::spawn(move || read_pipe(stderr));

    let deadline = Instant::now() + limit;
    let status = loop {
        if let Some(status) = child.try_wait().map_err(CommandError::Spawn)? {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(CommandError::TimedOut(limit));
        }
        thread::sleep(POLL_INTERVAL);
    };

    Ok(Output {
        status,
        stdout: stdout_reader.join().unwrap_or_default(),
        stderr: stderr_reader.join().unwrap_or_default(),
    })
}

fn read_pipe<R: Read>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf);
    }
    buf
}

/// Locates an external tool on PATH, with an install hint on failure.
pub fn find_tool(name: &str, hint: &str) -> Result<PathBuf, MobdbgError> {
    which::which(name).map_err(|_| {
        MobdbgError::Config(format!(
            "`{}` was not found on PATH.\n\n{}",
            name, hint
        ))
    })
}

/// Validates that `crate_dir` is a directory containing a Cargo.toml.
pub fn validate_crate_dir(crate_dir: &Path) -> Result<(), MobdbgError> {
    if !crate_dir.is_dir() {
        return Err(MobdbgError::Config(format!(
            "crate directory does not exist: {}\n\n\
             Set [project] crate_dir in mobdbg.toml or run from the crate root",
            crate_dir.display()
        )));
    }
    let manifest = crate_dir.join("Cargo.toml");
    if !manifest.is_file() {
        return Err(MobdbgError::Config(format!(
            "no Cargo.toml found in {}",
            crate_dir.display()
        )));
    }
    Ok(())
}

/// Detects the Cargo target directory by running `cargo metadata` with `cargo`.
///
/// Handles workspaces where the target directory lives at the workspace
/// root. Falls back to `crate_dir/target` (with a warning) when cargo
/// metadata fails or its output cannot be parsed.
pub fn get_cargo_target_dir(cargo: &Path, crate_dir: &Path) -> PathBuf {
    let mut cmd = Command::new(cargo);
    cmd.args(["metadata", "--format-version", "1", "--no-deps"])
        .current_dir(crate_dir);

    let fallback = crate_dir.join("target");
    let stdout = match capture_stdout(cmd, None) {
        Ok(stdout) => stdout,
        Err(e) => {
            tracing::warn!(
                "cargo metadata failed ({}), falling back to {}",
                e.to_string().lines().next().unwrap_or_default(),
                fallback.display()
            );
            return fallback;
        }
    };

    match parse_target_directory(&stdout) {
        Some(dir) => dir,
        None => {
            tracing::warn!(
                "could not read target_directory from cargo metadata, falling back to {}",
                fallback.display()
            );
            fallback
        }
    }
}

fn parse_target_directory(metadata: &str) -> Option<PathBuf> {
    let value: serde_json::Value = serde_json::from_str(metadata).ok()?;
    value
        .get("target_directory")?
        .as_str()
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_not_found() {
        let cmd = Command::new("nonexistent-command-12345");
        let err = capture(cmd, None).unwrap_err();
        assert!(matches!(err, CommandError::Spawn(_)));
        assert!(err.to_string().contains("failed to start"));
    }

    #[cfg(unix)]
    #[test]
    fn test_capture_reports_failure_output() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo out; echo err >&2; exit 3"]);
        let err = capture(cmd, None).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("out"));
        assert!(msg.contains("err"));
    }

    #[cfg(unix)]
    #[test]
    fn test_capture_with_timeout_returns_output() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo hello"]);
        let stdout = capture_stdout(cmd, Some(Duration::from_secs(10))).unwrap();
        assert_eq!(stdout.trim(), "hello");
    }

    #[cfg(unix)]
    #[test]
    fn test_capture_times_out() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let started = Instant::now();
        let err = capture(cmd, Some(Duration::from_millis(100))).unwrap_err();
        assert!(matches!(err, CommandError::TimedOut(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_describe() {
        let mut cmd = Command::new("adb");
        cmd.args(["forward", "tcp:5930", "jdwp:1234"]);
        assert_eq!(describe(&cmd), "adb forward tcp:5930 jdwp:1234");
    }

    #[test]
    fn test_validate_crate_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(validate_crate_dir(dir.path()).is_err());
        std::fs::write(dir.path().join("Cargo.toml"), "[package]\nname = \"x\"\n").unwrap();
        assert!(validate_crate_dir(dir.path()).is_ok());
        assert!(validate_crate_dir(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_cargo_target_dir_falls_back_when_cargo_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let target = get_cargo_target_dir(Path::new("nonexistent-cargo-12345"), dir.path());
        assert_eq!(target, dir.path().join("target"));
    }

    #[test]
    fn test_config_error_messages_end_once() {
        let dir = tempfile::tempdir().unwrap();
        let err = validate_crate_dir(&dir.path().join("missing")).unwrap_err();
        let msg = err.to_string();
        assert!(msg.ends_with("run from the crate root. Check mobdbg.toml or CLI flags"));
        assert!(!msg.contains(".."));

        let err = find_tool("nonexistent-tool-12345", "Install it from the vendor").unwrap_err();
        assert!(!err.to_string().contains(".."));
    }

    #[test]
    fn test_parse_target_directory() {
        let json = r#"{"packages":[],"target_directory":"/work/ws/target","version":1}"#;
        assert_eq!(
            parse_target_directory(json),
            Some(PathBuf::from("/work/ws/target"))
        );
        assert_eq!(parse_target_directory("not json"), None);
    }
}
