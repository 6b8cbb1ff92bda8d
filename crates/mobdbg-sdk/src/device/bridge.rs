//! Device bridge (adb) collaborator.
//!
//! [`DeviceBridge`] is the seam between the session orchestrator and the
//! device. [`Adb`] implements it on top of the `adb` CLI, checking every exit
//! status and bounding every call with a timeout.
//!
//! Multi-step remote work is expressed as a [`RemoteScript`]: an ordered list
//! of steps sent as a single `adb shell` invocation that stops at the first
//! failing step and reports the exit code of each step it ran.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::Duration;

use crate::builders::common::{CommandError, capture, capture_stdout, describe, find_tool};
use crate::types::MobdbgError;

const STEP_MARKER: &str = "__mobdbg_step";

/// Device-side end of a port forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteEndpoint {
    /// JDWP transport of a process.
    Jdwp(u32),
    /// Unix-domain socket at a filesystem path.
    LocalFilesystem(String),
}

impl fmt::Display for RemoteEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteEndpoint::Jdwp(pid) => write!(f, "jdwp:{}", pid),
            RemoteEndpoint::LocalFilesystem(path) => write!(f, "localfilesystem:{}", path),
        }
    }
}

/// One command of a [`RemoteScript`], optionally run inside an app sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStep {
    run_as: Option<String>,
    argv: Vec<String>,
}

impl RemoteStep {
    /// Full argument vector, including the `run-as <package>` prefix.
    pub fn command_line(&self) -> Vec<String> {
        let mut line = Vec::with_capacity(self.argv.len() + 2);
        if let Some(package) = &self.run_as {
            line.push("run-as".to_string());
            line.push(package.clone());
        }
        line.extend(self.argv.iter().cloned());
        line
    }

    pub fn label(&self) -> String {
        self.command_line().join(" ")
    }
}

/// Ordered remote steps with stop-at-first-failure semantics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteScript {
    steps: Vec<RemoteStep>,
}

impl RemoteScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a step run with the shell user's privileges.
    pub fn step<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.steps.push(RemoteStep {
            run_as: None,
            argv: argv.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Appends a step run as `package` inside its private sandbox.
    pub fn step_as<I, S>(mut self, package: &str, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.steps.push(RemoteStep {
            run_as: Some(package.to_string()),
            argv: argv.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn steps(&self) -> &[RemoteStep] {
        &self.steps
    }

    /// Renders the script as one shell command line.
    ///
    /// Each step echoes a marker with its index and exit code, and the script
    /// exits with that code as soon as a step fails.
    pub fn render(&self) -> String {
        self.steps
            .iter()
            .enumerate()
            .map(|(index, step)| {
                let command = step
                    .command_line()
                    .iter()
                    .map(|arg| shell_quote(arg))
                    .collect::<Vec<_>>()
                    .join(" ");
                format!(
                    "{command}; __rc=$?; echo \"{STEP_MARKER} {index} $__rc\"; \
                     [ $__rc -eq 0 ] || exit $__rc"
                )
            })
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Renders only the commands, chained with `&&`, for background launches.
    pub fn render_chain(&self) -> String {
        self.steps
            .iter()
            .map(|step| {
                step.command_line()
                    .iter()
                    .map(|arg| shell_quote(arg))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect::<Vec<_>>()
            .join(" && ")
    }

    /// Reads the per-step markers out of the script's output.
    pub fn parse_report(&self, output: &str) -> ScriptReport {
        let mut codes: Vec<Option<i32>> = vec![None; self.steps.len()];
        for line in output.lines() {
            let mut tokens = line.split_whitespace();
            if tokens.next() != Some(STEP_MARKER) {
                continue;
            }
            let index = tokens.next().and_then(|t| t.parse::<usize>().ok());
            let code = tokens.next().and_then(|t| t.parse::<i32>().ok());
            if let (Some(index), Some(code)) = (index, code) {
                if let Some(slot) = codes.get_mut(index) {
                    *slot = Some(code);
                }
            }
        }
        ScriptReport {
            steps: self
                .steps
                .iter()
                .zip(codes)
                .map(|(step, exit_code)| StepStatus {
                    label: step.label(),
                    exit_code,
                })
                .collect(),
        }
    }
}

fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=+,@%".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', "'\\''"))
    }
}

/// Exit status of one script step; `None` when the step never ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepStatus {
    pub label: String,
    pub exit_code: Option<i32>,
}

/// Per-step outcome of a [`RemoteScript`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptReport {
    pub steps: Vec<StepStatus>,
}

impl ScriptReport {
    /// First step that failed or never ran.
    pub fn first_failure(&self) -> Option<&StepStatus> {
        self.steps.iter().find(|s| s.exit_code != Some(0))
    }

    pub fn ensure_success(&self) -> Result<(), MobdbgError> {
        match self.first_failure() {
            None => Ok(()),
            Some(step) => Err(MobdbgError::Bridge {
                command: step.label.clone(),
                reason: match step.exit_code {
                    Some(code) => format!("exited with status {}", code),
                    None => "did not run (an earlier step or the connection failed)".to_string(),
                },
            }),
        }
    }
}

/// A process left running after the orchestrator is done (debugger client, remote server).
#[derive(Debug)]
pub struct BackgroundProcess {
    label: String,
    child: Option<Child>,
}

impl BackgroundProcess {
    pub fn spawned(label: impl Into<String>, child: Child) -> Self {
        Self {
            label: label.into(),
            child: Some(child),
        }
    }

    /// A handle with no local process behind it.
    pub fn detached(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            child: None,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Kills the process if it is still running and reaps it.
    pub fn kill(mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                tracing::debug!("`{}` already exited: {}", self.label, e);
            }
            let _ = child.wait();
        }
    }

    /// Blocks until the process exits.
    pub fn wait(mut self) -> Result<Option<ExitStatus>, MobdbgError> {
        match self.child.take() {
            Some(mut child) => Ok(Some(child.wait()?)),
            None => Ok(None),
        }
    }
}

/// Operations the session orchestrator needs from a connected device.
pub trait DeviceBridge {
    /// Installs (or reinstalls) an APK.
    fn install(&self, apk: &Path) -> Result<(), MobdbgError>;

    /// Starts `component` (`package/activity`), optionally held until a debugger attaches.
    fn start_activity(&self, component: &str, wait_for_debugger: bool) -> Result<(), MobdbgError>;

    /// Raw `ps -A` listing as seen from inside the app's sandbox.
    fn process_table(&self, package: &str) -> Result<String, MobdbgError>;

    /// Device machine type (`uname -m`).
    fn machine(&self) -> Result<String, MobdbgError>;

    /// Working directory of the app's sandbox.
    fn sandbox_dir(&self, package: &str) -> Result<String, MobdbgError>;

    /// Copies a host file to the device.
    fn push(&self, local: &Path, remote: &str) -> Result<(), MobdbgError>;

    /// Forwards a local TCP port to a device endpoint.
    fn forward(&self, local_port: u16, remote: &RemoteEndpoint) -> Result<(), MobdbgError>;

    /// Runs a script to completion, reporting each step.
    fn run_script(&self, script: &RemoteScript) -> Result<ScriptReport, MobdbgError>;

    /// Starts a long-running script and returns without waiting for it.
    fn spawn_script(&self, script: &RemoteScript) -> Result<BackgroundProcess, MobdbgError>;
}

/// [`DeviceBridge`] backed by the `adb` CLI.
#[derive(Debug, Clone)]
pub struct Adb {
    program: PathBuf,
    serial: Option<String>,
    timeout: Duration,
}

impl Adb {
    /// Default timeout of every adb call; installs get five times as long.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            serial: None,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Finds `adb` on PATH.
    pub fn locate() -> Result<Self, MobdbgError> {
        let program = find_tool(
            "adb",
            "Install the Android SDK platform-tools and add them to PATH",
        )?;
        Ok(Self::new(program))
    }

    /// Targets a specific device (`adb -s <serial>`).
    pub fn serial(mut self, serial: Option<String>) -> Self {
        self.serial = serial;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut cmd = Command::new(&self.program);
        if let Some(serial) = &self.serial {
            cmd.args(["-s", serial.as_str()]);
        }
        cmd.args(args);
        cmd
    }

    fn run(&self, cmd: Command, timeout: Duration) -> Result<String, MobdbgError> {
        let command = describe(&cmd);
        capture_stdout(cmd, Some(timeout)).map_err(|e| bridge_error(command, e))
    }

    fn shell<I, S>(&self, args: I) -> Result<String, MobdbgError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut cmd = self.command(["shell"]);
        cmd.args(args);
        self.run(cmd, self.timeout)
    }
}

fn bridge_error(command: String, e: CommandError) -> MobdbgError {
    MobdbgError::Bridge {
        command,
        reason: e.to_string(),
    }
}

impl DeviceBridge for Adb {
    fn install(&self, apk: &Path) -> Result<(), MobdbgError> {
        if !apk.is_file() {
            return Err(MobdbgError::Config(format!(
                "APK not found at {}. Run `mobdbg build` first or pass --apk",
                apk.display()
            )));
        }
        let mut cmd = self.command(["install", "-r"]);
        cmd.arg(apk);
        let output = self.run(cmd, self.timeout * 5)?;
        // Old adb versions exit 0 even when the package manager rejects the APK.
        if output.contains("Failure") {
            return Err(MobdbgError::Bridge {
                command: format!("adb install -r {}", apk.display()),
                reason: output.trim().to_string(),
            });
        }
        Ok(())
    }

    fn start_activity(&self, component: &str, wait_for_debugger: bool) -> Result<(), MobdbgError> {
        let mut args = vec!["am", "start"];
        if wait_for_debugger {
            args.push("-D");
        }
        args.extend(["-n", component]);
        let output = self.shell(&args)?;
        if output.contains("Error:") {
            return Err(MobdbgError::Bridge {
                command: format!("adb shell {}", args.join(" ")),
                reason: output.trim().to_string(),
            });
        }
        Ok(())
    }

    fn process_table(&self, package: &str) -> Result<String, MobdbgError> {
        self.shell(["run-as", package, "ps", "-A"])
    }

    fn machine(&self) -> Result<String, MobdbgError> {
        Ok(self.shell(["uname", "-m"])?.trim().to_string())
    }

    fn sandbox_dir(&self, package: &str) -> Result<String, MobdbgError> {
        Ok(self.shell(["run-as", package, "pwd"])?.trim().to_string())
    }

    fn push(&self, local: &Path, remote: &str) -> Result<(), MobdbgError> {
        let mut cmd = self.command(["push"]);
        cmd.arg(local).arg(remote);
        self.run(cmd, self.timeout).map(|_| ())
    }

    fn forward(&self, local_port: u16, remote: &RemoteEndpoint) -> Result<(), MobdbgError> {
        let cmd = self.command([
            "forward".to_string(),
            format!("tcp:{}", local_port),
            remote.to_string(),
        ]);
        self.run(cmd, self.timeout).map(|_| ())
    }

    fn run_script(&self, script: &RemoteScript) -> Result<ScriptReport, MobdbgError> {
        let cmd = self.command(["shell".to_string(), script.render()]);
        let command = describe(&cmd);
        // A failing step makes adb exit non-zero; the markers still tell which one.
        let stdout = match capture(cmd, Some(self.timeout)) {
            Ok(output) => String::from_utf8_lossy(&output.stdout).into_owned(),
            Err(CommandError::Failed { stdout, .. }) => stdout,
            Err(e) => return Err(bridge_error(command, e)),
        };
        Ok(script.parse_report(&stdout))
    }

    fn spawn_script(&self, script: &RemoteScript) -> Result<BackgroundProcess, MobdbgError> {
        let mut cmd = self.command(["shell".to_string(), script.render_chain()]);
        cmd.stdin(Stdio::null());
        let label = describe(&cmd);
        tracing::debug!("spawning `{}`", label);
        let child = cmd.spawn().map_err(|e| MobdbgError::Bridge {
            command: label.clone(),
            reason: e.to_string(),
        })?;
        Ok(BackgroundProcess::spawned(label, child))
    }
}
