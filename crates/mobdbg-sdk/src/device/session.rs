//! Device session orchestration.
//!
//! A session walks a fixed sequence of states:
//!
//! ```text
//! Idle -> Installed -> Launched -> PidDiscovered -> ManagedAttached -> NativeAttached -> Done
//! ```
//!
//! Any step can move the session to `Failed`. The pid found during discovery
//! is handed by value to the JDWP forward and to the lldb-server attach; the
//! process table is never queried again after discovery.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::builders::common::{describe, find_tool};
use crate::device::arch::DeviceArch;
use crate::device::bridge::{BackgroundProcess, DeviceBridge, RemoteEndpoint, RemoteScript};
use crate::device::retry::RetryPolicy;
use crate::ndk::NdkLayout;
use crate::types::MobdbgError;

/// Where a session currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Installed,
    Launched,
    PidDiscovered,
    ManagedAttached,
    NativeAttached,
    Done,
    Failed(String),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Done | SessionState::Failed(_))
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => f.write_str("idle"),
            SessionState::Installed => f.write_str("installed"),
            SessionState::Launched => f.write_str("launched"),
            SessionState::PidDiscovered => f.write_str("pid discovered"),
            SessionState::ManagedAttached => f.write_str("managed debugger attached"),
            SessionState::NativeAttached => f.write_str("native debugger attached"),
            SessionState::Done => f.write_str("done"),
            SessionState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// A local port forwarded to a device endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tunnel {
    pub local_port: u16,
    pub remote: RemoteEndpoint,
}

/// One debugging session against one package on one device.
#[derive(Debug, Clone)]
pub struct DeviceSession {
    package: String,
    activity: String,
    pid: Option<u32>,
    jdwp: Option<Tunnel>,
    native: Option<Tunnel>,
    state: SessionState,
    history: Vec<SessionState>,
}

impl DeviceSession {
    pub fn new(package: impl Into<String>, activity: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            activity: activity.into(),
            pid: None,
            jdwp: None,
            native: None,
            state: SessionState::Idle,
            history: vec![SessionState::Idle],
        }
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    /// `package/activity`, with a leading-dot activity expanded against the package.
    pub fn component(&self) -> String {
        if self.activity.contains('/') {
            self.activity.clone()
        } else if self.activity.starts_with('.') {
            format!("{}/{}{}", self.package, self.package, self.activity)
        } else {
            format!("{}/{}", self.package, self.activity)
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn jdwp_tunnel(&self) -> Option<&Tunnel> {
        self.jdwp.as_ref()
    }

    pub fn native_tunnel(&self) -> Option<&Tunnel> {
        self.native.as_ref()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Every state visited so far, starting with `Idle`.
    pub fn history(&self) -> &[SessionState] {
        &self.history
    }

    fn advance(&mut self, next: SessionState) {
        tracing::debug!("session {}: {} -> {}", self.package, self.state, next);
        self.state = next.clone();
        self.history.push(next);
    }

    fn fail(&mut self, reason: String) {
        if !self.state.is_terminal() {
            self.advance(SessionState::Failed(reason));
        }
    }
}

/// Managed-runtime debugger client attached through a forwarded JDWP port.
pub trait ManagedDebugger {
    fn attach(&self, local_port: u16) -> Result<BackgroundProcess, MobdbgError>;
}

/// [`ManagedDebugger`] backed by the JDK's `jdb`.
#[derive(Debug, Clone)]
pub struct Jdb {
    program: PathBuf,
}

impl Jdb {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn locate() -> Result<Self, MobdbgError> {
        let program = find_tool(
            "jdb",
            "Install a JDK and make sure its bin/ directory is on PATH",
        )?;
        Ok(Self::new(program))
    }

    fn command(&self, local_port: u16) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-connect").arg(format!(
            "com.sun.jdi.SocketAttach:hostname=localhost,port={}",
            local_port
        ));
        cmd
    }
}

impl ManagedDebugger for Jdb {
    fn attach(&self, local_port: u16) -> Result<BackgroundProcess, MobdbgError> {
        let mut cmd = self.command(local_port);
        let label = describe(&cmd);
        tracing::debug!("spawning `{}`", label);
        let child = cmd.spawn().map_err(|e| MobdbgError::Bridge {
            command: label.clone(),
            reason: e.to_string(),
        })?;
        Ok(BackgroundProcess::spawned(label, child))
    }
}

/// Inputs of a session run.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub package: String,
    pub activity: String,
    pub apk: PathBuf,
    pub jdwp_port: u16,
    pub native_port: u16,
    pub retry: RetryPolicy,
    /// World-writable location the lldb-server is pushed to before entering the sandbox.
    pub staging_path: String,
    pub socket_name: String,
}

impl SessionConfig {
    pub const DEFAULT_JDWP_PORT: u16 = 5930;
    pub const DEFAULT_NATIVE_PORT: u16 = 3059;

    pub fn new(
        package: impl Into<String>,
        activity: impl Into<String>,
        apk: impl Into<PathBuf>,
    ) -> Self {
        Self {
            package: package.into(),
            activity: activity.into(),
            apk: apk.into(),
            jdwp_port: Self::DEFAULT_JDWP_PORT,
            native_port: Self::DEFAULT_NATIVE_PORT,
            retry: RetryPolicy::default(),
            staging_path: "/data/local/tmp/lldb-server".to_string(),
            socket_name: "debug.sock".to_string(),
        }
    }

    pub fn ports(mut self, jdwp_port: u16, native_port: u16) -> Self {
        self.jdwp_port = jdwp_port;
        self.native_port = native_port;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// A session that reached `Done`, with the debugger processes it started.
#[derive(Debug)]
pub struct AttachedSession {
    pub session: DeviceSession,
    pub debuggers: Vec<BackgroundProcess>,
}

impl AttachedSession {
    /// Waits for every debugger process to exit.
    pub fn wait(self) -> Result<DeviceSession, MobdbgError> {
        for process in self.debuggers {
            let label = process.label().to_string();
            match process.wait()? {
                Some(status) if !status.success() => {
                    tracing::warn!("`{}` exited with {}", label, status)
                }
                Some(_) => tracing::debug!("`{}` exited", label),
                None => {}
            }
        }
        Ok(self.session)
    }
}

/// Drives a [`DeviceSession`] through its states.
pub struct SessionOrchestrator<B, D> {
    bridge: B,
    debugger: D,
    ndk: NdkLayout,
    config: SessionConfig,
}

impl<B: DeviceBridge, D: ManagedDebugger> SessionOrchestrator<B, D> {
    pub fn new(bridge: B, debugger: D, ndk: NdkLayout, config: SessionConfig) -> Self {
        Self {
            bridge,
            debugger,
            ndk,
            config,
        }
    }

    pub fn bridge(&self) -> &B {
        &self.bridge
    }

    pub fn start_session(&self) -> DeviceSession {
        DeviceSession::new(&self.config.package, &self.config.activity)
    }

    /// Runs a fresh session to `Done`.
    pub fn run(&self) -> Result<AttachedSession, MobdbgError> {
        let mut session = self.start_session();
        let debuggers = self.drive(&mut session)?;
        Ok(AttachedSession { session, debuggers })
    }

    /// Advances `session` through every step, recording `Failed` on the first error.
    ///
    /// Debugger processes started before the failing step are killed.
    pub fn drive(
        &self,
        session: &mut DeviceSession,
    ) -> Result<Vec<BackgroundProcess>, MobdbgError> {
        let mut processes = Vec::new();
        match self.drive_steps(session, &mut processes) {
            Ok(()) => Ok(processes),
            Err(e) => {
                for process in processes {
                    tracing::debug!("stopping `{}`", process.label());
                    process.kill();
                }
                session.fail(e.to_string());
                Err(e)
            }
        }
    }

    fn drive_steps(
        &self,
        session: &mut DeviceSession,
        processes: &mut Vec<BackgroundProcess>,
    ) -> Result<(), MobdbgError> {
        tracing::info!("Installing {}", self.config.apk.display());
        self.bridge.install(&self.config.apk)?;
        session.advance(SessionState::Installed);

        let component = session.component();
        tracing::info!("Launching {} (waiting for debugger)", component);
        self.bridge.start_activity(&component, true)?;
        session.advance(SessionState::Launched);

        let pid = self.discover_pid(session.package())?;
        tracing::info!("Found {} with pid {}", session.package(), pid);
        session.pid = Some(pid);
        session.advance(SessionState::PidDiscovered);

        session.jdwp = Some(self.attach_managed(pid, processes)?);
        session.advance(SessionState::ManagedAttached);

        session.native = Some(self.attach_native(session.package(), pid, processes)?);
        session.advance(SessionState::NativeAttached);

        session.advance(SessionState::Done);
        Ok(())
    }

    fn discover_pid(&self, package: &str) -> Result<u32, MobdbgError> {
        self.config
            .retry
            .poll(|attempt| match self.bridge.process_table(package) {
                Ok(table) => {
                    let pid = find_package_pid(&table, package);
                    if pid.is_none() {
                        tracing::debug!("attempt {}: {} not running yet", attempt, package);
                    }
                    pid
                }
                Err(e) => {
                    tracing::debug!("attempt {}: process query failed: {}", attempt, e);
                    None
                }
            })
            .map_err(|attempts| MobdbgError::ProcessNotFound {
                package: package.to_string(),
                attempts,
            })
    }

    fn attach_managed(
        &self,
        pid: u32,
        processes: &mut Vec<BackgroundProcess>,
    ) -> Result<Tunnel, MobdbgError> {
        let tunnel = Tunnel {
            local_port: self.config.jdwp_port,
            remote: RemoteEndpoint::Jdwp(pid),
        };
        self.bridge.forward(tunnel.local_port, &tunnel.remote)?;
        tracing::info!("Attaching jdb on localhost:{}", tunnel.local_port);
        processes.push(self.debugger.attach(tunnel.local_port)?);
        Ok(tunnel)
    }

    fn attach_native(
        &self,
        package: &str,
        pid: u32,
        processes: &mut Vec<BackgroundProcess>,
    ) -> Result<Tunnel, MobdbgError> {
        let arch = DeviceArch::from_machine(&self.bridge.machine()?)?;
        let server = self.ndk.lldb_server(arch);
        ensure_lldb_server(&server)?;

        let sandbox = self.bridge.sandbox_dir(package)?;
        if sandbox.is_empty() {
            return Err(MobdbgError::Bridge {
                command: format!("adb shell run-as {} pwd", package),
                reason: "empty sandbox directory".to_string(),
            });
        }
        let socket = format!("{}/{}", sandbox.trim_end_matches('/'), self.config.socket_name);

        tracing::info!("Pushing {} lldb-server", arch);
        let staging = self.config.staging_path.as_str();
        self.bridge.push(&server, staging)?;
        let prepare = RemoteScript::new()
            .step(["chmod", "755", staging])
            .step_as(package, ["chmod", "a+x", "."])
            .step_as(package, ["cp", staging, "./lldb-server"])
            .step_as(package, ["rm", "-f", socket.as_str()]);
        self.bridge.run_script(&prepare)?.ensure_success()?;

        let launch = RemoteScript::new().step_as(
            package,
            [
                "./lldb-server".to_string(),
                "g".to_string(),
                format!("unix://{}", socket),
                "--attach".to_string(),
                pid.to_string(),
            ],
        );
        processes.push(self.bridge.spawn_script(&launch)?);

        let tunnel = Tunnel {
            local_port: self.config.native_port,
            remote: RemoteEndpoint::LocalFilesystem(socket),
        };
        self.bridge.forward(tunnel.local_port, &tunnel.remote)?;
        tracing::info!(
            "lldb-server listening; connect lldb to localhost:{}",
            tunnel.local_port
        );
        Ok(tunnel)
    }
}

fn ensure_lldb_server(path: &Path) -> Result<(), MobdbgError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(MobdbgError::Config(format!(
            "lldb-server not found at {}. Check the NDK location and [toolchain] clang_version",
            path.display()
        )))
    }
}

/// Pid of the row in a `ps -A` listing whose name column equals `package`.
///
/// Columns are whitespace separated; the pid is the second token and the
/// process name the ninth.
pub fn find_package_pid(table: &str, package: &str) -> Option<u32> {
    table.lines().find_map(|line| {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.get(8) {
            Some(name) if *name == package => tokens.get(1)?.parse().ok(),
            _ => None,
        }
    })
}
