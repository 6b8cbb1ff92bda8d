//! Toolchain resolution.
//!
//! Makes sure every requested target triple has an installed rustup target
//! before the build driver runs. Installing mutates the host's global rustup
//! configuration, so concurrent invocations are not isolated from each other.

use std::path::PathBuf;
use std::process::Command;

use crate::builders::common::{CommandError, capture, capture_stdout, find_tool};
use crate::types::{MobdbgError, TargetSpec, ToolchainState};

/// The host toolchain manager.
pub trait Toolchain {
    /// Raw `rustup target list` report.
    fn target_list(&self) -> Result<String, CommandError>;

    /// Installs the target for exactly `triple`.
    fn add_target(&self, triple: &str) -> Result<(), CommandError>;
}

/// [`Toolchain`] backed by the `rustup` CLI.
#[derive(Debug, Clone)]
pub struct Rustup {
    program: PathBuf,
}

impl Rustup {
    /// Finds `rustup` on PATH.
    pub fn locate() -> Result<Self, MobdbgError> {
        let program = find_tool("rustup", "Install rustup from https://rustup.rs")?;
        Ok(Self { program })
    }
}

impl Toolchain for Rustup {
    fn target_list(&self) -> Result<String, CommandError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(["target", "list"]);
        capture_stdout(cmd, None)
    }

    fn add_target(&self, triple: &str) -> Result<(), CommandError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(["target", "add", triple]);
        capture(cmd, None).map(|_| ())
    }
}

/// Resolves requested targets against the installed set, installing what is missing.
pub struct ToolchainResolver<T> {
    toolchain: T,
}

impl<T: Toolchain> ToolchainResolver<T> {
    pub fn new(toolchain: T) -> Self {
        Self { toolchain }
    }

    pub fn toolchain(&self) -> &T {
        &self.toolchain
    }

    /// Queries the toolchain for its installed targets.
    pub fn refresh(&self) -> Result<ToolchainState, MobdbgError> {
        let report = self
            .toolchain
            .target_list()
            .map_err(|e| MobdbgError::ToolchainUnavailable {
                triple: "(target list)".to_string(),
                reason: e.to_string(),
            })?;
        Ok(ToolchainState::parse_target_list(&report))
    }

    /// Ensures every target in `targets` is installed.
    ///
    /// Already-installed targets are never reinstalled. The first failed
    /// install aborts with [`MobdbgError::ToolchainUnavailable`]: building
    /// on with a partial ABI set would ship a broken package.
    pub fn ensure(&self, targets: &[TargetSpec]) -> Result<ToolchainState, MobdbgError> {
        let mut state = self.refresh()?;
        for target in targets {
            if state.contains(target.triple) {
                tracing::debug!("target {} already installed", target.triple);
                continue;
            }
            tracing::info!("Installing rustup target {}", target.triple);
            self.toolchain.add_target(target.triple).map_err(|e| {
                MobdbgError::ToolchainUnavailable {
                    triple: target.triple.to_string(),
                    reason: e.to_string(),
                }
            })?;
            state.mark_installed(target.triple);
        }
        Ok(state)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::BTreeSet;

    /// Toolchain double with a fixed installed set that records installs.
    pub(crate) struct FakeToolchain {
        pub installed: BTreeSet<String>,
        pub fail_install: Option<String>,
        pub installs: RefCell<Vec<String>>,
    }

    impl FakeToolchain {
        pub(crate) fn with_installed(triples: &[&str]) -> Self {
            Self {
                installed: triples.iter().map(|t| t.to_string()).collect(),
                fail_install: None,
                installs: RefCell::new(Vec::new()),
            }
        }
    }

    impl Toolchain for FakeToolchain {
        fn target_list(&self) -> Result<String, CommandError> {
            let mut report = String::new();
            for target in TargetSpec::all() {
                if self.installed.contains(target.triple) {
                    report.push_str(&format!("{} (installed)\n", target.triple));
                } else {
                    report.push_str(&format!("{}\n", target.triple));
                }
            }
            Ok(report)
        }

        fn add_target(&self, triple: &str) -> Result<(), CommandError> {
            if self.fail_install.as_deref() == Some(triple) {
                return Err(CommandError::Spawn(std::io::Error::other("network unreachable")));
            }
            self.installs.borrow_mut().push(triple.to_string());
            Ok(())
        }
    }

    fn specs(triples: &[&str]) -> Vec<TargetSpec> {
        TargetSpec::resolve_all(triples).unwrap()
    }

    #[test]
    fn test_ensure_installs_only_missing() {
        let resolver =
            ToolchainResolver::new(FakeToolchain::with_installed(&["aarch64-linux-android"]));
        let state = resolver
            .ensure(&specs(&["aarch64-linux-android", "x86_64-linux-android"]))
            .unwrap();
        assert_eq!(
            *resolver.toolchain.installs.borrow(),
            vec!["x86_64-linux-android".to_string()]
        );
        assert!(state.contains("aarch64-linux-android"));
        assert!(state.contains("x86_64-linux-android"));
    }

    #[test]
    fn test_ensure_is_idempotent_when_all_installed() {
        let resolver = ToolchainResolver::new(FakeToolchain::with_installed(&[
            "aarch64-linux-android",
            "armv7-linux-androideabi",
        ]));
        let targets = specs(&["aarch64-linux-android", "armv7-linux-androideabi"]);
        resolver.ensure(&targets).unwrap();
        resolver.ensure(&targets).unwrap();
        assert!(resolver.toolchain.installs.borrow().is_empty());
    }

    #[test]
    fn test_ensure_state_never_shrinks() {
        let resolver =
            ToolchainResolver::new(FakeToolchain::with_installed(&["i686-linux-android"]));
        let state = resolver.ensure(&specs(&["aarch64-linux-android"])).unwrap();
        assert!(state.contains("i686-linux-android"));
        assert!(state.contains("aarch64-linux-android"));
    }

    #[test]
    fn test_ensure_install_failure_is_fatal() {
        let mut toolchain = FakeToolchain::with_installed(&[]);
        toolchain.fail_install = Some("armv7-linux-androideabi".to_string());
        let resolver = ToolchainResolver::new(toolchain);
        let err = resolver
            .ensure(&specs(&[
                "aarch64-linux-android",
                "armv7-linux-androideabi",
                "x86_64-linux-android",
            ]))
            .unwrap_err();
        match err {
            MobdbgError::ToolchainUnavailable { triple, reason } => {
                assert_eq!(triple, "armv7-linux-androideabi");
                assert!(reason.contains("network unreachable"));
            }
            other => panic!("unexpected error: {other}"),
        }
        // aarch64 sorts first and was installed; x86_64 was never attempted.
        assert_eq!(
            *resolver.toolchain.installs.borrow(),
            vec!["aarch64-linux-android".to_string()]
        );
    }
}
