//! Multi-target build driver.
//!
//! Builds the crate once per target triple with `cargo build --target`.
//! One target failing does not stop the others; its failure is recorded in
//! the returned [`BuildResult`] and the caller decides whether to package.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::builders::common::{
    CommandError, capture, find_tool, get_cargo_target_dir, validate_crate_dir,
};
use crate::builders::linker::LinkerConfig;
use crate::ndk::NdkLayout;
use crate::types::{BuildOutcome, BuildProfile, BuildResult, MobdbgError, TargetSpec};

/// The compiler toolchain.
pub trait Compiler {
    /// Builds the crate in `crate_dir` for `triple`.
    fn build(
        &self,
        crate_dir: &Path,
        triple: &str,
        profile: BuildProfile,
    ) -> Result<(), CommandError>;
}

/// [`Compiler`] backed by `cargo build`.
#[derive(Debug, Clone)]
pub struct Cargo {
    program: PathBuf,
}

impl Cargo {
    pub fn locate() -> Result<Self, MobdbgError> {
        let program = find_tool("cargo", "Install Rust from https://rustup.rs")?;
        Ok(Self { program })
    }

    /// Cargo target directory of the crate in `crate_dir`, workspace-aware.
    pub fn target_dir(&self, crate_dir: &Path) -> PathBuf {
        get_cargo_target_dir(&self.program, crate_dir)
    }
}

impl Compiler for Cargo {
    fn build(
        &self,
        crate_dir: &Path,
        triple: &str,
        profile: BuildProfile,
    ) -> Result<(), CommandError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(["build", "--target", triple]).current_dir(crate_dir);
        if matches!(profile, BuildProfile::Release) {
            cmd.arg("--release");
        }
        capture(cmd, None).map(|_| ())
    }
}

/// Builds a set of targets with one profile for the whole run.
pub struct BuildDriver<C> {
    compiler: C,
    crate_dir: PathBuf,
    target_dir: PathBuf,
    profile: BuildProfile,
    ndk: Option<NdkLayout>,
}

impl<C: Compiler> BuildDriver<C> {
    /// Creates a driver for the crate in `crate_dir`, whose cargo output lands in `target_dir`.
    pub fn new(
        compiler: C,
        crate_dir: impl Into<PathBuf>,
        target_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            compiler,
            crate_dir: crate_dir.into(),
            target_dir: target_dir.into(),
            profile: BuildProfile::Debug,
            ndk: None,
        }
    }

    pub fn profile(mut self, profile: BuildProfile) -> Self {
        self.profile = profile;
        self
    }

    /// NDK used to configure linkers for Android targets. Required when any target is Android.
    pub fn ndk(mut self, ndk: NdkLayout) -> Self {
        self.ndk = Some(ndk);
        self
    }

    /// Artifact directory for a target: `<target_dir>/<triple>/<profile>`.
    pub fn artifact_dir(&self, target: &TargetSpec) -> PathBuf {
        self.target_dir
            .join(target.triple)
            .join(self.profile.as_str())
    }

    /// Builds every target, returning one result per target.
    ///
    /// Only configuration problems (missing crate, missing NDK, unreadable
    /// linker config) are returned as errors.
    pub fn build(
        &self,
        targets: &[TargetSpec],
    ) -> Result<BTreeMap<TargetSpec, BuildResult>, MobdbgError> {
        validate_crate_dir(&self.crate_dir)?;

        if targets.iter().any(TargetSpec::is_android) {
            let ndk = self.ndk.as_ref().ok_or_else(|| {
                MobdbgError::Config(
                    "Android targets need the NDK location. Set ANDROID_NDK_HOME or \
                     [toolchain] ndk_home"
                        .to_string(),
                )
            })?;
            LinkerConfig::for_crate(&self.crate_dir).ensure(ndk, targets)?;
        }

        let mut results = BTreeMap::new();
        for target in targets {
            tracing::info!("Building {} ({})", target.triple, self.profile.as_str());
            let outcome = match self
                .compiler
                .build(&self.crate_dir, target.triple, self.profile)
            {
                Ok(()) => BuildOutcome::Passed,
                Err(e) => {
                    tracing::error!("build failed for {}: {}", target.triple, e);
                    BuildOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            };
            results.insert(
                *target,
                BuildResult {
                    target: *target,
                    outcome,
                    artifact_dir: self.artifact_dir(target),
                },
            );
        }
        Ok(results)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ndk::HostPlatform;
    use std::cell::RefCell;

    /// Compiler double recording every build and failing the listed triples.
    #[derive(Default)]
    pub(crate) struct FakeCompiler {
        pub fail: Vec<&'static str>,
        pub builds: RefCell<Vec<(String, BuildProfile)>>,
    }

    impl Compiler for FakeCompiler {
        fn build(
            &self,
            _crate_dir: &Path,
            triple: &str,
            profile: BuildProfile,
        ) -> Result<(), CommandError> {
            self.builds.borrow_mut().push((triple.to_string(), profile));
            if self.fail.iter().any(|f| *f == triple) {
                return Err(CommandError::Spawn(std::io::Error::other("linker `cc` not found")));
            }
            Ok(())
        }
    }

    pub(crate) fn crate_fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("Cargo.toml"),
            "[package]\nname = \"hbat\"\nversion = \"0.1.0\"\n",
        )
        .unwrap();
        dir
    }

    fn ndk() -> NdkLayout {
        NdkLayout::new("/opt/ndk", HostPlatform::Linux)
    }

    #[test]
    fn test_build_failure_does_not_abort_batch() {
        let dir = crate_fixture();
        let compiler = FakeCompiler {
            fail: vec!["armv7-linux-androideabi"],
            ..Default::default()
        };
        let driver = BuildDriver::new(compiler, dir.path(), dir.path().join("target")).ndk(ndk());
        let targets = TargetSpec::android_defaults();
        let results = driver.build(&targets).unwrap();

        assert_eq!(results.len(), 4);
        assert_eq!(driver.compiler.builds.borrow().len(), 4);
        let arm = TargetSpec::lookup("armv7-linux-androideabi").unwrap();
        assert!(!results[&arm].is_success());
        assert_eq!(results.values().filter(|r| r.is_success()).count(), 3);
    }

    #[test]
    fn test_profile_is_fixed_for_run() {
        let dir = crate_fixture();
        let driver = BuildDriver::new(FakeCompiler::default(), dir.path(), "/ws/target")
            .profile(BuildProfile::Release)
            .ndk(ndk());
        let targets =
            TargetSpec::resolve_all(["aarch64-linux-android", "x86_64-linux-android"]).unwrap();
        let results = driver.build(&targets).unwrap();

        assert!(driver
            .compiler
            .builds
            .borrow()
            .iter()
            .all(|(_, p)| *p == BuildProfile::Release));
        assert_eq!(
            results[&targets[0]].artifact_dir,
            PathBuf::from("/ws/target/aarch64-linux-android/release")
        );
    }

    #[test]
    fn test_android_build_writes_linker_config() {
        let dir = crate_fixture();
        let driver =
            BuildDriver::new(FakeCompiler::default(), dir.path(), dir.path().join("target"))
                .ndk(ndk());
        driver
            .build(&TargetSpec::resolve_all(["aarch64-linux-android"]).unwrap())
            .unwrap();
        let config = std::fs::read_to_string(dir.path().join(".cargo/config.toml")).unwrap();
        assert!(config.contains("[target.aarch64-linux-android]"));
    }

    #[test]
    fn test_android_build_requires_ndk() {
        let dir = crate_fixture();
        let driver =
            BuildDriver::new(FakeCompiler::default(), dir.path(), dir.path().join("target"));
        let err = driver
            .build(&TargetSpec::resolve_all(["x86_64-linux-android"]).unwrap())
            .unwrap_err();
        assert!(matches!(err, MobdbgError::Config(_)));
        assert!(driver.compiler.builds.borrow().is_empty());
    }

    #[test]
    fn test_ios_build_needs_no_ndk() {
        let dir = crate_fixture();
        let driver =
            BuildDriver::new(FakeCompiler::default(), dir.path(), dir.path().join("target"));
        let results = driver
            .build(&TargetSpec::resolve_all(["aarch64-apple-ios"]).unwrap())
            .unwrap();
        assert!(results.values().all(BuildResult::is_success));
        assert!(!dir.path().join(".cargo/config.toml").exists());
    }
}
