//! Core types for mobdbg-sdk.
//!
//! This module defines the fundamental types used throughout the SDK:
//!
//! - [`MobdbgError`] - Error types for toolchain, build, packaging and device operations
//! - [`TargetSpec`] / [`Platform`] - Build targets and the fixed triple lookup table
//! - [`ToolchainState`] - Installed rustup targets for the host toolchain
//! - [`BuildProfile`] - Debug or release, fixed once per run
//! - [`BuildResult`] / [`BuildOutcome`] - Per-target output of the build driver

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Error types for mobdbg-sdk operations.
///
/// Every variant carries enough context (triple, package, attempt count or the
/// raw unmapped string) to diagnose the failure without re-running.
///
/// # Example
///
/// ```ignore
/// use mobdbg_sdk::MobdbgError;
///
/// match orchestrator.run() {
///     Ok(attached) => attached.wait()?,
///     Err(MobdbgError::ProcessNotFound { package, attempts }) => {
///         eprintln!("{} never showed up after {} polls", package, attempts);
///     }
///     Err(e) => eprintln!("other error: {}", e),
/// }
/// ```
#[derive(Debug, thiserror::Error)]
pub enum MobdbgError {
    /// Querying or installing a rustup target failed.
    #[error("toolchain target {triple} unavailable: {reason}\n\nTry running: rustup target add {triple}")]
    ToolchainUnavailable { triple: String, reason: String },

    /// A single target failed to compile.
    ///
    /// Build failures are normally recorded in [`BuildOutcome::Failed`] rather
    /// than returned, so one broken target does not stop the others.
    #[error("build failed for {triple}: {reason}")]
    BuildFailed { triple: String, reason: String },

    /// The packaging layout could not be completed or the bundle builder failed.
    #[error("packaging incomplete: {0}")]
    PackagingIncomplete(String),

    /// PID discovery exhausted its retry budget.
    #[error(
        "process for package '{package}' not found after {attempts} attempts.\n\n\
         Check that:\n  1. The package name matches the application id\n  \
         2. The app is debuggable (run-as requires android:debuggable)\n  \
         3. The app did not crash on launch (adb logcat)"
    )]
    ProcessNotFound { package: String, attempts: u32 },

    /// `uname -m` on the device reported a machine string outside the known families.
    #[error("unsupported device architecture: \"{0}\" (expected aarch64, armv8*, arm*, x86_64, amd64, i386 or i686)")]
    UnsupportedArchitecture(String),

    /// The orchestrating host has no matching NDK prebuilt directory.
    #[error("unsupported host platform: \"{0}\"")]
    UnsupportedHost(String),

    /// A requested triple is not in the fixed target table.
    #[error("unknown target triple: \"{0}\". Run `mobdbg targets` to list supported triples")]
    UnknownTarget(String),

    /// A device bridge (adb) command failed or timed out.
    #[error("device bridge command `{command}` failed: {reason}")]
    Bridge { command: String, reason: String },

    /// Invalid or missing configuration.
    #[error("configuration error: {0}. Check mobdbg.toml or CLI flags")]
    Config(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}. Check file paths and permissions")]
    Io(#[from] std::io::Error),
}

/// Platform family a target triple belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Android (APK with per-ABI `.so` libraries).
    Android,
    /// iOS. Packaging for this family is not implemented yet.
    Ios,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Android => "android",
            Platform::Ios => "ios",
        }
    }
}

/// NDK naming details for an Android target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NdkNames {
    /// Folder under `lib64/clang/<ver>/lib/linux/` holding the clang runtime.
    pub clang_arch: &'static str,
    /// Triple used in the NDK linker binary name (`<prefix><api>-clang++`).
    pub linker_prefix: &'static str,
    /// Directory under `sysroot/usr/lib/` holding the platform libraries.
    pub sysroot_triple: &'static str,
}

/// A build target: a canonical triple and the packaging slot its artifacts land in.
///
/// Specs only come from [`TargetSpec::lookup`] (or the table itself), so an
/// unknown triple can never reach the build driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TargetSpec {
    /// Canonical target triple (e.g. `aarch64-linux-android`).
    pub triple: &'static str,
    /// Platform family.
    pub platform: Platform,
    /// Packaging slot name (Android ABI directory, e.g. `arm64-v8a`).
    pub slot: &'static str,
    #[serde(skip)]
    ndk: Option<NdkNames>,
}

const fn android(
    triple: &'static str,
    slot: &'static str,
    clang_arch: &'static str,
    linker_prefix: &'static str,
    sysroot_triple: &'static str,
) -> TargetSpec {
    TargetSpec {
        triple,
        platform: Platform::Android,
        slot,
        ndk: Some(NdkNames {
            clang_arch,
            linker_prefix,
            sysroot_triple,
        }),
    }
}

const fn ios(triple: &'static str, slot: &'static str) -> TargetSpec {
    TargetSpec {
        triple,
        platform: Platform::Ios,
        slot,
        ndk: None,
    }
}

/// Fixed triple lookup table.
static TARGETS: [TargetSpec; 7] = [
    android(
        "aarch64-linux-android",
        "arm64-v8a",
        "aarch64",
        "aarch64-linux-android",
        "aarch64-linux-android",
    ),
    // The NDK names its 32-bit ARM clang wrappers armv7a-*, not armv7-*.
    android(
        "armv7-linux-androideabi",
        "armeabi-v7a",
        "arm",
        "armv7a-linux-androideabi",
        "arm-linux-androideabi",
    ),
    android(
        "i686-linux-android",
        "x86",
        "i386",
        "i686-linux-android",
        "i686-linux-android",
    ),
    android(
        "x86_64-linux-android",
        "x86_64",
        "x86_64",
        "x86_64-linux-android",
        "x86_64-linux-android",
    ),
    ios("aarch64-apple-ios", "ios-arm64"),
    ios("aarch64-apple-ios-sim", "ios-arm64-simulator"),
    ios("x86_64-apple-ios", "ios-x86_64-simulator"),
];

impl TargetSpec {
    /// Every supported target, in table order.
    pub fn all() -> &'static [TargetSpec] {
        &TARGETS
    }

    /// The default target set: every Android triple.
    pub fn android_defaults() -> Vec<TargetSpec> {
        TARGETS
            .iter()
            .filter(|t| t.platform == Platform::Android)
            .copied()
            .collect()
    }

    /// Looks up a triple in the fixed table.
    ///
    /// # Errors
    ///
    /// Returns [`MobdbgError::UnknownTarget`] for any triple not in the table.
    pub fn lookup(triple: &str) -> Result<TargetSpec, MobdbgError> {
        TARGETS
            .iter()
            .find(|t| t.triple == triple)
            .copied()
            .ok_or_else(|| MobdbgError::UnknownTarget(triple.to_string()))
    }

    /// Resolves a list of triples into a de-duplicated, ordered target set.
    pub fn resolve_all<I, S>(triples: I) -> Result<Vec<TargetSpec>, MobdbgError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set = triples
            .into_iter()
            .map(|t| TargetSpec::lookup(t.as_ref()))
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(set.into_iter().collect())
    }

    /// NDK naming details, `None` for non-Android targets.
    pub fn ndk(&self) -> Option<&NdkNames> {
        self.ndk.as_ref()
    }

    pub fn is_android(&self) -> bool {
        self.platform == Platform::Android
    }
}

impl FromStr for TargetSpec {
    type Err = MobdbgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TargetSpec::lookup(s)
    }
}

impl fmt::Display for TargetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.triple)
    }
}

/// Triples that currently have an installed rustup target.
///
/// Refreshed once per run and only ever grown afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolchainState {
    installed: BTreeSet<String>,
}

impl ToolchainState {
    /// Parses the tabular `rustup target list` report.
    ///
    /// Lines look like `aarch64-linux-android (installed)`; the first token is
    /// the triple and a second token containing `installed` marks it present.
    pub fn parse_target_list(report: &str) -> Self {
        let installed = report
            .lines()
            .filter_map(|line| {
                let mut tokens = line.split_whitespace();
                let triple = tokens.next()?;
                let status = tokens.next()?;
                status.contains("installed").then(|| triple.to_string())
            })
            .collect();
        Self { installed }
    }

    pub fn contains(&self, triple: &str) -> bool {
        self.installed.contains(triple)
    }

    /// Records a freshly installed target.
    pub fn mark_installed(&mut self, triple: &str) {
        self.installed.insert(triple.to_string());
    }

    pub fn len(&self) -> usize {
        self.installed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.installed.is_empty()
    }
}

/// Build profile controlling optimization and debug info.
///
/// # Example
///
/// ```
/// use mobdbg_sdk::BuildProfile;
///
/// assert_eq!(BuildProfile::Debug.as_str(), "debug");
/// assert_eq!(BuildProfile::Release.gradle_task(), "assembleRelease");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildProfile {
    /// Debug build with debug symbols and no optimizations.
    Debug,
    /// Release build with optimizations enabled.
    Release,
}

impl BuildProfile {
    /// Returns the string representation, which is also the cargo output folder.
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildProfile::Debug => "debug",
            BuildProfile::Release => "release",
        }
    }

    /// Gradle task assembling an APK for this profile.
    pub fn gradle_task(&self) -> &'static str {
        match self {
            BuildProfile::Debug => "assembleDebug",
            BuildProfile::Release => "assembleRelease",
        }
    }
}

/// Outcome of building one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum BuildOutcome {
    Passed,
    Failed { reason: String },
}

/// Result of building one target. Created by the build driver, read by the packager.
#[derive(Debug, Clone, Serialize)]
pub struct BuildResult {
    /// Target that was built.
    pub target: TargetSpec,
    /// Pass or fail.
    pub outcome: BuildOutcome,
    /// Directory holding the produced artifacts (`<target_dir>/<triple>/<profile>`).
    pub artifact_dir: PathBuf,
}

impl BuildResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, BuildOutcome::Passed)
    }

    /// Converts a failed outcome back into an error, e.g. for strict callers.
    pub fn to_error(&self) -> Option<MobdbgError> {
        match &self.outcome {
            BuildOutcome::Passed => None,
            BuildOutcome::Failed { reason } => Some(MobdbgError::BuildFailed {
                triple: self.target.triple.to_string(),
                reason: reason.clone(),
            }),
        }
    }
}
