//! Configuration file support for mobdbg.
//!
//! Settings live in a `mobdbg.toml` at the project root so that the NDK
//! location, package name and ports do not have to be passed on every run.
//!
//! ## Configuration File Location
//!
//! 1. `--config <path>` when given
//! 2. `./mobdbg.toml`, then each parent directory up to the repository root
//!
//! Relative paths in the file are resolved against the directory holding it.
//!
//! ## Example Configuration
//!
//! ```toml
//! [project]
//! crate_dir = "hbat"
//! library_name = "hbat"
//! android_dir = "android"
//!
//! [toolchain]
//! ndk_home = "/opt/android-ndk-r25c"
//! targets = ["aarch64-linux-android", "x86_64-linux-android"]
//!
//! [device]
//! package = "com.example.native_activity"
//! activity = ".HBATActivity"
//! ```

use anyhow::{Context, Result, bail};
use mobdbg_sdk::ndk::{DEFAULT_API_LEVEL, DEFAULT_CLANG_VERSION};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The default configuration file name.
pub const CONFIG_FILE_NAME: &str = "mobdbg.toml";

/// Root of `mobdbg.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MobdbgConfig {
    pub project: ProjectConfig,
    pub toolchain: ToolchainConfig,
    pub device: DeviceConfig,
}

/// Where the crate, the Android project and the ABI layout live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Directory of the Rust crate that is built into the app.
    pub crate_dir: PathBuf,

    /// Library name without the `lib` prefix. Read from the crate's Cargo.toml when unset.
    pub library_name: Option<String>,

    /// Gradle project directory.
    pub android_dir: PathBuf,

    /// Root of the per-ABI directories handed to Gradle.
    pub layout_dir: PathBuf,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            crate_dir: PathBuf::from("."),
            library_name: None,
            android_dir: PathBuf::from("android"),
            layout_dir: PathBuf::from("build/jniLibs"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    /// NDK root. Falls back to `ANDROID_NDK_HOME`, then `NDK_HOME`.
    pub ndk_home: Option<PathBuf>,

    /// Clang version folder inside the NDK toolchain.
    pub clang_version: String,

    /// Android API level of the linker wrapper and sysroot.
    pub api_level: u32,

    /// Triples built when `--target` is not given. Empty means every Android triple.
    pub targets: Vec<String>,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            ndk_home: None,
            clang_version: DEFAULT_CLANG_VERSION.to_string(),
            api_level: DEFAULT_API_LEVEL,
            targets: Vec::new(),
        }
    }
}

/// Device session defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Application id of the app under debug.
    pub package: Option<String>,

    /// Launch activity; a leading `.` is relative to the package.
    pub activity: String,

    /// APK to install. Defaults to the Gradle debug output.
    pub apk: Option<PathBuf>,

    pub jdwp_port: u16,
    pub native_port: u16,

    /// Process discovery attempts before giving up.
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub backoff_factor: f64,

    /// Timeout of each adb call (install gets five times as long).
    pub command_timeout_secs: u64,

    /// adb serial when several devices are connected.
    pub serial: Option<String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            package: None,
            activity: ".MainActivity".to_string(),
            apk: None,
            jdwp_port: 5930,
            native_port: 3059,
            max_attempts: 10,
            retry_delay_ms: 200,
            backoff_factor: 1.5,
            command_timeout_secs: 60,
            serial: None,
        }
    }
}

impl MobdbgConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: MobdbgConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        Ok(config)
    }

    /// Looks for `mobdbg.toml` in `start_dir` and its parents.
    ///
    /// The walk stops at the first directory containing `.git`, or at the
    /// filesystem root.
    pub fn discover_from(start_dir: &Path) -> Result<Option<(Self, PathBuf)>> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(CONFIG_FILE_NAME);

            if config_path.is_file() {
                let config = Self::load_from_file(&config_path)?;
                return Ok(Some((config, config_path)));
            }

            if current.join(".git").exists() || !current.pop() {
                break;
            }
        }

        Ok(None)
    }

    /// Commented `mobdbg.toml` for `mobdbg init`.
    ///
    /// `crate_dir` is written as given and read back relative to the file.
    pub fn generate_starter_toml(crate_name: &str, crate_dir: &Path) -> String {
        let library_name = crate_name.replace('-', "_");
        let package = default_package(&library_name);
        let crate_dir = toml::Value::String(crate_dir.to_string_lossy().into_owned());

        format!(
            r#"# mobdbg configuration file
# CLI flags override these settings when provided.

[project]
# Rust crate built into the app
crate_dir = {crate_dir}

# Library name without the "lib" prefix (default: read from the crate's Cargo.toml)
library_name = "{library_name}"

# Gradle project directory
android_dir = "android"

# Per-ABI library directories passed to Gradle as jniLibs
layout_dir = "build/jniLibs"

[toolchain]
# Android NDK root (default: $ANDROID_NDK_HOME, then $NDK_HOME)
# ndk_home = "/opt/android-ndk"

clang_version = "{clang_version}"
api_level = {api_level}

# Triples to build (default: all Android triples, see `mobdbg targets`)
# targets = ["aarch64-linux-android", "x86_64-linux-android"]

[device]
package = "{package}"
activity = ".MainActivity"

# APK to install (default: the Gradle output for the build profile)
# apk = "android/app/build/outputs/apk/debug/app-debug.apk"

# Local ports for jdb (JDWP) and lldb (lldb-server socket)
jdwp_port = 5930
native_port = 3059

# Process discovery: attempts, first delay and backoff factor
max_attempts = 10
retry_delay_ms = 200
backoff_factor = 1.5

# Timeout of each adb call in seconds
command_timeout_secs = 60

# serial = "emulator-5554"
"#,
            crate_dir = crate_dir,
            library_name = library_name,
            package = package,
            clang_version = DEFAULT_CLANG_VERSION,
            api_level = DEFAULT_API_LEVEL,
        )
    }
}

fn default_package(library_name: &str) -> String {
    format!("com.example.{}", library_name.replace('_', ""))
}

/// Merges the config file with CLI arguments.
///
/// CLI arguments always take precedence over config file values, which take
/// precedence over defaults.
#[derive(Debug, Default)]
pub struct ConfigResolver {
    pub config: MobdbgConfig,

    /// Path to the loaded config file, if any.
    pub config_path: Option<PathBuf>,

    /// Directory relative paths are resolved against.
    pub root: PathBuf,
}

impl ConfigResolver {
    /// Loads `explicit` when given, otherwise discovers a config from `cwd`.
    pub fn load(explicit: Option<&Path>, cwd: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            if !path.is_file() {
                bail!("config file not found: {}", path.display());
            }
            let config = MobdbgConfig::load_from_file(path)?;
            return Ok(Self::from_file(config, path.to_path_buf(), cwd));
        }
        match MobdbgConfig::discover_from(cwd)? {
            Some((config, path)) => Ok(Self::from_file(config, path, cwd)),
            None => Ok(Self {
                config: MobdbgConfig::default(),
                config_path: None,
                root: cwd.to_path_buf(),
            }),
        }
    }

    fn from_file(config: MobdbgConfig, path: PathBuf, cwd: &Path) -> Self {
        let root = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => cwd.join(parent),
            _ => cwd.to_path_buf(),
        };
        Self {
            config,
            config_path: Some(path),
            root,
        }
    }

    /// Resolves `path` against the project root.
    pub fn path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    pub fn crate_dir(&self) -> PathBuf {
        self.path(&self.config.project.crate_dir)
    }

    pub fn android_dir(&self) -> PathBuf {
        self.path(&self.config.project.android_dir)
    }

    pub fn layout_dir(&self) -> PathBuf {
        self.path(&self.config.project.layout_dir)
    }

    /// NDK root from the config file, or the environment lookup `env`.
    pub fn ndk_home(&self, env: impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
        self.config
            .toolchain
            .ndk_home
            .as_deref()
            .map(|p| self.path(p))
            .or_else(|| {
                env("ANDROID_NDK_HOME")
                    .or_else(|| env("NDK_HOME"))
                    .filter(|v| !v.is_empty())
                    .map(PathBuf::from)
            })
    }

    /// Library name from config, or the crate manifest.
    pub fn library_name(&self) -> Result<String> {
        if let Some(name) = &self.config.project.library_name {
            return Ok(name.clone());
        }
        library_name_from_manifest(&self.crate_dir().join("Cargo.toml"))
    }

    /// Resolves a CLI value, using config as fallback.
    pub fn resolve<T, F>(&self, cli_value: Option<T>, config_getter: F, default: T) -> T
    where
        F: FnOnce(&MobdbgConfig) -> Option<T>,
    {
        cli_value
            .or_else(|| config_getter(&self.config))
            .unwrap_or(default)
    }
}

/// `[lib] name`, else `[package] name` with dashes replaced, from a Cargo manifest.
pub fn library_name_from_manifest(manifest: &Path) -> Result<String> {
    let contents = std::fs::read_to_string(manifest)
        .with_context(|| format!("Failed to read {:?}", manifest))?;
    let value: toml::Value = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse {:?}", manifest))?;

    let lib_name = value
        .get("lib")
        .and_then(|lib| lib.get("name"))
        .and_then(|n| n.as_str());
    let package_name = value
        .get("package")
        .and_then(|pkg| pkg.get("name"))
        .and_then(|n| n.as_str());

    match lib_name.or(package_name) {
        Some(name) => Ok(name.replace('-', "_")),
        None => bail!(
            "no [lib] or [package] name in {:?}; set [project] library_name in {}",
            manifest,
            CONFIG_FILE_NAME
        ),
    }
}
