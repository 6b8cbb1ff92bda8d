//! Android NDK layout.
//!
//! The NDK home directory is never read from the environment here; callers
//! build an [`NdkLayout`] once (the CLI does it from `mobdbg.toml` or
//! `ANDROID_NDK_HOME`) and inject it, so tests can use fabricated paths.

use std::path::{Path, PathBuf};

use crate::device::arch::DeviceArch;
use crate::types::{MobdbgError, NdkNames};

/// Clang version whose runtime libraries and lldb-server are used.
pub const DEFAULT_CLANG_VERSION: &str = "14.0.6";

/// Android API level baked into the NDK linker wrapper names.
pub const DEFAULT_API_LEVEL: u32 = 33;

/// Host platform, used to pick the NDK prebuilt directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPlatform {
    Windows,
    Darwin,
    Linux,
}

impl HostPlatform {
    /// Detects the platform of the running host.
    pub fn detect() -> Result<Self, MobdbgError> {
        Self::from_os_arch(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// Maps an OS/architecture pair (as in [`std::env::consts`]) to a host platform.
    ///
    /// Unknown operating systems use the Linux convention. The NDK ships no
    /// ARM prebuilts for Linux or Windows, so those hosts are rejected;
    /// macOS prebuilts are universal binaries.
    pub fn from_os_arch(os: &str, arch: &str) -> Result<Self, MobdbgError> {
        let arm_host = arch.starts_with("aarch64") || arch.starts_with("arm");
        match os {
            "macos" => Ok(HostPlatform::Darwin),
            "windows" | "linux" if arm_host => {
                Err(MobdbgError::UnsupportedHost(format!("{}-{}", os, arch)))
            }
            "windows" => Ok(HostPlatform::Windows),
            "linux" => Ok(HostPlatform::Linux),
            other => {
                tracing::warn!(
                    "unknown host OS \"{}\", assuming the linux-x86_64 NDK prebuilts",
                    other
                );
                Ok(HostPlatform::Linux)
            }
        }
    }

    /// Name of the directory under `toolchains/llvm/prebuilt/`.
    pub fn prebuilt_dir(&self) -> &'static str {
        match self {
            HostPlatform::Windows => "windows-x86_64",
            HostPlatform::Darwin => "darwin-x86_64",
            HostPlatform::Linux => "linux-x86_64",
        }
    }
}

/// Paths inside an Android NDK installation.
#[derive(Debug, Clone)]
pub struct NdkLayout {
    home: PathBuf,
    host: HostPlatform,
    clang_version: String,
    api_level: u32,
}

impl NdkLayout {
    pub fn new(home: impl Into<PathBuf>, host: HostPlatform) -> Self {
        Self {
            home: home.into(),
            host,
            clang_version: DEFAULT_CLANG_VERSION.to_string(),
            api_level: DEFAULT_API_LEVEL,
        }
    }

    pub fn clang_version(mut self, version: impl Into<String>) -> Self {
        self.clang_version = version.into();
        self
    }

    pub fn api_level(mut self, level: u32) -> Self {
        self.api_level = level;
        self
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn host(&self) -> HostPlatform {
        self.host
    }

    /// `<ndk>/toolchains/llvm/prebuilt/<host>`
    pub fn toolchain_dir(&self) -> PathBuf {
        self.home
            .join("toolchains")
            .join("llvm")
            .join("prebuilt")
            .join(self.host.prebuilt_dir())
    }

    /// Clang++ wrapper used as the cargo linker for a target.
    pub fn linker_path(&self, names: &NdkNames) -> PathBuf {
        let suffix = if self.host == HostPlatform::Windows {
            ".cmd"
        } else {
            ""
        };
        self.toolchain_dir().join("bin").join(format!(
            "{}{}-clang++{}",
            names.linker_prefix, self.api_level, suffix
        ))
    }

    /// Clang runtime directory for an architecture folder (`aarch64`, `arm`, `i386`, `x86_64`).
    pub fn clang_runtime_dir(&self, clang_arch: &str) -> PathBuf {
        self.toolchain_dir()
            .join("lib64")
            .join("clang")
            .join(&self.clang_version)
            .join("lib")
            .join("linux")
            .join(clang_arch)
    }

    /// Platform libraries for a sysroot triple at the configured API level.
    pub fn sysroot_lib_dir(&self, sysroot_triple: &str) -> PathBuf {
        self.toolchain_dir()
            .join("sysroot")
            .join("usr")
            .join("lib")
            .join(sysroot_triple)
            .join(self.api_level.to_string())
    }

    /// Prebuilt lldb-server matching a device architecture.
    pub fn lldb_server(&self, arch: DeviceArch) -> PathBuf {
        self.clang_runtime_dir(arch.folder()).join("lldb-server")
    }
}
