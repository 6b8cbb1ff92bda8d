//! Build-and-debug orchestration for Rust libraries running inside Android apps.
//!
//! `mobdbg-sdk` covers the whole loop from source to a live debugging session:
//!
//! - **Toolchain**: makes sure every requested rustup target is installed
//! - **Builders**: writes NDK linker entries, builds each target and lays the
//!   shared libraries out per ABI for Gradle
//! - **Device**: installs the APK, launches it held at the debugger wait, finds
//!   its pid and attaches both `jdb` (JDWP) and `lldb-server`
//!
//! External tools (rustup, cargo, gradle, adb, jdb) sit behind traits so each
//! stage can be exercised with fakes.
//!
//! # Example
//!
//! ```ignore
//! use mobdbg_sdk::{TargetSpec, ToolchainResolver, Rustup};
//!
//! let targets = TargetSpec::resolve_all(["aarch64-linux-android", "x86_64-linux-android"])?;
//! let state = ToolchainResolver::new(Rustup::locate()?).ensure(&targets)?;
//! println!("{} targets installed", state.len());
//! # Ok::<(), mobdbg_sdk::MobdbgError>(())
//! ```

pub mod builders;
pub mod device;
pub mod ndk;
pub mod toolchain;
pub mod types;

pub use ndk::{HostPlatform, NdkLayout};
pub use toolchain::{Rustup, Toolchain, ToolchainResolver};
pub use types::{
    BuildOutcome, BuildProfile, BuildResult, MobdbgError, NdkNames, Platform, TargetSpec,
    ToolchainState,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
