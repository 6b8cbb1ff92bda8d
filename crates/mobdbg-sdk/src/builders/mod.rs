//! Build and packaging pipeline.
//!
//! 1. **Linker config** - `[target.<triple>]` entries in `.cargo/config.toml` pointing at the NDK
//! 2. **Build driver** - one `cargo build --target` per triple, failures recorded per target
//! 3. **Packager** - per-ABI slot directories, then an optional Gradle assemble
//!
//! ## Example
//!
//! ```ignore
//! use mobdbg_sdk::builders::{BuildDriver, Cargo, Gradle, Packager, PackagingLayout};
//! use mobdbg_sdk::{BuildProfile, TargetSpec};
//!
//! let targets = TargetSpec::android_defaults();
//! let results = BuildDriver::new(Cargo::locate()?, ".", "target")
//!     .profile(BuildProfile::Debug)
//!     .ndk(ndk)
//!     .build(&targets)?;
//!
//! let packager = Packager::new(PackagingLayout::new("build/jniLibs"), "libhbat");
//! let report = packager.package(&results, &Gradle::new("android"))?;
//! # Ok::<(), mobdbg_sdk::MobdbgError>(())
//! ```

pub mod common;
pub mod driver;
pub mod linker;
pub mod package;

pub use common::CommandError;
pub use driver::{BuildDriver, Cargo, Compiler};
pub use linker::LinkerConfig;
pub use package::{BundleBuilder, Gradle, PackageReport, Packager, PackagingLayout, SlotReport};
