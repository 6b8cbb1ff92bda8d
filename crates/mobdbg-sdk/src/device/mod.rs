//! Device-side debugging: bridge, retry, architecture mapping and the session state machine.
//!
//! ## Example
//!
//! ```ignore
//! use mobdbg_sdk::device::{Adb, Jdb, SessionConfig, SessionOrchestrator};
//! use mobdbg_sdk::ndk::{HostPlatform, NdkLayout};
//!
//! let ndk = NdkLayout::new("/opt/android-ndk", HostPlatform::detect()?);
//! let config = SessionConfig::new("com.example.app", ".MainActivity", "app-debug.apk");
//! let attached = SessionOrchestrator::new(Adb::locate()?, Jdb::locate()?, ndk, config).run()?;
//! attached.wait()?;
//! # Ok::<(), mobdbg_sdk::MobdbgError>(())
//! ```

pub mod arch;
pub mod bridge;
pub mod retry;
pub mod session;

pub use arch::DeviceArch;
pub use bridge::{
    Adb, BackgroundProcess, DeviceBridge, RemoteEndpoint, RemoteScript, RemoteStep, ScriptReport,
    StepStatus,
};
pub use retry::RetryPolicy;
pub use session::{
    AttachedSession, DeviceSession, Jdb, ManagedDebugger, SessionConfig, SessionOrchestrator,
    SessionState, Tunnel, find_package_pid,
};
