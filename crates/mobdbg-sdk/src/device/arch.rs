//! Device architecture mapping for picking the matching lldb-server.

use std::fmt;

use crate::types::MobdbgError;

/// Instruction-set family of a device, as used by the NDK's lldb-server folders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceArch {
    Aarch64,
    Arm,
    X86_64,
    I386,
}

impl DeviceArch {
    /// Maps the output of `uname -m` to an architecture family.
    ///
    /// `aarch64` and `armv8*` are the same family and are checked before the
    /// 32-bit `arm*` match. Anything unrecognized is an error carrying the
    /// raw machine string.
    pub fn from_machine(raw: &str) -> Result<Self, MobdbgError> {
        let machine = raw.trim();
        if machine.contains("aarch64") || machine.contains("armv8") {
            Ok(DeviceArch::Aarch64)
        } else if machine == "x86_64" || machine == "amd64" {
            Ok(DeviceArch::X86_64)
        } else if machine.contains("arm") {
            Ok(DeviceArch::Arm)
        } else if machine == "i386" || machine == "i686" {
            Ok(DeviceArch::I386)
        } else {
            Err(MobdbgError::UnsupportedArchitecture(machine.to_string()))
        }
    }

    /// Folder name under `lib64/clang/<ver>/lib/linux/`.
    pub fn folder(&self) -> &'static str {
        match self {
            DeviceArch::Aarch64 => "aarch64",
            DeviceArch::Arm => "arm",
            DeviceArch::X86_64 => "x86_64",
            DeviceArch::I386 => "i386",
        }
    }
}

impl fmt::Display for DeviceArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.folder())
    }
}
