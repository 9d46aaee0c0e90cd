//! Target platform and architecture resolution.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{LuapackError, Result};

/// Architecture substituted when cross-compiling for another OS without an explicit arch.
pub const DEFAULT_CROSS_ARCH: Arch = Arch::Amd64;

/// Target operating system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    Linux,
    Darwin,
    Windows,
}

/// Target CPU architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    Amd64,
    Arm64,
    X86,
    Arm,
}

/// An operating system and architecture pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub os: Os,
    pub arch: Arch,
}

impl Os {
    /// Operating system of the machine running the build.
    pub fn host() -> Result<Self> {
        std::env::consts::OS.parse()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Os::Linux => "linux",
            Os::Darwin => "darwin",
            Os::Windows => "windows",
        }
    }
}

impl FromStr for Os {
    type Err = LuapackError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linux" => Ok(Os::Linux),
            "darwin" | "macos" | "apple" | "osx" => Ok(Os::Darwin),
            "windows" | "win" | "win32" => Ok(Os::Windows),
            other => Err(LuapackError::UnknownOs(other.to_string())),
        }
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Arch {
    /// Architecture of the machine running the build.
    pub fn host() -> Result<Self> {
        std::env::consts::ARCH.parse()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::Amd64 => "amd64",
            Arch::Arm64 => "arm64",
            Arch::X86 => "386",
            Arch::Arm => "arm",
        }
    }
}

impl FromStr for Arch {
    type Err = LuapackError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "amd64" | "x86_64" | "x64" => Ok(Arch::Amd64),
            "arm64" | "aarch64" => Ok(Arch::Arm64),
            "386" | "x86" | "i386" | "i686" => Ok(Arch::X86),
            "arm" | "armv7" => Ok(Arch::Arm),
            other => Err(LuapackError::UnknownArch(other.to_string())),
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Target {
    pub fn new(os: Os, arch: Arch) -> Self {
        Self { os, arch }
    }

    /// The machine running the build.
    pub fn host() -> Result<Self> {
        Ok(Self::new(Os::host()?, Arch::host()?))
    }

    /// Resolves a target from a platform shorthand and explicit overrides.
    ///
    /// `platform` is either `os` or `os/arch`. An explicit `os` or `arch`
    /// takes precedence over the shorthand. When no architecture is given the
    /// host architecture is used if the target OS is the host OS, otherwise
    /// [`DEFAULT_CROSS_ARCH`].
    pub fn resolve(platform: Option<&str>, os: Option<&str>, arch: Option<&str>) -> Result<Self> {
        let host = Self::host()?;
        Self::resolve_for_host(host, platform, os, arch)
    }

    /// Same as [`Target::resolve`] against an explicit host.
    pub fn resolve_for_host(
        host: Target,
        platform: Option<&str>,
        os: Option<&str>,
        arch: Option<&str>,
    ) -> Result<Self> {
        let (platform_os, platform_arch) = match platform.map(str::trim).filter(|p| !p.is_empty()) {
            Some(p) => match p.split_once('/') {
                Some((os, arch)) => (Some(os), Some(arch)),
                None => (Some(p), None),
            },
            None => (None, None),
        };

        let os = match os.or(platform_os) {
            Some(name) => name.parse()?,
            None => host.os,
        };

        let arch = match arch.or(platform_arch) {
            Some(name) => name.parse()?,
            None if os == host.os => host.arch,
            None => DEFAULT_CROSS_ARCH,
        };

        let target = Self::new(os, arch);
        target.triple_for_host(host)?;
        Ok(target)
    }

    /// Rust target triple, choosing the Windows ABI based on the build host.
    pub fn triple(&self) -> Result<&'static str> {
        let host_os = Os::host().unwrap_or(Os::Linux);
        self.triple_for_os(host_os)
    }

    fn triple_for_host(&self, host: Target) -> Result<&'static str> {
        self.triple_for_os(host.os)
    }

    fn triple_for_os(&self, host_os: Os) -> Result<&'static str> {
        let msvc = host_os == Os::Windows;
        let triple = match (self.os, self.arch) {
            (Os::Linux, Arch::Amd64) => "x86_64-unknown-linux-gnu",
            (Os::Linux, Arch::Arm64) => "aarch64-unknown-linux-gnu",
            (Os::Linux, Arch::X86) => "i686-unknown-linux-gnu",
            (Os::Linux, Arch::Arm) => "armv7-unknown-linux-gnueabihf",
            (Os::Darwin, Arch::Amd64) => "x86_64-apple-darwin",
            (Os::Darwin, Arch::Arm64) => "aarch64-apple-darwin",
            (Os::Windows, Arch::Amd64) if msvc => "x86_64-pc-windows-msvc",
            (Os::Windows, Arch::Amd64) => "x86_64-pc-windows-gnu",
            (Os::Windows, Arch::Arm64) => "aarch64-pc-windows-msvc",
            (Os::Windows, Arch::X86) if msvc => "i686-pc-windows-msvc",
            (Os::Windows, Arch::X86) => "i686-pc-windows-gnu",
            (os, arch) => {
                return Err(LuapackError::UnsupportedTarget {
                    os: os.to_string(),
                    arch: arch.to_string(),
                });
            }
        };
        Ok(triple)
    }

    /// Executable suffix for this target.
    pub fn exe_suffix(&self) -> &'static str {
        match self.os {
            Os::Windows => ".exe",
            _ => "",
        }
    }
}

impl FromStr for Target {
    type Err = LuapackError;

    /// Parses `os/arch` or a bare `os`.
    fn from_str(s: &str) -> Result<Self> {
        Self::resolve(Some(s), None, None)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linux_arm_host() -> Target {
        Target::new(Os::Linux, Arch::Arm64)
    }

    #[test]
    fn test_defaults_to_host() {
        let target = Target::resolve_for_host(linux_arm_host(), None, None, None).unwrap();
        assert_eq!(target, linux_arm_host());
    }

    #[test]
    fn test_same_os_keeps_host_arch() {
        let target = Target::resolve_for_host(linux_arm_host(), Some("linux"), None, None).unwrap();
        assert_eq!(target.arch, Arch::Arm64);
    }

    #[test]
    fn test_cross_os_uses_default_arch() {
        for platform in ["darwin", "windows"] {
            let target =
                Target::resolve_for_host(linux_arm_host(), Some(platform), None, None).unwrap();
            assert_eq!(target.arch, DEFAULT_CROSS_ARCH);
        }

        let target = Target::resolve_for_host(linux_arm_host(), None, Some("windows"), None).unwrap();
        assert_eq!(target, Target::new(Os::Windows, Arch::Amd64));
    }

    #[test]
    fn test_explicit_overrides_win() {
        let target =
            Target::resolve_for_host(linux_arm_host(), Some("linux/amd64"), Some("darwin"), Some("arm64"))
                .unwrap();
        assert_eq!(target, Target::new(Os::Darwin, Arch::Arm64));

        let target =
            Target::resolve_for_host(linux_arm_host(), Some("windows/386"), None, None).unwrap();
        assert_eq!(target, Target::new(Os::Windows, Arch::X86));
    }

    #[test]
    fn test_aliases() {
        assert_eq!("x86_64".parse::<Arch>().unwrap(), Arch::Amd64);
        assert_eq!("aarch64".parse::<Arch>().unwrap(), Arch::Arm64);
        assert_eq!("macos".parse::<Os>().unwrap(), Os::Darwin);
        assert!("sparc".parse::<Arch>().is_err());
        assert!("plan9".parse::<Os>().is_err());
    }

    #[test]
    fn test_unsupported_pair() {
        let result = Target::resolve_for_host(linux_arm_host(), Some("darwin/386"), None, None);
        assert!(matches!(result, Err(LuapackError::UnsupportedTarget { .. })));
    }

    #[test]
    fn test_triples_and_suffix() {
        let linux = Target::new(Os::Linux, Arch::Amd64);
        assert_eq!(linux.triple_for_os(Os::Linux).unwrap(), "x86_64-unknown-linux-gnu");
        assert_eq!(linux.exe_suffix(), "");

        let windows = Target::new(Os::Windows, Arch::Amd64);
        assert_eq!(windows.triple_for_os(Os::Linux).unwrap(), "x86_64-pc-windows-gnu");
        assert_eq!(windows.triple_for_os(Os::Windows).unwrap(), "x86_64-pc-windows-msvc");
        assert_eq!(windows.exe_suffix(), ".exe");
    }
}
