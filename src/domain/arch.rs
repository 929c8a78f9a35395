//! CPU architecture value object

use std::fmt;

use serde::{Deserialize, Serialize};

/// CPU architecture of a host, interpreter or binary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Arch {
    Arm64,
    X86_64,
    /// Fat binary carrying both slices
    Universal2,
    Unknown,
    Other(String),
}

impl Arch {
    /// Normalize free-form architecture text (`uname -m`, `lipo -archs`,
    /// `file` output) into an `Arch`.
    pub fn normalize(value: &str) -> Self {
        let text = value.trim().to_lowercase();
        if text.is_empty() {
            return Arch::Unknown;
        }
        match text.as_str() {
            "arm64" | "aarch64" => return Arch::Arm64,
            "x86_64" | "amd64" => return Arch::X86_64,
            "universal2" => return Arch::Universal2,
            "unknown" => return Arch::Unknown,
            _ => {}
        }

        let has_arm = text.contains("arm64") || text.contains("aarch64");
        let has_x86 = text.contains("x86_64");
        match (has_arm, has_x86) {
            (true, true) => Arch::Universal2,
            (true, false) => Arch::Arm64,
            (false, true) => Arch::X86_64,
            (false, false) => Arch::Other(text.replace(' ', "_")),
        }
    }

    /// Architecture this binary was compiled for.
    pub fn compiled() -> Self {
        Self::normalize(std::env::consts::ARCH)
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Arch::Unknown)
    }

    /// Whether code built for `self` runs natively on a host of `host` arch.
    pub fn runs_natively_on(&self, host: &Arch) -> bool {
        match (self, host) {
            (Arch::Unknown, _) | (_, Arch::Unknown) => true,
            (Arch::Universal2, Arch::Arm64 | Arch::X86_64) => true,
            (a, b) => a == b,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Arch::Arm64 => "arm64",
            Arch::X86_64 => "x86_64",
            Arch::Universal2 => "universal2",
            Arch::Unknown => "unknown",
            Arch::Other(s) => s,
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Arch {
    fn from(value: String) -> Self {
        Arch::normalize(&value)
    }
}

impl From<Arch> for String {
    fn from(arch: Arch) -> Self {
        arch.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_aliases() {
        assert_eq!(Arch::normalize("aarch64"), Arch::Arm64);
        assert_eq!(Arch::normalize(" ARM64 "), Arch::Arm64);
        assert_eq!(Arch::normalize("amd64"), Arch::X86_64);
        assert_eq!(Arch::normalize(""), Arch::Unknown);
    }

    #[test]
    fn normalizes_tool_output() {
        assert_eq!(
            Arch::normalize("/usr/bin/python3: Mach-O 64-bit executable arm64"),
            Arch::Arm64
        );
        assert_eq!(Arch::normalize("x86_64 arm64"), Arch::Universal2);
        assert_eq!(Arch::normalize("i386 thing"), Arch::Other("i386_thing".to_string()));
    }

    #[test]
    fn native_compatibility() {
        assert!(Arch::Arm64.runs_natively_on(&Arch::Arm64));
        assert!(!Arch::X86_64.runs_natively_on(&Arch::Arm64));
        assert!(Arch::Universal2.runs_natively_on(&Arch::Arm64));
        assert!(Arch::Unknown.runs_natively_on(&Arch::Arm64));
    }

    #[test]
    fn serializes_as_plain_string() {
        let json = serde_json::to_string(&Arch::X86_64).unwrap();
        assert_eq!(json, "\"x86_64\"");
        let parsed: Arch = serde_json::from_str("\"aarch64\"").unwrap();
        assert_eq!(parsed, Arch::Arm64);
    }
}
