use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// CPU architecture of a package payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    X86_64,
    Arm64,
    Loong64,
    Riscv64,
}

impl Architecture {
    pub fn parse(input: &str) -> Result<Self, SchemaError> {
        match input {
            "x86_64" => Ok(Architecture::X86_64),
            "arm64" | "aarch64" => Ok(Architecture::Arm64),
            "loong64" | "loongarch64" => Ok(Architecture::Loong64),
            "riscv64" => Ok(Architecture::Riscv64),
            other => Err(SchemaError::UnknownArchitecture(other.to_owned())),
        }
    }

    /// The architecture of the machine this daemon runs on.
    pub fn host() -> Result<Self, SchemaError> {
        Self::parse(std::env::consts::ARCH)
    }

    /// GNU triplet used by the in-image ld-cache generator.
    pub fn triplet(&self) -> &'static str {
        match self {
            Architecture::X86_64 => "x86_64-linux-gnu",
            Architecture::Arm64 => "aarch64-linux-gnu",
            Architecture::Loong64 => "loongarch64-linux-gnu",
            Architecture::Riscv64 => "riscv64-linux-gnu",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::X86_64 => "x86_64",
            Architecture::Arm64 => "arm64",
            Architecture::Loong64 => "loong64",
            Architecture::Riscv64 => "riscv64",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Architecture {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Architecture::parse(s)
    }
}
