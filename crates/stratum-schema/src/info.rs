use crate::arch::Architecture;
use crate::reference::Reference;
use crate::version::Version;
use crate::SchemaError;
use serde::{Deserialize, Serialize};

/// What a package is, which decides its lifecycle: applications are exported
/// and cached, runtimes and bases are pulled as dependencies and pruned when
/// orphaned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageKind {
    App,
    Runtime,
    Base,
}

impl std::fmt::Display for PackageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PackageKind::App => write!(f, "app"),
            PackageKind::Runtime => write!(f, "runtime"),
            PackageKind::Base => write!(f, "base"),
        }
    }
}

/// Package metadata shipped inside every layer (`info.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub id: String,
    pub version: String,
    pub channel: String,
    pub arch: String,
    pub kind: PackageKind,
    pub module: String,
    /// Declared base dependency as a fuzzy reference string. Required for
    /// apps, absent for bases.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    /// Declared runtime dependency as a fuzzy reference string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
    /// Minified-bundle identity; set when this layer was imported from a
    /// minified bundle layer and its dependencies live under a subref.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PackageInfo {
    /// Build the fully-qualified reference this info describes.
    pub fn reference(&self) -> Result<Reference, SchemaError> {
        Ok(Reference {
            channel: self.channel.clone(),
            id: self.id.clone(),
            version: Version::parse(&self.version)?,
            arch: Architecture::parse(&self.arch)?,
        })
    }
}
