//! Package identity model for stratum.
//!
//! This crate defines how packages are named and ordered: fully-qualified
//! `Reference`s, partially-specified `FuzzyReference`s used during resolution,
//! the `Version` total order, host `Architecture` detection, module-label
//! semantics, and the `PackageInfo` metadata carried by every stored layer.

pub mod arch;
pub mod info;
pub mod module;
pub mod reference;
pub mod types;
pub mod version;

pub use arch::Architecture;
pub use info::{PackageInfo, PackageKind};
pub use module::{module_is_binary, modules_equivalent, BINARY_MODULE};
pub use reference::{FuzzyReference, Reference};
pub use types::{CommitId, JobId};
pub use version::Version;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("invalid reference '{input}': {reason}")]
    InvalidReference { input: String, reason: String },
    #[error("invalid version '{input}': {reason}")]
    InvalidVersion { input: String, reason: String },
    #[error("unknown architecture: {0}")]
    UnknownArchitecture(String),
    #[error("package info is incomplete: {0}")]
    IncompleteInfo(String),
}

impl SchemaError {
    pub(crate) fn reference(input: impl Into<String>, reason: impl Into<String>) -> Self {
        SchemaError::InvalidReference {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn version(input: impl Into<String>, reason: impl Into<String>) -> Self {
        SchemaError::InvalidVersion {
            input: input.into(),
            reason: reason.into(),
        }
    }
}
