//! Core orchestration for the stratum package-management daemon.
//!
//! This crate ties the reference model, layer store, remote source and
//! container runtime together into the `PackageManager`: a transactional,
//! task-oriented mutation engine serialized by a cross-process repository
//! lock, with deferred deletion driven by the live-container inventory and
//! derived-cache generation through an external container runtime.

pub mod bundle;
pub mod cache;
pub mod engine;
pub mod events;
pub mod inventory;
pub mod lock;
pub mod registry;
pub mod task;
pub mod transaction;

pub use engine::{
    InstallOptions, InstallParameters, JobReply, PackageManager, PackageManagerOptions,
    PackageRequest, TaskReply, UninstallParameters, UpdateParameters,
};
pub use events::{
    CollectingSink, Event, EventSink, InteractionKind, InteractionReply, InteractionRequest,
    NullSink,
};
pub use inventory::{ContainerState, Inventory};
pub use lock::RepoLock;
pub use registry::{JobQueue, TaskRegistry};
pub use task::{State, SubState, Task};
pub use transaction::Transaction;

use thiserror::Error;

/// Client-visible error kinds. Every kind carries a stable integer code for
/// bus replies; recoverable errors inside a task surface as a `Failed` task
/// state instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("{0} is not installed")]
    NotInstalled(String),
    #[error("{0} is already installed")]
    AlreadyInstalled(String),
    #[error("the latest version has been installed; pass force to replace it with {0}")]
    DowngradeRequiresForce(String),
    #[error("{0} is currently running; close the application and try again")]
    InUse(String),
    #[error("repository is busy")]
    RepoBusy,
    #[error("package architecture {found} does not match host architecture {host}")]
    ArchMismatch { found: String, host: String },
    #[error("dependency missing: {0}")]
    DependencyMissing(String),
    #[error("pull failed: {0}")]
    PullFailed(String),
    #[error("import failed: {0}")]
    ImportFailed(String),
    #[error("remove failed: {0}")]
    RemoveFailed(String),
    #[error("bundle verification failed")]
    BundleVerificationFailed,
    #[error("interaction canceled")]
    InteractionCanceled,
    #[error("cache generation failed: {0}")]
    CacheGenerationFailed(String),
    #[error("live-container inventory unreadable: {0}")]
    InventoryUnreadable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable integer code carried in bus replies.
    pub fn code(&self) -> i64 {
        match self {
            Error::InvalidArgument(_) => 101,
            Error::NotInstalled(_) => 102,
            Error::AlreadyInstalled(_) => 103,
            Error::DowngradeRequiresForce(_) => 104,
            Error::InUse(_) => 105,
            Error::RepoBusy => 106,
            Error::ArchMismatch { .. } => 107,
            Error::DependencyMissing(_) => 108,
            Error::PullFailed(_) => 109,
            Error::ImportFailed(_) => 110,
            Error::RemoveFailed(_) => 111,
            Error::BundleVerificationFailed => 112,
            Error::InteractionCanceled => 113,
            Error::CacheGenerationFailed(_) => 114,
            Error::InventoryUnreadable(_) => 115,
            Error::Internal(_) => 116,
        }
    }
}

impl From<stratum_schema::SchemaError> for Error {
    fn from(e: stratum_schema::SchemaError) -> Self {
        Error::InvalidArgument(e.to_string())
    }
}

impl From<stratum_runtime::RuntimeError> for Error {
    fn from(e: stratum_runtime::RuntimeError) -> Self {
        Error::CacheGenerationFailed(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct() {
        let errors = [
            Error::InvalidArgument(String::new()),
            Error::NotInstalled(String::new()),
            Error::AlreadyInstalled(String::new()),
            Error::DowngradeRequiresForce(String::new()),
            Error::InUse(String::new()),
            Error::RepoBusy,
            Error::ArchMismatch {
                found: String::new(),
                host: String::new(),
            },
            Error::DependencyMissing(String::new()),
            Error::PullFailed(String::new()),
            Error::ImportFailed(String::new()),
            Error::RemoveFailed(String::new()),
            Error::BundleVerificationFailed,
            Error::InteractionCanceled,
            Error::CacheGenerationFailed(String::new()),
            Error::InventoryUnreadable(String::new()),
            Error::Internal(String::new()),
        ];
        let mut codes: Vec<i64> = errors.iter().map(Error::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn schema_errors_become_invalid_argument() {
        let e: Error = stratum_schema::Reference::parse("garbage").unwrap_err().into();
        assert!(matches!(e, Error::InvalidArgument(_)));
    }
}
