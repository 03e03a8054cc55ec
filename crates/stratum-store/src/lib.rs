//! Layer store for stratum.
//!
//! This crate is the storage half of the daemon: a filesystem-backed store of
//! package layers addressed by `(reference, module)`, the derived
//! union-of-modules view, export records, and the resolution logic that
//! narrows fuzzy references against local and remote state. The engine owns a
//! `LayerRepo` handle and drives every mutation through it.

pub mod hash;
pub mod item;
pub mod layout;
pub mod remote;
pub mod repo;

pub use hash::tree_digest;
pub use item::{LayerItem, RepoQuery};
pub use layout::StoreLayout;
pub use remote::{NoProgress, PullProgress, RemoteSource};
pub use repo::{LayerRepo, ResolveOptions};

use std::path::Path;
use thiserror::Error;

/// Fsync a directory so a preceding `rename()` is durable on all filesystems.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("schema error: {0}")]
    Schema(#[from] stratum_schema::SchemaError),
    #[error("layer not found: {0}")]
    ItemNotFound(String),
    #[error("invalid layer: {0}")]
    InvalidLayer(String),
    #[error("remote error: {0}")]
    Remote(String),
    #[error("cannot resolve '{0}'")]
    Unresolvable(String),
    #[error("pull canceled")]
    PullCanceled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_mentions_subject() {
        let e = StoreError::ItemNotFound("stable:app/1.0.0/x86_64/binary".to_owned());
        assert!(e.to_string().contains("stable:app"));

        let e = StoreError::Unresolvable("org.example.calc".to_owned());
        assert!(e.to_string().contains("org.example.calc"));
    }
}
