use crate::RuntimeError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One bind mount into the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindMount {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub read_only: bool,
}

/// The process a one-shot container runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerProcess {
    pub args: Vec<String>,
    pub cwd: String,
    pub no_new_privileges: bool,
}

/// Specification of an ephemeral container assembled from stored layers.
///
/// `app_dir` and the optional `runtime_dir` are projected into the base
/// rootfs at the distribution's conventional locations
/// (`/opt/apps/<id>/files` and `/runtime`); `base_dir` is the root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub container_id: String,
    pub app_id: String,
    pub app_dir: PathBuf,
    pub runtime_dir: Option<PathBuf>,
    pub base_dir: PathBuf,
    pub mounts: Vec<BindMount>,
    pub process: ContainerProcess,
}

/// Driver for one-shot containers. Implementations must be safe to call from
/// the registry's worker threads.
pub trait ContainerDriver: Send + Sync {
    fn name(&self) -> &str;

    fn available(&self) -> bool;

    /// Create the container, run its process to completion and clean up.
    /// A non-zero process exit is an error.
    fn run(&self, spec: &ContainerSpec) -> Result<(), RuntimeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_serde_roundtrip() {
        let spec = ContainerSpec {
            container_id: "org.example.calc".to_owned(),
            app_id: "org.example.calc".to_owned(),
            app_dir: PathBuf::from("/store/layers/app/files"),
            runtime_dir: None,
            base_dir: PathBuf::from("/store/layers/base/files"),
            mounts: vec![BindMount {
                source: PathBuf::from("/store/cache/abc"),
                destination: PathBuf::from("/run/stratum/cache"),
                read_only: false,
            }],
            process: ContainerProcess {
                args: vec!["bash".to_owned(), "-c".to_owned(), "true".to_owned()],
                cwd: "/".to_owned(),
                no_new_privileges: true,
            },
        };
        let json = serde_json::to_string(&spec).unwrap();
        let back: ContainerSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }
}
