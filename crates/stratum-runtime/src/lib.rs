//! Container runtime drivers for stratum.
//!
//! The daemon never runs application containers itself; it only needs to run
//! short-lived cache-generation containers assembled from stored layers. This
//! crate defines the `ContainerDriver` seam, an OCI driver shelling out to
//! crun/runc/youki with a generated bundle, and a mock driver for the engine
//! test suites.

pub mod driver;
pub mod mock;
pub mod oci;

pub use driver::{BindMount, ContainerDriver, ContainerProcess, ContainerSpec};
pub use mock::MockDriver;
pub use oci::OciDriver;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no OCI runtime found (crun/runc/youki)")]
    RuntimeUnavailable,
    #[error("container execution failed: {0}")]
    ExecFailed(String),
    #[error("container exited with code {0}")]
    NonZeroExit(i32),
}
