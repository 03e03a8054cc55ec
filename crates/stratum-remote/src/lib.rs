//! Remote-repository support for stratum.
//!
//! The daemon's view of a remote is the `RemoteSource` trait defined by
//! `stratum-store`; this crate carries what sits around it: the repository
//! configuration exchanged over `GetConfiguration`/`SetConfiguration`, and an
//! in-memory source used by the engine test suites.

pub mod config;
pub mod memory;
pub mod spool;

pub use config::RepoConfig;
pub use memory::MemorySource;
pub use spool::SpoolSource;
