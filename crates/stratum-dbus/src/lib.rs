//! D-Bus surface of the stratum package-management daemon.
//!
//! Exposes the engine as `org.stratum.PackageManager1`: mutating verbs return
//! a task object path whose progress arrives as signals, long read-only jobs
//! return a job id with a matching `*Finished` signal. Payloads travel as
//! JSON strings in both directions.

pub mod interface;
pub mod service;

pub use interface::{PackageManagerService, API_VERSION, DBUS_INTERFACE, DBUS_PATH};
pub use service::{run_service, ChannelSink, ServiceError, ServiceOptions};
