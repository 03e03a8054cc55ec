use crate::interface::{PackageManagerService, DBUS_PATH};
use std::path::PathBuf;
use std::sync::Arc;
use stratum_core::{Event, EventSink, PackageManager, PackageManagerOptions};
use stratum_remote::SpoolSource;
use stratum_runtime::OciDriver;
use thiserror::Error;
use tracing::{info, warn};
use zbus::connection::Builder;

pub const BUS_NAME: &str = "org.stratum.PackageManager1";

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("D-Bus error: {0}")]
    Dbus(#[from] zbus::Error),
    #[error("engine error: {0}")]
    Core(#[from] stratum_core::Error),
}

/// Sink forwarding engine events into the async signal emitter.
pub struct ChannelSink {
    tx: tokio::sync::mpsc::UnboundedSender<Event>,
}

impl ChannelSink {
    pub fn new(tx: tokio::sync::mpsc::UnboundedSender<Event>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

pub struct ServiceOptions {
    pub store_root: PathBuf,
    pub run_root: PathBuf,
    pub generator_dir: PathBuf,
    /// Offline-mirror directory served as the default remote.
    pub remote_root: PathBuf,
}

/// Run the daemon on the session bus until terminated.
pub async fn run_service(options: ServiceOptions) -> Result<(), ServiceError> {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

    let remote = Arc::new(SpoolSource::open("stable", &options.remote_root));
    let manager = PackageManager::new(
        PackageManagerOptions::new(
            &options.store_root,
            remote,
            Arc::new(OciDriver::new()),
            Arc::new(ChannelSink::new(tx)),
        )
        .with_run_root(&options.run_root)
        .with_generator_dir(&options.generator_dir),
    )?;
    manager.start_deferred_timer();

    let connection = Builder::session()?
        .name(BUS_NAME)?
        .serve_at(DBUS_PATH, PackageManagerService::new(manager))?
        .build()
        .await?;

    info!("stratum daemon serving {BUS_NAME} at {DBUS_PATH}");

    tokio::spawn(forward_events(connection.clone(), rx));
    std::future::pending::<()>().await;
    Ok(())
}

/// Drain engine events and re-emit them as D-Bus signals.
async fn forward_events(
    connection: zbus::Connection,
    mut rx: tokio::sync::mpsc::UnboundedReceiver<Event>,
) {
    while let Some(event) = rx.recv().await {
        let Ok(iface) = connection
            .object_server()
            .interface::<_, PackageManagerService>(DBUS_PATH)
            .await
        else {
            continue;
        };
        let ctxt = iface.signal_context();

        let result = match &event {
            Event::TaskAdded { object_path } => {
                PackageManagerService::task_added(ctxt, object_path).await
            }
            Event::TaskChanged {
                object_path,
                state,
                sub_state,
                percentage,
                message,
            } => {
                PackageManagerService::task_changed(
                    ctxt,
                    object_path,
                    &state.to_string(),
                    &sub_state.to_string(),
                    *percentage,
                    message,
                )
                .await
            }
            Event::RequestInteraction {
                object_path,
                kind,
                request,
            } => {
                let payload = serde_json::to_string(request).unwrap_or_default();
                PackageManagerService::request_interaction(
                    ctxt,
                    object_path,
                    kind.as_str(),
                    &payload,
                )
                .await
            }
            Event::SearchFinished {
                job_id,
                packages,
                code,
                message,
            } => {
                let result = serde_json::json!({
                    "packages": packages,
                    "code": code,
                    "message": message,
                })
                .to_string();
                PackageManagerService::search_finished(ctxt, job_id, &result).await
            }
            Event::PruneFinished {
                job_id,
                removed,
                code,
                message,
            } => {
                let result = serde_json::json!({
                    "packages": removed,
                    "code": code,
                    "message": message,
                })
                .to_string();
                PackageManagerService::prune_finished(ctxt, job_id, &result).await
            }
            Event::GenerateCacheFinished { job_id, ok } => {
                PackageManagerService::generate_cache_finished(ctxt, job_id, *ok).await
            }
        };

        if let Err(e) = result {
            warn!("failed to emit signal: {e}");
        }
    }
}
