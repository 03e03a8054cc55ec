use std::path::PathBuf;
use stratum_dbus::ServiceOptions;
use tracing::info;

fn env_path(name: &str, default: &str) -> PathBuf {
    std::env::var(name).map_or_else(|_| PathBuf::from(default), PathBuf::from)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("STRATUM_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .without_time()
        .init();

    let options = ServiceOptions {
        store_root: env_path("STRATUM_ROOT", "/var/lib/stratum"),
        run_root: env_path("STRATUM_RUN_ROOT", "/run/stratum"),
        generator_dir: env_path("STRATUM_GENERATOR_DIR", "/usr/libexec/stratum"),
        remote_root: env_path("STRATUM_REMOTE_ROOT", "/var/lib/stratum/remote"),
    };

    info!(
        "stratum daemon starting, store: {}",
        options.store_root.display()
    );
    stratum_dbus::run_service(options).await?;

    Ok(())
}
