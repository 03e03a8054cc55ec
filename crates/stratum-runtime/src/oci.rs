use crate::driver::{ContainerDriver, ContainerSpec};
use crate::RuntimeError;
use std::path::Path;
use std::process::Command;
use tracing::debug;

/// Driver backed by an installed OCI runtime (crun, runc or youki).
///
/// For each `run` it assembles a bundle directory with a generated
/// `config.json`, invokes `<runtime> run`, and force-deletes any lingering
/// container state afterwards.
#[derive(Default)]
pub struct OciDriver;

impl OciDriver {
    pub fn new() -> Self {
        Self
    }

    fn find_runtime() -> Option<String> {
        for candidate in &["crun", "runc", "youki"] {
            if let Ok(output) = Command::new(candidate).arg("--version").output() {
                if output.status.success() {
                    return Some((*candidate).to_owned());
                }
            }
        }
        None
    }

    fn generate_config(spec: &ContainerSpec) -> String {
        let mut mounts = Vec::new();
        mounts.push(r#"{"destination":"/proc","type":"proc","source":"proc"}"#.to_owned());
        mounts.push(
            r#"{"destination":"/dev","type":"tmpfs","source":"tmpfs","options":["nosuid","strictatime","mode=755","size=65536k"]}"#
                .to_owned(),
        );
        mounts.push(
            r#"{"destination":"/sys","type":"sysfs","source":"sysfs","options":["nosuid","noexec","nodev","ro"]}"#
                .to_owned(),
        );

        // Layer projection: app payload and runtime over the base rootfs.
        mounts.push(bind_json(
            &spec.app_dir,
            Path::new(&format!("/opt/apps/{}/files", spec.app_id)),
            true,
        ));
        if let Some(runtime_dir) = &spec.runtime_dir {
            mounts.push(bind_json(runtime_dir, Path::new("/runtime"), true));
        }
        for mount in &spec.mounts {
            mounts.push(bind_json(&mount.source, &mount.destination, mount.read_only));
        }

        let args_json = spec
            .process
            .args
            .iter()
            .map(|a| format!("\"{}\"", a.replace('"', "\\\"")))
            .collect::<Vec<_>>()
            .join(",");
        let mounts_json = mounts.join(",");
        let cwd = &spec.process.cwd;
        let no_new_privileges = spec.process.no_new_privileges;
        let base = spec.base_dir.display();

        format!(
            r#"{{
  "ociVersion": "1.0.2",
  "process": {{
    "terminal": false,
    "user": {{ "uid": 0, "gid": 0 }},
    "args": [{args_json}],
    "env": ["PATH=/usr/local/bin:/usr/bin:/bin", "STRATUM_CONTAINER=1"],
    "cwd": "{cwd}",
    "noNewPrivileges": {no_new_privileges}
  }},
  "root": {{
    "path": "{base}",
    "readonly": true
  }},
  "hostname": "stratum",
  "mounts": [{mounts_json}],
  "linux": {{
    "namespaces": [
      {{"type":"pid"}},
      {{"type":"mount"}},
      {{"type":"ipc"}},
      {{"type":"uts"}}
    ]
  }}
}}"#
        )
    }
}

fn bind_json(source: &Path, destination: &Path, read_only: bool) -> String {
    let options = if read_only {
        "\"rbind\",\"ro\""
    } else {
        "\"rbind\",\"rw\""
    };
    format!(
        r#"{{"destination":"{}","type":"bind","source":"{}","options":[{}]}}"#,
        destination.display(),
        source.display(),
        options
    )
}

impl ContainerDriver for OciDriver {
    fn name(&self) -> &str {
        "oci"
    }

    fn available(&self) -> bool {
        Self::find_runtime().is_some()
    }

    fn run(&self, spec: &ContainerSpec) -> Result<(), RuntimeError> {
        let runtime = Self::find_runtime().ok_or(RuntimeError::RuntimeUnavailable)?;

        let bundle = tempfile::tempdir()?;
        std::fs::write(
            bundle.path().join("config.json"),
            Self::generate_config(spec),
        )?;

        let container_id = format!("stratum-{}", spec.container_id);
        debug!("running cache container {container_id} via {runtime}");

        let status = Command::new(&runtime)
            .args([
                "run",
                "--bundle",
                &bundle.path().to_string_lossy(),
                &container_id,
            ])
            .status()
            .map_err(|e| RuntimeError::ExecFailed(format!("{runtime} run failed: {e}")))?;

        // Clean up lingering container state regardless of outcome.
        let _ = Command::new(&runtime)
            .args(["delete", "--force", &container_id])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status();

        if status.success() {
            Ok(())
        } else {
            Err(RuntimeError::NonZeroExit(status.code().unwrap_or(1)))
        }
    }
}
