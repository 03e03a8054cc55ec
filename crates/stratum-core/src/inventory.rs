use crate::Error;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use stratum_schema::Reference;
use tracing::debug;

/// State record the container runtime writes for every running container,
/// one file per process under `<state_root>/<user>/<pid>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerState {
    /// Canonical reference string of the application the container runs.
    pub app: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
}

/// Read-only view of the running containers.
///
/// The container runtime is the sole writer of the state tree; the daemon
/// only enumerates it. Files whose process has already exited are ignored but
/// never deleted, cleanup belongs to the runtime.
pub struct Inventory {
    state_root: PathBuf,
    proc_root: PathBuf,
}

impl Inventory {
    pub fn new(state_root: impl Into<PathBuf>) -> Self {
        Self {
            state_root: state_root.into(),
            proc_root: PathBuf::from("/proc"),
        }
    }

    /// Test constructor with a fake `/proc`.
    pub fn with_proc_root(state_root: impl Into<PathBuf>, proc_root: impl Into<PathBuf>) -> Self {
        Self {
            state_root: state_root.into(),
            proc_root: proc_root.into(),
        }
    }

    pub fn list_running(&self) -> Result<Vec<ContainerState>, Error> {
        let mut result = Vec::new();

        let users = match fs::read_dir(&self.state_root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(result),
            Err(e) => {
                return Err(Error::InventoryUnreadable(format!(
                    "cannot list {}: {e}",
                    self.state_root.display()
                )));
            }
        };

        for user in users {
            let user = map_entry(user, &self.state_root)?;
            if !user.path().is_dir() {
                continue;
            }

            let processes = fs::read_dir(user.path()).map_err(|e| {
                Error::InventoryUnreadable(format!("cannot list {}: {e}", user.path().display()))
            })?;
            for process in processes {
                let process = map_entry(process, &user.path())?;
                if !process.path().is_file() {
                    continue;
                }

                let pid = process.file_name().to_string_lossy().to_string();
                if !self.proc_root.join(&pid).exists() {
                    debug!(
                        "ignoring {}: corresponding process is gone",
                        process.path().display()
                    );
                    continue;
                }

                let content = fs::read_to_string(process.path()).map_err(|e| {
                    Error::InventoryUnreadable(format!(
                        "cannot read {}: {e}",
                        process.path().display()
                    ))
                })?;
                let state: ContainerState = serde_json::from_str(&content).map_err(|e| {
                    Error::InventoryUnreadable(format!(
                        "cannot parse {}: {e}",
                        process.path().display()
                    ))
                })?;
                result.push(state);
            }
        }

        Ok(result)
    }

    /// Whether any running container was launched from `reference`.
    pub fn is_reference_busy(&self, reference: &Reference) -> Result<bool, Error> {
        let wanted = reference.to_string();
        Ok(self
            .list_running()?
            .iter()
            .any(|state| state.app == wanted))
    }
}

fn map_entry(
    entry: std::io::Result<fs::DirEntry>,
    dir: &Path,
) -> Result<fs::DirEntry, Error> {
    entry.map_err(|e| Error::InventoryUnreadable(format!("cannot list {}: {e}", dir.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_schema::{Architecture, Version};

    fn reference() -> Reference {
        Reference::new(
            "stable",
            "org.example.calc",
            Version::parse("1.0.0").unwrap(),
            Architecture::X86_64,
        )
    }

    fn write_state(root: &Path, user: &str, pid: &str, app: &str) {
        let dir = root.join(user);
        fs::create_dir_all(&dir).unwrap();
        let state = ContainerState {
            app: app.to_owned(),
            container_id: None,
        };
        fs::write(dir.join(pid), serde_json::to_string(&state).unwrap()).unwrap();
    }

    fn setup() -> (tempfile::TempDir, tempfile::TempDir, Inventory) {
        let state = tempfile::tempdir().unwrap();
        let proc = tempfile::tempdir().unwrap();
        let inventory = Inventory::with_proc_root(state.path(), proc.path());
        (state, proc, inventory)
    }

    #[test]
    fn missing_state_root_is_empty() {
        let proc = tempfile::tempdir().unwrap();
        let inventory = Inventory::with_proc_root("/nonexistent/stratum-run", proc.path());
        assert!(inventory.list_running().unwrap().is_empty());
    }

    #[test]
    fn lists_containers_with_live_processes() {
        let (state, proc, inventory) = setup();
        write_state(state.path(), "1000", "4242", &reference().to_string());
        fs::create_dir_all(proc.path().join("4242")).unwrap();

        let running = inventory.list_running().unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].app, reference().to_string());
    }

    #[test]
    fn stale_files_are_ignored_but_kept() {
        let (state, _proc, inventory) = setup();
        write_state(state.path(), "1000", "4242", &reference().to_string());

        assert!(inventory.list_running().unwrap().is_empty());
        assert!(state.path().join("1000").join("4242").exists());
    }

    #[test]
    fn unparsable_state_is_an_error() {
        let (state, proc, inventory) = setup();
        fs::create_dir_all(state.path().join("1000")).unwrap();
        fs::write(state.path().join("1000").join("99"), "not json").unwrap();
        fs::create_dir_all(proc.path().join("99")).unwrap();

        assert!(matches!(
            inventory.list_running(),
            Err(Error::InventoryUnreadable(_))
        ));
    }

    #[test]
    fn busy_matches_canonical_string() {
        let (state, proc, inventory) = setup();
        write_state(state.path(), "1000", "7", &reference().to_string());
        fs::create_dir_all(proc.path().join("7")).unwrap();

        assert!(inventory.is_reference_busy(&reference()).unwrap());

        let other = Reference::new(
            "stable",
            "org.example.other",
            Version::parse("1.0.0").unwrap(),
            Architecture::X86_64,
        );
        assert!(!inventory.is_reference_busy(&other).unwrap());
    }
}
