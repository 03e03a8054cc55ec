use crate::driver::{ContainerDriver, ContainerSpec};
use crate::RuntimeError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Recording driver for tests. Every accepted spec is kept for inspection
/// and failures can be injected to exercise cache-generation rollback.
#[derive(Default)]
pub struct MockDriver {
    runs: Mutex<Vec<ContainerSpec>>,
    fail_next: AtomicBool,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `run` exit non-zero.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn runs(&self) -> Vec<ContainerSpec> {
        self.runs.lock().unwrap().clone()
    }

    pub fn run_count(&self) -> usize {
        self.runs.lock().unwrap().len()
    }
}

impl ContainerDriver for MockDriver {
    fn name(&self) -> &str {
        "mock"
    }

    fn available(&self) -> bool {
        true
    }

    fn run(&self, spec: &ContainerSpec) -> Result<(), RuntimeError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(RuntimeError::NonZeroExit(1));
        }
        self.runs.lock().unwrap().push(spec.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::ContainerProcess;
    use std::path::PathBuf;

    fn spec() -> ContainerSpec {
        ContainerSpec {
            container_id: "id".to_owned(),
            app_id: "id".to_owned(),
            app_dir: PathBuf::from("/app"),
            runtime_dir: None,
            base_dir: PathBuf::from("/base"),
            mounts: Vec::new(),
            process: ContainerProcess {
                args: vec!["true".to_owned()],
                cwd: "/".to_owned(),
                no_new_privileges: true,
            },
        }
    }

    #[test]
    fn records_successful_runs() {
        let driver = MockDriver::new();
        driver.run(&spec()).unwrap();
        driver.run(&spec()).unwrap();
        assert_eq!(driver.run_count(), 2);
    }

    #[test]
    fn injected_failure_fires_once() {
        let driver = MockDriver::new();
        driver.fail_next();
        assert!(driver.run(&spec()).is_err());
        assert!(driver.run(&spec()).is_ok());
        assert_eq!(driver.run_count(), 1);
    }
}
