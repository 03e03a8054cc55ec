use crate::bundle::{ArchiveBundle, LayerBundle};
use crate::cache;
use crate::events::{Event, EventSink, InteractionKind, InteractionReply, InteractionRequest};
use crate::inventory::Inventory;
use crate::lock::RepoLock;
use crate::registry::{JobQueue, TaskRegistry};
use crate::task::{State, SubState, Task};
use crate::transaction::Transaction;
use crate::Error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use stratum_remote::RepoConfig;
use stratum_runtime::ContainerDriver;
use stratum_schema::{
    module_is_binary, modules_equivalent, Architecture, FuzzyReference, PackageInfo, PackageKind,
    Reference, Version,
};
use stratum_store::{LayerItem, LayerRepo, RemoteSource, RepoQuery, ResolveOptions, StoreLayout};
use tracing::{debug, error, info, warn};

const DEFERRED_TIMEOUT_ENV: &str = "STRATUM_DEFERRED_TIMEOUT";
const DEFAULT_DEFERRED_TIMEOUT: Duration = Duration::from_secs(3600);

/// Package selector in client parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallOptions {
    pub force: bool,
    pub skip_interaction: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstallParameters {
    pub package: PackageRequest,
    #[serde(default)]
    pub options: InstallOptions,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UninstallParameters {
    pub package: PackageRequest,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateParameters {
    pub packages: Vec<PackageRequest>,
}

/// Reply for task-producing verbs.
#[derive(Debug, Clone, Serialize)]
pub struct TaskReply {
    pub task_object_path: String,
    pub code: i64,
    pub message: String,
}

/// Reply for job-producing verbs (search, prune, cache generation).
#[derive(Debug, Clone, Serialize)]
pub struct JobReply {
    pub job_id: String,
    pub code: i64,
    pub message: String,
}

pub struct PackageManagerOptions {
    pub store_root: PathBuf,
    /// Runtime directory carrying the repository lock file and the
    /// live-container inventory (`/run/stratum` in production).
    pub run_root: PathBuf,
    /// Host directory with the in-image cache generators.
    pub generator_dir: PathBuf,
    pub remote: Arc<dyn RemoteSource>,
    pub driver: Arc<dyn ContainerDriver>,
    pub events: Arc<dyn EventSink>,
}

impl PackageManagerOptions {
    pub fn new(
        store_root: impl Into<PathBuf>,
        remote: Arc<dyn RemoteSource>,
        driver: Arc<dyn ContainerDriver>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store_root: store_root.into(),
            run_root: PathBuf::from("/run/stratum"),
            generator_dir: PathBuf::from("/usr/libexec/stratum"),
            remote,
            driver,
            events,
        }
    }

    pub fn with_run_root(mut self, run_root: impl Into<PathBuf>) -> Self {
        self.run_root = run_root.into();
        self
    }

    pub fn with_generator_dir(mut self, generator_dir: impl Into<PathBuf>) -> Self {
        self.generator_dir = generator_dir.into();
        self
    }
}

/// The mutation engine.
///
/// Owns the layer store handle, the task registry and the job queues. Every
/// mutating verb validates synchronously, allocates a task and returns; the
/// mutation worker executes the plan under the repository lock.
pub struct PackageManager {
    /// Self-handle so plans and rollback closures can outlive the borrow
    /// that spawned them.
    this: Weak<PackageManager>,
    repo: LayerRepo,
    driver: Arc<dyn ContainerDriver>,
    inventory: Inventory,
    registry: TaskRegistry,
    events: Arc<dyn EventSink>,
    search_queue: JobQueue,
    prune_queue: JobQueue,
    generator_queue: JobQueue,
    config: Mutex<RepoConfig>,
    lock_path: PathBuf,
    generator_dir: PathBuf,
}

impl PackageManager {
    pub fn new(options: PackageManagerOptions) -> Result<Arc<Self>, Error> {
        let layout = StoreLayout::new(&options.store_root);
        let repo = LayerRepo::new(layout.clone(), options.remote);
        repo.initialize()
            .map_err(|e| Error::Internal(format!("cannot initialize store: {e}")))?;

        let config = RepoConfig::load(&layout.config_file())
            .map_err(|e| Error::Internal(format!("cannot load configuration: {e}")))?;

        Ok(Arc::new_cyclic(|this| Self {
            this: this.clone(),
            repo,
            driver: options.driver,
            inventory: Inventory::new(&options.run_root),
            registry: TaskRegistry::new(options.events.clone()),
            events: options.events,
            search_queue: JobQueue::new("search"),
            prune_queue: JobQueue::new("prune"),
            generator_queue: JobQueue::new("generator"),
            config: Mutex::new(config),
            lock_path: options.run_root.join("lock"),
            generator_dir: options.generator_dir,
        }))
    }

    fn arc(&self) -> Arc<Self> {
        self.this.upgrade().expect("engine handle outlived the engine")
    }

    pub fn repo(&self) -> &LayerRepo {
        &self.repo
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Interval between deferred-uninstall ticks, overridable through the
    /// environment.
    pub fn deferred_interval() -> Duration {
        match std::env::var(DEFERRED_TIMEOUT_ENV) {
            Ok(value) => match value.parse::<u64>() {
                Ok(secs) => Duration::from_secs(secs),
                Err(e) => {
                    warn!("failed to parse {DEFERRED_TIMEOUT_ENV}[{value}]: {e}");
                    DEFAULT_DEFERRED_TIMEOUT
                }
            },
            Err(_) => DEFAULT_DEFERRED_TIMEOUT,
        }
    }

    /// Start the periodic deferred-uninstall tick. Each tick rides the
    /// mutation queue so it serializes with task plans. The timer stops when
    /// the engine is dropped.
    pub fn start_deferred_timer(&self) {
        let interval = Self::deferred_interval();
        info!("deferred uninstall interval: {}s", interval.as_secs());
        let weak = self.this.clone();
        std::thread::Builder::new()
            .name("stratum-deferred".to_owned())
            .spawn(move || loop {
                std::thread::sleep(interval);
                let Some(pm) = weak.upgrade() else {
                    break;
                };
                let weak = Arc::downgrade(&pm);
                pm.registry.run_job(move || {
                    if let Some(pm) = weak.upgrade() {
                        pm.deferred_uninstall();
                    }
                });
            })
            .expect("failed to spawn deferred-uninstall timer");
    }

    // --- helpers ---

    fn fuzzy_from_request(package: &PackageRequest) -> Result<FuzzyReference, Error> {
        if package.id.is_empty() {
            return Err(Error::InvalidArgument("package id is required".to_owned()));
        }
        let version = package
            .version
            .as_deref()
            .map(Version::parse)
            .transpose()?;
        Ok(FuzzyReference {
            channel: package.channel.clone(),
            id: package.id.clone(),
            version,
            arch: None,
        })
    }

    fn ref_spec(&self, repo_name: &str, reference: &Reference, module: &str) -> String {
        format!(
            "{repo_name}:{}/{}/{}/{}",
            reference.channel, reference.id, reference.arch, module
        )
    }

    fn enqueue_mutation(
        &self,
        ref_specs: Vec<String>,
        queued_message: &str,
        plan: impl FnOnce(&Arc<Self>, &Task) + Send + 'static,
    ) -> Result<Task, Error> {
        let pm = self.arc();
        let task = self.registry.add_task(ref_specs, move |task| {
            let _guard = match RepoLock::try_acquire(&pm.lock_path) {
                Ok(guard) => guard,
                Err(e) => {
                    task.report_error(&e);
                    return;
                }
            };
            plan(&pm, task);
        })?;
        task.update_state(State::Queued, queued_message);
        Ok(task)
    }

    fn task_reply(task: &Task, message: impl Into<String>) -> TaskReply {
        TaskReply {
            task_object_path: task.object_path().to_owned(),
            code: 0,
            message: message.into(),
        }
    }

    fn generate_cache_for(&self, reference: &Reference) -> Result<(), Error> {
        cache::generate_cache(&self.repo, self.driver.as_ref(), reference, &self.generator_dir)
    }

    fn remove_cache_for(&self, reference: &Reference) -> Result<(), Error> {
        cache::remove_cache(&self.repo, reference)
    }

    /// Map requested module labels to the spellings actually stored for
    /// `reference`, bridging binary/runtime.
    fn stored_modules(&self, reference: &Reference, wanted: &[String]) -> Vec<String> {
        self.repo
            .get_module_list(reference)
            .into_iter()
            .filter(|stored| wanted.iter().any(|w| modules_equivalent(w, stored)))
            .collect()
    }

    fn has_binary_layer(&self, reference: &Reference) -> bool {
        self.repo.get_layer_dir(reference, "binary", None).is_ok()
            || self.repo.get_layer_dir(reference, "runtime", None).is_ok()
    }

    // --- Install (remote) ---

    pub fn install(&self, parameters: InstallParameters) -> Result<TaskReply, Error> {
        let fuzzy = Self::fuzzy_from_request(&parameters.package)?;
        let module = parameters
            .package
            .module
            .clone()
            .unwrap_or_else(|| "binary".to_owned());

        if module != "binary" {
            return self.install_module(fuzzy, module);
        }

        // A pinned version that already resolves locally is a no-op.
        if fuzzy.version.is_some()
            && self
                .repo
                .resolve_reference(&fuzzy, ResolveOptions::default(), None)
                .is_ok()
        {
            return Err(Error::AlreadyInstalled(fuzzy.to_string()));
        }

        // The currently installed reference with the same id, if any.
        let mut versionless = fuzzy.clone();
        versionless.version = None;
        let local_ref = self
            .repo
            .resolve_reference(&versionless, ResolveOptions::default(), None)
            .ok();

        let remote_ref = self
            .repo
            .resolve_reference(
                &fuzzy,
                ResolveOptions {
                    force_remote: true,
                    fallback_to_remote: false,
                },
                Some(&module),
            )
            .map_err(|e| Error::PullFailed(e.to_string()))?;

        let mut interaction = InteractionKind::Install;
        if let Some(local) = &local_ref {
            if remote_ref.version == local.version {
                return Err(Error::AlreadyInstalled(local.to_string()));
            }
            if remote_ref.version > local.version {
                interaction = InteractionKind::Upgrade;
            } else if !parameters.options.force {
                return Err(Error::DowngradeRequiresForce(format!(
                    "{}/{}",
                    remote_ref.id, remote_ref.version
                )));
            }
        }

        let request = InteractionRequest {
            local_ref: local_ref.as_ref().map(Reference::to_string),
            remote_ref: remote_ref.to_string(),
        };
        let ref_spec = self.ref_spec(self.repo.remote_name(), &remote_ref, &module);
        let reply_message = format!("{remote_ref} is now installing");
        let options = parameters.options;

        let task = self.enqueue_mutation(
            vec![ref_spec],
            "queued to install from remote",
            move |pm, task| {
                if interaction == InteractionKind::Upgrade && !options.skip_interaction {
                    let reply = task.request_interaction(InteractionKind::Upgrade, request);
                    if reply.action != "yes" {
                        task.update_state(State::Canceled, "canceled");
                    }
                }
                if task.is_done() {
                    return;
                }

                let modules = match &local_ref {
                    Some(local) => pm.repo.get_module_list(local),
                    None => vec![module.clone()],
                };
                pm.install_plan(task, &remote_ref, local_ref.as_ref(), &modules);
            },
        )?;

        Ok(Self::task_reply(&task, reply_message))
    }

    /// Install an auxiliary module for an already-installed application.
    fn install_module(
        &self,
        fuzzy: FuzzyReference,
        module: String,
    ) -> Result<TaskReply, Error> {
        // Modules always share the binary's version.
        if fuzzy.version.is_some() {
            return Err(Error::InvalidArgument(
                "cannot specify a version when installing a module".to_owned(),
            ));
        }

        let ref_spec = format!("{}/{}", fuzzy, module);
        let task = self.enqueue_mutation(
            vec![ref_spec],
            "queued to install module",
            move |pm, task| {
                let local = match pm
                    .repo
                    .resolve_reference(&fuzzy, ResolveOptions::default(), None)
                {
                    Ok(local) => local,
                    Err(_) => {
                        task.update_state(
                            State::Failed,
                            "to install the module, one must first install the app",
                        );
                        return;
                    }
                };
                if pm.repo.get_module_list(&local).contains(&module) {
                    task.update_state(
                        State::Failed,
                        format!("module {module} is already installed"),
                    );
                    return;
                }

                task.update_state(State::Processing, format!("installing {local}/{module}"));
                let mut txn = Transaction::new();
                pm.install_ref(task, &local, vec![module.clone()], &mut txn);
                if task.is_done() {
                    return;
                }
                if let Err(e) = pm.repo.merge_modules() {
                    error!("merge modules failed: {e}");
                }
                txn.commit();
                task.update_state(State::Succeed, format!("installed {local}/{module}"));
            },
        )?;

        Ok(Self::task_reply(&task, "installing"))
    }

    /// Shared install plan: pull the target with its dependencies, then swap
    /// exports and regenerate caches for applications.
    fn install_plan(
        &self,
        task: &Task,
        new_ref: &Reference,
        old_ref: Option<&Reference>,
        modules: &[String],
    ) {
        task.update_state(State::Processing, format!("installing {new_ref}"));

        // Only modules that exist remotely can be installed.
        let install_modules = match self.repo.get_remote_module_list(new_ref, modules) {
            Ok(modules) => modules,
            Err(e) => {
                task.report_error(&Error::PullFailed(e.to_string()));
                return;
            }
        };
        if install_modules.is_empty() {
            task.update_state(
                State::Failed,
                format!("these modules do not exist remotely: {}", modules.join(", ")),
            );
            return;
        }

        let mut txn = Transaction::new();
        {
            let pm = self.arc();
            let rollback_ref = new_ref.clone();
            let rollback_modules = install_modules.clone();
            txn.add_rollback(move || {
                let tmp = Task::temporary();
                let mut inner = Transaction::new();
                pm.uninstall_ref(&tmp, &rollback_ref, &rollback_modules, &mut inner);
                inner.commit();
            });
        }

        self.install_ref(task, new_ref, install_modules, &mut txn);
        if task.is_done() {
            return;
        }

        task.update_sub_state(SubState::PostAction, "processing after install");
        if let Err(e) = self.repo.merge_modules() {
            error!("merge modules failed: {e}");
        }

        let item = match self.repo.get_layer_item(new_ref) {
            Ok(item) => item,
            Err(e) => {
                task.report_error(&Error::Internal(format!(
                    "no layer item for {new_ref}: {e}"
                )));
                return;
            }
        };

        let is_app = item.info.kind == PackageKind::App;
        if is_app {
            if let Some(old) = old_ref {
                if let Err(e) = self.remove_after_install(old, new_ref, modules) {
                    task.update_state(
                        State::Failed,
                        format!("failed to remove old reference {old} after install {new_ref}: {e}"),
                    );
                    return;
                }
            }
        }

        // The layer commit is final from here on; a cache failure below
        // fails the task but leaves the store consistent.
        txn.commit();

        if is_app {
            if let Err(e) = self.generate_cache_for(new_ref) {
                task.update_state(State::Failed, format!("failed to generate cache: {e}"));
                return;
            }
            if old_ref.is_none() {
                if let Err(e) = self.repo.export_reference(new_ref) {
                    task.report_error(&Error::Internal(format!(
                        "cannot export {new_ref}: {e}"
                    )));
                    return;
                }
            }
        }

        task.update_state(State::Succeed, format!("installed {new_ref} successfully"));
    }

    /// Reconcile previously marked-deleted items with fresh installs, then
    /// pull the remaining modules and their dependencies.
    fn install_ref(
        &self,
        task: &Task,
        reference: &Reference,
        mut modules: Vec<String>,
        txn: &mut Transaction,
    ) {
        task.update_sub_state(SubState::PreAction, "beginning to install");

        let host = match Architecture::host() {
            Ok(host) => host,
            Err(e) => {
                task.report_error(&Error::Internal(e.to_string()));
                return;
            }
        };
        if reference.arch != host {
            task.report_error(&Error::ArchMismatch {
                found: reference.arch.to_string(),
                host: host.to_string(),
            });
            return;
        }

        task.update_sub_state(
            SubState::InstallApplication,
            format!("installing application {reference}"),
        );

        let deleted = match self.repo.list_local(&RepoQuery {
            id: Some(reference.id.clone()),
            channel: Some(reference.channel.clone()),
            version: Some(reference.version.to_string()),
            deleted: Some(true),
        }) {
            Ok(deleted) => deleted,
            Err(e) => {
                task.report_error(&Error::Internal(e.to_string()));
                return;
            }
        };

        // A deferred-deleted layer that matches a requested module is simply
        // resurrected instead of re-pulled.
        for item in &deleted {
            if task.is_done() {
                return;
            }
            let Some(position) = modules
                .iter()
                .position(|module| modules_equivalent(module, &item.info.module))
            else {
                continue;
            };

            if let Err(e) = self
                .repo
                .mark_deleted(reference, false, &item.info.module)
            {
                error!("failed to clear deleted flag on {reference}: {e}");
                task.update_state(State::Failed, "install failed");
                return;
            }
            {
                let pm = self.arc();
                let reference = reference.clone();
                let module = item.info.module.clone();
                txn.add_rollback(move || {
                    if let Err(e) = pm.repo.mark_deleted(&reference, true, &module) {
                        warn!("failed to rollback deleted flag on {reference}: {e}");
                    }
                });
            }
            modules.remove(position);
        }

        for module in modules {
            if task.is_done() {
                return;
            }

            if let Err(e) = self.repo.pull(task, reference, &module) {
                task.report_error(&Error::PullFailed(e.to_string()));
                return;
            }
            if task.is_done() {
                return;
            }
            {
                let pm = self.arc();
                let reference = reference.clone();
                let module = module.clone();
                txn.add_rollback(move || {
                    if let Err(e) = pm.repo.remove(&reference, &module, None) {
                        error!("rollback remove of {reference}/{module} failed: {e}");
                    }
                });
            }

            if !module_is_binary(&module) {
                continue;
            }

            let item = match self.repo.get_layer_item(reference) {
                Ok(item) => item,
                Err(e) => {
                    task.report_error(&Error::Internal(e.to_string()));
                    return;
                }
            };
            // Dependencies always come in through their binary payload.
            self.pull_dependency(task, &item.info, "binary", txn);
            if task.is_done() {
                return;
            }
        }
    }

    /// Resolve and pull the declared runtime and base of an application.
    fn pull_dependency(
        &self,
        task: &Task,
        info: &PackageInfo,
        module: &str,
        txn: &mut Transaction,
    ) {
        if info.kind != PackageKind::App || !module_is_binary(module) {
            return;
        }

        let resolve = ResolveOptions {
            force_remote: false,
            fallback_to_remote: true,
        };

        if let Some(runtime) = &info.runtime {
            let fuzzy = match FuzzyReference::parse(runtime) {
                Ok(fuzzy) => fuzzy,
                Err(e) => {
                    task.report_error(&Error::InvalidArgument(e.to_string()));
                    return;
                }
            };
            let runtime_ref = match self.repo.resolve_reference(&fuzzy, resolve, None) {
                Ok(reference) => reference,
                Err(e) => {
                    task.report_error(&Error::DependencyMissing(format!("'{runtime}': {e}")));
                    return;
                }
            };

            task.update_sub_state(
                SubState::InstallRuntime,
                format!("installing runtime {runtime_ref}"),
            );
            if !self.has_binary_layer(&runtime_ref) {
                if task.is_done() {
                    return;
                }
                if let Err(e) = self.repo.pull(task, &runtime_ref, module) {
                    task.report_error(&Error::PullFailed(e.to_string()));
                    return;
                }
                if task.is_done() {
                    return;
                }
                let pm = self.arc();
                let module = module.to_owned();
                txn.add_rollback(move || {
                    if let Err(e) = pm.repo.remove(&runtime_ref, &module, None) {
                        error!("rollback remove of runtime failed: {e}");
                    }
                });
            }
        }

        let Some(base) = &info.base else {
            task.report_error(&Error::DependencyMissing(format!(
                "{} declares no base",
                info.id
            )));
            return;
        };
        let fuzzy = match FuzzyReference::parse(base) {
            Ok(fuzzy) => fuzzy,
            Err(e) => {
                task.report_error(&Error::InvalidArgument(e.to_string()));
                return;
            }
        };
        let base_ref = match self.repo.resolve_reference(&fuzzy, resolve, None) {
            Ok(reference) => reference,
            Err(e) => {
                task.report_error(&Error::DependencyMissing(format!("'{base}': {e}")));
                return;
            }
        };

        task.update_sub_state(SubState::InstallBase, format!("installing base {base_ref}"));
        if !self.has_binary_layer(&base_ref) {
            if task.is_done() {
                return;
            }
            if let Err(e) = self.repo.pull(task, &base_ref, module) {
                task.report_error(&Error::PullFailed(e.to_string()));
                return;
            }
            if task.is_done() {
                return;
            }
            let pm = self.arc();
            let module = module.to_owned();
            txn.add_rollback(move || {
                if let Err(e) = pm.repo.remove(&base_ref, &module, None) {
                    error!("rollback remove of base failed: {e}");
                }
            });
        }
    }

    /// Retire `old` after `new` landed. In-use references are marked for
    /// deferred deletion; idle ones are removed immediately and the export
    /// moves to `new` atomically with the removal.
    fn remove_after_install(
        &self,
        old: &Reference,
        new: &Reference,
        modules: &[String],
    ) -> Result<(), Error> {
        let busy = self.inventory.is_reference_busy(old)?;
        let stored = self.stored_modules(old, modules);
        let mut txn = Transaction::new();

        if busy {
            for module in &stored {
                self.repo.mark_deleted(old, true, module).map_err(|e| {
                    Error::Internal(format!("failed to mark {old}/{module} deleted: {e}"))
                })?;
                let pm = self.arc();
                let old = old.clone();
                let module = module.clone();
                txn.add_rollback(move || {
                    if let Err(e) = pm.repo.mark_deleted(&old, false, &module) {
                        warn!("failed to rollback deleted mark on {old}/{module}: {e}");
                    }
                });
            }
            // Launch paths see the replacement right away; the old layers
            // stay on disk until the deferred tick collects them.
            self.repo
                .export_reference(new)
                .map_err(|e| Error::Internal(format!("cannot export {new}: {e}")))?;
            txn.commit();
            return Ok(());
        }

        self.repo
            .unexport_reference(old)
            .map_err(|e| Error::Internal(format!("cannot unexport {old}: {e}")))?;
        {
            let pm = self.arc();
            let old = old.clone();
            txn.add_rollback(move || {
                if let Err(e) = pm.repo.export_reference(&old) {
                    warn!("failed to rollback export of {old}: {e}");
                }
            });
        }

        for module in &stored {
            if module_is_binary(module) {
                if let Err(e) = self.remove_cache_for(old) {
                    error!("{e}");
                }
            }
            self.repo
                .remove(old, module, None)
                .map_err(|e| Error::RemoveFailed(e.to_string()))?;

            let pm = self.arc();
            let old = old.clone();
            let module = module.clone();
            txn.add_rollback(move || {
                let tmp = Task::temporary();
                if let Err(e) = pm.repo.pull(&tmp, &old, &module) {
                    warn!("failed to rollback removal of {old}/{module}: {e}");
                    return;
                }
                if module_is_binary(&module) {
                    if let Err(e) = pm.generate_cache_for(&old) {
                        error!("{e}");
                    }
                }
            });
        }

        if let Err(e) = self.repo.merge_modules() {
            error!("merge modules failed: {e}");
        }
        self.repo
            .export_reference(new)
            .map_err(|e| Error::Internal(format!("cannot export {new}: {e}")))?;

        txn.commit();
        Ok(())
    }

    // --- Uninstall ---

    pub fn uninstall(
        &self,
        parameters: UninstallParameters,
    ) -> Result<TaskReply, Error> {
        let fuzzy = Self::fuzzy_from_request(&parameters.package)?;
        let reference = self
            .repo
            .resolve_reference(&fuzzy, ResolveOptions::default(), None)
            .map_err(|_| Error::NotInstalled(fuzzy.to_string()))?;

        if self.inventory.is_reference_busy(&reference)? {
            return Err(Error::InUse(reference.to_string()));
        }

        let module = parameters
            .package
            .module
            .clone()
            .unwrap_or_else(|| "binary".to_owned());
        let ref_spec = self.ref_spec(self.repo.remote_name(), &reference, &module);
        let reply_message = format!("{reference} is now uninstalling");

        let task = self.enqueue_mutation(vec![ref_spec], "queued to uninstall", move |pm, task| {
            if task.is_done() {
                return;
            }
            pm.uninstall_plan(task, &reference, &module);
        })?;

        Ok(Self::task_reply(&task, reply_message))
    }

    fn uninstall_plan(&self, task: &Task, reference: &Reference, module: &str) {
        task.update_state(State::Processing, "start to uninstall package");
        task.update_sub_state(SubState::PreAction, "prepare uninstalling package");

        let mut removed_modules = vec![module.to_owned()];
        let mut txn = Transaction::new();

        // Removing the binary payload takes every module with it.
        if module_is_binary(module) {
            removed_modules = self.repo.get_module_list(reference);
            if let Err(e) = self.repo.unexport_reference(reference) {
                task.report_error(&Error::Internal(format!(
                    "cannot unexport {reference}: {e}"
                )));
                return;
            }
            let pm = self.arc();
            let reference = reference.clone();
            txn.add_rollback(move || {
                if let Err(e) = pm.repo.export_reference(&reference) {
                    warn!("failed to rollback unexport of {reference}: {e}");
                }
            });
        }

        self.uninstall_ref(task, reference, &removed_modules, &mut txn);
        if task.is_done() {
            return;
        }

        txn.commit();
        if let Err(e) = self.repo.merge_modules() {
            error!("merge modules failed: {e}");
        }
        task.update_state(
            State::Succeed,
            format!("uninstalled {reference} successfully"),
        );
    }

    fn uninstall_ref(
        &self,
        task: &Task,
        reference: &Reference,
        modules: &[String],
        txn: &mut Transaction,
    ) {
        if task.is_done() {
            return;
        }
        task.update_sub_state(SubState::Uninstall, "removing layer files");

        for module in modules {
            if module_is_binary(module) {
                if let Err(e) = self.remove_cache_for(reference) {
                    error!("{e}");
                }
            }
            if let Err(e) = self.repo.remove(reference, module, None) {
                task.report_error(&Error::RemoveFailed(e.to_string()));
                return;
            }

            let pm = self.arc();
            let reference = reference.clone();
            let module = module.clone();
            txn.add_rollback(move || {
                let tmp = Task::temporary();
                if let Err(e) = pm.repo.pull(&tmp, &reference, &module) {
                    error!("failed to rollback removal of {reference}/{module}: {e}");
                    return;
                }
                if module_is_binary(&module) {
                    if let Err(e) = pm.generate_cache_for(&reference) {
                        error!("{e}");
                    }
                }
            });
        }
    }

    // --- Update ---

    pub fn update(&self, parameters: UpdateParameters) -> Result<TaskReply, Error> {
        if parameters.packages.is_empty() {
            return Err(Error::InvalidArgument("no packages specified".to_owned()));
        }

        let mut upgrades = Vec::new();
        let mut ref_specs = Vec::new();
        for package in &parameters.packages {
            let fuzzy = Self::fuzzy_from_request(package)?;
            let local = self
                .repo
                .resolve_reference(&fuzzy, ResolveOptions::default(), None)
                .map_err(|_| Error::NotInstalled(fuzzy.to_string()))?;
            let item = self
                .repo
                .get_layer_item(&local)
                .map_err(|e| Error::Internal(format!("no layer item for {local}: {e}")))?;

            let new_ref = self.latest_remote_reference(item.info.kind, &fuzzy)?;
            if new_ref.version <= local.version {
                return Err(Error::AlreadyInstalled(format!(
                    "remote version is {}, the latest version {} is already installed",
                    new_ref.version, local.version
                )));
            }

            ref_specs.push(self.ref_spec(self.repo.remote_name(), &local, "binary"));
            upgrades.push((local, new_ref));
        }

        let task = self.enqueue_mutation(ref_specs, "queued to update", move |pm, task| {
            for (old, new) in &upgrades {
                if task.is_done() {
                    return;
                }
                info!("upgrading {old} to {new}");
                pm.update_one(task, old, new);
            }
            if !task.is_done() {
                task.update_state(State::Succeed, "update completed");
            }
        })?;

        Ok(Self::task_reply(&task, "updating"))
    }

    /// Applications may jump to any newer version; bases and runtimes only
    /// move within the version constraint the caller supplied.
    fn latest_remote_reference(
        &self,
        kind: PackageKind,
        fuzzy: &FuzzyReference,
    ) -> Result<Reference, Error> {
        let mut fuzzy = fuzzy.clone();
        if kind == PackageKind::App {
            fuzzy.version = None;
        }
        self.repo
            .resolve_reference(
                &fuzzy,
                ResolveOptions {
                    force_remote: true,
                    fallback_to_remote: false,
                },
                None,
            )
            .map_err(|e| Error::PullFailed(e.to_string()))
    }

    fn update_one(&self, task: &Task, old: &Reference, new: &Reference) {
        task.update_state(State::Processing, format!("upgrading {old} to {new}"));

        let modules = self.repo.get_module_list(old);
        let install_modules = match self.repo.get_remote_module_list(new, &modules) {
            Ok(modules) => modules,
            Err(e) => {
                task.report_error(&Error::PullFailed(e.to_string()));
                return;
            }
        };
        if install_modules.is_empty() {
            task.update_state(
                State::Failed,
                format!("these modules do not exist remotely: {}", modules.join(", ")),
            );
            return;
        }

        let mut txn = Transaction::new();
        self.install_ref(task, new, install_modules, &mut txn);
        if task.is_done() {
            return;
        }
        // The new version is in; whatever happens next must not undo it.
        txn.commit();

        task.update_state(
            State::PartCompleted,
            format!("upgrade {old} to {new} success"),
        );

        if self.inventory.is_reference_busy(old).unwrap_or(false) {
            // Work is logically complete; leave a summary without emitting.
            task.set_sub_state(SubState::PackageManagerDone);
            task.set_message(
                "Please restart the application after saving the data to experience the new version.",
            );
        }

        let item = match self.repo.get_layer_item(new) {
            Ok(item) => item,
            Err(e) => {
                error!("no layer item for {new} after upgrade: {e}");
                return;
            }
        };

        if item.info.kind == PackageKind::App {
            if let Err(e) = self.remove_after_install(old, new, &modules) {
                error!("remove after install of {old} failed: {e}");
                return;
            }
            if let Err(e) = self.generate_cache_for(new) {
                task.update_state(State::Failed, format!("failed to generate cache: {e}"));
                return;
            }
        }

        if let Err(e) = self.repo.merge_modules() {
            error!("merge modules failed: {e}");
        }
    }

    // --- Deferred uninstall ---

    /// One deferred-uninstall tick: physically remove marked-deleted layers
    /// whose references are no longer held by any running container.
    pub fn deferred_uninstall(&self) {
        let _guard = match RepoLock::try_acquire(&self.lock_path) {
            Ok(guard) => guard,
            Err(e) => {
                error!("failed to lock repository, deferred uninstall skipped: {e}");
                return;
            }
        };

        let deleted = match self.repo.list_local_deleted() {
            Ok(deleted) => deleted,
            Err(e) => {
                error!("failed to list deleted layers: {e}");
                return;
            }
        };

        let mut groups: BTreeMap<String, Vec<LayerItem>> = BTreeMap::new();
        for item in deleted {
            let Ok(reference) = item.reference() else {
                error!("underlying storage is broken, skipping deferred uninstall");
                return;
            };
            groups.entry(reference.to_string()).or_default().push(item);
        }
        if groups.is_empty() {
            return;
        }

        let running = match self.inventory.list_running() {
            Ok(running) => running,
            Err(e) => {
                error!("failed to get running containers: {e}");
                return;
            }
        };
        for state in &running {
            groups.remove(&state.app);
        }

        for (ref_str, items) in groups {
            let Ok(reference) = Reference::parse(&ref_str) else {
                error!("unparsable stored reference '{ref_str}'");
                continue;
            };

            if let Err(e) = self.repo.unexport_reference(&reference) {
                error!("cannot unexport {reference}: {e}");
            }
            for item in &items {
                if module_is_binary(&item.info.module) {
                    if let Err(e) = self.remove_cache_for(&reference) {
                        error!("{e}");
                    }
                }
                if let Err(e) =
                    self.repo
                        .remove(&reference, &item.info.module, item.subref.as_deref())
                {
                    error!("cannot remove {reference}/{}: {e}", item.info.module);
                }
            }
            if let Err(e) = self.repo.merge_modules() {
                error!("merge modules failed: {e}");
            }

            // A replacement installed meanwhile becomes visible again.
            let fuzzy = reference.fuzzy_without_version();
            match self
                .repo
                .resolve_reference(&fuzzy, ResolveOptions::default(), None)
            {
                Ok(latest) => {
                    if let Err(e) = self.repo.export_reference(&latest) {
                        error!("cannot export {latest}: {e}");
                    }
                }
                Err(e) => {
                    debug!("no remaining local reference for {}: {e}", reference.id);
                }
            }
        }
    }

    // --- Prune ---

    pub fn prune(&self) -> Result<JobReply, Error> {
        let job_id = uuid::Uuid::new_v4().to_string();
        let pm = self.arc();
        let job = job_id.clone();
        self.prune_queue.run(move || {
            let event = match pm.prune_internal() {
                Ok(removed) => Event::PruneFinished {
                    job_id: job.clone(),
                    removed,
                    code: 0,
                    message: String::new(),
                },
                Err(e) => Event::PruneFinished {
                    job_id: job.clone(),
                    removed: Vec::new(),
                    code: e.code(),
                    message: e.to_string(),
                },
            };
            pm.events.emit(event);
        });
        Ok(JobReply {
            job_id,
            code: 0,
            message: String::new(),
        })
    }

    /// Remove every base/runtime no application depends on, then let the
    /// store collect unreachable objects.
    fn prune_internal(&self) -> Result<Vec<PackageInfo>, Error> {
        let _guard = RepoLock::try_acquire(&self.lock_path)?;

        let items = self
            .repo
            .list_local(&RepoQuery::default())
            .map_err(|e| Error::Internal(e.to_string()))?;

        let mut refcount: BTreeMap<String, (Reference, u32)> = BTreeMap::new();
        for item in &items {
            if !module_is_binary(&item.info.module) {
                continue;
            }
            let Ok(reference) = item.reference() else {
                warn!("unparsable stored item for id {}", item.info.id);
                continue;
            };

            if item.info.kind != PackageKind::App {
                refcount.entry(reference.to_string()).or_insert((reference, 0));
                continue;
            }

            if let Some(runtime) = &item.info.runtime {
                self.count_dependency(&mut refcount, runtime);
            }
            if let Some(base) = &item.info.base {
                self.count_dependency(&mut refcount, base);
            }
        }

        let mut removed = Vec::new();
        for (ref_str, (reference, count)) in &refcount {
            if *count != 0 {
                continue;
            }
            // Dropping the binary payload takes the auxiliary modules along.
            for module in self.repo.get_module_list(reference) {
                for item in &items {
                    if item.info.module == module
                        && item
                            .reference()
                            .map(|r| r.to_string() == *ref_str)
                            .unwrap_or(false)
                    {
                        removed.push(item.info.clone());
                    }
                }
                self.repo
                    .remove(reference, &module, None)
                    .map_err(|e| Error::RemoveFailed(e.to_string()))?;
            }
        }

        if !refcount.is_empty() {
            if let Err(e) = self.repo.merge_modules() {
                error!("merge modules failed: {e}");
            }
        }
        self.repo
            .prune()
            .map_err(|e| Error::Internal(e.to_string()))?;

        Ok(removed)
    }

    fn count_dependency(
        &self,
        refcount: &mut BTreeMap<String, (Reference, u32)>,
        declared: &str,
    ) {
        let Ok(fuzzy) = FuzzyReference::parse(declared) else {
            warn!("unparsable dependency '{declared}'");
            return;
        };
        match self.repo.resolve_reference(
            &fuzzy,
            ResolveOptions {
                force_remote: false,
                fallback_to_remote: false,
            },
            None,
        ) {
            Ok(reference) => {
                refcount
                    .entry(reference.to_string())
                    .or_insert((reference, 0))
                    .1 += 1;
            }
            Err(e) => {
                warn!("cannot resolve dependency '{declared}': {e}");
            }
        }
    }

    // --- Search ---

    pub fn search(&self, id: &str) -> Result<JobReply, Error> {
        let fuzzy = FuzzyReference::parse(id)?;
        let job_id = uuid::Uuid::new_v4().to_string();
        let pm = self.arc();
        let job = job_id.clone();
        self.search_queue.run(move || {
            let event = match pm.repo.list_remote(&fuzzy) {
                Ok(packages) => Event::SearchFinished {
                    job_id: job.clone(),
                    packages,
                    code: 0,
                    message: String::new(),
                },
                Err(e) => {
                    warn!("list remote failed: {e}");
                    let error = Error::PullFailed(e.to_string());
                    Event::SearchFinished {
                        job_id: job.clone(),
                        packages: Vec::new(),
                        code: error.code(),
                        message: error.to_string(),
                    }
                }
            };
            pm.events.emit(event);
        });
        Ok(JobReply {
            job_id,
            code: 0,
            message: String::new(),
        })
    }

    // --- Cache generation ---

    pub fn generate_cache(&self, reference: &str) -> Result<JobReply, Error> {
        let reference = Reference::parse(reference)?;
        let job_id = uuid::Uuid::new_v4().to_string();
        let pm = self.arc();
        let job = job_id.clone();
        self.generator_queue.run(move || {
            let ok = match pm.generate_cache_for(&reference) {
                Ok(()) => true,
                Err(e) => {
                    error!("failed to generate cache for {reference}: {e}");
                    false
                }
            };
            pm.events.emit(Event::GenerateCacheFinished { job_id: job, ok });
        });
        Ok(JobReply {
            job_id,
            code: 0,
            message: String::new(),
        })
    }

    // --- Install from file ---

    pub fn install_from_file(
        &self,
        file: std::fs::File,
        file_type: &str,
        options: InstallOptions,
    ) -> Result<TaskReply, Error> {
        match file_type {
            "layer" => self.install_from_layer(file, options),
            "uab" => self.install_from_uab(file, options),
            other => Err(Error::InvalidArgument(format!(
                "'{other}' is an unsupported file type"
            ))),
        }
    }

    fn install_from_layer(
        &self,
        file: std::fs::File,
        options: InstallOptions,
    ) -> Result<TaskReply, Error> {
        let bundle = LayerBundle::open(file)?;
        let info = bundle.info().clone();

        let arch = Architecture::parse(&info.arch)?;
        let host = Architecture::host()?;
        if arch != host {
            return Err(Error::ArchMismatch {
                found: info.arch.clone(),
                host: host.to_string(),
            });
        }

        let package_ref = info.reference()?;
        let module = info.module.clone();

        let local_ref = self
            .repo
            .resolve_reference(
                &FuzzyReference::from_id(&info.id),
                ResolveOptions::default(),
                None,
            )
            .ok()
            .filter(|local| self.repo.get_layer_dir(local, &module, None).is_ok());

        let mut interaction = InteractionKind::Install;
        if let Some(local) = &local_ref {
            if package_ref.version == local.version {
                return Err(Error::AlreadyInstalled(local.to_string()));
            }
            if package_ref.version > local.version {
                interaction = InteractionKind::Upgrade;
            } else if !options.force {
                return Err(Error::DowngradeRequiresForce(format!(
                    "{}/{}",
                    package_ref.id, package_ref.version
                )));
            }
        }

        let request = InteractionRequest {
            local_ref: local_ref.as_ref().map(Reference::to_string),
            remote_ref: package_ref.to_string(),
        };
        let ref_spec = self.ref_spec("local", &package_ref, &module);
        let reply_message = format!("{package_ref} is now installing");

        let task = self.enqueue_mutation(
            vec![ref_spec],
            "queued to install from layer",
            move |pm, task| {
                if interaction == InteractionKind::Upgrade && !options.skip_interaction {
                    let reply = task.request_interaction(InteractionKind::Upgrade, request);
                    if reply.action != "yes" {
                        task.update_state(State::Canceled, "canceled");
                    }
                }
                if task.is_done() {
                    return;
                }

                task.update_state(State::Processing, "installing layer");
                task.update_sub_state(SubState::PreAction, "preparing environment");

                let mut txn = Transaction::new();
                pm.pull_dependency(task, &info, &module, &mut txn);
                if task.is_done() {
                    return;
                }

                let item = match pm.repo.import_layer_dir(bundle.layer_dir(), &[], None) {
                    Ok(item) => item,
                    Err(e) => {
                        task.report_error(&Error::ImportFailed(e.to_string()));
                        return;
                    }
                };
                {
                    let pm = Arc::clone(pm);
                    let reference = package_ref.clone();
                    let module = module.clone();
                    txn.add_rollback(move || {
                        if let Err(e) = pm.repo.remove(&reference, &module, None) {
                            error!("rollback of layer import failed: {e}");
                        }
                    });
                }

                // Auxiliary modules only need the import.
                if !module_is_binary(&module) {
                    txn.commit();
                    task.update_state(State::Succeed, "installed layer successfully");
                    return;
                }

                if let Err(e) = pm.repo.merge_modules() {
                    error!("merge modules failed: {e}");
                }

                if item.info.kind == PackageKind::App {
                    if let Some(old) = &local_ref {
                        if let Err(e) =
                            pm.remove_after_install(old, &package_ref, &[module.clone()])
                        {
                            error!(
                                "failed to remove old reference {old} after install {package_ref}: {e}"
                            );
                        }
                    }
                    txn.commit();
                    if let Err(e) = pm.generate_cache_for(&package_ref) {
                        task.update_state(State::Failed, format!("failed to generate cache: {e}"));
                        return;
                    }
                    if local_ref.is_none() {
                        if let Err(e) = pm.repo.export_reference(&package_ref) {
                            task.report_error(&Error::Internal(format!(
                                "cannot export {package_ref}: {e}"
                            )));
                            return;
                        }
                    }
                } else {
                    txn.commit();
                }

                task.update_state(State::Succeed, "installed layer successfully");
            },
        )?;

        Ok(Self::task_reply(&task, reply_message))
    }

    fn install_from_uab(
        &self,
        file: std::fs::File,
        options: InstallOptions,
    ) -> Result<TaskReply, Error> {
        let bundle = ArchiveBundle::open(file)?;
        bundle.verify()?;

        let mut layers = bundle.meta().layers.clone();
        let app_position = layers
            .iter()
            .position(|layer| layer.info.kind == PackageKind::App)
            .ok_or_else(|| {
                Error::InvalidArgument("no application layer in this bundle".to_owned())
            })?;
        // The app layer goes first so its dependencies see it fail fast.
        let app_layer = layers.remove(app_position);
        layers.insert(0, app_layer.clone());

        let arch = Architecture::parse(&app_layer.info.arch)?;
        let host = Architecture::host()?;
        if arch != host {
            return Err(Error::ArchMismatch {
                found: app_layer.info.arch.clone(),
                host: host.to_string(),
            });
        }

        let new_app_ref = app_layer.info.reference()?;
        let app_module = app_layer.info.module.clone();

        let old_app_ref = self
            .repo
            .resolve_reference(
                &FuzzyReference::from_id(&app_layer.info.id),
                ResolveOptions::default(),
                None,
            )
            .ok()
            .filter(|local| self.repo.get_layer_dir(local, &app_module, None).is_ok());

        let mut interaction = InteractionKind::Install;
        if let Some(local) = &old_app_ref {
            if new_app_ref.version == local.version {
                return Err(Error::AlreadyInstalled(local.to_string()));
            }
            if new_app_ref.version > local.version {
                interaction = InteractionKind::Upgrade;
            } else if !options.force {
                return Err(Error::DowngradeRequiresForce(format!(
                    "{}/{}",
                    new_app_ref.id, new_app_ref.version
                )));
            }
        }

        let request = InteractionRequest {
            local_ref: old_app_ref.as_ref().map(Reference::to_string),
            remote_ref: new_app_ref.to_string(),
        };
        let ref_spec = self.ref_spec("local", &new_app_ref, &app_module);
        let reply_message = format!("{new_app_ref} is now installing");
        let uuid = bundle.meta().uuid.clone();

        let task = self.enqueue_mutation(
            vec![ref_spec],
            "queued to install from bundle",
            move |pm, task| {
                if interaction == InteractionKind::Upgrade && !options.skip_interaction {
                    let reply = task.request_interaction(InteractionKind::Upgrade, request);
                    if reply.action != "yes" {
                        task.update_state(State::Canceled, "canceled");
                    }
                }
                if task.is_done() {
                    return;
                }

                task.update_state(State::Processing, "installing bundle");
                task.update_sub_state(SubState::PreAction, "preparing environment");

                let mut txn = Transaction::new();
                for layer in &layers {
                    if task.is_done() {
                        return;
                    }

                    let dir = bundle.layer_dir(layer);
                    if !dir.exists() {
                        task.update_state(
                            State::Failed,
                            format!("layer directory {} doesn't exist", dir.display()),
                        );
                        return;
                    }

                    let is_app = layer.info.kind == PackageKind::App;
                    let mut subref = layer.minified.then(|| uuid.clone());
                    let mut overlays = Vec::new();
                    if is_app {
                        // A minified flag on the app layer itself is
                        // meaningless; its signature data rides as overlay.
                        subref = None;
                        if let Some(sign) = bundle.sign_data_dir() {
                            overlays.push(sign);
                        }
                    } else {
                        let pinned =
                            format!("{}/{}", layer.info.id, layer.info.version);
                        if let Ok(fuzzy) = FuzzyReference::parse(&pinned) {
                            if let Ok(local) = pm.repo.resolve_reference(
                                &fuzzy,
                                ResolveOptions::default(),
                                None,
                            ) {
                                if pm
                                    .repo
                                    .get_layer_dir(&local, &layer.info.module, None)
                                    .is_ok()
                                {
                                    // Same version already present locally.
                                    continue;
                                }
                            }
                        }
                    }

                    let layer_ref = match layer.info.reference() {
                        Ok(reference) => reference,
                        Err(e) => {
                            task.report_error(&Error::InvalidArgument(e.to_string()));
                            return;
                        }
                    };
                    if let Err(e) =
                        pm.repo
                            .import_layer_dir(&dir, &overlays, subref.as_deref())
                    {
                        task.report_error(&Error::ImportFailed(e.to_string()));
                        return;
                    }

                    let pm2 = Arc::clone(pm);
                    let module = layer.info.module.clone();
                    txn.add_rollback(move || {
                        if let Err(e) = pm2.repo.remove(&layer_ref, &module, subref.as_deref()) {
                            error!("rollback of bundle layer import failed: {e}");
                        }
                    });
                }

                if let Some(old) = &old_app_ref {
                    if let Err(e) = pm.remove_after_install(
                        old,
                        &new_app_ref,
                        &pm.repo.get_module_list(old),
                    ) {
                        error!(
                            "remove old reference after install of newer version failed: {e}"
                        );
                    }
                    txn.commit();
                } else {
                    if let Err(e) = pm.repo.merge_modules() {
                        error!("merge modules failed: {e}");
                    }
                    txn.commit();
                    if let Err(e) = pm.generate_cache_for(&new_app_ref) {
                        task.update_state(State::Failed, format!("failed to generate cache: {e}"));
                        return;
                    }
                    if let Err(e) = pm.repo.export_reference(&new_app_ref) {
                        task.report_error(&Error::Internal(format!(
                            "cannot export {new_app_ref}: {e}"
                        )));
                        return;
                    }
                }

                task.update_state(State::Succeed, "installed bundle successfully");
            },
        )?;

        Ok(Self::task_reply(&task, reply_message))
    }

    // --- Interaction / configuration ---

    pub fn reply_interaction(
        &self,
        task_object_path: &str,
        reply: InteractionReply,
    ) -> Result<(), Error> {
        self.registry.reply_interaction(task_object_path, reply)
    }

    pub fn get_configuration(&self) -> RepoConfig {
        self.config.lock().unwrap().clone()
    }

    pub fn set_configuration(&self, config: RepoConfig) -> Result<(), Error> {
        config.validate().map_err(Error::InvalidArgument)?;
        {
            let current = self.config.lock().unwrap();
            if *current == config {
                return Ok(());
            }
        }
        config
            .save(&self.repo.layout().config_file())
            .map_err(|e| Error::Internal(format!("cannot persist configuration: {e}")))?;
        *self.config.lock().unwrap() = config;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fuzzy_from_request_parses_version() {
        let request = PackageRequest {
            channel: Some("stable".to_owned()),
            id: "org.example.calc".to_owned(),
            version: Some("1.2.0".to_owned()),
            module: None,
        };
        let fuzzy = PackageManager::fuzzy_from_request(&request).unwrap();
        assert_eq!(fuzzy.channel.as_deref(), Some("stable"));
        assert_eq!(fuzzy.version, Some(Version::parse("1.2.0").unwrap()));
    }

    #[test]
    fn fuzzy_from_request_rejects_bad_input() {
        let request = PackageRequest {
            channel: None,
            id: String::new(),
            version: None,
            module: None,
        };
        assert!(PackageManager::fuzzy_from_request(&request).is_err());

        let request = PackageRequest {
            channel: None,
            id: "app".to_owned(),
            version: Some("not.a.version".to_owned()),
            module: None,
        };
        assert!(PackageManager::fuzzy_from_request(&request).is_err());
    }

    #[test]
    fn deferred_interval_defaults_and_parses() {
        std::env::remove_var(DEFERRED_TIMEOUT_ENV);
        assert_eq!(PackageManager::deferred_interval(), DEFAULT_DEFERRED_TIMEOUT);

        std::env::set_var(DEFERRED_TIMEOUT_ENV, "120");
        assert_eq!(
            PackageManager::deferred_interval(),
            Duration::from_secs(120)
        );

        std::env::set_var(DEFERRED_TIMEOUT_ENV, "junk");
        assert_eq!(PackageManager::deferred_interval(), DEFAULT_DEFERRED_TIMEOUT);
        std::env::remove_var(DEFERRED_TIMEOUT_ENV);
    }

    #[test]
    fn install_options_default_from_empty_json() {
        let options: InstallOptions = serde_json::from_str("{}").unwrap();
        assert!(!options.force);
        assert!(!options.skip_interaction);
    }
}
