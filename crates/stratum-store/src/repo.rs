use crate::hash::{copy_tree, tree_digest};
use crate::item::{LayerItem, RepoQuery};
use crate::layout::StoreLayout;
use crate::remote::{PullProgress, RemoteSource};
use crate::{fsync_dir, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stratum_schema::{
    module_is_binary, modules_equivalent, FuzzyReference, PackageInfo, Reference,
};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

const ITEM_FILE: &str = "item.json";
const INFO_FILE: &str = "info.json";
const FILES_DIR: &str = "files";

/// Resolution policy for [`LayerRepo::resolve_reference`]: local first unless
/// `force_remote`, remote only when local resolution fails and
/// `fallback_to_remote`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions {
    pub force_remote: bool,
    pub fallback_to_remote: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ExportRecord {
    reference: String,
}

/// The layer store adapter. One handle is owned by the engine and passed by
/// reference into every plan; all mutating calls happen under the repository
/// lock held by the calling task.
pub struct LayerRepo {
    layout: StoreLayout,
    remote: Arc<dyn RemoteSource>,
}

impl LayerRepo {
    pub fn new(layout: StoreLayout, remote: Arc<dyn RemoteSource>) -> Self {
        Self { layout, remote }
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn remote_name(&self) -> &str {
        self.remote.name()
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        self.layout.initialize()?;
        Ok(())
    }

    // --- enumeration ---

    /// Walk every stored item. Corrupt records are skipped with a warning so
    /// one broken entry cannot take down enumeration.
    fn walk_items(&self) -> Result<Vec<(PathBuf, LayerItem)>, StoreError> {
        let mut result = Vec::new();
        let layers = self.layout.layers_dir();
        if !layers.exists() {
            return Ok(result);
        }
        for channel in read_subdirs(&layers)? {
            for id in read_subdirs(&channel)? {
                for version in read_subdirs(&id)? {
                    for arch in read_subdirs(&version)? {
                        for module_dir in read_subdirs(&arch)? {
                            let item_path = module_dir.join(ITEM_FILE);
                            if !item_path.exists() {
                                continue;
                            }
                            match read_item(&item_path) {
                                Ok(item) => result.push((module_dir, item)),
                                Err(e) => {
                                    warn!(
                                        "skipping corrupt layer item {}: {e}",
                                        item_path.display()
                                    );
                                }
                            }
                        }
                    }
                }
            }
        }
        Ok(result)
    }

    pub fn list_local(&self, query: &RepoQuery) -> Result<Vec<LayerItem>, StoreError> {
        let mut items: Vec<LayerItem> = self
            .walk_items()?
            .into_iter()
            .map(|(_, item)| item)
            .filter(|item| query.matches(item))
            .collect();
        items.sort_by(|a, b| {
            (&a.info.id, &a.info.version, &a.info.module)
                .cmp(&(&b.info.id, &b.info.version, &b.info.module))
        });
        Ok(items)
    }

    pub fn list_local_deleted(&self) -> Result<Vec<LayerItem>, StoreError> {
        self.list_local(&RepoQuery::deleted())
    }

    /// The binary-payload item for a reference. Plain materializations win
    /// over minified-subref ones.
    pub fn get_layer_item(&self, reference: &Reference) -> Result<LayerItem, StoreError> {
        let mut fallback = None;
        for (_, item) in self.walk_items()? {
            if !module_is_binary(&item.info.module) {
                continue;
            }
            if item.reference()?.to_string() != reference.to_string() {
                continue;
            }
            if item.subref.is_none() {
                return Ok(item);
            }
            fallback.get_or_insert(item);
        }
        fallback.ok_or_else(|| StoreError::ItemNotFound(reference.to_string()))
    }

    /// Materialized filesystem view of one layer's payload.
    pub fn get_layer_dir(
        &self,
        reference: &Reference,
        module: &str,
        subref: Option<&str>,
    ) -> Result<PathBuf, StoreError> {
        let dir = self.layout.layer_dir(reference, module, subref);
        let files = dir.join(FILES_DIR);
        if !dir.join(ITEM_FILE).exists() || !files.exists() {
            return Err(StoreError::ItemNotFound(format!("{reference}/{module}")));
        }
        Ok(files)
    }

    /// The union-of-modules view, falling back to the binary layer when the
    /// merged view has not been materialized yet.
    pub fn get_merged_module_dir(&self, reference: &Reference) -> Result<PathBuf, StoreError> {
        let merged = self.layout.merged_dir(reference);
        if merged.exists() {
            return Ok(merged);
        }
        self.get_layer_dir(reference, "binary", None)
            .or_else(|_| self.get_layer_dir(reference, "runtime", None))
    }

    /// Module labels stored locally for a reference (deleted items included,
    /// so an upgrade replaces everything the old version had).
    pub fn get_module_list(&self, reference: &Reference) -> Vec<String> {
        let mut modules = Vec::new();
        let Ok(items) = self.walk_items() else {
            return modules;
        };
        for (_, item) in items {
            let Ok(item_ref) = item.reference() else {
                continue;
            };
            if item_ref.to_string() == reference.to_string()
                && item.subref.is_none()
                && !modules.contains(&item.info.module)
            {
                modules.push(item.info.module.clone());
            }
        }
        modules.sort();
        modules
    }

    /// Remote module labels for `reference`, narrowed to the wanted set with
    /// binary/runtime treated as equivalent.
    pub fn get_remote_module_list(
        &self,
        reference: &Reference,
        wanted: &[String],
    ) -> Result<Vec<String>, StoreError> {
        let available = self.remote.module_list(reference)?;
        Ok(available
            .into_iter()
            .filter(|module| wanted.iter().any(|w| modules_equivalent(w, module)))
            .collect())
    }

    pub fn list_remote(&self, fuzzy: &FuzzyReference) -> Result<Vec<PackageInfo>, StoreError> {
        self.remote.list(fuzzy)
    }

    // --- resolution ---

    /// Narrow a fuzzy reference to a fully-qualified one.
    pub fn resolve_reference(
        &self,
        fuzzy: &FuzzyReference,
        options: ResolveOptions,
        module: Option<&str>,
    ) -> Result<Reference, StoreError> {
        if !options.force_remote {
            if let Some(reference) = self.resolve_local(fuzzy, module)? {
                return Ok(reference);
            }
            if !options.fallback_to_remote {
                return Err(StoreError::Unresolvable(fuzzy.to_string()));
            }
        }
        self.resolve_remote(fuzzy, module)
    }

    fn resolve_local(
        &self,
        fuzzy: &FuzzyReference,
        module: Option<&str>,
    ) -> Result<Option<Reference>, StoreError> {
        let mut best: Option<Reference> = None;
        for (_, item) in self.walk_items()? {
            if item.deleted {
                continue;
            }
            if let Some(module) = module {
                if !modules_equivalent(module, &item.info.module) {
                    continue;
                }
            }
            let reference = item.reference()?;
            if !fuzzy.matches(&reference) {
                continue;
            }
            match &best {
                Some(current) if current.version >= reference.version => {}
                _ => best = Some(reference),
            }
        }
        Ok(best)
    }

    fn resolve_remote(
        &self,
        fuzzy: &FuzzyReference,
        module: Option<&str>,
    ) -> Result<Reference, StoreError> {
        let mut best: Option<Reference> = None;
        for info in self.remote.list(fuzzy)? {
            if let Some(module) = module {
                if !modules_equivalent(module, &info.module) {
                    continue;
                }
            }
            let Ok(reference) = info.reference() else {
                warn!("remote returned unparsable package {}/{}", info.id, info.version);
                continue;
            };
            if !fuzzy.matches(&reference) {
                continue;
            }
            match &best {
                Some(current) if current.version >= reference.version => {}
                _ => best = Some(reference),
            }
        }
        best.ok_or_else(|| StoreError::Unresolvable(fuzzy.to_string()))
    }

    // --- mutation ---

    /// Fetch a layer from the configured remote into the local store,
    /// streaming progress and honoring cancellation.
    pub fn pull(
        &self,
        progress: &dyn PullProgress,
        reference: &Reference,
        module: &str,
    ) -> Result<(), StoreError> {
        if progress.is_canceled() {
            return Err(StoreError::PullCanceled);
        }
        progress.progress(0, &format!("fetching {reference}/{module}"));
        let bytes = self.remote.fetch(reference, module)?;

        if progress.is_canceled() {
            return Err(StoreError::PullCanceled);
        }
        progress.progress(50, &format!("unpacking {reference}/{module}"));

        fs::create_dir_all(self.layout.staging_dir())?;
        let staging = tempfile::tempdir_in(self.layout.staging_dir())?;
        let mut archive = tar::Archive::new(bytes.as_slice());
        archive.set_preserve_mtime(false);
        archive.unpack(staging.path())?;

        let info = read_info(staging.path())?;
        let pulled_ref = info.reference()?;
        if pulled_ref.to_string() != reference.to_string() {
            return Err(StoreError::InvalidLayer(format!(
                "remote served {pulled_ref} when {reference} was requested"
            )));
        }
        if !modules_equivalent(module, &info.module) {
            return Err(StoreError::InvalidLayer(format!(
                "remote served module '{}' when '{module}' was requested",
                info.module
            )));
        }
        if !staging.path().join(FILES_DIR).exists() {
            return Err(StoreError::InvalidLayer(
                "layer stream carries no files directory".to_owned(),
            ));
        }

        let commit = tree_digest(&staging.path().join(FILES_DIR))?;
        let dest = self.layout.layer_dir(reference, &info.module, None);
        if dest.exists() {
            fs::remove_dir_all(&dest)?;
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let staged = staging.keep();
        fs::rename(&staged, &dest)?;

        let item = LayerItem {
            info,
            commit,
            subref: None,
            deleted: false,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        write_item(&dest, &item)?;
        progress.progress(100, &format!("pulled {reference}/{module}"));
        debug!("pulled {reference}/{module} -> {}", item.commit);
        Ok(())
    }

    /// Ingest an already-unpacked layer directory (`info.json` + `files/`).
    /// `overlays` are applied on top of the payload; `subref` records a
    /// minified-bundle identity.
    pub fn import_layer_dir(
        &self,
        dir: &Path,
        overlays: &[PathBuf],
        subref: Option<&str>,
    ) -> Result<LayerItem, StoreError> {
        let info = read_info(dir)?;
        let reference = info.reference()?;
        if !dir.join(FILES_DIR).exists() {
            return Err(StoreError::InvalidLayer(format!(
                "{} has no files directory",
                dir.display()
            )));
        }

        let dest = self.layout.layer_dir(&reference, &info.module, subref);
        if dest.exists() {
            fs::remove_dir_all(&dest)?;
        }
        copy_tree(dir, &dest)?;
        for overlay in overlays {
            copy_tree(overlay, &dest.join(FILES_DIR))?;
        }

        let item = LayerItem {
            info,
            commit: tree_digest(&dest.join(FILES_DIR))?,
            subref: subref.map(str::to_owned),
            deleted: false,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        write_item(&dest, &item)?;
        debug!("imported {reference}/{} -> {}", item.info.module, item.commit);
        Ok(item)
    }

    /// Delete the local materialization of one layer.
    pub fn remove(
        &self,
        reference: &Reference,
        module: &str,
        subref: Option<&str>,
    ) -> Result<(), StoreError> {
        let dir = self.layout.layer_dir(reference, module, subref);
        if !dir.exists() {
            return Err(StoreError::ItemNotFound(format!("{reference}/{module}")));
        }
        fs::remove_dir_all(&dir)?;
        prune_empty_parents(&dir, &self.layout.layers_dir());
        Ok(())
    }

    /// Toggle the deferred-deletion flag on every materialization of
    /// `(reference, module)`.
    pub fn mark_deleted(
        &self,
        reference: &Reference,
        deleted: bool,
        module: &str,
    ) -> Result<(), StoreError> {
        let mut found = false;
        for (dir, mut item) in self.walk_items()? {
            if item.info.module != module {
                continue;
            }
            if item.reference()?.to_string() != reference.to_string() {
                continue;
            }
            item.deleted = deleted;
            write_item(&dir, &item)?;
            found = true;
        }
        if !found {
            return Err(StoreError::ItemNotFound(format!("{reference}/{module}")));
        }
        Ok(())
    }

    // --- export ---

    /// Publish integration artifacts for a reference. Idempotent; the record
    /// for an id always names the most recently exported reference.
    pub fn export_reference(&self, reference: &Reference) -> Result<(), StoreError> {
        let record = ExportRecord {
            reference: reference.to_string(),
        };
        let dir = self.layout.exports_dir();
        fs::create_dir_all(&dir)?;
        let content = serde_json::to_string_pretty(&record)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.layout.export_path(&reference.id))
            .map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(&dir)?;
        Ok(())
    }

    /// Withdraw the integration artifacts of a reference. A no-op when the
    /// reference is not the exported one.
    pub fn unexport_reference(&self, reference: &Reference) -> Result<(), StoreError> {
        let path = self.layout.export_path(&reference.id);
        match self.exported_reference(&reference.id) {
            Some(exported) if exported.to_string() == reference.to_string() => {
                fs::remove_file(path)?;
            }
            _ => {}
        }
        Ok(())
    }

    pub fn exported_reference(&self, id: &str) -> Option<Reference> {
        let path = self.layout.export_path(id);
        let content = fs::read_to_string(path).ok()?;
        let record: ExportRecord = serde_json::from_str(&content).ok()?;
        Reference::parse(&record.reference).ok()
    }

    // --- derived views ---

    /// Recompute the union-of-modules view for every stored reference. The
    /// binary payload wins entry conflicts; auxiliary modules fill in around
    /// it. Called after every successful multi-module change.
    pub fn merge_modules(&self) -> Result<(), StoreError> {
        let merged_root = self.layout.merged_root();
        if merged_root.exists() {
            fs::remove_dir_all(&merged_root)?;
        }
        fs::create_dir_all(&merged_root)?;

        let mut groups: BTreeMap<String, Vec<(PathBuf, LayerItem)>> = BTreeMap::new();
        for (dir, item) in self.walk_items()? {
            if item.deleted || item.subref.is_some() {
                continue;
            }
            groups
                .entry(item.reference()?.to_string())
                .or_default()
                .push((dir, item));
        }

        for (ref_str, mut group) in groups {
            let reference = Reference::parse(&ref_str)?;
            let dest = self.layout.merged_dir(&reference);
            fs::create_dir_all(&dest)?;

            // Binary-like module first so its entries win.
            group.sort_by_key(|(_, item)| !module_is_binary(&item.info.module));
            for (dir, _) in &group {
                let files = dir.join(FILES_DIR);
                if !files.exists() {
                    continue;
                }
                for entry in fs::read_dir(&files)? {
                    let entry = entry?;
                    let link = dest.join(entry.file_name());
                    if link.symlink_metadata().is_ok() {
                        continue;
                    }
                    std::os::unix::fs::symlink(entry.path(), link)?;
                }
            }
        }
        Ok(())
    }

    /// Garbage-collect store state unreachable from any layer item: stale
    /// staging entries, merged views and derived caches whose backing layers
    /// are gone. Returns the number of removed entries.
    pub fn prune(&self) -> Result<usize, StoreError> {
        let mut removed = 0;

        let staging = self.layout.staging_dir();
        if staging.exists() {
            for entry in fs::read_dir(&staging)? {
                let entry = entry?;
                remove_any(&entry.path())?;
                removed += 1;
            }
        }

        let items = self.walk_items()?;
        let live_refs: Vec<String> = items
            .iter()
            .filter_map(|(_, item)| item.reference().ok().map(|r| r.to_string()))
            .collect();
        let live_commits: Vec<&str> = items.iter().map(|(_, item)| item.commit.as_str()).collect();

        let merged_root = self.layout.merged_root();
        if merged_root.exists() {
            for channel in read_subdirs(&merged_root)? {
                for id in read_subdirs(&channel)? {
                    for version in read_subdirs(&id)? {
                        for arch in read_subdirs(&version)? {
                            let reference = format!(
                                "{}:{}/{}/{}",
                                file_name(&channel),
                                file_name(&id),
                                file_name(&version),
                                file_name(&arch)
                            );
                            if !live_refs.contains(&reference) {
                                fs::remove_dir_all(&arch)?;
                                removed += 1;
                            }
                        }
                    }
                }
            }
        }

        let cache_root = self.layout.cache_root();
        if cache_root.exists() {
            for entry in fs::read_dir(&cache_root)? {
                let entry = entry?;
                let commit = entry.file_name().to_string_lossy().to_string();
                if !live_commits.contains(&commit.as_str()) {
                    remove_any(&entry.path())?;
                    removed += 1;
                }
            }
        }

        Ok(removed)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn read_subdirs(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let mut result = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            result.push(entry.path());
        }
    }
    result.sort();
    Ok(result)
}

fn remove_any(path: &Path) -> Result<(), StoreError> {
    if path.is_dir() {
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_file(path)?;
    }
    Ok(())
}

/// Remove now-empty ancestor directories up to (not including) `stop`.
fn prune_empty_parents(dir: &Path, stop: &Path) {
    let mut current = dir.parent();
    while let Some(parent) = current {
        if parent == stop {
            break;
        }
        match fs::remove_dir(parent) {
            Ok(()) => current = parent.parent(),
            Err(_) => break,
        }
    }
}

fn read_item(path: &Path) -> Result<LayerItem, StoreError> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn read_info(dir: &Path) -> Result<PackageInfo, StoreError> {
    let path = dir.join(INFO_FILE);
    if !path.exists() {
        return Err(StoreError::InvalidLayer(format!(
            "{} has no {INFO_FILE}",
            dir.display()
        )));
    }
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn write_item(dir: &Path, item: &LayerItem) -> Result<(), StoreError> {
    let content = serde_json::to_string_pretty(item)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(dir.join(ITEM_FILE))
        .map_err(|e| StoreError::Io(e.error))?;
    fsync_dir(dir)?;
    Ok(())
}
