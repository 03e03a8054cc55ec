use std::collections::HashSet;
use std::sync::Mutex;
use stratum_schema::{modules_equivalent, FuzzyReference, PackageInfo, Reference};
use stratum_store::{RemoteSource, StoreError};

struct RemotePackage {
    info: PackageInfo,
    files: Vec<(String, Vec<u8>)>,
}

/// An in-memory remote repository.
///
/// Engine and store tests publish packages here and point the `LayerRepo` at
/// it; `fetch` serves the same tar-stream shape a production transport would.
/// Individual `(id, module)` pairs can be poisoned to exercise pull-failure
/// rollback paths.
pub struct MemorySource {
    name: String,
    packages: Mutex<Vec<RemotePackage>>,
    poisoned: Mutex<HashSet<(String, String)>>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            packages: Mutex::new(Vec::new()),
            poisoned: Mutex::new(HashSet::new()),
        }
    }

    /// Publish a package with a small default payload.
    pub fn publish(&self, info: PackageInfo) {
        let payload = format!("{}-{}-{}", info.id, info.version, info.module);
        self.publish_with_files(info, vec![("payload.txt".to_owned(), payload.into_bytes())]);
    }

    pub fn publish_with_files(&self, info: PackageInfo, files: Vec<(String, Vec<u8>)>) {
        self.packages
            .lock()
            .unwrap()
            .push(RemotePackage { info, files });
    }

    /// Make every subsequent fetch of `(id, module)` fail.
    pub fn poison_fetch(&self, id: &str, module: &str) {
        self.poisoned
            .lock()
            .unwrap()
            .insert((id.to_owned(), module.to_owned()));
    }

    pub fn heal_fetch(&self, id: &str, module: &str) {
        self.poisoned
            .lock()
            .unwrap()
            .remove(&(id.to_owned(), module.to_owned()));
    }
}

impl RemoteSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn list(&self, fuzzy: &FuzzyReference) -> Result<Vec<PackageInfo>, StoreError> {
        Ok(self
            .packages
            .lock()
            .unwrap()
            .iter()
            .filter(|pkg| {
                pkg.info
                    .reference()
                    .map(|r| fuzzy.matches(&r))
                    .unwrap_or(false)
            })
            .map(|pkg| pkg.info.clone())
            .collect())
    }

    fn module_list(&self, reference: &Reference) -> Result<Vec<String>, StoreError> {
        let mut modules: Vec<String> = self
            .packages
            .lock()
            .unwrap()
            .iter()
            .filter(|pkg| {
                pkg.info
                    .reference()
                    .map(|r| r.to_string() == reference.to_string())
                    .unwrap_or(false)
            })
            .map(|pkg| pkg.info.module.clone())
            .collect();
        modules.sort();
        modules.dedup();
        Ok(modules)
    }

    fn fetch(&self, reference: &Reference, module: &str) -> Result<Vec<u8>, StoreError> {
        if self
            .poisoned
            .lock()
            .unwrap()
            .contains(&(reference.id.clone(), module.to_owned()))
        {
            return Err(StoreError::Remote(format!(
                "transfer of {reference}/{module} failed"
            )));
        }

        let packages = self.packages.lock().unwrap();
        let pkg = packages
            .iter()
            .find(|pkg| {
                modules_equivalent(module, &pkg.info.module)
                    && pkg
                        .info
                        .reference()
                        .map(|r| r.to_string() == reference.to_string())
                        .unwrap_or(false)
            })
            .ok_or_else(|| StoreError::Remote(format!("{reference}/{module} not found")))?;

        let mut builder = tar::Builder::new(Vec::new());
        let info_json = serde_json::to_vec_pretty(&pkg.info)
            .map_err(|e| StoreError::Remote(e.to_string()))?;
        append_bytes(&mut builder, "info.json", &info_json)?;
        for (path, data) in &pkg.files {
            append_bytes(&mut builder, &format!("files/{path}"), data)?;
        }
        builder
            .into_inner()
            .map_err(|e| StoreError::Remote(e.to_string()))
    }
}

fn append_bytes(
    builder: &mut tar::Builder<Vec<u8>>,
    path: &str,
    data: &[u8],
) -> Result<(), StoreError> {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_cksum();
    builder
        .append_data(&mut header, path, data)
        .map_err(StoreError::Io)
}
