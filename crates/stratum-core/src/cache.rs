//! Derived-cache generation.
//!
//! After an application lands in the store, an ephemeral container assembled
//! from its layers runs the distribution's in-image generators (`ld-cache`
//! and `font-cache`) against a per-commit cache directory. The cache
//! directory is rolled back on any failure; the committed layers are never
//! touched from here.

use crate::transaction::Transaction;
use crate::Error;
use std::path::{Path, PathBuf};
use stratum_runtime::{BindMount, ContainerDriver, ContainerProcess, ContainerSpec};
use stratum_store::{LayerRepo, ResolveOptions, StoreError};
use stratum_schema::{FuzzyReference, Reference};
use tracing::{debug, info};

const CACHE_DEST: &str = "/run/stratum/cache";
const FONT_CACHE_DEST: &str = "/var/cache/fontconfig";
const GENERATOR_DEST: &str = "/run/stratum/generator";

pub(crate) fn generate_cache(
    repo: &LayerRepo,
    driver: &dyn ContainerDriver,
    reference: &Reference,
    generator_dir: &Path,
) -> Result<(), Error> {
    info!("generating cache for {reference}");

    let item = repo
        .get_layer_item(reference)
        .map_err(|e| Error::Internal(format!("no layer item for {reference}: {e}")))?;

    let cache_dir = repo.layout().cache_dir(item.commit.as_str());
    let font_cache_dir = cache_dir.join("fontconfig");
    std::fs::create_dir_all(&font_cache_dir)
        .map_err(|e| Error::CacheGenerationFailed(format!("cannot create cache dir: {e}")))?;

    let mut txn = Transaction::new();
    let rollback_dir = cache_dir.clone();
    txn.add_rollback(move || {
        let _ = std::fs::remove_dir_all(&rollback_dir);
    });

    // The minified subref only matters for dependencies; the app layer is
    // always the merged view.
    let subref = item.info.uuid.as_deref();
    let app_dir = repo
        .get_merged_module_dir(reference)
        .map_err(|e| Error::Internal(format!("no layer dir for {reference}: {e}")))?;

    let runtime_dir = match &item.info.runtime {
        Some(runtime) => Some(dependency_dir(repo, runtime, subref)?),
        None => None,
    };

    let base = item.info.base.as_deref().ok_or_else(|| {
        Error::DependencyMissing(format!("{reference} declares no base"))
    })?;
    let base_dir = dependency_dir(repo, base, subref)?;

    let ld_generator = format!("{GENERATOR_DEST}/ld-cache-generator");
    let font_generator = format!("{GENERATOR_DEST}/font-cache-generator");
    let command = format!(
        "{ld_generator} {CACHE_DEST} {id} {triplet}; {font_generator} {CACHE_DEST} {id}",
        id = reference.id,
        triplet = reference.arch.triplet()
    );

    let spec = ContainerSpec {
        container_id: reference.id.clone(),
        app_id: reference.id.clone(),
        app_dir,
        runtime_dir,
        base_dir,
        mounts: vec![
            BindMount {
                source: cache_dir.clone(),
                destination: PathBuf::from(CACHE_DEST),
                read_only: false,
            },
            BindMount {
                source: font_cache_dir,
                destination: PathBuf::from(FONT_CACHE_DEST),
                read_only: false,
            },
            BindMount {
                source: generator_dir.to_path_buf(),
                destination: PathBuf::from(GENERATOR_DEST),
                read_only: true,
            },
        ],
        process: ContainerProcess {
            args: vec!["bash".to_owned(), "-c".to_owned(), command],
            cwd: "/".to_owned(),
            no_new_privileges: true,
        },
    };

    driver
        .run(&spec)
        .map_err(|e| Error::CacheGenerationFailed(e.to_string()))?;

    txn.commit();
    debug!("cache for {reference} at {}", cache_dir.display());
    Ok(())
}

/// Locate a declared dependency's layer dir, honoring a minified subref.
fn dependency_dir(
    repo: &LayerRepo,
    declared: &str,
    subref: Option<&str>,
) -> Result<PathBuf, Error> {
    let fuzzy = FuzzyReference::parse(declared)
        .map_err(|e| Error::DependencyMissing(format!("'{declared}': {e}")))?;
    let resolved = repo
        .resolve_reference(&fuzzy, ResolveOptions::default(), None)
        .map_err(|e| Error::DependencyMissing(format!("'{declared}': {e}")))?;

    let dir = match subref {
        None => repo.get_merged_module_dir(&resolved),
        Some(subref) => repo
            .get_layer_dir(&resolved, "binary", Some(subref))
            .or_else(|_: StoreError| repo.get_merged_module_dir(&resolved)),
    };
    dir.map_err(|e| Error::DependencyMissing(format!("'{declared}': {e}")))
}

pub(crate) fn remove_cache(repo: &LayerRepo, reference: &Reference) -> Result<(), Error> {
    let item = repo
        .get_layer_item(reference)
        .map_err(|e| Error::Internal(format!("no layer item for {reference}: {e}")))?;
    let cache_dir = repo.layout().cache_dir(item.commit.as_str());
    if cache_dir.exists() {
        std::fs::remove_dir_all(&cache_dir)
            .map_err(|e| Error::Internal(format!("cannot remove cache dir: {e}")))?;
    }
    Ok(())
}
