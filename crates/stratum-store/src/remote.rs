use crate::StoreError;
use stratum_schema::{FuzzyReference, PackageInfo, Reference};

/// Remote half of the layer store: package listing and layer content.
///
/// A layer is transferred as a tar stream containing `info.json` at the root
/// and the payload under `files/`. The concrete transport is out of the
/// core's hands; tests use the in-memory source from `stratum-remote`.
pub trait RemoteSource: Send + Sync {
    /// Name of the configured remote, used in task ref-specs.
    fn name(&self) -> &str;

    /// All remote packages matching the fuzzy reference, every module.
    fn list(&self, fuzzy: &FuzzyReference) -> Result<Vec<PackageInfo>, StoreError>;

    /// Module labels available remotely for a resolved reference.
    fn module_list(&self, reference: &Reference) -> Result<Vec<String>, StoreError>;

    /// Fetch one layer as a tar stream.
    fn fetch(&self, reference: &Reference, module: &str) -> Result<Vec<u8>, StoreError>;
}

/// Progress and cancellation seam for long-running pulls. Tasks implement
/// this; rollback re-pulls use [`NoProgress`].
pub trait PullProgress {
    fn progress(&self, percentage: u32, message: &str);

    fn is_canceled(&self) -> bool {
        false
    }
}

/// A progress sink that discards everything and never cancels.
pub struct NoProgress;

impl PullProgress for NoProgress {
    fn progress(&self, _percentage: u32, _message: &str) {}
}
