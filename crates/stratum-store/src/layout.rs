use stratum_schema::Reference;
use std::fs;
use std::path::{Path, PathBuf};

/// Directory layout of a stratum store root.
///
/// All paths derive from a single root so a test can point the whole store at
/// a tempdir. Subdirectories are created lazily by [`initialize`](Self::initialize).
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn layers_dir(&self) -> PathBuf {
        self.root.join("layers")
    }

    /// Directory of one stored layer: `layers/<channel>/<id>/<version>/<arch>/<module>`,
    /// with `@<subref>` appended for minified-bundle materializations.
    pub fn layer_dir(&self, reference: &Reference, module: &str, subref: Option<&str>) -> PathBuf {
        let module_dir = match subref {
            Some(subref) => format!("{module}@{subref}"),
            None => module.to_owned(),
        };
        self.layers_dir()
            .join(&reference.channel)
            .join(&reference.id)
            .join(reference.version.to_string())
            .join(reference.arch.to_string())
            .join(module_dir)
    }

    #[inline]
    pub fn merged_root(&self) -> PathBuf {
        self.root.join("merged")
    }

    pub fn merged_dir(&self, reference: &Reference) -> PathBuf {
        self.merged_root()
            .join(&reference.channel)
            .join(&reference.id)
            .join(reference.version.to_string())
            .join(reference.arch.to_string())
    }

    #[inline]
    pub fn exports_dir(&self) -> PathBuf {
        self.root.join("exports")
    }

    pub fn export_path(&self, id: &str) -> PathBuf {
        self.exports_dir().join(format!("{id}.json"))
    }

    #[inline]
    pub fn cache_root(&self) -> PathBuf {
        self.root.join("cache")
    }

    /// Derived-cache directory for one content commit.
    pub fn cache_dir(&self, commit: &str) -> PathBuf {
        self.cache_root().join(commit)
    }

    #[inline]
    pub fn staging_dir(&self) -> PathBuf {
        self.root.join("staging")
    }

    #[inline]
    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.json")
    }

    pub fn initialize(&self) -> Result<(), std::io::Error> {
        fs::create_dir_all(self.layers_dir())?;
        fs::create_dir_all(self.merged_root())?;
        fs::create_dir_all(self.exports_dir())?;
        fs::create_dir_all(self.cache_root())?;
        fs::create_dir_all(self.staging_dir())?;
        Ok(())
    }
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

    #[test]
    fn layer_dir_paths() {
        let layout = StoreLayout::new("/var/lib/stratum");
        assert_eq!(
            layout.layer_dir(&reference(), "binary", None),
            PathBuf::from("/var/lib/stratum/layers/stable/org.example.calc/1.0.0/x86_64/binary")
        );
        assert_eq!(
            layout.layer_dir(&reference(), "binary", Some("uuid-1")),
            PathBuf::from(
                "/var/lib/stratum/layers/stable/org.example.calc/1.0.0/x86_64/binary@uuid-1"
            )
        );
    }

    #[test]
    fn cache_and_export_paths() {
        let layout = StoreLayout::new("/var/lib/stratum");
        assert_eq!(
            layout.cache_dir("abc"),
            PathBuf::from("/var/lib/stratum/cache/abc")
        );
        assert_eq!(
            layout.export_path("org.example.calc"),
            PathBuf::from("/var/lib/stratum/exports/org.example.calc.json")
        );
    }

    #[test]
    fn initialize_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();
        assert!(layout.layers_dir().is_dir());
        assert!(layout.merged_root().is_dir());
        assert!(layout.exports_dir().is_dir());
        assert!(layout.cache_root().is_dir());
        assert!(layout.staging_dir().is_dir());
    }

    #[test]
    fn initialize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();
        layout.initialize().unwrap();
    }
}
