use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use stratum_schema::{modules_equivalent, FuzzyReference, PackageInfo, Reference};
use stratum_store::{RemoteSource, StoreError};

const INDEX_FILE: &str = "index.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SpoolEntry {
    info: PackageInfo,
    /// Layer tar stream, relative to the spool root.
    archive: String,
}

/// A directory-backed remote: an offline mirror with an `index.json` listing
/// the available packages and one tar stream per layer.
///
/// This is the transport the daemon binary ships with; networked transports
/// plug in behind the same `RemoteSource` trait.
pub struct SpoolSource {
    name: String,
    root: PathBuf,
}

impl SpoolSource {
    pub fn open(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
        }
    }

    fn entries(&self) -> Result<Vec<SpoolEntry>, StoreError> {
        let index = self.root.join(INDEX_FILE);
        if !index.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(index)?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl RemoteSource for SpoolSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn list(&self, fuzzy: &FuzzyReference) -> Result<Vec<PackageInfo>, StoreError> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|entry| {
                entry
                    .info
                    .reference()
                    .map(|r| fuzzy.matches(&r))
                    .unwrap_or(false)
            })
            .map(|entry| entry.info)
            .collect())
    }

    fn module_list(&self, reference: &Reference) -> Result<Vec<String>, StoreError> {
        let mut modules: Vec<String> = self
            .entries()?
            .into_iter()
            .filter(|entry| {
                entry
                    .info
                    .reference()
                    .map(|r| r.to_string() == reference.to_string())
                    .unwrap_or(false)
            })
            .map(|entry| entry.info.module)
            .collect();
        modules.sort();
        modules.dedup();
        Ok(modules)
    }

    fn fetch(&self, reference: &Reference, module: &str) -> Result<Vec<u8>, StoreError> {
        let entry = self
            .entries()?
            .into_iter()
            .find(|entry| {
                modules_equivalent(module, &entry.info.module)
                    && entry
                        .info
                        .reference()
                        .map(|r| r.to_string() == reference.to_string())
                        .unwrap_or(false)
            })
            .ok_or_else(|| StoreError::Remote(format!("{reference}/{module} not in spool")))?;
        Ok(std::fs::read(self.root.join(entry.archive))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_schema::{Architecture, PackageKind, Version};

    fn info(id: &str, version: &str) -> PackageInfo {
        PackageInfo {
            id: id.to_owned(),
            version: version.to_owned(),
            channel: "stable".to_owned(),
            arch: "x86_64".to_owned(),
            kind: PackageKind::App,
            module: "binary".to_owned(),
            base: None,
            runtime: None,
            uuid: None,
            description: None,
        }
    }

    fn write_spool(dir: &std::path::Path) {
        let payload = info("app", "1.0.0");
        let mut builder = tar::Builder::new(Vec::new());
        let info_json = serde_json::to_vec_pretty(&payload).unwrap();
        let mut header = tar::Header::new_gnu();
        header.set_size(info_json.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "info.json", info_json.as_slice())
            .unwrap();
        let mut header = tar::Header::new_gnu();
        header.set_size(4);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "files/bin", &b"data"[..])
            .unwrap();
        std::fs::write(dir.join("app.tar"), builder.into_inner().unwrap()).unwrap();

        let index = vec![SpoolEntry {
            info: payload,
            archive: "app.tar".to_owned(),
        }];
        std::fs::write(
            dir.join(INDEX_FILE),
            serde_json::to_vec_pretty(&index).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn empty_spool_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let spool = SpoolSource::open("stable", dir.path());
        assert!(spool.list(&FuzzyReference::from_id("app")).unwrap().is_empty());
    }

    #[test]
    fn spool_serves_indexed_layers() {
        let dir = tempfile::tempdir().unwrap();
        write_spool(dir.path());
        let spool = SpoolSource::open("stable", dir.path());

        let listed = spool.list(&FuzzyReference::from_id("app")).unwrap();
        assert_eq!(listed.len(), 1);

        let reference = Reference::new(
            "stable",
            "app",
            Version::parse("1.0.0").unwrap(),
            Architecture::X86_64,
        );
        assert_eq!(spool.module_list(&reference).unwrap(), vec!["binary"]);

        let bytes = spool.fetch(&reference, "binary").unwrap();
        assert!(!bytes.is_empty());
        assert!(spool.fetch(&reference, "develop").is_err());
    }
}
