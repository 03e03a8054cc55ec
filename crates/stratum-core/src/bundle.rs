//! Bundle readers for offline installs.
//!
//! Two single-file forms exist. The *layer* form is one packed layer
//! directory (`info.json` + `files/`). The *archive* form carries several
//! layers (one app plus its runtime/base), a `metadata.json` manifest with a
//! content digest acting as the bundle signature, and optionally a `sign/`
//! directory whose content is overlaid onto the app layer on import.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::{Path, PathBuf};
use stratum_schema::PackageInfo;
use stratum_store::tree_digest;
use tempfile::TempDir;

const METADATA_FILE: &str = "metadata.json";
const LAYERS_DIR: &str = "layers";
const SIGN_DIR: &str = "sign";

/// One layer listed in an archive-form bundle manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleLayer {
    pub info: PackageInfo,
    #[serde(default)]
    pub minified: bool,
}

/// Archive-form bundle manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleMetaInfo {
    /// Bundle identity; used as the subref for minified layers.
    pub uuid: String,
    /// Digest over the bundled layer trees; the bundle signature.
    pub digest: String,
    pub layers: Vec<BundleLayer>,
}

/// A layer-form bundle, unpacked into a temporary mount.
pub struct LayerBundle {
    dir: TempDir,
    info: PackageInfo,
}

impl LayerBundle {
    pub fn open(reader: impl Read) -> Result<Self, Error> {
        let dir = unpack(reader)?;
        let info = read_info(dir.path())?;
        if !dir.path().join("files").exists() {
            return Err(Error::InvalidArgument(
                "layer bundle carries no files directory".to_owned(),
            ));
        }
        Ok(Self { dir, info })
    }

    pub fn info(&self) -> &PackageInfo {
        &self.info
    }

    /// The unpacked layer directory, ready for `import_layer_dir`.
    pub fn layer_dir(&self) -> &Path {
        self.dir.path()
    }
}

/// An archive-form bundle, unpacked into a temporary mount.
pub struct ArchiveBundle {
    dir: TempDir,
    meta: BundleMetaInfo,
}

impl ArchiveBundle {
    pub fn open(reader: impl Read) -> Result<Self, Error> {
        let dir = unpack(reader)?;
        let meta_path = dir.path().join(METADATA_FILE);
        if !meta_path.exists() {
            return Err(Error::InvalidArgument(
                "not a bundle: missing metadata manifest".to_owned(),
            ));
        }
        let content = std::fs::read_to_string(&meta_path)
            .map_err(|e| Error::InvalidArgument(format!("unreadable bundle manifest: {e}")))?;
        let meta: BundleMetaInfo = serde_json::from_str(&content)
            .map_err(|e| Error::InvalidArgument(format!("malformed bundle manifest: {e}")))?;
        Ok(Self { dir, meta })
    }

    pub fn meta(&self) -> &BundleMetaInfo {
        &self.meta
    }

    /// Check the bundle signature: the manifest digest must match the
    /// content of the bundled layer trees.
    pub fn verify(&self) -> Result<(), Error> {
        let actual = tree_digest(&self.dir.path().join(LAYERS_DIR))
            .map_err(|e| Error::Internal(format!("cannot digest bundle layers: {e}")))?;
        if actual.as_str() != self.meta.digest {
            return Err(Error::BundleVerificationFailed);
        }
        Ok(())
    }

    /// Directory of one bundled layer: `layers/<id>/<module>`.
    pub fn layer_dir(&self, layer: &BundleLayer) -> PathBuf {
        self.dir
            .path()
            .join(LAYERS_DIR)
            .join(&layer.info.id)
            .join(&layer.info.module)
    }

    /// Signature data shipped alongside the app layer, if any.
    pub fn sign_data_dir(&self) -> Option<PathBuf> {
        let dir = self.dir.path().join(SIGN_DIR);
        dir.exists().then_some(dir)
    }
}

fn unpack(reader: impl Read) -> Result<TempDir, Error> {
    let dir = tempfile::tempdir()
        .map_err(|e| Error::Internal(format!("cannot create bundle mount: {e}")))?;
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_mtime(false);
    archive
        .unpack(dir.path())
        .map_err(|e| Error::InvalidArgument(format!("cannot unpack bundle: {e}")))?;
    Ok(dir)
}

fn read_info(dir: &Path) -> Result<PackageInfo, Error> {
    let path = dir.join("info.json");
    if !path.exists() {
        return Err(Error::InvalidArgument(
            "layer bundle carries no info.json".to_owned(),
        ));
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::InvalidArgument(format!("unreadable layer info: {e}")))?;
    serde_json::from_str(&content)
        .map_err(|e| Error::InvalidArgument(format!("malformed layer info: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_schema::PackageKind;

    fn info(id: &str, module: &str, kind: PackageKind) -> PackageInfo {
        PackageInfo {
            id: id.to_owned(),
            version: "1.0.0".to_owned(),
            channel: "stable".to_owned(),
            arch: "x86_64".to_owned(),
            kind,
            module: module.to_owned(),
            base: Some("org.example.base/23.0.0".to_owned()),
            runtime: None,
            uuid: None,
            description: None,
        }
    }

    fn append(builder: &mut tar::Builder<Vec<u8>>, path: &str, data: &[u8]) {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, data).unwrap();
    }

    fn layer_bundle_tar(info: &PackageInfo) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        append(
            &mut builder,
            "info.json",
            &serde_json::to_vec_pretty(info).unwrap(),
        );
        append(&mut builder, "files/bin/app", b"#!/bin/sh\n");
        builder.into_inner().unwrap()
    }

    /// Build an archive bundle; the digest is computed over an equivalent
    /// staged tree the same way the daemon recomputes it on open.
    fn archive_bundle_tar(layers: &[(PackageInfo, bool)], corrupt: bool) -> Vec<u8> {
        let stage = tempfile::tempdir().unwrap();
        let layers_root = stage.path().join(LAYERS_DIR);
        for (info, _) in layers {
            let dir = layers_root.join(&info.id).join(&info.module);
            std::fs::create_dir_all(dir.join("files")).unwrap();
            std::fs::write(
                dir.join("info.json"),
                serde_json::to_vec_pretty(info).unwrap(),
            )
            .unwrap();
            std::fs::write(dir.join("files").join("payload"), info.id.as_bytes()).unwrap();
        }
        let digest = tree_digest(&layers_root).unwrap().into_inner();

        let meta = BundleMetaInfo {
            uuid: "bundle-uuid-1".to_owned(),
            digest: if corrupt { "0000".to_owned() } else { digest },
            layers: layers
                .iter()
                .map(|(info, minified)| BundleLayer {
                    info: info.clone(),
                    minified: *minified,
                })
                .collect(),
        };

        let mut builder = tar::Builder::new(Vec::new());
        append(
            &mut builder,
            METADATA_FILE,
            &serde_json::to_vec_pretty(&meta).unwrap(),
        );
        for (info, _) in layers {
            let prefix = format!("{LAYERS_DIR}/{}/{}", info.id, info.module);
            append(
                &mut builder,
                &format!("{prefix}/info.json"),
                &serde_json::to_vec_pretty(info).unwrap(),
            );
            append(
                &mut builder,
                &format!("{prefix}/files/payload"),
                info.id.as_bytes(),
            );
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn layer_bundle_roundtrip() {
        let payload = info("org.example.calc", "binary", PackageKind::App);
        let tar = layer_bundle_tar(&payload);
        let bundle = LayerBundle::open(tar.as_slice()).unwrap();
        assert_eq!(bundle.info().id, "org.example.calc");
        assert!(bundle.layer_dir().join("files").join("bin").exists());
    }

    #[test]
    fn layer_bundle_without_info_fails() {
        let mut builder = tar::Builder::new(Vec::new());
        append(&mut builder, "files/something", b"x");
        let tar = builder.into_inner().unwrap();
        assert!(LayerBundle::open(tar.as_slice()).is_err());
    }

    #[test]
    fn archive_bundle_verifies() {
        let app = info("org.example.calc", "binary", PackageKind::App);
        let base = info("org.example.base", "binary", PackageKind::Base);
        let tar = archive_bundle_tar(&[(app, false), (base, true)], false);

        let bundle = ArchiveBundle::open(tar.as_slice()).unwrap();
        bundle.verify().unwrap();
        assert_eq!(bundle.meta().layers.len(), 2);
        assert!(bundle.meta().layers[1].minified);

        let app_dir = bundle.layer_dir(&bundle.meta().layers[0].clone());
        assert!(app_dir.join("info.json").exists());
    }

    #[test]
    fn tampered_archive_fails_verification() {
        let app = info("org.example.calc", "binary", PackageKind::App);
        let tar = archive_bundle_tar(&[(app, false)], true);
        let bundle = ArchiveBundle::open(tar.as_slice()).unwrap();
        assert!(matches!(
            bundle.verify(),
            Err(Error::BundleVerificationFailed)
        ));
    }

    #[test]
    fn archive_without_manifest_is_rejected() {
        let mut builder = tar::Builder::new(Vec::new());
        append(&mut builder, "layers/x/binary/info.json", b"{}");
        let tar = builder.into_inner().unwrap();
        assert!(ArchiveBundle::open(tar.as_slice()).is_err());
    }

    #[test]
    fn sign_data_dir_is_optional() {
        let app = info("org.example.calc", "binary", PackageKind::App);
        let tar = archive_bundle_tar(&[(app, false)], false);
        let bundle = ArchiveBundle::open(tar.as_slice()).unwrap();
        assert!(bundle.sign_data_dir().is_none());
    }
}
