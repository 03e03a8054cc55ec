use crate::StoreError;
use std::fs;
use std::path::{Path, PathBuf};
use stratum_schema::CommitId;

/// Compute the content commit of a layer tree.
///
/// The digest covers every regular file and symlink under `dir`, visited in
/// lexicographic order of the relative path, so the same tree always hashes
/// to the same commit regardless of directory-entry ordering.
pub fn tree_digest(dir: &Path) -> Result<CommitId, StoreError> {
    let mut entries = collect_entries(dir, dir)?;
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = blake3::Hasher::new();
    for (rel, full) in &entries {
        let meta = full.symlink_metadata()?;
        if meta.file_type().is_symlink() {
            let target = fs::read_link(full)?;
            hasher.update(format!("link:{rel}:{}", target.to_string_lossy()).as_bytes());
        } else if meta.is_file() {
            hasher.update(format!("file:{rel}:").as_bytes());
            hasher.update(&fs::read(full)?);
        } else if meta.is_dir() {
            hasher.update(format!("dir:{rel}").as_bytes());
        }
    }

    Ok(CommitId::new(hasher.finalize().to_hex().to_string()))
}

fn collect_entries(root: &Path, current: &Path) -> Result<Vec<(String, PathBuf)>, StoreError> {
    let mut result = Vec::new();
    if !current.exists() {
        return Ok(result);
    }
    for entry in fs::read_dir(current)? {
        let entry = entry?;
        let full = entry.path();
        let rel = full
            .strip_prefix(root)
            .map_err(|e| StoreError::Io(std::io::Error::other(format!("path strip: {e}"))))?
            .to_string_lossy()
            .to_string();

        let meta = full.symlink_metadata()?;
        if meta.is_dir() {
            result.push((rel, full.clone()));
            result.extend(collect_entries(root, &full)?);
        } else {
            result.push((rel, full));
        }
    }
    Ok(result)
}

/// Recursively copy a directory tree, preserving symlinks as symlinks.
pub(crate) fn copy_tree(src: &Path, dst: &Path) -> Result<(), StoreError> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        let meta = from.symlink_metadata()?;
        if meta.file_type().is_symlink() {
            let target = fs::read_link(&from)?;
            if to.symlink_metadata().is_ok() {
                fs::remove_file(&to)?;
            }
            std::os::unix::fs::symlink(target, &to)?;
        } else if meta.is_dir() {
            copy_tree(&from, &to)?;
        } else {
            fs::copy(&from, &to)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(dir: &Path) {
        fs::write(dir.join("a.txt"), "alpha").unwrap();
        fs::create_dir_all(dir.join("sub")).unwrap();
        fs::write(dir.join("sub").join("b.txt"), "beta").unwrap();
        std::os::unix::fs::symlink("a.txt", dir.join("link")).unwrap();
    }

    #[test]
    fn digest_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        fixture(dir.path());
        let d1 = tree_digest(dir.path()).unwrap();
        let d2 = tree_digest(dir.path()).unwrap();
        assert_eq!(d1, d2);
    }

    #[test]
    fn digest_changes_with_content() {
        let a = tempfile::tempdir().unwrap();
        fs::write(a.path().join("f"), "one").unwrap();
        let b = tempfile::tempdir().unwrap();
        fs::write(b.path().join("f"), "two").unwrap();
        assert_ne!(tree_digest(a.path()).unwrap(), tree_digest(b.path()).unwrap());
    }

    #[test]
    fn identical_trees_hash_equal() {
        let a = tempfile::tempdir().unwrap();
        fixture(a.path());
        let b = tempfile::tempdir().unwrap();
        fixture(b.path());
        assert_eq!(tree_digest(a.path()).unwrap(), tree_digest(b.path()).unwrap());
    }

    #[test]
    fn copy_tree_preserves_structure() {
        let src = tempfile::tempdir().unwrap();
        fixture(src.path());
        let dst = tempfile::tempdir().unwrap();
        let dst_path = dst.path().join("copy");
        copy_tree(src.path(), &dst_path).unwrap();

        assert_eq!(fs::read_to_string(dst_path.join("a.txt")).unwrap(), "alpha");
        assert_eq!(
            fs::read_to_string(dst_path.join("sub").join("b.txt")).unwrap(),
            "beta"
        );
        assert!(dst_path
            .join("link")
            .symlink_metadata()
            .unwrap()
            .file_type()
            .is_symlink());
        assert_eq!(
            tree_digest(src.path()).unwrap(),
            tree_digest(&dst_path).unwrap()
        );
    }
}
