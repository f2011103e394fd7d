use std::fs::{self, File};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use uuid::Uuid;

use super::{BlobError, BlobStore};

/// Blob store writing one file per key under a root directory.
///
/// Content is written to a temporary sibling, synced, then renamed into
/// place, so a key never points at a partially written file.
#[derive(Clone, Debug)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, BlobError> {
        let root = root.as_ref().to_path_buf();
        create_dirs_durably(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path for `key`, rejecting keys that escape the root.
    pub fn path_for(&self, key: &str) -> Result<PathBuf, BlobError> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !valid {
            return Err(BlobError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    pub fn read(&self, key: &str) -> Result<Option<Vec<u8>>, BlobError> {
        match fs::read(self.path_for(key)?) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, key: &str, content: &[u8]) -> Result<(), BlobError> {
        let path = self.path_for(key)?;
        let parent = path
            .parent()
            .ok_or_else(|| BlobError::InvalidKey(key.to_string()))?;
        create_dirs_durably(parent)?;

        let tmp = parent.join(format!(".{}.tmp", Uuid::new_v4()));
        let written = File::create(&tmp).and_then(|mut file| {
            file.write_all(content)?;
            file.sync_all()
        });
        if let Err(err) = written.and_then(|()| fs::rename(&tmp, &path)) {
            let _ = fs::remove_file(&tmp);
            return Err(err.into());
        }
        // the rename is only durable once the directory entry is
        sync_dir(parent)?;
        Ok(())
    }
}

/// Create `dir` and its missing ancestors, syncing each new directory entry.
fn create_dirs_durably(dir: &Path) -> Result<(), BlobError> {
    let missing: Vec<&Path> = dir
        .ancestors()
        .take_while(|ancestor| !ancestor.as_os_str().is_empty() && !ancestor.exists())
        .collect();
    fs::create_dir_all(dir)?;
    for created in missing.iter().rev() {
        if let Some(parent) = created.parent() {
            sync_dir(parent)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<(), BlobError> {
    let dir = if dir.as_os_str().is_empty() {
        Path::new(".")
    } else {
        dir
    };
    File::open(dir)?.sync_all()?;
    Ok(())
}

// directories cannot be opened for syncing here
#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<(), BlobError> {
    Ok(())
}
