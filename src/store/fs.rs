use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::foundation::error::{ScrubResult, StoreError};
use crate::store::key::StoreKey;
use crate::store::keyed::KeyedStore;

/// Directory-backed store: one file per key under `root/namespace/`.
#[derive(Clone, Debug)]
pub struct FsStore {
    dir: PathBuf,
}

impl FsStore {
    /// Open (creating if needed) the namespace directory under `root`.
    pub fn open(root: impl AsRef<Path>, namespace: &str) -> ScrubResult<Self> {
        let ns = checked_component(namespace)?;
        let dir = root.as_ref().join(ns);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create store namespace dir '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    /// Namespace directory holding the frame files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &StoreKey) -> PathBuf {
        self.dir.join(key.as_str())
    }
}

impl KeyedStore for FsStore {
    fn read(&self, key: &StoreKey) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(key);
        std::fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => StoreError::NotFound {
                key: key.as_str().to_string(),
            },
            _ => StoreError::io(format!("read '{}': {e}", path.display())),
        })
    }

    fn write(&self, key: &StoreKey, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key);
        // Readers only ever observe complete files.
        let mut tmp = path.clone().into_os_string();
        tmp.push(".partial");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, bytes)
            .and_then(|()| std::fs::rename(&tmp, &path))
            .map_err(|e| StoreError::io(format!("write '{}': {e}", path.display())))
    }
}

fn checked_component(name: &str) -> Result<&str, StoreError> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name.ends_with(".partial")
    {
        return Err(StoreError::io(format!(
            "'{name}' is not usable as a store file name"
        )));
    }
    Ok(name)
}

#[cfg(test)]
#[path = "../../tests/unit/store/fs.rs"]
mod tests;
