use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use silo_types::Checksum;
use tracing::warn;

use crate::error::{StoreError, StoreResult};
use crate::traits::Store;

/// Filesystem-backed repository store.
///
/// Layout under the root directory:
/// ```text
/// chunks/<first two hex chars>/<full hex>
/// objects/<first two hex chars>/<full hex>
/// indexes/<full hex>
/// lock
/// ```
/// Writes go to a temporary sibling file first and are renamed into place,
/// so a crashed write never leaves a partial record under its final name.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Open (or create) a store rooted at the given directory.
    pub fn open(root: &Path) -> StoreResult<Self> {
        fs::create_dir_all(root.join("chunks"))?;
        fs::create_dir_all(root.join("objects"))?;
        fs::create_dir_all(root.join("indexes"))?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// The store's root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn fanout_path(&self, namespace: &str, checksum: &Checksum) -> PathBuf {
        let hex = checksum.to_hex();
        self.root.join(namespace).join(&hex[..2]).join(hex)
    }

    fn index_path(&self, id: &Checksum) -> PathBuf {
        self.root.join("indexes").join(id.to_hex())
    }

    fn lock_path(&self) -> PathBuf {
        self.root.join("lock")
    }

    fn read_record(path: &Path) -> StoreResult<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_record(path: &Path, data: &[u8]) -> StoreResult<()> {
        let parent = path.parent().expect("record path has a parent");
        fs::create_dir_all(parent)?;
        let tmp = path.with_extension("tmp");
        let mut file = fs::File::create(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl Store for FsStore {
    fn get_chunk(&self, checksum: &Checksum) -> StoreResult<Option<Vec<u8>>> {
        Self::read_record(&self.fanout_path("chunks", checksum))
    }

    fn put_chunk(&self, checksum: &Checksum, data: &[u8]) -> StoreResult<()> {
        let path = self.fanout_path("chunks", checksum);
        if path.exists() {
            return Ok(());
        }
        Self::write_record(&path, data)
    }

    fn has_chunk(&self, checksum: &Checksum) -> StoreResult<bool> {
        Ok(self.fanout_path("chunks", checksum).exists())
    }

    fn get_object(&self, checksum: &Checksum) -> StoreResult<Option<Vec<u8>>> {
        Self::read_record(&self.fanout_path("objects", checksum))
    }

    fn put_object(&self, checksum: &Checksum, data: &[u8]) -> StoreResult<()> {
        let path = self.fanout_path("objects", checksum);
        if path.exists() {
            return Ok(());
        }
        Self::write_record(&path, data)
    }

    fn has_object(&self, checksum: &Checksum) -> StoreResult<bool> {
        Ok(self.fanout_path("objects", checksum).exists())
    }

    fn get_index(&self, id: &Checksum) -> StoreResult<Option<Vec<u8>>> {
        Self::read_record(&self.index_path(id))
    }

    fn put_index(&self, id: &Checksum, data: &[u8]) -> StoreResult<()> {
        Self::write_record(&self.index_path(id), data)
    }

    fn indexes(&self) -> StoreResult<Vec<Checksum>> {
        let dir = self.root.join("indexes");
        let mut ids = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.ends_with(".tmp") {
                continue;
            }
            match Checksum::from_hex(&name) {
                Ok(id) => ids.push(id),
                Err(_) => {
                    warn!("skipping malformed index record name: {name}");
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn purge(&self, id: &Checksum) -> StoreResult<bool> {
        match fs::remove_file(self.index_path(id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    fn read_lock(&self) -> StoreResult<Option<Vec<u8>>> {
        Self::read_record(&self.lock_path())
    }

    fn write_lock(&self, data: &[u8]) -> StoreResult<()> {
        Self::write_record(&self.lock_path(), data)
    }

    fn clear_lock(&self) -> StoreResult<()> {
        match fs::remove_file(self.lock_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}
