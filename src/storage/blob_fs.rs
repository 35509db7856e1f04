use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::error::{PrismError, PrismResult};

use super::blob::{parse_blob_ref, sha256_ref, BlobStore, HEX_DIGEST_LEN};

/// Reserved prefix for in-progress writes; the garbage collector skips these.
const TMP_PREFIX: &str = ".tmp-";

/// Content-addressed blob store on the local filesystem.
///
/// Layout: `<base_dir>/<hex[..2]>/<hex>`. Two hex characters of fanout keep
/// directories small while the whole tree stays trivially walkable for GC.
pub struct FileBlobStore {
    base_dir: PathBuf,
}

impl FileBlobStore {
    pub fn new<P: AsRef<Path>>(base_dir: P) -> PrismResult<Self> {
        let base_dir = base_dir.as_ref();
        if base_dir.as_os_str().is_empty() {
            return Err(PrismError::config("blob base dir is empty"));
        }
        fs::create_dir_all(base_dir)?;
        Ok(Self {
            base_dir: base_dir.to_path_buf(),
        })
    }

    fn path_for(&self, hex_digest: &str) -> PathBuf {
        self.base_dir.join(&hex_digest[..2]).join(hex_digest)
    }

    /// Remove unreferenced blobs older than `min_age`.
    ///
    /// `referenced` holds the canonical refs stored in live log rows; those
    /// objects are never deleted. The age floor avoids racing a just-written
    /// blob whose log row has not reached the durable table yet. Returns the
    /// number of objects deleted.
    pub fn garbage_collect(
        &self,
        referenced: &[String],
        min_age: Duration,
    ) -> PrismResult<usize> {
        let referenced: HashSet<String> = referenced
            .iter()
            .filter_map(|r| parse_blob_ref(r).ok())
            .collect();

        let cutoff = if min_age > Duration::ZERO {
            SystemTime::now().checked_sub(min_age)
        } else {
            None
        };

        let mut deleted = 0;
        for prefix_entry in fs::read_dir(&self.base_dir)? {
            let prefix_entry = prefix_entry?;
            if !prefix_entry.file_type()?.is_dir() {
                continue;
            }
            for entry in fs::read_dir(prefix_entry.path())? {
                let entry = entry?;
                if !entry.file_type()?.is_file() {
                    continue;
                }
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                if name.starts_with(TMP_PREFIX) {
                    continue;
                }
                if name.len() != HEX_DIGEST_LEN || hex::decode(name).is_err() {
                    continue;
                }
                if referenced.contains(name) {
                    continue;
                }
                if let Some(cutoff) = cutoff {
                    if let Ok(modified) = entry.metadata().and_then(|m| m.modified()) {
                        if modified > cutoff {
                            continue;
                        }
                    }
                }
                if fs::remove_file(entry.path()).is_ok() {
                    deleted += 1;
                }
            }
            // Best-effort: drops the prefix dir only when it is now empty.
            let _ = fs::remove_dir(prefix_entry.path());
        }

        Ok(deleted)
    }
}

impl BlobStore for FileBlobStore {
    fn put(&self, data: &[u8]) -> PrismResult<String> {
        let (blob_ref, hex_digest) = sha256_ref(data);

        let final_path = self.path_for(&hex_digest);
        if final_path.exists() {
            return Ok(blob_ref);
        }

        let dir = self
            .base_dir
            .join(&hex_digest[..2]);
        fs::create_dir_all(&dir)?;

        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let tmp_path = dir.join(format!("{}{}-{}", TMP_PREFIX, hex_digest, nanos));
        fs::write(&tmp_path, data)?;

        // Rename is atomic on the same filesystem.
        if let Err(err) = fs::rename(&tmp_path, &final_path) {
            // If another writer won the race, keep the existing blob.
            if final_path.exists() {
                let _ = fs::remove_file(&tmp_path);
                return Ok(blob_ref);
            }
            let _ = fs::remove_file(&tmp_path);
            return Err(PrismError::file_system(format!("store blob: {}", err)));
        }

        debug!("stored blob {} ({} bytes)", blob_ref, data.len());
        Ok(blob_ref)
    }

    fn get(&self, blob_ref: &str) -> PrismResult<Vec<u8>> {
        let hex_digest = parse_blob_ref(blob_ref)?;
        match fs::read(self.path_for(&hex_digest)) {
            Ok(data) => Ok(data),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(PrismError::BlobNotFound)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn exists(&self, blob_ref: &str) -> PrismResult<bool> {
        let hex_digest = parse_blob_ref(blob_ref)?;
        Ok(self.path_for(&hex_digest).exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (FileBlobStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = FileBlobStore::new(dir.path()).unwrap();
        (store, dir)
    }

    #[test]
    fn test_put_get_exists_roundtrip() {
        let (store, _dir) = store();

        let blob_ref = store.put(b"payload").unwrap();
        assert!(blob_ref.starts_with("sha256:"));
        assert!(store.exists(&blob_ref).unwrap());
        assert_eq!(store.get(&blob_ref).unwrap(), b"payload");
    }

    #[test]
    fn test_put_is_content_addressed_and_idempotent() {
        let (store, _dir) = store();

        let ref1 = store.put(b"same bytes").unwrap();
        let ref2 = store.put(b"same bytes").unwrap();
        let ref3 = store.put(b"other bytes").unwrap();

        assert_eq!(ref1, ref2);
        assert_ne!(ref1, ref3);
        assert_eq!(store.get(&ref1).unwrap(), b"same bytes");
    }

    #[test]
    fn test_get_missing_blob() {
        let (store, _dir) = store();
        let absent = format!("sha256:{}", "0".repeat(64));
        assert!(matches!(store.get(&absent), Err(PrismError::BlobNotFound)));
        assert!(!store.exists(&absent).unwrap());
    }

    #[test]
    fn test_get_invalid_ref() {
        let (store, _dir) = store();
        assert!(matches!(
            store.get("sha256:nope"),
            Err(PrismError::InvalidBlobRef)
        ));
        assert!(matches!(
            store.get("md5:abcd"),
            Err(PrismError::UnsupportedBlobAlgo)
        ));
    }

    #[test]
    fn test_gc_keeps_referenced_and_removes_rest() {
        let (store, dir) = store();

        let live = store.put(b"alpha").unwrap();
        let dead = store.put(b"beta").unwrap();

        let deleted = store
            .garbage_collect(&[live.clone()], Duration::ZERO)
            .unwrap();

        assert_eq!(deleted, 1);
        assert!(store.exists(&live).unwrap());
        assert!(!store.exists(&dead).unwrap());

        // The prefix directory of the removed blob is gone when empty.
        let dead_hex = parse_blob_ref(&dead).unwrap();
        assert!(!dir.path().join(&dead_hex[..2]).join(&dead_hex).exists());
    }

    #[test]
    fn test_gc_age_floor_protects_recent_blobs() {
        let (store, _dir) = store();

        let fresh = store.put(b"freshly written").unwrap();
        let deleted = store
            .garbage_collect(&[], Duration::from_secs(3600))
            .unwrap();

        assert_eq!(deleted, 0);
        assert!(store.exists(&fresh).unwrap());
    }

    #[test]
    fn test_gc_skips_tmp_and_foreign_files() {
        let (store, dir) = store();

        let prefix = dir.path().join("ab");
        fs::create_dir_all(&prefix).unwrap();
        fs::write(prefix.join(format!("{}junk", TMP_PREFIX)), b"tmp").unwrap();
        fs::write(prefix.join("not-a-digest"), b"foreign").unwrap();

        let deleted = store.garbage_collect(&[], Duration::ZERO).unwrap();
        assert_eq!(deleted, 0);
        assert!(prefix.join(format!("{}junk", TMP_PREFIX)).exists());
        assert!(prefix.join("not-a-digest").exists());
    }
}
