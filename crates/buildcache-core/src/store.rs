//! Content-addressable blob store (C5).
//!
//! Blobs live under `<root>/blobs/<algorithm>/<hex>`. Writers never touch a
//! blob path directly: new content is staged under `<root>/ingest/<session>/`
//! and promoted into place only once every file in the session has been
//! hashed, so a reader never observes a partially-written blob.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::digest::{Algorithm, Digest};
use crate::errors::{BuildCacheError, Result};

/// A handle to a committed blob. Holds only the digest and its on-disk path;
/// reading is a separate, explicit I/O step.
#[derive(Debug, Clone)]
pub struct Blob {
    digest: Digest,
    path: PathBuf,
}

impl Blob {
    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    /// Read the whole blob into memory.
    pub async fn read(&self) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(&self.path).await?)
    }

    /// Read a `(offset, length)` window of the blob.
    pub async fn read_range(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        use tokio::io::{AsyncReadExt, AsyncSeekExt};
        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; length as usize];
        let n = file.read(&mut buf).await?;
        buf.truncate(n);
        Ok(buf)
    }
}

/// An open ingest session: a staging directory that files get written into
/// ahead of being hashed and promoted.
struct Session {
    dir: PathBuf,
}

/// Blob store rooted at a configured directory. All mutable bookkeeping
/// (the open-session table) is guarded by a single mutex acquired only for
/// the duration of one method call, per the actor-lite shape used
/// throughout the crate.
pub struct ContentStore {
    root: PathBuf,
    sessions: Mutex<std::collections::HashMap<String, Session>>,
}

impl ContentStore {
    /// Open (creating if necessary) a content store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for alg in [Algorithm::Sha256, Algorithm::Sha384, Algorithm::Sha512] {
            tokio::fs::create_dir_all(root.join("blobs").join(alg.name())).await?;
        }
        tokio::fs::create_dir_all(root.join("ingest")).await?;
        Ok(Self {
            root,
            sessions: Mutex::new(std::collections::HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.root
            .join("blobs")
            .join(digest.algorithm().name())
            .join(digest.to_hex())
    }

    /// Look up a blob by digest. Returns `None` (not an error) when the
    /// digest is unknown to this store.
    pub async fn get(&self, digest: &Digest) -> Result<Option<Blob>> {
        let path = self.blob_path(digest);
        if tokio::fs::try_exists(&path).await? {
            Ok(Some(Blob {
                digest: digest.clone(),
                path,
            }))
        } else {
            Ok(None)
        }
    }

    /// Fetch and deserialize a structured value previously stored with
    /// [`Self::put`].
    pub async fn get_decoded<T: DeserializeOwned>(&self, digest: &Digest) -> Result<Option<T>> {
        match self.get(digest).await? {
            None => Ok(None),
            Some(blob) => {
                let bytes = blob.read().await?;
                let value = serde_json::from_slice(&bytes).map_err(|e| {
                    BuildCacheError::SerializationError {
                        message: format!("failed to decode blob {digest}: {e}"),
                    }
                })?;
                Ok(Some(value))
            }
        }
    }

    /// Write a fully-hashed structured value at a digest the caller has
    /// already computed. Used for small manifests and metadata blobs rather
    /// than routing every write through an ingest session.
    pub async fn put<T: Serialize>(&self, value: &T, digest: &Digest) -> Result<()> {
        let bytes = serde_json::to_vec(value).map_err(|e| BuildCacheError::SerializationError {
            message: format!("failed to encode blob for {digest}: {e}"),
        })?;
        let path = self.blob_path(digest);
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Open a new isolated staging area for an ingest session.
    pub async fn new_ingest_session(&self) -> Result<(String, PathBuf)> {
        let session_id = uuid::Uuid::new_v4().simple().to_string();
        let dir = self.root.join("ingest").join(&session_id);
        tokio::fs::create_dir_all(&dir).await?;

        let mut sessions = self.sessions.lock().await;
        sessions.insert(session_id.clone(), Session { dir: dir.clone() });
        Ok((session_id, dir))
    }

    /// Hash every file staged in `session_id`, promote it into `blobs/`, and
    /// remove the staging directory. The directory is removed whether this
    /// call succeeds or fails, so a caller never needs to clean up manually.
    pub async fn complete_ingest_session(&self, session_id: &str) -> Result<Vec<Digest>> {
        let dir = {
            let mut sessions = self.sessions.lock().await;
            sessions
                .remove(session_id)
                .ok_or_else(|| BuildCacheError::SessionNotFound {
                    session_id: session_id.to_string(),
                })?
                .dir
        };

        let result = self.promote_session(&dir).await;
        let _ = tokio::fs::remove_dir_all(&dir).await;
        result.map_err(|e| BuildCacheError::IngestFailure {
            session_id: session_id.to_string(),
            message: e.to_string(),
        })
    }

    async fn promote_session(&self, dir: &Path) -> Result<Vec<Digest>> {
        let mut digests = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let bytes = tokio::fs::read(entry.path()).await?;
            let digest = Digest::sha256(&bytes);
            let dest = self.blob_path(&digest);
            if !tokio::fs::try_exists(&dest).await? {
                tokio::fs::write(&dest, &bytes).await?;
            }
            digests.push(digest);
        }
        Ok(digests)
    }

    /// Abandon a session, discarding any staged files without promoting them.
    pub async fn cancel_ingest_session(&self, session_id: &str) -> Result<()> {
        let dir = {
            let mut sessions = self.sessions.lock().await;
            sessions
                .remove(session_id)
                .ok_or_else(|| BuildCacheError::SessionNotFound {
                    session_id: session_id.to_string(),
                })?
                .dir
        };
        let _ = tokio::fs::remove_dir_all(&dir).await;
        Ok(())
    }

    /// Remove exactly the listed blobs. Returns the digests actually removed
    /// and the total bytes freed.
    pub async fn delete(&self, digests: &[Digest]) -> Result<(Vec<Digest>, u64)> {
        let mut removed = Vec::new();
        let mut freed = 0u64;
        for digest in digests {
            let path = self.blob_path(digest);
            if let Ok(meta) = tokio::fs::metadata(&path).await {
                if tokio::fs::remove_file(&path).await.is_ok() {
                    freed += meta.len();
                    removed.push(digest.clone());
                }
            }
        }
        Ok((removed, freed))
    }

    /// Remove every blob NOT present in `keep`.
    pub async fn delete_except(&self, keep: &HashSet<Digest>) -> Result<(Vec<Digest>, u64)> {
        let all = self.iter_digests().await?;
        let to_remove: Vec<Digest> = all.into_iter().filter(|d| !keep.contains(d)).collect();
        self.delete(&to_remove).await
    }

    /// List the digests of every committed blob.
    pub async fn iter_digests(&self) -> Result<Vec<Digest>> {
        let mut out = Vec::new();
        for alg in [Algorithm::Sha256, Algorithm::Sha384, Algorithm::Sha512] {
            let dir = self.root.join("blobs").join(alg.name());
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            while let Some(entry) = entries.next_entry().await? {
                if !entry.file_type().await?.is_file() {
                    continue;
                }
                if let Some(hex) = entry.file_name().to_str() {
                    if let Ok(digest) = Digest::parse(&format!("{}:{}", alg.name(), hex)) {
                        out.push(digest);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Size in bytes of a committed blob, if present.
    pub async fn size_of(&self, digest: &Digest) -> Result<Option<u64>> {
        let path = self.blob_path(digest);
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        value: String,
    }

    #[tokio::test]
    async fn put_and_get_structured_blob_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = ContentStore::open(dir.path()).await.unwrap();
        let sample = Sample {
            value: "hello".to_string(),
        };
        let bytes = serde_json::to_vec(&sample).unwrap();
        let digest = Digest::sha256(&bytes);

        store.put(&sample, &digest).await.unwrap();
        let decoded: Sample = store.get_decoded(&digest).await.unwrap().unwrap();
        assert_eq!(decoded, sample);
    }

    #[tokio::test]
    async fn get_on_missing_digest_returns_none() {
        let dir = TempDir::new().unwrap();
        let store = ContentStore::open(dir.path()).await.unwrap();
        let missing = Digest::sha256(b"never written");
        assert!(store.get(&missing).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ingest_session_promotes_staged_files() {
        let dir = TempDir::new().unwrap();
        let store = ContentStore::open(dir.path()).await.unwrap();

        let (session_id, staging_dir) = store.new_ingest_session().await.unwrap();
        tokio::fs::write(staging_dir.join("a"), b"file a contents")
            .await
            .unwrap();
        tokio::fs::write(staging_dir.join("b"), b"file b contents")
            .await
            .unwrap();

        let digests = store.complete_ingest_session(&session_id).await.unwrap();
        assert_eq!(digests.len(), 2);
        assert!(!tokio::fs::try_exists(&staging_dir).await.unwrap());

        for digest in &digests {
            assert!(store.get(digest).await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn cancelled_session_leaves_no_blobs() {
        let dir = TempDir::new().unwrap();
        let store = ContentStore::open(dir.path()).await.unwrap();

        let (session_id, staging_dir) = store.new_ingest_session().await.unwrap();
        tokio::fs::write(staging_dir.join("a"), b"doomed contents")
            .await
            .unwrap();

        store.cancel_ingest_session(&session_id).await.unwrap();
        assert!(!tokio::fs::try_exists(&staging_dir).await.unwrap());
        assert!(store.iter_digests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn completing_unknown_session_is_session_not_found() {
        let dir = TempDir::new().unwrap();
        let store = ContentStore::open(dir.path()).await.unwrap();
        let err = store.complete_ingest_session("does-not-exist").await;
        assert!(matches!(err, Err(BuildCacheError::SessionNotFound { .. })));
    }

    #[tokio::test]
    async fn delete_except_keeps_only_the_retained_set() {
        let dir = TempDir::new().unwrap();
        let store = ContentStore::open(dir.path()).await.unwrap();

        let (session_id, staging_dir) = store.new_ingest_session().await.unwrap();
        tokio::fs::write(staging_dir.join("keep"), b"keep me").await.unwrap();
        tokio::fs::write(staging_dir.join("drop"), b"drop me").await.unwrap();
        let digests = store.complete_ingest_session(&session_id).await.unwrap();

        let keep_digest = Digest::sha256(b"keep me");
        let mut keep = HashSet::new();
        keep.insert(keep_digest.clone());

        let (removed, freed) = store.delete_except(&keep).await.unwrap();
        assert_eq!(removed.len(), 1);
        assert!(freed > 0);
        assert!(store.get(&keep_digest).await.unwrap().is_some());
        let dropped = digests.into_iter().find(|d| *d != keep_digest).unwrap();
        assert!(store.get(&dropped).await.unwrap().is_none());
    }
}
