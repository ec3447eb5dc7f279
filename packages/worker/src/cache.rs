//! Content-addressed binary cache.
//!
//! Binaries are stored as `<cache_dir>/<sha256-hex>` and looked up by
//! digest. Hits are reverified by streaming the file before reuse, so a
//! corrupted entry falls back to a fresh download. The cache holds at
//! most `max_bytes` on disk; over budget, the least recently used
//! entries are evicted.
//!
//! A single worker process owns its cache directory exclusively; one
//! process-wide lock serializes index access, which is fine because
//! downloads dominate.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use futures::StreamExt;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Why a binary could not be prepared. Any of these fails the job with a
/// descriptive message; none of them is fatal to the worker.
#[derive(Debug, thiserror::Error)]
pub enum PrepError {
    #[error("failed to download {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("download of {url} returned HTTP {status}")]
    HttpStatus {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("digest mismatch for {url}: expected {expected}, got {actual}")]
    DigestMismatch {
        url: String,
        expected: String,
        actual: String,
    },

    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
struct CacheEntry {
    path: PathBuf,
    size: u64,
    last_access: SystemTime,
}

/// On-disk cache of verified job binaries, keyed by SHA-256 digest.
pub struct BinaryCache {
    dir: PathBuf,
    max_bytes: u64,
    http: reqwest::Client,
    index: Mutex<HashMap<String, CacheEntry>>,
}

impl BinaryCache {
    /// Open (or create) the cache directory and index any binaries a
    /// previous incarnation left behind.
    pub fn new(dir: impl Into<PathBuf>, max_bytes: u64) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let mut index = HashMap::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_hex_digest(&name) {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(m) if m.is_file() => m,
                _ => continue,
            };
            index.insert(
                name,
                CacheEntry {
                    path: entry.path(),
                    size: metadata.len(),
                    last_access: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                },
            );
        }

        debug!(dir = %dir.display(), entries = index.len(), "binary cache opened");

        Ok(Self {
            dir,
            max_bytes,
            http: reqwest::Client::new(),
            index: Mutex::new(index),
        })
    }

    /// Return a path to a local executable whose SHA-256 equals
    /// `expected_digest`, downloading from `url` on a cache miss.
    pub async fn get_binary(&self, url: &str, expected_digest: &str) -> Result<PathBuf, PrepError> {
        let digest = expected_digest.to_ascii_lowercase();
        let mut index = self.index.lock().await;

        if let Some(entry) = index.get(&digest) {
            let path = entry.path.clone();
            match hash_file(&path).await {
                Ok(actual) if actual == digest => {
                    debug!(digest = %digest, "binary cache hit");
                    let now = SystemTime::now();
                    touch(&path, now);
                    if let Some(entry) = index.get_mut(&digest) {
                        entry.last_access = now;
                    }
                    return Ok(path);
                }
                Ok(actual) => {
                    warn!(digest = %digest, actual = %actual, "cached binary is corrupt, discarding");
                    let _ = std::fs::remove_file(&path);
                    index.remove(&digest);
                }
                Err(e) => {
                    warn!(digest = %digest, error = %e, "failed to reverify cached binary, discarding");
                    let _ = std::fs::remove_file(&path);
                    index.remove(&digest);
                }
            }
        }

        let path = self.download(url, &digest).await?;
        let size = std::fs::metadata(&path)?.len();
        index.insert(
            digest.clone(),
            CacheEntry {
                path: path.clone(),
                size,
                last_access: SystemTime::now(),
            },
        );

        self.evict(&mut index);
        Ok(path)
    }

    /// Stream the URL to a temp file, hashing in flight, then atomically
    /// move it into place once the digest checks out.
    async fn download(&self, url: &str, expected: &str) -> Result<PathBuf, PrepError> {
        info!(url, digest = %expected, "downloading binary");

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|source| PrepError::Download {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PrepError::HttpStatus {
                url: url.to_string(),
                status,
            });
        }

        let mut temp = tempfile::NamedTempFile::new_in(&self.dir)?;
        let mut hasher = Sha256::new();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|source| PrepError::Download {
                url: url.to_string(),
                source,
            })?;
            hasher.update(&chunk);
            temp.write_all(&chunk)?;
        }
        temp.flush()?;

        let actual = hex::encode(hasher.finalize());
        if actual != expected {
            // Dropping the temp file deletes it.
            return Err(PrepError::DigestMismatch {
                url: url.to_string(),
                expected: expected.to_string(),
                actual,
            });
        }

        let path = self.dir.join(expected);
        make_executable(temp.path())?;
        temp.persist(&path).map_err(|e| PrepError::Io(e.error))?;

        info!(digest = %expected, path = %path.display(), "binary cached");
        Ok(path)
    }

    /// Drop least-recently-used entries until the cache fits the budget.
    /// I/O failures are logged, never fatal.
    fn evict(&self, index: &mut HashMap<String, CacheEntry>) {
        let mut total: u64 = index.values().map(|e| e.size).sum();
        if total <= self.max_bytes {
            return;
        }

        let mut by_age: Vec<(String, SystemTime, u64)> = index
            .iter()
            .map(|(digest, entry)| (digest.clone(), entry.last_access, entry.size))
            .collect();
        by_age.sort_by_key(|(_, last_access, _)| *last_access);

        for (digest, _, size) in by_age {
            if total <= self.max_bytes {
                break;
            }
            if let Some(entry) = index.remove(&digest) {
                if let Err(e) = std::fs::remove_file(&entry.path) {
                    warn!(digest = %digest, error = %e, "failed to evict cached binary");
                }
                info!(digest = %digest, size, "evicted binary from cache");
                total = total.saturating_sub(size);
            }
        }
    }

    /// Number of entries currently indexed.
    pub async fn len(&self) -> usize {
        self.index.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.index.lock().await.is_empty()
    }
}

fn is_hex_digest(name: &str) -> bool {
    name.len() == 64 && name.chars().all(|c| c.is_ascii_hexdigit())
}

/// SHA-256 of a file's contents, hex-encoded, streamed in chunks.
async fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

fn make_executable(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

/// Best-effort mtime bump so LRU state survives a restart.
fn touch(path: &Path, now: SystemTime) {
    if let Ok(file) = std::fs::File::open(path) {
        if let Err(e) = file.set_modified(now) {
            debug!(path = %path.display(), error = %e, "failed to touch cache entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_digest_names_recognized() {
        assert!(is_hex_digest(&"ab".repeat(32)));
        assert!(!is_hex_digest("README"));
        assert!(!is_hex_digest(&"zz".repeat(32)));
        assert!(!is_hex_digest(&"ab".repeat(31)));
    }

    #[tokio::test]
    async fn opens_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let cache = BinaryCache::new(dir.path(), 1024).unwrap();
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn indexes_existing_digest_named_files() {
        let dir = tempfile::tempdir().unwrap();
        let digest = "ab".repeat(32);
        std::fs::write(dir.path().join(&digest), b"payload").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let cache = BinaryCache::new(dir.path(), 1024).unwrap();
        assert_eq!(cache.len().await, 1);
    }
}
