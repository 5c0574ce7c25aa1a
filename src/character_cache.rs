use std::collections::BTreeMap;
use std::fs::{File, OpenOptions, TryLockError};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context as _;

use crate::error::StoryError;

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(200);

/// Cross-story map of lowercase character name to reference image URL,
/// stored as one JSON object.
///
/// [`CharacterCache::open_session`] reads a snapshot without locking; the file
/// is only ever replaced by rename, so readers never see a partial write.
/// [`CacheSession::commit`] takes an OS advisory lock on a file next to the
/// cache, re-reads the cache, merges the session's additions and writes it
/// back. The lock is held only for that merge, and the kernel drops it if the
/// process dies.
#[derive(Debug, Clone)]
pub struct CharacterCache {
    path: PathBuf,
    lock_timeout: Duration,
}

impl CharacterCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_timeout: Duration::from_secs(30),
        }
    }

    #[must_use]
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "characters.json".into());
        name.push(".lock");
        self.path.with_file_name(name)
    }

    pub async fn open_session(&self) -> anyhow::Result<CacheSession> {
        let entries = read_entries(&self.path)?;
        tracing::debug!(
            path = %self.path.display(),
            entries = entries.len(),
            "opened character cache session"
        );
        Ok(CacheSession {
            cache: self.clone(),
            entries,
            added: BTreeMap::new(),
        })
    }

    async fn acquire_lock(&self) -> anyhow::Result<LockGuard> {
        let lock_path = self.lock_path();
        if let Some(parent) = lock_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create character cache dir: {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("open character cache lock: {}", lock_path.display()))?;

        let started_at = Instant::now();
        loop {
            match file.try_lock() {
                Ok(()) => return Ok(LockGuard { file }),
                Err(TryLockError::WouldBlock) => {
                    if started_at.elapsed() >= self.lock_timeout {
                        return Err(StoryError::CacheLocked { path: lock_path }.into());
                    }
                    tracing::debug!(lock = %lock_path.display(), "character cache busy; waiting");
                    tokio::time::sleep(LOCK_RETRY_INTERVAL.min(self.lock_timeout)).await;
                }
                Err(TryLockError::Error(err)) => {
                    return Err(err).with_context(|| {
                        format!("lock character cache: {}", lock_path.display())
                    });
                }
            }
        }
    }
}

/// Snapshot of the cache plus this session's additions. Dropping it without
/// [`CacheSession::commit`] discards the additions.
#[derive(Debug)]
pub struct CacheSession {
    cache: CharacterCache,
    entries: BTreeMap<String, String>,
    added: BTreeMap<String, String>,
}

impl CacheSession {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(&normalize(name)).map(String::as_str)
    }

    pub fn insert(&mut self, name: &str, url: impl Into<String>) {
        let url = url.into();
        self.entries.insert(normalize(name), url.clone());
        self.added.insert(normalize(name), url);
    }

    pub fn entries(&self) -> &BTreeMap<String, String> {
        &self.entries
    }

    /// Merges this session's additions into the current file under the lock.
    /// A name another session stored in the meantime keeps its stored URL.
    pub async fn commit(self) -> anyhow::Result<()> {
        if self.added.is_empty() {
            return Ok(());
        }
        let path = self.cache.path();
        let _lock = self.cache.acquire_lock().await?;

        let mut stored = read_entries(path)?;
        for (name, url) in self.added {
            if stored.contains_key(&name) {
                tracing::debug!(character = %name, "character already cached by another session");
                continue;
            }
            stored.insert(name, url);
        }
        write_entries(path, &stored)?;
        tracing::info!(
            path = %path.display(),
            entries = stored.len(),
            "saved character cache"
        );
        Ok(())
    }
}

#[derive(Debug)]
struct LockGuard {
    file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(err) = self.file.unlock() {
            tracing::warn!(?err, "failed to release character cache lock");
        }
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

fn read_entries(path: &Path) -> anyhow::Result<BTreeMap<String, String>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("read character cache: {}", path.display()));
        }
    };
    if raw.trim().is_empty() {
        return Ok(BTreeMap::new());
    }

    let stored: BTreeMap<String, String> = serde_json::from_str(&raw)
        .with_context(|| format!("parse character cache: {}", path.display()))?;
    Ok(stored
        .into_iter()
        .map(|(name, url)| (normalize(&name), url))
        .collect())
}

fn write_entries(path: &Path, entries: &BTreeMap<String, String>) -> anyhow::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("create temp file in: {}", parent.display()))?;
    serde_json::to_writer_pretty(&mut tmp, entries).context("serialize character cache")?;
    tmp.write_all(b"\n").context("write character cache newline")?;
    tmp.flush().context("flush character cache")?;
    tmp.persist(path)
        .with_context(|| format!("replace character cache: {}", path.display()))?;
    Ok(())
}
