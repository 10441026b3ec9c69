//! Poster images cached on disk under names derived from the show identity.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::catalog::ALLANIME_REFERER;
use crate::http::{RetryPolicy, get_bytes_with_retries};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif"];
const SLUG_MAX_CHARS: usize = 48;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PosterCacheEntry {
    pub(crate) source_url: String,
    pub(crate) local_path: PathBuf,
}

#[derive(Debug)]
pub(crate) struct PosterCache {
    dir: PathBuf,
    policy: RetryPolicy,
    entries: Mutex<HashMap<String, PosterCacheEntry>>,
}

impl PosterCache {
    pub(crate) fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_policy(dir, RetryPolicy::POSTER)
    }

    pub(crate) fn with_policy(dir: impl Into<PathBuf>, policy: RetryPolicy) -> Self {
        Self {
            dir: dir.into(),
            policy,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached poster for `identity`, downloading `source_url` on a miss.
    ///
    /// Never fails: a poster that cannot be fetched or stored is simply absent.
    pub(crate) fn get_or_fetch(&self, identity: &str, source_url: &str) -> Option<PathBuf> {
        if let Some(entry) = self.lock_entries().get(identity)
            && entry.source_url != source_url.trim()
        {
            debug!(
                identity,
                cached = %entry.source_url,
                requested = source_url,
                "poster url changed, keeping cached copy"
            );
        }
        if let Some(path) = self.cached_path(identity) {
            return Some(path);
        }
        let source_url = source_url.trim();
        if source_url.is_empty() {
            return None;
        }

        let path = self
            .dir
            .join(format!("{}.{}", file_stem_for(identity), extension_for(source_url)));
        match self.fetch_to(source_url, &path) {
            Ok(()) => {
                debug!(identity, path = %path.display(), "cached poster");
                self.remember(identity, source_url, &path);
                Some(path)
            }
            Err(err) => {
                warn!(identity, url = source_url, error = %err, "poster unavailable");
                None
            }
        }
    }

    /// Looks up a previously cached poster without touching the network.
    pub(crate) fn cached_path(&self, identity: &str) -> Option<PathBuf> {
        if let Some(entry) = self.lock_entries().get(identity)
            && is_non_empty_file(&entry.local_path)
        {
            return Some(entry.local_path.clone());
        }

        let stem = file_stem_for(identity);
        IMAGE_EXTENSIONS
            .iter()
            .map(|ext| self.dir.join(format!("{stem}.{ext}")))
            .find(|path| is_non_empty_file(path))
    }

    fn fetch_to(&self, source_url: &str, path: &Path) -> Result<(), String> {
        let bytes = get_bytes_with_retries(source_url, ALLANIME_REFERER, self.policy)?;
        if bytes.is_empty() {
            return Err("empty response body".to_string());
        }

        fs::create_dir_all(&self.dir)
            .map_err(|err| format!("failed to create {}: {err}", self.dir.display()))?;
        let tmp = path.with_extension(format!("tmp-{}", std::process::id()));
        fs::write(&tmp, &bytes).map_err(|err| format!("failed to write {}: {err}", tmp.display()))?;
        fs::rename(&tmp, path).map_err(|err| {
            let _ = fs::remove_file(&tmp);
            format!("failed to move poster into {}: {err}", path.display())
        })
    }

    fn remember(&self, identity: &str, source_url: &str, path: &Path) {
        self.lock_entries().insert(
            identity.to_string(),
            PosterCacheEntry {
                source_url: source_url.to_string(),
                local_path: path.to_path_buf(),
            },
        );
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, PosterCacheEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// `<slug>-<digest>`: readable, and stable across restarts for the same identity.
pub(crate) fn file_stem_for(identity: &str) -> String {
    let slug = identity
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() {
                ch.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect::<String>()
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
        .chars()
        .take(SLUG_MAX_CHARS)
        .collect::<String>();

    let digest = Sha256::digest(identity.as_bytes());
    let short = digest
        .iter()
        .take(6)
        .map(|byte| format!("{byte:02x}"))
        .collect::<String>();

    if slug.is_empty() {
        short
    } else {
        format!("{slug}-{short}")
    }
}

fn extension_for(source_url: &str) -> &'static str {
    let path = url::Url::parse(source_url)
        .map(|url| url.path().to_string())
        .unwrap_or_default();
    let ext = Path::new(&path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    IMAGE_EXTENSIONS
        .iter()
        .find(|known| **known == ext)
        .copied()
        .unwrap_or("jpg")
}

fn is_non_empty_file(path: &Path) -> bool {
    fs::metadata(path).is_ok_and(|meta| meta.is_file() && meta.len() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::test_server::{Behavior, TestServer};
    use std::time::Duration;
    use tempfile::TempDir;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            connect_timeout: Duration::from_millis(200),
            read_timeout: Duration::from_millis(500),
            attempts: 1,
            retry_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn second_lookup_is_served_from_disk() {
        let dir = TempDir::new().expect("tempdir");
        let server = TestServer::spawn(vec![Behavior::Respond(200, vec![1, 2, 3])]);
        let cache = PosterCache::with_policy(dir.path(), fast_policy());
        let url = format!("{}/posters/naruto.png", server.base_url);

        let first = cache.get_or_fetch("naruto", &url).expect("first fetch");
        let second = cache.get_or_fetch("naruto", &url).expect("cache hit");

        assert_eq!(first, second);
        assert_eq!(server.request_count(), 1);
        assert_eq!(first.extension().and_then(|e| e.to_str()), Some("png"));
        assert_eq!(fs::read(&first).expect("poster bytes"), vec![1, 2, 3]);
    }

    #[test]
    fn cached_file_survives_a_new_cache_instance() {
        let dir = TempDir::new().expect("tempdir");
        let server = TestServer::spawn(vec![Behavior::Respond(200, vec![9])]);
        let url = format!("{}/cover", server.base_url);

        let first = PosterCache::with_policy(dir.path(), fast_policy())
            .get_or_fetch("one piece", &url)
            .expect("first fetch");
        let restarted = PosterCache::with_policy(dir.path(), fast_policy());
        assert_eq!(restarted.cached_path("one piece"), Some(first.clone()));
        assert_eq!(restarted.get_or_fetch("one piece", &url), Some(first));
        assert_eq!(server.request_count(), 1);
    }

    #[test]
    fn fetch_failures_degrade_to_no_poster() {
        let dir = TempDir::new().expect("tempdir");
        let server = TestServer::spawn(vec![Behavior::text(404, "missing")]);
        let cache = PosterCache::with_policy(dir.path(), fast_policy());

        assert_eq!(
            cache.get_or_fetch("bleach", &format!("{}/x.jpg", server.base_url)),
            None
        );
        assert_eq!(cache.get_or_fetch("bleach", ""), None);
        assert_eq!(cache.cached_path("bleach"), None);
    }

    #[test]
    fn file_stem_is_stable_and_distinguishes_identities() {
        assert_eq!(file_stem_for("Spy x Family"), file_stem_for("Spy x Family"));
        assert_ne!(file_stem_for("Spy x Family"), file_stem_for("spy-x-family"));
        assert!(file_stem_for("Spy x Family").starts_with("spy-x-family-"));
        assert_eq!(file_stem_for("進撃の巨人").len(), 12);
    }
}
