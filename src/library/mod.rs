//! On-disk library view.
//!
//! Every call lists the downloads directory again; nothing about its contents is cached
//! between calls because ani-cli writes into it from other threads at any time.

mod filename;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, warn};

use crate::error::EngineError;

pub(crate) use self::filename::{ParsedFilename, normalize_title_key, parse_filename};

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "webm", "avi", "m4v", "mov", "ts"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EpisodeFile {
    pub(crate) filename: String,
    pub(crate) absolute_path: PathBuf,
    pub(crate) media_url: String,
    pub(crate) size: u64,
    pub(crate) modified: SystemTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LibraryEntry {
    pub(crate) title: String,
    pub(crate) title_key: String,
    pub(crate) poster_path: Option<PathBuf>,
    pub(crate) total_episodes: Option<u32>,
    pub(crate) downloaded_episodes: BTreeSet<u32>,
    pub(crate) files_by_episode: BTreeMap<u32, EpisodeFile>,
}

impl LibraryEntry {
    fn new(title: String, title_key: String) -> Self {
        Self {
            title,
            title_key,
            poster_path: None,
            total_episodes: None,
            downloaded_episodes: BTreeSet::new(),
            files_by_episode: BTreeMap::new(),
        }
    }

    /// Keeps the newer of two files claiming the same episode.
    fn insert_file(&mut self, episode: u32, file: EpisodeFile) {
        let replace = match self.files_by_episode.get(&episode) {
            None => true,
            Some(existing) => {
                (file.modified, &file.filename) > (existing.modified, &existing.filename)
            }
        };
        if replace {
            self.files_by_episode.insert(episode, file);
            self.downloaded_episodes.insert(episode);
        }
    }

    pub(crate) fn latest_file(&self) -> Option<&EpisodeFile> {
        self.files_by_episode
            .values()
            .max_by(|left, right| {
                (left.modified, &left.filename).cmp(&(right.modified, &right.filename))
            })
    }

    pub(crate) fn downloaded_count(&self) -> usize {
        self.downloaded_episodes.len()
    }

    /// `"3/12"` when the total is known, otherwise just the downloaded count.
    pub(crate) fn progress_text(&self) -> String {
        match self.total_episodes {
            Some(total) => format!("{}/{total}", self.downloaded_count()),
            None => self.downloaded_count().to_string(),
        }
    }

    /// Episodes in `1..=total` that are not on disk; empty when the total is unknown.
    pub(crate) fn missing_episodes(&self) -> Vec<u32> {
        let Some(total) = self.total_episodes else {
            return Vec::new();
        };
        (1..=total)
            .filter(|episode| !self.downloaded_episodes.contains(episode))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct LibraryIndex {
    downloads_dir: PathBuf,
}

impl LibraryIndex {
    pub(crate) fn new(downloads_dir: impl Into<PathBuf>) -> Self {
        Self {
            downloads_dir: downloads_dir.into(),
        }
    }

    pub(crate) fn downloads_dir(&self) -> &Path {
        &self.downloads_dir
    }

    pub(crate) fn scan(&self) -> Result<Vec<LibraryEntry>, EngineError> {
        scan_directory(&self.downloads_dir)
    }

    pub(crate) fn entry_for(&self, title_key: &str) -> Result<Option<LibraryEntry>, EngineError> {
        Ok(self
            .scan()?
            .into_iter()
            .find(|entry| entry.title_key == title_key))
    }

    pub(crate) fn find_episode(
        &self,
        title_key: &str,
        episode: u32,
    ) -> Result<Option<EpisodeFile>, EngineError> {
        Ok(self
            .entry_for(title_key)?
            .and_then(|mut entry| entry.files_by_episode.remove(&episode)))
    }
}

pub(crate) fn scan_directory(dir: &Path) -> Result<Vec<LibraryEntry>, EngineError> {
    let listing = match fs::read_dir(dir) {
        Ok(listing) => listing,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!(path = %dir.display(), "downloads directory does not exist yet");
            return Ok(Vec::new());
        }
        Err(err) => {
            return Err(EngineError::io(
                format!("failed to read downloads directory {}", dir.display()),
                err,
            ));
        }
    };

    let base = absolute_dir(dir);
    let mut grouped: HashMap<String, LibraryEntry> = HashMap::new();
    let mut title_stamp: HashMap<String, (SystemTime, String)> = HashMap::new();
    let mut skipped = 0_usize;

    for dir_entry in listing {
        // Entries can vanish between listing and stat while ani-cli renames its temp files.
        let Ok(dir_entry) = dir_entry else {
            skipped += 1;
            continue;
        };
        let Some(name) = dir_entry.file_name().to_str().map(str::to_string) else {
            skipped += 1;
            continue;
        };
        if !has_video_extension(&name) {
            continue;
        }
        let metadata = match dir_entry.metadata() {
            Ok(metadata) if metadata.is_file() && metadata.len() > 0 => metadata,
            Ok(_) => continue,
            Err(err) => {
                warn!(file = %name, error = %err, "failed to stat downloaded file");
                skipped += 1;
                continue;
            }
        };
        let Some(ParsedFilename {
            title,
            title_key,
            episode,
        }) = parse_filename(&name)
        else {
            skipped += 1;
            continue;
        };

        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let absolute_path = base.join(&name);
        let file = EpisodeFile {
            media_url: media_url_for(&absolute_path),
            filename: name,
            absolute_path,
            size: metadata.len(),
            modified,
        };

        let entry = grouped
            .entry(title_key.clone())
            .or_insert_with(|| LibraryEntry::new(title.clone(), title_key.clone()));
        // Display title follows the newest file, ties broken by filename, so renamed
        // shows pick up the new spelling regardless of listing order.
        let candidate = (modified, file.filename.clone());
        match title_stamp.get_mut(&title_key) {
            None => {
                title_stamp.insert(title_key, candidate);
            }
            Some(stamp) if candidate > *stamp => {
                *stamp = candidate;
                entry.title = title;
            }
            Some(_) => {}
        }
        entry.insert_file(episode, file);
    }

    let mut entries = grouped.into_values().collect::<Vec<_>>();
    entries.sort_by(|left, right| left.title_key.cmp(&right.title_key));
    debug!(
        path = %dir.display(),
        titles = entries.len(),
        skipped,
        "scanned downloads directory"
    );
    Ok(entries)
}

fn has_video_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
}

fn absolute_dir(dir: &Path) -> PathBuf {
    if dir.is_absolute() {
        return dir.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(dir))
        .unwrap_or_else(|_| dir.to_path_buf())
}

fn media_url_for(path: &Path) -> String {
    url::Url::from_file_path(path)
        .map(|url| url.to_string())
        .unwrap_or_else(|_| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;

    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).expect("write test file");
        path
    }

    fn set_modified(path: &Path, modified: SystemTime) {
        File::options()
            .write(true)
            .open(path)
            .expect("open test file")
            .set_modified(modified)
            .expect("set mtime");
    }

    #[test]
    fn groups_files_by_title_key() {
        let dir = TempDir::new().expect("tempdir");
        write_file(dir.path(), "Naruto Episode 1.mp4", b"a");
        write_file(dir.path(), "naruto_episode_2.mkv", b"b");
        write_file(dir.path(), "Bleach Episode 10.mp4", b"c");

        let entries = scan_directory(dir.path()).expect("scan");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].title_key, "bleach");
        assert_eq!(entries[1].title_key, "naruto");
        assert_eq!(
            entries[1].downloaded_episodes.iter().copied().collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(entries[1].total_episodes, None);
    }

    #[test]
    fn downloaded_episodes_match_files_by_episode() {
        let dir = TempDir::new().expect("tempdir");
        write_file(dir.path(), "Show Episode 3.mp4", b"a");
        write_file(dir.path(), "Show Episode 5.mp4", b"a");

        let entries = scan_directory(dir.path()).expect("scan");
        let entry = &entries[0];
        assert_eq!(
            entry.downloaded_episodes,
            entry.files_by_episode.keys().copied().collect::<BTreeSet<_>>()
        );
        for file in entry.files_by_episode.values() {
            assert!(file.absolute_path.exists());
            assert!(file.media_url.starts_with("file://"));
        }
    }

    #[test]
    fn newest_file_wins_for_duplicate_episode() {
        let dir = TempDir::new().expect("tempdir");
        let stale = write_file(dir.path(), "Show Episode 4.mkv", b"partial");
        let fresh = write_file(dir.path(), "Show - 04 [1080p].mp4", b"complete");
        let now = SystemTime::now();
        set_modified(&stale, now - Duration::from_secs(3600));
        set_modified(&fresh, now);

        let entries = scan_directory(dir.path()).expect("scan");
        let file = entries[0].files_by_episode.get(&4).expect("episode 4");
        assert_eq!(file.filename, "Show - 04 [1080p].mp4");
    }

    #[test]
    fn display_title_tie_on_mtime_is_broken_by_filename() {
        let stamp = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let orders = [
            ["MY SHOW Episode 2.mp4", "My Show Episode 1.mp4"],
            ["My Show Episode 1.mp4", "MY SHOW Episode 2.mp4"],
        ];
        for order in orders {
            let dir = TempDir::new().expect("tempdir");
            for name in order {
                let path = write_file(dir.path(), name, b"a");
                set_modified(&path, stamp);
            }

            let entries = scan_directory(dir.path()).expect("scan");
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].title, "My Show");
            assert_eq!(
                entries[0].latest_file().map(|file| file.filename.as_str()),
                Some("My Show Episode 1.mp4")
            );
        }
    }

    #[test]
    fn skips_partial_unparseable_and_non_video_files() {
        let dir = TempDir::new().expect("tempdir");
        write_file(dir.path(), "Show Episode 1.mp4.part", b"x");
        write_file(dir.path(), "Show Episode 2.mp4", b"");
        write_file(dir.path(), "poster.jpg", b"x");
        write_file(dir.path(), "Random Clip.mp4", b"x");
        fs::create_dir(dir.path().join("Show Episode 3.mp4")).expect("mkdir");

        let entries = scan_directory(dir.path()).expect("scan");
        assert!(entries.is_empty(), "unexpected entries: {entries:?}");
    }

    #[test]
    fn missing_directory_scans_as_empty() {
        let dir = TempDir::new().expect("tempdir");
        let entries = scan_directory(&dir.path().join("absent")).expect("scan");
        assert!(entries.is_empty());
    }

    #[test]
    fn consecutive_scans_are_identical() {
        let dir = TempDir::new().expect("tempdir");
        write_file(dir.path(), "Naruto Episode 1.mp4", b"a");
        write_file(dir.path(), "Bleach - 02.mkv", b"b");
        let index = LibraryIndex::new(dir.path());

        assert_eq!(index.scan().expect("first"), index.scan().expect("second"));
    }

    #[test]
    fn find_episode_sees_files_written_after_previous_scan() {
        let dir = TempDir::new().expect("tempdir");
        let index = LibraryIndex::new(dir.path());
        assert_eq!(index.find_episode("naruto", 5).expect("scan"), None);

        write_file(dir.path(), "Naruto Episode 5.mp4", b"a");
        let file = index
            .find_episode("naruto", 5)
            .expect("scan")
            .expect("episode should now be present");
        assert_eq!(file.filename, "Naruto Episode 5.mp4");
    }

    #[test]
    fn progress_text_only_uses_known_totals() {
        let mut entry = LibraryEntry::new("Show".to_string(), "show".to_string());
        entry.downloaded_episodes.extend([1, 2]);
        assert_eq!(entry.progress_text(), "2");
        assert!(entry.missing_episodes().is_empty());

        entry.total_episodes = Some(4);
        assert_eq!(entry.progress_text(), "2/4");
        assert_eq!(entry.missing_episodes(), vec![3, 4]);
    }
}
