//! The operations the CLI and TUI drive: search, downloads, library, history and playback.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::ani_cli::{DownloadRequest, Downloader, EpisodeRange};
use crate::catalog::{Catalog, Mode, SearchResult, find_result_by_title};
use crate::error::EngineError;
use crate::history::{EventKind, HistoryEvent, HistoryLog};
use crate::library::{LibraryEntry, LibraryIndex, normalize_title_key};
use crate::orchestrator::{Completion, DownloadKey, EventTemplate, Orchestrator};
use crate::player::Player;
use crate::poster::PosterCache;

/// Search metadata remembered per title key so later downloads can reuse the
/// `-S <index>` that ani-cli will see for the same query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct KnownShow {
    pub(crate) query: String,
    pub(crate) index: u32,
    pub(crate) title: String,
    pub(crate) episode_count: u32,
    pub(crate) poster_url: Option<String>,
    pub(crate) mode: Mode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DownloadedFile {
    pub(crate) title: String,
    pub(crate) episode: u32,
    pub(crate) filename: String,
    pub(crate) media_reference: String,
    pub(crate) path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SeasonOutcome {
    pub(crate) message: String,
    pub(crate) downloaded: usize,
    pub(crate) total: Option<u32>,
}

pub(crate) struct EngineParts {
    pub(crate) catalog: Arc<dyn Catalog>,
    pub(crate) downloader: Arc<dyn Downloader>,
    pub(crate) player: Arc<dyn Player>,
    pub(crate) library: Arc<LibraryIndex>,
    pub(crate) history: Arc<HistoryLog>,
    pub(crate) posters: PosterCache,
}

pub(crate) struct Engine {
    catalog: Arc<dyn Catalog>,
    downloader: Arc<dyn Downloader>,
    player: Arc<dyn Player>,
    library: Arc<LibraryIndex>,
    history: Arc<HistoryLog>,
    posters: PosterCache,
    orchestrator: Orchestrator,
    known: Mutex<HashMap<String, KnownShow>>,
}

impl Engine {
    pub(crate) fn new(parts: EngineParts) -> Self {
        let orchestrator = Orchestrator::new(Arc::clone(&parts.library), Arc::clone(&parts.history));
        Self {
            catalog: parts.catalog,
            downloader: parts.downloader,
            player: parts.player,
            library: parts.library,
            history: parts.history,
            posters: parts.posters,
            orchestrator,
            known: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn search(&self, query: &str, mode: Mode) -> Result<Vec<SearchResult>, EngineError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let results = self.catalog.search(query, mode)?;
        self.remember(query, mode, &results);
        self.history.append(HistoryEvent::new(
            EventKind::Search,
            query,
            format!("Searched \"{query}\" ({mode}): {} results", results.len()),
        ));
        Ok(results)
    }

    pub(crate) fn ensure_downloaded(
        &self,
        title: &str,
        episode: u32,
        mode: Mode,
    ) -> Result<DownloadedFile, EngineError> {
        self.download_episode(title, episode, mode, EventKind::DownloadEpisode)
    }

    /// Downloads another episode of a title that is already in the library.
    pub(crate) fn download_for_library_title(
        &self,
        title_key: &str,
        episode: u32,
        mode: Mode,
    ) -> Result<DownloadedFile, EngineError> {
        let key = normalize_title_key(title_key);
        let title = match self.library.entry_for(&key)? {
            Some(entry) => self
                .known_show(&key)
                .map(|show| show.title)
                .unwrap_or(entry.title),
            None => self
                .known_show(&key)
                .map(|show| show.title)
                .ok_or_else(|| EngineError::NotFound(format!("`{title_key}` is not in the library")))?,
        };
        self.download_episode(&title, episode, mode, EventKind::DownloadLibraryTitle)
    }

    pub(crate) fn ensure_season_downloaded(
        &self,
        title: &str,
        episode_count: Option<u32>,
        mode: Mode,
    ) -> Result<SeasonOutcome, EngineError> {
        if episode_count == Some(0) {
            return Err(EngineError::InvalidInput(
                "episode count must be at least 1".to_string(),
            ));
        }
        let key = DownloadKey::season(title)?;
        let remembered = self
            .known_show(key.title_key())
            .filter(|show| show.mode == mode);
        let total = episode_count.or(remembered.as_ref().map(|show| show.episode_count));
        let display_title = remembered
            .as_ref()
            .map(|show| show.title.clone())
            .unwrap_or_else(|| title.trim().to_string());

        if let Some(total) = total
            && let Some(entry) = self.library.entry_for(key.title_key())?
            && (1..=total).all(|episode| entry.downloaded_episodes.contains(&episode))
        {
            return Ok(season_outcome(&display_title, entry.downloaded_count(), Some(total), true));
        }

        let event = EventTemplate {
            kind: EventKind::DownloadSeason,
            title: display_title.clone(),
            total_episodes: total,
        };
        let completion = self.orchestrator.ensure(&key, event, || {
            let target = self.resolve_target(title, mode)?;
            let last = total.unwrap_or(target.episode_count);
            let episodes = if last <= 1 {
                EpisodeRange::Single(1)
            } else {
                EpisodeRange::Span { first: 1, last }
            };
            self.downloader.download(&DownloadRequest {
                query: target.query,
                select_index: target.index,
                episodes,
                mode,
            })
        })?;

        let downloaded = match &completion {
            Completion::Season(entry) => entry.downloaded_count(),
            Completion::Episode(_) => 1,
        };
        Ok(season_outcome(&display_title, downloaded, total, false))
    }

    /// Library entries enriched with remembered search metadata and cached posters.
    pub(crate) fn get_library(&self) -> Result<Vec<LibraryEntry>, EngineError> {
        let mut entries = self.library.scan()?;
        let known = self.lock_known().clone();
        for entry in &mut entries {
            match known.get(&entry.title_key) {
                Some(show) => {
                    entry.title = show.title.clone();
                    entry.total_episodes = Some(show.episode_count);
                    entry.poster_path = match show.poster_url.as_deref() {
                        Some(url) => self.posters.get_or_fetch(&entry.title_key, url),
                        None => self.posters.cached_path(&entry.title_key),
                    };
                }
                None => entry.poster_path = self.posters.cached_path(&entry.title_key),
            }
        }
        debug!(titles = entries.len(), "library scanned");
        Ok(entries)
    }

    /// Oldest first.
    pub(crate) fn get_history(&self) -> Vec<HistoryEvent> {
        self.history.list()
    }

    pub(crate) fn clear_history(&self) {
        self.history.clear();
    }

    pub(crate) fn record_event(&self, event: HistoryEvent) {
        self.history.append(event);
    }

    pub(crate) fn play_downloaded(
        &self,
        title: &str,
        episode: u32,
    ) -> Result<DownloadedFile, EngineError> {
        let key = DownloadKey::episode(title, episode)?;
        let file = self
            .library
            .find_episode(key.title_key(), episode)?
            .ok_or_else(|| {
                EngineError::NotFound(format!("episode {episode} of {} is not downloaded", title.trim()))
            })?;
        let display_title = self
            .library
            .entry_for(key.title_key())?
            .map(|entry| entry.title)
            .unwrap_or_else(|| title.trim().to_string());

        self.player.play(&file.absolute_path)?;
        self.record_event(
            HistoryEvent::new(
                EventKind::PlayDownloadedFile,
                &display_title,
                format!("Played {display_title} episode {episode}"),
            )
            .with_episode(episode)
            .with_filename(file.filename.clone()),
        );
        Ok(DownloadedFile {
            title: display_title,
            episode,
            filename: file.filename,
            media_reference: file.media_url,
            path: file.absolute_path,
        })
    }

    pub(crate) fn poster_for(&self, result: &SearchResult) -> Option<PathBuf> {
        let identity = result.title_key();
        match result.poster_url.as_deref() {
            Some(url) => self.posters.get_or_fetch(&identity, url),
            None => self.posters.cached_path(&identity),
        }
    }

    pub(crate) fn downloads_in_flight(&self) -> Vec<String> {
        self.orchestrator
            .in_flight_keys()
            .iter()
            .map(|key| match self.orchestrator.waiters(key) {
                Some(waiting) if waiting > 0 => format!("{key} (+{waiting} waiting)"),
                _ => key.to_string(),
            })
            .collect()
    }

    pub(crate) fn downloads_dir(&self) -> PathBuf {
        self.library.downloads_dir().to_path_buf()
    }

    fn download_episode(
        &self,
        title: &str,
        episode: u32,
        mode: Mode,
        kind: EventKind,
    ) -> Result<DownloadedFile, EngineError> {
        let key = DownloadKey::episode(title, episode)?;
        let remembered = self
            .known_show(key.title_key())
            .filter(|show| show.mode == mode);
        if let Some(show) = &remembered {
            check_episode_in_range(show, episode)?;
        }
        let display_title = remembered
            .map(|show| show.title)
            .unwrap_or_else(|| title.trim().to_string());

        let event = EventTemplate {
            kind,
            title: display_title.clone(),
            total_episodes: None,
        };
        let completion = self.orchestrator.ensure(&key, event, || {
            let target = self.resolve_target(title, mode)?;
            check_episode_in_range(&target, episode)?;
            self.downloader.download(&DownloadRequest {
                query: target.query,
                select_index: target.index,
                episodes: EpisodeRange::Single(episode),
                mode,
            })
        })?;

        match completion {
            Completion::Episode(file) => Ok(DownloadedFile {
                title: display_title,
                episode,
                filename: file.filename,
                media_reference: file.media_url,
                path: file.absolute_path,
            }),
            Completion::Season(_) => Err(EngineError::ExternalToolFailure(format!(
                "expected a single episode for {key}"
            ))),
        }
    }

    /// Finds the catalog entry ani-cli should select for `title`, searching again when
    /// nothing usable is remembered.
    fn resolve_target(&self, title: &str, mode: Mode) -> Result<KnownShow, EngineError> {
        let title_key = normalize_title_key(title);
        if let Some(show) = self.known_show(&title_key)
            && show.mode == mode
        {
            return Ok(show);
        }

        let query = title.trim();
        info!(query, %mode, "resolving title through catalog search");
        let results = self.catalog.search(query, mode)?;
        self.remember(query, mode, &results);
        let result = find_result_by_title(&results, title).ok_or_else(|| {
            EngineError::NotFound(format!("no {mode} catalog entry matches `{query}`"))
        })?;
        Ok(known_from_result(query, mode, result))
    }

    fn remember(&self, query: &str, mode: Mode, results: &[SearchResult]) {
        let mut known = self.lock_known();
        for result in results {
            known.insert(result.title_key(), known_from_result(query, mode, result));
        }
    }

    fn known_show(&self, title_key: &str) -> Option<KnownShow> {
        self.lock_known().get(title_key).cloned()
    }

    fn lock_known(&self) -> MutexGuard<'_, HashMap<String, KnownShow>> {
        self.known.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn known_from_result(query: &str, mode: Mode, result: &SearchResult) -> KnownShow {
    KnownShow {
        query: query.to_string(),
        index: result.index,
        title: result.title.clone(),
        episode_count: result.episode_count,
        poster_url: result.poster_url.clone(),
        mode,
    }
}

fn check_episode_in_range(show: &KnownShow, episode: u32) -> Result<(), EngineError> {
    if episode > show.episode_count {
        return Err(EngineError::InvalidInput(format!(
            "{} has {} episodes in {}; pick an episode between 1 and {}",
            show.title, show.episode_count, show.mode, show.episode_count
        )));
    }
    Ok(())
}

fn season_outcome(title: &str, downloaded: usize, total: Option<u32>, already: bool) -> SeasonOutcome {
    let message = match (total, already) {
        (Some(total), true) => format!("{title}: all {total} episodes already downloaded"),
        (Some(total), false) => format!("{title}: {downloaded}/{total} episodes downloaded"),
        (None, _) => format!("{title}: {downloaded} episodes downloaded"),
    };
    SeasonOutcome {
        message,
        downloaded,
        total,
    }
}
