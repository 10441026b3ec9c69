//! Bounded log of the most recent user-facing events.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tracing::warn;

use crate::db::Database;

pub(crate) const HISTORY_CAPACITY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum EventKind {
    Search,
    PlayDownloadedFile,
    DownloadEpisode,
    DownloadSeason,
    DownloadLibraryTitle,
}

impl EventKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::PlayDownloadedFile => "play_downloaded_file",
            Self::DownloadEpisode => "download_episode",
            Self::DownloadSeason => "download_season",
            Self::DownloadLibraryTitle => "download_library_title",
        }
    }

    pub(crate) fn parse(raw: &str) -> Option<Self> {
        match raw {
            "search" => Some(Self::Search),
            "play_downloaded_file" => Some(Self::PlayDownloadedFile),
            "download_episode" => Some(Self::DownloadEpisode),
            "download_season" => Some(Self::DownloadSeason),
            "download_library_title" => Some(Self::DownloadLibraryTitle),
            _ => None,
        }
    }

    pub(crate) fn label(self) -> &'static str {
        match self {
            Self::Search => "SEARCH",
            Self::PlayDownloadedFile => "PLAY",
            Self::DownloadEpisode => "EPISODE",
            Self::DownloadSeason => "SEASON",
            Self::DownloadLibraryTitle => "LIBRARY",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HistoryEvent {
    pub(crate) kind: EventKind,
    pub(crate) summary: String,
    pub(crate) title: String,
    pub(crate) episode: Option<u32>,
    pub(crate) filename: Option<String>,
    /// RFC 3339, display only.
    pub(crate) recorded_at: String,
}

impl HistoryEvent {
    pub(crate) fn new(kind: EventKind, title: &str, summary: impl Into<String>) -> Self {
        Self {
            kind,
            summary: summary.into(),
            title: title.to_string(),
            episode: None,
            filename: None,
            recorded_at: Utc::now().to_rfc3339(),
        }
    }

    pub(crate) fn with_episode(mut self, episode: u32) -> Self {
        self.episode = Some(episode);
        self
    }

    pub(crate) fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }
}

struct HistoryState {
    events: VecDeque<HistoryEvent>,
    store: Option<Database>,
}

/// Appends, evictions and persistence all happen under one lock.
pub(crate) struct HistoryLog {
    state: Mutex<HistoryState>,
}

impl HistoryLog {
    pub(crate) fn in_memory() -> Self {
        Self {
            state: Mutex::new(HistoryState {
                events: VecDeque::with_capacity(HISTORY_CAPACITY + 1),
                store: None,
            }),
        }
    }

    /// Opens the persisted log; any failure leaves an empty, memory-only log.
    pub(crate) fn open(path: &Path) -> Self {
        let log = Self::in_memory();
        let store = match Database::open(path).and_then(|db| db.migrate().map(|()| db)) {
            Ok(db) => db,
            Err(err) => {
                warn!(path = %path.display(), error = %format!("{err:#}"), "history store unavailable; history will not persist");
                return log;
            }
        };

        let events = match store.load_history(HISTORY_CAPACITY) {
            Ok((events, skipped)) => {
                if skipped > 0 {
                    warn!(skipped, "ignored unreadable history rows");
                }
                events
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "failed to read history; starting empty");
                Vec::new()
            }
        };

        {
            let mut state = log.lock();
            state.events.extend(events);
            state.store = Some(store);
        }
        log
    }

    pub(crate) fn append(&self, event: HistoryEvent) {
        let mut state = self.lock();
        state.events.push_back(event);
        while state.events.len() > HISTORY_CAPACITY {
            state.events.pop_front();
        }
        persist(&state);
    }

    /// Oldest first.
    pub(crate) fn list(&self) -> Vec<HistoryEvent> {
        self.lock().events.iter().cloned().collect()
    }

    pub(crate) fn clear(&self) {
        let mut state = self.lock();
        state.events.clear();
        persist(&state);
    }

    fn lock(&self) -> MutexGuard<'_, HistoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn persist(state: &HistoryState) {
    let Some(store) = state.store.as_ref() else {
        return;
    };
    if let Err(err) = store.replace_history(&state.events) {
        warn!(error = %format!("{err:#}"), "failed to persist history");
    }
}
