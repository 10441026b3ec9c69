//! Per-target download deduplication.
//!
//! The first caller for a [`DownloadKey`] becomes the leader and runs the download; any
//! caller arriving while it runs parks on the leader's slot and receives the same
//! outcome. The key leaves the in-flight table as soon as the leader finishes, so the
//! next request after a failure always starts a fresh attempt.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::history::{EventKind, HistoryEvent, HistoryLog};
use crate::library::{EpisodeFile, LibraryEntry, LibraryIndex, normalize_title_key};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum EpisodeSelector {
    Episode(u32),
    Season,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct DownloadKey {
    title_key: String,
    selector: EpisodeSelector,
}

impl DownloadKey {
    pub(crate) fn episode(title: &str, episode: u32) -> Result<Self, EngineError> {
        if episode == 0 {
            return Err(EngineError::InvalidInput(
                "episode numbers start at 1".to_string(),
            ));
        }
        Ok(Self {
            title_key: title_key_for(title)?,
            selector: EpisodeSelector::Episode(episode),
        })
    }

    pub(crate) fn season(title: &str) -> Result<Self, EngineError> {
        Ok(Self {
            title_key: title_key_for(title)?,
            selector: EpisodeSelector::Season,
        })
    }

    pub(crate) fn title_key(&self) -> &str {
        &self.title_key
    }
}

impl fmt::Display for DownloadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.selector {
            EpisodeSelector::Episode(episode) => write!(f, "{} #{episode}", self.title_key),
            EpisodeSelector::Season => write!(f, "{} (season)", self.title_key),
        }
    }
}

fn title_key_for(title: &str) -> Result<String, EngineError> {
    let key = normalize_title_key(title);
    if key.is_empty() {
        return Err(EngineError::InvalidInput(
            "title must contain letters or digits".to_string(),
        ));
    }
    Ok(key)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Completion {
    Episode(EpisodeFile),
    Season(LibraryEntry),
}

/// What to record in history when a download completes.
#[derive(Debug, Clone)]
pub(crate) struct EventTemplate {
    pub(crate) kind: EventKind,
    pub(crate) title: String,
    pub(crate) total_episodes: Option<u32>,
}

type SharedOutcome = Result<Completion, EngineError>;

/// Modification time of every episode file of a title, taken before a season fetch.
type SeasonSnapshot = BTreeMap<u32, SystemTime>;

#[derive(Debug, Default)]
struct InFlight {
    outcome: Mutex<Option<SharedOutcome>>,
    done: Condvar,
    waiters: AtomicUsize,
}

pub(crate) struct Orchestrator {
    library: Arc<LibraryIndex>,
    history: Arc<HistoryLog>,
    in_flight: Mutex<HashMap<DownloadKey, Arc<InFlight>>>,
}

impl Orchestrator {
    pub(crate) fn new(library: Arc<LibraryIndex>, history: Arc<HistoryLog>) -> Self {
        Self {
            library,
            history,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Makes sure the target of `key` is on disk, running `fetch` at most once across all
    /// concurrent callers for the same key.
    pub(crate) fn ensure<F>(
        &self,
        key: &DownloadKey,
        event: EventTemplate,
        fetch: F,
    ) -> Result<Completion, EngineError>
    where
        F: FnOnce() -> Result<(), EngineError>,
    {
        let (slot, leader) = {
            let mut table = self.lock_table();
            match table.get(key) {
                Some(slot) => {
                    slot.waiters.fetch_add(1, Ordering::SeqCst);
                    (Arc::clone(slot), false)
                }
                None => {
                    let slot = Arc::new(InFlight::default());
                    table.insert(key.clone(), Arc::clone(&slot));
                    (slot, true)
                }
            }
        };

        if !leader {
            debug!(%key, "joining in-flight download");
            return self.wait_for(key, &slot);
        }

        let mut guard = LeaderGuard {
            orchestrator: self,
            key,
            slot: &slot,
            published: false,
        };
        let outcome = self.run_leader(key, &event, fetch);
        guard.publish(outcome.clone());
        outcome
    }

    /// Number of callers parked on the in-flight download for `key`, if one is running.
    pub(crate) fn waiters(&self, key: &DownloadKey) -> Option<usize> {
        self.lock_table()
            .get(key)
            .map(|slot| slot.waiters.load(Ordering::SeqCst))
    }

    pub(crate) fn in_flight_keys(&self) -> Vec<DownloadKey> {
        let mut keys = self.lock_table().keys().cloned().collect::<Vec<_>>();
        keys.sort_by(|left, right| left.to_string().cmp(&right.to_string()));
        keys
    }

    fn run_leader<F>(&self, key: &DownloadKey, event: &EventTemplate, fetch: F) -> SharedOutcome
    where
        F: FnOnce() -> Result<(), EngineError>,
    {
        if let EpisodeSelector::Episode(episode) = key.selector
            && let Some(file) = self.library.find_episode(&key.title_key, episode)?
        {
            debug!(%key, file = %file.filename, "already downloaded");
            return Ok(Completion::Episode(file));
        }

        let before = match key.selector {
            EpisodeSelector::Season => self.season_snapshot(&key.title_key)?,
            EpisodeSelector::Episode(_) => SeasonSnapshot::new(),
        };

        info!(%key, "download started");
        if let Err(err) = fetch() {
            warn!(%key, error = %err, "download failed");
            return Err(err);
        }

        let completion = self.verify(key, &event.title, &before)?;
        self.history.append(history_event(key, event, &completion));
        info!(%key, "download finished");
        Ok(completion)
    }

    fn season_snapshot(&self, title_key: &str) -> Result<SeasonSnapshot, EngineError> {
        Ok(self
            .library
            .entry_for(title_key)?
            .map(|entry| {
                entry
                    .files_by_episode
                    .iter()
                    .map(|(episode, file)| (*episode, file.modified))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn verify(&self, key: &DownloadKey, title: &str, before: &SeasonSnapshot) -> SharedOutcome {
        match key.selector {
            EpisodeSelector::Episode(episode) => self
                .library
                .find_episode(&key.title_key, episode)?
                .map(Completion::Episode)
                .ok_or_else(|| {
                    EngineError::ExternalToolFailure(format!(
                        "ani-cli finished but episode {episode} of {title} is not in {}",
                        self.library.downloads_dir().display()
                    ))
                }),
            // The run must have written at least one episode file, new or rewritten.
            EpisodeSelector::Season => self
                .library
                .entry_for(&key.title_key)?
                .filter(|entry| {
                    entry
                        .files_by_episode
                        .iter()
                        .any(|(episode, file)| before.get(episode) != Some(&file.modified))
                })
                .map(Completion::Season)
                .ok_or_else(|| {
                    EngineError::ExternalToolFailure(format!(
                        "ani-cli finished but wrote no episodes of {title} to {}",
                        self.library.downloads_dir().display()
                    ))
                }),
        }
    }

    fn wait_for(&self, key: &DownloadKey, slot: &InFlight) -> SharedOutcome {
        let shared = {
            let mut outcome = slot.outcome.lock().unwrap_or_else(PoisonError::into_inner);
            loop {
                if let Some(result) = outcome.as_ref() {
                    break result.clone();
                }
                outcome = slot
                    .done
                    .wait(outcome)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };
        slot.waiters.fetch_sub(1, Ordering::SeqCst);

        let completion = shared?;
        // Re-read the disk so a waiter sees the file as it is now, not as the leader saw it.
        let refreshed = match key.selector {
            EpisodeSelector::Episode(episode) => self
                .library
                .find_episode(&key.title_key, episode)
                .ok()
                .flatten()
                .map(Completion::Episode),
            EpisodeSelector::Season => self
                .library
                .entry_for(&key.title_key)
                .ok()
                .flatten()
                .map(Completion::Season),
        };
        Ok(refreshed.unwrap_or(completion))
    }

    fn finish(&self, key: &DownloadKey, slot: &Arc<InFlight>, outcome: SharedOutcome) {
        {
            let mut table = self.lock_table();
            if table.get(key).is_some_and(|current| Arc::ptr_eq(current, slot)) {
                table.remove(key);
            }
        }
        let mut published = slot.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        *published = Some(outcome);
        slot.done.notify_all();
    }

    fn lock_table(&self) -> MutexGuard<'_, HashMap<DownloadKey, Arc<InFlight>>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears the in-flight entry even if the leader's download closure panics.
struct LeaderGuard<'a> {
    orchestrator: &'a Orchestrator,
    key: &'a DownloadKey,
    slot: &'a Arc<InFlight>,
    published: bool,
}

impl LeaderGuard<'_> {
    fn publish(&mut self, outcome: SharedOutcome) {
        self.published = true;
        self.orchestrator.finish(self.key, self.slot, outcome);
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if !self.published {
            self.orchestrator.finish(
                self.key,
                self.slot,
                Err(EngineError::ExternalToolFailure(
                    "download worker stopped unexpectedly".to_string(),
                )),
            );
        }
    }
}

fn history_event(key: &DownloadKey, event: &EventTemplate, completion: &Completion) -> HistoryEvent {
    match completion {
        Completion::Episode(file) => {
            let episode = match key.selector {
                EpisodeSelector::Episode(episode) => episode,
                EpisodeSelector::Season => 0,
            };
            HistoryEvent::new(
                event.kind,
                &event.title,
                format!("Downloaded {} episode {episode}", event.title),
            )
            .with_episode(episode)
            .with_filename(file.filename.clone())
        }
        Completion::Season(entry) => {
            let summary = match event.total_episodes {
                Some(total) => format!(
                    "Downloaded {} ({}/{total} episodes on disk)",
                    event.title,
                    entry.downloaded_count()
                ),
                None => format!(
                    "Downloaded {} ({} episodes on disk)",
                    event.title,
                    entry.downloaded_count()
                ),
            };
            HistoryEvent::new(event.kind, &event.title, summary)
        }
    }
}
