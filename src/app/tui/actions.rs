use std::sync::Arc;
use std::sync::mpsc;
use std::thread;

use ratatui::widgets::TableState;

use crate::catalog::Mode;
use crate::engine::Engine;
use crate::error::EngineError;

use super::super::format::truncate;
use super::{JobOutcome, Pane, PendingNotice, TuiState};

const POSTER_PREFETCH: usize = 12;

pub(super) fn status_info(msg: &str) -> String {
    format!("INFO: {msg}")
}

pub(super) fn status_error(msg: &str) -> String {
    format!("ERROR: {msg}")
}

pub(super) fn clamp_selection(table_state: &mut TableState, len: usize) {
    if len == 0 {
        table_state.select(None);
        return;
    }
    match table_state.selected() {
        Some(selected) => table_state.select(Some(selected.min(len - 1))),
        None => table_state.select(Some(0)),
    }
}

pub(super) fn move_selection(state: &mut TuiState, delta: isize) {
    let len = state.visible_len();
    let table_state = state.table_state_mut();
    let Some(selected) = table_state.selected() else {
        return;
    };
    if len == 0 {
        return;
    }
    let next = selected.saturating_add_signed(delta).min(len - 1);
    table_state.select(Some(next));
    reset_episode(state);
}

/// Points the episode stepper at a sensible default for the new selection.
pub(super) fn reset_episode(state: &mut TuiState) {
    state.episode = match state.pane {
        Pane::Library => state
            .selected_entry()
            .and_then(|entry| entry.downloaded_episodes.last().copied())
            .unwrap_or(1),
        Pane::Search | Pane::History => 1,
    };
}

pub(super) fn episode_limit(state: &TuiState) -> Option<u32> {
    match state.pane {
        Pane::Search => state.selected_result().map(|result| result.episode_count),
        Pane::Library => state.selected_entry().and_then(|entry| entry.total_episodes),
        Pane::History => None,
    }
}

pub(super) fn step_episode(state: &mut TuiState, delta: i32) {
    let next = state.episode.saturating_add_signed(delta).max(1);
    match episode_limit(state) {
        Some(limit) if next > limit => {
            state.status = status_info(&format!("Only {limit} episodes available."));
        }
        _ => state.episode = next,
    }
}

pub(super) fn refresh_history(state: &mut TuiState, engine: &Engine) {
    let mut events = engine.get_history();
    events.reverse();
    state.history = events;
    clamp_selection(&mut state.history_state, state.history.len());
}

fn spawn_job(tx: &mpsc::Sender<JobOutcome>, job: impl FnOnce() -> JobOutcome + Send + 'static) {
    let tx = tx.clone();
    thread::spawn(move || {
        let _ = tx.send(job());
    });
}

pub(super) fn start_library_refresh(engine: &Arc<Engine>, tx: &mpsc::Sender<JobOutcome>) {
    let engine = Arc::clone(engine);
    spawn_job(tx, move || JobOutcome::Library(engine.get_library()));
}

pub(super) fn start_search(state: &mut TuiState, engine: &Arc<Engine>, tx: &mpsc::Sender<JobOutcome>) {
    let query = state.query.trim().to_string();
    if query.is_empty() {
        state.status = status_error("Type something to search for.");
        return;
    }
    let mode = state.mode;
    let engine = Arc::clone(engine);
    let tx = tx.clone();
    state.running += 1;
    state.status = status_info(&format!("Searching \"{query}\" ({mode})..."));
    thread::spawn(move || {
        let result = engine.search(&query, mode);
        let prefetch = result
            .as_ref()
            .map(|results| results.iter().take(POSTER_PREFETCH).cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        if tx.send(JobOutcome::Search { query, mode, result }).is_err() {
            return;
        }
        let posters = prefetch
            .iter()
            .filter_map(|result| engine.poster_for(result).map(|path| (result.title_key(), path)))
            .collect::<Vec<_>>();
        if !posters.is_empty() {
            let _ = tx.send(JobOutcome::Posters(posters));
        }
    });
}

pub(super) fn start_episode_download(
    state: &mut TuiState,
    engine: &Arc<Engine>,
    tx: &mpsc::Sender<JobOutcome>,
) {
    let episode = state.episode;
    let mode = state.mode;
    let (title, from_library) = match state.pane {
        Pane::Search => match state.selected_result() {
            Some(result) => (result.title.clone(), false),
            None => {
                state.status = status_error("Select a search result first.");
                return;
            }
        },
        Pane::Library => match state.selected_entry() {
            Some(entry) => (entry.title_key.clone(), true),
            None => {
                state.status = status_error("Select a library title first.");
                return;
            }
        },
        Pane::History => return,
    };

    let label = format!("{} episode {episode}", display_label(state, &title));
    let engine = Arc::clone(engine);
    state.running += 1;
    state.status = status_info(&format!("Downloading {label} ({mode})..."));
    spawn_job(tx, move || {
        let result = if from_library {
            engine.download_for_library_title(&title, episode, mode)
        } else {
            engine.ensure_downloaded(&title, episode, mode)
        };
        JobOutcome::Episode { label, result }
    });
}

pub(super) fn start_season_download(
    state: &mut TuiState,
    engine: &Arc<Engine>,
    tx: &mpsc::Sender<JobOutcome>,
) {
    let (title, total) = match state.pane {
        Pane::Search => match state.selected_result() {
            Some(result) => (result.title.clone(), Some(result.episode_count)),
            None => {
                state.status = status_error("Select a search result first.");
                return;
            }
        },
        Pane::Library => match state.selected_entry() {
            Some(entry) => (entry.title.clone(), entry.total_episodes),
            None => {
                state.status = status_error("Select a library title first.");
                return;
            }
        },
        Pane::History => return,
    };

    let mode = state.mode;
    let label = truncate(&title, 40);
    let engine = Arc::clone(engine);
    state.running += 1;
    state.status = status_info(&format!("Downloading all of {label} ({mode})..."));
    spawn_job(tx, move || {
        let result = engine.ensure_season_downloaded(&title, total, mode);
        JobOutcome::Season { label, result }
    });
}

/// Applies finished background work; returns true when the library should be rescanned.
pub(super) fn apply_outcome(state: &mut TuiState, engine: &Engine, outcome: JobOutcome) -> bool {
    match outcome {
        JobOutcome::Library(result) => {
            match result {
                Ok(entries) => {
                    state.library = entries;
                    clamp_selection(&mut state.library_state, state.library.len());
                }
                Err(err) => state.status = status_error(&format!("Library scan failed: {err}")),
            }
            false
        }
        JobOutcome::Posters(posters) => {
            state.posters.extend(posters);
            false
        }
        JobOutcome::Search {
            query,
            mode,
            result,
        } => {
            state.running = state.running.saturating_sub(1);
            match result {
                Ok(results) => {
                    state.status = if results.is_empty() {
                        status_info(&format!("No {mode} results for \"{query}\"."))
                    } else {
                        status_info(&format!("{} results for \"{query}\".", results.len()))
                    };
                    state.results = results;
                    state.results_state.select(None);
                    clamp_selection(&mut state.results_state, state.results.len());
                    state.pane = Pane::Search;
                    reset_episode(state);
                }
                Err(err) => state.status = status_error(&format!("Search failed: {err}")),
            }
            refresh_history(state, engine);
            false
        }
        JobOutcome::Episode { label, result } => {
            state.running = state.running.saturating_sub(1);
            match result {
                Ok(file) => {
                    state.status = status_info(&format!("Ready: {}", file.filename));
                }
                Err(err) => report_failure(state, &label, &err),
            }
            refresh_history(state, engine);
            true
        }
        JobOutcome::Season { label, result } => {
            state.running = state.running.saturating_sub(1);
            match result {
                Ok(outcome) => state.status = status_info(&outcome.message),
                Err(err) => report_failure(state, &label, &err),
            }
            refresh_history(state, engine);
            true
        }
    }
}

pub(super) fn selected_is_downloaded(state: &TuiState) -> bool {
    state.pane == Pane::Library
        && state
            .selected_entry()
            .is_some_and(|entry| entry.downloaded_episodes.contains(&state.episode))
}

pub(super) fn play_selected(state: &TuiState, engine: &Engine) -> Result<String, String> {
    let Some(entry) = state.selected_entry() else {
        return Err("no library title selected".to_string());
    };
    engine
        .play_downloaded(&entry.title_key, state.episode)
        .map(|file| format!("Played {} episode {}", file.title, file.episode))
        .map_err(|err| err.to_string())
}

pub(super) fn report_failure(state: &mut TuiState, label: &str, err: &EngineError) {
    let detail = err.to_string();
    state.status = status_error(&format!("{label}: {detail}"));
    state.notice = Some(PendingNotice {
        title: err.kind().title(),
        message: format!(
            "{}\n\n{}\n\nPress any key to continue.",
            truncate(label, 50),
            truncate(&detail, 200)
        ),
    });
}

pub(super) fn toggle_mode(state: &mut TuiState) -> Mode {
    state.mode = state.mode.toggled();
    state.mode
}

fn display_label(state: &TuiState, title: &str) -> String {
    match state.pane {
        Pane::Library => state
            .selected_entry()
            .map(|entry| truncate(&entry.title, 40))
            .unwrap_or_else(|| truncate(title, 40)),
        Pane::Search | Pane::History => truncate(title, 40),
    }
}
