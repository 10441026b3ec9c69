mod actions;
mod render;
mod session;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, mpsc};
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::widgets::TableState;

use crate::catalog::{Mode, SearchResult};
use crate::engine::{DownloadedFile, Engine, SeasonOutcome};
use crate::error::EngineError;
use crate::history::HistoryEvent;
use crate::library::LibraryEntry;

use self::actions::{
    apply_outcome, move_selection, play_selected, refresh_history, reset_episode,
    selected_is_downloaded, start_episode_download, start_library_refresh, start_search,
    start_season_download, status_error, status_info, step_episode, toggle_mode,
};
use self::render::draw_tui;
use self::session::TuiSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pane {
    Search,
    Library,
    History,
}

impl Pane {
    pub(crate) fn label(self) -> &'static str {
        match self {
            Self::Search => "SEARCH",
            Self::Library => "LIBRARY",
            Self::History => "HISTORY",
        }
    }

    pub(crate) fn next(self) -> Self {
        match self {
            Self::Search => Self::Library,
            Self::Library => Self::History,
            Self::History => Self::Search,
        }
    }

    pub(crate) fn previous(self) -> Self {
        match self {
            Self::Search => Self::History,
            Self::Library => Self::Search,
            Self::History => Self::Library,
        }
    }
}

#[derive(Debug, Clone)]
pub(super) struct PendingNotice {
    pub(super) title: &'static str,
    pub(super) message: String,
}

/// Results sent back from worker threads.
#[derive(Debug)]
pub(super) enum JobOutcome {
    Search {
        query: String,
        mode: Mode,
        result: Result<Vec<SearchResult>, EngineError>,
    },
    Posters(Vec<(String, PathBuf)>),
    Episode {
        label: String,
        result: Result<DownloadedFile, EngineError>,
    },
    Season {
        label: String,
        result: Result<SeasonOutcome, EngineError>,
    },
    Library(Result<Vec<LibraryEntry>, EngineError>),
}

pub(super) struct TuiState {
    pub(super) pane: Pane,
    pub(super) mode: Mode,
    pub(super) query: String,
    pub(super) editing: bool,
    pub(super) results: Vec<SearchResult>,
    pub(super) results_state: TableState,
    pub(super) posters: HashMap<String, PathBuf>,
    pub(super) library: Vec<LibraryEntry>,
    pub(super) library_state: TableState,
    /// Newest first.
    pub(super) history: Vec<HistoryEvent>,
    pub(super) history_state: TableState,
    pub(super) episode: u32,
    pub(super) running: usize,
    pub(super) status: String,
    pub(super) notice: Option<PendingNotice>,
}

impl TuiState {
    pub(super) fn new(mode: Mode) -> Self {
        Self {
            pane: Pane::Search,
            mode,
            query: String::new(),
            editing: true,
            results: Vec::new(),
            results_state: TableState::default(),
            posters: HashMap::new(),
            library: Vec::new(),
            library_state: TableState::default(),
            history: Vec::new(),
            history_state: TableState::default(),
            episode: 1,
            running: 0,
            status: status_info("Type a title and press Enter to search."),
            notice: None,
        }
    }

    pub(super) fn visible_len(&self) -> usize {
        match self.pane {
            Pane::Search => self.results.len(),
            Pane::Library => self.library.len(),
            Pane::History => self.history.len(),
        }
    }

    pub(super) fn table_state_mut(&mut self) -> &mut TableState {
        match self.pane {
            Pane::Search => &mut self.results_state,
            Pane::Library => &mut self.library_state,
            Pane::History => &mut self.history_state,
        }
    }

    pub(super) fn selected_result(&self) -> Option<&SearchResult> {
        self.results_state
            .selected()
            .and_then(|idx| self.results.get(idx))
    }

    pub(super) fn selected_entry(&self) -> Option<&LibraryEntry> {
        self.library_state
            .selected()
            .and_then(|idx| self.library.get(idx))
    }

    pub(super) fn selected_event(&self) -> Option<&HistoryEvent> {
        self.history_state
            .selected()
            .and_then(|idx| self.history.get(idx))
    }
}

pub(crate) fn run_tui(engine: Arc<Engine>, mode: Mode) -> Result<()> {
    let mut session = TuiSession::enter()?;
    let mut terminal = Terminal::new(CrosstermBackend::new(io::stdout()))
        .context("failed to initialize terminal backend")?;
    terminal.clear()?;

    let (tx, rx) = mpsc::channel::<JobOutcome>();
    let mut state = TuiState::new(mode);
    refresh_history(&mut state, &engine);
    start_library_refresh(&engine, &tx);

    loop {
        let mut rescan = false;
        while let Ok(outcome) = rx.try_recv() {
            rescan |= apply_outcome(&mut state, &engine, outcome);
        }
        if rescan {
            start_library_refresh(&engine, &tx);
        }

        let in_flight = engine.downloads_in_flight();
        terminal.draw(|frame| draw_tui(frame, &mut state, &in_flight))?;

        if !event::poll(Duration::from_millis(200))? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        if state.notice.is_some() {
            state.notice = None;
            continue;
        }

        if state.editing {
            match key.code {
                KeyCode::Esc => state.editing = false,
                KeyCode::Enter => {
                    state.editing = false;
                    start_search(&mut state, &engine, &tx);
                }
                KeyCode::Backspace => {
                    state.query.pop();
                }
                KeyCode::Char(c) => state.query.push(c),
                _ => {}
            }
            continue;
        }

        match key.code {
            KeyCode::Char('q') => break,
            KeyCode::Tab => {
                state.pane = state.pane.next();
                reset_episode(&mut state);
            }
            KeyCode::BackTab => {
                state.pane = state.pane.previous();
                reset_episode(&mut state);
            }
            KeyCode::Char('/') | KeyCode::Char('s') => {
                state.pane = Pane::Search;
                state.editing = true;
            }
            KeyCode::Char('m') => {
                let mode = toggle_mode(&mut state);
                state.status = status_info(&format!("Mode set to {mode}. Search again to refresh results."));
            }
            KeyCode::Char('r') => {
                refresh_history(&mut state, &engine);
                start_library_refresh(&engine, &tx);
                state.status = status_info("Rescanning library.");
            }
            KeyCode::Up => move_selection(&mut state, -1),
            KeyCode::Down => move_selection(&mut state, 1),
            KeyCode::Left | KeyCode::Char('-') => step_episode(&mut state, -1),
            KeyCode::Right | KeyCode::Char('+') => step_episode(&mut state, 1),
            KeyCode::Char('a') => start_season_download(&mut state, &engine, &tx),
            KeyCode::Enter if selected_is_downloaded(&state) => {
                let played = session.suspended(|| play_selected(&state, &engine))?;
                terminal.clear()?;
                state.status = match played {
                    Ok(message) => status_info(&message),
                    Err(err) => status_error(&format!("Playback failed: {err}")),
                };
                refresh_history(&mut state, &engine);
            }
            KeyCode::Enter => start_episode_download(&mut state, &engine, &tx),
            _ => {}
        }
    }

    terminal.show_cursor()?;
    session.leave()
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use super::actions::{clamp_selection, episode_limit, report_failure};
    use super::*;

    fn result(index: u32, title: &str, episode_count: u32) -> SearchResult {
        SearchResult {
            index,
            id: format!("id-{index}"),
            title: title.to_string(),
            episode_count,
            poster_url: None,
        }
    }

    fn entry(title: &str, episodes: &[u32], total: Option<u32>) -> LibraryEntry {
        LibraryEntry {
            title: title.to_string(),
            title_key: title.to_lowercase(),
            poster_path: None,
            total_episodes: total,
            downloaded_episodes: episodes.iter().copied().collect::<BTreeSet<_>>(),
            files_by_episode: BTreeMap::new(),
        }
    }

    fn state_with_results() -> TuiState {
        let mut state = TuiState::new(Mode::Sub);
        state.editing = false;
        state.results = vec![result(1, "Naruto", 220), result(2, "Mushishi", 3)];
        state.results_state.select(Some(0));
        state
    }

    #[test]
    fn episode_stepper_stays_within_catalog_count() {
        let mut state = state_with_results();
        move_selection(&mut state, 1);
        assert_eq!(episode_limit(&state), Some(3));

        for _ in 0..5 {
            step_episode(&mut state, 1);
        }
        assert_eq!(state.episode, 3);
        assert!(state.status.starts_with("INFO: Only 3 episodes"));

        for _ in 0..5 {
            step_episode(&mut state, -1);
        }
        assert_eq!(state.episode, 1);
    }

    #[test]
    fn selection_moves_are_clamped_to_the_table() {
        let mut state = state_with_results();
        move_selection(&mut state, 5);
        assert_eq!(state.results_state.selected(), Some(1));
        move_selection(&mut state, -5);
        assert_eq!(state.results_state.selected(), Some(0));
    }

    #[test]
    fn library_selection_defaults_to_latest_downloaded_episode() {
        let mut state = TuiState::new(Mode::Sub);
        state.library = vec![entry("Bleach", &[1, 2, 7], None), entry("Trigun", &[], Some(26))];
        state.library_state.select(Some(0));
        state.pane = Pane::Library;

        reset_episode(&mut state);
        assert_eq!(state.episode, 7);
        assert!(selected_is_downloaded(&state));
        assert_eq!(episode_limit(&state), None);

        move_selection(&mut state, 1);
        assert_eq!(state.episode, 1);
        assert!(!selected_is_downloaded(&state));
    }

    #[test]
    fn clamp_selection_handles_shrinking_tables() {
        let mut table_state = TableState::default();
        table_state.select(Some(9));
        clamp_selection(&mut table_state, 3);
        assert_eq!(table_state.selected(), Some(2));
        clamp_selection(&mut table_state, 0);
        assert_eq!(table_state.selected(), None);
    }

    #[test]
    fn failures_raise_a_notice_and_an_error_status() {
        let mut state = TuiState::new(Mode::Dub);
        let err = EngineError::ExternalToolFailure("exited with status 1".to_string());
        report_failure(&mut state, "One Piece episode 3", &err);

        assert_eq!(
            state.status,
            "ERROR: One Piece episode 3: ani-cli failed: exited with status 1"
        );
        let notice = state.notice.expect("notice");
        assert_eq!(notice.title, "Download Failed");
        assert!(notice.message.contains("exited with status 1"));
    }

    #[test]
    fn timeouts_get_their_own_notice_title() {
        let mut state = TuiState::new(Mode::Sub);
        let err = EngineError::Timeout(Duration::from_secs(30));
        report_failure(&mut state, "Mushishi episode 2", &err);

        let notice = state.notice.expect("notice");
        assert_eq!(notice.title, "Download Timed Out");
        assert!(state.status.contains("within 30s"));
    }

    #[test]
    fn mode_toggle_flips_between_sub_and_dub() {
        let mut state = TuiState::new(Mode::Sub);
        assert_eq!(toggle_mode(&mut state), Mode::Dub);
        assert_eq!(toggle_mode(&mut state), Mode::Sub);
    }
}
