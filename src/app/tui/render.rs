use ratatui::Frame;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{
    Block, BorderType, Borders, Cell, Clear, Gauge, Padding, Paragraph, Row, Table, Wrap,
};

use crate::catalog::Mode;

use super::super::format::{
    build_progress_gauge, format_episode_ranges, format_recorded_at, format_recorded_at_tui,
    format_size, truncate,
};
use super::{Pane, TuiState};

const ACCENT: Color = Color::Rgb(110, 170, 255);
const MUTED: Color = Color::Rgb(185, 195, 210);

pub(super) fn draw_tui(frame: &mut Frame, state: &mut TuiState, in_flight: &[String]) {
    let bg = Block::default().style(Style::default().bg(Color::Black));
    frame.render_widget(bg, frame.area());

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(3),
            Constraint::Length(3),
        ])
        .split(frame.area());

    frame.render_widget(header(state, in_flight), chunks[0]);
    frame.render_widget(query_input(state), chunks[1]);

    let body_chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(64), Constraint::Percentage(36)])
        .split(chunks[2]);
    let details_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(8), Constraint::Length(3)])
        .split(body_chunks[1]);

    match state.pane {
        Pane::Search => draw_results(frame, state, body_chunks[0]),
        Pane::Library => draw_library(frame, state, body_chunks[0]),
        Pane::History => draw_history(frame, state, body_chunks[0]),
    }

    let details = Paragraph::new(details_text(state))
        .style(Style::default().fg(Color::Rgb(230, 230, 230)))
        .wrap(Wrap { trim: false })
        .block(panel_block("Selected"));
    frame.render_widget(details, details_chunks[0]);

    let gauge = match state.pane {
        Pane::Library => state
            .selected_entry()
            .and_then(|entry| build_progress_gauge(entry.downloaded_count(), entry.total_episodes)),
        Pane::Search | Pane::History => None,
    };
    if let Some((ratio, label)) = gauge {
        let progress = Gauge::default()
            .block(panel_block("Downloaded"))
            .gauge_style(
                Style::default()
                    .fg(Color::Rgb(130, 190, 255))
                    .bg(Color::Black)
                    .add_modifier(Modifier::BOLD),
            )
            .label(label)
            .ratio(ratio);
        frame.render_widget(progress, details_chunks[1]);
    }

    let command_bar = Paragraph::new(controls_line(state))
        .alignment(Alignment::Center)
        .block(panel_block("Controls"));
    frame.render_widget(command_bar, chunks[3]);

    let status_widget = Paragraph::new(state.status.clone())
        .style(status_style(&state.status))
        .block(panel_block("Status"));
    frame.render_widget(status_widget, chunks[4]);

    if let Some(notice) = &state.notice {
        let popup_area = popup_rect_for_text(frame.area(), &notice.message);
        render_popup_shadow(frame, popup_area);
        frame.render_widget(Clear, popup_area);
        let popup = Paragraph::new(notice.message.clone())
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true })
            .block(modal_block(notice.title));
        frame.render_widget(popup, popup_area);
    }
}

fn header(state: &TuiState, in_flight: &[String]) -> Paragraph<'static> {
    let mut spans = vec![
        Span::styled(
            "ANISHELF",
            Style::default().fg(ACCENT).add_modifier(Modifier::BOLD),
        ),
        Span::styled("   ", Style::default()),
    ];
    for pane in [Pane::Search, Pane::Library, Pane::History] {
        spans.push(Span::styled(
            format!(" {} ", pane.label()),
            pill_style(pane == state.pane),
        ));
        spans.push(Span::styled(" ", Style::default()));
    }
    spans.push(Span::styled("  ", Style::default()));
    spans.push(Span::styled(
        format!(" {} ", state.mode.as_str().to_uppercase()),
        Style::default().fg(Color::Black).bg(mode_color(state.mode)),
    ));
    let activity = match in_flight.len() {
        0 if state.running == 0 => "idle".to_string(),
        0 => "working...".to_string(),
        1 => format!("downloading {}", truncate(&in_flight[0], 28)),
        n => format!("{n} downloads running"),
    };
    spans.push(Span::styled(
        format!("   {activity}"),
        Style::default().fg(if in_flight.is_empty() { MUTED } else { Color::Yellow }),
    ));

    Paragraph::new(Line::from(spans))
        .alignment(Alignment::Center)
        .block(panel_block("Dashboard"))
}

fn query_input(state: &TuiState) -> Paragraph<'static> {
    let (text, style) = if state.editing {
        (
            format!("{}▏", state.query),
            Style::default().fg(Color::Rgb(240, 240, 240)),
        )
    } else if state.query.is_empty() {
        (
            "press / to search".to_string(),
            Style::default().fg(Color::Rgb(120, 128, 140)),
        )
    } else {
        (state.query.clone(), Style::default().fg(MUTED))
    };
    let title = if state.editing {
        "Search (Enter submit, Esc cancel)"
    } else {
        "Search"
    };
    Paragraph::new(text).style(style).block(panel_block(title))
}

fn draw_results(frame: &mut Frame, state: &mut TuiState, area: Rect) {
    let rows = state
        .results
        .iter()
        .map(|result| {
            Row::new(vec![
                Cell::from(result.index.to_string()),
                Cell::from(result.title.clone()),
                Cell::from(result.episode_count.to_string()),
            ])
        })
        .collect::<Vec<_>>();
    let table = Table::new(
        rows,
        [
            Constraint::Length(4),
            Constraint::Min(20),
            Constraint::Length(8),
        ],
    )
    .header(table_header(vec!["#", "Title", "Eps"]))
    .block(panel_block("Results"))
    .row_highlight_style(highlight_style())
    .highlight_symbol("▸ ");
    frame.render_stateful_widget(table, area, &mut state.results_state);
}

fn draw_library(frame: &mut Frame, state: &mut TuiState, area: Rect) {
    let rows = state
        .library
        .iter()
        .map(|entry| {
            Row::new(vec![
                Cell::from(entry.title.clone()),
                Cell::from(entry.progress_text()),
                Cell::from(format_episode_ranges(&entry.downloaded_episodes)),
            ])
        })
        .collect::<Vec<_>>();
    let table = Table::new(
        rows,
        [
            Constraint::Percentage(50),
            Constraint::Length(10),
            Constraint::Percentage(40),
        ],
    )
    .header(table_header(vec!["Title", "On Disk", "Episodes"]))
    .block(panel_block("Library"))
    .row_highlight_style(highlight_style())
    .highlight_symbol("▸ ");
    frame.render_stateful_widget(table, area, &mut state.library_state);
}

fn draw_history(frame: &mut Frame, state: &mut TuiState, area: Rect) {
    let rows = state
        .history
        .iter()
        .map(|event| {
            Row::new(vec![
                Cell::from(format_recorded_at_tui(&event.recorded_at)),
                Cell::from(event.kind.label()),
                Cell::from(event.summary.clone()),
            ])
        })
        .collect::<Vec<_>>();
    let table = Table::new(
        rows,
        [
            Constraint::Length(12),
            Constraint::Length(8),
            Constraint::Min(20),
        ],
    )
    .header(table_header(vec!["When", "Kind", "Summary"]))
    .block(panel_block("History"))
    .row_highlight_style(highlight_style())
    .highlight_symbol("▸ ");
    frame.render_stateful_widget(table, area, &mut state.history_state);
}

fn details_text(state: &TuiState) -> String {
    match state.pane {
        Pane::Search => match state.selected_result() {
            Some(result) => {
                let poster = state
                    .posters
                    .get(&result.title_key())
                    .map(|path| path.display().to_string())
                    .unwrap_or_else(|| "-".to_string());
                format!(
                    "Title\n{}\n\nID\n{}\n\nEpisodes ({})\n{}\n\nEpisode\n{} of {}\n\nPoster\n{}",
                    truncate(&result.title, 40),
                    truncate(&result.id, 40),
                    state.mode,
                    result.episode_count,
                    state.episode,
                    result.episode_count,
                    truncate(&poster, 60),
                )
            }
            None => "No results yet.\n\nPress / and type a title to search.".to_string(),
        },
        Pane::Library => match state.selected_entry() {
            Some(entry) => {
                let on_disk = if entry.downloaded_episodes.contains(&state.episode) {
                    "on disk, Enter plays"
                } else {
                    "not downloaded, Enter fetches"
                };
                let missing = entry.missing_episodes();
                let missing_text = if entry.total_episodes.is_none() {
                    "unknown (search for the title to learn its total)".to_string()
                } else if missing.is_empty() {
                    "none".to_string()
                } else {
                    format_episode_ranges(&missing.into_iter().collect())
                };
                let latest = entry
                    .latest_file()
                    .map(|file| format!("{} ({})", truncate(&file.filename, 40), format_size(file.size)))
                    .unwrap_or_else(|| "-".to_string());
                let poster = entry
                    .poster_path
                    .as_ref()
                    .map(|path| truncate(&path.display().to_string(), 60))
                    .unwrap_or_else(|| "-".to_string());
                format!(
                    "Title\n{}\n\nEpisode\n{} ({on_disk})\n\nMissing\n{missing_text}\n\nLatest File\n{latest}\n\nPoster\n{poster}",
                    truncate(&entry.title, 40),
                    state.episode,
                )
            }
            None => "Library is empty.\n\nDownloaded episodes show up here.".to_string(),
        },
        Pane::History => match state.selected_event() {
            Some(event) => {
                let mut text = format!(
                    "{}\n{}\n\nTitle\n{}\n\nWhen\n{}",
                    event.kind.label(),
                    truncate(&event.summary, 80),
                    truncate(&event.title, 40),
                    format_recorded_at(&event.recorded_at),
                );
                if let Some(filename) = &event.filename {
                    text.push_str(&format!("\n\nFile\n{}", truncate(filename, 40)));
                }
                text
            }
            None => "Nothing has happened yet.".to_string(),
        },
    }
}

fn controls_line(state: &TuiState) -> Line<'static> {
    let hints = match state.pane {
        Pane::Search => "↑/↓ select  ←/→ episode  Enter download  a all episodes",
        Pane::Library => "↑/↓ select  ←/→ episode  Enter play/fetch  a fetch rest",
        Pane::History => "↑/↓ select",
    };
    Line::from(vec![
        Span::styled(hints, Style::default().fg(MUTED)),
        Span::styled(
            "   / search  Tab pane  m mode  r rescan  q quit",
            Style::default().fg(Color::Rgb(150, 160, 175)),
        ),
    ])
}

fn table_header(labels: Vec<&'static str>) -> Row<'static> {
    Row::new(labels).style(Style::default().fg(ACCENT).add_modifier(Modifier::BOLD))
}

fn highlight_style() -> Style {
    Style::default()
        .bg(ACCENT)
        .fg(Color::Black)
        .add_modifier(Modifier::BOLD)
}

fn mode_color(mode: Mode) -> Color {
    match mode {
        Mode::Sub => Color::Rgb(150, 220, 160),
        Mode::Dub => Color::Rgb(240, 200, 120),
    }
}

fn panel_block(title: &'static str) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(Color::Rgb(125, 135, 150)))
        .title(title)
}

fn modal_block(title: &'static str) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(
            Style::default()
                .fg(Color::Rgb(255, 160, 140))
                .add_modifier(Modifier::BOLD),
        )
        .title(title)
        .padding(Padding::new(2, 2, 1, 1))
}

fn pill_style(active: bool) -> Style {
    if active {
        Style::default()
            .bg(ACCENT)
            .fg(Color::Black)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default()
            .bg(Color::Rgb(72, 82, 96))
            .fg(Color::Rgb(230, 235, 242))
    }
}

fn status_style(status: &str) -> Style {
    if status.starts_with("ERROR:") {
        Style::default()
            .fg(Color::Rgb(255, 145, 120))
            .add_modifier(Modifier::BOLD)
    } else if status.starts_with("INFO:") {
        Style::default().fg(Color::Rgb(205, 165, 255))
    } else {
        Style::default().fg(Color::Rgb(230, 235, 242))
    }
}

fn centered_fixed_rect(width: u16, height: u16, area: Rect) -> Rect {
    let clamped_width = width.min(area.width.max(1));
    let clamped_height = height.min(area.height.max(1));
    let x = area.x + area.width.saturating_sub(clamped_width) / 2;
    let y = area.y + area.height.saturating_sub(clamped_height) / 2;
    Rect::new(x, y, clamped_width, clamped_height)
}

fn render_popup_shadow(frame: &mut Frame, popup_area: Rect) {
    let area = frame.area();
    let shadow = Rect::new(
        (popup_area.x + 1).min(area.x + area.width.saturating_sub(1)),
        (popup_area.y + 1).min(area.y + area.height.saturating_sub(1)),
        popup_area.width.saturating_sub(1),
        popup_area.height.saturating_sub(1),
    );
    if shadow.width == 0 || shadow.height == 0 {
        return;
    }
    let shadow_block = Block::default().style(Style::default().bg(Color::Rgb(14, 16, 24)));
    frame.render_widget(shadow_block, shadow);
}

fn popup_rect_for_text(area: Rect, text: &str) -> Rect {
    let max_line_width = text
        .lines()
        .map(|line| line.chars().count() as u16)
        .max()
        .unwrap_or(0);
    let line_count = text.lines().count() as u16;

    let available_width = area.width.saturating_sub(2).max(1);
    let min_width = 48.min(available_width);
    let max_width = 72.min(available_width);
    let width = max_line_width.saturating_add(12).clamp(min_width, max_width);

    let available_height = area.height.saturating_sub(2).max(1);
    let min_height = 10.min(available_height);
    let max_height = 18.min(available_height);
    let height = line_count.saturating_add(6).clamp(min_height, max_height);

    centered_fixed_rect(width, height, area)
}
