use std::collections::BTreeSet;

use chrono::{DateTime, Local};

use crate::catalog::SearchResult;

pub(crate) fn truncate(s: &str, max: usize) -> String {
    let mut out = s.to_string();
    if out.chars().count() > max {
        out = out.chars().take(max.saturating_sub(3)).collect::<String>() + "...";
    }
    out
}

/// ` 3. Naruto (220 episodes)`
pub(crate) fn format_search_line(result: &SearchResult) -> String {
    format!(
        "{:>2}. {} ({} episodes)",
        result.index, result.title, result.episode_count
    )
}

/// Collapses runs of consecutive episodes: `1-3, 5, 7-8`.
pub(crate) fn format_episode_ranges(episodes: &BTreeSet<u32>) -> String {
    let mut parts = Vec::new();
    let mut iter = episodes.iter().copied();
    let Some(mut start) = iter.next() else {
        return "-".to_string();
    };
    let mut end = start;
    for episode in iter {
        if episode == end + 1 {
            end = episode;
            continue;
        }
        parts.push(range_text(start, end));
        start = episode;
        end = episode;
    }
    parts.push(range_text(start, end));
    parts.join(", ")
}

fn range_text(start: u32, end: u32) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{start}-{end}")
    }
}

pub(crate) fn format_size(bytes: u64) -> String {
    const MIB: f64 = 1024.0 * 1024.0;
    if bytes < 1024 * 1024 {
        return format!("{} KiB", bytes.div_ceil(1024));
    }
    format!("{:.1} MiB", bytes as f64 / MIB)
}

pub(crate) fn build_progress_gauge(downloaded: usize, total: Option<u32>) -> Option<(f64, String)> {
    let total = total.filter(|total| *total > 0)?;
    let shown = (downloaded as u32).min(total);
    let ratio = (shown as f64 / total as f64).clamp(0.0, 1.0);
    Some((ratio, format!("{shown}/{total}")))
}

pub(crate) fn format_recorded_at(raw: &str) -> String {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| {
            dt.with_timezone(&Local)
                .format("%Y-%m-%d %H:%M %:z")
                .to_string()
        })
        .unwrap_or_else(|_| raw.to_string())
}

pub(crate) fn format_recorded_at_tui(raw: &str) -> String {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Local).format("%m-%d %H:%M").to_string())
        .unwrap_or_else(|_| raw.to_string())
}
