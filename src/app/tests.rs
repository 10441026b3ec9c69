use std::collections::BTreeSet;

use super::format::*;
use super::tui::Pane;
use crate::catalog::SearchResult;

#[test]
fn search_line_matches_numbered_listing() {
    let result = SearchResult {
        index: 3,
        id: "abc".to_string(),
        title: "Naruto".to_string(),
        episode_count: 220,
        poster_url: None,
    };
    assert_eq!(format_search_line(&result), " 3. Naruto (220 episodes)");
}

#[test]
fn episode_ranges_collapse_consecutive_runs() {
    let episodes = BTreeSet::from([1, 2, 3, 5, 7, 8]);
    assert_eq!(format_episode_ranges(&episodes), "1-3, 5, 7-8");
}

#[test]
fn episode_ranges_handle_single_and_empty_sets() {
    assert_eq!(format_episode_ranges(&BTreeSet::from([4])), "4");
    assert_eq!(format_episode_ranges(&BTreeSet::new()), "-");
}

#[test]
fn progress_gauge_requires_known_total() {
    assert_eq!(build_progress_gauge(3, None), None);
    assert_eq!(build_progress_gauge(3, Some(0)), None);
    assert_eq!(
        build_progress_gauge(3, Some(12)),
        Some((0.25, "3/12".to_string()))
    );
}

#[test]
fn progress_gauge_caps_at_total() {
    assert_eq!(
        build_progress_gauge(14, Some(12)),
        Some((1.0, "12/12".to_string()))
    );
}

#[test]
fn sizes_switch_to_mebibytes() {
    assert_eq!(format_size(0), "0 KiB");
    assert_eq!(format_size(1500), "2 KiB");
    assert_eq!(format_size(350 * 1024 * 1024), "350.0 MiB");
}

#[test]
fn truncate_adds_ellipsis_only_when_needed() {
    assert_eq!(truncate("Mushishi", 20), "Mushishi");
    assert_eq!(truncate("Fullmetal Alchemist Brotherhood", 12), "Fullmetal...");
}

#[test]
fn recorded_at_falls_back_to_raw_text() {
    assert_eq!(format_recorded_at("not a timestamp"), "not a timestamp");
    assert_eq!(format_recorded_at_tui("yesterday"), "yesterday");
}

#[test]
fn recorded_at_formats_rfc3339() {
    let formatted = format_recorded_at("2026-03-01T12:30:00+00:00");
    assert!(formatted.starts_with("2026-03-0"), "{formatted}");
    assert_eq!(formatted.len(), "2026-03-01 12:30 +00:00".len());
}

#[test]
fn panes_cycle_in_both_directions() {
    let mut pane = Pane::Search;
    for _ in 0..3 {
        pane = pane.next();
    }
    assert_eq!(pane, Pane::Search);
    assert_eq!(Pane::Search.previous(), Pane::History);
    assert_eq!(Pane::Library.label(), "LIBRARY");
}
