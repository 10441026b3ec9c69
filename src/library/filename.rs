//! Extracts `(title, episode)` from downloaded media filenames.
//!
//! ani-cli names downloads `"<title> Episode <n>.mp4"`, but files dropped in by hand tend
//! to follow release conventions (`[Group] Title - 05 [1080p].mkv`, `Title_S01E05`), so the
//! parser tries several episode markers from most to least specific.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

static BRACKETED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[^\]]*\]|\([^)]*\)|\{[^}]*\}").unwrap());

static RELEASE_TAGS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:\d{3,4}p|4k|x26[45]|h\.?26[45]|hevc|avc|aac(?:2\.0)?|flac|opus|10-?bit|8-?bit|web-?dl|web-?rip|bluray|bdrip|hdtv|dual[ -]audio)\b",
    )
    .unwrap()
});

static EPISODE_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?P<title>.*?)[\s\-]*\b(?:episode|ep)\s*(?P<ep>\d{1,4})(?:v\d+)?\b").unwrap()
});

static SEASON_EPISODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?P<title>.*?)[\s\-]*\bS\d{1,2}\s*E(?P<ep>\d{1,4})(?:v\d+)?\b").unwrap()
});

static EPISODE_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?P<title>.*?)[\s\-]+E(?P<ep>\d{1,4})(?:v\d+)?\b").unwrap()
});

static DASH_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<title>.*?)\s+-\s+(?P<ep>\d{1,4})(?:v\d+)?\b").unwrap());

static TRAILING_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<title>.*?)[\s\-#]+(?P<ep>\d{1,4})(?:v\d+)?\s*$").unwrap()
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParsedFilename {
    /// Title as written in the filename, separators replaced by spaces.
    pub(crate) title: String,
    /// Case- and separator-folded grouping key.
    pub(crate) title_key: String,
    pub(crate) episode: u32,
}

pub(crate) fn parse_filename(filename: &str) -> Option<ParsedFilename> {
    let stem = strip_media_extension(filename.trim());
    let without_brackets = BRACKETED.replace_all(stem, " ");
    let underscores_spaced = without_brackets.replace('_', " ");
    let without_tags = RELEASE_TAGS.replace_all(&underscores_spaced, " ");
    let cleaned = without_tags.replace('.', " ");
    let cleaned = collapse_whitespace(&cleaned);

    let patterns: [&Regex; 5] = [
        &EPISODE_WORD,
        &SEASON_EPISODE,
        &EPISODE_PREFIX,
        &DASH_NUMBER,
        &TRAILING_NUMBER,
    ];
    for pattern in patterns {
        let Some(caps) = pattern.captures(&cleaned) else {
            continue;
        };
        let Some(episode) = caps.name("ep").and_then(|m| m.as_str().parse::<u32>().ok()) else {
            continue;
        };
        let raw_title = caps.name("title").map(|m| m.as_str()).unwrap_or_default();
        let title = tidy_title(raw_title);
        let title_key = normalize_title_key(&title);
        // A marker with no title in front of it is unparseable; weaker patterns must not
        // reinterpret the marker word as a title.
        if title_key.is_empty() {
            return None;
        }
        return Some(ParsedFilename {
            title,
            title_key,
            episode,
        });
    }
    None
}

/// Folds a display title into the key used to group files and match search results.
///
/// Follows the rule ani-cli uses when naming downloads: everything from the first `(`
/// on is dropped and ASCII punctuation is deleted, so `Kaguya-sama: Love Is War (12
/// episodes)` and the file `Kaguyasama Love Is War Episode 1.mp4` share a key.
/// Underscores separate words.
pub(crate) fn normalize_title_key(raw: &str) -> String {
    let before_paren = raw.split('(').next().unwrap_or(raw);
    before_paren
        .to_lowercase()
        .chars()
        .filter_map(|ch| match ch {
            '_' => Some(' '),
            ch if ch.is_ascii_punctuation() => None,
            ch if ch.is_alphanumeric() => Some(ch),
            _ => Some(' '),
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn strip_media_extension(name: &str) -> &str {
    let path = Path::new(name);
    let looks_like_extension = path.extension().is_some_and(|ext| {
        ext.len() <= 4 && ext.to_string_lossy().chars().all(|c| c.is_ascii_alphanumeric())
    });
    match path.file_stem().and_then(|s| s.to_str()) {
        Some(stem) if looks_like_extension => stem,
        _ => name,
    }
}

fn tidy_title(raw: &str) -> String {
    let trimmed = raw.trim_matches(|c: char| c.is_whitespace() || c == '-' || c == '#');
    collapse_whitespace(trimmed)
}

fn collapse_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(name: &str) -> (String, u32) {
        let result = parse_filename(name).unwrap_or_else(|| panic!("{name} should parse"));
        (result.title_key, result.episode)
    }

    #[test]
    fn parses_ani_cli_naming() {
        let result = parse_filename("Naruto Episode 5.mp4").expect("ani-cli name should parse");
        assert_eq!(result.title, "Naruto");
        assert_eq!(result.title_key, "naruto");
        assert_eq!(result.episode, 5);
    }

    #[test]
    fn separator_and_case_variants_share_title_key() {
        assert_eq!(parsed("My_Show_-_Ep_02.mp4"), ("my show".to_string(), 2));
        assert_eq!(parsed("my show ep 2.mkv"), ("my show".to_string(), 2));
        assert_eq!(parsed("my.show.episode.7.mp4"), ("my show".to_string(), 7));
    }

    #[test]
    fn punctuation_is_deleted_like_ani_cli_file_names() {
        for (catalog_title, file_name) in [
            ("Kaguya-sama: Love Is War", "Kaguyasama Love Is War Episode 1.mp4"),
            ("Re:Zero kara Hajimeru Isekai Seikatsu", "ReZero kara Hajimeru Isekai Seikatsu Episode 3.mp4"),
            ("Steins;Gate", "SteinsGate Episode 12.mp4"),
            ("Fate/Zero (TV)", "FateZero Episode 2.mp4"),
        ] {
            let parsed = parse_filename(file_name).expect("ani-cli name should parse");
            assert_eq!(normalize_title_key(catalog_title), parsed.title_key, "{catalog_title}");
        }
        assert_eq!(normalize_title_key("Kaguya-sama: Love Is War"), "kaguyasama love is war");
    }

    #[test]
    fn parses_release_group_style_names() {
        assert_eq!(
            parsed("[SubsPlease] Sousou no Frieren - 05 (1080p) [ABCD1234].mkv"),
            ("sousou no frieren".to_string(), 5)
        );
        assert_eq!(
            parsed("Spy.x.Family.S01E12.1080p.WEB-DL.x264.mkv"),
            ("spy x family".to_string(), 12)
        );
        assert_eq!(parsed("Mushishi E03 720p.mp4"), ("mushishi".to_string(), 3));
    }

    #[test]
    fn cuts_title_at_first_parenthesis() {
        assert_eq!(
            parsed("One Piece (1100 episodes) Episode 3.mp4"),
            ("one piece".to_string(), 3)
        );
        assert_eq!(normalize_title_key("One Piece (1100 episodes)"), "one piece");
    }

    #[test]
    fn accepts_trailing_bare_number_and_version_suffix() {
        assert_eq!(parsed("bocchi the rock 04v2.mkv"), ("bocchi the rock".to_string(), 4));
        assert_eq!(parsed("Trigun #11.mp4"), ("trigun".to_string(), 11));
    }

    #[test]
    fn rejects_names_without_episode_or_title() {
        assert_eq!(parse_filename("Some Movie.mp4"), None);
        assert_eq!(parse_filename("notes.txt"), None);
        assert_eq!(parse_filename("Episode 4.mp4"), None);
        assert_eq!(parse_filename(""), None);
    }

    #[test]
    fn parsing_is_deterministic() {
        let name = "[Group] Cowboy_Bebop - 26 [BD 1080p].mkv";
        assert_eq!(parse_filename(name), parse_filename(name));
    }
}
