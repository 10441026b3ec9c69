//! Remote show search against the AllAnime API that ani-cli itself queries.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::EngineError;
use crate::http::{RetryPolicy, get_text_with_retries};
use crate::library::normalize_title_key;

pub(crate) const ALLANIME_API: &str = "https://api.allanime.day/api";
pub(crate) const ALLANIME_REFERER: &str = "https://allmanga.to";
const THUMBNAIL_BASE: &str = "https://wp.youtube-anime.com/aln.youtube-anime.com";
const SEARCH_LIMIT: u32 = 40;

const SEARCH_GQL: &str = "query( $search: SearchInput $limit: Int $page: Int $translationType: VaildTranslationTypeEnumType $countryOrigin: VaildCountryOriginEnumType ) { shows( search: $search limit: $limit page: $page translationType: $translationType countryOrigin: $countryOrigin ) { edges { _id name availableEpisodes thumbnail __typename } }}";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Mode {
    #[default]
    Sub,
    Dub,
}

impl Mode {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Sub => "sub",
            Self::Dub => "dub",
        }
    }

    pub(crate) fn toggled(self) -> Self {
        match self {
            Self::Sub => Self::Dub,
            Self::Dub => Self::Sub,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = EngineError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sub" => Ok(Self::Sub),
            "dub" => Ok(Self::Dub),
            other => Err(EngineError::InvalidInput(format!(
                "mode must be `sub` or `dub`, got `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SearchResult {
    /// 1-based position, passed to ani-cli as `-S <index>`.
    pub(crate) index: u32,
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) episode_count: u32,
    pub(crate) poster_url: Option<String>,
}

impl SearchResult {
    pub(crate) fn title_key(&self) -> String {
        normalize_title_key(&self.title)
    }
}

pub(crate) trait Catalog: Send + Sync {
    fn search(&self, query: &str, mode: Mode) -> Result<Vec<SearchResult>, EngineError>;
}

#[derive(Debug, Clone)]
pub(crate) struct AllAnimeCatalog {
    endpoint: String,
    policy: RetryPolicy,
}

impl AllAnimeCatalog {
    pub(crate) fn new() -> Self {
        Self::with_endpoint(ALLANIME_API, RetryPolicy::SEARCH)
    }

    pub(crate) fn with_endpoint(endpoint: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            endpoint: endpoint.into(),
            policy,
        }
    }
}

impl Catalog for AllAnimeCatalog {
    fn search(&self, query: &str, mode: Mode) -> Result<Vec<SearchResult>, EngineError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let variables = json!({
            "search": {
                "allowAdult": false,
                "allowUnknown": false,
                "query": query,
            },
            "limit": SEARCH_LIMIT,
            "page": 1,
            "translationType": mode.as_str(),
            "countryOrigin": "ALL",
        });
        let params = vec![
            ("variables".to_string(), variables.to_string()),
            ("query".to_string(), SEARCH_GQL.to_string()),
        ];

        tracing::debug!(query, %mode, "searching catalog");
        let raw = get_text_with_retries(&self.endpoint, ALLANIME_REFERER, &params, self.policy)
            .map_err(|err| EngineError::IoFailure(format!("search for `{query}` failed: {err}")))?;
        parse_search_results(&raw, mode)
    }
}

pub(crate) fn parse_search_results(raw: &str, mode: Mode) -> Result<Vec<SearchResult>, EngineError> {
    let parsed: Value = serde_json::from_str(raw)
        .map_err(|err| EngineError::IoFailure(format!("unexpected search response: {err}")))?;
    let Some(edges) = parsed
        .pointer("/data/shows/edges")
        .and_then(serde_json::Value::as_array)
    else {
        return Err(EngineError::IoFailure(
            "unexpected search response: missing data.shows.edges".to_string(),
        ));
    };

    let mut results = Vec::new();
    for edge in edges {
        let Some(id) = edge.get("_id").and_then(Value::as_str).map(str::trim) else {
            continue;
        };
        let Some(title) = edge.get("name").and_then(Value::as_str).map(str::trim) else {
            continue;
        };
        let episode_count = edge
            .pointer(&format!("/availableEpisodes/{}", mode.as_str()))
            .and_then(episode_count_from_value)
            .unwrap_or(0);
        if id.is_empty() || title.is_empty() || episode_count < 1 {
            continue;
        }

        results.push(SearchResult {
            index: results.len() as u32 + 1,
            id: id.to_string(),
            title: title.to_string(),
            episode_count,
            poster_url: edge
                .get("thumbnail")
                .and_then(Value::as_str)
                .and_then(resolve_thumbnail_url),
        });
    }
    Ok(results)
}

/// Finds the result whose title folds to the same key as `title`.
pub(crate) fn find_result_by_title<'a>(
    results: &'a [SearchResult],
    title: &str,
) -> Option<&'a SearchResult> {
    let target = normalize_title_key(title);
    results.iter().find(|result| result.title_key() == target)
}

fn episode_count_from_value(value: &Value) -> Option<u32> {
    match value {
        Value::Number(number) => number.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(text) => text.trim().parse::<u32>().ok(),
        _ => None,
    }
}

fn resolve_thumbnail_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return Some(trimmed.to_string());
    }
    Some(format!(
        "{THUMBNAIL_BASE}/{}",
        trimmed.trim_start_matches('/')
    ))
}
