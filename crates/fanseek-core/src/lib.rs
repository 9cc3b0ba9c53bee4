use serde::{Deserialize, Deserializer, Serialize};

pub mod fanout;
pub mod language;
pub mod normalize;

pub use fanout::{AggregateResult, FanOut, PerQueryOutcome, Summary};
pub use language::Language;
pub use normalize::{normalize, NormalizedItem, NormalizedSearch, SearchResponse};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("upstream request failed: {0}")]
    Upstream(String),
    #[error("upstream request timed out after {0} ms")]
    Timeout(u64),
}

pub type Result<T> = std::result::Result<T, Error>;

/// SearXNG safe-search level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SafeSearch {
    Off = 0,
    Moderate = 1,
    Strict = 2,
}

impl SafeSearch {
    pub fn level(self) -> u8 {
        self as u8
    }
}

impl TryFrom<i64> for SafeSearch {
    type Error = Error;

    fn try_from(v: i64) -> Result<Self> {
        match v {
            0 => Ok(Self::Off),
            1 => Ok(Self::Moderate),
            2 => Ok(Self::Strict),
            other => Err(Error::InvalidInput(format!(
                "safesearch must be 0, 1 or 2 (got {other})"
            ))),
        }
    }
}

/// Per-call knobs forwarded to the backend. Empty lists mean "not set".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchOptions {
    pub engines: Vec<String>,
    pub categories: Vec<String>,
    pub safesearch: Option<SafeSearch>,
    pub language: Option<Language>,
}

/// Raw backend response for a single query.
///
/// Only `results` is interpreted downstream; the other sections are carried through as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpstreamResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub number_of_results: u64,
    #[serde(default)]
    pub results: Vec<UpstreamItem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub answers: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub infoboxes: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub corrections: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unresponsive_engines: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpstreamItem {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    /// SearXNG uses `content` for snippets in JSON format.
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub engines: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Thumbnails, positions, parsed_url, publishedDate, ...
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// Some instances report the count as a float or null.
fn lenient_count<'de, D>(d: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<serde_json::Value>::deserialize(d)?;
    Ok(match v {
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f > 0.0).map(|f| f as u64))
            .unwrap_or(0),
        _ => 0,
    })
}

#[async_trait::async_trait]
pub trait SearchBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Issue exactly one search request for `query`. No retries.
    async fn fetch_one(&self, query: &str, options: &SearchOptions) -> Result<UpstreamResult>;

    /// Best-effort liveness check. Never fails; errors map to `false`.
    async fn probe(&self) -> bool;
}
