//! Arguments of the `search` tool.
//!
//! Fields arrive as raw JSON so that wrong-typed optional knobs can be ignored instead of
//! failing the whole call; only `queries` and an out-of-range `safesearch` are hard errors.

use fanseek_core::{Language, SafeSearch, SearchOptions};
use schemars::{json_schema, JsonSchema, Schema, SchemaGenerator};
use serde::Deserialize;
use serde_json::Value;
use std::borrow::Cow;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchArgs {
    #[serde(default)]
    pub queries: Option<Value>,
    #[serde(default)]
    pub engines: Option<Value>,
    #[serde(default)]
    pub categories: Option<Value>,
    #[serde(default)]
    pub safesearch: Option<Value>,
    #[serde(default)]
    pub language: Option<Value>,
}

impl JsonSchema for SearchArgs {
    fn schema_name() -> Cow<'static, str> {
        "SearchArgs".into()
    }

    fn json_schema(_generator: &mut SchemaGenerator) -> Schema {
        json_schema!({
            "type": "object",
            "properties": {
                "queries": {
                    "type": "array",
                    "items": { "type": "string" },
                    "minItems": 1,
                    "description": "Search queries to run in parallel (at least one)."
                },
                "engines": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Restrict to these SearXNG engines, e.g. [\"google\", \"duckduckgo\"]."
                },
                "categories": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Restrict to these SearXNG categories, e.g. [\"general\", \"news\"]."
                },
                "safesearch": {
                    "type": "integer",
                    "enum": [0, 1, 2],
                    "description": "Safe search level: 0 off, 1 moderate, 2 strict."
                },
                "language": {
                    "type": "string",
                    "description": "Language code such as \"en\" or \"zh-cn\". Unknown codes are ignored."
                }
            },
            "required": ["queries"]
        })
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ArgError {
    #[error("queries must be a non-empty array of strings")]
    MissingQueries,
    #[error("queries[{0}] must be a non-blank string")]
    InvalidQuery(usize),
    #[error("safesearch must be 0, 1 or 2")]
    SafeSearchOutOfRange,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedSearch {
    pub queries: Vec<String>,
    pub options: SearchOptions,
}

impl SearchArgs {
    pub fn validate(self) -> Result<ValidatedSearch, ArgError> {
        let queries = match self.queries {
            Some(Value::Array(items)) if !items.is_empty() => items
                .into_iter()
                .enumerate()
                .map(|(i, v)| match v {
                    Value::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
                    _ => Err(ArgError::InvalidQuery(i)),
                })
                .collect::<Result<Vec<_>, _>>()?,
            _ => return Err(ArgError::MissingQueries),
        };

        let safesearch = match self.safesearch {
            Some(Value::Number(n)) => {
                let level = n
                    .as_i64()
                    .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                    .ok_or(ArgError::SafeSearchOutOfRange)?;
                Some(SafeSearch::try_from(level).map_err(|_| ArgError::SafeSearchOutOfRange)?)
            }
            _ => None,
        };

        let language = match self.language {
            Some(Value::String(s)) => Language::parse(&s),
            _ => None,
        };

        Ok(ValidatedSearch {
            queries,
            options: SearchOptions {
                engines: string_list(self.engines),
                categories: string_list(self.categories),
                safesearch,
                language,
            },
        })
    }
}

fn string_list(v: Option<Value>) -> Vec<String> {
    match v {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|x| match x {
                Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}
