//! Concurrent multi-query execution.
//!
//! Every query gets exactly one backend call. All calls run concurrently and the batch waits
//! for every one of them to settle; a failing query only ever fails itself.

use crate::{Error, Result, SearchBackend, SearchOptions, UpstreamResult};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerQueryOutcome {
    pub query: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<UpstreamResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PerQueryOutcome {
    pub fn succeeded(query: impl Into<String>, data: UpstreamResult) -> Self {
        Self {
            query: query.into(),
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failed(query: impl Into<String>, error: impl ToString) -> Self {
        Self {
            query: query.into(),
            success: false,
            data: None,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
}

impl Summary {
    pub fn from_outcomes(outcomes: &[PerQueryOutcome]) -> Self {
        let successful = outcomes.iter().filter(|o| o.success).count();
        Self {
            total: outcomes.len(),
            successful,
            failed: outcomes.len() - successful,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub queries: Vec<String>,
    /// Same length and order as `queries`.
    pub results: Vec<PerQueryOutcome>,
    pub summary: Summary,
}

#[derive(Clone)]
pub struct FanOut {
    backend: Arc<dyn SearchBackend>,
}

impl FanOut {
    pub fn new(backend: Arc<dyn SearchBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn SearchBackend> {
        &self.backend
    }

    /// Run every query against the backend concurrently and collect the outcomes in input order.
    ///
    /// Only an empty query list fails the whole call.
    pub async fn search(
        &self,
        queries: &[String],
        options: &SearchOptions,
    ) -> Result<AggregateResult> {
        if queries.is_empty() {
            return Err(Error::InvalidInput(
                "at least one query is required".to_string(),
            ));
        }

        let backend = self.backend.as_ref();
        // join_all yields outputs in the order the futures were supplied, not completion order.
        let settled = join_all(queries.iter().map(|q| async move {
            match backend.fetch_one(q, options).await {
                Ok(data) => PerQueryOutcome::succeeded(q.as_str(), data),
                Err(e) => PerQueryOutcome::failed(q.as_str(), e),
            }
        }))
        .await;

        let summary = Summary::from_outcomes(&settled);
        Ok(AggregateResult {
            queries: queries.to_vec(),
            results: settled,
            summary,
        })
    }
}
