//! Projection of backend results into the compact shape returned to RPC clients.
//!
//! The projection is lossy on purpose: only title, link and snippet survive per item.

use crate::fanout::{AggregateResult, PerQueryOutcome, Summary};
use serde::{Deserialize, Serialize};

pub const UNKNOWN_ERROR: &str = "Unknown error";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedItem {
    pub title: String,
    pub link: String,
    pub snippet: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedSearch {
    pub query: String,
    pub results: Vec<NormalizedItem>,
    pub total_results: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub searches: Vec<NormalizedSearch>,
    pub summary: Summary,
}

pub fn normalize(agg: &AggregateResult) -> SearchResponse {
    SearchResponse {
        searches: agg.results.iter().map(normalize_outcome).collect(),
        summary: agg.summary,
    }
}

fn normalize_outcome(o: &PerQueryOutcome) -> NormalizedSearch {
    match (&o.data, o.success) {
        (Some(data), true) => NormalizedSearch {
            query: o.query.clone(),
            results: data
                .results
                .iter()
                .map(|r| NormalizedItem {
                    title: r.title.clone().unwrap_or_default(),
                    link: r.url.clone().unwrap_or_default(),
                    snippet: r.content.clone().unwrap_or_default(),
                })
                .collect(),
            total_results: data.number_of_results,
            success: true,
            error: None,
        },
        _ => NormalizedSearch {
            query: o.query.clone(),
            results: Vec::new(),
            total_results: 0,
            success: false,
            error: Some(
                o.error
                    .as_deref()
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or(UNKNOWN_ERROR)
                    .to_string(),
            ),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{UpstreamItem, UpstreamResult};

    fn aggregate(results: Vec<PerQueryOutcome>) -> AggregateResult {
        AggregateResult {
            queries: results.iter().map(|o| o.query.clone()).collect(),
            summary: Summary::from_outcomes(&results),
            results,
        }
    }

    #[test]
    fn successful_items_keep_only_title_link_snippet() {
        let mut extra = serde_json::Map::new();
        extra.insert("thumbnail".into(), serde_json::json!("https://t/x.png"));
        let data = UpstreamResult {
            number_of_results: 42,
            results: vec![UpstreamItem {
                url: Some("u1".into()),
                title: Some("A".into()),
                content: Some("c1".into()),
                engine: Some("brave".into()),
                engines: vec!["brave".into()],
                score: Some(1.0),
                category: Some("general".into()),
                extra,
            }],
            ..Default::default()
        };
        let out = normalize(&aggregate(vec![PerQueryOutcome::succeeded("q", data)]));

        let s = &out.searches[0];
        assert!(s.success);
        assert_eq!(s.total_results, 42);
        assert_eq!(
            s.results,
            vec![NormalizedItem {
                title: "A".into(),
                link: "u1".into(),
                snippet: "c1".into()
            }]
        );

        let v = serde_json::to_value(s).unwrap();
        assert!(v.get("error").is_none());
        assert_eq!(
            v["results"][0],
            serde_json::json!({"title": "A", "link": "u1", "snippet": "c1"})
        );
    }

    #[test]
    fn missing_item_fields_become_empty_strings() {
        let data = UpstreamResult {
            results: vec![UpstreamItem {
                url: Some("u".into()),
                ..Default::default()
            }],
            ..Default::default()
        };
        let out = normalize(&aggregate(vec![PerQueryOutcome::succeeded("q", data)]));
        assert_eq!(out.searches[0].results[0].title, "");
        assert_eq!(out.searches[0].results[0].snippet, "");
    }

    #[test]
    fn failed_outcome_has_no_results_and_a_message() {
        let out = normalize(&aggregate(vec![
            PerQueryOutcome::failed("a", "upstream request failed: HTTP 500"),
            PerQueryOutcome {
                query: "b".into(),
                success: false,
                data: None,
                error: None,
            },
            PerQueryOutcome::failed("c", "   "),
        ]));

        let a = &out.searches[0];
        assert!(!a.success);
        assert!(a.results.is_empty());
        assert_eq!(a.total_results, 0);
        assert_eq!(a.error.as_deref(), Some("upstream request failed: HTTP 500"));
        assert_eq!(out.searches[1].error.as_deref(), Some(UNKNOWN_ERROR));
        assert_eq!(out.searches[2].error.as_deref(), Some(UNKNOWN_ERROR));
        assert_eq!(out.summary.failed, 3);
    }

    #[test]
    fn captured_messages_are_not_rewritten() {
        let out = normalize(&aggregate(vec![PerQueryOutcome::failed("a", " boom \n")]));
        assert_eq!(out.searches[0].error.as_deref(), Some(" boom \n"));
    }

    #[test]
    fn order_and_summary_pass_through() {
        let agg = aggregate(vec![
            PerQueryOutcome::failed("first", "x"),
            PerQueryOutcome::succeeded("second", UpstreamResult::default()),
        ]);
        let out = normalize(&agg);
        let names: Vec<&str> = out.searches.iter().map(|s| s.query.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
        assert_eq!(out.summary, agg.summary);
    }
}
