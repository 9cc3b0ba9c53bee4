//! The MCP tool surface: a single `search` tool backed by the fan-out executor.

use crate::args::SearchArgs;
use fanseek_core::{normalize, Error as CoreError, FanOut, SearchBackend};
use rmcp::{
    handler::server::router::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo, Tool},
    tool, tool_handler, tool_router, ErrorData as McpError,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

pub const SEARCH_TOOL: &str = "search";

fn tool_result(payload: serde_json::Value) -> CallToolResult {
    // Structured content for machine consumers plus a text fallback for clients that only
    // read `content[0].text`.
    let mut r = CallToolResult::structured(payload.clone());
    r.content = vec![Content::text(payload.to_string())];
    r
}

#[derive(Clone)]
pub struct SearchServer {
    tool_router: ToolRouter<Self>,
    fanout: FanOut,
}

#[tool_router]
impl SearchServer {
    pub fn new(backend: Arc<dyn SearchBackend>) -> Self {
        Self {
            tool_router: Self::tool_router(),
            fanout: FanOut::new(backend),
        }
    }

    /// Static tool descriptors, as returned by `tools/list`.
    pub fn tools(&self) -> Vec<Tool> {
        self.tool_router.list_all()
    }

    #[tool(
        name = "search",
        description = "Run several web search queries in parallel against the configured SearXNG instance. Returns, per query and in input order, a list of {title, link, snippet} results plus success/failure, and an overall summary. A failing query does not fail the others."
    )]
    async fn search(
        &self,
        Parameters(args): Parameters<SearchArgs>,
    ) -> Result<CallToolResult, McpError> {
        let t0 = Instant::now();
        let req = args
            .validate()
            .map_err(|e| McpError::invalid_params(e.to_string(), None))?;
        debug!(queries = req.queries.len(), options = ?req.options, "search tool called");

        let agg = self
            .fanout
            .search(&req.queries, &req.options)
            .await
            .map_err(|e| match e {
                CoreError::InvalidInput(m) => McpError::invalid_params(m, None),
                other => McpError::internal_error(format!("search failed: {other}"), None),
            })?;
        let response = normalize(&agg);
        info!(
            backend = self.fanout.backend().name(),
            total = response.summary.total,
            successful = response.summary.successful,
            failed = response.summary.failed,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "search batch finished"
        );

        let payload = serde_json::to_value(&response)
            .map_err(|e| McpError::internal_error(format!("search failed: {e}"), None))?;
        Ok(tool_result(payload))
    }
}

#[tool_handler]
impl rmcp::ServerHandler for SearchServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Parallel web search over SearXNG. Call `search` with `queries: [..]`; optional engines, categories, safesearch (0-2) and language."
                    .to_string(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
