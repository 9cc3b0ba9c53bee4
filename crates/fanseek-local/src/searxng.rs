use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use fanseek_core::{Error, Result, SearchBackend, SearchOptions, UpstreamResult};
use reqwest::header::{HeaderValue, ACCEPT, AUTHORIZATION};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const PROBE_TIMEOUT_MS: u64 = 5_000;
pub const USER_AGENT: &str = concat!("fanseek/", env!("CARGO_PKG_VERSION"));

/// Shared HTTP client for backend calls. Per-call deadlines are applied by the caller.
pub fn http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder().user_agent(USER_AGENT).build()
}

#[derive(Clone, PartialEq, Eq)]
pub struct BasicAuth {
    username: String,
    password: String,
}

impl BasicAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// `Basic base64(username:password)`
    pub fn header_value(&self) -> String {
        let raw = format!("{}:{}", self.username, self.password);
        format!("Basic {}", BASE64.encode(raw))
    }
}

// Never print the password.
impl std::fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct SearxngSettings {
    pub base_url: Url,
    pub auth: Option<BasicAuth>,
    pub timeout: Duration,
}

impl SearxngSettings {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            auth: None,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }

    pub fn with_auth(mut self, auth: Option<BasicAuth>) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone)]
pub struct SearxngClient {
    client: reqwest::Client,
    settings: SearxngSettings,
    auth_header: Option<HeaderValue>,
}

impl SearxngClient {
    pub fn new(client: reqwest::Client, settings: SearxngSettings) -> Result<Self> {
        let auth_header = settings
            .auth
            .as_ref()
            .map(|a| {
                let mut v = HeaderValue::from_str(&a.header_value())
                    .map_err(|e| Error::InvalidInput(format!("invalid credentials: {e}")))?;
                v.set_sensitive(true);
                Ok::<_, Error>(v)
            })
            .transpose()?;
        Ok(Self {
            client,
            settings,
            auth_header,
        })
    }

    pub fn settings(&self) -> &SearxngSettings {
        &self.settings
    }

    fn timeout_ms(&self) -> u64 {
        self.settings.timeout.as_millis().try_into().unwrap_or(u64::MAX)
    }

    fn endpoint_search_for(base_endpoint: &str) -> String {
        // Accept either a base URL (…/), or a full /search endpoint.
        let mut base = base_endpoint.trim().trim_end_matches('/').to_string();
        if !base.ends_with("/search") {
            base.push_str("/search");
        }
        base
    }

    fn endpoint_root_for(base_endpoint: &str) -> String {
        let base = base_endpoint.trim().trim_end_matches('/');
        let base = base.strip_suffix("/search").unwrap_or(base);
        format!("{base}/")
    }

    /// Query-string pairs for one search. The language is re-validated here so an
    /// unknown tag can never reach the backend.
    pub fn query_pairs(query: &str, options: &SearchOptions) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("q", query.to_string()), ("format", "json".to_string())];
        if !options.engines.is_empty() {
            pairs.push(("engines", options.engines.join(",")));
        }
        if !options.categories.is_empty() {
            pairs.push(("categories", options.categories.join(",")));
        }
        if let Some(level) = options.safesearch {
            pairs.push(("safesearch", level.level().to_string()));
        }
        if let Some(lang) = options
            .language
            .as_ref()
            .and_then(|l| fanseek_core::Language::parse(l.as_str()))
        {
            pairs.push(("language", lang.as_str().to_string()));
        }
        pairs
    }

    fn with_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_header {
            Some(v) => req.header(AUTHORIZATION, v.clone()),
            None => req,
        }
    }

    async fn send_search(&self, query: &str, options: &SearchOptions) -> Result<UpstreamResult> {
        let endpoint = Self::endpoint_search_for(self.settings.base_url.as_str());
        let req = self
            .client
            .get(endpoint)
            .header(ACCEPT, "application/json")
            .query(&Self::query_pairs(query, options));

        let resp = self
            .with_auth(req)
            .send()
            .await
            .map_err(|e| Error::Upstream(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Upstream(format!("searxng search HTTP {status}")));
        }

        resp.json::<UpstreamResult>()
            .await
            .map_err(|e| Error::Upstream(format!("invalid searxng response: {e}")))
    }
}

#[async_trait::async_trait]
impl SearchBackend for SearxngClient {
    fn name(&self) -> &'static str {
        "searxng"
    }

    async fn fetch_one(&self, query: &str, options: &SearchOptions) -> Result<UpstreamResult> {
        let t0 = Instant::now();
        // Dropping the inner future on expiry aborts the in-flight request.
        let res = match tokio::time::timeout(self.settings.timeout, self.send_search(query, options))
            .await
        {
            Ok(r) => r,
            Err(_) => Err(Error::Timeout(self.timeout_ms())),
        };
        let elapsed_ms = t0.elapsed().as_millis() as u64;
        match &res {
            Ok(r) => debug!(
                query,
                elapsed_ms,
                results = r.results.len(),
                "searxng search ok"
            ),
            Err(e) => warn!(query, elapsed_ms, error = %e, "searxng search failed"),
        }
        res
    }

    async fn probe(&self) -> bool {
        let root = Self::endpoint_root_for(self.settings.base_url.as_str());
        let req = self.with_auth(self.client.head(&root));
        match tokio::time::timeout(Duration::from_millis(PROBE_TIMEOUT_MS), req.send()).await {
            Ok(Ok(resp)) => {
                let status = resp.status();
                debug!(url = %root, %status, "searxng probe");
                status.is_success() || status.is_redirection()
            }
            Ok(Err(e)) => {
                debug!(url = %root, error = %e, "searxng probe failed");
                false
            }
            Err(_) => {
                debug!(url = %root, "searxng probe timed out");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::http::{HeaderMap, StatusCode};
    use axum::{routing::get, Router};
    use fanseek_core::{Language, SafeSearch};
    use std::collections::HashMap;
    use std::net::SocketAddr;

    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    // /search echoes the query string and auth header back as a single result.
    fn fixture() -> Router {
        Router::new()
            .route("/", get(|| async { "ok" }))
            .route(
                "/search",
                get(
                    |q: Query<HashMap<String, String>>, headers: HeaderMap| async move {
                        let text = q.get("q").cloned().unwrap_or_default();
                        if text == "slow" {
                            tokio::time::sleep(Duration::from_millis(1_500)).await;
                        }
                        if text == "boom" {
                            return (StatusCode::BAD_GATEWAY, "upstream down".to_string());
                        }
                        if text == "garbage" {
                            return (StatusCode::OK, "<html>not json</html>".to_string());
                        }
                        let auth = headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("")
                            .to_string();
                        let accept = headers
                            .get("accept")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("")
                            .to_string();
                        let body = serde_json::json!({
                            "query": text,
                            "number_of_results": 7,
                            "results": [{
                                "url": "https://example.com/a",
                                "title": "A",
                                "content": "alpha",
                                "engine": "fixture",
                                "params": q.0,
                                "auth": auth,
                                "accept": accept
                            }]
                        });
                        (StatusCode::OK, body.to_string())
                    },
                ),
            )
    }

    fn client_for(addr: SocketAddr, auth: Option<BasicAuth>, timeout_ms: u64) -> SearxngClient {
        let url = Url::parse(&format!("http://{addr}/")).unwrap();
        let settings = SearxngSettings::new(url)
            .with_auth(auth)
            .with_timeout(Duration::from_millis(timeout_ms));
        SearxngClient::new(http_client().unwrap(), settings).unwrap()
    }

    #[test]
    fn basic_auth_header_is_base64_of_user_colon_pass() {
        let a = BasicAuth::new("alice", "s3cret");
        assert_eq!(a.header_value(), "Basic YWxpY2U6czNjcmV0");
        assert!(!format!("{a:?}").contains("s3cret"));
    }

    #[test]
    fn endpoints_accept_base_or_search_urls() {
        assert_eq!(
            SearxngClient::endpoint_search_for("http://h:8080/"),
            "http://h:8080/search"
        );
        assert_eq!(
            SearxngClient::endpoint_search_for("http://h/searx/search/"),
            "http://h/searx/search"
        );
        assert_eq!(SearxngClient::endpoint_root_for("http://h/searx/search"), "http://h/searx/");
        assert_eq!(SearxngClient::endpoint_root_for("http://h"), "http://h/");
    }

    #[test]
    fn query_pairs_include_only_set_options() {
        let minimal = SearxngClient::query_pairs("rust", &SearchOptions::default());
        assert_eq!(
            minimal,
            vec![("q", "rust".to_string()), ("format", "json".to_string())]
        );

        let opts = SearchOptions {
            engines: vec!["google".into(), "bing".into()],
            categories: vec!["general".into(), "it".into()],
            safesearch: Some(SafeSearch::Strict),
            language: Language::parse("ZH-CN"),
        };
        let pairs: HashMap<&str, String> =
            SearxngClient::query_pairs("rust", &opts).into_iter().collect();
        assert_eq!(pairs["engines"], "google,bing");
        assert_eq!(pairs["categories"], "general,it");
        assert_eq!(pairs["safesearch"], "2");
        assert_eq!(pairs["language"], "zh-cn");
    }

    #[tokio::test]
    async fn sends_query_params_and_auth_header() {
        let addr = serve(fixture()).await;
        let c = client_for(addr, Some(BasicAuth::new("alice", "s3cret")), 5_000);
        let opts = SearchOptions {
            engines: vec!["duckduckgo".into()],
            safesearch: Some(SafeSearch::Off),
            language: Language::parse("en"),
            ..Default::default()
        };
        let r = c.fetch_one("hello world", &opts).await.unwrap();
        assert_eq!(r.number_of_results, 7);
        let echo = &r.results[0].extra;
        assert_eq!(echo["params"]["q"], "hello world");
        assert_eq!(echo["params"]["format"], "json");
        assert_eq!(echo["params"]["engines"], "duckduckgo");
        assert_eq!(echo["params"]["safesearch"], "0");
        assert_eq!(echo["params"]["language"], "en");
        assert!(echo["params"].get("categories").is_none());
        assert_eq!(echo["auth"], "Basic YWxpY2U6czNjcmV0");
        assert_eq!(echo["accept"], "application/json");
    }

    #[tokio::test]
    async fn omits_auth_header_without_credentials() {
        let addr = serve(fixture()).await;
        let c = client_for(addr, None, 5_000);
        let r = c.fetch_one("x", &SearchOptions::default()).await.unwrap();
        assert_eq!(r.results[0].extra["auth"], "");
    }

    #[tokio::test]
    async fn non_success_status_is_an_upstream_error() {
        let addr = serve(fixture()).await;
        let c = client_for(addr, None, 5_000);
        let err = c.fetch_one("boom", &SearchOptions::default()).await.unwrap_err();
        match err {
            Error::Upstream(m) => assert!(m.contains("502"), "{m}"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn undecodable_body_is_an_upstream_error() {
        let addr = serve(fixture()).await;
        let c = client_for(addr, None, 5_000);
        let err = c.fetch_one("garbage", &SearchOptions::default()).await.unwrap_err();
        assert!(matches!(err, Error::Upstream(_)), "{err:?}");
    }

    #[tokio::test]
    async fn slow_backend_times_out_with_the_configured_deadline() {
        let addr = serve(fixture()).await;
        let c = client_for(addr, None, 200);
        let t0 = Instant::now();
        let err = c.fetch_one("slow", &SearchOptions::default()).await.unwrap_err();
        assert_eq!(err, Error::Timeout(200));
        assert!(t0.elapsed() < Duration::from_millis(1_200));
    }

    #[tokio::test]
    async fn probe_reports_reachability_without_failing() {
        let addr = serve(fixture()).await;
        assert!(client_for(addr, None, 5_000).probe().await);

        // Grab a free port and release it so nothing is listening there.
        let closed = {
            let l = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap()
        };
        assert!(!client_for(closed, None, 5_000).probe().await);
    }
}
