//! Process configuration: CLI flags with environment fallbacks, validated into a [`Config`].

use fanseek_local::searxng::{BasicAuth, SearxngSettings, DEFAULT_TIMEOUT_MS};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use url::Url;

pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
pub const DEFAULT_HTTP_PORT: u32 = 3000;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("SEARXNG_URL is required (set the variable or pass --url)")]
    MissingUrl,
    #[error("invalid SEARXNG_URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("SEARXNG_URL must use http or https (got {0:?})")]
    UnsupportedScheme(String),
    #[error("AUTH_USERNAME and AUTH_PASSWORD must be set together")]
    IncompleteCredentials,
    #[error("MCP_HTTP_PORT must be between 1 and 65535 (got {0})")]
    PortOutOfRange(u32),
    #[error("SEARXNG_TIMEOUT_MS must be greater than 0")]
    InvalidTimeout,
    #[error("invalid MCP_HTTP_HOST {0:?}: expected an IP address or localhost")]
    InvalidHost(String),
}

/// Where and how to reach SearXNG. Shared by `serve` and `doctor`.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct BackendArgs {
    /// SearXNG base URL, e.g. http://localhost:8080.
    #[arg(long, env = "SEARXNG_URL")]
    pub url: Option<String>,

    /// HTTP basic-auth username for SearXNG (requires --password).
    #[arg(long, env = "AUTH_USERNAME")]
    pub username: Option<String>,

    /// HTTP basic-auth password for SearXNG (requires --username).
    #[arg(long, env = "AUTH_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Per-query deadline in milliseconds.
    #[arg(long, env = "SEARXNG_TIMEOUT_MS", default_value_t = DEFAULT_TIMEOUT_MS)]
    pub timeout_ms: u64,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportArg {
    #[default]
    Stdio,
    Http,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub backend: BackendArgs,

    #[arg(long, env = "MCP_TRANSPORT", value_enum, default_value_t = TransportArg::Stdio, ignore_case = true)]
    pub transport: TransportArg,

    /// Listen address for the http transport.
    #[arg(long, env = "MCP_HTTP_HOST", default_value = DEFAULT_HTTP_HOST)]
    pub host: String,

    /// Listen port for the http transport.
    #[arg(long, env = "MCP_HTTP_PORT", default_value_t = DEFAULT_HTTP_PORT)]
    pub port: u32,

    /// Debug-level logging (overridden by RUST_LOG).
    #[arg(long, env = "DEBUG")]
    pub debug: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Stdio,
    Http { addr: SocketAddr },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub searxng: SearxngSettings,
    pub transport: TransportKind,
    pub debug: bool,
}

fn non_blank(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl BackendArgs {
    pub fn settings(&self) -> Result<SearxngSettings, ConfigError> {
        let raw = non_blank(&self.url).ok_or(ConfigError::MissingUrl)?;
        let url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
            url: raw.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::UnsupportedScheme(url.scheme().to_string()));
        }

        // Blank counts as unset; the password itself is kept verbatim.
        let user = non_blank(&self.username);
        let pass = self.password.as_deref().filter(|p| !p.trim().is_empty());
        let auth = match (user, pass) {
            (Some(u), Some(p)) => Some(BasicAuth::new(u, p)),
            (None, None) => None,
            _ => return Err(ConfigError::IncompleteCredentials),
        };

        if self.timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout);
        }

        Ok(SearxngSettings::new(url)
            .with_auth(auth)
            .with_timeout(Duration::from_millis(self.timeout_ms)))
    }
}

fn listen_addr(host: &str, port: u32) -> Result<SocketAddr, ConfigError> {
    let port = u16::try_from(port)
        .ok()
        .filter(|p| *p != 0)
        .ok_or(ConfigError::PortOutOfRange(port))?;
    let host = host.trim();
    let ip = if host.eq_ignore_ascii_case("localhost") {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    } else {
        host.trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<IpAddr>()
            .map_err(|_| ConfigError::InvalidHost(host.to_string()))?
    };
    Ok(SocketAddr::new(ip, port))
}

impl Config {
    pub fn from_serve_args(args: &ServeArgs) -> Result<Self, ConfigError> {
        let searxng = args.backend.settings()?;
        let transport = match args.transport {
            TransportArg::Stdio => TransportKind::Stdio,
            TransportArg::Http => TransportKind::Http {
                addr: listen_addr(&args.host, args.port)?,
            },
        };
        Ok(Self {
            searxng,
            transport,
            debug: args.debug,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(url: &str) -> BackendArgs {
        BackendArgs {
            url: Some(url.to_string()),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            ..Default::default()
        }
    }

    fn serve(backend: BackendArgs, transport: TransportArg, port: u32) -> ServeArgs {
        ServeArgs {
            backend,
            transport,
            host: DEFAULT_HTTP_HOST.to_string(),
            port,
            debug: false,
        }
    }

    #[test]
    fn url_is_required_and_must_be_http() {
        assert_eq!(
            BackendArgs::default().settings().unwrap_err(),
            ConfigError::MissingUrl
        );
        assert_eq!(backend("   ").settings().unwrap_err(), ConfigError::MissingUrl);
        assert!(matches!(
            backend("not a url").settings().unwrap_err(),
            ConfigError::InvalidUrl { .. }
        ));
        assert_eq!(
            backend("ftp://searx.local").settings().unwrap_err(),
            ConfigError::UnsupportedScheme("ftp".into())
        );

        let s = backend("https://searx.example.org/").settings().unwrap();
        assert_eq!(s.base_url.as_str(), "https://searx.example.org/");
        assert!(s.auth.is_none());
        assert_eq!(s.timeout, Duration::from_millis(DEFAULT_TIMEOUT_MS));
    }

    #[test]
    fn credentials_come_in_pairs() {
        let mut b = backend("http://localhost:8080");
        b.username = Some("alice".into());
        assert_eq!(b.settings().unwrap_err(), ConfigError::IncompleteCredentials);

        b.password = Some("   ".into());
        assert_eq!(b.settings().unwrap_err(), ConfigError::IncompleteCredentials);

        b.password = Some("s3cret".into());
        let s = b.settings().unwrap();
        let auth = s.auth.unwrap();
        assert_eq!(auth.username(), "alice");
        assert_eq!(auth.header_value(), "Basic YWxpY2U6czNjcmV0");

        let mut only_pass = backend("http://localhost:8080");
        only_pass.password = Some("x".into());
        only_pass.username = Some("".into());
        assert_eq!(
            only_pass.settings().unwrap_err(),
            ConfigError::IncompleteCredentials
        );
    }

    #[test]
    fn timeout_must_be_positive() {
        let mut b = backend("http://localhost:8080");
        b.timeout_ms = 0;
        assert_eq!(b.settings().unwrap_err(), ConfigError::InvalidTimeout);
        b.timeout_ms = 250;
        assert_eq!(b.settings().unwrap().timeout, Duration::from_millis(250));
    }

    #[test]
    fn port_range_is_enforced_for_http_only() {
        for bad in [0, 65_536, 100_000] {
            assert_eq!(
                Config::from_serve_args(&serve(
                    backend("http://localhost:8080"),
                    TransportArg::Http,
                    bad
                ))
                .unwrap_err(),
                ConfigError::PortOutOfRange(bad)
            );
        }
        // stdio never binds, so the port is irrelevant there.
        let c = Config::from_serve_args(&serve(
            backend("http://localhost:8080"),
            TransportArg::Stdio,
            0,
        ))
        .unwrap();
        assert_eq!(c.transport, TransportKind::Stdio);
        assert!(!c.debug);

        let mut args = serve(backend("http://localhost:8080"), TransportArg::Stdio, 0);
        args.debug = true;
        assert!(Config::from_serve_args(&args).unwrap().debug);

        let c = Config::from_serve_args(&serve(
            backend("http://localhost:8080"),
            TransportArg::Http,
            65_535,
        ))
        .unwrap();
        assert_eq!(
            c.transport,
            TransportKind::Http {
                addr: "127.0.0.1:65535".parse().unwrap()
            }
        );
    }

    #[test]
    fn listen_hosts() {
        assert_eq!(
            listen_addr("localhost", 3000).unwrap(),
            "127.0.0.1:3000".parse().unwrap()
        );
        assert_eq!(
            listen_addr("0.0.0.0", 8080).unwrap(),
            "0.0.0.0:8080".parse().unwrap()
        );
        assert_eq!(
            listen_addr("[::1]", 3000).unwrap(),
            "[::1]:3000".parse().unwrap()
        );
        assert_eq!(
            listen_addr("example.com", 3000).unwrap_err(),
            ConfigError::InvalidHost("example.com".into())
        );
    }

    #[test]
    fn cli_flags_parse_into_serve_args() {
        use clap::Parser;

        #[derive(clap::Parser)]
        struct T {
            #[command(flatten)]
            serve: ServeArgs,
        }

        let t = T::try_parse_from([
            "t",
            "--url",
            "http://searx:8080",
            "--transport",
            "http",
            "--port",
            "4000",
            "--timeout-ms",
            "1500",
        ])
        .unwrap();
        assert_eq!(t.serve.transport, TransportArg::Http);
        assert_eq!(t.serve.port, 4000);
        assert_eq!(t.serve.backend.timeout_ms, 1500);
        assert_eq!(t.serve.backend.url.as_deref(), Some("http://searx:8080"));
    }
}
