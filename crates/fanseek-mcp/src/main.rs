use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fanseek::config::{BackendArgs, Config, ServeArgs, TransportKind};
use fanseek::transport::{HttpTransport, StdioTransport};
use fanseek::{logging, SearchServer};
use fanseek_core::SearchBackend;
use fanseek_local::searxng::{http_client, SearxngClient};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "fanseek")]
#[command(about = "Parallel multi-query SearXNG search as an MCP server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the MCP server (stdio by default, or session-multiplexed HTTP).
    Serve(ServeArgs),
    /// Check configuration and SearXNG reachability (json; no secrets).
    Doctor(DoctorCmd),
    /// Print version info.
    Version(VersionCmd),
}

#[derive(clap::Args, Debug)]
struct DoctorCmd {
    #[command(flatten)]
    backend: BackendArgs,
}

#[derive(clap::Args, Debug)]
struct VersionCmd {
    /// Output format: json (default) or text.
    #[arg(long, default_value = "json")]
    output: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };
    let res = rt.block_on(run(cli));
    // A blocked stdin read would otherwise keep the process alive after the transport stopped.
    rt.shutdown_timeout(Duration::from_millis(250));

    match res {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Serve(args) => serve(args).await,
        Commands::Doctor(args) => doctor(args).await,
        Commands::Version(args) => {
            let v = serde_json::json!({
                "schema_version": 1,
                "kind": "version",
                "ok": true,
                "name": "fanseek",
                "version": env!("CARGO_PKG_VERSION"),
            });
            match args.output.to_ascii_lowercase().as_str() {
                "text" => println!("fanseek {}", env!("CARGO_PKG_VERSION")),
                _ => println!("{}", v),
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// The base URL without any embedded password, for logs and reports.
fn display_url(url: &Url) -> String {
    let mut u = url.clone();
    let _ = u.set_password(None);
    u.to_string()
}

async fn serve(args: ServeArgs) -> Result<ExitCode> {
    let config = Config::from_serve_args(&args)?;
    logging::init(config.debug);

    let client = SearxngClient::new(
        http_client().context("building http client")?,
        config.searxng.clone(),
    )?;
    let backend: Arc<dyn SearchBackend> = Arc::new(client);
    info!(
        url = %display_url(&config.searxng.base_url),
        auth = config.searxng.auth.is_some(),
        timeout_ms = config.searxng.timeout.as_millis() as u64,
        transport = ?config.transport,
        version = env!("CARGO_PKG_VERSION"),
        "starting fanseek"
    );

    // Advisory only: the server starts either way.
    let probe = backend.clone();
    tokio::spawn(async move {
        if probe.probe().await {
            info!("searxng is reachable");
        } else {
            warn!("searxng is not reachable; searches will fail until it is");
        }
    });

    let server = SearchServer::new(backend);
    match config.transport {
        TransportKind::Stdio => {
            let mut transport = StdioTransport::start(server);
            let signalled = tokio::select! {
                r = transport.wait() => {
                    r.context("stdio transport failed")?;
                    info!("stdio client disconnected");
                    false
                }
                _ = shutdown_signal() => true,
            };
            if signalled {
                info!("shutdown signal received");
                transport
                    .stop()
                    .await
                    .context("stopping stdio transport")?;
            }
        }
        TransportKind::Http { addr } => {
            let mut transport = HttpTransport::bind(addr, server)
                .await
                .with_context(|| format!("binding http transport on {addr}"))?;
            tokio::select! {
                r = transport.wait() => {
                    r.context("http transport failed")?;
                }
                _ = shutdown_signal() => {
                    info!("shutdown signal received");
                }
            }
            transport
                .stop()
                .await
                .context("stopping http transport")?;
        }
    }
    info!("fanseek stopped");
    Ok(ExitCode::SUCCESS)
}

async fn doctor(args: DoctorCmd) -> Result<ExitCode> {
    logging::init(false);
    let settings = args.backend.settings()?;
    let t0 = Instant::now();
    let client = SearxngClient::new(
        http_client().context("building http client")?,
        settings.clone(),
    )?;
    let reachable = client.probe().await;

    let v = serde_json::json!({
        "schema_version": 1,
        "kind": "doctor",
        "ok": reachable,
        "name": "fanseek",
        "version": env!("CARGO_PKG_VERSION"),
        "url": display_url(&settings.base_url),
        "reachable": reachable,
        "auth_configured": settings.auth.is_some(),
        "timeout_ms": settings.timeout.as_millis() as u64,
        "elapsed_ms": t0.elapsed().as_millis() as u64,
    });
    println!("{}", v);
    Ok(if reachable {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
