//! The process's stdin/stdout as a single MCP connection.

use crate::server::SearchServer;
use rmcp::{transport::stdio, ServiceExt};
use std::io;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const STOP_GRACE: Duration = Duration::from_secs(2);

pub struct StdioTransport {
    cancel: CancellationToken,
    task: Option<JoinHandle<io::Result<()>>>,
}

impl StdioTransport {
    /// Bind `server` to stdin/stdout. Call once per process.
    pub fn start(server: SearchServer) -> Self {
        let cancel = CancellationToken::new();
        let ct = cancel.clone();
        let task = tokio::spawn(async move {
            let running = server
                .serve_with_ct(stdio(), ct)
                .await
                .map_err(|e| io::Error::other(e.to_string()))?;
            info!("stdio transport connected");
            let reason = running.waiting().await?;
            debug!(?reason, "stdio transport finished");
            Ok(())
        });
        Self {
            cancel,
            task: Some(task),
        }
    }

    /// Resolves when the client closes the pipe.
    pub async fn wait(&mut self) -> io::Result<()> {
        let Some(task) = self.task.as_mut() else {
            return Ok(());
        };
        // Keep the handle until it has completed so `stop` can still await it.
        let joined = task.await;
        self.task = None;
        joined?
    }

    pub async fn stop(mut self) -> io::Result<()> {
        self.cancel.cancel();
        let Some(mut task) = self.task.take() else {
            return Ok(());
        };
        match tokio::time::timeout(STOP_GRACE, &mut task).await {
            Ok(joined) => joined?,
            Err(_) => {
                // Blocking stdin reads do not observe cancellation.
                warn!("stdio transport did not stop in time; aborting");
                task.abort();
                Ok(())
            }
        }
    }
}
