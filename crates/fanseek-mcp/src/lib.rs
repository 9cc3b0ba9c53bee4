//! `fanseek`: parallel multi-query SearXNG search exposed as an MCP server.

pub mod args;
pub mod config;
pub mod logging;
pub mod server;
pub mod transport;

pub use server::SearchServer;
