//! Transports that carry MCP traffic to a [`crate::server::SearchServer`].

pub mod http;
pub mod session;
pub mod stdio;

pub use http::{HttpTransport, TransportError, SESSION_HEADER};
pub use session::{Session, SessionRegistry};
pub use stdio::StdioTransport;
