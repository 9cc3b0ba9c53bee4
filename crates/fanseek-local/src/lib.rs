//! Network-facing implementations of the `fanseek-core` traits.

pub mod searxng;

pub use searxng::{BasicAuth, SearxngClient, SearxngSettings};
