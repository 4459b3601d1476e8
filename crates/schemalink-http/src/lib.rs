//! # SchemaLink HTTP Transport
//!
//! Stateless request/response fallback for SchemaLink tool calls. Exposes the
//! same tool catalog as the persistent socket through two endpoints:
//!
//! - `GET /health`: any 2xx status means healthy
//! - `POST /tools/{tool_name}`: JSON body `{...params, agent_id, timestamp}`,
//!   the tool result is the response body
//!
//! Non-2xx replies carry `{error, error_type}` when the server provides them.
//! Client errors (4xx) surface as [`TransportError::Remote`]; server errors
//! (5xx) are connection failures so a selector can route around them.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use schemalink_http::{FallbackConfig, FallbackTransport};
//! use schemalink_transport_traits::ToolCall;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = FallbackTransport::new(FallbackConfig::new("http://127.0.0.1:8766"))?;
//!     let schema = transport
//!         .call(ToolCall::new("get_table_schema", json!({"database": "fin", "table": "accounts"})))
//!         .await?;
//!     println!("{schema}");
//!     Ok(())
//! }
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod config;
mod transport;

pub use config::FallbackConfig;
pub use transport::{FallbackTransport, tool_body};

// Re-export common types from traits crate for convenience
pub use schemalink_transport_traits::{
    ToolCall, ToolTransport, TransportError, TransportResult, TransportType,
};
