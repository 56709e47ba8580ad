//! toolhost-mcp: minimalist Model Context Protocol server.
//!
//! This library exposes a registry of host-defined tool functions to an MCP
//! client over one of two transports: a streamable HTTP endpoint or
//! line-delimited JSON-RPC over stdin/stdout. The host registers tools and
//! custom HTTP endpoints explicitly, then runs a transport; everything else
//! (handshake, session identity, version negotiation, message framing) is
//! handled here.
//!
//! # Embedding
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use serde_json::{json, Value};
//! use toolhost_mcp::mcp::{ProtocolEngine, SessionLifecycle, StdioServer};
//! use toolhost_mcp::registry::{ToolDescriptor, ToolHandler, ToolRegistry, ToolResult};
//! use toolhost_mcp::store::SessionStore;
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl ToolHandler for Echo {
//!     async fn call(&self, arguments: Value) -> ToolResult {
//!         ToolResult::text(arguments.to_string())
//!     }
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut registry = ToolRegistry::new();
//! registry.register_tool(
//!     ToolDescriptor::new("echo", "Echoes its arguments.", json!({"type": "object"})),
//!     Arc::new(Echo),
//! );
//!
//! let store = Arc::new(SessionStore::open("/tmp/my-sessions")?);
//! let engine = ProtocolEngine::new(Arc::new(registry), "my-host".into(), "1.0.0".into());
//! let lifecycle = SessionLifecycle::new(engine, store);
//! StdioServer::new(lifecycle, 86_400, 60).run().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`config`] — Configuration loading and validation
//! - [`error`] — Error types
//! - [`mcp`] — Protocol engine, lifecycle, and the two transports
//! - [`registry`] — Tool and custom-endpoint registration
//! - [`store`] — Durable session store

pub mod config;
pub mod error;
pub mod mcp;
pub mod registry;
pub mod store;
