#![forbid(unsafe_code)]

//! MCP server front end: newline-delimited JSON-RPC 2.0 on stdio.
//!
//! Every request runs on its own thread so blocking long-poll tools never
//! stall the loop; responses are serialized through a shared stdout.
//! Role enforcement (allowlist + optional role code) happens before any
//! tool dispatch.

pub mod entry;
pub mod handlers;
pub mod roles;
pub mod server;
pub mod support;

pub use server::{McpServer, ServerConfig};
