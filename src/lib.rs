//! The Force Engine MCP server binary package.
//!
//! This crate wires `force-core`'s `Engine` (the component registry and
//! execution runtime, spec.md §2) onto an MCP request/response surface
//! (spec.md §4.11) over either a stdio or HTTP transport. `force-core` is
//! fully testable without any of this; everything here is adapter code.

pub mod mcp_server;

pub use mcp_server::ForceServer;
