//! Subprocess execution and supervision for agent tools.
//!
//! - [`process`]: foreground runs with deadlines and a registry of
//!   background processes.
//! - [`mcp`]: a line-delimited JSON-RPC client for a long-lived MCP server
//!   child.
//! - [`tools`]: the JSON-in/JSON-out adapters that expose both to an agent.

pub mod config;
pub mod error_taxonomy;
pub mod logging;
pub mod mcp;
pub mod process;
pub mod serve;
pub mod tools;
