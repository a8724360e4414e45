//! Tools module - Host-side operations sandboxed code can name
//!
//! Each tool implements the `ToolHandler` trait and is registered into a
//! `ToolDispatcher`. The dispatcher's tool names are baked into the
//! in-sandbox preamble so code can only ask for tools that exist.
//!
//! ## Adding a New Tool
//!
//! 1. Implement `ToolHandler` for your type
//! 2. Register it on the dispatcher handed to `ExecutionOrchestrator`

mod registry;
mod traits;

pub use registry::ToolDispatcher;
pub use traits::{ToolHandler, ToolInvoker};
