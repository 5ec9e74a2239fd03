//! Tool abstractions for the agent loop.
//!
//! Every capability the model can invoke is a [`Tool`] implementor. Tools are
//! collected into a [`ToolRegistry`], which the agent borrows through the
//! [`ToolExecutor`] trait. The registry handles dispatch by name, optional
//! JSON-Schema validation, timeouts, and converts errors and panics into
//! failed [`ToolResult`]s.
//!
//! # Defining tools
//!
//! - **[`FnTool`]**: closure-based. [`FnTool::typed`] deserializes the
//!   arguments into a struct first.
//! - **`impl Tool`**: a struct with [`Tool::description`] and
//!   [`Tool::execute`]. Best for tools with state.
//!
//! Arguments arrive as [`ToolArgs`], whose accessors return
//! `Result<_, ParamError>`.

pub mod args;
pub mod core;

pub use args::{LenientArgs, ParamError, ToolArgs};
pub use core::{
    FnTool, ParamType, Tool, ToolDescription, ToolError, ToolExecutor, ToolFuture, ToolParameter,
    ToolRegistry, ToolResult, validate_arguments,
};
