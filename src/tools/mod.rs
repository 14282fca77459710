//! Schema-described tools and their registry

pub mod builtin;
pub mod registry;

pub use registry::{
    tool_handler, ParamType, ParameterSpec, ToolDefinition, ToolRegistry, ToolSummary,
};
