//! Tool executors and the dispatcher that routes calls to them.

pub mod fs_ops;
pub mod implementations;
pub mod path_locks;
pub mod registry;

pub use implementations::register_all_tools;
pub use path_locks::PathLocks;
pub use registry::{
    parse_params, Approval, ExecutionContext, Tool, ToolCall, ToolCategory, ToolEnvironment,
    ToolError, ToolName, ToolOutput, ToolRegistry, ToolResult,
};
