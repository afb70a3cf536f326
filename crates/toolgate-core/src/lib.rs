//! toolgate core library
//!
//! Sandboxed tool execution for an OpenAI-compatible gateway:
//! - `policy` - path/command authorization and output clamping
//! - `tools` - tool trait, dispatcher and the built-in executors
//! - `ai` - backend wire types, client and retry
//! - `agent` - the multi-round conversation orchestrator
//! - `config` - typed YAML configuration

pub mod agent;
pub mod ai;
pub mod config;
pub mod constants;
pub mod error;
pub mod policy;
pub mod tools;

pub use agent::{Completion, ConversationRequest, Orchestrator, OrchestratorConfig};
pub use config::GatewayConfig;
pub use error::{ErrorCode, GatewayError};
pub use policy::{PolicyConfig, PolicyEngine};
pub use tools::{ToolCall, ToolName, ToolOutput, ToolRegistry, ToolResult};
