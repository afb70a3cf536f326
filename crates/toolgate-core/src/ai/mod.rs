//! Model backend layer
//!
//! - `types` - conversation and response types
//! - `format` - OpenAI chat/completions wire conversion
//! - `client` - HTTP client and the `ChatBackend` seam
//! - `retry` - backoff for transient backend failures

pub mod client;
pub mod format;
pub mod retry;
pub mod types;

pub use client::{BackendClient, ChatBackend};
pub use types::{
    AiTool, AiToolCall, BackendResponse, ChatRequest, FinishReason, ModelMessage, Role, Usage,
};
