//! Shared defaults

use std::time::Duration;

pub mod server {
    pub const DEFAULT_HOST: &str = "0.0.0.0";
    pub const DEFAULT_PORT: u16 = 8001;
    pub const SERVICE_NAME: &str = "toolgate";
}

pub mod backend {
    use super::Duration;

    pub const DEFAULT_ENDPOINT: &str = "http://localhost:8000";
    pub const DEFAULT_MODEL: &str = "default";
    pub const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";
    pub const MODELS_PATH: &str = "/v1/models";
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
    pub const DEFAULT_MAX_RETRIES: u32 = 2;
}

pub mod limits {
    use super::Duration;

    pub const DEFAULT_MAX_FILE_SIZE_MB: u64 = 10;
    pub const DEFAULT_MAX_OUTPUT_LINES: usize = 1000;
    /// Byte ceiling applied alongside the line clamp.
    pub const MAX_OUTPUT_BYTES: usize = 256 * 1024;
    pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
    pub const MAX_COMMAND_TIMEOUT: Duration = Duration::from_secs(600);
    /// Registry-level ceiling for read-only tools.
    pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);
    pub const MAX_SEARCH_RESULTS: usize = 50;
    pub const MAX_LIST_ENTRIES: usize = 1000;
    pub const DEFAULT_LIST_DEPTH: usize = 3;
    pub const BINARY_SNIFF_BYTES: usize = 8192;
}

pub mod orchestration {
    pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 10;
}
