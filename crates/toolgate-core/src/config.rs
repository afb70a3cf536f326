//! Gateway configuration
//!
//! A single YAML document with one section per concern. Every field has a
//! default so a partial (or empty) file is valid. Loaded once at startup;
//! changing policy means restarting the process.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{backend, limits, orchestration, server};
use crate::error::GatewayError;
use crate::policy::PolicyConfig;

/// Environment overrides applied after the file is parsed.
const ENV_API_KEY: &str = "TOOLGATE_API_KEY";
const ENV_BACKEND_URL: &str = "TOOLGATE_BACKEND_URL";
const ENV_BACKEND_API_KEY: &str = "TOOLGATE_BACKEND_API_KEY";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerSection,
    pub model: ModelSection,
    pub security: SecuritySection,
    pub tools: ToolsSection,
    pub orchestration: OrchestrationSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    /// Bearer credential clients must present. `None` disables auth.
    pub api_key: Option<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: server::DEFAULT_HOST.to_string(),
            port: server::DEFAULT_PORT,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSection {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model_name: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            endpoint: backend::DEFAULT_ENDPOINT.to_string(),
            api_key: None,
            model_name: backend::DEFAULT_MODEL.to_string(),
            timeout_secs: backend::DEFAULT_TIMEOUT.as_secs(),
            max_retries: backend::DEFAULT_MAX_RETRIES,
        }
    }
}

impl ModelSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySection {
    pub allowed_directories: Vec<PathBuf>,
    pub blocked_directories: Vec<PathBuf>,
    pub allowed_commands: Vec<String>,
    pub blocked_commands: Vec<String>,
    pub max_file_size_mb: u64,
    pub max_output_lines: usize,
    pub command_timeout_secs: u64,
    /// Host environment variables forwarded to subprocesses on top of the
    /// minimal base set.
    pub env_passthrough: Vec<String>,
}

impl Default for SecuritySection {
    fn default() -> Self {
        Self {
            allowed_directories: vec![PathBuf::from(".")],
            blocked_directories: Vec::new(),
            allowed_commands: [
                "ls", "cat", "head", "tail", "wc", "pwd", "echo", "find", "grep", "rg", "diff",
                "git", "cargo", "npm", "node", "python", "python3", "pytest", "make", "go",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            blocked_commands: [
                "rm -rf", "sudo", "su", "doas", "mkfs", "shutdown", "reboot", "chmod 777",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            max_file_size_mb: limits::DEFAULT_MAX_FILE_SIZE_MB,
            max_output_lines: limits::DEFAULT_MAX_OUTPUT_LINES,
            command_timeout_secs: limits::DEFAULT_COMMAND_TIMEOUT.as_secs(),
            env_passthrough: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub enable_file_operations: bool,
    pub enable_edit_operations: bool,
    pub enable_terminal: bool,
    pub enable_web_search: bool,
    /// When false, write/edit/delete need a client confirmation before running.
    pub auto_apply_edits: bool,
    pub backup_dir: Option<PathBuf>,
    pub web_search: WebSearchSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            enable_file_operations: true,
            enable_edit_operations: true,
            enable_terminal: true,
            enable_web_search: false,
            auto_apply_edits: false,
            backup_dir: None,
            web_search: WebSearchSection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSearchSection {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub max_results: usize,
    pub timeout_secs: u64,
}

impl Default for WebSearchSection {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            max_results: 5,
            timeout_secs: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationSection {
    pub max_tool_rounds: usize,
    /// Advertise the gateway's tools when the client request has none.
    pub inject_tools: bool,
}

impl Default for OrchestrationSection {
    fn default() -> Self {
        Self {
            max_tool_rounds: orchestration::DEFAULT_MAX_TOOL_ROUNDS,
            inject_tools: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl GatewayConfig {
    /// Read, parse, apply env overrides and validate.
    pub fn load(path: &Path) -> Result<Self, GatewayError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_yaml(&raw)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, GatewayError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw).map_err(|e| GatewayError::Config(format!("invalid YAML: {}", e)))
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var(ENV_API_KEY) {
            self.server.api_key = Some(key).filter(|k| !k.is_empty());
        }
        if let Ok(url) = std::env::var(ENV_BACKEND_URL) {
            if !url.is_empty() {
                self.model.endpoint = url;
            }
        }
        if let Ok(key) = std::env::var(ENV_BACKEND_API_KEY) {
            self.model.api_key = Some(key).filter(|k| !k.is_empty());
        }
    }

    pub fn validate(&self) -> Result<(), GatewayError> {
        url::Url::parse(&self.model.endpoint).map_err(|e| {
            GatewayError::Config(format!(
                "model.endpoint '{}' is not a valid URL: {}",
                self.model.endpoint, e
            ))
        })?;
        if self.security.max_output_lines == 0 {
            return Err(GatewayError::Config(
                "security.max_output_lines must be positive".into(),
            ));
        }
        if self.security.max_file_size_mb == 0 {
            return Err(GatewayError::Config(
                "security.max_file_size_mb must be positive".into(),
            ));
        }
        if self.security.command_timeout_secs == 0 {
            return Err(GatewayError::Config(
                "security.command_timeout_secs must be positive".into(),
            ));
        }
        if self.orchestration.max_tool_rounds == 0 {
            return Err(GatewayError::Config(
                "orchestration.max_tool_rounds must be positive".into(),
            ));
        }
        if self.tools.enable_web_search && self.tools.web_search.endpoint.is_none() {
            return Err(GatewayError::Config(
                "tools.enable_web_search requires tools.web_search.endpoint".into(),
            ));
        }
        Ok(())
    }

    /// Build the immutable policy for this process. Relative directories are
    /// resolved against `working_dir`.
    pub fn policy_config(&self, working_dir: &Path) -> PolicyConfig {
        let resolve = |p: &PathBuf| {
            if p.is_absolute() {
                p.clone()
            } else {
                working_dir.join(p)
            }
        };
        let security = &self.security;
        PolicyConfig {
            allowed_directories: security.allowed_directories.iter().map(resolve).collect(),
            blocked_directories: security.blocked_directories.iter().map(resolve).collect(),
            allowed_commands: security.allowed_commands.clone(),
            blocked_commands: security.blocked_commands.clone(),
            max_file_size: security.max_file_size_mb.saturating_mul(1024 * 1024),
            max_output_lines: security.max_output_lines,
            command_timeout: Duration::from_secs(security.command_timeout_secs)
                .min(limits::MAX_COMMAND_TIMEOUT),
            env_passthrough: security.env_passthrough.clone(),
        }
    }
}
