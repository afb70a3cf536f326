//! Agent system for toolgate
//!
//! ## Orchestrator
//! - `Orchestrator` - the tool-call mediation loop over one conversation
//! - `ConversationRequest` / `Completion` - its input and output
//!
//! ## Hooks
//! - `ApprovalHook` - holds back unconfirmed mutating tools
//! - `LoggingHook` - one structured event per tool call

pub mod executor;
pub mod hooks;
pub mod orchestrator;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::GatewayConfig;
use crate::policy::PolicyEngine;
use crate::tools::{register_all_tools, ToolEnvironment, ToolRegistry};

pub use hooks::{ApprovalHook, HookResult, LoggingHook, PostToolHook, PreToolHook};
pub use orchestrator::{Completion, ConversationRequest, Orchestrator, OrchestratorConfig};

impl OrchestratorConfig {
    pub fn from_gateway(config: &GatewayConfig) -> Self {
        Self {
            max_tool_rounds: config.orchestration.max_tool_rounds,
            inject_tools: config.orchestration.inject_tools,
            auto_apply_edits: config.tools.auto_apply_edits,
            default_model: config.model.model_name.clone(),
        }
    }
}

/// Build the process-wide tool registry: policy, enabled tools and the
/// standard hooks.
pub fn build_tool_registry(config: &GatewayConfig, working_dir: &Path) -> Result<ToolRegistry> {
    let policy = PolicyEngine::new(config.policy_config(working_dir));
    let backup_dir = config.tools.backup_dir.as_ref().map(|dir| {
        if dir.is_absolute() {
            dir.clone()
        } else {
            working_dir.join(dir)
        }
    });
    let env = ToolEnvironment::new(working_dir.to_path_buf(), Arc::new(policy))
        .with_backup_dir(backup_dir);

    let mut registry = ToolRegistry::new(env);
    register_all_tools(&mut registry, &config.tools).context("failed to register tools")?;
    registry.add_pre_hook(Arc::new(ApprovalHook));
    registry.add_post_hook(Arc::new(LoggingHook::new()));
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolName;
    use tempfile::TempDir;

    #[test]
    fn registry_follows_tool_toggles() {
        let dir = TempDir::new().unwrap();
        let mut config = GatewayConfig::default();
        config.tools.enable_terminal = false;

        let registry = build_tool_registry(&config, dir.path()).unwrap();
        assert!(registry.get(&ToolName::RunCommand).is_none());
        assert!(registry.get(&ToolName::ReadFile).is_some());
    }

    #[test]
    fn orchestrator_config_mirrors_gateway_config() {
        let mut config = GatewayConfig::default();
        config.orchestration.max_tool_rounds = 3;
        config.tools.auto_apply_edits = true;
        config.model.model_name = "qwen".into();

        let orch = OrchestratorConfig::from_gateway(&config);
        assert_eq!(orch.max_tool_rounds, 3);
        assert!(orch.auto_apply_edits);
        assert_eq!(orch.default_model, "qwen");
    }
}
