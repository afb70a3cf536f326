//! Tool implementations
//!
//! Filesystem tools:
//! - read_file, write_file, edit_file, delete_file
//! - list_directory: BFS listing
//! - search_files: fuzzy file name search
//! - grep: content search
//!
//! Other tools:
//! - run_command: allow-listed shell commands
//! - web_search: configured search provider

pub mod delete_file;
pub mod edit_file;
pub mod grep;
pub mod list_directory;
pub mod read_file;
pub mod run_command;
pub mod search_files;
pub mod web_search;
pub mod write_file;

pub use delete_file::DeleteFileTool;
pub use edit_file::EditFileTool;
pub use grep::GrepTool;
pub use list_directory::ListDirectoryTool;
pub use read_file::ReadFileTool;
pub use run_command::RunCommandTool;
pub use search_files::SearchFilesTool;
pub use web_search::{HttpSearchProvider, SearchHit, SearchProvider, WebSearchTool};
pub use write_file::WriteFileTool;

use std::sync::Arc;

use anyhow::Result;

use crate::config::ToolsSection;
use crate::tools::registry::ToolRegistry;

/// Register the tools enabled in `tools`.
pub fn register_all_tools(registry: &mut ToolRegistry, tools: &ToolsSection) -> Result<()> {
    if tools.enable_file_operations {
        registry.register(Arc::new(ReadFileTool));
        registry.register(Arc::new(ListDirectoryTool));
        registry.register(Arc::new(SearchFilesTool));
        registry.register(Arc::new(GrepTool));
    }
    if tools.enable_edit_operations {
        registry.register(Arc::new(WriteFileTool));
        registry.register(Arc::new(EditFileTool));
        registry.register(Arc::new(DeleteFileTool));
    }
    if tools.enable_terminal {
        registry.register(Arc::new(RunCommandTool));
    }
    if tools.enable_web_search {
        registry.register(Arc::new(WebSearchTool::from_config(&tools.web_search)?));
    }
    Ok(())
}
