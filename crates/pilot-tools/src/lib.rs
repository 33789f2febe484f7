// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod builtin;
pub mod registry;
pub mod tool;

pub use registry::ToolRegistry;
pub use tool::{ApprovalPolicy, Tool, ToolCall, ToolOutput};

pub use builtin::edit::EditTool;
pub use builtin::fetch::FetchTool;
pub use builtin::read::ReadTool;
pub use builtin::shell::{check_command, ShellTool};
pub use builtin::web_search::WebSearchTool;
pub use builtin::write::WriteTool;

use pilot_config::ToolsConfig;

/// Build the standard registry with every builtin registered.
pub fn builtin_registry(cfg: &ToolsConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(ShellTool { timeout_secs: cfg.shell_timeout_secs });
    registry.register(ReadTool);
    registry.register(WriteTool);
    registry.register(EditTool);
    registry.register(WebSearchTool { api_token: cfg.linkup_api_token.clone() });
    registry.register(FetchTool);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_contains_the_full_catalog() {
        let reg = builtin_registry(&ToolsConfig::default());
        let mut names = reg.names();
        names.sort();
        assert_eq!(names, vec!["edit", "fetch", "read", "shell", "web_search", "write"]);
    }
}
