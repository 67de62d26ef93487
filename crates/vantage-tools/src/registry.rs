// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use vantage_config::AgentMode;

use crate::{Tool, ToolCall, ToolOutput};

const DEFAULT_TOOL_CALL_TIMEOUT: Duration = Duration::from_secs(2 * 60);
const MAX_TOOL_CALL_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Resolves the per-tool deadline from `MCP_DEFAULT_TOOL_CALL_TIMEOUT`
/// (seconds), clamped to `MCP_MAX_TOOL_CALL_TIMEOUT` (also seconds, default
/// 10 minutes). A malformed or out-of-range value falls back to the default
/// rather than failing the call.
fn tool_call_deadline() -> Duration {
    let max = std::env::var("MCP_MAX_TOOL_CALL_TIMEOUT")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(MAX_TOOL_CALL_TIMEOUT);

    let default = std::env::var("MCP_DEFAULT_TOOL_CALL_TIMEOUT")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_TOOL_CALL_TIMEOUT);

    default.min(max)
}

/// A tool schema – mirrors vantage_model::ToolSchema but keeps tools crate
/// independent from the model crate.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Central registry holding all available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

// SAFETY: ToolRegistry is Sync because:
// - HashMap<String, Arc<dyn Tool>> is Sync (String is Sync, Arc<T: Send + Sync> is Sync)
// - Tools implement Send + Sync (required by the Tool trait)
// - No interior mutability exists after construction (all methods take &self)
// - Parallel tool execution is safe because tools are immutable after registration
unsafe impl Sync for ToolRegistry {}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Produce schemas for ALL registered tools (mode-unfiltered).
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self.tools.values().map(|t| ToolSchema {
            name: t.name().to_string(),
            description: t.description().to_string(),
            parameters: t.parameters_schema(),
        }).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Produce schemas only for tools available in the given mode.
    pub fn schemas_for_mode(&self, mode: AgentMode) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self.tools.values()
            .filter(|t| t.modes().contains(&mode))
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Executes the named tool, enforcing the per-tool deadline from
    /// `MCP_DEFAULT_TOOL_CALL_TIMEOUT`/`MCP_MAX_TOOL_CALL_TIMEOUT`. A tool
    /// that does not finish within the deadline is abandoned (its future is
    /// dropped) and a `ToolTimeout` result is reported to the model — this
    /// never blocks the agentic loop indefinitely on a hung tool.
    pub async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(tool) = self.tools.get(&call.name) else {
            return ToolOutput::err(&call.id, format!("unknown tool: {}", call.name));
        };
        let deadline = tool_call_deadline();
        match tokio::time::timeout(deadline, tool.execute(call)).await {
            Ok(output) => output,
            Err(_) => ToolOutput::timeout(&call.id, deadline),
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn names_for_mode(&self, mode: AgentMode) -> Vec<String> {
        let mut names: Vec<String> = self.tools.values()
            .filter(|t| t.modes().contains(&mode))
            .map(|t| t.name().to_string())
            .collect();
        names.sort();
        names
    }
}

impl Default for ToolRegistry {
    fn default() -> Self { Self::new() }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
