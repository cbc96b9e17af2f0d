//! Per-instance tool registry.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use crate::tools::{Tool, ToolContext, ToolError, ToolOutput, ToolSpec};

/// Stores tools by key. Per-instance; crossing instances requires explicit handoff.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Arc<DashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|t| t.clone())
    }

    /// Specs of all registered tools, sorted by name for stable prompt ordering.
    pub fn list(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.iter().map(|t| t.spec()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Specs for the intersection of `allowed` with the registry. An empty allow-list
    /// means "no tools", not "all tools".
    pub fn specs_for(&self, allowed: &[String]) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = allowed
            .iter()
            .filter_map(|name| self.get(name))
            .map(|t| t.spec())
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Resolves and calls a tool by name.
    pub async fn call(
        &self,
        name: &str,
        args: Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.call(args, ctx).await
    }
}
