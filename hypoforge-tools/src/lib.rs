//! # Hypoforge Tools
//!
//! Tools the hypothesis generator can call: a literature search backed by a
//! web search and an LLM research assistant.

pub mod literature;
pub mod registry;
pub mod web;

use hypoforge_core::agent::RegisteredTool;
use hypoforge_core::brain::LlmProvider;
use hypoforge_core::config::LiteratureConfig;
use registry::{Tool, ToolRegistry};
use std::sync::Arc;
use std::time::Duration;

/// Register the tools offered to the hypothesis generator.
///
/// `assistant` summarizes literature results; without it the tool returns
/// raw search results.
pub fn register_research_tools(
    registry: &mut ToolRegistry,
    config: &LiteratureConfig,
    assistant: Option<Arc<dyn LlmProvider>>,
) {
    let search: Arc<dyn Tool> = Arc::new(web::WebSearchTool::new().with_max_results(config.max_results));
    let mut literature = literature::LiteratureSearchTool::new(search)
        .with_max_results(config.max_results)
        .with_timeout(Duration::from_secs(config.timeout_secs));
    if let Some(assistant) = assistant {
        literature = literature.with_assistant(assistant, config.model.clone());
    }

    let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(literature)];
    for tool in tools {
        if let Err(e) = registry.register(tool) {
            tracing::warn!("Failed to register tool: {}", e);
        }
    }
}

/// Adapt every registry tool into the agent's executor form. Calls go
/// through the registry so each one keeps its timeout.
pub fn into_registered_tools(registry: Arc<ToolRegistry>) -> Vec<RegisteredTool> {
    registry
        .list_definitions()
        .into_iter()
        .map(|definition| {
            let registry = Arc::clone(&registry);
            let name = definition.name.clone();
            RegisteredTool {
                definition,
                executor: Box::new(move |args| {
                    let registry = Arc::clone(&registry);
                    let name = name.clone();
                    Box::pin(async move { registry.execute(&name, args).await })
                }),
            }
        })
        .collect()
}
