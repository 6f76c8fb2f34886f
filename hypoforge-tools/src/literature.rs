//! `literature_search`: web search followed by an LLM research assistant
//! that answers the query with citations.

use crate::registry::Tool;
use async_trait::async_trait;
use hypoforge_core::brain::LlmProvider;
use hypoforge_core::error::ToolError;
use hypoforge_core::prompts::literature_instructions;
use hypoforge_core::types::{CompletionRequest, Content, Message, ToolOutput};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub struct LiteratureSearchTool {
    search: Arc<dyn Tool>,
    assistant: Option<Arc<dyn LlmProvider>>,
    model: Option<String>,
    max_results: usize,
    timeout: Duration,
}

impl LiteratureSearchTool {
    /// A tool that returns raw search results.
    pub fn new(search: Arc<dyn Tool>) -> Self {
        Self {
            search,
            assistant: None,
            model: None,
            max_results: 8,
            timeout: Duration::from_secs(120),
        }
    }

    /// Summarize results with `assistant`, optionally overriding its model.
    pub fn with_assistant(mut self, assistant: Arc<dyn LlmProvider>, model: Option<String>) -> Self {
        self.assistant = Some(assistant);
        self.model = model;
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn summarize(
        &self,
        assistant: &dyn LlmProvider,
        query: &str,
        results: &str,
    ) -> Result<String, ToolError> {
        let request = CompletionRequest {
            messages: vec![
                Message::system(literature_instructions()),
                Message::user(format!(
                    "Query: {query}\n\nWeb search results:\n{results}\n\n\
                     Answer the query using the most relevant scholarly sources, with full citations."
                )),
            ],
            temperature: 0.3,
            model: self.model.clone(),
            ..CompletionRequest::default()
        };

        let response = assistant
            .complete(request)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                name: "literature_search".into(),
                message: format!("Literature assistant failed: {}", e),
            })?;
        Ok(response_text(&response.message.content))
    }
}

fn response_text(content: &Content) -> String {
    match content {
        Content::MultiPart { parts } => parts
            .iter()
            .filter_map(Content::as_text)
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.as_text().unwrap_or_default().to_string(),
    }
}

#[async_trait]
impl Tool for LiteratureSearchTool {
    fn name(&self) -> &str {
        "literature_search"
    }

    fn description(&self) -> &str {
        "Search recent academic literature. Returns an answer with detailed citations \
         (title, authors, venue, year, URL)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to look for in the literature"
                }
            },
            "required": ["query"]
        })
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments {
                name: "literature_search".into(),
                reason: "Missing required parameter: query".into(),
            })?;

        let found = self
            .search
            .execute(json!({"query": query, "max_results": self.max_results}))
            .await?;
        debug!(query = %query, chars = found.content.len(), "Literature search results fetched");

        let urls = found.metadata.get("urls").cloned().unwrap_or(json!([]));
        let Some(assistant) = &self.assistant else {
            return Ok(ToolOutput::text(found.content).with_metadata("urls", urls));
        };

        match self.summarize(assistant.as_ref(), query, &found.content).await {
            Ok(answer) => Ok(ToolOutput::text(answer).with_metadata("urls", urls)),
            Err(e) => {
                warn!(query = %query, error = %e, "Falling back to raw search results");
                Ok(ToolOutput::text(found.content).with_metadata("urls", urls))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hypoforge_core::brain::MockLlmProvider;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    /// Canned search backend that records its queries.
    #[derive(Default)]
    struct FakeSearch {
        queries: Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl Tool for FakeSearch {
        fn name(&self) -> &str {
            "web_search"
        }

        fn description(&self) -> &str {
            "fake"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }

        async fn execute(&self, args: Value) -> Result<ToolOutput, ToolError> {
            self.queries.lock().unwrap().push(args.clone());
            Ok(ToolOutput::text(format!("- Paper about {}", args["query"].as_str().unwrap_or("")))
                .with_metadata("urls", json!(["https://arxiv.org/abs/1234.5678"])))
        }
    }

    #[tokio::test]
    async fn test_raw_results_without_assistant() {
        let search = Arc::new(FakeSearch::default());
        let tool = LiteratureSearchTool::new(search.clone()).with_max_results(3);

        let output = tool.execute(json!({"query": "protein folding"})).await.unwrap();
        assert_eq!(output.content, "- Paper about protein folding");
        assert_eq!(output.metadata["urls"][0], "https://arxiv.org/abs/1234.5678");
        let queries = search.queries.lock().unwrap();
        assert_eq!(queries[0], json!({"query": "protein folding", "max_results": 3}));
    }

    #[tokio::test]
    async fn test_assistant_summarizes_results() {
        let assistant = Arc::new(MockLlmProvider::with_response(
            "Smith et al. (2025), Nature. https://example.org",
        ));
        let tool = LiteratureSearchTool::new(Arc::new(FakeSearch::default()))
            .with_assistant(assistant.clone(), Some("gpt-5-mini".into()));

        let output = tool.execute(json!({"query": "docking"})).await.unwrap();
        assert_eq!(output.content, "Smith et al. (2025), Nature. https://example.org");

        let requests = assistant.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].model.as_deref(), Some("gpt-5-mini"));
        let user = requests[0].messages[1].content.as_text().unwrap();
        assert!(user.contains("Query: docking"));
        assert!(user.contains("- Paper about docking"));
    }

    #[tokio::test]
    async fn test_assistant_failure_falls_back() {
        let assistant = Arc::new(MockLlmProvider::new());
        assistant.queue_failure("quota exceeded");
        let tool = LiteratureSearchTool::new(Arc::new(FakeSearch::default()))
            .with_assistant(assistant, None);

        let output = tool.execute(json!({"query": "enzymes"})).await.unwrap();
        assert_eq!(output.content, "- Paper about enzymes");
    }

    #[tokio::test]
    async fn test_blank_query_rejected() {
        let tool = LiteratureSearchTool::new(Arc::new(FakeSearch::default()));
        let result = tool.execute(json!({"query": "   "})).await;
        assert!(matches!(result, Err(ToolError::InvalidArguments { .. })));
    }

    #[test]
    fn test_definition() {
        let tool = LiteratureSearchTool::new(Arc::new(FakeSearch::default()))
            .with_timeout(Duration::from_secs(5));
        let def = tool.definition();
        assert_eq!(def.name, "literature_search");
        assert_eq!(def.parameters["required"][0], "query");
        assert_eq!(tool.timeout(), Duration::from_secs(5));
    }
}
