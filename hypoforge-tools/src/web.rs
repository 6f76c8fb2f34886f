//! Web search backend for the literature tool.
//!
//! `web_search` queries the DuckDuckGo instant-answer API directly; no API
//! key is needed.

use crate::registry::Tool;
use async_trait::async_trait;
use hypoforge_core::error::ToolError;
use hypoforge_core::types::ToolOutput;
use serde_json::Value;
use std::time::Duration;

const DEFAULT_ENDPOINT: &str = "https://api.duckduckgo.com/";

/// Search the web using the DuckDuckGo instant answers API.
///
/// Returns titles, snippets, and URLs as plain text.
pub struct WebSearchTool {
    endpoint: String,
    default_max_results: usize,
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSearchTool {
    pub fn new() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            default_max_results: 5,
        }
    }

    /// Point the tool at another instant-answer compatible endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.default_max_results = max_results.max(1);
        self
    }

    fn failed(message: String) -> ToolError {
        ToolError::ExecutionFailed {
            name: "web_search".into(),
            message,
        }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for information. Returns titles, snippets, and URLs from search results."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of results to return (max: 10)"
                }
            },
            "required": ["query"]
        })
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(15)
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let query = args.get("query").and_then(|v| v.as_str()).ok_or_else(|| {
            ToolError::InvalidArguments {
                name: "web_search".into(),
                reason: "Missing required parameter: query".into(),
            }
        })?;

        let max_results = args
            .get("max_results")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(self.default_max_results)
            .min(10);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("Hypoforge/0.3")
            .build()
            .map_err(|e| Self::failed(format!("Failed to create HTTP client: {}", e)))?;

        let url = format!(
            "{}?q={}&format=json&no_html=1&skip_disambig=1",
            self.endpoint,
            urlencoding::encode(query)
        );

        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|e| Self::failed(format!("Search request failed: {}", e)))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| Self::failed(format!("Failed to parse search response: {}", e)))?;

        let results = collect_results(&body, max_results);
        let urls: Vec<Value> = results
            .iter()
            .filter(|r| !r.url.is_empty())
            .map(|r| Value::String(r.url.clone()))
            .collect();

        Ok(ToolOutput::text(format_results(query, &results)).with_metadata("urls", Value::Array(urls)))
    }
}

/// One search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub source: Option<String>,
    pub text: String,
    pub url: String,
}

/// Pull up to `max_results` hits out of an instant-answer response: the
/// abstract first, then related topics, then results.
pub fn collect_results(body: &Value, max_results: usize) -> Vec<SearchResult> {
    let mut results = Vec::new();
    let str_field = |v: &Value, key: &str| v.get(key).and_then(|f| f.as_str()).map(str::to_string);

    if let Some(abstract_text) = str_field(body, "AbstractText").filter(|t| !t.is_empty()) {
        results.push(SearchResult {
            source: Some(str_field(body, "AbstractSource").unwrap_or_else(|| "Unknown".into())),
            text: abstract_text,
            url: str_field(body, "AbstractURL").unwrap_or_default(),
        });
    }

    for key in ["RelatedTopics", "Results"] {
        let Some(items) = body.get(key).and_then(|v| v.as_array()) else {
            continue;
        };
        for item in items {
            if results.len() >= max_results {
                return results;
            }
            // Topic groups nest their entries one level down.
            if let Some(nested) = item.get("Topics").and_then(|v| v.as_array()) {
                for topic in nested {
                    if results.len() >= max_results {
                        return results;
                    }
                    if let Some(text) = str_field(topic, "Text") {
                        results.push(SearchResult {
                            source: None,
                            text,
                            url: str_field(topic, "FirstURL").unwrap_or_default(),
                        });
                    }
                }
            } else if let Some(text) = str_field(item, "Text") {
                results.push(SearchResult {
                    source: None,
                    text,
                    url: str_field(item, "FirstURL").unwrap_or_default(),
                });
            }
        }
    }

    results.truncate(max_results);
    results
}

pub fn format_results(query: &str, results: &[SearchResult]) -> String {
    if results.is_empty() {
        return format!(
            "No instant answers found for \"{}\". Try refining your query.",
            query
        );
    }
    let lines: Vec<String> = results
        .iter()
        .map(|r| match &r.source {
            Some(source) => format!("[{}] {}\n  URL: {}", source, r.text, r.url),
            None => format!("- {}\n  URL: {}", r.text, r.url),
        })
        .collect();
    format!("Search results for \"{}\":\n\n{}", query, lines.join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sample_body() -> Value {
        json!({
            "AbstractText": "Drug discovery is the process of identifying new medications.",
            "AbstractSource": "Wikipedia",
            "AbstractURL": "https://en.wikipedia.org/wiki/Drug_discovery",
            "RelatedTopics": [
                {"Text": "Virtual screening", "FirstURL": "https://duckduckgo.com/Virtual_screening"},
                {"Name": "See also", "Topics": [
                    {"Text": "QSAR", "FirstURL": "https://duckduckgo.com/QSAR"}
                ]}
            ],
            "Results": [
                {"Text": "Official site", "FirstURL": "https://example.org"}
            ]
        })
    }

    #[test]
    fn test_collect_results_order() {
        let results = collect_results(&sample_body(), 10);
        let texts: Vec<&str> = results.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(
            texts,
            vec![
                "Drug discovery is the process of identifying new medications.",
                "Virtual screening",
                "QSAR",
                "Official site",
            ]
        );
        assert_eq!(results[0].source.as_deref(), Some("Wikipedia"));
    }

    #[test]
    fn test_collect_results_respects_limit() {
        let results = collect_results(&sample_body(), 2);
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].text, "Virtual screening");
    }

    #[test]
    fn test_collect_results_empty_abstract() {
        let body = json!({"AbstractText": "", "RelatedTopics": []});
        assert!(collect_results(&body, 5).is_empty());
    }

    #[test]
    fn test_format_results() {
        let results = collect_results(&sample_body(), 2);
        let text = format_results("drug discovery", &results);
        assert!(text.starts_with("Search results for \"drug discovery\":"));
        assert!(text.contains("[Wikipedia] Drug discovery"));
        assert!(text.contains("- Virtual screening\n  URL: https://duckduckgo.com/Virtual_screening"));

        let empty = format_results("nothing", &[]);
        assert!(empty.contains("No instant answers found for \"nothing\""));
    }

    #[test]
    fn test_schema() {
        let tool = WebSearchTool::new();
        assert_eq!(tool.name(), "web_search");
        assert_eq!(tool.parameters_schema()["required"][0], "query");
        assert_eq!(tool.timeout(), Duration::from_secs(15));
    }

    #[tokio::test]
    async fn test_missing_query() {
        let tool = WebSearchTool::new();
        let result = tool.execute(json!({})).await;
        assert!(matches!(result, Err(ToolError::InvalidArguments { .. })));
    }
}
