//! Tool-interaction correlation.
//!
//! The agent event stream reports tool calls and tool outputs as separate
//! notifications without call ids. Calls are queued and each output is
//! paired with the oldest pending call, which is correct as long as tools
//! run one at a time.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// A tool invocation waiting for its output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub timestamp: String,
    /// Parsed arguments, `{"raw_arguments": ...}` when unparseable, or null when empty.
    pub input_args: Value,
}

impl ToolCallRecord {
    /// Record a call happening now from the raw argument string.
    pub fn now(tool_name: impl Into<String>, raw_arguments: &str) -> Self {
        Self {
            tool_name: tool_name.into(),
            timestamp: Utc::now().to_rfc3339(),
            input_args: parse_arguments(raw_arguments),
        }
    }
}

/// A tool result as reported by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutputRecord {
    pub timestamp: String,
    pub output: String,
    pub output_length: usize,
}

impl ToolOutputRecord {
    /// Record an output arriving now.
    pub fn now(output: impl Into<String>) -> Self {
        let output = output.into();
        Self {
            timestamp: Utc::now().to_rfc3339(),
            output_length: output.chars().count(),
            output,
        }
    }
}

/// One completed call/output pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInteraction {
    pub tool_name: String,
    pub timestamp_start: String,
    pub timestamp_end: String,
    pub duration_ms: Option<i64>,
    pub input_args: Value,
    pub output: String,
    pub output_length: usize,
}

impl ToolInteraction {
    fn pair(call: ToolCallRecord, output: ToolOutputRecord) -> Self {
        let duration_ms = match (
            parse_timestamp(&call.timestamp),
            parse_timestamp(&output.timestamp),
        ) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        };
        Self {
            tool_name: call.tool_name,
            timestamp_start: call.timestamp,
            timestamp_end: output.timestamp,
            duration_ms,
            input_args: call.input_args,
            output: output.output,
            output_length: output.output_length,
        }
    }
}

/// Decode a tool's raw argument string.
pub fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(raw).unwrap_or_else(|_| json!({ "raw_arguments": raw }))
}

/// Parse RFC 3339 instants, or naive ISO-8601 timestamps taken as UTC.
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// FIFO pairing of tool calls with tool outputs for one run.
#[derive(Debug, Default)]
pub struct ToolCorrelator {
    pending: VecDeque<ToolCallRecord>,
    completed: Vec<ToolInteraction>,
}

impl ToolCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a call until its output arrives.
    pub fn record_call(&mut self, call: ToolCallRecord) {
        if !self.pending.is_empty() {
            warn!(
                tool = %call.tool_name,
                pending = self.pending.len(),
                "Tool call issued while another is pending; pairing assumes sequential execution"
            );
        }
        debug!(tool = %call.tool_name, "Tool call queued");
        self.pending.push_back(call);
    }

    /// Pair an output with the oldest pending call.
    ///
    /// Returns the new interaction, or `None` if no call was pending (the
    /// output is dropped).
    pub fn record_output(&mut self, output: ToolOutputRecord) -> Option<&ToolInteraction> {
        let Some(call) = self.pending.pop_front() else {
            warn!(
                output_length = output.output_length,
                "Discarding tool output with no pending call"
            );
            return None;
        };
        let interaction = ToolInteraction::pair(call, output);
        debug!(
            tool = %interaction.tool_name,
            duration_ms = ?interaction.duration_ms,
            "Tool interaction completed"
        );
        self.completed.push(interaction);
        self.completed.last()
    }

    /// Completed interactions in completion order.
    pub fn interactions(&self) -> &[ToolInteraction] {
        &self.completed
    }

    pub fn into_interactions(self) -> Vec<ToolInteraction> {
        self.completed
    }

    /// Calls still waiting for output.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
