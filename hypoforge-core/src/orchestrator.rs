//! Streaming orchestrator.
//!
//! Wraps an agent event stream and re-emits it as a richer [`RunEvent`]
//! stream: every upstream event is forwarded, new hypotheses are announced
//! the moment their closing fence arrives, and completed tool interactions
//! are summarized once the upstream ends.
//!
//! All run state lives in one [`ExtractionTracker`] owned by the stream
//! itself, so a run needs no locking and is abandoned simply by dropping the
//! stream.

use crate::agent::{AgentEvent, AgentEventStream};
use crate::correlator::{ToolCallRecord, ToolCorrelator, ToolInteraction, ToolOutputRecord};
use crate::error::Result;
use crate::extraction::{self, HypothesisRecord};
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use tracing::{debug, info};

/// Events of an orchestrated run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// A model text delta.
    Text { data: String },
    /// A tool invocation; `data` is the human-readable display line.
    ToolCall {
        data: String,
        tool_interaction: ToolCallRecord,
    },
    /// A tool result; `data` is the raw output.
    ToolOutput {
        data: String,
        tool_interaction: ToolOutputRecord,
    },
    /// The final assistant message.
    Message { data: String },
    HypothesisFound {
        data: HypothesisRecord,
        id: usize,
        progress: String,
        summary: String,
    },
    ExtractionComplete {
        total_hypotheses: usize,
        expected: Option<usize>,
        tool_interactions: Vec<ToolInteraction>,
        message: String,
    },
}

pub type RunEventStream = BoxStream<'static, Result<RunEvent>>;

/// `"<found>/<expected>"`, or just the count when no target was given.
pub fn progress_string(found: usize, expected: Option<usize>) -> String {
    match expected {
        Some(expected) if expected > 0 => format!("{found}/{expected}"),
        _ => found.to_string(),
    }
}

/// One-line description of a tool call for chat and terminal display.
pub fn tool_call_display(tool_name: &str, input_args: &Value) -> String {
    let mut display = format!("Calling tool: {tool_name}");
    let Some(args) = input_args.as_object().filter(|a| !a.is_empty()) else {
        return display;
    };

    if tool_name == "literature_search"
        && let Some(query) = args.get("query")
    {
        display.push_str(&format!(" - Searching for: '{}'", display_value(query, None)));
        return display;
    }

    let params: Vec<String> = args
        .iter()
        .take(2)
        .map(|(key, value)| format!("{key}: {}", display_value(value, Some(50))))
        .collect();
    display.push_str(&format!(" - Parameters: {}", params.join(", ")));
    display
}

/// Strings render bare; long strings keep 47 characters plus `...`.
fn display_value(value: &Value, limit: Option<usize>) -> String {
    match value {
        Value::String(s) => match limit {
            Some(limit) if s.chars().count() > limit => {
                let head: String = s.chars().take(limit - 3).collect();
                format!("{head}...")
            }
            _ => s.clone(),
        },
        other => other.to_string(),
    }
}

/// Closing summary line for a run.
pub fn completion_message(found: usize, expected: Option<usize>, tool_calls: usize) -> String {
    let mut message = format!(
        "Successfully extracted {found} hypothesis{}",
        if found == 1 { "" } else { "es" }
    );
    if let Some(expected) = expected.filter(|e| *e > 0) {
        message.push_str(&format!(" (expected {expected})"));
    }
    message.push_str(&format!(" | Tool calls: {tool_calls}"));
    message
}

/// Run-scoped extraction and correlation state.
///
/// Feed it agent events in order with [`handle`](Self::handle) and call
/// [`finish`](Self::finish) once the upstream is exhausted.
#[derive(Debug)]
pub struct ExtractionTracker {
    expected: Option<usize>,
    summary_chars: usize,
    buffer: String,
    reported: usize,
    correlator: ToolCorrelator,
    finished: bool,
}

impl ExtractionTracker {
    pub fn new(expected: Option<usize>) -> Self {
        Self {
            expected,
            summary_chars: 80,
            buffer: String::new(),
            reported: 0,
            correlator: ToolCorrelator::new(),
            finished: false,
        }
    }

    /// Characters of the claim included in each `hypothesis_found` summary.
    pub fn with_summary_chars(mut self, summary_chars: usize) -> Self {
        self.summary_chars = summary_chars;
        self
    }

    /// Translate one agent event into the events to emit, in order.
    pub fn handle(&mut self, event: AgentEvent) -> Vec<RunEvent> {
        match event {
            AgentEvent::TextDelta { delta } => {
                self.buffer.push_str(&delta);
                let mut events = vec![RunEvent::Text { data: delta }];
                events.extend(self.scan());
                events
            }
            AgentEvent::ToolCall { name, arguments } => {
                let record = ToolCallRecord::now(name, &arguments);
                let display = tool_call_display(&record.tool_name, &record.input_args);
                self.correlator.record_call(record.clone());
                vec![RunEvent::ToolCall {
                    data: display,
                    tool_interaction: record,
                }]
            }
            AgentEvent::ToolOutput { output } => {
                let record = ToolOutputRecord::now(output.clone());
                self.correlator.record_output(record.clone());
                vec![RunEvent::ToolOutput {
                    data: output,
                    tool_interaction: record,
                }]
            }
            AgentEvent::MessageOutput { text } if text.is_empty() => Vec::new(),
            AgentEvent::MessageOutput { text } => vec![RunEvent::Message { data: text }],
        }
    }

    /// Re-scan the buffer and announce records beyond those already reported.
    fn scan(&mut self) -> Vec<RunEvent> {
        let records = extraction::extract(&self.buffer);
        if records.len() <= self.reported {
            return Vec::new();
        }
        let fresh: Vec<RunEvent> = records
            .into_iter()
            .skip(self.reported)
            .map(|record| {
                let id = record.id;
                debug!(id, "Hypothesis extracted");
                RunEvent::HypothesisFound {
                    progress: progress_string(id, self.expected),
                    summary: format!("Hypothesis {id}: {}", record.summary(self.summary_chars)),
                    id,
                    data: record,
                }
            })
            .collect();
        self.reported += fresh.len();
        fresh
    }

    /// The closing `extraction_complete` event, if the run produced any
    /// hypothesis or tool interaction. Returns `None` on later calls.
    pub fn finish(&mut self) -> Option<RunEvent> {
        if self.finished {
            return None;
        }
        self.finished = true;

        let interactions = self.correlator.interactions().to_vec();
        if self.reported == 0 && interactions.is_empty() {
            debug!("Run produced no hypotheses or tool interactions");
            return None;
        }
        let message = completion_message(self.reported, self.expected, interactions.len());
        info!(
            total = self.reported,
            expected = ?self.expected,
            tool_calls = interactions.len(),
            "Extraction complete"
        );
        Some(RunEvent::ExtractionComplete {
            total_hypotheses: self.reported,
            expected: self.expected,
            tool_interactions: interactions,
            message,
        })
    }

    /// Accumulated model text so far.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Hypotheses announced so far.
    pub fn reported(&self) -> usize {
        self.reported
    }
}

struct Pipeline {
    upstream: AgentEventStream,
    tracker: ExtractionTracker,
    queue: VecDeque<Result<RunEvent>>,
    done: bool,
}

/// Wrap an agent run with extraction and correlation.
///
/// The returned stream pulls one upstream event at a time. An upstream error
/// is forwarded as the final item and no `extraction_complete` follows it.
pub fn with_extraction(upstream: AgentEventStream, tracker: ExtractionTracker) -> RunEventStream {
    let pipeline = Pipeline {
        upstream,
        tracker,
        queue: VecDeque::new(),
        done: false,
    };

    stream::unfold(pipeline, |mut p| async move {
        loop {
            if let Some(item) = p.queue.pop_front() {
                return Some((item, p));
            }
            if p.done {
                return None;
            }
            match p.upstream.next().await {
                Some(Ok(event)) => p.queue.extend(p.tracker.handle(event).into_iter().map(Ok)),
                Some(Err(e)) => {
                    p.done = true;
                    p.queue.push_back(Err(e));
                }
                None => {
                    p.done = true;
                    if let Some(event) = p.tracker.finish() {
                        p.queue.push_back(Ok(event));
                    }
                }
            }
        }
    })
    .boxed()
}
