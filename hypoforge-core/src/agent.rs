//! Agent runner: the upstream event source for a generation run.
//!
//! An [`AgentDefinition`] is built once and shared read-only across runs.
//! Each call to [`AgentDefinition::run_streamed`] spawns a producer task
//! that drives the think → act loop against the LLM provider and yields
//! [`AgentEvent`]s through a bounded channel. Dropping the returned stream
//! stops the producer at its next send.

use crate::brain::LlmProvider;
use crate::error::{AgentError, HypoforgeError, LlmError, Result, ToolError};
use crate::types::{
    CompletionRequest, Content, Message, Role, StreamEvent, TokenUsage, ToolDefinition,
    ToolOutput,
};
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

/// Raw events produced by an agent run, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A fragment of model text.
    TextDelta { delta: String },
    /// The model invoked a tool. `arguments` is the raw JSON string.
    ToolCall { name: String, arguments: String },
    /// A tool finished; `output` is what the model will see.
    ToolOutput { output: String },
    /// The final assistant message of the run.
    MessageOutput { text: String },
}

/// The lazy, fallible event sequence of one agent run.
pub type AgentEventStream = BoxStream<'static, Result<AgentEvent>>;

/// A tool executor function type. The agent holds tool executors and their definitions.
pub type ToolExecutor = Box<
    dyn Fn(Value) -> Pin<Box<dyn Future<Output = std::result::Result<ToolOutput, ToolError>> + Send>>
        + Send
        + Sync,
>;

/// A registered tool with its definition and executor.
pub struct RegisteredTool {
    pub definition: ToolDefinition,
    pub executor: ToolExecutor,
}

impl std::fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("name", &self.definition.name)
            .finish_non_exhaustive()
    }
}

/// Per-request parameters substituted into the instruction template.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationContext {
    pub domain: String,
    pub hypothesis_count: Option<usize>,
}

impl GenerationContext {
    pub fn new(domain: impl Into<String>, hypothesis_count: Option<usize>) -> Self {
        Self {
            domain: domain.into(),
            hypothesis_count,
        }
    }

    /// Fill `{domain}` and `{num_hypotheses}` in a template.
    pub fn render(&self, template: &str) -> String {
        let count = self
            .hypothesis_count
            .map(|n| n.to_string())
            .unwrap_or_else(|| "several".to_string());
        template
            .replace("{domain}", &self.domain)
            .replace("{num_hypotheses}", &count)
    }
}

/// An immutable agent configuration shared by every run.
pub struct AgentDefinition {
    name: String,
    instructions: String,
    provider: Arc<dyn LlmProvider>,
    tools: Vec<RegisteredTool>,
    max_turns: usize,
    temperature: f32,
}

impl AgentDefinition {
    pub fn new(
        name: impl Into<String>,
        instructions: impl Into<String>,
        provider: Arc<dyn LlmProvider>,
    ) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            provider,
            tools: Vec::new(),
            max_turns: 30,
            temperature: 0.7,
        }
    }

    pub fn with_tools(mut self, tools: Vec<RegisteredTool>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools
            .iter()
            .map(|t| t.definition.name.as_str())
            .collect()
    }

    /// Start a run and return its event stream.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn run_streamed(
        self: &Arc<Self>,
        prompt: impl Into<String>,
        ctx: &GenerationContext,
    ) -> AgentEventStream {
        let (tx, rx) = mpsc::channel(64);
        let agent = Arc::clone(self);
        let prompt = prompt.into();
        let ctx = ctx.clone();

        tokio::spawn(async move {
            match agent.drive(prompt, &ctx, &tx).await {
                Ok(()) => {}
                Err(HypoforgeError::Agent(AgentError::Abandoned)) => {
                    debug!(agent = %agent.name, "Run abandoned by consumer");
                }
                Err(e) => {
                    warn!(agent = %agent.name, error = %e, "Agent run failed");
                    let _ = tx.send(Err(e)).await;
                }
            }
        });

        ReceiverStream::new(rx).boxed()
    }

    /// Run to completion and return the final message text.
    pub async fn run(self: &Arc<Self>, prompt: impl Into<String>, ctx: &GenerationContext) -> Result<String> {
        let mut stream = self.run_streamed(prompt, ctx);
        let mut final_text = String::new();
        while let Some(event) = stream.next().await {
            if let AgentEvent::MessageOutput { text } = event? {
                final_text = text;
            }
        }
        Ok(final_text)
    }

    async fn drive(
        &self,
        prompt: String,
        ctx: &GenerationContext,
        tx: &mpsc::Sender<Result<AgentEvent>>,
    ) -> Result<()> {
        info!(
            agent = %self.name,
            domain = %ctx.domain,
            count = ?ctx.hypothesis_count,
            "Starting agent run"
        );

        let mut conversation = vec![
            Message::system(ctx.render(&self.instructions)),
            Message::user(prompt),
        ];
        let definitions: Vec<ToolDefinition> =
            self.tools.iter().map(|t| t.definition.clone()).collect();
        let mut usage = TokenUsage::default();

        for turn in 0..self.max_turns {
            let (text, calls, turn_usage) =
                self.stream_turn(&conversation, &definitions, tx).await?;
            usage.accumulate(&turn_usage);

            if calls.is_empty() {
                info!(
                    agent = %self.name,
                    turns = turn + 1,
                    total_tokens = usage.total(),
                    "Final answer produced"
                );
                emit(tx, AgentEvent::MessageOutput { text }).await?;
                return Ok(());
            }

            let mut parts = Vec::with_capacity(calls.len() + 1);
            if !text.is_empty() {
                parts.push(Content::text(text));
            }
            for call in &calls {
                parts.push(Content::tool_call(
                    &call.id,
                    &call.name,
                    call.parsed_arguments(),
                ));
            }
            conversation.push(Message::new(Role::Assistant, Content::MultiPart { parts }));

            for call in calls {
                emit(
                    tx,
                    AgentEvent::ToolCall {
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    },
                )
                .await?;
                let (output, is_error) = self.execute_tool(&call).await;
                emit(
                    tx,
                    AgentEvent::ToolOutput {
                        output: output.clone(),
                    },
                )
                .await?;
                conversation.push(Message::tool_result(call.id, output, is_error));
            }
        }

        Err(AgentError::MaxTurnsReached {
            max: self.max_turns,
        }
        .into())
    }

    /// Stream one completion, forwarding text as it arrives.
    async fn stream_turn(
        &self,
        conversation: &[Message],
        tools: &[ToolDefinition],
        tx: &mpsc::Sender<Result<AgentEvent>>,
    ) -> Result<(String, Vec<PendingCall>, TokenUsage)> {
        let (stx, mut srx) = mpsc::channel(64);
        let request = CompletionRequest {
            messages: conversation.to_vec(),
            tools: (!tools.is_empty()).then(|| tools.to_vec()),
            temperature: self.temperature,
            ..Default::default()
        };

        // Producer and consumer must run concurrently or the bounded channel stalls.
        let provider = Arc::clone(&self.provider);
        let producer = tokio::spawn(async move { provider.complete_streaming(request, stx).await });

        let mut text = String::new();
        let mut calls: Vec<PendingCall> = Vec::new();
        let mut usage = TokenUsage::default();

        while let Some(event) = srx.recv().await {
            match event {
                StreamEvent::Token(token) => {
                    text.push_str(&token);
                    emit(tx, AgentEvent::TextDelta { delta: token }).await?;
                }
                StreamEvent::ToolCallStart { id, name } => calls.push(PendingCall {
                    id,
                    name,
                    arguments: String::new(),
                }),
                StreamEvent::ToolCallDelta {
                    id,
                    arguments_delta,
                } => {
                    if let Some(call) = calls.iter_mut().find(|c| c.id == id) {
                        call.arguments.push_str(&arguments_delta);
                    }
                }
                StreamEvent::ToolCallEnd { .. } => {}
                StreamEvent::Done { usage: turn_usage } => {
                    debug!(
                        input_tokens = turn_usage.input_tokens,
                        output_tokens = turn_usage.output_tokens,
                        "Turn complete"
                    );
                    usage = turn_usage;
                    break;
                }
                StreamEvent::Error(message) => {
                    producer.abort();
                    return Err(LlmError::Streaming { message }.into());
                }
            }
        }

        producer.await.map_err(|e| AgentError::TaskFailed {
            message: format!("Streaming task failed: {e}"),
        })??;

        Ok((text, calls, usage))
    }

    /// Run a tool, turning failures into an error result for the model.
    async fn execute_tool(&self, call: &PendingCall) -> (String, bool) {
        let Some(tool) = self.tools.iter().find(|t| t.definition.name == call.name) else {
            warn!(tool = %call.name, "Model requested an unknown tool");
            return (
                ToolError::NotFound {
                    name: call.name.clone(),
                }
                .to_string(),
                true,
            );
        };

        let args = match serde_json::from_str::<Value>(&call.arguments) {
            Ok(args) => args,
            Err(_) if call.arguments.trim().is_empty() => Value::Object(Default::default()),
            Err(e) => {
                let err = ToolError::InvalidArguments {
                    name: call.name.clone(),
                    reason: e.to_string(),
                };
                warn!(error = %err, "Rejecting tool call");
                return (err.to_string(), true);
            }
        };

        match (tool.executor)(args).await {
            Ok(output) => (output.content, false),
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool execution failed");
                (format!("Error: {e}"), true)
            }
        }
    }
}

/// A tool call assembled from stream deltas.
#[derive(Debug)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

impl PendingCall {
    fn parsed_arguments(&self) -> Value {
        serde_json::from_str(&self.arguments).unwrap_or_else(|_| Value::Object(Default::default()))
    }
}

async fn emit(tx: &mpsc::Sender<Result<AgentEvent>>, event: AgentEvent) -> Result<()> {
    tx.send(Ok(event))
        .await
        .map_err(|_| AgentError::Abandoned.into())
}
