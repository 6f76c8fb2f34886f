//! Terminal rendering of run events.

use hypoforge_core::extraction::HypothesisRecord;
use hypoforge_core::orchestrator::RunEvent;
use hypoforge_core::session::{SessionSummary, output_preview};

const RULE: &str = "────────────────────────────────────────────────────────────";

/// Text to print for one event, if any.
pub fn render_event(event: &RunEvent) -> Option<String> {
    match event {
        RunEvent::Text { data } => Some(data.clone()),
        RunEvent::ToolCall { data, .. } => Some(format!("\n>>> {data}\n")),
        RunEvent::ToolOutput { data, .. } => {
            Some(format!(">>> Tool result: {}\n", output_preview(data)))
        }
        RunEvent::Message { .. } => None,
        RunEvent::HypothesisFound {
            progress, summary, ..
        } => Some(banner(&format!("HYPOTHESIS {progress} EXTRACTED"), summary)),
        RunEvent::ExtractionComplete { message, .. } => {
            Some(banner("EXTRACTION COMPLETE", message))
        }
    }
}

fn banner(title: &str, body: &str) -> String {
    format!("\n{RULE}\n  {title}\n  {body}\n{RULE}\n")
}

/// Numbered list of extracted claims.
pub fn hypothesis_list(hypotheses: &[HypothesisRecord]) -> String {
    hypotheses
        .iter()
        .map(|h| format!("  {:>2}. {}", h.id, h.claim()))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn session_line(summary: &SessionSummary) -> String {
    format!(
        "{:<40} {:>3} hypotheses  {:>2} tool calls  {}",
        summary.session_id,
        summary.hypotheses,
        summary.tool_interactions,
        truncate(&summary.research_idea, 50)
    )
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{head}...")
}
