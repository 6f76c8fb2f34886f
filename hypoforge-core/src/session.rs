//! Session persistence for finished generation runs.
//!
//! A [`SessionRecorder`] observes the orchestrated event stream and collects
//! copies of everything worth keeping; once the run completes it becomes a
//! [`SessionRecord`] that a [`SessionStore`] writes as one JSON document.

use crate::correlator::ToolInteraction;
use crate::error::SessionError;
use crate::extraction::HypothesisRecord;
use crate::orchestrator::RunEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Run-level extraction summary, taken from the `extraction_complete` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub total_extracted: usize,
    pub expected: Option<usize>,
    pub extraction_time: DateTime<Utc>,
    pub message: String,
}

/// Request-level facts about a run that the event stream does not carry.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionMeta {
    pub domain: String,
    pub num_hypotheses: Option<usize>,
    pub research_idea: String,
    pub provider: String,
    pub model_name: String,
}

/// A persisted generation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub saved_at: DateTime<Utc>,
    pub domain: String,
    pub num_hypotheses: Option<usize>,
    pub research_idea: String,
    pub provider: String,
    pub model_name: String,
    pub raw_output: String,
    pub extracted_hypotheses: Vec<HypothesisRecord>,
    pub extraction_stats: Option<ExtractionStats>,
    pub tool_interactions: Vec<ToolInteraction>,
}

/// Collects persistable data from a run's events.
#[derive(Debug, Default)]
pub struct SessionRecorder {
    raw_output: String,
    hypotheses: Vec<HypothesisRecord>,
    stats: Option<ExtractionStats>,
    interactions: Vec<ToolInteraction>,
}

impl SessionRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the recording.
    pub fn observe(&mut self, event: &RunEvent) {
        match event {
            RunEvent::Text { data } => self.raw_output.push_str(data),
            RunEvent::ToolCall { data, .. } => {
                self.raw_output.push_str(&format!("\n>>> {data}\n"));
            }
            RunEvent::ToolOutput { data, .. } => {
                self.raw_output
                    .push_str(&format!(">>> Tool result: {}\n", output_preview(data)));
            }
            RunEvent::Message { .. } => {}
            RunEvent::HypothesisFound { data, .. } => self.hypotheses.push(data.clone()),
            RunEvent::ExtractionComplete {
                total_hypotheses,
                expected,
                tool_interactions,
                message,
            } => {
                self.stats = Some(ExtractionStats {
                    total_extracted: *total_hypotheses,
                    expected: *expected,
                    extraction_time: Utc::now(),
                    message: message.clone(),
                });
                self.interactions = tool_interactions.clone();
            }
        }
    }

    pub fn raw_output(&self) -> &str {
        &self.raw_output
    }

    pub fn hypotheses(&self) -> &[HypothesisRecord] {
        &self.hypotheses
    }

    /// Finish recording and stamp the record with an id.
    pub fn into_record(self, meta: SessionMeta) -> SessionRecord {
        let saved_at = Utc::now();
        SessionRecord {
            session_id: session_id(saved_at, &meta.domain),
            saved_at,
            domain: meta.domain,
            num_hypotheses: meta.num_hypotheses,
            research_idea: meta.research_idea,
            provider: meta.provider,
            model_name: meta.model_name,
            raw_output: self.raw_output,
            extracted_hypotheses: self.hypotheses,
            extraction_stats: self.stats,
            tool_interactions: self.interactions,
        }
    }
}

/// First 100 characters of a tool output, with `...` when cut.
pub fn output_preview(output: &str) -> String {
    let mut chars = output.chars();
    let head: String = chars.by_ref().take(100).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

/// `<YYYYMMDD_HHMMSS>_<domain slug>`.
pub fn session_id(at: DateTime<Utc>, domain: &str) -> String {
    format!("{}_{}", at.format("%Y%m%d_%H%M%S"), slugify(domain))
}

fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    let slug = slug.trim_matches('_');
    if slug.is_empty() {
        "session".to_string()
    } else {
        slug.to_string()
    }
}

fn write_failed(path: &Path, e: impl std::fmt::Display) -> SessionError {
    SessionError::WriteFailed {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

/// Listing entry for a saved session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub saved_at: DateTime<Utc>,
    pub domain: String,
    pub research_idea: String,
    pub hypotheses: usize,
    pub tool_interactions: usize,
}

/// Directory of saved sessions, one JSON file each.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `record` atomically and return its path.
    ///
    /// A record whose id is already taken gets a numeric suffix.
    pub fn save(&self, record: &mut SessionRecord) -> Result<PathBuf, SessionError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| write_failed(&self.dir, e))?;

        let base = record.session_id.clone();
        let mut path = self.path_for(&base);
        let mut n = 2;
        while path.exists() {
            record.session_id = format!("{base}_{n}");
            path = self.path_for(&record.session_id);
            n += 1;
        }

        let json = serde_json::to_string_pretty(record).map_err(|e| write_failed(&path, e))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| write_failed(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| write_failed(&path, e))?;

        info!(
            session = %record.session_id,
            hypotheses = record.extracted_hypotheses.len(),
            tool_interactions = record.tool_interactions.len(),
            "Session saved"
        );
        Ok(path)
    }

    /// Load a session by id.
    pub fn load(&self, session_id: &str) -> Result<SessionRecord, SessionError> {
        let path = self.path_for(session_id);
        let data = std::fs::read_to_string(&path).map_err(|_| SessionError::NotFound {
            id: session_id.to_string(),
        })?;
        serde_json::from_str(&data).map_err(|e| SessionError::Corrupt {
            path,
            message: e.to_string(),
        })
    }

    /// Summaries of every readable session, newest first.
    pub fn list(&self) -> Vec<SessionSummary> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };

        let mut summaries: Vec<SessionSummary> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|e| e == "json"))
            .filter_map(|path| {
                let parsed = std::fs::read_to_string(&path)
                    .ok()
                    .and_then(|data| serde_json::from_str::<SessionRecord>(&data).ok());
                if parsed.is_none() {
                    warn!(path = %path.display(), "Skipping unreadable session file");
                }
                parsed
            })
            .map(|record| SessionSummary {
                hypotheses: record.extracted_hypotheses.len(),
                tool_interactions: record.tool_interactions.len(),
                session_id: record.session_id,
                saved_at: record.saved_at,
                domain: record.domain,
                research_idea: record.research_idea,
            })
            .collect();

        summaries.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
        debug!(count = summaries.len(), "Listed sessions");
        summaries
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.json"))
    }
}
