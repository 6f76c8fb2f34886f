//! Incremental JSON-block extraction.
//!
//! The model writes hypotheses inline as fenced ```` ```json ```` blocks. The
//! extractor re-scans the whole accumulated buffer on every call and returns
//! every accepted record in source order; callers diff against the count
//! they have already reported to find new ones.
//!
//! Only closed fences are considered, so a block still being streamed never
//! produces a partial record. Because ids are positional over accepted
//! records, appending text never changes the id of a record already seen.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::ops::Range;
use std::sync::LazyLock;
use tracing::debug;

/// Fields a candidate object must carry to count as a hypothesis.
pub const REQUIRED_FIELDS: [&str; 6] = [
    "claim",
    "dataset",
    "metric",
    "baseline",
    "success_threshold",
    "budget",
];

static JSON_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    // Non-greedy: the first closing fence after an opener ends the block.
    Regex::new(r"(?s)```json\s*(.*?)\s*```").expect("fence pattern is a valid regex")
});

/// One accepted hypothesis.
///
/// `fields` holds the object exactly as the model wrote it; `id` is the
/// 1-based extraction index within the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HypothesisRecord {
    #[serde(rename = "_id")]
    pub id: usize,
    #[serde(rename = "_extracted", default = "extracted_flag")]
    pub extracted: bool,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

fn extracted_flag() -> bool {
    true
}

impl HypothesisRecord {
    fn accept(id: usize, mut fields: Map<String, Value>) -> Self {
        fields.remove("_id");
        fields.remove("_extracted");
        Self {
            id,
            extracted: true,
            fields,
        }
    }

    /// Look up a field of the hypothesis object.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// The claim as text. Non-string claims are rendered as compact JSON.
    pub fn claim(&self) -> String {
        match self.fields.get("claim") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }

    /// The first `max_chars` characters of the claim, with `...` appended
    /// when anything was cut.
    pub fn summary(&self, max_chars: usize) -> String {
        let claim = self.claim();
        let mut chars = claim.chars();
        let head: String = chars.by_ref().take(max_chars).collect();
        if chars.next().is_some() {
            format!("{head}...")
        } else {
            head
        }
    }

    /// The record as a JSON object including the `_id`/`_extracted` tags.
    pub fn to_value(&self) -> Value {
        let mut object = self.fields.clone();
        object.insert("_extracted".to_string(), Value::Bool(self.extracted));
        object.insert("_id".to_string(), Value::from(self.id));
        Value::Object(object)
    }
}

/// Why a candidate inside a parsed block was not accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// An array element that is not a JSON object.
    NotAnObject,
    /// An object lacking one or more required fields.
    MissingFields { fields: Vec<&'static str> },
}

/// Disposition of one candidate object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateOutcome {
    Accepted { id: usize },
    Skipped(SkipReason),
}

/// Disposition of one closed fenced block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockOutcome {
    /// The inner text is not valid JSON.
    InvalidJson { reason: String },
    /// Valid JSON that is neither an object nor an array.
    NotAnObject,
    /// An object or array; one outcome per candidate in source order.
    Candidates(Vec<CandidateOutcome>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockReport {
    /// Byte range of the whole fenced block in the buffer.
    pub span: Range<usize>,
    pub outcome: BlockOutcome,
}

/// Full result of one extraction pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractionReport {
    pub records: Vec<HypothesisRecord>,
    pub blocks: Vec<BlockReport>,
}

impl ExtractionReport {
    /// Every candidate-level skip, in source order.
    pub fn skip_reasons(&self) -> impl Iterator<Item = &SkipReason> {
        self.blocks.iter().flat_map(|b| match &b.outcome {
            BlockOutcome::Candidates(candidates) => candidates
                .iter()
                .filter_map(|c| match c {
                    CandidateOutcome::Skipped(reason) => Some(reason),
                    CandidateOutcome::Accepted { .. } => None,
                })
                .collect::<Vec<_>>(),
            _ => Vec::new(),
        })
    }

    /// Number of closed blocks whose JSON failed to parse.
    pub fn invalid_blocks(&self) -> usize {
        self.blocks
            .iter()
            .filter(|b| matches!(b.outcome, BlockOutcome::InvalidJson { .. }))
            .count()
    }
}

/// Accepted hypotheses in `buffer`, in source order.
pub fn extract(buffer: &str) -> Vec<HypothesisRecord> {
    extract_with_report(buffer).records
}

/// Scan `buffer` and report the disposition of every closed JSON block.
pub fn extract_with_report(buffer: &str) -> ExtractionReport {
    let mut report = ExtractionReport::default();

    for caps in JSON_FENCE.captures_iter(buffer) {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };

        let outcome = match serde_json::from_str::<Value>(inner.as_str()) {
            Err(e) => {
                debug!(offset = whole.start(), error = %e, "Skipping fenced block with invalid JSON");
                BlockOutcome::InvalidJson {
                    reason: e.to_string(),
                }
            }
            Ok(Value::Object(object)) => {
                BlockOutcome::Candidates(vec![consider(Value::Object(object), &mut report.records)])
            }
            Ok(Value::Array(items)) => BlockOutcome::Candidates(
                items
                    .into_iter()
                    .map(|item| consider(item, &mut report.records))
                    .collect(),
            ),
            Ok(_) => {
                debug!(offset = whole.start(), "Skipping fenced block that is not an object");
                BlockOutcome::NotAnObject
            }
        };

        report.blocks.push(BlockReport {
            span: whole.range(),
            outcome,
        });
    }

    report
}

fn consider(candidate: Value, records: &mut Vec<HypothesisRecord>) -> CandidateOutcome {
    let Value::Object(object) = candidate else {
        return CandidateOutcome::Skipped(SkipReason::NotAnObject);
    };

    let missing: Vec<&'static str> = REQUIRED_FIELDS
        .iter()
        .copied()
        .filter(|field| !object.contains_key(*field))
        .collect();

    if !missing.is_empty() {
        debug!(missing = ?missing, "Skipping hypothesis candidate with missing fields");
        return CandidateOutcome::Skipped(SkipReason::MissingFields { fields: missing });
    }

    let id = records.len() + 1;
    records.push(HypothesisRecord::accept(id, object));
    CandidateOutcome::Accepted { id }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const COMPLETE: &str = r#"{"claim":"X","dataset":"D","metric":"M","baseline":"B","success_threshold":"T","budget":{}}"#;

    fn fenced(body: &str) -> String {
        format!("```json\n{body}\n```")
    }

    #[test]
    fn test_single_block() {
        let records = extract(&fenced(COMPLETE));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, 1);
        assert!(records[0].extracted);
        assert_eq!(records[0].claim(), "X");
    }

    #[test]
    fn test_array_block_in_order() {
        let body = r#"[
            {"claim":"first","dataset":"D","metric":"M","baseline":"B","success_threshold":0.8,"budget":{"hours":2}},
            {"claim":"second","dataset":"D","metric":"M","baseline":"B","success_threshold":"5%","budget":{}}
        ]"#;
        let records = extract(&fenced(body));
        assert_eq!(records.len(), 2);
        assert_eq!((records[0].id, records[0].claim().as_str()), (1, "first"));
        assert_eq!((records[1].id, records[1].claim().as_str()), (2, "second"));
    }

    #[test]
    fn test_unclosed_block_yields_nothing() {
        let buffer = format!("Intro text\n```json\n{COMPLETE}\n");
        assert!(extract(&buffer).is_empty());
        assert!(extract("```json\n{\"claim\": \"hal").is_empty());
    }

    #[test]
    fn test_invalid_json_is_skipped_with_reason() {
        let buffer = format!("{}\n{}", fenced("{not json"), fenced(COMPLETE));
        let report = extract_with_report(&buffer);
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].id, 1);
        assert_eq!(report.invalid_blocks(), 1);
    }

    #[test]
    fn test_missing_fields_reported() {
        let body = r#"{"claim":"X","dataset":"D","metric":"M"}"#;
        let report = extract_with_report(&fenced(body));
        assert!(report.records.is_empty());
        let reasons: Vec<_> = report.skip_reasons().cloned().collect();
        assert_eq!(
            reasons,
            vec![SkipReason::MissingFields {
                fields: vec!["baseline", "success_threshold", "budget"]
            }]
        );
    }

    #[test]
    fn test_scalar_and_mixed_arrays() {
        let buffer = format!("{}{}", fenced("42"), fenced(&format!("[1, {COMPLETE}]")));
        let report = extract_with_report(&buffer);
        assert_eq!(report.blocks[0].outcome, BlockOutcome::NotAnObject);
        assert_eq!(
            report.blocks[1].outcome,
            BlockOutcome::Candidates(vec![
                CandidateOutcome::Skipped(SkipReason::NotAnObject),
                CandidateOutcome::Accepted { id: 1 },
            ])
        );
    }

    #[test]
    fn test_duplicates_are_not_merged() {
        let buffer = format!("{}\nsome prose\n{}", fenced(COMPLETE), fenced(COMPLETE));
        let records = extract(&buffer);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].id, 2);
    }

    #[test]
    fn test_other_fences_are_ignored() {
        let buffer = format!("```python\nprint(1)\n```\n{}", fenced(COMPLETE));
        assert_eq!(extract(&buffer).len(), 1);
    }

    #[test]
    fn test_inline_fence_without_newlines() {
        let buffer = format!("```json{COMPLETE}```");
        assert_eq!(extract(&buffer).len(), 1);
    }

    #[test]
    fn test_reserved_tags_are_overwritten() {
        let body = r#"{"_id":99,"_extracted":false,"claim":"X","dataset":"D","metric":"M","baseline":"B","success_threshold":"T","budget":{}}"#;
        let record = &extract(&fenced(body))[0];
        assert_eq!(record.id, 1);
        assert!(!record.fields.contains_key("_id"));
        let value = record.to_value();
        assert_eq!(value["_id"], 1);
        assert_eq!(value["_extracted"], true);
    }

    #[test]
    fn test_serde_shape_is_flat() {
        let record = &extract(&fenced(COMPLETE))[0];
        let json = serde_json::to_value(record).unwrap();
        assert_eq!(json["_id"], 1);
        assert_eq!(json["claim"], "X");
        let back: HypothesisRecord = serde_json::from_value(json).unwrap();
        assert_eq!(&back, record);
    }

    #[test]
    fn test_fields_keep_model_order() {
        let body = r#"{"claim":"X","dataset":"D","metric":"M","baseline":"B","success_threshold":"T","budget":{"gpu_hours":4,"api_usd":10}}"#;
        let record = &extract(&fenced(body))[0];
        let keys: Vec<&str> = record.fields.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec!["claim", "dataset", "metric", "baseline", "success_threshold", "budget"]
        );

        let json = serde_json::to_string(record).unwrap();
        assert!(json.starts_with(r#"{"_id":1,"_extracted":true,"claim":"X","dataset":"D""#));
        assert!(json.contains(r#""budget":{"gpu_hours":4,"api_usd":10}"#));
    }

    #[test]
    fn test_summary_truncation() {
        let long = "a".repeat(100);
        let body = format!(
            r#"{{"claim":"{long}","dataset":"D","metric":"M","baseline":"B","success_threshold":"T","budget":{{}}}}"#
        );
        let record = &extract(&fenced(&body))[0];
        let summary = record.summary(80);
        assert_eq!(summary.len(), 83);
        assert!(summary.ends_with("..."));

        let short = &extract(&fenced(COMPLETE))[0];
        assert_eq!(short.summary(80), "X");
    }

    #[test]
    fn test_summary_counts_chars_not_bytes() {
        let body = r#"{"claim":"éééé","dataset":"D","metric":"M","baseline":"B","success_threshold":"T","budget":{}}"#;
        let record = &extract(&fenced(body))[0];
        assert_eq!(record.summary(2), "éé...");
    }

    #[test]
    fn test_rescan_is_idempotent() {
        let buffer = format!("{}{}", fenced(COMPLETE), fenced(COMPLETE));
        assert_eq!(extract(&buffer), extract(&buffer));
    }
}
