//! Parse validator output into verdicts
//!
//! Each engine names a response parser. Parsers pull the review text out of
//! the tool's output format, then look for an explicit `VERDICT:` marker.
//! Without one, phrase heuristics may still decide a verdict; anything else
//! is `Pending`, never approval.

use std::collections::HashMap;

use regex::Regex;
use serde_json::Value;

use crate::schemas::{Confidence, Verdict};

lazy_static::lazy_static! {
    static ref VERDICT_REGEX: Regex = Regex::new(
        r"(?mi)^[\s>*_#`-]*VERDICT[*_`]*\s*:\s*[*_`]*\s*(?P<verdict>APPROVED?|REJECT(?:ED)?|PENDING)\b"
    ).unwrap();

    static ref CONFIDENCE_REGEX: Regex = Regex::new(
        r"(?mi)^[\s>*_#`-]*CONFIDENCE[*_`]*\s*:\s*[*_`]*\s*(?P<confidence>low|medium|high)\b"
    ).unwrap();

    static ref RATIONALE_REGEX: Regex = Regex::new(
        r"(?mis)^[\s>*_#`-]*RATIONALE[*_`]*\s*:\s*(?P<rationale>.+?)(?:^[\s>*_#`-]*(?:VERDICT|CONFIDENCE)[*_`]*\s*:|\z)"
    ).unwrap();

    static ref PARSERS: HashMap<&'static str, ParserFn> = {
        let mut table: HashMap<&'static str, ParserFn> = HashMap::new();
        table.insert("verdict_marker", parse_verdict_marker);
        table.insert("json", parse_json);
        table.insert("codex", parse_codex);
        table.insert("claude", parse_claude);
        table.insert("gemini", parse_gemini);
        table
    };
}

/// Phrases that mean the reviewer refused the change
const REJECT_PHRASES: [&str; 4] = [
    "can't be approved",
    "cannot be approved",
    "not approved",
    "changes requested",
];

/// Approve heuristics that only hold for one tool's phrasing: (engine id, phrase)
const TOOL_APPROVE_PHRASES: [(&str, &str); 1] = [("codex", "no issues found")];

const MAX_RATIONALE_CHARS: usize = 4000;

/// Outcome of parsing one validator's output
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedOutput {
    pub verdict: Verdict,
    pub rationale: String,
    pub confidence: Confidence,
    /// The verdict came from an explicit marker or structured field
    pub explicit: bool,
}

impl ParsedOutput {
    fn pending(rationale: impl Into<String>) -> Self {
        ParsedOutput {
            verdict: Verdict::Pending,
            rationale: rationale.into(),
            confidence: Confidence::Low,
            explicit: false,
        }
    }
}

type ParserFn = fn(&str, &str) -> ParsedOutput;

/// Names of all built-in parsers
pub fn parser_names() -> Vec<&'static str> {
    let mut names: Vec<_> = PARSERS.keys().copied().collect();
    names.sort_unstable();
    names
}

/// Parse `output` with the named parser. `engine_id` gates tool-specific heuristics.
pub fn parse_output(parser: &str, engine_id: &str, output: &str) -> ParsedOutput {
    match PARSERS.get(parser) {
        Some(parse) => parse(output, engine_id),
        None => {
            tracing::warn!(parser, "unknown response parser");
            ParsedOutput::pending(format!("unknown response parser '{}'", parser))
        }
    }
}

fn parse_verdict_marker(output: &str, engine_id: &str) -> ParsedOutput {
    parse_text(output, engine_id)
}

/// Marker, then heuristics, over plain review text
fn parse_text(text: &str, engine_id: &str) -> ParsedOutput {
    let verdict = VERDICT_REGEX
        .captures_iter(text)
        .last()
        .map(|caps| caps["verdict"].to_ascii_lowercase());

    let verdict = match verdict.as_deref() {
        Some(v) if v.starts_with("approve") => Some(Verdict::Approve),
        Some(v) if v.starts_with("reject") => Some(Verdict::Reject),
        Some(_) => Some(Verdict::Pending),
        None => None,
    };

    let rationale = extract_rationale(text);

    if let Some(verdict) = verdict {
        let confidence = CONFIDENCE_REGEX
            .captures_iter(text)
            .last()
            .and_then(|caps| caps["confidence"].parse().ok())
            .unwrap_or(Confidence::Medium);
        return ParsedOutput {
            verdict,
            rationale,
            confidence,
            explicit: true,
        };
    }

    let verdict = heuristic_verdict(text, engine_id);
    ParsedOutput {
        verdict,
        rationale,
        confidence: Confidence::Low,
        explicit: false,
    }
}

fn heuristic_verdict(text: &str, engine_id: &str) -> Verdict {
    let lower = text.to_lowercase();

    if REJECT_PHRASES.iter().any(|p| lower.contains(p)) {
        return Verdict::Reject;
    }

    for (tool, phrase) in TOOL_APPROVE_PHRASES {
        if !lower.contains(phrase) {
            continue;
        }
        if engine_id == tool {
            return Verdict::Approve;
        }
        tracing::warn!(
            engine = engine_id,
            heuristic = phrase,
            "skipping heuristic that only applies to {}",
            tool
        );
    }

    Verdict::Pending
}

fn extract_rationale(text: &str) -> String {
    let rationale = RATIONALE_REGEX
        .captures_iter(text)
        .last()
        .map(|caps| caps["rationale"].trim().to_string())
        .unwrap_or_else(|| text.trim().to_string());
    truncate(&rationale)
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_RATIONALE_CHARS {
        return text.to_string();
    }
    let mut out: String = text.chars().take(MAX_RATIONALE_CHARS).collect();
    out.push_str("...");
    out
}

/// Verdict objects: `{"verdict": "approve", "rationale": "...", "confidence": "high"}`
fn parse_json(output: &str, engine_id: &str) -> ParsedOutput {
    let candidates = std::iter::once(output.trim())
        .chain(output.lines().rev().map(str::trim))
        .filter(|s| s.starts_with('{'));

    for candidate in candidates {
        let Ok(value) = serde_json::from_str::<Value>(candidate) else {
            continue;
        };
        if let Some(parsed) = verdict_from_object(&value) {
            return parsed;
        }
    }

    parse_text(output, engine_id)
}

fn verdict_from_object(value: &Value) -> Option<ParsedOutput> {
    let verdict = match value.get("verdict")?.as_str()?.to_ascii_lowercase().as_str() {
        "approve" | "approved" => Verdict::Approve,
        "reject" | "rejected" => Verdict::Reject,
        _ => Verdict::Pending,
    };
    let rationale = value
        .get("rationale")
        .or_else(|| value.get("summary"))
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    let confidence = value
        .get("confidence")
        .and_then(|v| v.as_str())
        .and_then(|c| c.parse().ok())
        .unwrap_or(Confidence::Medium);
    Some(ParsedOutput {
        verdict,
        rationale: truncate(rationale.trim()),
        confidence,
        explicit: true,
    })
}

/// JSONL event stream lines, parsed leniently
fn json_lines(output: &str) -> impl Iterator<Item = Value> + '_ {
    output
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with('{'))
        .filter_map(|l| serde_json::from_str::<Value>(l).ok())
}

/// `codex exec --json`: the last agent message carries the review
fn parse_codex(output: &str, engine_id: &str) -> ParsedOutput {
    let messages: Vec<String> = json_lines(output)
        .filter_map(|event| {
            let item = event.get("item").or_else(|| event.get("msg"))?;
            let kind = item.get("type")?.as_str()?;
            if kind != "agent_message" {
                return None;
            }
            item.get("text")
                .or_else(|| item.get("message"))
                .and_then(|t| t.as_str())
                .map(str::to_string)
        })
        .collect();

    match messages.last() {
        Some(text) => parse_text(text, engine_id),
        None => parse_text(output, engine_id),
    }
}

/// `claude -p --output-format stream-json`: prefer the final result event
fn parse_claude(output: &str, engine_id: &str) -> ParsedOutput {
    let mut result_text = None;
    let mut assistant_text = Vec::new();

    for event in json_lines(output) {
        match event.get("type").and_then(|t| t.as_str()) {
            Some("result") => {
                if let Some(text) = event.get("result").and_then(|r| r.as_str()) {
                    result_text = Some(text.to_string());
                }
            }
            Some("assistant") => {
                let blocks = event
                    .pointer("/message/content")
                    .and_then(|c| c.as_array())
                    .cloned()
                    .unwrap_or_default();
                for block in blocks {
                    if block.get("type").and_then(|t| t.as_str()) == Some("text") {
                        if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                            assistant_text.push(text.to_string());
                        }
                    }
                }
            }
            _ => {}
        }
    }

    match result_text {
        Some(text) => parse_text(&text, engine_id),
        None if !assistant_text.is_empty() => parse_text(&assistant_text.join("\n"), engine_id),
        None => parse_text(output, engine_id),
    }
}

/// `gemini`: plain text, a `{"response": ...}` object, or stream-json messages
fn parse_gemini(output: &str, engine_id: &str) -> ParsedOutput {
    if let Ok(value) = serde_json::from_str::<Value>(output.trim()) {
        if let Some(text) = value.get("response").and_then(|r| r.as_str()) {
            return parse_text(text, engine_id);
        }
    }

    let streamed: Vec<String> = json_lines(output)
        .filter(|e| e.get("role").and_then(|r| r.as_str()) == Some("assistant"))
        .filter_map(|e| e.get("content").and_then(|c| c.as_str()).map(str::to_string))
        .collect();
    if !streamed.is_empty() {
        return parse_text(&streamed.concat(), engine_id);
    }

    parse_text(output, engine_id)
}
