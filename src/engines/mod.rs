//! Validator engines
//!
//! An engine turns a rendered prompt into a verdict: either by running a CLI
//! tool as a subprocess or by handing the review to another agent.

mod cli;
mod delegated;
mod parser;
mod registry;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

pub use cli::{build_argv, CliEngine, TERM_GRACE};
pub use delegated::DelegatedEngine;
pub use parser::{parse_output, parser_names, ParsedOutput};
pub use registry::EngineRegistry;

use crate::errors::Result;
use crate::evidence::EvidenceStore;
use crate::schemas::{Confidence, ValidatorConfig, Verdict};

/// Fixed instructions placed before every validator prompt
pub const VALIDATOR_PRELUDE: &str = "\
You are reviewing a change as an independent validator. Do not modify any files.
Finish your answer with these lines:
VERDICT: APPROVE or VERDICT: REJECT
CONFIDENCE: low, medium or high
RATIONALE: the reasons for your verdict
";

/// Prelude followed by the opaque prompt text
pub fn render_engine_prompt(prompt: &str) -> String {
    format!("{}\n{}", VALIDATOR_PRELUDE, prompt)
}

/// One validator invocation
#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub validator: ValidatorConfig,
    pub task_id: String,
    pub session_id: Option<String>,
    /// Directory the tool runs in
    pub worktree: PathBuf,
    pub round: u32,
    /// Prompt text from the prompt provider, without the prelude
    pub prompt: String,
    pub timeout: Duration,
}

/// Outcome of one engine run
#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    pub verdict: Verdict,
    pub rationale: String,
    pub confidence: Confidence,
    pub raw_output: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    /// Handed off to another agent; the report arrives later
    pub delegated: bool,
    /// Child process id, for CLI engines
    pub process_id: Option<u32>,
}

impl RunResult {
    pub fn pending(rationale: impl Into<String>) -> Self {
        RunResult {
            verdict: Verdict::Pending,
            rationale: rationale.into(),
            confidence: Confidence::Low,
            raw_output: String::new(),
            exit_code: None,
            timed_out: false,
            delegated: false,
            process_id: None,
        }
    }
}

#[async_trait]
pub trait ValidatorEngine: Send + Sync {
    /// Engine id, a key of `Config::engines`
    fn id(&self) -> &str;

    async fn run(&self, request: &EngineRequest, evidence: &EvidenceStore) -> Result<RunResult>;
}
