//! Config schema - validator roster, engines, policies and state machines

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::state_machine::StateMachineSpec;

/// Engine execution strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Spawn a CLI tool as a subprocess
    #[default]
    Cli,
    /// Hand the review to another agent through a request file
    Delegated,
}

/// How the prompt reaches the tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PromptMode {
    /// Pipe the prompt to stdin
    #[default]
    Stdin,
    /// Pass the prompt as a command-line argument
    Argument,
}

/// Declarative description of one engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub kind: EngineKind,

    /// Executable to run (e.g. "codex")
    #[serde(default)]
    pub command: String,

    /// Flags placed before the subcommand
    #[serde(default)]
    pub pre_flags: Vec<String>,

    /// Subcommand (e.g. "exec") or flag-like subcommand (e.g. "-p")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcommand: Option<String>,

    /// The subcommand consumes the prompt as its argument
    #[serde(default)]
    pub subcommand_takes_prompt: bool,

    /// Flags placed after the subcommand
    #[serde(default)]
    pub output_flags: Vec<String>,

    #[serde(default)]
    pub prompt_mode: PromptMode,

    /// Written after the prompt on stdin, for tools that wait for a sentinel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin_terminator: Option<String>,

    /// Name of the response parser
    #[serde(default = "default_response_parser")]
    pub response_parser: String,

    /// Extra environment for the child process
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

fn default_response_parser() -> String {
    "verdict_marker".to_string()
}

impl EngineConfig {
    /// CLI engine running `command` with no flags
    pub fn cli(command: impl Into<String>) -> Self {
        EngineConfig {
            kind: EngineKind::Cli,
            command: command.into(),
            pre_flags: Vec::new(),
            subcommand: None,
            subcommand_takes_prompt: false,
            output_flags: Vec::new(),
            prompt_mode: PromptMode::Stdin,
            stdin_terminator: None,
            response_parser: default_response_parser(),
            env: BTreeMap::new(),
        }
    }

    pub fn delegated() -> Self {
        EngineConfig {
            kind: EngineKind::Delegated,
            ..EngineConfig::cli("")
        }
    }
}

/// Ordered phase of validator execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Wave {
    Global,
    Critical,
    Comprehensive,
}

impl Wave {
    /// All waves in execution order
    pub const ORDER: [Wave; 3] = [Wave::Global, Wave::Critical, Wave::Comprehensive];
}

impl std::fmt::Display for Wave {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Wave::Global => write!(f, "global"),
            Wave::Critical => write!(f, "critical"),
            Wave::Comprehensive => write!(f, "comprehensive"),
        }
    }
}

impl std::str::FromStr for Wave {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "global" => Ok(Wave::Global),
            "critical" => Ok(Wave::Critical),
            "comprehensive" => Ok(Wave::Comprehensive),
            _ => Err(format!("Unknown wave: {}", s)),
        }
    }
}

/// One validator in the roster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorConfig {
    pub id: String,

    /// Engine id, a key of `Config::engines`
    pub engine: String,

    pub wave: Wave,

    /// A non-approving verdict blocks progression
    #[serde(default = "default_true")]
    pub blocking: bool,

    /// Runs regardless of triggers
    #[serde(default)]
    pub always_run: bool,

    /// File glob patterns that trigger this validator
    #[serde(default)]
    pub triggers: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

fn default_true() -> bool {
    true
}

/// Engines allowed to execute
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EngineAllowList {
    #[default]
    All,
    Only(BTreeSet<String>),
}

impl EngineAllowList {
    pub fn permits(&self, engine_id: &str) -> bool {
        match self {
            EngineAllowList::All => true,
            EngineAllowList::Only(ids) => ids.contains(engine_id),
        }
    }
}

impl Serialize for EngineAllowList {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            EngineAllowList::All => serializer.serialize_str("all"),
            EngineAllowList::Only(ids) => ids.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for EngineAllowList {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Keyword(String),
            List(BTreeSet<String>),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Keyword(k) if k == "all" || k == "*" => Ok(EngineAllowList::All),
            Raw::Keyword(k) => Ok(EngineAllowList::Only(BTreeSet::from([k]))),
            Raw::List(ids) => Ok(EngineAllowList::Only(ids)),
        }
    }
}

/// Global-wave agreement rule
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsensusPolicy {
    /// The two validators that must agree
    #[serde(default)]
    pub global_validators: Vec<String>,
}

/// Named validation preset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    /// Evidence files that must exist in the round directory
    #[serde(default)]
    pub required_evidence: Vec<String>,

    /// Restrict the roster to these validators (empty = all)
    #[serde(default)]
    pub validators: Vec<String>,
}

/// Validation policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationPolicy {
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,

    /// Size of the per-wave worker pool
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Default per-validator timeout
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Stop after a wave with blocking failures
    #[serde(default = "default_true")]
    pub fail_fast_waves: bool,

    #[serde(default = "default_preset")]
    pub default_preset: String,

    #[serde(default)]
    pub presets: BTreeMap<String, Preset>,

    #[serde(default)]
    pub consensus: ConsensusPolicy,

    #[serde(default)]
    pub allowed_engines: EngineAllowList,
}

fn default_max_rounds() -> u32 {
    3
}

fn default_max_concurrent() -> usize {
    4
}

fn default_timeout_seconds() -> u64 {
    900
}

fn default_preset() -> String {
    "standard".to_string()
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        ValidationPolicy {
            max_rounds: default_max_rounds(),
            max_concurrent: default_max_concurrent(),
            timeout_seconds: default_timeout_seconds(),
            fail_fast_waves: true,
            default_preset: default_preset(),
            presets: BTreeMap::new(),
            consensus: ConsensusPolicy::default(),
            allowed_engines: EngineAllowList::All,
        }
    }
}

/// Lock policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockPolicy {
    #[serde(default = "default_lock_timeout")]
    pub timeout_seconds: f64,
}

fn default_lock_timeout() -> f64 {
    30.0
}

impl Default for LockPolicy {
    fn default() -> Self {
        LockPolicy {
            timeout_seconds: default_lock_timeout(),
        }
    }
}

/// Workflow state names used by the service layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStates {
    #[serde(default = "default_todo")]
    pub todo: String,
    #[serde(default = "default_wip")]
    pub in_progress: String,
    #[serde(default = "default_done")]
    pub done: String,
}

fn default_todo() -> String {
    "todo".to_string()
}

fn default_wip() -> String {
    "wip".to_string()
}

fn default_done() -> String {
    "done".to_string()
}

impl Default for WorkflowStates {
    fn default() -> Self {
        WorkflowStates {
            todo: default_todo(),
            in_progress: default_wip(),
            done: default_done(),
        }
    }
}

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    #[serde(default)]
    pub state_machine: StateMachineSpec,

    #[serde(default)]
    pub workflow: WorkflowStates,

    #[serde(default)]
    pub engines: BTreeMap<String, EngineConfig>,

    #[serde(default)]
    pub validators: Vec<ValidatorConfig>,

    #[serde(default)]
    pub validation: ValidationPolicy,

    #[serde(default)]
    pub lock: LockPolicy,
}

fn default_schema_version() -> u32 {
    1
}

impl Config {
    pub fn validator(&self, id: &str) -> Option<&ValidatorConfig> {
        self.validators.iter().find(|v| v.id == id)
    }

    pub fn preset(&self, name: &str) -> Option<&Preset> {
        self.validation.presets.get(name)
    }

    /// Cross-reference checks that serde cannot express
    pub fn consistency_errors(&self) -> Vec<String> {
        let mut errors = self.state_machine.structural_errors();
        let mut seen = BTreeSet::new();
        for v in &self.validators {
            if !seen.insert(v.id.as_str()) {
                errors.push(format!("validator '{}' is declared twice", v.id));
            }
            if !self.engines.contains_key(&v.engine) {
                errors.push(format!(
                    "validator '{}' references unknown engine '{}'",
                    v.id, v.engine
                ));
            }
        }
        for id in &self.validation.consensus.global_validators {
            match self.validator(id) {
                Some(v) if v.wave != Wave::Global => errors.push(format!(
                    "consensus validator '{}' is not in the global wave",
                    id
                )),
                None => errors.push(format!("consensus validator '{}' is not declared", id)),
                _ => {}
            }
        }
        if self.validation.max_rounds == 0 {
            errors.push("validation.max_rounds must be at least 1".to_string());
        }
        errors
    }
}
