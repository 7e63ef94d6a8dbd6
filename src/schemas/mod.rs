//! Schema types for gatekeeper
//!
//! Everything persisted to disk or read from configuration lives here.

mod config;
mod entity;
mod evidence;
mod state_machine;

pub use config::{
    Config, ConsensusPolicy, EngineAllowList, EngineConfig, EngineKind, LockPolicy, Preset,
    PromptMode, ValidationPolicy, ValidatorConfig, Wave, WorkflowStates,
};
pub use entity::{Entity, EntityType, Relationship, RelationshipKind};
pub use evidence::{
    BundleScope, BundleStatus, BundleSummary, BundleValidator, Confidence, DelegationRequest,
    ImplementationReport, RepoFingerprint, Tracking, ValidatorReport, Verdict,
};
pub use state_machine::{
    ConditionSpec, EntityStateMachine, HandlerKind, StateMachineSpec, StateSpec, TransitionSpec,
};
