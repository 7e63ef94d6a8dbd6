//! Validator roster, wave execution and consensus

mod consensus;
mod executor;
mod requirements;
mod roster;

pub use consensus::{resolve as resolve_consensus, ConsensusOutcome, ConsensusReport, Opinion};
pub use executor::{ExecutionRequest, ExecutionResult, ValidationExecutor, ValidatorResult};
pub use requirements::{missing_required_evidence, resolve_preset};
pub use roster::{classify, glob_to_regex, triggered_validators, Roster};
