//! Gatekeeper - validation orchestration and workflow state machine core
//!
//! This library provides the core functionality for the gatekeeper CLI, including:
//! - Declarative state machines for tasks, QA records and sessions
//! - Per-round evidence storage (implementation and validator reports, bundle summaries)
//! - Validator engines that run CLI review tools or delegate to another agent
//! - Wave-ordered validation with bounded parallelism and global consensus
//! - Cross-process task locks
//! - Layered configuration

pub mod cli;
pub mod config;
pub mod domain;
pub mod engines;
pub mod errors;
pub mod evidence;
pub mod fs;
pub mod git;
pub mod lock;
pub mod prompts;
pub mod repository;
pub mod schemas;
pub mod validation;
pub mod workflow;

// Re-export commonly used types
pub use errors::{GatekeeperError, Result};
pub use schemas::{Config, Entity, EntityType, Verdict};
