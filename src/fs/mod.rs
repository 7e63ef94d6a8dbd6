//! File system utilities for gatekeeper
//!
//! Provides path resolution, atomic JSON writes and front-matter documents.

mod document;
mod json;
mod paths;

pub use document::{parse_document, render_document};
pub use json::{read_json, read_json_opt, write_atomic, write_json};
pub use paths::{
    find_project_root, get_config_path, get_entity_dir, get_entity_path, get_evidence_dir,
    get_lock_dir, get_state_dir, get_validator_prompts_dir, get_worktrees_dir, resolve_cwd,
    validate_id, STATE_DIR,
};
