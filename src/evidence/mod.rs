//! Evidence rounds: validator reports, bundle summaries and implementation reports

mod preflight;
mod store;

pub use preflight::{preflight, PreflightReport};
pub use store::{EvidenceStore, BUNDLE_SUMMARY, IMPLEMENTATION_REPORT};
