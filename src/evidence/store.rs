//! Round-scoped evidence storage
//!
//! ```text
//! .gatekeeper/evidence/<task>/round-<N>/
//!     implementation-report.json
//!     validator-<id>-report.json
//!     bundle-summary.json
//!     delegation-<id>.json
//!     command-test.txt ...
//! ```
//!
//! Rounds are never deleted. Every write goes through `write_atomic`.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::{GatekeeperError, Result};
use crate::fs::{get_evidence_dir, read_json_opt, validate_id, write_json};
use crate::schemas::{BundleSummary, DelegationRequest, ImplementationReport, ValidatorReport};

pub const IMPLEMENTATION_REPORT: &str = "implementation-report.json";
pub const BUNDLE_SUMMARY: &str = "bundle-summary.json";

const ROUND_PREFIX: &str = "round-";

/// Evidence for one task
#[derive(Debug, Clone)]
pub struct EvidenceStore {
    root: PathBuf,
    task_id: String,
}

impl EvidenceStore {
    pub fn new(project_root: &Path, task_id: &str) -> Result<Self> {
        validate_id(task_id)?;
        Ok(EvidenceStore {
            root: get_evidence_dir(project_root, task_id),
            task_id: task_id.to_string(),
        })
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// `.gatekeeper/evidence/<task>`
    pub fn task_dir(&self) -> &Path {
        &self.root
    }

    pub fn round_dir(&self, round: u32) -> PathBuf {
        self.root.join(format!("{}{}", ROUND_PREFIX, round))
    }

    /// Numeric rounds present on disk, ascending. Other entries are ignored.
    pub fn list_rounds(&self) -> Result<Vec<u32>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(GatekeeperError::evidence(&self.root, e)),
        };

        let mut rounds = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| GatekeeperError::evidence(&self.root, e))?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name();
            let parsed = name
                .to_str()
                .and_then(|n| n.strip_prefix(ROUND_PREFIX))
                .and_then(|n| n.parse::<u32>().ok())
                .filter(|n| *n > 0);
            if let Some(n) = parsed {
                rounds.push(n);
            }
        }
        rounds.sort_unstable();
        Ok(rounds)
    }

    pub fn latest_round(&self) -> Result<Option<u32>> {
        Ok(self.list_rounds()?.last().copied())
    }

    /// Make sure a round directory exists. Without an explicit round, the
    /// latest round is used, or round 1 when there is none yet.
    pub fn ensure_round(&self, round: Option<u32>) -> Result<(u32, PathBuf)> {
        let round = match round {
            Some(0) => {
                return Err(GatekeeperError::evidence(&self.root, "rounds are numbered from 1"))
            }
            Some(n) => n,
            None => self.latest_round()?.unwrap_or(1),
        };
        let dir = self.round_dir(round);
        fs::create_dir_all(&dir).map_err(|e| GatekeeperError::evidence(&dir, e))?;
        Ok((round, dir))
    }

    /// Create `round-<latest + 1>`
    pub fn create_next_round(&self) -> Result<(u32, PathBuf)> {
        let next = self.latest_round()?.unwrap_or(0) + 1;
        let dir = self.round_dir(next);
        fs::create_dir_all(&dir).map_err(|e| GatekeeperError::evidence(&dir, e))?;
        tracing::info!(task = %self.task_id, round = next, "created evidence round");
        Ok((next, dir))
    }

    /// An explicit round, or the latest; errors when no round exists
    pub fn resolve_round(&self, round: Option<u32>) -> Result<u32> {
        match round {
            Some(n) => Ok(n),
            None => self.latest_round()?.ok_or_else(|| {
                GatekeeperError::evidence(&self.root, "no evidence rounds recorded")
            }),
        }
    }

    pub fn read_bundle(&self, round: Option<u32>) -> Result<Option<BundleSummary>> {
        match self.resolve_optional(round)? {
            Some(n) => self.read_artifact(&self.round_dir(n).join(BUNDLE_SUMMARY)),
            None => Ok(None),
        }
    }

    pub fn write_bundle(&self, summary: &BundleSummary) -> Result<PathBuf> {
        let path = self.round_dir(summary.round).join(BUNDLE_SUMMARY);
        self.write_artifact(&path, summary)?;
        Ok(path)
    }

    pub fn validator_report_path(&self, round: u32, validator_id: &str) -> PathBuf {
        self.round_dir(round)
            .join(format!("validator-{}-report.json", validator_id))
    }

    pub fn read_validator_report(
        &self,
        validator_id: &str,
        round: Option<u32>,
    ) -> Result<Option<ValidatorReport>> {
        validate_id(validator_id)?;
        match self.resolve_optional(round)? {
            Some(n) => self.read_artifact(&self.validator_report_path(n, validator_id)),
            None => Ok(None),
        }
    }

    pub fn write_validator_report(&self, report: &ValidatorReport) -> Result<PathBuf> {
        validate_id(&report.validator_id)?;
        let path = self.validator_report_path(report.round, &report.validator_id);
        self.write_artifact(&path, report)?;
        Ok(path)
    }

    /// All validator reports of a round, sorted by validator id
    pub fn list_validator_reports(&self, round: Option<u32>) -> Result<Vec<ValidatorReport>> {
        let Some(n) = self.resolve_optional(round)? else {
            return Ok(Vec::new());
        };
        let dir = self.round_dir(n);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(GatekeeperError::evidence(&dir, e)),
        };

        let mut reports = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| GatekeeperError::evidence(&dir, e))?.path();
            let is_report = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("validator-") && n.ends_with("-report.json"))
                .unwrap_or(false);
            if !is_report {
                continue;
            }
            if let Some(report) = self.read_artifact::<ValidatorReport>(&path)? {
                reports.push(report);
            }
        }
        reports.sort_by(|a, b| a.validator_id.cmp(&b.validator_id));
        Ok(reports)
    }

    pub fn read_implementation_report(
        &self,
        round: Option<u32>,
    ) -> Result<Option<ImplementationReport>> {
        match self.resolve_optional(round)? {
            Some(n) => self.read_artifact(&self.round_dir(n).join(IMPLEMENTATION_REPORT)),
            None => Ok(None),
        }
    }

    pub fn write_implementation_report(&self, report: &ImplementationReport) -> Result<PathBuf> {
        let path = self.round_dir(report.round).join(IMPLEMENTATION_REPORT);
        self.write_artifact(&path, report)?;
        Ok(path)
    }

    /// Path of a free-form evidence file such as `command-test.txt`
    pub fn evidence_file(&self, name: &str, round: Option<u32>) -> Result<PathBuf> {
        if name.is_empty() || name.contains('/') || name.contains('\\') || name.starts_with('.') {
            return Err(GatekeeperError::evidence(
                &self.root,
                format!("invalid evidence file name {:?}", name),
            ));
        }
        Ok(self.round_dir(self.resolve_round(round)?).join(name))
    }

    /// Names from `required` with no file in the round directory
    pub fn missing_evidence(&self, required: &[String], round: u32) -> Result<Vec<String>> {
        let mut missing = Vec::new();
        for name in required {
            if !self.evidence_file(name, Some(round))?.is_file() {
                missing.push(name.clone());
            }
        }
        Ok(missing)
    }

    pub fn delegation_request_path(&self, round: u32, validator_id: &str) -> PathBuf {
        self.round_dir(round)
            .join(format!("delegation-{}.json", validator_id))
    }

    pub fn write_delegation_request(&self, request: &DelegationRequest) -> Result<PathBuf> {
        validate_id(&request.validator_id)?;
        let path = self.delegation_request_path(request.round, &request.validator_id);
        self.write_artifact(&path, request)?;
        Ok(path)
    }

    fn resolve_optional(&self, round: Option<u32>) -> Result<Option<u32>> {
        match round {
            Some(n) => Ok(Some(n)),
            None => self.latest_round(),
        }
    }

    fn read_artifact<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        read_json_opt(path).map_err(|e| GatekeeperError::evidence(path, e))
    }

    fn write_artifact<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        write_json(path, value).map_err(|e| GatekeeperError::evidence(path, e))?;
        tracing::debug!(path = %path.display(), "wrote evidence");
        Ok(())
    }
}
