//! Validator roster classification and trigger matching

use regex::Regex;

use crate::schemas::{ValidatorConfig, Wave};

/// Roster split by why each validator runs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Roster {
    pub always: Vec<ValidatorConfig>,
    pub triggered_blocking: Vec<ValidatorConfig>,
    pub triggered_optional: Vec<ValidatorConfig>,
}

impl Roster {
    /// Every selected validator, in roster order within each class
    pub fn all(&self) -> impl Iterator<Item = &ValidatorConfig> {
        self.always
            .iter()
            .chain(&self.triggered_blocking)
            .chain(&self.triggered_optional)
    }

    /// Selected validators of one wave, sorted by id
    pub fn wave(&self, wave: Wave) -> Vec<ValidatorConfig> {
        let mut validators: Vec<ValidatorConfig> =
            self.all().filter(|v| v.wave == wave).cloned().collect();
        validators.sort_by(|a, b| a.id.cmp(&b.id));
        validators
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.all().map(|v| v.id.clone()).collect();
        ids.sort();
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.always.is_empty() && self.triggered_blocking.is_empty() && self.triggered_optional.is_empty()
    }
}

/// Split `validators` into always-run and triggered classes.
///
/// Validators neither `always_run` nor named in `triggered` are left out.
pub fn classify(validators: &[ValidatorConfig], triggered: &[String]) -> Roster {
    let mut roster = Roster::default();
    for v in validators {
        if v.always_run {
            roster.always.push(v.clone());
        } else if triggered.iter().any(|t| t == &v.id) {
            if v.blocking {
                roster.triggered_blocking.push(v.clone());
            } else {
                roster.triggered_optional.push(v.clone());
            }
        }
    }
    roster
}

/// Ids of non-always validators whose trigger globs match any changed file
pub fn triggered_validators(roster: &[ValidatorConfig], changed_files: &[String]) -> Vec<String> {
    let mut ids = Vec::new();
    for v in roster.iter().filter(|v| !v.always_run) {
        let patterns: Vec<Regex> = v
            .triggers
            .iter()
            .filter_map(|glob| match glob_to_regex(glob) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!(validator = %v.id, glob = %glob, "invalid trigger pattern: {}", e);
                    None
                }
            })
            .collect();
        let hit = changed_files
            .iter()
            .map(|f| f.trim_start_matches("./"))
            .any(|f| patterns.iter().any(|re| re.is_match(f)));
        if hit {
            ids.push(v.id.clone());
        }
    }
    ids
}

/// Translate a path glob (`**`, `*`, `?`) into an anchored regex
pub fn glob_to_regex(glob: &str) -> Result<Regex, regex::Error> {
    let mut out = String::from("^");
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                if chars.peek() == Some(&'/') {
                    chars.next();
                    out.push_str("(?:.*/)?");
                } else {
                    out.push_str(".*");
                }
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    Regex::new(&out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator(id: &str, wave: Wave, blocking: bool, always: bool, triggers: &[&str]) -> ValidatorConfig {
        ValidatorConfig {
            id: id.into(),
            engine: "codex".into(),
            wave,
            blocking,
            always_run: always,
            triggers: triggers.iter().map(|s| s.to_string()).collect(),
            timeout_seconds: None,
        }
    }

    fn roster() -> Vec<ValidatorConfig> {
        vec![
            validator("global-codex", Wave::Global, true, true, &[]),
            validator("security", Wave::Critical, true, false, &["**/auth/**", "**/*.sql"]),
            validator("performance", Wave::Comprehensive, false, false, &["**/*.rs"]),
            validator("docs", Wave::Comprehensive, false, false, &["docs/*.md"]),
        ]
    }

    #[test]
    fn test_glob_translation() {
        let re = glob_to_regex("**/auth/**").unwrap();
        assert!(re.is_match("src/auth/login.rs"));
        assert!(re.is_match("auth/x"));
        assert!(!re.is_match("src/oauth.rs"));

        let re = glob_to_regex("docs/*.md").unwrap();
        assert!(re.is_match("docs/a.md"));
        assert!(!re.is_match("docs/nested/a.md"));

        let re = glob_to_regex("**/*secret*").unwrap();
        assert!(re.is_match("config/app_secrets.yaml"));
        assert!(re.is_match("secret.txt"));

        assert!(glob_to_regex("file?.txt").unwrap().is_match("file1.txt"));
        assert!(glob_to_regex("a+b.txt").unwrap().is_match("a+b.txt"));
    }

    #[test]
    fn test_triggered_validators() {
        let files = vec!["./src/auth/session.rs".to_string(), "README.md".to_string()];
        assert_eq!(triggered_validators(&roster(), &files), vec!["security", "performance"]);
        assert!(triggered_validators(&roster(), &[]).is_empty());
    }

    #[test]
    fn test_classify() {
        let triggered = vec!["security".to_string(), "performance".to_string()];
        let r = classify(&roster(), &triggered);
        assert_eq!(r.always.len(), 1);
        assert_eq!(r.triggered_blocking[0].id, "security");
        assert_eq!(r.triggered_optional[0].id, "performance");
        assert_eq!(r.ids(), vec!["global-codex", "performance", "security"]);
        assert_eq!(r.wave(Wave::Critical).len(), 1);
        assert!(classify(&[], &triggered).is_empty());
    }
}
