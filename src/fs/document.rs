//! Markdown documents with a YAML front-matter header
//!
//! ```text
//! ---
//! id: T-1
//! state: wip
//! ---
//! free-form body
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::{GatekeeperError, Result};

const DELIMITER: &str = "---";

/// Split a document into its header and body and deserialize the header.
pub fn parse_document<T: DeserializeOwned>(content: &str) -> Result<(T, String)> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let mut lines = content.lines();

    match lines.next() {
        Some(first) if first.trim_end() == DELIMITER => {}
        _ => {
            return Err(GatekeeperError::InvalidDocument(
                "missing front-matter header".to_string(),
            ))
        }
    }

    let mut header = String::new();
    let mut closed = false;
    for line in lines.by_ref() {
        if line.trim_end() == DELIMITER {
            closed = true;
            break;
        }
        header.push_str(line);
        header.push('\n');
    }
    if !closed {
        return Err(GatekeeperError::InvalidDocument(
            "unterminated front-matter header".to_string(),
        ));
    }

    let value: T = serde_yaml::from_str(&header)
        .map_err(|e| GatekeeperError::InvalidDocument(format!("bad header: {}", e)))?;

    let body: Vec<&str> = lines.collect();
    let mut body = body.join("\n");
    if body.starts_with('\n') {
        body.remove(0);
    }
    if content.ends_with('\n') && !body.is_empty() {
        body.push('\n');
    }
    Ok((value, body))
}

/// Render a header and body back into a document.
pub fn render_document<T: Serialize>(header: &T, body: &str) -> Result<String> {
    let yaml = serde_yaml::to_string(header)
        .map_err(|e| GatekeeperError::InvalidDocument(format!("cannot serialize header: {}", e)))?;

    let mut out = String::with_capacity(yaml.len() + body.len() + 16);
    out.push_str(DELIMITER);
    out.push('\n');
    out.push_str(&yaml);
    if !yaml.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(DELIMITER);
    out.push('\n');
    if !body.is_empty() {
        out.push('\n');
        out.push_str(body);
        if !body.ends_with('\n') {
            out.push('\n');
        }
    }
    Ok(out)
}
