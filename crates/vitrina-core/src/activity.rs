//! Per-dispatch activity entries and the audit log they are written to.

use std::{fs::OpenOptions, io::Write, path::PathBuf};

use chrono::Utc;
use serde::Serialize;

use crate::{domain::ChannelName, errors::Error, Result};

const AUDIT_MAX_TEXT: usize = 500;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityLevel {
    Info,
    Warning,
}

/// Human-readable record of one dispatch, attributed to a channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ActivityEntry {
    pub timestamp: String,
    pub channel: ChannelName,
    pub level: ActivityLevel,
    pub text: String,
}

impl ActivityEntry {
    pub fn info(channel: ChannelName, text: impl Into<String>) -> Self {
        Self::new(channel, ActivityLevel::Info, text)
    }

    pub fn warning(channel: ChannelName, text: impl Into<String>) -> Self {
        Self::new(channel, ActivityLevel::Warning, text)
    }

    fn new(channel: ChannelName, level: ActivityLevel, text: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            channel,
            level,
            text: text.into(),
        }
    }

    /// `[Bot principal] text`
    pub fn display_line(&self) -> String {
        format!("[{}] {}", self.channel.label(), self.text)
    }
}

/// Append-only audit file. One line per entry in JSON mode, a banner-delimited
/// block otherwise. Without a path, entries are dropped.
#[derive(Debug)]
pub struct AuditLogger {
    path: Option<PathBuf>,
    json: bool,
}

impl AuditLogger {
    pub fn new(path: Option<PathBuf>, json: bool) -> Self {
        Self { path, json }
    }

    pub fn write(&self, entry: &ActivityEntry) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut entry = entry.clone();
        entry.text = truncate_text(&entry.text, AUDIT_MAX_TEXT);

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;

        if self.json {
            let line = serde_json::to_string(&entry)?;
            writeln!(file, "{line}")?;
            return Ok(());
        }

        let value = serde_json::to_value(&entry)?;
        let Some(obj) = value.as_object() else {
            return Err(Error::External(
                "activity entry is not a JSON object".to_string(),
            ));
        };

        let mut out = String::new();
        out.push('\n');
        out.push_str(&"=".repeat(60));
        for (k, v) in obj {
            out.push('\n');
            out.push_str(k);
            out.push_str(": ");
            match v {
                serde_json::Value::String(s) => out.push_str(s),
                other => out.push_str(&other.to_string()),
            }
        }
        out.push('\n');

        file.write_all(out.as_bytes())?;
        Ok(())
    }
}

pub fn truncate_text(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let mut out = s.chars().take(max_len).collect::<String>();
    out.push_str("...");
    out
}
