//! JSONL audit log of applied batches.
//!
//! Each applied batch is one line in `{audit_dir}/YYYY-MM-DD.jsonl` (UTC).
//! Best-effort: write failures are logged and never fail the caller.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

#[derive(Debug, Serialize)]
pub struct AuditEntry<'a> {
    pub ts: DateTime<Utc>,
    pub session_id: &'a str,
    /// `turn`, `undo` or `batch`.
    pub kind: &'a str,
    pub model: Option<&'a str>,
    pub commands: &'a [Value],
    pub code: &'a str,
    pub revert_commands: &'a [Value],
}

/// Append `entry` to the file for its day.
pub fn record(audit_dir: &Path, entry: &AuditEntry<'_>) {
    if let Err(e) = try_record(audit_dir, entry) {
        warn!(dir = %audit_dir.display(), error = %e, "audit write failed");
    }
}

fn try_record(audit_dir: &Path, entry: &AuditEntry<'_>) -> std::io::Result<()> {
    fs::create_dir_all(audit_dir)?;
    let date = entry.ts.format("%Y-%m-%d").to_string();
    let path = crate::paths::audit_file(audit_dir, &date);
    let json = serde_json::to_string(entry)?;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{json}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn appends_one_line_per_batch() {
        let dir = tempfile::tempdir().unwrap();
        let audit_dir = dir.path().join("audit");
        let commands = vec![json!({"op": "clock_clear"})];
        let entry = AuditEntry {
            ts: Utc.with_ymd_and_hms(2025, 2, 24, 23, 59, 59).unwrap(),
            session_id: "s1",
            kind: "turn",
            model: Some("direct-json"),
            commands: &commands,
            code: "Clock.clear()",
            revert_commands: &[],
        };
        record(&audit_dir, &entry);
        record(&audit_dir, &entry);

        let text = fs::read_to_string(audit_dir.join("2025-02-24.jsonl")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["session_id"], "s1");
        assert_eq!(parsed["code"], "Clock.clear()");
    }

    #[test]
    fn unwritable_dir_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain-file");
        fs::write(&file, "x").unwrap();
        let entry = AuditEntry {
            ts: Utc::now(),
            session_id: "s1",
            kind: "undo",
            model: None,
            commands: &[],
            code: "",
            revert_commands: &[],
        };
        record(&file, &entry);
    }
}
