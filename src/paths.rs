//! File and directory names used under the config directory.
//!
//! No other module hard-codes these strings.

use std::path::{Path, PathBuf};

use crate::llm::resolve::Environment;

pub const APP_DIR_NAME: &str = "syntax-to-sound";

// ── Leaf filenames ───────────────────────────────────────────────

pub const SETTINGS_FILE: &str = "llm_settings.json";
pub const CREDENTIALS_FILE: &str = ".credentials";

// ── Directory names ──────────────────────────────────────────────

pub const AUDIT_DIR: &str = "audit";

pub fn settings_path(config_dir: &Path) -> PathBuf {
    config_dir.join(SETTINGS_FILE)
}

pub fn credentials_path(config_dir: &Path) -> PathBuf {
    config_dir.join(CREDENTIALS_FILE)
}

pub fn audit_dir(config_dir: &Path) -> PathBuf {
    config_dir.join(AUDIT_DIR)
}

/// Audit file for one day, `YYYY-MM-DD.jsonl`.
pub fn audit_file(audit_dir: &Path, date: &str) -> PathBuf {
    audit_dir.join(format!("{date}.jsonl"))
}

/// `$XDG_CONFIG_HOME/syntax-to-sound`, else `$HOME/.config/syntax-to-sound`.
pub fn default_config_dir(env: &dyn Environment) -> Option<PathBuf> {
    let base = env
        .var("XDG_CONFIG_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| {
            env.var("HOME")
                .filter(|v| !v.is_empty())
                .map(|h| Path::new(&h).join(".config"))
        })?;
    Some(base.join(APP_DIR_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn config_dir_prefers_xdg() {
        let mut env = HashMap::new();
        env.insert("HOME".to_string(), "/home/dj".to_string());
        assert_eq!(
            default_config_dir(&env),
            Some(PathBuf::from("/home/dj/.config/syntax-to-sound"))
        );
        env.insert("XDG_CONFIG_HOME".to_string(), "/cfg".to_string());
        assert_eq!(
            default_config_dir(&env),
            Some(PathBuf::from("/cfg/syntax-to-sound"))
        );
        assert_eq!(default_config_dir(&HashMap::new()), None);
    }
}
