use std::io::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::llm::resolve::Environment;

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4.1-mini";
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_CODEX_COMMAND: &str = "codex exec";
pub const DEFAULT_CODEX_TIMEOUT_SECS: u64 = 45;

// ── Backend selection ────────────────────────────────────────────

/// Which generation backends to try.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendMode {
    /// CLI backend if it can be found, then the hosted API if a key is set.
    #[default]
    Auto,
    CodexCli,
    OpenaiApi,
}

impl BackendMode {
    /// Unknown values mean `auto`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "codex-cli" => BackendMode::CodexCli,
            "openai-api" => BackendMode::OpenaiApi,
            _ => BackendMode::Auto,
        }
    }
}

/// Wire protocol of the hosted API backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiProvider {
    #[default]
    OpenAi,
    Anthropic,
}

impl ApiProvider {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Some(ApiProvider::OpenAi),
            "anthropic" => Some(ApiProvider::Anthropic),
            _ => None,
        }
    }
}

// ── Settings ─────────────────────────────────────────────────────

/// Effective generation configuration.
///
/// The `api_key` field is never written to the settings file. It lives in a
/// separate credentials file, see [`load_api_key`]/[`save_api_key`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationSettings {
    pub backend: BackendMode,
    pub provider: ApiProvider,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Model override. None = provider default.
    pub model: Option<String>,
    /// Base URL for OpenAI-compatible providers (ignored for Anthropic).
    pub base_url: Option<String>,
    pub codex_command: String,
    pub codex_model: Option<String>,
    pub codex_timeout_secs: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            backend: BackendMode::Auto,
            provider: ApiProvider::OpenAi,
            api_key: None,
            model: None,
            base_url: None,
            codex_command: DEFAULT_CODEX_COMMAND.to_string(),
            codex_model: None,
            codex_timeout_secs: DEFAULT_CODEX_TIMEOUT_SECS,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl GenerationSettings {
    /// Settings from environment variables alone.
    pub fn from_env(env: &dyn Environment) -> Self {
        let mut settings = Self::default();
        if let Some(mode) = env.var("AI_DJ_LLM_BACKEND") {
            settings.backend = BackendMode::parse(&mode);
        }
        if let Some(provider) = env.var("AI_DJ_LLM_PROVIDER").as_deref().and_then(ApiProvider::parse) {
            settings.provider = provider;
        }
        settings.api_key = non_empty(env.var("OPENAI_API_KEY"));
        settings.model = non_empty(env.var("OPENAI_MODEL"));
        settings.base_url = non_empty(env.var("OPENAI_BASE_URL"));
        if let Some(command) = env.var("CODEX_CLI_COMMAND") {
            settings.codex_command = command;
        }
        settings.codex_model = non_empty(env.var("CODEX_MODEL"));
        if let Some(secs) = env
            .var("CODEX_TIMEOUT_SECS")
            .and_then(|s| s.trim().parse::<u64>().ok())
            .filter(|s| *s > 0)
        {
            settings.codex_timeout_secs = secs;
        }
        settings
    }

    /// Apply the overrides stored in the settings file.
    pub fn apply(&mut self, file: &SettingsFile) {
        if let Some(backend) = file.backend {
            self.backend = backend;
        }
        if let Some(provider) = file.provider {
            self.provider = provider;
        }
        if file.model.is_some() {
            self.model.clone_from(&file.model);
        }
        if file.base_url.is_some() {
            self.base_url.clone_from(&file.base_url);
        }
        if let Some(command) = &file.codex_command {
            self.codex_command.clone_from(command);
        }
        if file.codex_model.is_some() {
            self.codex_model.clone_from(&file.codex_model);
        }
        if let Some(secs) = file.codex_timeout_secs.filter(|s| *s > 0) {
            self.codex_timeout_secs = secs;
        }
    }

    /// Model for the hosted API.
    pub fn api_model(&self) -> String {
        self.model.clone().unwrap_or_else(|| match self.provider {
            ApiProvider::OpenAi => DEFAULT_OPENAI_MODEL.to_string(),
            ApiProvider::Anthropic => DEFAULT_ANTHROPIC_MODEL.to_string(),
        })
    }

    /// Model passed to the CLI backend.
    pub fn codex_model(&self) -> String {
        self.codex_model
            .clone()
            .or_else(|| self.model.clone())
            .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string())
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.as_ref().is_some_and(|k| !k.is_empty())
    }
}

/// Redacted view of the settings for display (no raw API key).
#[derive(Debug, Clone, Serialize)]
pub struct SettingsInfo {
    pub backend: BackendMode,
    pub provider: ApiProvider,
    pub has_api_key: bool,
    pub model: String,
    pub base_url: Option<String>,
    pub codex_command: String,
    pub codex_model: String,
    pub codex_timeout_secs: u64,
}

impl SettingsInfo {
    pub fn from_settings(settings: &GenerationSettings) -> Self {
        Self {
            backend: settings.backend,
            provider: settings.provider,
            has_api_key: settings.has_api_key(),
            model: settings.api_model(),
            base_url: settings.base_url.clone(),
            codex_command: settings.codex_command.clone(),
            codex_model: settings.codex_model(),
            codex_timeout_secs: settings.codex_timeout_secs,
        }
    }
}

// ── Settings file ────────────────────────────────────────────────

/// Overrides persisted in `llm_settings.json`. Absent fields keep the
/// environment's value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ApiProvider>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codex_command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codex_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codex_timeout_secs: Option<u64>,
}

impl SettingsFile {
    /// Set one field by name. An empty value clears the override.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), AppError> {
        let text = non_empty(Some(value.to_string()));
        match key {
            "backend" => self.backend = text.as_deref().map(BackendMode::parse),
            "provider" => {
                self.provider = match text.as_deref() {
                    None => None,
                    Some(p) => Some(ApiProvider::parse(p).ok_or_else(|| AppError::Settings {
                        message: format!("unknown provider `{p}` (expected openai or anthropic)"),
                    })?),
                }
            }
            "model" => self.model = text,
            "base_url" => self.base_url = text,
            "codex_command" => self.codex_command = text,
            "codex_model" => self.codex_model = text,
            "codex_timeout_secs" => {
                self.codex_timeout_secs = match text.as_deref() {
                    None => None,
                    Some(s) => Some(s.parse::<u64>().map_err(|e| AppError::Settings {
                        message: format!("codex_timeout_secs: {e}"),
                    })?),
                }
            }
            other => {
                return Err(AppError::Settings {
                    message: format!("unknown setting `{other}`"),
                })
            }
        }
        Ok(())
    }
}

/// Load the settings file. Returns None if it does not exist.
pub fn load_settings_file(config_dir: &Path) -> Result<Option<SettingsFile>, AppError> {
    let path = crate::paths::settings_path(config_dir);
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(&path)?;
    Ok(Some(serde_json::from_str(&text)?))
}

pub fn save_settings_file(config_dir: &Path, file: &SettingsFile) -> Result<(), AppError> {
    std::fs::create_dir_all(config_dir)?;
    let json = serde_json::to_string_pretty(file)?;
    atomic_write(&crate::paths::settings_path(config_dir), json.as_bytes())
}

/// Load the API key from the separate credentials file.
pub fn load_api_key(config_dir: &Path) -> Option<String> {
    let path = crate::paths::credentials_path(config_dir);
    std::fs::read_to_string(path)
        .ok()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
}

/// Save the API key to the separate credentials file (atomic write).
/// An empty key removes the file.
pub fn save_api_key(config_dir: &Path, key: &str) -> Result<(), AppError> {
    std::fs::create_dir_all(config_dir)?;
    let path = crate::paths::credentials_path(config_dir);
    if key.is_empty() {
        let _ = std::fs::remove_file(&path);
        Ok(())
    } else {
        atomic_write(&path, key.as_bytes())
    }
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<(), AppError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| AppError::from(e.error))?;
    Ok(())
}

/// Effective settings: environment, then the settings file, then the
/// credentials file for the API key when the environment has none.
pub fn load(config_dir: Option<&Path>, env: &dyn Environment) -> Result<GenerationSettings, AppError> {
    let mut settings = GenerationSettings::from_env(env);
    if let Some(dir) = config_dir {
        if let Some(file) = load_settings_file(dir)? {
            settings.apply(&file);
        }
        if settings.api_key.is_none() {
            settings.api_key = load_api_key(dir);
        }
    }
    Ok(settings)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn defaults_from_empty_env() {
        let settings = GenerationSettings::from_env(&env(&[]));
        assert_eq!(settings.backend, BackendMode::Auto);
        assert_eq!(settings.api_model(), DEFAULT_OPENAI_MODEL);
        assert_eq!(settings.codex_model(), DEFAULT_OPENAI_MODEL);
        assert_eq!(settings.codex_timeout_secs, 45);
        assert!(!settings.has_api_key());
    }

    #[test]
    fn reads_environment() {
        let settings = GenerationSettings::from_env(&env(&[
            ("AI_DJ_LLM_BACKEND", " OpenAI-API "),
            ("OPENAI_API_KEY", "sk-test"),
            ("OPENAI_MODEL", "gpt-5"),
            ("CODEX_TIMEOUT_SECS", "90"),
            ("AI_DJ_LLM_PROVIDER", "anthropic"),
        ]));
        assert_eq!(settings.backend, BackendMode::OpenaiApi);
        assert_eq!(settings.provider, ApiProvider::Anthropic);
        assert_eq!(settings.api_key.as_deref(), Some("sk-test"));
        assert_eq!(settings.codex_model(), "gpt-5");
        assert_eq!(settings.codex_timeout_secs, 90);
    }

    #[test]
    fn file_overrides_env_and_key_stays_out_of_it() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = SettingsFile::default();
        file.set("backend", "codex-cli").unwrap();
        file.set("model", "gpt-x").unwrap();
        file.set("codex_timeout_secs", "10").unwrap();
        assert!(file.set("provider", "mystery").is_err());
        assert!(file.set("colour", "red").is_err());
        save_settings_file(dir.path(), &file).unwrap();
        save_api_key(dir.path(), "sk-file").unwrap();

        let settings = load(Some(dir.path()), &env(&[("OPENAI_MODEL", "gpt-env")])).unwrap();
        assert_eq!(settings.backend, BackendMode::CodexCli);
        assert_eq!(settings.api_model(), "gpt-x");
        assert_eq!(settings.codex_timeout_secs, 10);
        assert_eq!(settings.api_key.as_deref(), Some("sk-file"));

        let written = std::fs::read_to_string(crate::paths::settings_path(dir.path())).unwrap();
        assert!(!written.contains("sk-file"));

        save_api_key(dir.path(), "").unwrap();
        assert_eq!(load_api_key(dir.path()), None);
    }

    #[test]
    fn env_key_wins_over_credentials_file() {
        let dir = tempfile::tempdir().unwrap();
        save_api_key(dir.path(), "sk-file").unwrap();
        let settings = load(Some(dir.path()), &env(&[("OPENAI_API_KEY", "sk-env")])).unwrap();
        assert_eq!(settings.api_key.as_deref(), Some("sk-env"));
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load_settings_file(dir.path()).unwrap(), None);
    }
}
