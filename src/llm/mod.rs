//! Generation orchestrator: an ordered chain of text-generation backends
//! whose replies are extracted, shaped and handed to the command pipeline.

pub mod api;
pub mod cli;
pub mod extract;
pub mod prompt;
pub mod resolve;
pub mod shape;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::AppError;
use crate::settings::{BackendMode, GenerationSettings};
use extract::ExtractError;
use prompt::{Intent, RepairRequest};
use resolve::{Environment, FileProbe};

/// Why one backend in the chain gave up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendFailure {
    pub backend: String,
    pub reason: String,
}

impl fmt::Display for BackendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.backend, self.reason)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },
    #[error("could not start: {0}")]
    Spawn(String),
    #[error("exited with status {code}: {stderr}")]
    Exit { code: i32, stderr: String },
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("request failed: {0}")]
    Transport(String),
    #[error("unexpected response: {0}")]
    Response(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Extract(#[from] ExtractError),
}

/// Raw reply text plus the label of the model that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub model: String,
}

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn name(&self) -> &str;

    /// One system + user exchange.
    async fn complete(&self, system: &str, user_payload: &Value) -> Result<Completion, BackendError>;
}

/// Stands in for a backend that was requested explicitly but cannot run.
struct UnavailableBackend {
    name: &'static str,
    reason: String,
}

#[async_trait]
impl GenerationBackend for UnavailableBackend {
    fn name(&self) -> &str {
        self.name
    }

    async fn complete(&self, _system: &str, _payload: &Value) -> Result<Completion, BackendError> {
        Err(BackendError::Unavailable(self.reason.clone()))
    }
}

/// Shaped commands from a patch generation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Generation {
    pub commands: Vec<Value>,
    pub model: String,
}

/// A repair proposal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Repair {
    pub commands: Vec<Value>,
    pub model: String,
    pub reason: String,
    pub confidence: f64,
}

pub struct Orchestrator {
    backends: Vec<Box<dyn GenerationBackend>>,
}

fn cli_backend(
    settings: &GenerationSettings,
    env: &dyn Environment,
    fs: &dyn FileProbe,
) -> Result<cli::CliBackend, String> {
    let words = resolve::split_command(&settings.codex_command)
        .ok_or_else(|| format!("cannot parse command line {:?}", settings.codex_command))?;
    let (program, args) = words
        .split_first()
        .ok_or_else(|| "empty CLI command".to_string())?;
    let path = resolve::resolve_executable(program, env, fs)
        .ok_or_else(|| format!("executable {program:?} not found"))?;
    Ok(cli::CliBackend::new(
        path,
        args.to_vec(),
        settings.codex_model(),
        Duration::from_secs(settings.codex_timeout_secs),
    ))
}

fn unavailable(name: &'static str, reason: String) -> Box<dyn GenerationBackend> {
    Box::new(UnavailableBackend { name, reason })
}

impl Orchestrator {
    pub fn new(backends: Vec<Box<dyn GenerationBackend>>) -> Self {
        Self { backends }
    }

    /// Build the chain for the configured mode. `auto` tries the CLI first,
    /// then the hosted API; an explicit mode always yields exactly one entry.
    pub fn from_settings(
        settings: &GenerationSettings,
        env: &dyn Environment,
        fs: &dyn FileProbe,
    ) -> Self {
        let mut backends: Vec<Box<dyn GenerationBackend>> = Vec::new();
        match settings.backend {
            BackendMode::CodexCli => backends.push(match cli_backend(settings, env, fs) {
                Ok(b) => Box::new(b),
                Err(reason) => unavailable(cli::BACKEND_NAME, reason),
            }),
            BackendMode::OpenaiApi => {
                backends.push(match api::ResolvedProvider::from_settings(settings) {
                    Ok(p) => Box::new(api::ApiBackend::new(p)),
                    Err(reason) => unavailable(api::BACKEND_NAME, reason),
                });
            }
            BackendMode::Auto => {
                if let Ok(b) = cli_backend(settings, env, fs) {
                    backends.push(Box::new(b));
                }
                if let Ok(p) = api::ResolvedProvider::from_settings(settings) {
                    backends.push(Box::new(api::ApiBackend::new(p)));
                }
            }
        }
        info!(
            mode = ?settings.backend,
            chain = ?backends.iter().map(|b| b.name()).collect::<Vec<_>>(),
            "generation backends resolved"
        );
        Self { backends }
    }

    pub fn backend_names(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.name().to_string()).collect()
    }

    /// Try each backend in order until one reply survives `accept`.
    async fn run_chain<T>(
        &self,
        system: &str,
        payload: &Value,
        accept: impl Fn(&str) -> Result<T, ExtractError>,
    ) -> Result<(T, String), AppError> {
        if self.backends.is_empty() {
            return Err(AppError::NoBackendAvailable);
        }
        let mut failures = Vec::new();
        for backend in &self.backends {
            let result = backend
                .complete(system, payload)
                .await
                .and_then(|done| Ok((accept(&done.text)?, done.model)));
            match result {
                Ok(ok) => {
                    info!(backend = backend.name(), model = %ok.1, "generation succeeded");
                    return Ok(ok);
                }
                Err(e) => {
                    warn!(backend = backend.name(), error = %e, "generation backend failed");
                    failures.push(BackendFailure {
                        backend: backend.name().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        Err(AppError::AllBackendsFailed { failures })
    }

    /// Generate a patch for `prompt`, already shaped but not yet normalized.
    pub async fn generate_patch(
        &self,
        prompt: &str,
        intent: Intent,
        state: &Value,
    ) -> Result<Generation, AppError> {
        let payload = prompt::patch_payload(prompt, intent, state);
        let (commands, model) = self
            .run_chain(&prompt::patch_system_prompt(), &payload, extract::extract_commands)
            .await?;
        Ok(Generation {
            commands: shape::shape_commands(&commands),
            model,
        })
    }

    /// Ask for a repair of a batch that failed validation.
    pub async fn generate_repair(
        &self,
        request: &RepairRequest,
        state: &Value,
    ) -> Result<Repair, AppError> {
        let payload = prompt::repair_payload(request, state);
        let (reply, model) = self
            .run_chain(&prompt::repair_system_prompt(), &payload, extract::extract_payload)
            .await?;
        Ok(read_repair(reply, model))
    }
}

fn read_repair(reply: Value, model: String) -> Repair {
    let (commands, reason, confidence) = match reply {
        Value::Array(items) => (items, String::new(), 0.0),
        Value::Object(mut map) => {
            let commands = match map.remove("commands") {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            };
            let reason = map
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let confidence = map
                .get("confidence")
                .and_then(Value::as_f64)
                .filter(|c| c.is_finite())
                .map_or(0.0, |c| c.clamp(0.0, 1.0));
            (commands, reason, confidence)
        }
        _ => (Vec::new(), String::new(), 0.0),
    };
    Repair {
        commands: shape::shape_commands(&commands),
        model,
        reason,
        confidence,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic, clippy::indexing_slicing)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Replies with canned text, or fails, counting calls.
    pub(crate) struct FakeBackend {
        pub name: &'static str,
        pub reply: Result<String, String>,
        pub calls: Arc<AtomicUsize>,
    }

    impl FakeBackend {
        pub(crate) fn ok(name: &'static str, text: &str) -> Self {
            Self {
                name,
                reply: Ok(text.to_string()),
                calls: Arc::default(),
            }
        }

        pub(crate) fn failing(name: &'static str, reason: &str) -> Self {
            Self {
                name,
                reply: Err(reason.to_string()),
                calls: Arc::default(),
            }
        }
    }

    #[async_trait]
    impl GenerationBackend for FakeBackend {
        fn name(&self) -> &str {
            self.name
        }

        async fn complete(&self, _system: &str, _payload: &Value) -> Result<Completion, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Ok(text) => Ok(Completion {
                    text: text.clone(),
                    model: format!("{}:fake", self.name),
                }),
                Err(reason) => Err(BackendError::Transport(reason.clone())),
            }
        }
    }

    struct Probe(Vec<&'static str>);

    impl FileProbe for Probe {
        fn is_executable(&self, path: &Path) -> bool {
            self.0.iter().any(|p| Path::new(p) == path)
        }
    }

    #[tokio::test]
    async fn falls_through_to_next_backend() {
        let first = FakeBackend::failing("codex-cli", "timed out");
        let first_calls = first.calls.clone();
        let orchestrator = Orchestrator::new(vec![
            Box::new(first),
            Box::new(FakeBackend::ok(
                "openai-api",
                r#"{"commands":[{"op":"player_set","player":"p1","param":"cutoff","value":800}]}"#,
            )),
        ]);
        let generation = orchestrator
            .generate_patch("darker", Intent::Edit, &json!({}))
            .await
            .unwrap();
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(generation.model, "openai-api:fake");
        assert_eq!(generation.commands[0]["param"], "lpf");
    }

    #[tokio::test]
    async fn unparsable_reply_counts_as_failure() {
        let orchestrator = Orchestrator::new(vec![
            Box::new(FakeBackend::ok("codex-cli", "I cannot help with that")),
            Box::new(FakeBackend::failing("openai-api", "HTTP 401")),
        ]);
        match orchestrator.generate_patch("x", Intent::Edit, &json!({})).await {
            Err(AppError::AllBackendsFailed { failures }) => {
                assert_eq!(failures.len(), 2);
                assert_eq!(failures[0].backend, "codex-cli");
                assert!(failures[1].reason.contains("HTTP 401"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_chain_has_no_backend() {
        let orchestrator = Orchestrator::new(Vec::new());
        assert!(matches!(
            orchestrator.generate_patch("x", Intent::Edit, &json!({})).await,
            Err(AppError::NoBackendAvailable)
        ));
    }

    #[tokio::test]
    async fn repair_clamps_confidence() {
        let orchestrator = Orchestrator::new(vec![Box::new(FakeBackend::ok(
            "codex-cli",
            r#"noise {"commands":[{"op":"clock_clear"}],"reason":"fixed","confidence":1.7}"#,
        ))]);
        let repair = orchestrator
            .generate_repair(&RepairRequest::default(), &json!({}))
            .await
            .unwrap();
        assert_eq!(repair.reason, "fixed");
        assert!((repair.confidence - 1.0).abs() < f64::EPSILON);
        assert_eq!(repair.commands, vec![json!({"op": "clock_clear"})]);
    }

    #[tokio::test]
    async fn repair_reads_pretty_printed_envelope() {
        let reply = "Here is the fix:\n{\n  \"commands\": [\n    {\"op\": \"player_stop\", \"player\": \"p1\"}\n  ],\n  \"reason\": \"dropped bad synth\",\n  \"confidence\": 0.8\n}";
        let orchestrator = Orchestrator::new(vec![Box::new(FakeBackend::ok("codex-cli", reply))]);
        let repair = orchestrator
            .generate_repair(&RepairRequest::default(), &json!({}))
            .await
            .unwrap();
        assert_eq!(repair.reason, "dropped bad synth");
        assert!((repair.confidence - 0.8).abs() < f64::EPSILON);
        assert_eq!(
            repair.commands,
            vec![json!({"op": "player_stop", "player": "p1"})]
        );
    }

    #[test]
    fn repair_defaults_when_fields_missing() {
        let repair = read_repair(json!({"commands": [], "confidence": "high"}), "m".into());
        assert_eq!(repair.reason, "");
        assert!(repair.confidence.abs() < f64::EPSILON);
    }

    #[test]
    fn auto_mode_orders_cli_before_api() {
        let env: HashMap<String, String> =
            [("PATH".to_string(), "/tools".to_string())].into_iter().collect();
        let mut settings = GenerationSettings {
            api_key: Some("sk".into()),
            ..GenerationSettings::default()
        };
        let with_cli = Orchestrator::from_settings(&settings, &env, &Probe(vec!["/tools/codex"]));
        assert_eq!(with_cli.backend_names(), vec!["codex-cli", "openai-api"]);

        let api_only = Orchestrator::from_settings(&settings, &env, &Probe(Vec::new()));
        assert_eq!(api_only.backend_names(), vec!["openai-api"]);

        settings.api_key = None;
        let none = Orchestrator::from_settings(&settings, &env, &Probe(Vec::new()));
        assert!(none.backend_names().is_empty());
    }

    #[tokio::test]
    async fn explicit_mode_reports_unavailable_backend() {
        let settings = GenerationSettings {
            backend: BackendMode::OpenaiApi,
            ..GenerationSettings::default()
        };
        let env = HashMap::<String, String>::new();
        let orchestrator = Orchestrator::from_settings(&settings, &env, &Probe(Vec::new()));
        assert_eq!(orchestrator.backend_names(), vec!["openai-api"]);
        let err = orchestrator
            .generate_patch("x", Intent::Edit, &json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("all LLM backends failed"));
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }
}
