use serde::Serialize;

use crate::llm::BackendFailure;
use crate::safety::SafetyViolation;
use crate::validation::ValidationError;

/// Structured error type for the crate. Callers match on the variant (or the
/// serialized `code`) instead of parsing message strings.
#[derive(Debug, Clone, Serialize, thiserror::Error)]
#[serde(tag = "code", content = "detail")]
pub enum AppError {
    /// The raw payload was not a list of records, or contained no commands.
    #[error("invalid input: {message}")]
    InputShape { message: String },
    /// One or more commands failed schema validation. Every violation is kept.
    #[error("{}", join_errors(errors))]
    Validation { errors: Vec<ValidationError> },
    /// The emitted program failed the static safety proof.
    #[error("unsafe emission: {violation}")]
    Safety { violation: SafetyViolation },
    /// Every backend in the chain failed.
    #[error("all LLM backends failed: {}", join_failures(failures))]
    AllBackendsFailed { failures: Vec<BackendFailure> },
    #[error("no generation backend available: install the CLI backend or configure an API key")]
    NoBackendAvailable,
    #[error("execution sink error: {message}")]
    Sink { message: String },
    /// A repair proposal that still fails validation or the safety proof.
    #[error("repair output still invalid: {}", errors.join("; "))]
    RepairInvalid { errors: Vec<String> },
    #[error("nothing to undo")]
    NothingToUndo,
    #[error("troubleshoot budget exhausted ({limit} per session)")]
    BudgetExhausted { limit: u32 },
    #[error("I/O error: {message}")]
    Io { message: String },
    #[error("settings error: {message}")]
    Settings { message: String },
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn join_failures(failures: &[BackendFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl AppError {
    /// Flat list of human-readable messages, one per underlying problem.
    pub fn messages(&self) -> Vec<String> {
        match self {
            AppError::Validation { errors } => errors.iter().map(ToString::to_string).collect(),
            other => vec![other.to_string()],
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Io {
            message: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Settings {
            message: e.to_string(),
        }
    }
}

impl From<Vec<ValidationError>> for AppError {
    fn from(errors: Vec<ValidationError>) -> Self {
        AppError::Validation { errors }
    }
}

impl From<SafetyViolation> for AppError {
    fn from(violation: SafetyViolation) -> Self {
        AppError::Safety { violation }
    }
}

/// Allow converting AppError to String for reporting surfaces.
impl From<AppError> for String {
    fn from(e: AppError) -> String {
        e.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_code_tag() {
        let err = AppError::BudgetExhausted { limit: 3 };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "BudgetExhausted");
        assert_eq!(json["detail"]["limit"], 3);
    }

    #[test]
    fn aggregated_failure_joins_reasons() {
        let err = AppError::AllBackendsFailed {
            failures: vec![
                BackendFailure {
                    backend: "codex-cli".into(),
                    reason: "timed out".into(),
                },
                BackendFailure {
                    backend: "openai-api".into(),
                    reason: "HTTP 401".into(),
                },
            ],
        };
        assert_eq!(
            err.to_string(),
            "all LLM backends failed: codex-cli: timed out; openai-api: HTTP 401"
        );
    }

    #[test]
    fn validation_messages_are_flattened() {
        let err = AppError::from(vec![
            ValidationError::at(0, "player", "bad"),
            ValidationError::batch("too many"),
        ]);
        assert_eq!(err.messages().len(), 2);
    }
}
