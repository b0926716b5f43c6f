//! External CLI backend (`codex exec` and compatibles).

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{prompt, BackendError, Completion, GenerationBackend};

pub const BACKEND_NAME: &str = "codex-cli";

pub struct CliBackend {
    program: PathBuf,
    args: Vec<String>,
    model: String,
    timeout: Duration,
}

impl CliBackend {
    pub fn new(program: PathBuf, args: Vec<String>, model: String, timeout: Duration) -> Self {
        Self {
            program,
            args,
            model,
            timeout,
        }
    }
}

#[async_trait]
impl GenerationBackend for CliBackend {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    async fn complete(&self, system: &str, user_payload: &Value) -> Result<Completion, BackendError> {
        let last_message = tempfile::NamedTempFile::new()
            .map_err(|e| BackendError::Spawn(format!("could not create output file: {e}")))?;

        let child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg("--model")
            .arg(&self.model)
            .arg("--output-last-message")
            .arg(last_message.path())
            .arg(prompt::flatten(system, user_payload))
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BackendError::Spawn(format!("{}: {e}", self.program.display())))?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| BackendError::Timeout {
                secs: self.timeout.as_secs(),
            })?
            .map_err(|e| BackendError::Spawn(e.to_string()))?;

        if !output.status.success() {
            return Err(BackendError::Exit {
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let from_file = tokio::fs::read_to_string(last_message.path())
            .await
            .unwrap_or_default();
        let text = if from_file.trim().is_empty() {
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        } else {
            from_file.trim().to_string()
        };
        debug!(bytes = text.len(), "cli backend finished");
        Ok(Completion {
            text,
            model: format!("{BACKEND_NAME}:{}", self.model),
        })
    }
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    // `sh -c SCRIPT` receives the appended flags as $0..$4:
    // --model MODEL --output-last-message PATH PROMPT
    fn shell(script: &str, timeout: Duration) -> CliBackend {
        CliBackend::new(
            PathBuf::from("/bin/sh"),
            vec!["-c".into(), script.into()],
            "gpt-test".into(),
            timeout,
        )
    }

    #[tokio::test]
    async fn reads_stdout() {
        let backend = shell(
            r#"echo '{"commands":[{"op":"clock_clear"}]}'"#,
            Duration::from_secs(10),
        );
        let done = backend.complete("sys", &json!({})).await.unwrap();
        assert_eq!(done.text, r#"{"commands":[{"op":"clock_clear"}]}"#);
        assert_eq!(done.model, "codex-cli:gpt-test");
    }

    #[tokio::test]
    async fn prefers_last_message_file() {
        let backend = shell(
            r#"echo noise; printf '%s' '{"commands":[]}' > "$3""#,
            Duration::from_secs(10),
        );
        let done = backend.complete("sys", &json!({})).await.unwrap();
        assert_eq!(done.text, r#"{"commands":[]}"#);
    }

    #[tokio::test]
    async fn non_zero_exit_carries_stderr() {
        let backend = shell("echo boom >&2; exit 3", Duration::from_secs(10));
        match backend.complete("sys", &json!({})).await {
            Err(BackendError::Exit { code, stderr }) => {
                assert_eq!(code, 3);
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected {:?}", other.map(|c| c.text)),
        }
    }

    #[tokio::test]
    async fn times_out() {
        let backend = shell("sleep 5", Duration::from_millis(200));
        assert!(matches!(
            backend.complete("sys", &json!({})).await,
            Err(BackendError::Timeout { .. })
        ));
    }
}
