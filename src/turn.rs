//! Turn pipeline: one performer request through generation, normalization,
//! emission, the execution sink and the undo stack.
//!
//! Each session sits behind its own `tokio::sync::Mutex`, so at most one
//! apply is in flight per session while other sessions proceed.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::audit::{self, AuditEntry};
use crate::command::Command;
use crate::emitter::{self, EmittedBatch};
use crate::error::AppError;
use crate::llm::prompt::{Intent, RepairRequest};
use crate::llm::Orchestrator;
use crate::normalizer::normalize;
use crate::revert::compute_revert;
use crate::session::SessionState;
use crate::sink::ExecutionSink;

/// Revert batches kept per session.
pub const MAX_UNDO_LEVELS: usize = 50;
/// Troubleshoot requests allowed per session.
pub const TROUBLESHOOT_LIMIT: u32 = 3;

pub const DIRECT_JSON_MODEL: &str = "direct-json";
pub const FAILED_MODEL: &str = "llm-failed";

const NO_COMMANDS: &str = "model returned no commands";
const SELF_HEAL_NOTE: &str = "Model output failed validation. Edit your prompt and retry to self-heal.";

// ── Sessions ─────────────────────────────────────────────────────

pub struct Session {
    pub id: String,
    pub state: SessionState,
    pub troubleshoot_used: u32,
    undo_stack: Vec<Vec<Command>>,
    audit_dir: Option<PathBuf>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: SessionState::new(),
            troubleshoot_used: 0,
            undo_stack: Vec::new(),
            audit_dir: None,
        }
    }

    /// Append applied batches to JSONL files under `dir`.
    #[must_use]
    pub fn with_audit_dir(mut self, dir: PathBuf) -> Self {
        self.audit_dir = Some(dir);
        self
    }

    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    fn push_undo(&mut self, revert: Vec<Command>) {
        if revert.is_empty() {
            return;
        }
        self.undo_stack.push(revert);
        if self.undo_stack.len() > MAX_UNDO_LEVELS {
            self.undo_stack.remove(0);
        }
    }

    fn audit(&self, kind: &str, model: Option<&str>, batch: &AppliedBatch) {
        let Some(dir) = &self.audit_dir else {
            return;
        };
        let commands: Vec<Value> = batch.commands.iter().map(Command::to_json).collect();
        let revert: Vec<Value> = batch.revert.iter().map(Command::to_json).collect();
        audit::record(
            dir,
            &AuditEntry {
                ts: Utc::now(),
                session_id: &self.id,
                kind,
                model,
                commands: &commands,
                code: &batch.code,
                revert_commands: &revert,
            },
        );
    }
}

pub type SharedSession = Arc<tokio::sync::Mutex<Session>>;

/// Live sessions by id.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: parking_lot::Mutex<HashMap<String, SharedSession>>,
    audit_dir: Option<PathBuf>,
}

impl SessionRegistry {
    pub fn new(audit_dir: Option<PathBuf>) -> Self {
        Self {
            sessions: parking_lot::Mutex::default(),
            audit_dir,
        }
    }

    pub fn get_or_create(&self, id: &str) -> SharedSession {
        let mut sessions = self.sessions.lock();
        sessions
            .entry(id.to_string())
            .or_insert_with(|| {
                debug!(session = id, "created session");
                let session = Session::new(id);
                let session = match &self.audit_dir {
                    Some(dir) => session.with_audit_dir(dir.clone()),
                    None => session,
                };
                Arc::new(tokio::sync::Mutex::new(session))
            })
            .clone()
    }

    pub fn get(&self, id: &str) -> Option<SharedSession> {
        self.sessions.lock().get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<SharedSession> {
        self.sessions.lock().remove(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

// ── Applying batches ─────────────────────────────────────────────

/// A batch that reached the sink, and what undoes it.
#[derive(Debug, Clone, Serialize)]
pub struct AppliedBatch {
    pub commands: Vec<Command>,
    pub code: String,
    pub revert: Vec<Command>,
}

async fn apply_emitted(
    session: &mut Session,
    sink: &dyn ExecutionSink,
    batch: EmittedBatch,
) -> Result<AppliedBatch, AppError> {
    sink.send(&batch.text).await?;
    let revert = compute_revert(&mut session.state, &batch.commands);
    session.push_undo(revert.clone());
    info!(
        session = %session.id,
        commands = batch.commands.len(),
        revert = revert.len(),
        "applied batch"
    );
    Ok(AppliedBatch {
        commands: batch.commands,
        code: batch.text,
        revert,
    })
}

/// Validate, emit and send `raw`, then record its revert batch.
///
/// State and the undo stack are untouched unless the sink accepted the text.
pub async fn apply_batch(
    session: &mut Session,
    sink: &dyn ExecutionSink,
    raw: &[Value],
) -> Result<AppliedBatch, AppError> {
    let batch = emitter::validate_and_emit(raw)?;
    let applied = apply_emitted(session, sink, batch).await?;
    session.audit("batch", None, &applied);
    Ok(applied)
}

/// Apply the newest revert batch.
pub async fn undo(session: &mut Session, sink: &dyn ExecutionSink) -> Result<AppliedBatch, AppError> {
    let commands = session.undo_stack.pop().ok_or(AppError::NothingToUndo)?;
    let code = match emitter::emit(&commands) {
        Ok(code) => code,
        Err(e) => {
            session.undo_stack.push(commands);
            return Err(e.into());
        }
    };
    if let Err(e) = sink.send(&code).await {
        session.undo_stack.push(commands);
        return Err(e);
    }
    // Keep state in step with the runtime; the inverse of an undo is not stacked.
    let revert = compute_revert(&mut session.state, &commands);
    let applied = AppliedBatch {
        commands,
        code,
        revert,
    };
    info!(session = %session.id, depth = session.undo_stack.len(), "undid batch");
    session.audit("undo", None, &applied);
    Ok(applied)
}

// ── Turns ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct TurnRequest {
    pub prompt: String,
    pub intent: Intent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyStatus {
    Applied,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub model: String,
    /// Commands as produced by the model or the prompt.
    pub commands: Vec<Value>,
    /// Commands actually validated, after any normalization.
    pub effective_commands: Vec<Value>,
    pub normalized: bool,
    pub notes: Vec<String>,
    pub errors: Vec<String>,
    pub apply_status: ApplyStatus,
    pub code: Option<String>,
    pub revert_commands: Vec<Value>,
    pub latency_ms: u64,
}

/// A prompt that is itself a JSON array of commands.
fn direct_commands(prompt: &str) -> Option<Vec<Value>> {
    match serde_json::from_str(prompt.trim()) {
        Ok(Value::Array(items)) => Some(items),
        _ => None,
    }
}

/// Run one turn. Failures are reported in the outcome, never as an error.
pub async fn run_turn(
    session: &mut Session,
    sink: &dyn ExecutionSink,
    orchestrator: &Orchestrator,
    request: &TurnRequest,
) -> TurnOutcome {
    let started = Instant::now();
    let mut notes = Vec::new();
    let mut backend_failure = None;

    let direct = direct_commands(&request.prompt);
    let is_direct = direct.is_some();
    let (model, commands, effective, mut normalized) = match direct {
        Some(items) => (DIRECT_JSON_MODEL.to_string(), items.clone(), items, false),
        None => match orchestrator
            .generate_patch(&request.prompt, request.intent, &session.state.snapshot())
            .await
        {
            Ok(generation) => {
                let (fixed, repairs) = normalize(&generation.commands);
                let changed = !repairs.is_empty() || fixed != generation.commands;
                notes.extend(repairs);
                (generation.model, generation.commands, fixed, changed)
            }
            Err(e) => {
                warn!(session = %session.id, error = %e, "generation failed");
                notes.push(format!("LLM backend failed: {e}"));
                backend_failure = Some(e.to_string());
                (FAILED_MODEL.to_string(), Vec::new(), Vec::new(), false)
            }
        },
    };

    let mut outcome = TurnOutcome {
        model,
        commands,
        effective_commands: effective,
        normalized,
        notes,
        errors: Vec::new(),
        apply_status: ApplyStatus::Skipped,
        code: None,
        revert_commands: Vec::new(),
        latency_ms: 0,
    };

    if outcome.effective_commands.is_empty() {
        outcome
            .errors
            .push(backend_failure.unwrap_or_else(|| NO_COMMANDS.to_string()));
        return finish(outcome, started);
    }

    let mut emitted = emitter::validate_and_emit(&outcome.effective_commands);
    if emitted.is_err() && is_direct && request.intent != Intent::MixFix {
        let (retry, repairs) = normalize(&outcome.effective_commands);
        if retry != outcome.effective_commands || !repairs.is_empty() {
            debug!(session = %session.id, "retrying direct commands through the normalizer");
            outcome.notes.extend(repairs);
            normalized = true;
            emitted = emitter::validate_and_emit(&retry);
            outcome.effective_commands = retry;
        }
    }
    outcome.normalized = normalized;

    let batch = match emitted {
        Ok(batch) => batch,
        Err(e) => {
            outcome.errors = e.messages();
            outcome.notes.push(SELF_HEAL_NOTE.to_string());
            return finish(outcome, started);
        }
    };

    match apply_emitted(session, sink, batch).await {
        Ok(applied) => {
            session.audit("turn", Some(outcome.model.as_str()), &applied);
            outcome.apply_status = ApplyStatus::Applied;
            outcome.code = Some(applied.code);
            outcome.revert_commands = applied.revert.iter().map(Command::to_json).collect();
        }
        Err(e) => {
            warn!(session = %session.id, error = %e, "apply failed");
            outcome.apply_status = ApplyStatus::Failed;
            outcome.errors.push(e.to_string());
        }
    }
    finish(outcome, started)
}

fn finish(mut outcome: TurnOutcome, started: Instant) -> TurnOutcome {
    outcome.latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    info!(
        model = %outcome.model,
        status = ?outcome.apply_status,
        errors = outcome.errors.len(),
        latency_ms = outcome.latency_ms,
        "turn finished"
    );
    outcome
}

// ── Troubleshooting ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Budget {
    pub used: u32,
    pub limit: u32,
    pub remaining: u32,
}

impl Budget {
    fn of(session: &Session) -> Self {
        Self {
            used: session.troubleshoot_used,
            limit: TROUBLESHOOT_LIMIT,
            remaining: TROUBLESHOOT_LIMIT.saturating_sub(session.troubleshoot_used),
        }
    }
}

/// A validated repair, previewed but not sent anywhere.
#[derive(Debug, Clone, Serialize)]
pub struct TroubleshootOutcome {
    pub model: String,
    pub reason: String,
    pub confidence: f64,
    pub fixed_commands: Vec<Value>,
    pub preview: String,
    pub notes: Vec<String>,
    pub budget: Budget,
}

/// Ask the backends to repair a failed batch. Only successful repairs
/// count against the session budget.
pub async fn troubleshoot(
    session: &mut Session,
    orchestrator: &Orchestrator,
    request: &RepairRequest,
) -> Result<TroubleshootOutcome, AppError> {
    if session.troubleshoot_used >= TROUBLESHOOT_LIMIT {
        return Err(AppError::BudgetExhausted {
            limit: TROUBLESHOOT_LIMIT,
        });
    }
    let repair = orchestrator
        .generate_repair(request, &session.state.snapshot())
        .await?;
    let (fixed, notes) = normalize(&repair.commands);
    if fixed.is_empty() {
        return Err(AppError::RepairInvalid {
            errors: vec![NO_COMMANDS.to_string()],
        });
    }
    let batch = emitter::validate_and_emit(&fixed).map_err(|e| AppError::RepairInvalid {
        errors: e.messages(),
    })?;
    session.troubleshoot_used += 1;
    info!(session = %session.id, used = session.troubleshoot_used, "repair proposed");
    Ok(TroubleshootOutcome {
        model: repair.model,
        reason: repair.reason,
        confidence: repair.confidence,
        fixed_commands: batch.commands.iter().map(Command::to_json).collect(),
        preview: batch.text,
        notes,
        budget: Budget::of(session),
    })
}
