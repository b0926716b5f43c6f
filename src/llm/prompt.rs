//! System instructions and user payloads for generation backends.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::command::{command_schema, PlayerParam, MAX_BATCH_COMMANDS};

/// Failed commands echoed back in a repair request.
pub const MAX_FAILED_COMMANDS: usize = 12;
/// Validation messages echoed back in a repair request.
pub const MAX_VALIDATION_ERRORS: usize = 20;
/// Commands a repair response should contain at most.
pub const MAX_REPAIR_COMMANDS: usize = 6;

/// What the performer wants from a turn.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    #[default]
    Edit,
    NewScene,
    MixFix,
}

impl Intent {
    pub fn as_str(self) -> &'static str {
        match self {
            Intent::Edit => "edit",
            Intent::NewScene => "new_scene",
            Intent::MixFix => "mix_fix",
        }
    }
}

fn param_list() -> String {
    PlayerParam::all()
        .iter()
        .map(|p| p.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Instruction for ordinary patch generation.
pub fn patch_system_prompt() -> String {
    format!(
        "You are a live-coding assistant steering a running music session.\n\
         Reply with JSON only, shaped as {{\"commands\": [PatchCommand, ...]}}.\n\
         Do not reply with code, markdown, or prose.\n\
         PatchCommand ops: set_global, player_assign, player_set, player_stop, clock_clear.\n\
         player_set params: {}.\n\
         Keep patches short and musical. At most {MAX_BATCH_COMMANDS} commands.\n",
        param_list()
    )
}

/// Instruction for repairing a batch that failed validation.
pub fn repair_system_prompt() -> String {
    format!(
        "You repair patch commands for a running live-coding music session.\n\
         The previous commands failed validation; the errors are included.\n\
         Reply with JSON only, shaped as \
         {{\"commands\": [PatchCommand, ...], \"reason\": string, \"confidence\": number}}.\n\
         confidence is between 0 and 1.\n\
         PatchCommand ops: set_global, player_assign, player_set, player_stop, clock_clear.\n\
         player_set params: {}.\n\
         Change as little as possible. At most {MAX_REPAIR_COMMANDS} commands.\n",
        param_list()
    )
}

fn schema_hint() -> Value {
    json!({
        "commands": [
            {"op": "player_set", "player": "p1", "param": "amp", "value": 0.7}
        ]
    })
}

/// User payload for patch generation.
pub fn patch_payload(prompt: &str, intent: Intent, state: &Value) -> Value {
    json!({
        "intent": intent.as_str(),
        "prompt": prompt,
        "state": state,
        "schema_hint": schema_hint(),
        "schema": command_schema(),
    })
}

/// Inputs for a repair request.
#[derive(Debug, Clone, Default)]
pub struct RepairRequest {
    pub prompt: String,
    pub intent: Intent,
    pub failed_commands: Vec<Value>,
    pub validation_errors: Vec<String>,
}

/// User payload for a repair request; failed commands and errors are capped.
pub fn repair_payload(request: &RepairRequest, state: &Value) -> Value {
    let failed: Vec<&Value> = request
        .failed_commands
        .iter()
        .take(MAX_FAILED_COMMANDS)
        .collect();
    let errors: Vec<&String> = request
        .validation_errors
        .iter()
        .take(MAX_VALIDATION_ERRORS)
        .collect();
    json!({
        "intent": request.intent.as_str(),
        "prompt": request.prompt,
        "state": state,
        "failed_commands": failed,
        "validation_errors": errors,
        "schema_hint": schema_hint(),
    })
}

/// Single prompt string for backends that take one argument.
pub fn flatten(system: &str, payload: &Value) -> String {
    format!("{system}\nReturn ONLY JSON.\n\n{payload}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn repair_payload_caps_lists() {
        let request = RepairRequest {
            prompt: "fix it".into(),
            intent: Intent::MixFix,
            failed_commands: (0..30).map(|i| json!({"op": "player_stop", "i": i})).collect(),
            validation_errors: (0..30).map(|i| format!("error {i}")).collect(),
        };
        let payload = repair_payload(&request, &json!({}));
        assert_eq!(payload["failed_commands"].as_array().unwrap().len(), 12);
        assert_eq!(payload["validation_errors"].as_array().unwrap().len(), 20);
        assert_eq!(payload["intent"], "mix_fix");
    }

    #[test]
    fn patch_payload_carries_state_and_schema() {
        let state = json!({"globals": {"Clock.bpm": 120}, "players": {}});
        let payload = patch_payload("darker", Intent::Edit, &state);
        assert_eq!(payload["state"], state);
        assert_eq!(payload["intent"], "edit");
        assert!(payload["schema"].is_object());
        assert!(patch_system_prompt().contains("formant"));
    }
}
