//! Compile validated commands into runtime source, one line per command.

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::command::Command;
use crate::error::AppError;
use crate::pyrepr::{quote_str, scalar_repr};
use crate::safety::{self, SafetyViolation};
use crate::sandbox;
use crate::validation;

/// Identifier of the runtime's global clock object.
pub const CLOCK_IDENT: &str = "Clock";

/// A batch that passed validation and the safety proof.
#[derive(Debug, Clone, Serialize)]
pub struct EmittedBatch {
    pub commands: Vec<Command>,
    pub text: String,
}

/// Render a pattern: bare single-line expressions are kept as code, anything
/// else becomes a quoted string literal.
pub fn pattern_expr(pattern: &str) -> String {
    let source = pattern.trim();
    if !source.is_empty() && sandbox::is_bare_expression(source) {
        source.to_string()
    } else {
        quote_str(pattern)
    }
}

fn emit_line(command: &Command) -> String {
    match command {
        Command::SetGlobal { target, value } => format!("{target} = {}", scalar_repr(value)),
        Command::PlayerAssign {
            player,
            synth,
            pattern,
            kwargs,
        } => {
            let pattern = pattern_expr(pattern);
            if kwargs.is_empty() {
                format!("{player} >> {synth}({pattern})")
            } else {
                // BTreeMap iteration is already sorted by key.
                let kwargs = kwargs
                    .iter()
                    .map(|(k, v)| format!("{k}={}", scalar_repr(v)))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{player} >> {synth}({pattern}, {kwargs})")
            }
        }
        Command::PlayerSet {
            player,
            param,
            value,
        } => format!("{player}.{param} = {}", scalar_repr(value)),
        Command::PlayerStop { player } => format!("{player}.stop()"),
        Command::ClockClear => format!("{CLOCK_IDENT}.clear()"),
    }
}

/// Compile commands and prove the whole program safe.
pub fn emit(commands: &[Command]) -> Result<String, SafetyViolation> {
    let text = commands.iter().map(emit_line).collect::<Vec<_>>().join("\n");
    safety::check(&text)?;
    debug!(lines = commands.len(), "emitted program passed safety proof");
    Ok(text)
}

/// Validate a raw batch and emit it. Nothing is emitted unless every
/// command validates and the whole program passes the safety proof.
pub fn validate_and_emit(raw: &[Value]) -> Result<EmittedBatch, AppError> {
    let commands = validation::validate(raw)?;
    let text = emit(&commands)?;
    Ok(EmittedBatch { commands, text })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    fn emit_json(raw: Value) -> Result<EmittedBatch, AppError> {
        match raw {
            Value::Array(items) => validate_and_emit(&items),
            _ => panic!("expected array"),
        }
    }

    #[test]
    fn rejects_player_zero() {
        let err = emit_json(json!([
            {"op": "player_set", "player": "p0", "param": "amp", "value": 0.2}
        ]))
        .unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[test]
    fn noisy_patterns_are_quoted() {
        let batch = emit_json(json!([
            {"op": "player_assign", "player": "p1", "synth": "play",
             "pattern": "x-(-[--])o-", "kwargs": {}}
        ]))
        .unwrap();
        assert_eq!(batch.text, "p1 >> play('x-(-[--])o-')");
    }

    #[test]
    fn expression_patterns_stay_code() {
        let batch = emit_json(json!([
            {"op": "player_assign", "player": "p1", "synth": "pluck",
             "pattern": "  [0,2,4,2] ", "kwargs": {"oct": 5, "dur": 0.25, "amp": 0.8}}
        ]))
        .unwrap();
        assert_eq!(
            batch.text,
            "p1 >> pluck([0,2,4,2], amp=0.8, dur=0.25, oct=5)"
        );
    }

    #[test]
    fn multiline_patterns_are_quoted() {
        assert_eq!(pattern_expr("[0,\n2]"), "'[0,\\n2]'");
        assert_eq!(pattern_expr("   "), "'   '");
    }

    #[test]
    fn emits_every_command_kind() {
        let batch = emit_json(json!([
            {"op": "set_global", "target": "Clock.bpm", "value": 128},
            {"op": "set_global", "target": "Scale.default", "value": "minor"},
            {"op": "player_set", "player": "b2", "param": "lpf", "value": 900.0},
            {"op": "player_set", "player": "b2", "param": "chop", "value": true},
            {"op": "player_stop", "player": "h3"},
            {"op": "clock_clear"}
        ]))
        .unwrap();
        assert_eq!(
            batch.text,
            "Clock.bpm = 128\n\
             Scale.default = 'minor'\n\
             b2.lpf = 900.0\n\
             b2.chop = True\n\
             h3.stop()\n\
             Clock.clear()"
        );
        assert_eq!(batch.commands.len(), 6);
    }

    #[test]
    fn emission_is_deterministic() {
        let raw = json!([
            {"op": "player_assign", "player": "p1", "synth": "pluck", "pattern": "[0, 2]",
             "kwargs": {"room": 0.3, "amp": 1, "dur": "1/2", "pan": -0.5}},
            {"op": "set_global", "target": "Root.default", "value": "E"}
        ]);
        let first = emit_json(raw.clone()).unwrap().text;
        for _ in 0..5 {
            assert_eq!(emit_json(raw.clone()).unwrap().text, first);
        }
    }

    #[test]
    fn unsafe_patterns_fail_the_whole_batch() {
        let err = emit_json(json!([
            {"op": "player_stop", "player": "p2"},
            {"op": "player_assign", "player": "p1", "synth": "play",
             "pattern": "__import__('os').system('rm')"}
        ]))
        .unwrap_err();
        match err {
            AppError::Safety {
                violation: SafetyViolation::ForbiddenToken { token },
            } => assert_eq!(token, "import"),
            other => panic!("unexpected {other:?}"),
        }

        let err = emit_json(json!([
            {"op": "player_assign", "player": "p1", "synth": "play",
             "pattern": "[x for x in range(3)]"}
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            AppError::Safety {
                violation: SafetyViolation::DisallowedNode { .. }
            }
        ));
    }
    #[test]
    fn obfuscated_patterns_fail_the_safety_proof() {
        let patterns = [
            r"eval ('\x5f\x5f\x69mport\x5f\x5f(\x22\x6fs\x22).system(\x22id\x22)')",
            "open ('/etc/passwd').read()",
            "ｅｖａｌ('1')",
            "getattr(p1, 'st' + 'op')()",
            "[eval]",
        ];
        for pattern in patterns {
            let err = emit_json(json!([
                {"op": "player_assign", "player": "p1", "synth": "pluck", "pattern": pattern}
            ]))
            .unwrap_err();
            assert!(
                matches!(err, AppError::Safety { .. }),
                "{pattern} gave {err:?}"
            );
        }
    }
}
