//! Schema validation for raw command batches.
//!
//! Centralizes the structural and semantic checks so every caller reports
//! problems the same way. Validation is all-or-nothing: a batch either fully
//! validates or every violation found is returned together.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::command::{
    is_player_name, Command, GlobalTarget, PlayerName, PlayerParam, Scalar, MAX_BATCH_COMMANDS,
    MAX_GLOBAL_STRING_LEN, MAX_PATTERN_LEN, MAX_SYNTH_LEN,
};
use crate::safety;

/// One violation, tagged with the command index (0-based) and field it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
pub struct ValidationError {
    pub index: Option<usize>,
    pub field: Option<String>,
    pub message: String,
}

impl ValidationError {
    pub fn at(index: usize, field: &str, message: impl Into<String>) -> Self {
        Self {
            index: Some(index),
            field: Some(field.to_string()),
            message: message.into(),
        }
    }

    pub fn command(index: usize, message: impl Into<String>) -> Self {
        Self {
            index: Some(index),
            field: None,
            message: message.into(),
        }
    }

    pub fn batch(message: impl Into<String>) -> Self {
        Self {
            index: None,
            field: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.index, &self.field) {
            (Some(i), Some(field)) => write!(f, "command #{}.{field}: {}", i + 1, self.message),
            (Some(i), None) => write!(f, "command #{}: {}", i + 1, self.message),
            (None, _) => write!(f, "{}", self.message),
        }
    }
}

/// Validate a raw batch against the command schema.
///
/// Returns every violation found, not just the first.
pub fn validate(raw: &[Value]) -> Result<Vec<Command>, Vec<ValidationError>> {
    let mut errors = Vec::new();
    if raw.len() > MAX_BATCH_COMMANDS {
        errors.push(ValidationError::batch(format!(
            "at most {MAX_BATCH_COMMANDS} commands are allowed per batch, got {}",
            raw.len()
        )));
    }

    let mut commands = Vec::with_capacity(raw.len());
    for (index, entry) in raw.iter().enumerate() {
        let mut checker = Checker {
            index,
            errors: &mut errors,
        };
        if let Some(cmd) = checker.command(entry) {
            commands.push(cmd);
        }
    }

    if errors.is_empty() {
        Ok(commands)
    } else {
        Err(errors)
    }
}

/// Validate a whole JSON payload: either an array of commands or an object
/// with a `commands` array.
pub fn validate_payload(payload: &Value) -> Result<Vec<Command>, Vec<ValidationError>> {
    let list = match payload {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => match map.get("commands") {
            Some(Value::Array(items)) => items.as_slice(),
            _ => {
                return Err(vec![ValidationError::batch(
                    "payload object must carry a `commands` array",
                )])
            }
        },
        other => {
            return Err(vec![ValidationError::batch(format!(
                "payload must be a list of commands, got {}",
                json_type_name(other)
            ))])
        }
    };
    validate(list)
}

/// JSON type name used in diagnostics.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

struct Checker<'a> {
    index: usize,
    errors: &'a mut Vec<ValidationError>,
}

impl Checker<'_> {
    fn fail(&mut self, field: &str, message: impl Into<String>) {
        self.errors
            .push(ValidationError::at(self.index, field, message));
    }

    fn command(&mut self, entry: &Value) -> Option<Command> {
        let Some(obj) = entry.as_object() else {
            self.errors.push(ValidationError::command(
                self.index,
                format!("expected object, got {}", json_type_name(entry)),
            ));
            return None;
        };

        let op = match obj.get("op") {
            Some(Value::String(op)) => op.as_str(),
            Some(other) => {
                self.fail("op", format!("expected string, got {}", json_type_name(other)));
                return None;
            }
            None => {
                self.fail("op", "field required");
                return None;
            }
        };

        match op {
            "set_global" => self.set_global(obj),
            "player_assign" => self.player_assign(obj),
            "player_set" => self.player_set(obj),
            "player_stop" => self.player(obj).map(|player| Command::PlayerStop { player }),
            "clock_clear" => Some(Command::ClockClear),
            other => {
                self.fail(
                    "op",
                    format!(
                        "unknown operation '{other}' (expected one of set_global, player_assign, player_set, player_stop, clock_clear)"
                    ),
                );
                None
            }
        }
    }

    fn set_global(&mut self, obj: &Map<String, Value>) -> Option<Command> {
        let target = match obj.get("target") {
            Some(Value::String(s)) => {
                let t = GlobalTarget::parse(s);
                if t.is_none() {
                    let allowed: Vec<&str> =
                        GlobalTarget::all().iter().map(|t| t.as_str()).collect();
                    self.fail(
                        "target",
                        format!("unknown target '{s}' (expected one of {})", allowed.join(", ")),
                    );
                }
                t
            }
            Some(other) => {
                self.fail("target", format!("expected string, got {}", json_type_name(other)));
                None
            }
            None => {
                self.fail("target", "field required");
                None
            }
        };
        let value = self.value(obj, false);
        if let Some(Scalar::Str(s)) = &value {
            if s.chars().count() > MAX_GLOBAL_STRING_LEN {
                self.fail(
                    "value",
                    format!("string must be at most {MAX_GLOBAL_STRING_LEN} characters"),
                );
                return None;
            }
        }
        Some(Command::SetGlobal {
            target: target?,
            value: value?,
        })
    }

    fn player_assign(&mut self, obj: &Map<String, Value>) -> Option<Command> {
        let player = self.player(obj);
        let synth = self.bounded_string(obj, "synth", MAX_SYNTH_LEN);
        if let Some(s) = &synth {
            if !is_identifier(s) {
                self.fail("synth", format!("'{s}' is not a valid identifier"));
            } else if safety::is_denied_name(s) {
                self.fail("synth", format!("'{s}' is a reserved runtime name"));
            }
        }
        let pattern = self.bounded_string(obj, "pattern", MAX_PATTERN_LEN);
        let kwargs = self.kwargs(obj);

        let synth = synth.filter(|s| is_identifier(s) && !safety::is_denied_name(s));
        Some(Command::PlayerAssign {
            player: player?,
            synth: synth?,
            pattern: pattern?,
            kwargs: kwargs?,
        })
    }

    fn player_set(&mut self, obj: &Map<String, Value>) -> Option<Command> {
        let player = self.player(obj);
        let param = match obj.get("param") {
            Some(Value::String(s)) => {
                let p = PlayerParam::parse(s);
                if p.is_none() {
                    self.fail("param", format!("unknown parameter '{s}'"));
                }
                p
            }
            Some(other) => {
                self.fail("param", format!("expected string, got {}", json_type_name(other)));
                None
            }
            None => {
                self.fail("param", "field required");
                None
            }
        };
        let value = self.value(obj, true);
        Some(Command::PlayerSet {
            player: player?,
            param: param?,
            value: value?,
        })
    }

    fn player(&mut self, obj: &Map<String, Value>) -> Option<PlayerName> {
        match obj.get("player") {
            Some(Value::String(s)) => {
                if !is_player_name(s) {
                    self.fail(
                        "player",
                        format!(
                            "player {s} is not allowed (expected a lowercase letter followed by an index >= 1, e.g. p1)"
                        ),
                    );
                }
                PlayerName::new(s.clone())
            }
            Some(other) => {
                self.fail("player", format!("expected string, got {}", json_type_name(other)));
                None
            }
            None => {
                self.fail("player", "field required");
                None
            }
        }
    }

    fn bounded_string(&mut self, obj: &Map<String, Value>, field: &str, max: usize) -> Option<String> {
        match obj.get(field) {
            Some(Value::String(s)) => {
                let len = s.chars().count();
                if len == 0 {
                    self.fail(field, "must not be empty");
                    None
                } else if len > max {
                    self.fail(field, format!("must be at most {max} characters, got {len}"));
                    None
                } else {
                    Some(s.clone())
                }
            }
            Some(other) => {
                self.fail(field, format!("expected string, got {}", json_type_name(other)));
                None
            }
            None => {
                self.fail(field, "field required");
                None
            }
        }
    }

    fn value(&mut self, obj: &Map<String, Value>, allow_bool: bool) -> Option<Scalar> {
        let Some(raw) = obj.get("value") else {
            self.fail("value", "field required");
            return None;
        };
        match check_scalar(raw, allow_bool) {
            Ok(v) => Some(v),
            Err(msg) => {
                self.fail("value", msg);
                None
            }
        }
    }

    fn kwargs(&mut self, obj: &Map<String, Value>) -> Option<BTreeMap<String, Scalar>> {
        let map = match obj.get("kwargs") {
            None | Some(Value::Null) => return Some(BTreeMap::new()),
            Some(Value::Object(map)) => map,
            Some(other) => {
                self.fail("kwargs", format!("expected object, got {}", json_type_name(other)));
                return None;
            }
        };
        let mut out = BTreeMap::new();
        let mut ok = true;
        for (key, raw) in map {
            match check_scalar(raw, true) {
                Ok(v) => {
                    out.insert(key.clone(), v);
                }
                Err(msg) => {
                    self.fail(&format!("kwargs.{key}"), msg);
                    ok = false;
                }
            }
        }
        ok.then_some(out)
    }
}

fn check_scalar(raw: &Value, allow_bool: bool) -> Result<Scalar, String> {
    if raw.is_boolean() && !allow_bool {
        return Err("expected int, float or string, got boolean".to_string());
    }
    match Scalar::from_json(raw) {
        Some(Scalar::Float(f)) if !f.is_finite() => Err("number must be finite".to_string()),
        Some(v) => Ok(v),
        None => Err(format!(
            "expected a scalar value, got {}",
            json_type_name(raw)
        )),
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_valid_batch() {
        let raw = vec![
            json!({"op": "set_global", "target": "Clock.bpm", "value": 120}),
            json!({"op": "player_set", "player": "p1", "param": "amp", "value": 0.7}),
            json!({"op": "player_assign", "player": "b2", "synth": "bass", "pattern": "[0,-2]",
                   "kwargs": {"dur": 1, "amp": 0.9}}),
            json!({"op": "player_stop", "player": "d1"}),
            json!({"op": "clock_clear"}),
        ];
        let cmds = validate(&raw).unwrap();
        assert_eq!(cmds.len(), 5);
        assert_eq!(cmds[4], Command::ClockClear);
    }

    #[test]
    fn rejects_zero_index_player() {
        let raw = vec![json!({"op": "player_set", "player": "p0", "param": "amp", "value": 0.2})];
        let errs = validate(&raw).unwrap_err();
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].index, Some(0));
        assert_eq!(errs[0].field.as_deref(), Some("player"));
    }

    #[test]
    fn accepts_dynamic_player_names() {
        let raw = vec![
            json!({"op": "player_set", "player": "p17", "param": "amp", "value": 0.4}),
            json!({"op": "player_set", "player": "h3", "param": "detune", "value": 0.3}),
        ];
        assert!(validate(&raw).is_ok());
    }

    #[test]
    fn collects_every_violation() {
        let raw = vec![
            json!({"op": "set_global", "target": "Tempo", "value": [1]}),
            json!({"op": "player_assign", "player": "_1", "synth": "", "pattern": "x"}),
            json!("not a command"),
        ];
        let errs = validate(&raw).unwrap_err();
        let fields: Vec<_> = errs
            .iter()
            .map(|e| (e.index, e.field.clone()))
            .collect();
        assert!(fields.contains(&(Some(0), Some("target".into()))));
        assert!(fields.contains(&(Some(0), Some("value".into()))));
        assert!(fields.contains(&(Some(1), Some("player".into()))));
        assert!(fields.contains(&(Some(1), Some("synth".into()))));
        assert!(fields.contains(&(Some(2), None)));
    }

    #[test]
    fn rejects_oversized_batch_as_a_whole() {
        let raw: Vec<Value> = (0..13).map(|_| json!({"op": "clock_clear"})).collect();
        let errs = validate(&raw).unwrap_err();
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].index, None);
        assert!(errs[0].message.contains("at most 12"));
    }

    #[test]
    fn twelve_commands_is_fine() {
        let raw: Vec<Value> = (0..12).map(|_| json!({"op": "clock_clear"})).collect();
        assert_eq!(validate(&raw).unwrap().len(), 12);
    }

    #[test]
    fn rejects_unknown_param_and_op() {
        let raw = vec![
            json!({"op": "player_set", "player": "p1", "param": "degree", "value": 1}),
            json!({"op": "boot"}),
        ];
        let errs = validate(&raw).unwrap_err();
        assert_eq!(errs.len(), 2);
        assert_eq!(errs[1].field.as_deref(), Some("op"));
    }

    #[test]
    fn synth_must_be_identifier() {
        let raw = vec![json!({"op": "player_assign", "player": "p1", "synth": "os.system",
                              "pattern": "[0]"})];
        let errs = validate(&raw).unwrap_err();
        assert_eq!(errs[0].field.as_deref(), Some("synth"));
    }

    #[test]
    fn synth_must_not_be_a_reserved_name() {
        for synth in ["exit", "eval", "getattr", "open"] {
            let raw = vec![json!({"op": "player_assign", "player": "p1", "synth": synth,
                                  "pattern": "[0]"})];
            let errs = validate(&raw).unwrap_err();
            assert_eq!(errs[0].field.as_deref(), Some("synth"));
            assert!(errs[0].message.contains("reserved"), "{}", errs[0].message);
        }
        let raw = vec![json!({"op": "player_assign", "player": "p1", "synth": "exit",
                              "pattern": "[0]"})];
        assert!(crate::emitter::validate_and_emit(&raw).is_err());
    }

    #[test]
    fn kwargs_must_be_scalars() {
        let raw = vec![json!({"op": "player_assign", "player": "p1", "synth": "pluck",
                              "pattern": "[0]", "kwargs": {"dur": [1, 2]}})];
        let errs = validate(&raw).unwrap_err();
        assert_eq!(errs[0].field.as_deref(), Some("kwargs.dur"));
    }

    #[test]
    fn set_global_rejects_boolean_but_player_set_accepts_it() {
        let raw = vec![json!({"op": "set_global", "target": "Clock.bpm", "value": true})];
        assert!(validate(&raw).is_err());
        let raw = vec![json!({"op": "player_set", "player": "p1", "param": "chop", "value": true})];
        assert!(validate(&raw).is_ok());
    }

    #[test]
    fn extra_fields_are_ignored() {
        let raw = vec![json!({"op": "set_global", "param": "bpm", "target": "Clock.bpm", "value": 150})];
        let cmds = validate(&raw).unwrap();
        assert_eq!(
            cmds[0],
            Command::SetGlobal {
                target: GlobalTarget::ClockBpm,
                value: Scalar::Int(150)
            }
        );
    }

    #[test]
    fn payload_shapes() {
        assert!(validate_payload(&json!({"commands": [{"op": "clock_clear"}]})).is_ok());
        assert!(validate_payload(&json!([{"op": "clock_clear"}])).is_ok());
        let errs = validate_payload(&json!("clock_clear")).unwrap_err();
        assert!(errs[0].message.contains("string"));
    }

    #[test]
    fn error_display_is_one_based() {
        let e = ValidationError::at(2, "player", "bad");
        assert_eq!(e.to_string(), "command #3.player: bad");
    }
}
