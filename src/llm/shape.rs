//! Loose shaping of model output before normalization.
//!
//! Models drift from the requested shape in a handful of predictable ways:
//! alias field names, `set_global` by parameter name, whole synth calls
//! stuffed into `pattern`. These are rewritten here. Nothing is invented:
//! missing synths and patterns are left for the normalizer.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::sandbox::ast::ExprKind;
use crate::sandbox::{self, unparse};

/// Pattern used when a call-shaped pattern has no positional argument.
pub const CALL_DEFAULT_PATTERN: &str = "[0,2,4,7]";

static CALL_SHAPE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_]\w*\(.*\)$").ok());

fn global_alias(name: &str) -> Option<&'static str> {
    match name {
        "bpm" | "tempo" | "clock.bpm" => Some("Clock.bpm"),
        "scale" | "scale.default" => Some("Scale.default"),
        "root" | "root.default" => Some("Root.default"),
        _ => None,
    }
}

fn param_alias(name: &str) -> Option<&'static str> {
    match name {
        "cutoff" | "filter" => Some("lpf"),
        "tempo" => Some("dur"),
        _ => None,
    }
}

/// Loose text of a field, the way a dynamic language would stringify it.
fn loose_str(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn absent(record: &Map<String, Value>, key: &str) -> bool {
    record.get(key).is_none_or(Value::is_null)
}

/// Shape raw model records. Non-objects and records without an `op` are dropped.
pub fn shape_commands(raw: &[Value]) -> Vec<Value> {
    raw.iter()
        .filter_map(|entry| {
            let record = entry.as_object()?;
            let op = record.get("op").map(loose_str)?.trim().to_string();
            if op.is_empty() {
                return None;
            }
            let mut record = record.clone();
            match op.as_str() {
                "set_global" => shape_set_global(&mut record),
                "player_assign" => shape_player_assign(&mut record),
                "player_set" => shape_player_set(&mut record),
                _ => {}
            }
            Some(Value::Object(record))
        })
        .collect()
}

fn shape_set_global(record: &mut Map<String, Value>) {
    if !record.contains_key("value") {
        if let Some(v) = record.get("val").cloned() {
            record.insert("value".into(), v);
        }
    }
    if absent(record, "target") {
        let alias = record
            .get("param")
            .or_else(|| record.get("name"))
            .map(loose_str)
            .unwrap_or_default();
        if let Some(target) = global_alias(alias.trim().to_lowercase().as_str()) {
            record.insert("target".into(), Value::from(target));
        }
    }
}

fn shape_player_assign(record: &mut Map<String, Value>) {
    if !record.contains_key("synth") {
        if let Some(v) = record.get("voice").cloned() {
            record.insert("synth".into(), v);
        }
    }
    if !record.get("kwargs").is_some_and(Value::is_object) {
        record.insert("kwargs".into(), Value::Object(Map::new()));
    }

    let Some((synth, pattern, kwargs)) = record.get("pattern").and_then(parse_call_pattern)
    else {
        return;
    };
    if !record.contains_key("synth") {
        record.insert("synth".into(), Value::String(synth));
    }
    record.insert("pattern".into(), Value::String(pattern));
    if let Some(Value::Object(existing)) = record.get_mut("kwargs") {
        existing.extend(kwargs);
    }
}

fn shape_player_set(record: &mut Map<String, Value>) {
    let alias = record.get("param").map(loose_str).unwrap_or_default();
    if let Some(param) = param_alias(alias.trim().to_lowercase().as_str()) {
        record.insert("param".into(), Value::from(param));
    }
}

/// Unpack `synth(pattern, k=v, ...)` into its parts.
fn parse_call_pattern(pattern: &Value) -> Option<(String, String, Map<String, Value>)> {
    let source = pattern.as_str()?.trim();
    if !CALL_SHAPE.as_ref()?.is_match(source) {
        return None;
    }
    let expr = sandbox::parse_expression(source).ok()?;
    let ExprKind::Call {
        func,
        args,
        keywords,
    } = expr.kind
    else {
        return None;
    };
    let ExprKind::Name { id: synth, .. } = func.kind else {
        return None;
    };

    let pattern = args
        .first()
        .map_or_else(|| CALL_DEFAULT_PATTERN.to_string(), unparse::unparse);
    let kwargs = keywords
        .iter()
        .filter_map(|kw| {
            let name = kw.arg.clone()?;
            let value = unparse::literal_eval(&kw.value)
                .unwrap_or_else(|| Value::String(unparse::unparse(&kw.value)));
            Some((name, value))
        })
        .collect();
    Some((synth, pattern, kwargs))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shape(raw: Value) -> Vec<Value> {
        shape_commands(raw.as_array().unwrap())
    }

    #[test]
    fn drops_non_records_and_missing_ops() {
        let out = shape(json!([1, "x", {"player": "p1"}, {"op": "  "}, {"op": "clock_clear"}]));
        assert_eq!(out, vec![json!({"op": "clock_clear"})]);
    }

    #[test]
    fn set_global_aliases() {
        let out = shape(json!([
            {"op": "set_global", "param": "bpm", "value": 150},
            {"op": "set_global", "name": " Scale ", "val": "minor"},
            {"op": "set_global", "param": "swing", "value": 1}
        ]));
        assert_eq!(
            out[0],
            json!({"op": "set_global", "param": "bpm", "value": 150, "target": "Clock.bpm"})
        );
        assert_eq!(out[1]["target"], "Scale.default");
        assert_eq!(out[1]["value"], "minor");
        assert!(out[2].get("target").is_none());
    }

    #[test]
    fn unpacks_call_patterns() {
        let out = shape(json!([
            {"op": "player_assign", "player": "p1", "pattern": "pluck('tri', dur=0.25)"}
        ]));
        assert_eq!(out[0]["synth"], "pluck");
        assert_eq!(out[0]["pattern"], "'tri'");
        assert_eq!(out[0]["kwargs"]["dur"], 0.25);
    }

    #[test]
    fn call_pattern_keeps_explicit_synth_and_merges_kwargs() {
        let out = shape(json!([
            {"op": "player_assign", "player": "p1", "synth": "bass",
             "pattern": "keys([0,2,4], amp=var([0.5,1],4))", "kwargs": {"oct": 4}}
        ]));
        assert_eq!(out[0]["synth"], "bass");
        assert_eq!(out[0]["pattern"], "[0, 2, 4]");
        assert_eq!(out[0]["kwargs"], json!({"oct": 4, "amp": "var([0.5, 1], 4)"}));
    }

    #[test]
    fn call_without_args_gets_default_pattern() {
        let out = shape(json!([{"op": "player_assign", "player": "p2", "pattern": "blip()"}]));
        assert_eq!(out[0]["pattern"], CALL_DEFAULT_PATTERN);
        assert_eq!(out[0]["synth"], "blip");
    }

    #[test]
    fn assign_aliases_and_no_invented_fields() {
        let out = shape(json!([
            {"op": "player_assign", "player": "p1", "voice": "pads", "kwargs": "nope"},
            {"op": "player_assign", "player": "p2", "value": "pluck"}
        ]));
        assert_eq!(out[0]["synth"], "pads");
        assert_eq!(out[0]["kwargs"], json!({}));
        assert!(out[0].get("pattern").is_none());
        assert!(out[1].get("synth").is_none());
        assert!(out[1].get("pattern").is_none());
    }

    #[test]
    fn plain_patterns_are_untouched() {
        let out = shape(json!([
            {"op": "player_assign", "player": "d1", "synth": "play", "pattern": "x-o-"},
            {"op": "player_assign", "player": "p1", "synth": "pluck", "pattern": "P[0,2](1)"}
        ]));
        assert_eq!(out[0]["pattern"], "x-o-");
        assert_eq!(out[1]["pattern"], "P[0,2](1)");
    }

    #[test]
    fn player_set_aliases() {
        let out = shape(json!([
            {"op": "player_set", "player": "p1", "param": "Cutoff", "value": 800},
            {"op": "player_set", "player": "p1", "param": "tempo", "value": 0.5},
            {"op": "player_set", "player": "p1", "param": "amp", "value": 1}
        ]));
        assert_eq!(out[0]["param"], "lpf");
        assert_eq!(out[1]["param"], "dur");
        assert_eq!(out[2]["param"], "amp");
    }
}
