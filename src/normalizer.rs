//! Best-effort repair of raw command batches.
//!
//! Model output frequently arrives as fragments: an assign stub followed by a
//! handful of `player_set` calls meant to complete it. [`normalize`] streams
//! over the batch once, folding those fragments into a per-player
//! [`PendingAssign`], then finalizes every pending group in first-seen order.
//! It never fails; everything it cannot use is dropped with a note.

use indexmap::IndexMap;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::pyrepr;
use crate::validation::json_type_name;

/// `player_set` params whose value is really the assign pattern.
const PATTERN_PARAMS: &[&str] = &["pattern", "degree", "note"];
/// `player_set` params that belong in the assign kwargs.
const KWARG_PARAMS: &[&str] = &["dur", "oct", "amp", "lpf", "hpf", "pan", "room", "mix"];
/// Legacy `player_set` param names and their canonical replacement.
const PARAM_ALIASES: &[(&str, &str)] = &[("cutoff", "lpf"), ("filter", "lpf")];

pub const DEFAULT_PATTERN: &str = "[0]";
const DEFAULT_BPM: i64 = 120;

#[derive(Debug, Default)]
struct PendingAssign {
    synth: Option<String>,
    pattern: Option<String>,
    kwargs: Map<String, Value>,
}

/// Repair a raw batch. Returns the corrected records and one note per repair,
/// fold or drop.
pub fn normalize(raw: &[Value]) -> (Vec<Value>, Vec<String>) {
    let mut out = Vec::with_capacity(raw.len());
    let mut notes = Vec::new();
    let mut pending: IndexMap<String, PendingAssign> = IndexMap::new();

    for (i, entry) in raw.iter().enumerate() {
        let n = i + 1;
        let Some(record) = entry.as_object() else {
            notes.push(format!(
                "Dropped command #{n}: expected object, got {}",
                json_type_name(entry)
            ));
            continue;
        };
        let mut record = record.clone();

        match record.get("op").and_then(Value::as_str) {
            Some("set_global")
                if record.get("param").and_then(Value::as_str) == Some("bpm")
                    && !record.contains_key("target") =>
            {
                let value = record.remove("value").unwrap_or(json!(DEFAULT_BPM));
                out.push(json!({ "op": "set_global", "target": "Clock.bpm", "value": value }));
                notes.push(format!(
                    "Repaired command #{n}: set_global.param=bpm -> target=Clock.bpm"
                ));
            }
            Some("player_assign") => {
                assign(n, &record, &mut out, &mut notes, &mut pending);
            }
            Some("player_set") => {
                player_set(n, record, &mut out, &mut notes, &mut pending);
            }
            _ => out.push(Value::Object(record)),
        }
    }

    for (player, acc) in pending {
        let Some(synth) = acc.synth else {
            notes.push(format!("Dropped pending assign for {player}: missing synth"));
            continue;
        };
        let pattern = match acc.pattern {
            Some(p) if !p.is_empty() => p,
            _ => {
                notes.push(format!(
                    "Applied default pattern for {player}: {DEFAULT_PATTERN}"
                ));
                DEFAULT_PATTERN.to_string()
            }
        };
        out.push(json!({
            "op": "player_assign",
            "player": player,
            "synth": synth,
            "pattern": pattern,
            "kwargs": acc.kwargs,
        }));
        notes.push(format!(
            "Synthesized player_assign for {player} from malformed command group"
        ));
    }

    debug!(input = raw.len(), output = out.len(), notes = notes.len(), "normalized batch");
    (out, notes)
}

fn assign(
    n: usize,
    record: &Map<String, Value>,
    out: &mut Vec<Value>,
    notes: &mut Vec<String>,
    pending: &mut IndexMap<String, PendingAssign>,
) {
    let Some(player) = record.get("player").and_then(Value::as_str) else {
        notes.push(format!(
            "Dropped command #{n}: player_assign missing valid player"
        ));
        return;
    };

    let mut synth = non_empty_str(record.get("synth"));
    if synth.is_none() {
        if let Some(legacy) = non_empty_str(record.get("value")) {
            synth = Some(legacy);
            notes.push(format!("Repaired command #{n}: player_assign.value -> synth"));
        }
    }
    let pattern = record.get("pattern").and_then(Value::as_str);
    let kwargs = match record.get("kwargs") {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };

    match (synth, pattern) {
        (Some(synth), Some(pattern)) => {
            out.push(json!({
                "op": "player_assign",
                "player": player,
                "synth": synth,
                "pattern": pattern,
                "kwargs": kwargs,
            }));
        }
        (Some(synth), None) => {
            let acc = pending.entry(player.to_string()).or_default();
            if acc.synth.is_none() {
                acc.synth = Some(synth);
            }
            acc.kwargs.extend(kwargs);
            notes.push(format!(
                "Queued malformed player_assign for {player} and waiting for missing pattern/kwargs"
            ));
        }
        (None, _) => {
            notes.push(format!(
                "Dropped command #{n}: player_assign missing usable synth"
            ));
        }
    }
}

fn player_set(
    n: usize,
    mut record: Map<String, Value>,
    out: &mut Vec<Value>,
    notes: &mut Vec<String>,
    pending: &mut IndexMap<String, PendingAssign>,
) {
    let mut param = record
        .get("param")
        .and_then(Value::as_str)
        .map(str::to_string);

    if let Some(p) = &param {
        if let Some((alias, canonical)) = PARAM_ALIASES.iter().find(|(a, _)| a == p) {
            record.insert("param".into(), json!(canonical));
            notes.push(format!(
                "Repaired command #{n}: player_set.param {alias} -> {canonical}"
            ));
            param = Some((*canonical).to_string());
        }
    }

    let player = record.get("player").and_then(Value::as_str);
    if let (Some(player), Some(param)) = (player, param.as_deref()) {
        if let Some(acc) = pending.get_mut(player) {
            let value = record.get("value").cloned().unwrap_or(Value::Null);
            if PATTERN_PARAMS.contains(&param) {
                acc.pattern = Some(pyrepr::value_str(&value));
                notes.push(format!(
                    "Folded command #{n}: {player}.{param} into player_assign.pattern"
                ));
                return;
            }
            if KWARG_PARAMS.contains(&param) {
                acc.kwargs.insert(param.to_string(), value);
                notes.push(format!(
                    "Folded command #{n}: {player}.{param} into player_assign.kwargs"
                ));
                return;
            }
        }
    }

    out.push(Value::Object(record));
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
