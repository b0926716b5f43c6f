//! Closed command vocabulary for live patches.
//!
//! Every patch is a short batch of [`Command`]s. The wire shape is a JSON
//! object carrying an `op` tag; see [`crate::validation`] for the checks that
//! turn loosely-typed JSON into these types.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Upper bound on commands per batch.
pub const MAX_BATCH_COMMANDS: usize = 12;
pub const MAX_SYNTH_LEN: usize = 32;
pub const MAX_PATTERN_LEN: usize = 256;
pub const MAX_GLOBAL_STRING_LEN: usize = 64;

// ── Global targets ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
pub enum GlobalTarget {
    #[serde(rename = "Clock.bpm")]
    ClockBpm,
    #[serde(rename = "Scale.default")]
    ScaleDefault,
    #[serde(rename = "Root.default")]
    RootDefault,
}

impl GlobalTarget {
    pub fn all() -> &'static [GlobalTarget] {
        &[
            GlobalTarget::ClockBpm,
            GlobalTarget::ScaleDefault,
            GlobalTarget::RootDefault,
        ]
    }

    /// Runtime-facing name, also the wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            GlobalTarget::ClockBpm => "Clock.bpm",
            GlobalTarget::ScaleDefault => "Scale.default",
            GlobalTarget::RootDefault => "Root.default",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::all().iter().copied().find(|t| t.as_str() == s)
    }
}

impl fmt::Display for GlobalTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Player parameters ────────────────────────────────────────────

/// Performance parameters a `player_set` may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum PlayerParam {
    Amp,
    Dur,
    Sus,
    Oct,
    Lpf,
    Hpf,
    Pan,
    Room,
    Mix,
    Echo,
    Delay,
    Chop,
    Sample,
    Rate,
    Detune,
    Drive,
    Shape,
    Blur,
    Formant,
    Coarse,
    Spin,
}

impl PlayerParam {
    pub fn all() -> &'static [PlayerParam] {
        &[
            PlayerParam::Amp,
            PlayerParam::Dur,
            PlayerParam::Sus,
            PlayerParam::Oct,
            PlayerParam::Lpf,
            PlayerParam::Hpf,
            PlayerParam::Pan,
            PlayerParam::Room,
            PlayerParam::Mix,
            PlayerParam::Echo,
            PlayerParam::Delay,
            PlayerParam::Chop,
            PlayerParam::Sample,
            PlayerParam::Rate,
            PlayerParam::Detune,
            PlayerParam::Drive,
            PlayerParam::Shape,
            PlayerParam::Blur,
            PlayerParam::Formant,
            PlayerParam::Coarse,
            PlayerParam::Spin,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PlayerParam::Amp => "amp",
            PlayerParam::Dur => "dur",
            PlayerParam::Sus => "sus",
            PlayerParam::Oct => "oct",
            PlayerParam::Lpf => "lpf",
            PlayerParam::Hpf => "hpf",
            PlayerParam::Pan => "pan",
            PlayerParam::Room => "room",
            PlayerParam::Mix => "mix",
            PlayerParam::Echo => "echo",
            PlayerParam::Delay => "delay",
            PlayerParam::Chop => "chop",
            PlayerParam::Sample => "sample",
            PlayerParam::Rate => "rate",
            PlayerParam::Detune => "detune",
            PlayerParam::Drive => "drive",
            PlayerParam::Shape => "shape",
            PlayerParam::Blur => "blur",
            PlayerParam::Formant => "formant",
            PlayerParam::Coarse => "coarse",
            PlayerParam::Spin => "spin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::all().iter().copied().find(|p| p.as_str() == s)
    }
}

impl fmt::Display for PlayerParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Player names ─────────────────────────────────────────────────

static PLAYER_NAME: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-z][1-9][0-9]*$").ok());

/// Returns true for names like `p1`, `h3`, `b12`: one lowercase letter and a
/// positive index without a leading zero.
pub fn is_player_name(s: &str) -> bool {
    PLAYER_NAME.as_ref().is_some_and(|re| re.is_match(s))
}

/// A player slot name that has passed [`is_player_name`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(try_from = "String", into = "String")]
pub struct PlayerName(String);

impl PlayerName {
    pub fn new(s: impl Into<String>) -> Option<Self> {
        let s = s.into();
        is_player_name(&s).then_some(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PlayerName {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        PlayerName::new(value.clone()).ok_or_else(|| format!("player {value} is not allowed"))
    }
}

impl From<PlayerName> for String {
    fn from(p: PlayerName) -> String {
        p.0
    }
}

impl fmt::Display for PlayerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Scalar values ────────────────────────────────────────────────

/// A single literal value carried by a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Scalar {
    /// Convert a JSON value, returning `None` for null, arrays, objects, and
    /// numbers that do not fit.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(Scalar::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Scalar::Int)
                .or_else(|| n.as_f64().map(Scalar::Float)),
            serde_json::Value::String(s) => Some(Scalar::Str(s.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Scalar::Bool(b) => serde_json::Value::Bool(*b),
            Scalar::Int(i) => serde_json::Value::from(*i),
            Scalar::Float(f) => serde_json::Number::from_f64(*f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Scalar::Str(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Str(v.to_string())
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

// ── Commands ─────────────────────────────────────────────────────

/// One validated patch instruction.
/// Typed union: adding a variant without handling it is a compiler error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    SetGlobal {
        target: GlobalTarget,
        value: Scalar,
    },
    PlayerAssign {
        player: PlayerName,
        synth: String,
        pattern: String,
        #[serde(default)]
        kwargs: BTreeMap<String, Scalar>,
    },
    PlayerSet {
        player: PlayerName,
        param: PlayerParam,
        value: Scalar,
    },
    PlayerStop {
        player: PlayerName,
    },
    ClockClear,
}

impl Command {
    /// Wire tag of this command.
    pub fn op(&self) -> &'static str {
        match self {
            Command::SetGlobal { .. } => "set_global",
            Command::PlayerAssign { .. } => "player_assign",
            Command::PlayerSet { .. } => "player_set",
            Command::PlayerStop { .. } => "player_stop",
            Command::ClockClear => "clock_clear",
        }
    }

    /// Human-readable description for logs and notes.
    pub fn description(&self) -> String {
        match self {
            Command::SetGlobal { target, .. } => format!("Set {target}"),
            Command::PlayerAssign { player, synth, .. } => format!("Assign {synth} to {player}"),
            Command::PlayerSet { player, param, .. } => format!("Set {player}.{param}"),
            Command::PlayerStop { player } => format!("Stop {player}"),
            Command::ClockClear => "Clear clock".to_string(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Envelope the generation backends are asked to return.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PatchEnvelope {
    pub commands: Vec<Command>,
}

/// JSON schema of [`PatchEnvelope`], embedded in generation requests.
pub fn command_schema() -> serde_json::Value {
    serde_json::to_value(schemars::schema_for!(PatchEnvelope)).unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn player_name_grammar() {
        for ok in ["p1", "h3", "b12", "d40", "z9"] {
            assert!(is_player_name(ok), "{ok} should be accepted");
        }
        for bad in ["p0", "p01", "P1", "_1", "pp1", "p", "1", "p1a", ""] {
            assert!(!is_player_name(bad), "{bad} should be rejected");
        }
    }

    #[test]
    fn command_wire_shape() {
        let cmd = Command::PlayerSet {
            player: PlayerName::new("p1").unwrap(),
            param: PlayerParam::Lpf,
            value: Scalar::Int(1500),
        };
        let json = cmd.to_json();
        assert_eq!(json["op"], "player_set");
        assert_eq!(json["param"], "lpf");
        assert_eq!(json["value"], 1500);

        let back: Command = serde_json::from_value(json).unwrap();
        assert_eq!(back, cmd);
    }

    #[test]
    fn clock_clear_has_only_op() {
        let json = Command::ClockClear.to_json();
        assert_eq!(json, serde_json::json!({ "op": "clock_clear" }));
    }

    #[test]
    fn deserialize_rejects_bad_player() {
        let res: Result<Command, _> =
            serde_json::from_value(serde_json::json!({ "op": "player_stop", "player": "p0" }));
        assert!(res.is_err());
    }

    #[test]
    fn global_target_names() {
        assert_eq!(GlobalTarget::parse("Clock.bpm"), Some(GlobalTarget::ClockBpm));
        assert_eq!(GlobalTarget::parse("bpm"), None);
        assert_eq!(
            serde_json::to_value(GlobalTarget::RootDefault).unwrap(),
            "Root.default"
        );
    }

    #[test]
    fn param_names_round_trip_through_serde() {
        for p in PlayerParam::all() {
            let json = serde_json::to_value(p).unwrap();
            assert_eq!(json, p.as_str());
        }
    }

    #[test]
    fn schema_mentions_every_op() {
        let schema = command_schema().to_string();
        for op in ["set_global", "player_assign", "player_set", "player_stop", "clock_clear"] {
            assert!(schema.contains(op), "schema missing {op}");
        }
    }
}
