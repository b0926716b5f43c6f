//! Per-session view of what the runtime is currently playing.
//!
//! Only the revert engine mutates players and globals during a patch; song
//! loading replaces them wholesale.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::command::{GlobalTarget, PlayerName, Scalar};
use crate::sandbox::ast::{BinOp, Expr, ExprKind, StmtKind};
use crate::sandbox::error::ParseError;
use crate::sandbox::{self, unparse};

/// Recorded state of one player slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerState {
    pub synth: Option<String>,
    pub pattern: Option<String>,
    pub kwargs: BTreeMap<String, Scalar>,
    /// Latest value per parameter, flattened alongside the fields above.
    pub values: BTreeMap<String, Scalar>,
    pub last_assign_at: Option<DateTime<Utc>>,
}

/// Keys of [`PlayerState`]'s own fields; a parameter with one of these names
/// is only visible through `kwargs`.
const RESERVED_PLAYER_KEYS: &[&str] = &["synth", "pattern", "kwargs", "last_assign_at"];

impl Serialize for PlayerState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        if let Some(synth) = &self.synth {
            map.serialize_entry("synth", synth)?;
        }
        if let Some(pattern) = &self.pattern {
            map.serialize_entry("pattern", pattern)?;
        }
        map.serialize_entry("kwargs", &self.kwargs)?;
        for (key, value) in &self.values {
            if !RESERVED_PLAYER_KEYS.contains(&key.as_str()) {
                map.serialize_entry(key, value)?;
            }
        }
        if let Some(at) = &self.last_assign_at {
            map.serialize_entry("last_assign_at", at)?;
        }
        map.end()
    }
}

impl PlayerState {
    /// A player that was assigned from `synth`, `pattern`, and `kwargs` just now.
    pub fn assigned(synth: &str, pattern: &str, kwargs: &BTreeMap<String, Scalar>) -> Self {
        Self {
            synth: Some(synth.to_string()),
            pattern: Some(pattern.to_string()),
            kwargs: kwargs.clone(),
            values: kwargs.clone(),
            last_assign_at: Some(Utc::now()),
        }
    }

    /// Synth and pattern, when both are recorded and non-empty.
    pub fn playing(&self) -> Option<(&str, &str)> {
        match (self.synth.as_deref(), self.pattern.as_deref()) {
            (Some(synth), Some(pattern)) if !synth.is_empty() && !pattern.is_empty() => {
                Some((synth, pattern))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionState {
    pub globals: IndexMap<GlobalTarget, Scalar>,
    pub players: IndexMap<PlayerName, PlayerState>,
    pub song_path: Option<String>,
    pub clock_started_at: Option<DateTime<Utc>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace globals and players with what a song file sets up.
    ///
    /// On a parse failure the globals are kept, players are cleared, and the
    /// errors are returned. The song path and clock start are recorded either way.
    pub fn load_song(&mut self, path: &str, source: &str) -> Result<(), Vec<ParseError>> {
        self.song_path = Some(path.to_string());
        self.clock_started_at = Some(Utc::now());
        match extract_song_state(source) {
            Ok((globals, players)) => {
                debug!(
                    path,
                    globals = globals.len(),
                    players = players.len(),
                    "loaded song state"
                );
                self.globals = globals;
                self.players = players;
                Ok(())
            }
            Err(errors) => {
                warn!(path, "loaded song but failed to parse sequence state");
                self.players.clear();
                Err(errors)
            }
        }
    }

    /// The runtime clock was cleared.
    pub fn mark_stopped(&mut self) {
        self.clock_started_at = None;
    }

    pub fn mark_started(&mut self) {
        if self.clock_started_at.is_none() {
            self.clock_started_at = Some(Utc::now());
        }
    }

    /// `{globals, players}` as sent to generation backends.
    pub fn snapshot(&self) -> Value {
        json!({
            "globals": self.globals,
            "players": self.players,
        })
    }
}

/// Globals and players a song source sets up at top level.
pub fn extract_song_state(
    source: &str,
) -> Result<(IndexMap<GlobalTarget, Scalar>, IndexMap<PlayerName, PlayerState>), Vec<ParseError>>
{
    let module = sandbox::parse_module(source)?;
    let mut globals = IndexMap::new();
    let mut players = IndexMap::new();

    for stmt in &module.body {
        match &stmt.kind {
            StmtKind::Assign { targets, value } => {
                let [target] = targets.as_slice() else {
                    continue;
                };
                let Some(target) = global_target(target) else {
                    continue;
                };
                globals.insert(target, literal_or_source(source, value));
            }
            StmtKind::Expr(expr) => {
                if let Some((player, state)) = player_assignment(source, expr) {
                    players.insert(player, state);
                }
            }
            _ => {}
        }
    }
    Ok((globals, players))
}

fn global_target(expr: &Expr) -> Option<GlobalTarget> {
    let ExprKind::Attribute { value, attr, .. } = &expr.kind else {
        return None;
    };
    let ExprKind::Name { id, .. } = &value.kind else {
        return None;
    };
    GlobalTarget::parse(&format!("{id}.{attr}"))
}

fn player_assignment(source: &str, expr: &Expr) -> Option<(PlayerName, PlayerState)> {
    let ExprKind::BinOp {
        left,
        op: BinOp::RShift,
        right,
    } = &expr.kind
    else {
        return None;
    };
    let ExprKind::Name { id, .. } = &left.kind else {
        return None;
    };
    let player = PlayerName::new(id.as_str())?;
    let ExprKind::Call {
        func,
        args,
        keywords,
    } = &right.kind
    else {
        return None;
    };

    let synth = match &func.kind {
        ExprKind::Name { id, .. } => id.clone(),
        ExprKind::Attribute { attr, .. } => attr.clone(),
        _ => "play".to_string(),
    };
    let pattern = args
        .first()
        .and_then(|arg| arg.span.slice(source))
        .map(str::trim)
        .unwrap_or_default();
    let kwargs: BTreeMap<String, Scalar> = keywords
        .iter()
        .filter_map(|kw| {
            let name = kw.arg.as_ref()?;
            Some((name.clone(), literal_or_source(source, &kw.value)))
        })
        .collect();

    Some((player, PlayerState::assigned(&synth, pattern, &kwargs)))
}

/// Scalar literal if the expression is one, otherwise its trimmed source text.
fn literal_or_source(source: &str, expr: &Expr) -> Scalar {
    unparse::literal_eval(expr)
        .as_ref()
        .and_then(Scalar::from_json)
        .unwrap_or_else(|| {
            Scalar::Str(
                expr.span
                    .slice(source)
                    .map(str::trim)
                    .unwrap_or_default()
                    .to_string(),
            )
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    const SONG: &str = "\
Clock.bpm = 96
Scale.default = Scale.minor
Root.default = 'E'
Clock.meter = (4, 4)
p1 >> pluck([0, 2, 4], dur=1/2, amp=0.8, oct=5)
d1 >> play(\"x-o-\", sample=2)
b1 >> Sample.bass(P[0, 3] + var([0, 2], 8), **extra)
p0 >> pluck([0])
helper = 3
";

    #[test]
    fn extracts_globals_and_players() {
        let (globals, players) = extract_song_state(SONG).unwrap();
        assert_eq!(globals[&GlobalTarget::ClockBpm], Scalar::Int(96));
        assert_eq!(
            globals[&GlobalTarget::ScaleDefault],
            Scalar::Str("Scale.minor".into())
        );
        assert_eq!(globals[&GlobalTarget::RootDefault], Scalar::Str("E".into()));
        assert_eq!(globals.len(), 3);

        let names: Vec<&str> = players.keys().map(PlayerName::as_str).collect();
        assert_eq!(names, ["p1", "d1", "b1"]);

        let p1 = &players[&PlayerName::new("p1").unwrap()];
        assert_eq!(p1.playing(), Some(("pluck", "[0, 2, 4]")));
        assert_eq!(p1.kwargs["dur"], Scalar::Str("1/2".into()));
        assert_eq!(p1.kwargs["amp"], Scalar::Float(0.8));
        assert_eq!(p1.values["oct"], Scalar::Int(5));

        let d1 = &players[&PlayerName::new("d1").unwrap()];
        assert_eq!(d1.playing(), Some(("play", "\"x-o-\"")));

        let b1 = &players[&PlayerName::new("b1").unwrap()];
        assert_eq!(b1.synth.as_deref(), Some("bass"));
        assert_eq!(b1.pattern.as_deref(), Some("P[0, 3] + var([0, 2], 8)"));
        assert!(b1.kwargs.is_empty());
    }

    #[test]
    fn failed_parse_keeps_globals_and_clears_players() {
        let mut state = SessionState::new();
        state.load_song("songs/a.py", SONG).unwrap();
        assert!(state.clock_started_at.is_some());
        assert_eq!(state.players.len(), 3);

        let err = state.load_song("songs/b.py", "p1 >> pluck([0, 2)\n");
        assert!(err.is_err());
        assert!(state.players.is_empty());
        assert_eq!(state.globals.len(), 3);
        assert_eq!(state.song_path.as_deref(), Some("songs/b.py"));
    }

    #[test]
    fn snapshot_flattens_player_values() {
        let mut state = SessionState::new();
        state.load_song("s.py", "Clock.bpm = 120\np1 >> pluck([0], dur=0.5)\n").unwrap();
        let snap = state.snapshot();
        assert_eq!(snap["globals"]["Clock.bpm"], 120);
        assert_eq!(snap["players"]["p1"]["synth"], "pluck");
        assert_eq!(snap["players"]["p1"]["kwargs"]["dur"], 0.5);
        assert_eq!(snap["players"]["p1"]["dur"], 0.5);

        state.mark_stopped();
        assert!(state.clock_started_at.is_none());
    }

    #[test]
    fn params_named_like_fields_do_not_shadow_them() {
        let kwargs = BTreeMap::from([
            ("pattern".to_string(), Scalar::Str("x".into())),
            ("synth".to_string(), Scalar::Int(3)),
            ("amp".to_string(), Scalar::Float(0.5)),
        ]);
        let mut state = SessionState::new();
        state.players.insert(
            PlayerName::new("p1").unwrap(),
            PlayerState::assigned("pluck", "[0]", &kwargs),
        );
        let snap = state.snapshot();
        let p1 = &snap["players"]["p1"];
        assert_eq!(p1["synth"], "pluck");
        assert_eq!(p1["pattern"], "[0]");
        assert_eq!(p1["amp"], 0.5);
        assert_eq!(p1["kwargs"]["pattern"], "x");

        let text = serde_json::to_string(&state.players[0]).unwrap();
        assert_eq!(text.matches("\"pattern\"").count(), 2);
        assert_eq!(text.matches("\"synth\"").count(), 2);
    }
}
