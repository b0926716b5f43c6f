//! Inverse batches for applied patches.

use tracing::debug;

use crate::command::{Command, PlayerName};
use crate::session::{PlayerState, SessionState};

/// Record `applied` into `state` and return the commands that undo it.
///
/// Entries are produced in the same order as `applied`, each computed against
/// the state as it stood right before that command. Commands with no known
/// prior value contribute nothing, and `clock_clear` is never reversible.
pub fn compute_revert(state: &mut SessionState, applied: &[Command]) -> Vec<Command> {
    let mut revert = Vec::new();
    for command in applied {
        match command {
            Command::SetGlobal { target, value } => {
                if let Some(previous) = state.globals.insert(*target, value.clone()) {
                    revert.push(Command::SetGlobal {
                        target: *target,
                        value: previous,
                    });
                }
            }
            Command::PlayerSet {
                player,
                param,
                value,
            } => {
                let slot = state.players.entry(player.clone()).or_default();
                let key = param.as_str().to_string();
                if let Some(previous) = slot.values.insert(key.clone(), value.clone()) {
                    revert.push(Command::PlayerSet {
                        player: player.clone(),
                        param: *param,
                        value: previous,
                    });
                }
                slot.kwargs.insert(key, value.clone());
            }
            Command::PlayerAssign {
                player,
                synth,
                pattern,
                kwargs,
            } => {
                revert.push(
                    restore(player, state.players.get(player)).unwrap_or_else(|| {
                        Command::PlayerStop {
                            player: player.clone(),
                        }
                    }),
                );
                state
                    .players
                    .insert(player.clone(), PlayerState::assigned(synth, pattern, kwargs));
                state.mark_started();
            }
            Command::PlayerStop { player } => {
                if let Some(cmd) = restore(player, state.players.get(player)) {
                    revert.push(cmd);
                }
                state.players.shift_remove(player);
            }
            Command::ClockClear => state.mark_stopped(),
        }
    }
    debug!(
        applied = applied.len(),
        revert = revert.len(),
        "computed revert batch"
    );
    revert
}

fn restore(player: &PlayerName, prior: Option<&PlayerState>) -> Option<Command> {
    let prior = prior?;
    let (synth, pattern) = prior.playing()?;
    Some(Command::PlayerAssign {
        player: player.clone(),
        synth: synth.to_string(),
        pattern: pattern.to_string(),
        kwargs: prior.kwargs.clone(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::command::{GlobalTarget, PlayerName, PlayerParam, Scalar};
    use std::collections::BTreeMap;

    fn p(name: &str) -> PlayerName {
        PlayerName::new(name).unwrap()
    }

    fn assign(player: &str, synth: &str, pattern: &str) -> Command {
        Command::PlayerAssign {
            player: p(player),
            synth: synth.into(),
            pattern: pattern.into(),
            kwargs: BTreeMap::from([("dur".to_string(), Scalar::Float(0.5))]),
        }
    }

    fn bpm(value: i64) -> Command {
        Command::SetGlobal {
            target: GlobalTarget::ClockBpm,
            value: Scalar::Int(value),
        }
    }

    #[test]
    fn first_assign_reverts_to_stop() {
        let mut state = SessionState::new();
        let revert = compute_revert(&mut state, &[assign("p1", "pluck", "[0, 2]")]);
        assert_eq!(revert, vec![Command::PlayerStop { player: p("p1") }]);
        assert!(state.clock_started_at.is_some());
        assert_eq!(state.players[&p("p1")].values["dur"], Scalar::Float(0.5));
    }

    #[test]
    fn reassign_restores_previous_voice() {
        let mut state = SessionState::new();
        compute_revert(&mut state, &[assign("p1", "pluck", "[0, 2]")]);
        let revert = compute_revert(&mut state, &[assign("p1", "bass", "[0]")]);
        assert_eq!(revert, vec![assign("p1", "pluck", "[0, 2]")]);
    }

    #[test]
    fn globals_without_prior_value_are_skipped() {
        let mut state = SessionState::new();
        assert!(compute_revert(&mut state, &[bpm(120)]).is_empty());
        assert_eq!(compute_revert(&mut state, &[bpm(140)]), vec![bpm(120)]);
    }

    #[test]
    fn player_set_records_value_and_kwarg() {
        let mut state = SessionState::new();
        let set = |v: f64| Command::PlayerSet {
            player: p("b2"),
            param: PlayerParam::Lpf,
            value: Scalar::Float(v),
        };
        assert!(compute_revert(&mut state, &[set(800.0)]).is_empty());
        assert_eq!(compute_revert(&mut state, &[set(1200.0)]), vec![set(800.0)]);
        let slot = &state.players[&p("b2")];
        assert_eq!(slot.kwargs["lpf"], Scalar::Float(1200.0));
        assert_eq!(slot.playing(), None);
    }

    #[test]
    fn stop_without_state_contributes_nothing() {
        let mut state = SessionState::new();
        let stop = Command::PlayerStop { player: p("p4") };
        assert!(compute_revert(&mut state, &[stop.clone()]).is_empty());
        assert!(compute_revert(&mut state, &[stop]).is_empty());
        assert!(state.players.is_empty());
    }

    #[test]
    fn stop_restores_and_removes() {
        let mut state = SessionState::new();
        compute_revert(&mut state, &[assign("d1", "play", "'x-o-'")]);
        let revert = compute_revert(&mut state, &[Command::PlayerStop { player: p("d1") }]);
        assert_eq!(revert, vec![assign("d1", "play", "'x-o-'")]);
        assert!(!state.players.contains_key(&p("d1")));
    }

    #[test]
    fn clock_clear_is_not_reversible() {
        let mut state = SessionState::new();
        compute_revert(&mut state, &[assign("p1", "pluck", "[0]")]);
        let revert = compute_revert(&mut state, &[Command::ClockClear]);
        assert!(revert.is_empty());
        assert!(state.clock_started_at.is_none());
    }

    #[test]
    fn revert_keeps_forward_order() {
        let mut state = SessionState::new();
        compute_revert(&mut state, &[bpm(100), assign("p1", "pluck", "[0]")]);
        let revert = compute_revert(&mut state, &[bpm(110), bpm(120), assign("p1", "keys", "[1]")]);
        assert_eq!(
            revert,
            vec![bpm(100), bpm(110), assign("p1", "pluck", "[0]")]
        );
    }

    #[test]
    fn applying_revert_restores_prior_values() {
        let mut state = SessionState::new();
        compute_revert(&mut state, &[bpm(90), assign("p1", "pluck", "[0]")]);
        let before = state.clone();
        let revert = compute_revert(&mut state, &[bpm(130), assign("p1", "keys", "[2]")]);
        compute_revert(&mut state, &revert);
        assert_eq!(state.globals, before.globals);
        assert_eq!(
            state.players[&p("p1")].playing(),
            before.players[&p("p1")].playing()
        );
    }
}
