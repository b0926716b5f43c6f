//! Tolerant JSON extraction from noisy model output.
//!
//! Each strategy is pure and returns every candidate it finds. Candidates are
//! considered in strategy order: per-line, whole text, forward scan.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractError {
    #[error("model returned empty output")]
    Empty,
    #[error("model output did not contain valid JSON")]
    NoJson,
    #[error("model output did not contain a commands list")]
    NoCommands,
}

type Strategy = fn(&str) -> Vec<Value>;

/// Strategies in priority order.
pub const STRATEGIES: &[Strategy] = &[per_line, whole_text, forward_scan];

fn is_open(c: char) -> bool {
    c == '{' || c == '['
}

/// Every line, cut at its first `{` or `[`, that parses on its own.
pub fn per_line(text: &str) -> Vec<Value> {
    text.lines()
        .filter_map(|line| {
            let start = line.find(is_open)?;
            serde_json::from_str(line.get(start..)?.trim()).ok()
        })
        .collect()
}

/// The whole trimmed text as one document.
pub fn whole_text(text: &str) -> Vec<Value> {
    serde_json::from_str(text.trim()).into_iter().collect()
}

/// A value decoded from each `{` or `[`, ignoring whatever follows it.
pub fn forward_scan(text: &str) -> Vec<Value> {
    text.char_indices()
        .filter(|(_, c)| is_open(*c))
        .filter_map(|(i, _)| {
            let rest = text.get(i..)?;
            serde_json::Deserializer::from_str(rest)
                .into_iter::<Value>()
                .next()?
                .ok()
        })
        .collect()
}

/// All candidates, strategy by strategy.
pub fn candidates(text: &str) -> Vec<Value> {
    STRATEGIES.iter().flat_map(|strategy| strategy(text)).collect()
}

fn carries_commands(value: &Value) -> bool {
    value.is_array() || value.get("commands").is_some_and(Value::is_array)
}

/// First candidate that is an array or an object carrying a `commands`
/// array; failing that, the first object at all.
pub fn extract_payload(text: &str) -> Result<Value, ExtractError> {
    if text.trim().is_empty() {
        return Err(ExtractError::Empty);
    }
    let all = candidates(text);
    let preferred = all.iter().position(carries_commands);
    let index = preferred.or_else(|| all.iter().position(Value::is_object));
    index
        .and_then(|i| all.into_iter().nth(i))
        .ok_or(ExtractError::NoJson)
}

/// First candidate that is a command list: an array, or an object carrying a
/// `commands` array. Objects without one (echoed prompts) are skipped.
pub fn extract_commands(text: &str) -> Result<Vec<Value>, ExtractError> {
    if text.trim().is_empty() {
        return Err(ExtractError::Empty);
    }
    let mut saw_json = false;
    for candidate in candidates(text) {
        match candidate {
            Value::Array(items) => return Ok(items),
            Value::Object(mut map) => {
                saw_json = true;
                if let Some(Value::Array(items)) = map.remove("commands") {
                    return Ok(items);
                }
            }
            _ => {}
        }
    }
    Err(if saw_json {
        ExtractError::NoCommands
    } else {
        ExtractError::NoJson
    })
}
