//! Literal rendering in the runtime's surface syntax.
//!
//! The runtime speaks a Python-like language, so literals are printed the way
//! that language prints them: `'single'` quoted strings, `True`/`False`,
//! shortest round-trip floats with a trailing `.0`.

use std::fmt::Write as _;

use serde_json::Value;

use crate::command::Scalar;

/// Quoted string literal. Prefers single quotes; switches to double quotes
/// only when the text contains a single quote and no double quote.
pub fn quote_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_control() => {
                let code = u32::from(c);
                let _ = if code < 0x100 {
                    write!(out, "\\x{code:02x}")
                } else if code < 0x1_0000 {
                    write!(out, "\\u{code:04x}")
                } else {
                    write!(out, "\\U{code:08x}")
                };
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// Canonical float text: shortest round-trip digits, scientific notation
/// outside `1e-4 <= |f| < 1e16`.
pub fn float_repr(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let abs = f.abs();
    if abs != 0.0 && !(1e-4..1e16).contains(&abs) {
        let sci = format!("{f:e}");
        let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
        let exp: i32 = exp.parse().unwrap_or(0);
        let sign = if exp < 0 { '-' } else { '+' };
        return format!("{mantissa}e{sign}{:02}", exp.abs());
    }
    let mut text = format!("{f}");
    if !text.contains('.') {
        text.push_str(".0");
    }
    text
}

pub fn bool_repr(b: bool) -> &'static str {
    if b {
        "True"
    } else {
        "False"
    }
}

/// Source literal for a command value.
pub fn scalar_repr(value: &Scalar) -> String {
    match value {
        Scalar::Bool(b) => bool_repr(*b).to_string(),
        Scalar::Int(i) => i.to_string(),
        Scalar::Float(f) => float_repr(*f),
        Scalar::Str(s) => quote_str(s),
    }
}

/// Source literal for an arbitrary JSON value (lists and dicts included).
pub fn value_repr(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(b) => bool_repr(*b).to_string(),
        Value::Number(n) => number_repr(n),
        Value::String(s) => quote_str(s),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(value_repr).collect();
            format!("[{}]", parts.join(", "))
        }
        Value::Object(map) => {
            let parts: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", quote_str(k), value_repr(v)))
                .collect();
            format!("{{{}}}", parts.join(", "))
        }
    }
}

/// Printed form of a value: strings verbatim, everything else as its literal.
pub fn value_str(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => value_repr(other),
    }
}

fn number_repr(n: &serde_json::Number) -> String {
    if n.is_f64() {
        n.as_f64().map_or_else(|| n.to_string(), float_repr)
    } else {
        n.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strings_prefer_single_quotes() {
        assert_eq!(quote_str("x-o-"), "'x-o-'");
        assert_eq!(quote_str("it's"), "\"it's\"");
        assert_eq!(quote_str("a'b\"c"), "'a\\'b\"c'");
        assert_eq!(quote_str("line\nbreak"), "'line\\nbreak'");
        assert_eq!(quote_str("back\\slash"), "'back\\\\slash'");
        assert_eq!(quote_str("\u{7}"), "'\\x07'");
    }

    #[test]
    fn floats_match_runtime_printing() {
        assert_eq!(float_repr(1.0), "1.0");
        assert_eq!(float_repr(0.25), "0.25");
        assert_eq!(float_repr(-3.5), "-3.5");
        assert_eq!(float_repr(0.0001), "0.0001");
        assert_eq!(float_repr(0.00001), "1e-05");
        assert_eq!(float_repr(1.5e-7), "1.5e-07");
        assert_eq!(float_repr(1e16), "1e+16");
        assert_eq!(float_repr(123_456.0), "123456.0");
        assert_eq!(float_repr(0.1), "0.1");
    }

    #[test]
    fn scalars() {
        assert_eq!(scalar_repr(&Scalar::Bool(true)), "True");
        assert_eq!(scalar_repr(&Scalar::Int(-2)), "-2");
        assert_eq!(scalar_repr(&Scalar::Str("minor".into())), "'minor'");
    }

    #[test]
    fn json_values() {
        assert_eq!(value_repr(&json!([0, 2.5, "x", null])), "[0, 2.5, 'x', None]");
        assert_eq!(value_str(&json!("[0,2,4]")), "[0,2,4]");
        assert_eq!(value_str(&json!(3)), "3");
        assert_eq!(value_str(&json!({"a": false})), "{'a': False}");
    }
}
