//! Static safety proof over emitted runtime programs.
//!
//! A program passes only if it contains none of the forbidden substrings
//! (as written, with whitespace removed, or inside decoded string literals),
//! parses, uses nothing outside [`ALLOWED_NODES`], names no dunder, denied or
//! non-ASCII identifier, and only calls plain names or [`ALLOWED_METHODS`].

use serde::Serialize;

use crate::sandbox::{self, ast::NodeKind, ast::Visit};

/// Case-insensitive substrings that may never appear in emitted text.
/// Checked in this order; the first hit is reported.
pub const FORBIDDEN_TOKENS: &[&str] = &[
    "import",
    "open(",
    "exec(",
    "eval(",
    "__",
    "subprocess",
    "os.",
    "sys.",
    "socket",
    "requests",
];

/// Every node kind an emitted program may contain.
pub const ALLOWED_NODES: &[NodeKind] = &[
    NodeKind::Module,
    NodeKind::Assign,
    NodeKind::Expr,
    NodeKind::Name,
    NodeKind::Load,
    NodeKind::Store,
    NodeKind::Constant,
    NodeKind::Call,
    NodeKind::BinOp,
    NodeKind::UnaryOp,
    NodeKind::List,
    NodeKind::Tuple,
    NodeKind::Dict,
    NodeKind::Subscript,
    NodeKind::Attribute,
    NodeKind::Slice,
    NodeKind::Keyword,
    NodeKind::Mult,
    NodeKind::RShift,
    NodeKind::Add,
    NodeKind::Sub,
    NodeKind::Div,
    NodeKind::Pow,
    NodeKind::USub,
    NodeKind::UAdd,
];

/// Builtins and modules that may never be named, called or used as a synth.
pub const DENIED_NAMES: &[&str] = &[
    "eval",
    "exec",
    "open",
    "compile",
    "getattr",
    "setattr",
    "delattr",
    "hasattr",
    "globals",
    "locals",
    "vars",
    "dir",
    "breakpoint",
    "exit",
    "quit",
    "input",
    "help",
    "type",
    "object",
    "super",
    "memoryview",
    "classmethod",
    "staticmethod",
    "property",
    "builtins",
    "importlib",
    "os",
    "sys",
    "subprocess",
    "socket",
    "shutil",
    "pathlib",
    "ctypes",
    "pickle",
    "marshal",
    "system",
    "popen",
    "fork",
];

/// Methods a call may go through: player and clock control plus pattern helpers.
pub const ALLOWED_METHODS: &[&str] = &[
    "stop",
    "clear",
    "every",
    "offadd",
    "offmul",
    "shuffle",
    "reverse",
    "rotate",
    "loop",
    "stutter",
    "palindrome",
    "mirror",
    "trim",
    "sort",
    "spread",
];

pub fn is_denied_name(name: &str) -> bool {
    DENIED_NAMES.contains(&name)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SafetyViolation {
    #[error("forbidden token found in emitted source: {token}")]
    ForbiddenToken { token: String },
    #[error("forbidden AST node: {node}")]
    DisallowedNode { node: String },
    #[error("dunder name or attribute is forbidden: {name}")]
    Dunder { name: String },
    #[error("name is not allowed in emitted source: {name}")]
    DeniedName { name: String },
    #[error("identifier must be ASCII: {name}")]
    NonAsciiIdentifier { name: String },
    #[error("call target is not allowed: {callee}")]
    DisallowedCall { callee: String },
    #[error("emitted source does not parse: {message}")]
    Unparsable { message: String },
}

/// First forbidden token in `text`, matched case-insensitively both as
/// written and with all whitespace removed.
fn forbidden_token(text: &str) -> Option<&'static str> {
    let lowered = text.to_lowercase();
    let collapsed: String = lowered.chars().filter(|c| !c.is_whitespace()).collect();
    FORBIDDEN_TOKENS
        .iter()
        .find(|t| lowered.contains(*t) || collapsed.contains(*t))
        .copied()
}

fn token_violation(token: &str) -> SafetyViolation {
    SafetyViolation::ForbiddenToken {
        token: token.to_string(),
    }
}

fn check_ident(kind: NodeKind, ident: &str) -> Result<(), SafetyViolation> {
    if !ident.is_ascii() {
        return Err(SafetyViolation::NonAsciiIdentifier {
            name: ident.to_string(),
        });
    }
    if matches!(kind, NodeKind::Name | NodeKind::Attribute) {
        if ident.starts_with("__") {
            return Err(SafetyViolation::Dunder {
                name: ident.to_string(),
            });
        }
        if is_denied_name(ident) {
            return Err(SafetyViolation::DeniedName {
                name: ident.to_string(),
            });
        }
    }
    Ok(())
}

/// A call must target a plain name or an allowed method.
fn check_callee(callee: Option<&Visit<'_>>) -> Result<(), SafetyViolation> {
    match callee {
        Some(Visit {
            kind: NodeKind::Name,
            ..
        }) => Ok(()),
        Some(Visit {
            kind: NodeKind::Attribute,
            ident: Some(method),
            ..
        }) if ALLOWED_METHODS.contains(method) => Ok(()),
        Some(Visit {
            kind: NodeKind::Attribute,
            ident: Some(method),
            ..
        }) => Err(SafetyViolation::DisallowedCall {
            callee: format!(".{method}"),
        }),
        other => Err(SafetyViolation::DisallowedCall {
            callee: other.map_or("nothing", |v| v.kind.name()).to_string(),
        }),
    }
}

/// Prove `source` safe to hand to the runtime.
pub fn check(source: &str) -> Result<(), SafetyViolation> {
    if let Some(token) = forbidden_token(source) {
        return Err(token_violation(token));
    }

    let module = sandbox::parse_module(source).map_err(|errors| SafetyViolation::Unparsable {
        message: errors
            .iter()
            .map(|e| e.format_with_source(source))
            .collect::<Vec<_>>()
            .join("; "),
    })?;

    let visits = sandbox::ast::walk(&module);
    for (i, visit) in visits.iter().enumerate() {
        if !ALLOWED_NODES.contains(&visit.kind) {
            return Err(SafetyViolation::DisallowedNode {
                node: visit.kind.name().to_string(),
            });
        }
        match (visit.kind, visit.ident) {
            // Escapes are decoded by now, so hidden tokens show up here.
            (NodeKind::Constant, Some(text)) => {
                if let Some(token) = forbidden_token(text) {
                    return Err(token_violation(token));
                }
            }
            (kind, Some(ident)) => check_ident(kind, ident)?,
            _ => {}
        }
        // Pre-order: the callee is the node right after its call.
        if visit.kind == NodeKind::Call {
            check_callee(visits.get(i + 1))?;
        }
    }
    Ok(())
}
