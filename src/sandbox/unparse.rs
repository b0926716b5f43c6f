//! Expression trees back to canonical source, and literal evaluation.

use serde_json::{Map, Value};

use super::ast::*;
use crate::pyrepr;

// Binding strength, weakest first.
const TUPLE: u8 = 0;
const TEST: u8 = 2;
const OR: u8 = 3;
const AND: u8 = 4;
const NOT: u8 = 5;
const CMP: u8 = 6;
const BOR: u8 = 7;
const BXOR: u8 = 8;
const BAND: u8 = 9;
const SHIFT: u8 = 10;
const ARITH: u8 = 11;
const TERM: u8 = 12;
const FACTOR: u8 = 13;
const POWER: u8 = 14;
const ATOM: u8 = 16;

/// Canonical source text of an expression: single-quoted strings, `, `
/// separators, spaces around binary operators, tuples always parenthesized.
pub fn unparse(expr: &Expr) -> String {
    render(expr, TUPLE)
}

fn binop_prec(op: BinOp) -> u8 {
    match op {
        BinOp::BitOr => BOR,
        BinOp::BitXor => BXOR,
        BinOp::BitAnd => BAND,
        BinOp::LShift | BinOp::RShift => SHIFT,
        BinOp::Add | BinOp::Sub => ARITH,
        BinOp::Mult | BinOp::MatMult | BinOp::Div | BinOp::FloorDiv | BinOp::Mod => TERM,
        BinOp::Pow => POWER,
    }
}

fn prec_of(expr: &Expr) -> u8 {
    match &expr.kind {
        ExprKind::Lambda { .. } | ExprKind::IfExp { .. } => TEST,
        ExprKind::BoolOp { op: BoolOp::Or, .. } => OR,
        ExprKind::BoolOp { op: BoolOp::And, .. } => AND,
        ExprKind::UnaryOp { op: UnaryOp::Not, .. } => NOT,
        ExprKind::UnaryOp { .. } => FACTOR,
        ExprKind::Compare { .. } => CMP,
        ExprKind::BinOp { op, .. } => binop_prec(*op),
        _ => ATOM,
    }
}

fn render(expr: &Expr, required: u8) -> String {
    let text = render_bare(expr);
    if prec_of(expr) < required {
        format!("({text})")
    } else {
        text
    }
}

fn join(items: &[Expr], prec: u8) -> String {
    items
        .iter()
        .map(|e| render(e, prec))
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_bare(expr: &Expr) -> String {
    match &expr.kind {
        ExprKind::Constant(c) => constant(c),
        ExprKind::Name { id, .. } => id.clone(),
        ExprKind::Attribute { value, attr, .. } => {
            let base = render(value, ATOM);
            if matches!(value.kind, ExprKind::Constant(Constant::Int(_))) {
                format!("{base} .{attr}")
            } else {
                format!("{base}.{attr}")
            }
        }
        ExprKind::Subscript { value, slice, .. } => {
            let inner = match &slice.kind {
                ExprKind::Tuple { elts, .. } if !elts.is_empty() => {
                    let mut s = join(elts, TEST);
                    if elts.len() == 1 {
                        s.push(',');
                    }
                    s
                }
                _ => render(slice, TUPLE),
            };
            format!("{}[{inner}]", render(value, ATOM))
        }
        ExprKind::Slice { lower, upper, step } => {
            let part = |p: &Option<Box<Expr>>| p.as_ref().map(|e| render(e, TEST)).unwrap_or_default();
            let mut s = format!("{}:{}", part(lower), part(upper));
            if step.is_some() {
                s.push(':');
                s.push_str(&part(step));
            }
            s
        }
        ExprKind::Call {
            func,
            args,
            keywords,
        } => {
            let mut parts: Vec<String> = args.iter().map(|a| render(a, TEST)).collect();
            parts.extend(keywords.iter().map(|k| match &k.arg {
                Some(name) => format!("{name}={}", render(&k.value, TEST)),
                None => format!("**{}", render(&k.value, BOR)),
            }));
            format!("{}({})", render(func, ATOM), parts.join(", "))
        }
        ExprKind::BinOp { left, op, right } => {
            let prec = binop_prec(*op);
            let (lp, rp) = if *op == BinOp::Pow {
                (prec + 1, prec)
            } else {
                (prec, prec + 1)
            };
            format!("{} {} {}", render(left, lp), op.symbol(), render(right, rp))
        }
        ExprKind::UnaryOp { op, operand } => {
            let prec = if *op == UnaryOp::Not { NOT } else { FACTOR };
            format!("{}{}", op.symbol(), render(operand, prec))
        }
        ExprKind::BoolOp { op, values } => {
            let (word, prec) = match op {
                BoolOp::And => (" and ", AND),
                BoolOp::Or => (" or ", OR),
            };
            values
                .iter()
                .map(|v| render(v, prec + 1))
                .collect::<Vec<_>>()
                .join(word)
        }
        ExprKind::Compare {
            left,
            ops,
            comparators,
        } => {
            let mut s = render(left, CMP + 1);
            for (op, c) in ops.iter().zip(comparators) {
                s.push(' ');
                s.push_str(op.symbol());
                s.push(' ');
                s.push_str(&render(c, CMP + 1));
            }
            s
        }
        ExprKind::IfExp { test, body, orelse } => format!(
            "{} if {} else {}",
            render(body, TEST + 1),
            render(test, TEST + 1),
            render(orelse, TEST)
        ),
        ExprKind::Lambda { params, body } => {
            let params: Vec<String> = params
                .iter()
                .map(|p| {
                    let prefix = match p.kind {
                        ParamKind::Normal => "",
                        ParamKind::VarArgs => "*",
                        ParamKind::KwArgs => "**",
                    };
                    match &p.default {
                        Some(d) => format!("{prefix}{}={}", p.name, render(d, TEST)),
                        None => format!("{prefix}{}", p.name),
                    }
                })
                .collect();
            if params.is_empty() {
                format!("lambda: {}", render(body, TEST))
            } else {
                format!("lambda {}: {}", params.join(", "), render(body, TEST))
            }
        }
        ExprKind::List { elts, .. } => format!("[{}]", join(elts, TEST)),
        ExprKind::Tuple { elts, .. } => {
            if elts.len() == 1 {
                format!("({},)", join(elts, TEST))
            } else {
                format!("({})", join(elts, TEST))
            }
        }
        ExprKind::Set(elts) => {
            if elts.is_empty() {
                "{*()}".to_string()
            } else {
                format!("{{{}}}", join(elts, TEST))
            }
        }
        ExprKind::Dict { keys, values } => {
            let parts: Vec<String> = keys
                .iter()
                .zip(values)
                .map(|(k, v)| match k {
                    Some(k) => format!("{}: {}", render(k, TEST), render(v, TEST)),
                    None => format!("**{}", render(v, BOR)),
                })
                .collect();
            format!("{{{}}}", parts.join(", "))
        }
        ExprKind::ListComp { elt, generators } => {
            format!("[{}{}]", render(elt, TEST), comprehensions(generators))
        }
        ExprKind::SetComp { elt, generators } => {
            format!("{{{}{}}}", render(elt, TEST), comprehensions(generators))
        }
        ExprKind::GeneratorExp { elt, generators } => {
            format!("({}{})", render(elt, TEST), comprehensions(generators))
        }
        ExprKind::DictComp {
            key,
            value,
            generators,
        } => format!(
            "{{{}: {}{}}}",
            render(key, TEST),
            render(value, TEST),
            comprehensions(generators)
        ),
        ExprKind::Starred { value, .. } => format!("*{}", render(value, BOR)),
        ExprKind::JoinedStr(parts) => {
            let mut body = String::new();
            for p in parts {
                match &p.kind {
                    ExprKind::Constant(Constant::Str(s)) => {
                        body.push_str(&s.replace('{', "{{").replace('}', "}}"));
                    }
                    ExprKind::FormattedValue(v) => {
                        body.push('{');
                        body.push_str(&render(v, TEST));
                        body.push('}');
                    }
                    _ => {}
                }
            }
            format!("f{}", pyrepr::quote_str(&body))
        }
        ExprKind::FormattedValue(v) => format!("{{{}}}", render(v, TEST)),
    }
}

fn comprehensions(generators: &[Comprehension]) -> String {
    let mut s = String::new();
    for g in generators {
        let target = match &g.target.kind {
            ExprKind::Tuple { elts, .. } if !elts.is_empty() => join(elts, TEST),
            _ => render(&g.target, TUPLE),
        };
        s.push_str(&format!(" for {target} in {}", render(&g.iter, TEST + 1)));
        for cond in &g.ifs {
            s.push_str(&format!(" if {}", render(cond, TEST + 1)));
        }
    }
    s
}

fn constant(c: &Constant) -> String {
    match c {
        Constant::None => "None".to_string(),
        Constant::Bool(b) => pyrepr::bool_repr(*b).to_string(),
        Constant::Int(i) => i.to_string(),
        Constant::Float(f) => pyrepr::float_repr(*f),
        Constant::Imag(f) => {
            let text = pyrepr::float_repr(*f);
            format!("{}j", text.strip_suffix(".0").unwrap_or(&text))
        }
        Constant::Str(s) => pyrepr::quote_str(s),
        Constant::Bytes(b) => {
            let text: String = b.iter().map(|&byte| char::from(byte)).collect();
            format!("b{}", pyrepr::quote_str(&text))
        }
        Constant::Ellipsis => "...".to_string(),
    }
}

// ── Literal evaluation ───────────────────────────────────────────

/// Evaluate a literal-only expression (numbers, strings, booleans, `None`,
/// lists, tuples, string-keyed dicts, signed numbers) into JSON.
///
/// Returns `None` for anything that needs name resolution or has no JSON
/// counterpart.
pub fn literal_eval(expr: &Expr) -> Option<Value> {
    match &expr.kind {
        ExprKind::Constant(c) => match c {
            Constant::None => Some(Value::Null),
            Constant::Bool(b) => Some(Value::Bool(*b)),
            Constant::Int(i) => Some(Value::from(*i)),
            Constant::Float(f) => serde_json::Number::from_f64(*f).map(Value::Number),
            Constant::Str(s) => Some(Value::String(s.clone())),
            Constant::Imag(_) | Constant::Bytes(_) | Constant::Ellipsis => None,
        },
        ExprKind::UnaryOp { op, operand } => {
            let ExprKind::Constant(c) = &operand.kind else {
                return None;
            };
            match (op, c) {
                (UnaryOp::UAdd, Constant::Int(i)) => Some(Value::from(*i)),
                (UnaryOp::USub, Constant::Int(i)) => i.checked_neg().map(Value::from),
                (UnaryOp::UAdd, Constant::Float(f)) => {
                    serde_json::Number::from_f64(*f).map(Value::Number)
                }
                (UnaryOp::USub, Constant::Float(f)) => {
                    serde_json::Number::from_f64(-*f).map(Value::Number)
                }
                _ => None,
            }
        }
        ExprKind::List { elts, .. } | ExprKind::Tuple { elts, .. } => {
            elts.iter().map(literal_eval).collect::<Option<Vec<_>>>().map(Value::Array)
        }
        ExprKind::Dict { keys, values } => {
            let mut map = Map::new();
            for (k, v) in keys.iter().zip(values) {
                let key = match literal_eval(k.as_ref()?)? {
                    Value::String(s) => s,
                    _ => return None,
                };
                map.insert(key, literal_eval(v)?);
            }
            Some(Value::Object(map))
        }
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::sandbox::parse_expression;
    use serde_json::json;

    fn roundtrip(src: &str) -> String {
        unparse(&parse_expression(src).unwrap())
    }

    #[test]
    fn canonical_spacing() {
        assert_eq!(roundtrip("[0,2,4,7]"), "[0, 2, 4, 7]");
        assert_eq!(roundtrip("P[0,2]+[1]"), "P[0, 2] + [1]");
        assert_eq!(roundtrip("(0,2)"), "(0, 2)");
        assert_eq!(roundtrip("(1,)"), "(1,)");
        assert_eq!(roundtrip("\"x-o-\""), "'x-o-'");
        assert_eq!(roundtrip("var([0,3],8)"), "var([0, 3], 8)");
        assert_eq!(roundtrip("f(a,*b,k=1,**c)"), "f(a, *b, k=1, **c)");
    }

    #[test]
    fn parenthesizes_by_precedence() {
        assert_eq!(roundtrip("(1+2)*3"), "(1 + 2) * 3");
        assert_eq!(roundtrip("1+(2*3)"), "1 + 2 * 3");
        assert_eq!(roundtrip("1-(2-3)"), "1 - (2 - 3)");
        assert_eq!(roundtrip("(2**3)**4"), "(2 ** 3) ** 4");
        assert_eq!(roundtrip("-x**2"), "-x ** 2");
        assert_eq!(roundtrip("(-x)**2"), "(-x) ** 2");
        assert_eq!(roundtrip("not (a and b)"), "not (a and b)");
    }

    #[test]
    fn slices_and_comprehensions() {
        assert_eq!(roundtrip("x[1:2,::3]"), "x[1:2, ::3]");
        assert_eq!(roundtrip("[i*2 for i in range(4) if i]"), "[i * 2 for i in range(4) if i]");
        assert_eq!(roundtrip("{k:v for k,v in d}"), "{k: v for k, v in d}");
        assert_eq!(roundtrip("lambda x,y=1:x"), "lambda x, y=1: x");
    }

    #[test]
    fn literal_values() {
        let eval = |s: &str| literal_eval(&parse_expression(s).unwrap());
        assert_eq!(eval("0.25"), Some(json!(0.25)));
        assert_eq!(eval("-3"), Some(json!(-3)));
        assert_eq!(eval("[1, (2, 'a'), None]"), Some(json!([1, [2, "a"], null])));
        assert_eq!(eval("{'a': True}"), Some(json!({"a": true})));
        assert_eq!(eval("P[0, 2]"), None);
        assert_eq!(eval("1/2"), None);
        assert_eq!(eval("{1: 2}"), None);
    }
}
