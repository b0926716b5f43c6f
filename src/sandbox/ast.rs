//! Syntax tree for the runtime's Python-like surface syntax.
//!
//! Only simple statements are modelled. Every node, including operators and
//! load/store contexts, reports a [`NodeKind`] through [`walk`] so the safety
//! proof can check the whole tree against an allow-list.

use std::fmt;

/// Byte range into the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// Slice of `source` covered by this span, if it is in bounds.
    pub fn slice(self, source: &str) -> Option<&str> {
        source.get(self.start..self.end)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// `a = b = value`
    Assign { targets: Vec<Expr>, value: Expr },
    /// `a += value`
    AugAssign { target: Expr, op: BinOp, value: Expr },
    /// `a: ann = value`
    AnnAssign {
        target: Expr,
        annotation: Expr,
        value: Option<Expr>,
    },
    Expr(Expr),
    Import(Vec<Alias>),
    ImportFrom {
        module: Option<String>,
        names: Vec<Alias>,
        level: usize,
    },
    Pass,
    Break,
    Continue,
    Delete(Vec<Expr>),
    Global(Vec<String>),
    Nonlocal(Vec<String>),
    Assert { test: Expr, msg: Option<Expr> },
    Raise {
        exc: Option<Expr>,
        cause: Option<Expr>,
    },
    Return(Option<Expr>),
}

/// `name as asname` in an import.
#[derive(Debug, Clone, PartialEq)]
pub struct Alias {
    pub name: String,
    pub asname: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ctx {
    Load,
    Store,
    Del,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Imag(f64),
    Str(String),
    Bytes(Vec<u8>),
    Ellipsis,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Constant(Constant),
    Name {
        id: String,
        ctx: Ctx,
    },
    Attribute {
        value: Box<Expr>,
        attr: String,
        ctx: Ctx,
    },
    Subscript {
        value: Box<Expr>,
        slice: Box<Expr>,
        ctx: Ctx,
    },
    Slice {
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        keywords: Vec<Keyword>,
    },
    BinOp {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    BoolOp {
        op: BoolOp,
        values: Vec<Expr>,
    },
    Compare {
        left: Box<Expr>,
        ops: Vec<CmpOp>,
        comparators: Vec<Expr>,
    },
    IfExp {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
    Lambda {
        params: Vec<Param>,
        body: Box<Expr>,
    },
    List {
        elts: Vec<Expr>,
        ctx: Ctx,
    },
    Tuple {
        elts: Vec<Expr>,
        ctx: Ctx,
    },
    Set(Vec<Expr>),
    /// `None` keys are `**mapping` entries.
    Dict {
        keys: Vec<Option<Expr>>,
        values: Vec<Expr>,
    },
    ListComp {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    SetComp {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    GeneratorExp {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    DictComp {
        key: Box<Expr>,
        value: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    Starred {
        value: Box<Expr>,
        ctx: Ctx,
    },
    /// f-string; every element is a `Constant` or a `FormattedValue`.
    JoinedStr(Vec<Expr>),
    FormattedValue(Box<Expr>),
}

/// `name=value` in a call; `arg` is `None` for `**mapping`.
#[derive(Debug, Clone, PartialEq)]
pub struct Keyword {
    pub arg: Option<String>,
    pub value: Expr,
    pub span: Span,
}

/// `for target in iter if cond`
#[derive(Debug, Clone, PartialEq)]
pub struct Comprehension {
    pub target: Expr,
    pub iter: Expr,
    pub ifs: Vec<Expr>,
}

/// One lambda parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
    pub kind: ParamKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Normal,
    VarArgs,
    KwArgs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mult,
    MatMult,
    Div,
    FloorDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    BitOr,
    BitXor,
    BitAnd,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mult => "*",
            BinOp::MatMult => "@",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
            BinOp::LShift => "<<",
            BinOp::RShift => ">>",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::BitAnd => "&",
        }
    }

    fn kind(self) -> NodeKind {
        match self {
            BinOp::Add => NodeKind::Add,
            BinOp::Sub => NodeKind::Sub,
            BinOp::Mult => NodeKind::Mult,
            BinOp::MatMult => NodeKind::MatMult,
            BinOp::Div => NodeKind::Div,
            BinOp::FloorDiv => NodeKind::FloorDiv,
            BinOp::Mod => NodeKind::Mod,
            BinOp::Pow => NodeKind::Pow,
            BinOp::LShift => NodeKind::LShift,
            BinOp::RShift => NodeKind::RShift,
            BinOp::BitOr => NodeKind::BitOr,
            BinOp::BitXor => NodeKind::BitXor,
            BinOp::BitAnd => NodeKind::BitAnd,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Invert,
    Not,
    UAdd,
    USub,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Invert => "~",
            UnaryOp::Not => "not ",
            UnaryOp::UAdd => "+",
            UnaryOp::USub => "-",
        }
    }

    fn kind(self) -> NodeKind {
        match self {
            UnaryOp::Invert => NodeKind::Invert,
            UnaryOp::Not => NodeKind::Not,
            UnaryOp::UAdd => NodeKind::UAdd,
            UnaryOp::USub => NodeKind::USub,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
}

impl CmpOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::NotEq => "!=",
            CmpOp::Lt => "<",
            CmpOp::LtE => "<=",
            CmpOp::Gt => ">",
            CmpOp::GtE => ">=",
            CmpOp::Is => "is",
            CmpOp::IsNot => "is not",
            CmpOp::In => "in",
            CmpOp::NotIn => "not in",
        }
    }

    fn kind(self) -> NodeKind {
        match self {
            CmpOp::Eq => NodeKind::Eq,
            CmpOp::NotEq => NodeKind::NotEq,
            CmpOp::Lt => NodeKind::Lt,
            CmpOp::LtE => NodeKind::LtE,
            CmpOp::Gt => NodeKind::Gt,
            CmpOp::GtE => NodeKind::GtE,
            CmpOp::Is => NodeKind::Is,
            CmpOp::IsNot => NodeKind::IsNot,
            CmpOp::In => NodeKind::In,
            CmpOp::NotIn => NodeKind::NotIn,
        }
    }
}

/// Every kind of node the tree can contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Module,
    Assign,
    AugAssign,
    AnnAssign,
    Expr,
    Import,
    ImportFrom,
    Alias,
    Pass,
    Break,
    Continue,
    Delete,
    Global,
    Nonlocal,
    Assert,
    Raise,
    Return,
    Constant,
    Name,
    Attribute,
    Subscript,
    Slice,
    Call,
    Keyword,
    BinOp,
    UnaryOp,
    BoolOp,
    Compare,
    IfExp,
    Lambda,
    Arguments,
    Arg,
    List,
    Tuple,
    Set,
    Dict,
    ListComp,
    SetComp,
    GeneratorExp,
    DictComp,
    Comprehension,
    Starred,
    JoinedStr,
    FormattedValue,
    Load,
    Store,
    Del,
    And,
    Or,
    Add,
    Sub,
    Mult,
    MatMult,
    Div,
    FloorDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    BitOr,
    BitXor,
    BitAnd,
    Invert,
    Not,
    UAdd,
    USub,
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
}

impl NodeKind {
    /// Conventional node name, as the runtime's own tooling spells it.
    pub fn name(self) -> &'static str {
        match self {
            NodeKind::Module => "Module",
            NodeKind::Assign => "Assign",
            NodeKind::AugAssign => "AugAssign",
            NodeKind::AnnAssign => "AnnAssign",
            NodeKind::Expr => "Expr",
            NodeKind::Import => "Import",
            NodeKind::ImportFrom => "ImportFrom",
            NodeKind::Alias => "alias",
            NodeKind::Pass => "Pass",
            NodeKind::Break => "Break",
            NodeKind::Continue => "Continue",
            NodeKind::Delete => "Delete",
            NodeKind::Global => "Global",
            NodeKind::Nonlocal => "Nonlocal",
            NodeKind::Assert => "Assert",
            NodeKind::Raise => "Raise",
            NodeKind::Return => "Return",
            NodeKind::Constant => "Constant",
            NodeKind::Name => "Name",
            NodeKind::Attribute => "Attribute",
            NodeKind::Subscript => "Subscript",
            NodeKind::Slice => "Slice",
            NodeKind::Call => "Call",
            NodeKind::Keyword => "keyword",
            NodeKind::BinOp => "BinOp",
            NodeKind::UnaryOp => "UnaryOp",
            NodeKind::BoolOp => "BoolOp",
            NodeKind::Compare => "Compare",
            NodeKind::IfExp => "IfExp",
            NodeKind::Lambda => "Lambda",
            NodeKind::Arguments => "arguments",
            NodeKind::Arg => "arg",
            NodeKind::List => "List",
            NodeKind::Tuple => "Tuple",
            NodeKind::Set => "Set",
            NodeKind::Dict => "Dict",
            NodeKind::ListComp => "ListComp",
            NodeKind::SetComp => "SetComp",
            NodeKind::GeneratorExp => "GeneratorExp",
            NodeKind::DictComp => "DictComp",
            NodeKind::Comprehension => "comprehension",
            NodeKind::Starred => "Starred",
            NodeKind::JoinedStr => "JoinedStr",
            NodeKind::FormattedValue => "FormattedValue",
            NodeKind::Load => "Load",
            NodeKind::Store => "Store",
            NodeKind::Del => "Del",
            NodeKind::And => "And",
            NodeKind::Or => "Or",
            NodeKind::Add => "Add",
            NodeKind::Sub => "Sub",
            NodeKind::Mult => "Mult",
            NodeKind::MatMult => "MatMult",
            NodeKind::Div => "Div",
            NodeKind::FloorDiv => "FloorDiv",
            NodeKind::Mod => "Mod",
            NodeKind::Pow => "Pow",
            NodeKind::LShift => "LShift",
            NodeKind::RShift => "RShift",
            NodeKind::BitOr => "BitOr",
            NodeKind::BitXor => "BitXor",
            NodeKind::BitAnd => "BitAnd",
            NodeKind::Invert => "Invert",
            NodeKind::Not => "Not",
            NodeKind::UAdd => "UAdd",
            NodeKind::USub => "USub",
            NodeKind::Eq => "Eq",
            NodeKind::NotEq => "NotEq",
            NodeKind::Lt => "Lt",
            NodeKind::LtE => "LtE",
            NodeKind::Gt => "Gt",
            NodeKind::GtE => "GtE",
            NodeKind::Is => "Is",
            NodeKind::IsNot => "IsNot",
            NodeKind::In => "In",
            NodeKind::NotIn => "NotIn",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Ctx {
    fn kind(self) -> NodeKind {
        match self {
            Ctx::Load => NodeKind::Load,
            Ctx::Store => NodeKind::Store,
            Ctx::Del => NodeKind::Del,
        }
    }
}

// ── Traversal ────────────────────────────────────────────────────

/// One visited node: its kind, the identifier it introduces or references
/// (names, attributes, keyword names, imported names) or the decoded text of
/// a string constant, and where it sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Visit<'a> {
    pub kind: NodeKind,
    pub ident: Option<&'a str>,
    pub span: Span,
}

/// Pre-order list of every node in the module.
pub fn walk(module: &Module) -> Vec<Visit<'_>> {
    let mut walker = Walker { out: Vec::new() };
    let span = module
        .body
        .iter()
        .map(|s| s.span)
        .reduce(Span::merge)
        .unwrap_or_default();
    walker.push(NodeKind::Module, None, span);
    for stmt in &module.body {
        walker.stmt(stmt);
    }
    walker.out
}

/// Pre-order list of every node in a single expression.
pub fn walk_expr(expr: &Expr) -> Vec<Visit<'_>> {
    let mut walker = Walker { out: Vec::new() };
    walker.expr(expr);
    walker.out
}

struct Walker<'a> {
    out: Vec<Visit<'a>>,
}

impl<'a> Walker<'a> {
    fn push(&mut self, kind: NodeKind, ident: Option<&'a str>, span: Span) {
        self.out.push(Visit { kind, ident, span });
    }

    fn stmt(&mut self, stmt: &'a Stmt) {
        let span = stmt.span;
        match &stmt.kind {
            StmtKind::Assign { targets, value } => {
                self.push(NodeKind::Assign, None, span);
                targets.iter().for_each(|t| self.expr(t));
                self.expr(value);
            }
            StmtKind::AugAssign { target, op, value } => {
                self.push(NodeKind::AugAssign, None, span);
                self.expr(target);
                self.push(op.kind(), None, span);
                self.expr(value);
            }
            StmtKind::AnnAssign {
                target,
                annotation,
                value,
            } => {
                self.push(NodeKind::AnnAssign, None, span);
                self.expr(target);
                self.expr(annotation);
                if let Some(v) = value {
                    self.expr(v);
                }
            }
            StmtKind::Expr(e) => {
                self.push(NodeKind::Expr, None, span);
                self.expr(e);
            }
            StmtKind::Import(names) => {
                self.push(NodeKind::Import, None, span);
                self.aliases(names);
            }
            StmtKind::ImportFrom { module, names, .. } => {
                self.push(NodeKind::ImportFrom, module.as_deref(), span);
                self.aliases(names);
            }
            StmtKind::Pass => self.push(NodeKind::Pass, None, span),
            StmtKind::Break => self.push(NodeKind::Break, None, span),
            StmtKind::Continue => self.push(NodeKind::Continue, None, span),
            StmtKind::Delete(targets) => {
                self.push(NodeKind::Delete, None, span);
                targets.iter().for_each(|t| self.expr(t));
            }
            StmtKind::Global(names) | StmtKind::Nonlocal(names) => {
                let kind = if matches!(stmt.kind, StmtKind::Global(_)) {
                    NodeKind::Global
                } else {
                    NodeKind::Nonlocal
                };
                self.push(kind, None, span);
                for n in names {
                    self.push(kind, Some(n), span);
                }
            }
            StmtKind::Assert { test, msg } => {
                self.push(NodeKind::Assert, None, span);
                self.expr(test);
                if let Some(m) = msg {
                    self.expr(m);
                }
            }
            StmtKind::Raise { exc, cause } => {
                self.push(NodeKind::Raise, None, span);
                exc.iter().chain(cause.iter()).for_each(|e| self.expr(e));
            }
            StmtKind::Return(value) => {
                self.push(NodeKind::Return, None, span);
                if let Some(v) = value {
                    self.expr(v);
                }
            }
        }
    }

    fn aliases(&mut self, names: &'a [Alias]) {
        for a in names {
            self.push(NodeKind::Alias, Some(&a.name), a.span);
            if let Some(asname) = &a.asname {
                self.push(NodeKind::Alias, Some(asname), a.span);
            }
        }
    }

    fn expr(&mut self, expr: &'a Expr) {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Constant(Constant::Str(text)) => {
                self.push(NodeKind::Constant, Some(text), span);
            }
            ExprKind::Constant(_) => self.push(NodeKind::Constant, None, span),
            ExprKind::Name { id, ctx } => {
                self.push(NodeKind::Name, Some(id), span);
                self.push(ctx.kind(), None, span);
            }
            ExprKind::Attribute { value, attr, ctx } => {
                self.push(NodeKind::Attribute, Some(attr), span);
                self.expr(value);
                self.push(ctx.kind(), None, span);
            }
            ExprKind::Subscript { value, slice, ctx } => {
                self.push(NodeKind::Subscript, None, span);
                self.expr(value);
                self.expr(slice);
                self.push(ctx.kind(), None, span);
            }
            ExprKind::Slice { lower, upper, step } => {
                self.push(NodeKind::Slice, None, span);
                for part in [lower, upper, step].into_iter().flatten() {
                    self.expr(part);
                }
            }
            ExprKind::Call {
                func,
                args,
                keywords,
            } => {
                self.push(NodeKind::Call, None, span);
                self.expr(func);
                args.iter().for_each(|a| self.expr(a));
                for kw in keywords {
                    self.push(NodeKind::Keyword, kw.arg.as_deref(), kw.span);
                    self.expr(&kw.value);
                }
            }
            ExprKind::BinOp { left, op, right } => {
                self.push(NodeKind::BinOp, None, span);
                self.expr(left);
                self.push(op.kind(), None, span);
                self.expr(right);
            }
            ExprKind::UnaryOp { op, operand } => {
                self.push(NodeKind::UnaryOp, None, span);
                self.push(op.kind(), None, span);
                self.expr(operand);
            }
            ExprKind::BoolOp { op, values } => {
                self.push(NodeKind::BoolOp, None, span);
                let kind = match op {
                    BoolOp::And => NodeKind::And,
                    BoolOp::Or => NodeKind::Or,
                };
                self.push(kind, None, span);
                values.iter().for_each(|v| self.expr(v));
            }
            ExprKind::Compare {
                left,
                ops,
                comparators,
            } => {
                self.push(NodeKind::Compare, None, span);
                self.expr(left);
                for op in ops {
                    self.push(op.kind(), None, span);
                }
                comparators.iter().for_each(|c| self.expr(c));
            }
            ExprKind::IfExp { test, body, orelse } => {
                self.push(NodeKind::IfExp, None, span);
                self.expr(test);
                self.expr(body);
                self.expr(orelse);
            }
            ExprKind::Lambda { params, body } => {
                self.push(NodeKind::Lambda, None, span);
                self.push(NodeKind::Arguments, None, span);
                for p in params {
                    self.push(NodeKind::Arg, Some(&p.name), span);
                    if let Some(d) = &p.default {
                        self.expr(d);
                    }
                }
                self.expr(body);
            }
            ExprKind::List { elts, ctx } | ExprKind::Tuple { elts, ctx } => {
                let kind = if matches!(expr.kind, ExprKind::List { .. }) {
                    NodeKind::List
                } else {
                    NodeKind::Tuple
                };
                self.push(kind, None, span);
                elts.iter().for_each(|e| self.expr(e));
                self.push(ctx.kind(), None, span);
            }
            ExprKind::Set(elts) => {
                self.push(NodeKind::Set, None, span);
                elts.iter().for_each(|e| self.expr(e));
            }
            ExprKind::Dict { keys, values } => {
                self.push(NodeKind::Dict, None, span);
                for (k, v) in keys.iter().zip(values) {
                    if let Some(k) = k {
                        self.expr(k);
                    }
                    self.expr(v);
                }
            }
            ExprKind::ListComp { elt, generators }
            | ExprKind::SetComp { elt, generators }
            | ExprKind::GeneratorExp { elt, generators } => {
                let kind = match expr.kind {
                    ExprKind::ListComp { .. } => NodeKind::ListComp,
                    ExprKind::SetComp { .. } => NodeKind::SetComp,
                    _ => NodeKind::GeneratorExp,
                };
                self.push(kind, None, span);
                self.expr(elt);
                self.comprehensions(generators, span);
            }
            ExprKind::DictComp {
                key,
                value,
                generators,
            } => {
                self.push(NodeKind::DictComp, None, span);
                self.expr(key);
                self.expr(value);
                self.comprehensions(generators, span);
            }
            ExprKind::Starred { value, ctx } => {
                self.push(NodeKind::Starred, None, span);
                self.expr(value);
                self.push(ctx.kind(), None, span);
            }
            ExprKind::JoinedStr(parts) => {
                self.push(NodeKind::JoinedStr, None, span);
                parts.iter().for_each(|p| self.expr(p));
            }
            ExprKind::FormattedValue(value) => {
                self.push(NodeKind::FormattedValue, None, span);
                self.expr(value);
            }
        }
    }

    fn comprehensions(&mut self, generators: &'a [Comprehension], span: Span) {
        for g in generators {
            self.push(NodeKind::Comprehension, None, span);
            self.expr(&g.target);
            self.expr(&g.iter);
            g.ifs.iter().for_each(|c| self.expr(c));
        }
    }
}
