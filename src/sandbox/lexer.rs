use super::ast::Span;
use super::error::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Int(i64),
    Float(f64),
    Imag(f64),
    Str(String),
    Bytes(Vec<u8>),
    /// Raw f-string body and the byte offset of its first character.
    FStr { body: String, offset: usize, raw: bool },

    Name(String),

    // Keywords
    False,
    None,
    True,
    And,
    As,
    Assert,
    Async,
    Await,
    Break,
    Class,
    Continue,
    Def,
    Del,
    Elif,
    Else,
    Except,
    Finally,
    For,
    From,
    Global,
    If,
    Import,
    In,
    Is,
    Lambda,
    Nonlocal,
    Not,
    Or,
    Pass,
    Raise,
    Return,
    Try,
    While,
    With,
    Yield,

    // Delimiters
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Semicolon,
    Eq,
    Arrow,     // ->
    ColonEq,   // :=
    Ellipsis,  // ...
    At,

    // Operators
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    SlashSlash,
    Percent,
    LtLt,
    GtGt,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Lt,
    Gt,
    Le,
    Ge,
    EqEq,
    Ne,
    /// `+=`, `>>=`, ... carrying the operator text without `=`.
    AugAssign(&'static str),

    Newline,
    Eof,
}

#[derive(Debug, Clone)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

pub fn lex(source: &str) -> Result<Vec<SpannedToken>, Vec<ParseError>> {
    let mut lexer = Lexer::new(source);
    lexer.tokenize()
}

const AUG_OPS: &[&str] = &[
    "**=", "//=", ">>=", "<<=", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "@=",
];

struct Lexer<'a> {
    source: &'a str,
    pos: usize,
    depth: Vec<(char, usize)>,
    at_line_start: bool,
    tokens: Vec<SpannedToken>,
    errors: Vec<ParseError>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            pos: 0,
            depth: Vec::new(),
            at_line_start: true,
            tokens: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn tokenize(&mut self) -> Result<Vec<SpannedToken>, Vec<ParseError>> {
        while self.pos < self.source.len() {
            if self.at_line_start && self.depth.is_empty() {
                self.at_line_start = false;
                let indent_start = self.pos;
                self.skip_blanks();
                let blank_line = matches!(self.peek(), None | Some('\n' | '\r' | '#'));
                if !blank_line && self.pos > indent_start {
                    self.errors.push(ParseError::lexer(
                        "unexpected indent",
                        Span::new(indent_start, self.pos),
                    ));
                }
            }
            self.skip_blanks();
            let Some(ch) = self.peek() else { break };
            let start = self.pos;

            match ch {
                '#' => {
                    while self.peek().is_some_and(|c| c != '\n' && c != '\r') {
                        self.bump();
                    }
                }
                '\\' => {
                    self.bump();
                    match self.peek() {
                        Some('\n') => self.bump(),
                        Some('\r') => {
                            self.bump();
                            if self.peek() == Some('\n') {
                                self.bump();
                            }
                        }
                        _ => self.errors.push(ParseError::lexer(
                            "unexpected character after line continuation character",
                            Span::new(start, self.pos),
                        )),
                    }
                }
                '\n' | '\r' => {
                    self.bump();
                    if ch == '\r' && self.peek() == Some('\n') {
                        self.bump();
                    }
                    if self.depth.is_empty() {
                        let needs_newline = self
                            .tokens
                            .last()
                            .is_some_and(|t| !matches!(t.token, Token::Newline));
                        if needs_newline {
                            self.push(Token::Newline, start, self.pos);
                        }
                        self.at_line_start = true;
                    }
                }
                '\'' | '"' => self.lex_string(start, ""),
                '0'..='9' => self.lex_number(start),
                '.' if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => {
                    self.lex_number(start)
                }
                c if is_ident_start(c) => self.lex_word(start),
                _ => self.lex_punct(start, ch),
            }
        }

        if let Some(&(open, at)) = self.depth.last() {
            self.errors.push(ParseError::lexer(
                format!("'{open}' was never closed"),
                Span::new(at, at + 1),
            ));
        }
        if self
            .tokens
            .last()
            .is_some_and(|t| !matches!(t.token, Token::Newline))
        {
            self.push(Token::Newline, self.pos, self.pos);
        }
        self.push(Token::Eof, self.pos, self.pos);

        if self.errors.is_empty() {
            Ok(std::mem::take(&mut self.tokens))
        } else {
            Err(std::mem::take(&mut self.errors))
        }
    }

    fn peek(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.source[self.pos..].chars().nth(n)
    }

    fn bump(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += c.len_utf8();
        }
    }

    fn rest(&self) -> &'a str {
        &self.source[self.pos..]
    }

    fn push(&mut self, token: Token, start: usize, end: usize) {
        self.tokens.push(SpannedToken {
            token,
            span: Span::new(start, end),
        });
    }

    fn skip_blanks(&mut self) {
        while matches!(self.peek(), Some(' ' | '\t' | '\x0c')) {
            self.bump();
        }
    }

    fn lex_punct(&mut self, start: usize, ch: char) {
        if let Some(&op) = AUG_OPS.iter().find(|op| self.rest().starts_with(**op)) {
            self.pos += op.len();
            let text = op.strip_suffix('=').unwrap_or(op);
            self.push(Token::AugAssign(text), start, self.pos);
            return;
        }
        const MULTI: &[(&str, Token)] = &[
            ("...", Token::Ellipsis),
            ("**", Token::StarStar),
            ("//", Token::SlashSlash),
            ("<<", Token::LtLt),
            (">>", Token::GtGt),
            ("<=", Token::Le),
            (">=", Token::Ge),
            ("==", Token::EqEq),
            ("!=", Token::Ne),
            ("->", Token::Arrow),
            (":=", Token::ColonEq),
        ];
        if let Some((text, token)) = MULTI.iter().find(|(t, _)| self.rest().starts_with(*t)) {
            self.pos += text.len();
            self.push(token.clone(), start, self.pos);
            return;
        }

        self.bump();
        let token = match ch {
            '(' | '[' | '{' => {
                self.depth.push((ch, start));
                match ch {
                    '(' => Token::LParen,
                    '[' => Token::LBracket,
                    _ => Token::LBrace,
                }
            }
            ')' | ']' | '}' => {
                let expected = match ch {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match self.depth.pop() {
                    Some((open, _)) if open == expected => {}
                    Some((open, _)) => self.errors.push(ParseError::lexer(
                        format!("closing parenthesis '{ch}' does not match opening parenthesis '{open}'"),
                        Span::new(start, self.pos),
                    )),
                    None => self.errors.push(ParseError::lexer(
                        format!("unmatched '{ch}'"),
                        Span::new(start, self.pos),
                    )),
                }
                match ch {
                    ')' => Token::RParen,
                    ']' => Token::RBracket,
                    _ => Token::RBrace,
                }
            }
            ',' => Token::Comma,
            ':' => Token::Colon,
            '.' => Token::Dot,
            ';' => Token::Semicolon,
            '=' => Token::Eq,
            '@' => Token::At,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '&' => Token::Amp,
            '|' => Token::Pipe,
            '^' => Token::Caret,
            '~' => Token::Tilde,
            '<' => Token::Lt,
            '>' => Token::Gt,
            _ => {
                self.errors.push(ParseError::lexer(
                    format!("invalid character '{ch}'"),
                    Span::new(start, self.pos),
                ));
                return;
            }
        };
        self.push(token, start, self.pos);
    }

    fn lex_word(&mut self, start: usize) {
        while self.peek().is_some_and(is_ident_continue) {
            self.bump();
        }
        let word = &self.source[start..self.pos];
        if matches!(self.peek(), Some('\'' | '"')) && is_string_prefix(word) {
            self.lex_string(start, word);
            return;
        }
        let token = match word {
            "False" => Token::False,
            "None" => Token::None,
            "True" => Token::True,
            "and" => Token::And,
            "as" => Token::As,
            "assert" => Token::Assert,
            "async" => Token::Async,
            "await" => Token::Await,
            "break" => Token::Break,
            "class" => Token::Class,
            "continue" => Token::Continue,
            "def" => Token::Def,
            "del" => Token::Del,
            "elif" => Token::Elif,
            "else" => Token::Else,
            "except" => Token::Except,
            "finally" => Token::Finally,
            "for" => Token::For,
            "from" => Token::From,
            "global" => Token::Global,
            "if" => Token::If,
            "import" => Token::Import,
            "in" => Token::In,
            "is" => Token::Is,
            "lambda" => Token::Lambda,
            "nonlocal" => Token::Nonlocal,
            "not" => Token::Not,
            "or" => Token::Or,
            "pass" => Token::Pass,
            "raise" => Token::Raise,
            "return" => Token::Return,
            "try" => Token::Try,
            "while" => Token::While,
            "with" => Token::With,
            "yield" => Token::Yield,
            _ => Token::Name(word.to_string()),
        };
        self.push(token, start, self.pos);
    }

    fn lex_number(&mut self, start: usize) {
        let radix = match (self.peek(), self.peek_at(1)) {
            (Some('0'), Some('x' | 'X')) => 16,
            (Some('0'), Some('o' | 'O')) => 8,
            (Some('0'), Some('b' | 'B')) => 2,
            _ => 10,
        };

        if radix != 10 {
            self.bump();
            self.bump();
            let digits_start = self.pos;
            while self.peek().is_some_and(|c| c.is_ascii_alphanumeric() || c == '_') {
                self.bump();
            }
            let digits = &self.source[digits_start..self.pos];
            let value = clean_digits(digits).and_then(|d| i64::from_str_radix(&d, radix).ok());
            match value {
                Some(v) => self.push(Token::Int(v), start, self.pos),
                None => self.errors.push(ParseError::lexer(
                    format!("invalid number literal '{}'", &self.source[start..self.pos]),
                    Span::new(start, self.pos),
                )),
            }
            return;
        }

        let mut is_float = false;
        self.eat_digits();
        if self.peek() == Some('.') {
            is_float = true;
            self.bump();
            self.eat_digits();
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let sign = usize::from(matches!(self.peek_at(1), Some('+' | '-')));
            if self.peek_at(1 + sign).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                self.bump();
                if sign == 1 {
                    self.bump();
                }
                self.eat_digits();
            }
        }
        let imaginary = matches!(self.peek(), Some('j' | 'J'));
        let text_end = self.pos;
        if imaginary {
            self.bump();
        }
        if self.peek().is_some_and(is_ident_continue) {
            while self.peek().is_some_and(is_ident_continue) {
                self.bump();
            }
            self.errors.push(ParseError::lexer(
                "invalid decimal literal",
                Span::new(start, self.pos),
            ));
            return;
        }

        let text = &self.source[start..text_end];
        let Some(clean) = clean_digits(text) else {
            self.errors.push(ParseError::lexer(
                "invalid decimal literal",
                Span::new(start, self.pos),
            ));
            return;
        };

        if imaginary || is_float {
            match clean.parse::<f64>() {
                Ok(v) if imaginary => self.push(Token::Imag(v), start, self.pos),
                Ok(v) => self.push(Token::Float(v), start, self.pos),
                Err(_) => self.errors.push(ParseError::lexer(
                    format!("invalid number literal '{text}'"),
                    Span::new(start, self.pos),
                )),
            }
            return;
        }

        if clean.len() > 1 && clean.starts_with('0') && clean.bytes().any(|b| b != b'0') {
            self.errors.push(ParseError::lexer(
                "leading zeros in decimal integer literals are not permitted",
                Span::new(start, self.pos),
            ));
            return;
        }
        match clean.parse::<i64>() {
            Ok(v) => self.push(Token::Int(v), start, self.pos),
            Err(_) => self.errors.push(ParseError::lexer(
                format!("integer literal too large: {text}"),
                Span::new(start, self.pos),
            )),
        }
    }

    fn eat_digits(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '_') {
            self.bump();
        }
    }

    fn lex_string(&mut self, start: usize, prefix: &str) {
        let prefix = prefix.to_ascii_lowercase();
        let raw = prefix.contains('r');
        let bytes = prefix.contains('b');
        let fstring = prefix.contains('f');

        let Some(quote) = self.peek() else { return };
        let triple = self.rest().starts_with(&quote.to_string().repeat(3));
        let delim_len = if triple { 3 } else { 1 };
        self.pos += delim_len;
        let body_start = self.pos;

        let closed = loop {
            let Some(c) = self.peek() else { break false };
            if c == '\\' {
                self.bump();
                self.bump();
                continue;
            }
            if !triple && (c == '\n' || c == '\r') {
                break false;
            }
            if c == quote {
                if !triple {
                    break true;
                }
                if self.rest().starts_with(&quote.to_string().repeat(3)) {
                    break true;
                }
            }
            self.bump();
        };

        if !closed {
            self.errors.push(ParseError::lexer(
                "unterminated string literal",
                Span::new(start, self.pos),
            ));
            return;
        }

        let body = &self.source[body_start..self.pos];
        self.pos += delim_len;
        let span_end = self.pos;

        if fstring {
            self.push(
                Token::FStr {
                    body: body.to_string(),
                    offset: body_start,
                    raw,
                },
                start,
                span_end,
            );
            return;
        }

        if bytes {
            if !body.is_ascii() {
                self.errors.push(ParseError::lexer(
                    "bytes can only contain ASCII literal characters",
                    Span::new(start, span_end),
                ));
                return;
            }
            let text = if raw {
                Ok(body.to_string())
            } else {
                unescape(body, true)
            };
            match text.map(|t| t.chars().map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?')).collect()) {
                Ok(b) => self.push(Token::Bytes(b), start, span_end),
                Err(msg) => self.errors.push(ParseError::lexer(msg, Span::new(start, span_end))),
            }
            return;
        }

        let text = if raw {
            Ok(body.to_string())
        } else {
            unescape(body, false)
        };
        match text {
            Ok(s) => self.push(Token::Str(s), start, span_end),
            Err(msg) => self
                .errors
                .push(ParseError::lexer(msg, Span::new(start, span_end))),
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c == '_' || c.is_alphabetic()
}

fn is_ident_continue(c: char) -> bool {
    c == '_' || c.is_alphanumeric()
}

fn is_string_prefix(word: &str) -> bool {
    matches!(
        word.to_ascii_lowercase().as_str(),
        "r" | "u" | "b" | "f" | "br" | "rb" | "fr" | "rf"
    )
}

/// Strip digit-group underscores; `None` if they are misplaced.
fn clean_digits(text: &str) -> Option<String> {
    if text.is_empty() || text.starts_with('_') || text.ends_with('_') || text.contains("__") {
        return None;
    }
    let bad_neighbour = text
        .as_bytes()
        .windows(2)
        .any(|w| matches!(w, [b'_', b'.' | b'e' | b'E'] | [b'.' | b'e' | b'E', b'_']));
    if bad_neighbour {
        return None;
    }
    Some(text.replace('_', ""))
}

/// Resolve backslash escapes. Unknown escapes are kept verbatim.
pub fn unescape(body: &str, bytes: bool) -> Result<String, String> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(e) = chars.next() else {
            out.push('\\');
            break;
        };
        match e {
            '\n' => {}
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
            }
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'f' => out.push('\x0c'),
            'v' => out.push('\x0b'),
            '0'..='7' => {
                let mut code = e.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.peek().and_then(|c| c.to_digit(8)) {
                        Some(d) => {
                            code = code * 8 + d;
                            chars.next();
                        }
                        None => break,
                    }
                }
                if bytes && code > 0xff {
                    return Err(format!("invalid octal escape sequence '\\{code:o}'"));
                }
                out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
            }
            'x' => out.push(hex_escape(&mut chars, 2, 'x')?),
            'u' if !bytes => out.push(hex_escape(&mut chars, 4, 'u')?),
            'U' if !bytes => out.push(hex_escape(&mut chars, 8, 'U')?),
            'N' if !bytes => {
                return Err("named unicode escapes are not supported".to_string());
            }
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    Ok(out)
}

fn hex_escape(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    len: usize,
    tag: char,
) -> Result<char, String> {
    let mut code = 0u32;
    for _ in 0..len {
        let digit = chars
            .next()
            .and_then(|c| c.to_digit(16))
            .ok_or_else(|| format!("truncated \\{tag} escape"))?;
        code = code * 16 + digit;
    }
    char::from_u32(code).ok_or_else(|| format!("invalid \\{tag} escape"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn tok(s: &str) -> Vec<Token> {
        lex(s).unwrap().into_iter().map(|t| t.token).collect()
    }

    fn err(s: &str) -> String {
        lex(s).unwrap_err().remove(0).message
    }

    #[test]
    fn assignment_line() {
        assert_eq!(
            tok("Clock.bpm = 120"),
            vec![
                Token::Name("Clock".into()),
                Token::Dot,
                Token::Name("bpm".into()),
                Token::Eq,
                Token::Int(120),
                Token::Newline,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn player_pipe() {
        assert_eq!(
            tok("p1 >> pluck([0, 2], dur=1/2)"),
            vec![
                Token::Name("p1".into()),
                Token::GtGt,
                Token::Name("pluck".into()),
                Token::LParen,
                Token::LBracket,
                Token::Int(0),
                Token::Comma,
                Token::Int(2),
                Token::RBracket,
                Token::Comma,
                Token::Name("dur".into()),
                Token::Eq,
                Token::Int(1),
                Token::Slash,
                Token::Int(2),
                Token::RParen,
                Token::Newline,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn numbers() {
        assert_eq!(
            tok("0.25 1e3 .5 1_000 0x1f 2j"),
            vec![
                Token::Float(0.25),
                Token::Float(1000.0),
                Token::Float(0.5),
                Token::Int(1000),
                Token::Int(31),
                Token::Imag(2.0),
                Token::Newline,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn strings_and_prefixes() {
        assert_eq!(
            tok(r#"'x-o-' "a\tb" r'\d' b'\x41'"#),
            vec![
                Token::Str("x-o-".into()),
                Token::Str("a\tb".into()),
                Token::Str("\\d".into()),
                Token::Bytes(vec![0x41]),
                Token::Newline,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn triple_quoted_string_spans_lines() {
        assert_eq!(
            tok("'''a\nb'''"),
            vec![Token::Str("a\nb".into()), Token::Newline, Token::Eof]
        );
    }

    #[test]
    fn newlines_inside_brackets_are_joined() {
        assert_eq!(
            tok("f(1,\n  2)\n\n\nx"),
            vec![
                Token::Name("f".into()),
                Token::LParen,
                Token::Int(1),
                Token::Comma,
                Token::Int(2),
                Token::RParen,
                Token::Newline,
                Token::Name("x".into()),
                Token::Newline,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn comments_and_continuations() {
        assert_eq!(
            tok("a = 1 \\\n + 2  # trailing\n# whole line\n"),
            vec![
                Token::Name("a".into()),
                Token::Eq,
                Token::Int(1),
                Token::Plus,
                Token::Int(2),
                Token::Newline,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn augmented_operators() {
        assert_eq!(
            tok("x >>= 2"),
            vec![
                Token::Name("x".into()),
                Token::AugAssign(">>"),
                Token::Int(2),
                Token::Newline,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn errors() {
        assert_eq!(err("'abc"), "unterminated string literal");
        assert_eq!(err("  x = 1"), "unexpected indent");
        assert_eq!(err("f(1"), "'(' was never closed");
        assert_eq!(err("x)"), "unmatched ')'");
        assert_eq!(err("4on"), "invalid decimal literal");
        assert_eq!(err("012"), "leading zeros in decimal integer literals are not permitted");
        assert_eq!(err("a ? b"), "invalid character '?'");
    }

    #[test]
    fn indented_blank_lines_are_fine() {
        assert!(lex("x = 1\n   \n  # note\ny = 2").is_ok());
    }
}
