use super::ast::Span;

/// A syntax error with source location.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ParseError {
    pub message: String,
    pub span: Span,
    pub kind: ErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Lexer,
    Parser,
}

impl ParseError {
    pub fn lexer(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            kind: ErrorKind::Lexer,
        }
    }

    pub fn parser(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            kind: ErrorKind::Parser,
        }
    }

    /// Format the error with its line and column in `source`.
    pub fn format_with_source(&self, source: &str) -> String {
        let (line, col) = offset_to_line_col(source, self.span.start);
        format!(
            "[{}] line {line}:{col}: {}",
            match self.kind {
                ErrorKind::Lexer => "lexer",
                ErrorKind::Parser => "parser",
            },
            self.message,
        )
    }
}

fn offset_to_line_col(source: &str, offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut col = 1;
    for (i, ch) in source.char_indices() {
        if i >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_line_and_column() {
        let err = ParseError::parser("invalid syntax", Span::new(6, 7));
        assert_eq!(
            err.format_with_source("a = 1\nb = (\n"),
            "[parser] line 2:1: invalid syntax"
        );
    }
}
