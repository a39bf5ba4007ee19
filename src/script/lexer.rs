//! Tokenizer for the sandbox scripting language.
//!
//! Produces Python-style INDENT / DEDENT / NEWLINE tokens. Newlines inside
//! brackets are ignored, `#` starts a comment, `\` joins physical lines.

use crate::errors::{Result, SandboxError};

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    Newline,
    Indent,
    Dedent,
    Eof,
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
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    Plus,
    Minus,
    Star,
    Slash,
    DoubleSlash,
    Percent,
    DoubleStar,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Amp,
    Pipe,
    Caret,
    Tilde,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
}

const STRING_PREFIXES: &[&str] = &["r", "u", "R", "U", "f", "F", "b", "B", "rb", "br", "fr", "rf"];

pub fn tokenize(source: &str) -> Result<Vec<Token>> {
    let mut lexer = Lexer {
        chars: source.chars().collect(),
        pos: 0,
        line: 1,
        depth: 0,
        indents: vec![0],
        tokens: Vec::new(),
        at_line_start: true,
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    depth: usize,
    indents: Vec<usize>,
    tokens: Vec<Token>,
    at_line_start: bool,
}

impl Lexer {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn push(&mut self, tok: Tok) {
        self.tokens.push(Token {
            tok,
            line: self.line,
        });
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.pos += 1;
        }
    }

    fn run(&mut self) -> Result<()> {
        loop {
            if self.at_line_start && self.depth == 0 {
                let mut width = 0;
                while let Some(c) = self.peek() {
                    match c {
                        ' ' => width += 1,
                        '\t' => width += 4,
                        '\r' => {}
                        _ => break,
                    }
                    self.pos += 1;
                }
                match self.peek() {
                    None => break,
                    Some('\n') => {
                        self.pos += 1;
                        self.line += 1;
                        continue;
                    }
                    Some('#') => {
                        self.skip_comment();
                        continue;
                    }
                    Some(_) => {}
                }
                self.apply_indent(width)?;
                self.at_line_start = false;
            }

            let Some(c) = self.peek() else { break };
            match c {
                ' ' | '\t' | '\r' => self.pos += 1,
                '\n' => {
                    self.pos += 1;
                    if self.depth == 0 {
                        self.push_newline();
                        self.at_line_start = true;
                    }
                    self.line += 1;
                }
                '#' => self.skip_comment(),
                '\\' if self.peek_at(1) == Some('\n') => {
                    self.pos += 2;
                    self.line += 1;
                }
                '\'' | '"' => {
                    let s = self.string(c)?;
                    self.push(Tok::Str(s));
                }
                c if c.is_ascii_digit() => self.number()?,
                '.' if self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) => self.number()?,
                c if c.is_alphabetic() || c == '_' => self.name()?,
                _ => self.punct(c)?,
            }
        }

        self.push_newline();
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Tok::Dedent);
        }
        self.push(Tok::Eof);
        Ok(())
    }

    fn push_newline(&mut self) {
        match self.tokens.last() {
            None => {}
            Some(t) if matches!(t.tok, Tok::Newline | Tok::Indent | Tok::Dedent) => {}
            Some(_) => self.push(Tok::Newline),
        }
    }

    fn apply_indent(&mut self, width: usize) -> Result<()> {
        let current = self.indents.last().copied().unwrap_or(0);
        if width > current {
            self.indents.push(width);
            self.push(Tok::Indent);
            return Ok(());
        }
        while width < self.indents.last().copied().unwrap_or(0) {
            self.indents.pop();
            self.push(Tok::Dedent);
        }
        if width != self.indents.last().copied().unwrap_or(0) {
            return Err(SandboxError::syntax(
                "unindent does not match any outer indentation level",
                self.line,
            ));
        }
        Ok(())
    }

    fn name(&mut self) -> Result<()> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        let ident: String = self.chars[start..self.pos].iter().collect();

        if let Some(q @ ('\'' | '"')) = self.peek() {
            if STRING_PREFIXES.contains(&ident.as_str()) {
                if ident.contains(['f', 'F']) {
                    return Err(SandboxError::syntax(
                        "f-strings are not supported",
                        self.line,
                    ));
                }
                if ident.contains(['b', 'B']) {
                    return Err(SandboxError::syntax(
                        "bytes literals are not supported",
                        self.line,
                    ));
                }
                let s = self.string(q)?;
                self.push(Tok::Str(s));
                return Ok(());
            }
        }
        self.push(Tok::Name(ident));
        Ok(())
    }

    fn number(&mut self) -> Result<()> {
        let start = self.pos;
        let mut is_float = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '_' {
                self.pos += 1;
            } else if c == '.' && !is_float {
                is_float = true;
                self.pos += 1;
            } else if (c == 'e' || c == 'E')
                && (self.peek_at(1).is_some_and(|d| d.is_ascii_digit())
                    || (matches!(self.peek_at(1), Some('+' | '-'))
                        && self.peek_at(2).is_some_and(|d| d.is_ascii_digit())))
            {
                is_float = true;
                self.pos += 2;
            } else {
                break;
            }
        }
        let text: String = self.chars[start..self.pos]
            .iter()
            .filter(|c| **c != '_')
            .collect();
        if let Some(c) = self.peek() {
            if c.is_alphabetic() || c == '_' {
                return Err(SandboxError::syntax("invalid decimal literal", self.line));
            }
        }
        if !is_float {
            if let Ok(v) = text.parse::<i64>() {
                self.push(Tok::Int(v));
                return Ok(());
            }
        }
        let v = text
            .parse::<f64>()
            .map_err(|_| SandboxError::syntax(format!("invalid number '{}'", text), self.line))?;
        self.push(Tok::Float(v));
        Ok(())
    }

    fn string(&mut self, quote: char) -> Result<String> {
        let start_line = self.line;
        let triple = self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote);
        self.pos += if triple { 3 } else { 1 };
        let mut out = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(SandboxError::syntax(
                    "unterminated string literal",
                    start_line,
                ));
            };
            if c == quote {
                if !triple {
                    self.pos += 1;
                    return Ok(out);
                }
                if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                    self.pos += 3;
                    return Ok(out);
                }
            }
            if c == '\n' {
                if !triple {
                    return Err(SandboxError::syntax(
                        "unterminated string literal",
                        start_line,
                    ));
                }
                self.line += 1;
            }
            if c == '\\' {
                let Some(next) = self.peek_at(1) else {
                    return Err(SandboxError::syntax(
                        "unterminated string literal",
                        start_line,
                    ));
                };
                self.pos += 2;
                match next {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    '0' => out.push('\0'),
                    '\\' => out.push('\\'),
                    '\'' => out.push('\''),
                    '"' => out.push('"'),
                    '\n' => self.line += 1,
                    other => {
                        out.push('\\');
                        out.push(other);
                    }
                }
                continue;
            }
            out.push(c);
            self.pos += 1;
        }
    }

    fn punct(&mut self, c: char) -> Result<()> {
        let next = self.peek_at(1);
        let (tok, width) = match (c, next) {
            ('*', Some('*')) => (Tok::DoubleStar, 2),
            ('/', Some('/')) => (Tok::DoubleSlash, 2),
            ('=', Some('=')) => (Tok::Eq, 2),
            ('!', Some('=')) => (Tok::Ne, 2),
            ('<', Some('=')) => (Tok::Le, 2),
            ('>', Some('=')) => (Tok::Ge, 2),
            ('+', Some('=')) => (Tok::PlusAssign, 2),
            ('-', Some('=')) => (Tok::MinusAssign, 2),
            ('*', Some('=')) => (Tok::StarAssign, 2),
            ('/', Some('=')) => (Tok::SlashAssign, 2),
            ('(', _) => (Tok::LParen, 1),
            (')', _) => (Tok::RParen, 1),
            ('[', _) => (Tok::LBracket, 1),
            (']', _) => (Tok::RBracket, 1),
            ('{', _) => (Tok::LBrace, 1),
            ('}', _) => (Tok::RBrace, 1),
            (',', _) => (Tok::Comma, 1),
            (':', _) => (Tok::Colon, 1),
            ('.', _) => (Tok::Dot, 1),
            (';', _) => (Tok::Semicolon, 1),
            ('=', _) => (Tok::Assign, 1),
            ('+', _) => (Tok::Plus, 1),
            ('-', _) => (Tok::Minus, 1),
            ('*', _) => (Tok::Star, 1),
            ('/', _) => (Tok::Slash, 1),
            ('%', _) => (Tok::Percent, 1),
            ('<', _) => (Tok::Lt, 1),
            ('>', _) => (Tok::Gt, 1),
            ('&', _) => (Tok::Amp, 1),
            ('|', _) => (Tok::Pipe, 1),
            ('^', _) => (Tok::Caret, 1),
            ('~', _) => (Tok::Tilde, 1),
            _ => {
                return Err(SandboxError::syntax(
                    format!("invalid character '{}'", c),
                    self.line,
                ))
            }
        };
        match tok {
            Tok::LParen | Tok::LBracket | Tok::LBrace => self.depth += 1,
            Tok::RParen | Tok::RBracket | Tok::RBrace => self.depth = self.depth.saturating_sub(1),
            _ => {}
        }
        self.pos += width;
        self.push(tok);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Tok> {
        tokenize(src).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn test_indentation_tokens() {
        let t = toks("for c in cols:\n    x = 1\ny = 2\n");
        assert!(t.contains(&Tok::Indent));
        assert!(t.contains(&Tok::Dedent));
        assert_eq!(t.last(), Some(&Tok::Eof));
    }

    #[test]
    fn test_brackets_join_lines() {
        let t = toks("x = [1,\n  2]\n");
        assert_eq!(
            t,
            vec![
                Tok::Name("x".into()),
                Tok::Assign,
                Tok::LBracket,
                Tok::Int(1),
                Tok::Comma,
                Tok::Int(2),
                Tok::RBracket,
                Tok::Newline,
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn test_numbers_and_strings() {
        let t = toks("a = 1_000 + .5 + 2e3 - 'it\\'s' # note\n");
        assert!(t.contains(&Tok::Int(1000)));
        assert!(t.contains(&Tok::Float(0.5)));
        assert!(t.contains(&Tok::Float(2000.0)));
        assert!(t.contains(&Tok::Str("it's".into())));
    }

    #[test]
    fn test_unterminated_string_is_error() {
        let err = tokenize("x = 'abc\n").unwrap_err();
        assert!(err.to_string().contains("unterminated string literal"));
    }

    #[test]
    fn test_bad_dedent_is_error() {
        assert!(tokenize("if x:\n    a = 1\n  b = 2\n").is_err());
    }

    #[test]
    fn test_line_numbers() {
        let tokens = tokenize("a = 1\n\n# c\nb = 2\n").unwrap();
        let b = tokens
            .iter()
            .find(|t| t.tok == Tok::Name("b".into()))
            .unwrap();
        assert_eq!(b.line, 4);
    }
}
