use logos::Logos;
use serde::Serialize;

/// A cooked token as the parser sees it. `Indent`/`Dedent`/`Newline`/`Eof`
/// never appear in the source text; they are synthesized from line structure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Token {
    Number(i64),
    Id(String),
    Str(String),
    Char(char),

    // Keywords
    Class,
    Return,
    If,
    Else,
    Def,
    Print,
    And,
    Or,
    Not,
    None,
    True,
    False,

    // Multi-character comparators
    Eq,
    NotEq,
    LessOrEq,
    GreaterOrEq,

    // Structure
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, thiserror::Error)]
#[error("lex error at byte {position}: {message}")]
pub struct LexError {
    pub code: &'static str,
    pub position: usize,
    pub message: String,
}

impl LexError {
    fn new(code: &'static str, position: usize, message: impl Into<String>) -> Self {
        LexError { code, position, message: message.into() }
    }
}

/// Raw lexemes as logos recognizes them. Spaces and comments are kept visible
/// to the cooker because indentation and blank-line suppression depend on them.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"#[^\n]*")]
enum RawToken {
    #[regex(r" +", |lex| lex.slice().len())]
    Spaces(usize),

    #[token("\n")]
    Newline,

    #[regex(r"[A-Za-z_][A-Za-z_0-9]*", |lex| lex.slice().to_string())]
    Word(String),

    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Number(i64),

    #[regex(r#""([^"\\\n\r]|\\.)*""#, unescape)]
    #[regex(r#"'([^'\\\n\r]|\\.)*'"#, unescape)]
    Str(String),

    #[token("==")]
    Eq,
    #[token("!=")]
    NotEq,
    #[token("<=")]
    LessOrEq,
    #[token(">=")]
    GreaterOrEq,

    #[regex(r"[.,()+\-*/:=<>!]", |lex| lex.slice().as_bytes()[0] as char)]
    Punct(char),
}

/// Strip the quotes and resolve escapes. `None` on an unknown escape makes
/// logos report the whole literal as an error span.
fn unescape(lex: &mut logos::Lexer<RawToken>) -> Option<String> {
    let slice = lex.slice();
    let body = &slice[1..slice.len() - 1];
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some('\\') => out.push('\\'),
            _ => return Option::None,
        }
    }
    Some(out)
}

fn classify_raw_error(bad: &str, position: usize) -> LexError {
    if let Some(quote @ ('"' | '\'')) = bad.chars().next() {
        if bad.len() >= 2 && bad.ends_with(quote) {
            return LexError::new("MY-L003", position, format!("invalid escape sequence in {bad}"));
        }
        return LexError::new("MY-L002", position, "unterminated string literal");
    }
    if !bad.is_empty() && bad.bytes().all(|b| b.is_ascii_digit()) {
        return LexError::new("MY-L005", position, format!("integer literal {bad} is out of range"));
    }
    if bad == "\t" {
        return LexError::new("MY-L001", position, "tab character; indentation uses spaces only");
    }
    LexError::new("MY-L001", position, format!("unexpected character {bad:?}"))
}

fn keyword(word: &str) -> Option<Token> {
    let tok = match word {
        "class" => Token::Class,
        "return" => Token::Return,
        "if" => Token::If,
        "else" => Token::Else,
        "def" => Token::Def,
        "print" => Token::Print,
        "or" => Token::Or,
        "None" => Token::None,
        "and" => Token::And,
        "not" => Token::Not,
        "True" => Token::True,
        "False" => Token::False,
        _ => return Option::None,
    };
    Some(tok)
}

/// Indent-aware lexer over a full source text.
///
/// The whole input is tokenized eagerly; `current()` and `next()` walk the
/// cooked stream and keep returning `Eof` once it is exhausted. The indent
/// unit is exactly two spaces; any other change in leading whitespace on a
/// line that carries tokens is a `MY-L004` error.
#[derive(Debug)]
pub struct Lexer {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Lexer {
    pub fn new(source: &str) -> Result<Self, LexError> {
        let tokens = cook(source)?;
        Ok(Lexer { tokens, pos: 0 })
    }

    pub fn current(&self) -> &Token {
        &self.tokens[self.pos].0
    }

    /// Advances and returns the new current token.
    pub fn next(&mut self) -> &Token {
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        self.current()
    }

    /// Byte offset of the current token in the source.
    pub fn position(&self) -> usize {
        self.tokens[self.pos].1
    }

    // The expect helpers exist for the parser; all of them fail with the
    // same error kind as ordinary lexer failures.

    pub fn expect(&self, expected: &Token) -> Result<(), LexError> {
        if self.current() == expected {
            return Ok(());
        }
        Err(self.expectation_error(&format!("{expected:?}")))
    }

    pub fn expect_char(&self, c: char) -> Result<(), LexError> {
        self.expect(&Token::Char(c))
    }

    pub fn expect_id(&self) -> Result<&str, LexError> {
        match self.current() {
            Token::Id(name) => Ok(name),
            _ => Err(self.expectation_error("an identifier")),
        }
    }

    pub fn expect_number(&self) -> Result<i64, LexError> {
        match self.current() {
            Token::Number(n) => Ok(*n),
            _ => Err(self.expectation_error("a number")),
        }
    }

    pub fn expect_string(&self) -> Result<&str, LexError> {
        match self.current() {
            Token::Str(s) => Ok(s),
            _ => Err(self.expectation_error("a string literal")),
        }
    }

    pub fn expect_next(&mut self, expected: &Token) -> Result<(), LexError> {
        self.next();
        self.expect(expected)
    }

    pub fn expect_next_id(&mut self) -> Result<&str, LexError> {
        self.next();
        self.expect_id()
    }

    fn expectation_error(&self, expected: &str) -> LexError {
        LexError::new(
            "MY-L006",
            self.position(),
            format!("expected {expected}, got {:?}", self.current()),
        )
    }
}

/// Runs the raw logos stream through the indentation protocol, producing the
/// cooked token stream the parser consumes.
fn cook(source: &str) -> Result<Vec<(Token, usize)>, LexError> {
    let mut raw = RawToken::lexer(source);
    let mut tokens: Vec<(Token, usize)> = Vec::new();

    // Indent depth in spaces, leading-space count of the line being read,
    // and whether the current line has emitted any token yet.
    let mut indent = 0usize;
    let mut leading = 0usize;
    let mut at_line_start = true;
    let mut line_has_tokens = false;
    let mut newlines_emitted = 0usize;

    while let Some(result) = raw.next() {
        let span = raw.span();
        let t = match result {
            Ok(t) => t,
            Err(()) => return Err(classify_raw_error(&source[span.clone()], span.start)),
        };
        match t {
            RawToken::Spaces(n) => {
                if at_line_start {
                    leading = n;
                }
            }
            RawToken::Newline => {
                if line_has_tokens {
                    tokens.push((Token::Newline, span.start));
                    newlines_emitted += 1;
                }
                at_line_start = true;
                leading = 0;
                line_has_tokens = false;
            }
            other => {
                if at_line_start {
                    apply_indent(&mut tokens, &mut indent, leading, span.start)?;
                    at_line_start = false;
                }
                let cooked = match other {
                    RawToken::Word(w) => keyword(&w).unwrap_or(Token::Id(w)),
                    RawToken::Number(n) => Token::Number(n),
                    RawToken::Str(s) => Token::Str(s),
                    RawToken::Eq => Token::Eq,
                    RawToken::NotEq => Token::NotEq,
                    RawToken::LessOrEq => Token::LessOrEq,
                    RawToken::GreaterOrEq => Token::GreaterOrEq,
                    RawToken::Punct(c) => Token::Char(c),
                    RawToken::Spaces(_) | RawToken::Newline => unreachable!(),
                };
                tokens.push((cooked, span.start));
                line_has_tokens = true;
            }
        }
    }

    let end = source.len();
    while indent > 0 {
        tokens.push((Token::Dedent, end));
        indent -= 2;
    }
    // A lone line without a trailing '\n' still gets its Newline so the
    // parser sees a terminated statement; files with earlier newlines do not
    // (the final unterminated line stays unterminated).
    if newlines_emitted == 0 && line_has_tokens {
        tokens.push((Token::Newline, end));
    }
    tokens.push((Token::Eof, end));
    Ok(tokens)
}

fn apply_indent(
    tokens: &mut Vec<(Token, usize)>,
    indent: &mut usize,
    leading: usize,
    position: usize,
) -> Result<(), LexError> {
    let diff = leading as i64 - *indent as i64;
    if diff == 0 {
        return Ok(());
    }
    if diff == 2 {
        *indent += 2;
        tokens.push((Token::Indent, position));
        return Ok(());
    }
    if diff < 0 && diff % 2 == 0 {
        for _ in 0..(-diff / 2) {
            tokens.push((Token::Dedent, position));
        }
        *indent = leading;
        return Ok(());
    }
    Err(LexError::new(
        "MY-L004",
        position,
        format!("indentation changed by {diff} spaces; the indent unit is two spaces"),
    ))
}
