//run: cargo test model_tests -- --nocapture

use std::fmt;

// The lexical surface the grammar is written against. The kind alone decides
// how the parser reads 'Token.text', nothing downstream re-classifies
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // Single characters
    Newline,
    Percent,
    OpenParen,
    CloseParen,
    Semicolon,
    At,
    Backtick,
    OpenBrace,
    CloseBrace,
    Colon,

    // Operators, text is the normalized operation name (see 'operator_name')
    Background,
    And,
    Or,
    Pipe,
    Redirect,
    Substitute,
    Cons,

    // Text is what sits between the delimiters, escapes untouched
    SingleQuoted,
    DoubleQuoted,
    BangString,

    Symbol,
    BraceExpansion,

    // Text is a diagnostic
    Error,
    EndOfInput,
    Interrupt,
}

impl TokenKind {
    pub fn punctuation(ch: char) -> Option<Self> {
        Some(match ch {
            '\n' => TokenKind::Newline,
            '%' => TokenKind::Percent,
            '(' => TokenKind::OpenParen,
            ')' => TokenKind::CloseParen,
            ';' => TokenKind::Semicolon,
            '@' => TokenKind::At,
            '`' => TokenKind::Backtick,
            '{' => TokenKind::OpenBrace,
            '}' => TokenKind::CloseBrace,
            ':' => TokenKind::Colon,
            _ => return None,
        })
    }

    pub fn as_char(self) -> Option<char> {
        Some(match self {
            TokenKind::Newline => '\n',
            TokenKind::Percent => '%',
            TokenKind::OpenParen => '(',
            TokenKind::CloseParen => ')',
            TokenKind::Semicolon => ';',
            TokenKind::At => '@',
            TokenKind::Backtick => '`',
            TokenKind::OpenBrace => '{',
            TokenKind::CloseBrace => '}',
            TokenKind::Colon => ':',
            _ => return None,
        })
    }

    /// A statement ending in one of these carries on past the newline
    pub fn continues_line(self) -> bool {
        match self {
            TokenKind::Background
            | TokenKind::And
            | TokenKind::Or
            | TokenKind::Pipe
            | TokenKind::Redirect => true,
            _ => false,
        }
    }

    pub fn opens_group(self) -> bool {
        self == TokenKind::OpenParen || self == TokenKind::OpenBrace
    }

    pub fn closes_group(self) -> bool {
        self == TokenKind::CloseParen || self == TokenKind::CloseBrace
    }

    fn is_operator(self) -> bool {
        match self {
            TokenKind::Background
            | TokenKind::And
            | TokenKind::Or
            | TokenKind::Pipe
            | TokenKind::Redirect
            | TokenKind::Substitute => true,
            _ => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
}

/// The one token that means "the user asked to abort"
pub const INTERRUPT: Token = Token {
    kind: TokenKind::Interrupt,
    text: String::new(),
};

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(TokenKind::Error, message)
    }

    pub fn end_of_input() -> Self {
        Self::new(TokenKind::EndOfInput, "")
    }

    pub fn is_fatal(&self) -> bool {
        self.kind == TokenKind::Interrupt
    }

    // Turn raw scanned text into what the parser expects
    pub(crate) fn normalize(self) -> Self {
        let Token { kind, text } = self;
        match kind {
            TokenKind::Symbol => classify_symbol(text),
            TokenKind::Newline => Token::new(kind, "\n"),
            TokenKind::SingleQuoted | TokenKind::DoubleQuoted => {
                Token::new(kind, unquote(&text, 1))
            }
            TokenKind::BangString => Token::new(kind, unquote(&text, 2)),
            _ if kind.is_operator() => match operator_name(&text) {
                Some(name) => Token::new(kind, name),
                None => Token::new(kind, text),
            },
            _ => Token::new(kind, text),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind.as_char() {
            Some('\n') => write!(f, "{:?}", self.kind),
            Some(ch) => write!(f, "{:?}({})", self.kind, ch),
            None => write!(f, "{:?}({:?})", self.kind, self.text),
        }
    }
}

/// Operation names the grammar dispatches on
pub fn operator_name(op: &str) -> Option<&'static str> {
    Some(match op {
        "!>" => "_redirect_stderr_",
        "!>>" => "_append_stderr_",
        "!|" => "_pipe_stderr_",
        "!|+" => "_channel_stderr_",
        "&" => "spawn",
        "&&" => "and",
        "<" => "_redirect_stdin_",
        "<(" => "_substitute_stdout_",
        ">" => "_redirect_stdout_",
        ">(" => "_substitute_stdin_",
        ">>" => "_append_stdout_",
        "|" => "_pipe_stdout_",
        "|+" => "_channel_stdout_",
        "||" => "or",
        _ => return None,
    })
}

// A lone brace is punctuation, any other symbol holding a brace is a brace
// expansion
fn classify_symbol(text: String) -> Token {
    let brace = text.chars().filter(|c| *c == '{' || *c == '}').last();
    match brace {
        None => Token::new(TokenKind::Symbol, text),
        Some(ch) if text.len() == 1 => match TokenKind::punctuation(ch) {
            Some(kind) => Token::new(kind, text),
            None => Token::new(TokenKind::Symbol, text),
        },
        Some(_) => Token::new(TokenKind::BraceExpansion, text),
    }
}

fn unquote(text: &str, open: usize) -> &str {
    let end = text.len().saturating_sub(1).max(open);
    text.get(open..end).unwrap_or("")
}
