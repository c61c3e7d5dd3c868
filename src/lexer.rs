//run: cargo test lexer_tests -- --nocapture

// Basically a finite state machine, every 'Action' is one state and
// 'Scanner::dispatch()' is the transition function. A state looks at the
// next rune(s) and says where to go next and maybe what to emit
//
// Running out of input is not an error anywhere in here: the state that hit
// the end is kept and scanning picks up from it once more input is appended

use crate::context::Context;
use crate::cursor::{Cursor, Rune};
use crate::model::{Token, TokenKind};
use tracing::{trace, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    AfterAmpersand,
    AfterBackslash,
    AfterBang,
    AfterBangGreater,
    AfterColon,
    AfterGreaterThan,
    AfterLessThan,
    AfterPipe,
    ScanBangString,
    ScanDoubleQuoted,
    ScanSingleQuoted,
    ScanSymbol,
    SkipComment,
    SkipWhitespace,
}

impl Action {
    pub fn name(self) -> &'static str {
        match self {
            Action::AfterAmpersand => "AfterAmpersand",
            Action::AfterBackslash => "AfterBackslash",
            Action::AfterBang => "AfterBang",
            Action::AfterBangGreater => "AfterBangGreater",
            Action::AfterColon => "AfterColon",
            Action::AfterGreaterThan => "AfterGreaterThan",
            Action::AfterLessThan => "AfterLessThan",
            Action::AfterPipe => "AfterPipe",
            Action::ScanBangString => "ScanBangString",
            Action::ScanDoubleQuoted => "ScanDoubleQuoted",
            Action::ScanSingleQuoted => "ScanSingleQuoted",
            Action::ScanSymbol => "ScanSymbol",
            Action::SkipComment => "SkipComment",
            Action::SkipWhitespace => "SkipWhitespace",
        }
    }
}

// 'next: None' means out of input, stay in the current state
struct Transition {
    next: Option<Action>,
    token: Option<Token>,
}

impl Transition {
    fn halt() -> Self {
        Self {
            next: None,
            token: None,
        }
    }

    fn goto(next: Action) -> Self {
        Self {
            next: Some(next),
            token: None,
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum Step {
    Emit(Token),
    Halt,
}

// Terminates a symbol
fn is_delimiter(ch: char) -> bool {
    match ch {
        '\t' | '\n' | '\r' | ' ' | '"' | '#' | '%' | '&' | '\'' | '(' | ')' | ':' | ';' | '<'
        | '>' | '@' | '`' | '|' => true,
        _ => false,
    }
}

#[derive(Debug)]
pub struct Scanner {
    cursor: Cursor,
    state: Action,
    // Where 'AfterBackslash' goes back to
    saved: Option<Action>,
    // Kind of the last token emitted
    after: Option<TokenKind>,
    // Open '(' and '{', tracked whether or not 'context' is
    depth: usize,
    context: Context,
}

impl Scanner {
    pub fn new(context: Context) -> Self {
        Self {
            cursor: Cursor::new(),
            state: Action::SkipWhitespace,
            saved: None,
            after: None,
            depth: 0,
            context,
        }
    }

    // Same position and state, but a private buffer and context
    pub fn snapshot(&self) -> Self {
        Self {
            cursor: self.cursor.clone(),
            state: self.state,
            saved: self.saved,
            after: self.after,
            depth: self.depth,
            context: self.context.fork(),
        }
    }

    pub fn append(&mut self, input: &[u8]) {
        self.cursor.append(input);
    }

    /// Forget everything not yet emitted and start over at a clean state
    pub fn discard(&mut self) {
        self.cursor.clear();
        self.state = Action::SkipWhitespace;
        self.saved = None;
        self.after = None;
        self.depth = 0;
    }

    #[cfg(test)]
    pub fn state(&self) -> Action {
        self.state
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    #[cfg(test)]
    pub fn pending(&self) -> &[u8] {
        self.cursor.pending()
    }

    /// Nothing half-scanned, no group left open, and the last token does not
    /// drag the statement onto the next line
    pub fn is_settled(&self) -> bool {
        self.state == Action::SkipWhitespace
            && self.saved.is_none()
            && self.cursor.is_drained()
            && self.depth == 0
            && !self.after.map_or(false, TokenKind::continues_line)
    }

    /// Run until the next token or until the input runs out
    pub fn scan(&mut self) -> Step {
        loop {
            let Transition { next, token } = self.dispatch();
            match next {
                Some(action) => self.state = action,
                None => {
                    trace!(state = self.state.name(), "out of input");
                    return Step::Halt;
                }
            }
            if let Some(token) = token.and_then(|t| self.finish(t)) {
                trace!(kind = ?token.kind, text = %token.text, "emit");
                return Step::Emit(token);
            }
        }
    }

    fn dispatch(&mut self) -> Transition {
        match self.state {
            Action::AfterAmpersand => self.after_ampersand(),
            Action::AfterBackslash => self.after_backslash(),
            Action::AfterBang => self.after_bang(),
            Action::AfterBangGreater => self.after_bang_greater(),
            Action::AfterColon => self.after_colon(),
            Action::AfterGreaterThan => self.after_greater_than(),
            Action::AfterLessThan => self.after_less_than(),
            Action::AfterPipe => self.after_pipe(),
            Action::ScanBangString => {
                self.scan_quoted('"', TokenKind::BangString, Some(Action::ScanBangString))
            }
            Action::ScanDoubleQuoted => {
                self.scan_quoted('"', TokenKind::DoubleQuoted, Some(Action::ScanDoubleQuoted))
            }
            Action::ScanSingleQuoted => self.scan_quoted('\'', TokenKind::SingleQuoted, None),
            Action::ScanSymbol => self.scan_symbol(),
            Action::SkipComment => self.skip_comment(),
            Action::SkipWhitespace => self.skip_whitespace(),
        }
    }

    // Everything an emitted token does besides being sent
    fn finish(&mut self, token: Token) -> Option<Token> {
        // Reported in the middle of some other token, leaves no trace
        if token.kind == TokenKind::Error {
            return Some(token);
        }
        if token.kind == TokenKind::Newline && self.after.map_or(false, TokenKind::continues_line) {
            return None;
        }

        let token = token.normalize();
        if token.kind.opens_group() {
            self.depth += 1;
        } else if token.kind.closes_group() {
            self.depth = self.depth.saturating_sub(1);
        }
        self.context.observe(&token);
        self.after = Some(token.kind);
        Some(token)
    }

    fn emit(&mut self, kind: TokenKind, next: Action) -> Transition {
        Transition {
            next: Some(next),
            token: Some(Token::new(kind, self.cursor.take())),
        }
    }

    // Undecodable input. Report it and carry on in 'next', the byte stays in
    // the token being scanned and comes out of 'take()' as U+FFFD
    fn reject(&mut self, byte: u8, next: Action) -> Transition {
        warn!(byte, state = self.state.name(), "invalid UTF-8");
        Transition {
            next: Some(next),
            token: Some(Token::error(format!("invalid UTF-8 byte {:#04x}", byte))),
        }
    }

    fn peek(&self) -> (Rune, usize) {
        self.cursor.peek()
    }

    ////////////////////////////////////////////////////////////////////////////
    // States

    fn skip_whitespace(&mut self) -> Transition {
        loop {
            self.cursor.mark();
            let ch = match self.cursor.next() {
                Rune::Char(ch) => ch,
                Rune::Invalid(byte) => return self.reject(byte, Action::SkipWhitespace),
                Rune::End => return Transition::halt(),
            };

            let next = match ch {
                '\t' | '\r' | ' ' => continue,
                '\n' => return self.emit(TokenKind::Newline, Action::SkipWhitespace),
                '%' => return self.emit(TokenKind::Percent, Action::SkipWhitespace),
                '(' => return self.emit(TokenKind::OpenParen, Action::SkipWhitespace),
                ')' => return self.emit(TokenKind::CloseParen, Action::SkipWhitespace),
                ';' => return self.emit(TokenKind::Semicolon, Action::SkipWhitespace),
                '@' => return self.emit(TokenKind::At, Action::SkipWhitespace),
                '`' => return self.emit(TokenKind::Backtick, Action::SkipWhitespace),
                '}' => return self.emit(TokenKind::CloseBrace, Action::SkipWhitespace),
                '!' => Action::AfterBang,
                '"' => Action::ScanDoubleQuoted,
                '#' => Action::SkipComment,
                '&' => Action::AfterAmpersand,
                '\'' => Action::ScanSingleQuoted,
                ':' => Action::AfterColon,
                '<' => Action::AfterLessThan,
                '>' => Action::AfterGreaterThan,
                '\\' => {
                    self.saved = Some(Action::ScanSymbol);
                    Action::AfterBackslash
                }
                '|' => Action::AfterPipe,
                // '{' included, a lone one comes back out of 'normalize()'
                // as punctuation
                _ => Action::ScanSymbol,
            };
            return Transition::goto(next);
        }
    }

    fn after_ampersand(&mut self) -> Transition {
        match self.peek() {
            (Rune::End, _) => Transition::halt(),
            (Rune::Char('&'), width) => {
                self.cursor.skip(width);
                self.emit(TokenKind::And, Action::SkipWhitespace)
            }
            _ => self.emit(TokenKind::Background, Action::SkipWhitespace),
        }
    }

    // Exactly one rune, whatever it is, then back to whoever sent us here
    fn after_backslash(&mut self) -> Transition {
        match self.cursor.next() {
            Rune::End => Transition::halt(),
            // Escapes the bad byte like any other
            Rune::Invalid(byte) => {
                let resume = self.saved.take().unwrap_or(Action::ScanSymbol);
                self.reject(byte, resume)
            }
            Rune::Char(_) => Transition::goto(self.saved.take().unwrap_or(Action::ScanSymbol)),
        }
    }

    fn after_bang(&mut self) -> Transition {
        let (rune, width) = self.peek();
        let next = match rune {
            Rune::End => return Transition::halt(),
            Rune::Char('"') => Action::ScanBangString,
            Rune::Char('>') => Action::AfterBangGreater,
            Rune::Char('|') => Action::AfterPipe,
            _ => return Transition::goto(Action::ScanSymbol),
        };
        self.cursor.skip(width);
        Transition::goto(next)
    }

    fn after_bang_greater(&mut self) -> Transition {
        match self.peek() {
            (Rune::End, _) => return Transition::halt(),
            (Rune::Char('>'), width) => self.cursor.skip(width),
            _ => {}
        }
        self.emit(TokenKind::Redirect, Action::SkipWhitespace)
    }

    fn after_colon(&mut self) -> Transition {
        match self.peek() {
            (Rune::End, _) => Transition::halt(),
            (Rune::Char(':'), width) => {
                self.cursor.skip(width);
                self.emit(TokenKind::Cons, Action::SkipWhitespace)
            }
            _ => self.emit(TokenKind::Colon, Action::SkipWhitespace),
        }
    }

    fn after_greater_than(&mut self) -> Transition {
        let kind = match self.peek() {
            (Rune::End, _) => return Transition::halt(),
            (Rune::Char('('), width) => {
                self.cursor.skip(width);
                TokenKind::Substitute
            }
            (Rune::Char('>'), width) => {
                self.cursor.skip(width);
                TokenKind::Redirect
            }
            _ => TokenKind::Redirect,
        };
        self.emit(kind, Action::SkipWhitespace)
    }

    fn after_less_than(&mut self) -> Transition {
        let kind = match self.peek() {
            (Rune::End, _) => return Transition::halt(),
            (Rune::Char('('), width) => {
                self.cursor.skip(width);
                TokenKind::Substitute
            }
            _ => TokenKind::Redirect,
        };
        self.emit(kind, Action::SkipWhitespace)
    }

    fn after_pipe(&mut self) -> Transition {
        let kind = match self.peek() {
            (Rune::End, _) => return Transition::halt(),
            (Rune::Char('+'), width) => {
                self.cursor.skip(width);
                TokenKind::Pipe
            }
            // "!||" is "!|" then a pipe of its own
            (Rune::Char('|'), width) if self.cursor.first_byte() != Some(b'!') => {
                self.cursor.skip(width);
                TokenKind::Or
            }
            _ => TokenKind::Pipe,
        };
        self.emit(kind, Action::SkipWhitespace)
    }

    // 'resume' is where a backslash returns to, 'None' turns escapes off
    fn scan_quoted(&mut self, quote: char, kind: TokenKind, resume: Option<Action>) -> Transition {
        loop {
            match self.cursor.next() {
                Rune::End => return Transition::halt(),
                Rune::Invalid(byte) => return self.reject(byte, self.state),
                Rune::Char(ch) if ch == quote => return self.emit(kind, Action::SkipWhitespace),
                Rune::Char('\\') if resume.is_some() => {
                    self.saved = resume;
                    return Transition::goto(Action::AfterBackslash);
                }
                Rune::Char(_) => {}
            }
        }
    }

    fn scan_symbol(&mut self) -> Transition {
        loop {
            match self.cursor.next() {
                Rune::End => return Transition::halt(),
                Rune::Invalid(byte) => return self.reject(byte, Action::ScanSymbol),
                Rune::Char(ch) if is_delimiter(ch) => {
                    self.cursor.backup();
                    return self.emit(TokenKind::Symbol, Action::SkipWhitespace);
                }
                Rune::Char('\\') => {
                    self.saved = Some(Action::ScanSymbol);
                    return Transition::goto(Action::AfterBackslash);
                }
                Rune::Char(_) => {}
            }
        }
    }

    fn skip_comment(&mut self) -> Transition {
        loop {
            match self.cursor.next() {
                Rune::End => return Transition::halt(),
                Rune::Char('\n') => return self.emit(TokenKind::Newline, Action::SkipWhitespace),
                // Comments are thrown away, bad bytes in them included
                Rune::Invalid(_) | Rune::Char(_) => {}
            }
        }
    }
}
