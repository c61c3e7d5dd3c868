//run: cargo test probe_tests -- --nocapture

use crate::error::LexError;
use crate::lexer::{Scanner, Step};
use crate::model::Token;
use crate::source::TokenSource;
use std::any::Any;

/// One line lexed on a private copy of a session, see 'Lexer::probe()'
///
/// Runs on the caller's thread and never asks for more input, so running
/// out is simply the end
pub struct Probe {
    scanner: Scanner,
    // Already scanned by the session but not yet read, comes out first
    held: Option<Token>,
    label: String,
    lines: usize,
}

impl Probe {
    pub(crate) fn new(scanner: Scanner, held: Option<Token>, label: String, lines: usize) -> Self {
        Self {
            scanner,
            held,
            label,
            lines,
        }
    }

    pub fn next_token(&mut self) -> Option<Token> {
        if let Some(token) = self.held.take() {
            return Some(token);
        }
        match self.scanner.scan() {
            Step::Emit(token) => Some(token),
            Step::Halt => None,
        }
    }

    /// Lex whatever is left and report whether the line could be run as is:
    /// nothing half-scanned, no group left open, not ending on an operator
    /// that wants another line
    pub fn is_complete(&mut self) -> bool {
        while self.next_token().is_some() {}
        self.scanner.is_settled()
    }

    pub fn first_word(&self) -> Option<String> {
        self.scanner.context().word()
    }
}

impl Iterator for Probe {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        self.next_token()
    }
}

impl TokenSource for Probe {
    fn lex(&mut self) -> Result<Token, LexError> {
        Ok(self.next_token().unwrap_or_else(Token::end_of_input))
    }

    // Only a trial run, nothing to tear down
    fn error(&mut self, message: &str) -> LexError {
        LexError::Aborted {
            label: self.label.clone(),
            line: self.lines,
            message: message.to_string(),
        }
    }

    fn submit(&mut self, _value: Box<dyn Any>) -> bool {
        true
    }

    fn first_word(&self) -> Option<String> {
        self.scanner.context().word()
    }
}

#[cfg(test)]
mod probe_tests {
    use super::*;
    use crate::model::TokenKind;
    use crate::options::Options;
    use crate::session::Lexer;

    fn probe(line: &str) -> Probe {
        Lexer::new(Options::default().interactive(true)).probe(line)
    }

    #[test]
    fn complete_lines() {
        let lines = ["echo hi\n", "\n", "", "(a; b) | c\n", "{ x }\n", "a && b\n", "# a note\n"];
        for line in &lines {
            assert!(probe(line).is_complete(), "{:?}", line);
        }
    }

    #[test]
    fn incomplete_lines() {
        let lines = ["echo \"hi\n", "(a\n", "{\n", "a |\n", "a &&\n", "x >\n", "a\\\n", "echo hi"];
        for line in &lines {
            assert!(!probe(line).is_complete(), "{:?}", line);
        }
    }

    #[test]
    fn iterates_tokens() {
        let kinds: Vec<_> = probe("cd /tmp; ls\n").map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Symbol,
                TokenKind::Symbol,
                TokenKind::Semicolon,
                TokenKind::Symbol,
                TokenKind::Newline,
            ]
        );
    }

    #[test]
    fn token_source_never_blocks() {
        let mut probe = probe("ls -l");
        assert_eq!(probe.lex(), Ok(Token::new(TokenKind::Symbol, "ls")));
        // "-l" has no delimiter yet
        assert_eq!(probe.lex(), Ok(Token::end_of_input()));
        assert_eq!(TokenSource::first_word(&probe).as_deref(), Some("ls"));
        assert!(probe.submit(Box::new(())));

        let err = probe.error("nope");
        assert_eq!(err.to_string(), "stdin:0: nope");
        // Still usable, a probe has nothing to tear down
        assert_eq!(probe.lex(), Ok(Token::end_of_input()));
    }
}
