use crate::error::LexError;
use crate::model::Token;
use std::any::Any;

/// Called with every value the parser finishes, 'false' asks it to stop
pub type YieldFn = Box<dyn FnMut(Box<dyn Any>) -> bool>;

/// What a parser pulls tokens from. Both a live 'Lexer' and a 'Probe' are
/// one, so the same grammar can run for real or just to check a line
pub trait TokenSource {
    /// Next token, 'EndOfInput' once there are no more
    fn lex(&mut self) -> Result<Token, LexError>;

    /// The parser gave up, turn 'message' into the error to report
    fn error(&mut self, message: &str) -> LexError;

    fn is_fatal(&self, token: &Token) -> bool {
        token.is_fatal()
    }

    fn submit(&mut self, value: Box<dyn Any>) -> bool;

    fn first_word(&self) -> Option<String>;
}
