//run: cargo test -- --nocapture

// Lexer for an oh-style shell language. 'session' is the live, line
// supplied lexer a parser pulls from, 'probe' checks a single line against a
// copy of it without disturbing anything

mod context;
mod cursor;
mod error;
mod lexer;
mod model;
mod options;
mod probe;
mod session;
mod source;
pub mod supplier;

pub use error::{LexError, SupplyError};
pub use model::{operator_name, Token, TokenKind, INTERRUPT};
pub use options::Options;
pub use probe::Probe;
pub use session::{Handle, Lexer};
pub use source::{TokenSource, YieldFn};
pub use supplier::LineSupplier;
