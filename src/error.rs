use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LexError {
    #[error("lexer has been shut down")]
    ShutDown,

    /// Raised by whoever consumes the tokens, tagged with where input stood
    #[error("{label}:{line}: {message}")]
    Aborted {
        label: String,
        line: usize,
        message: String,
    },
}

/// Ways a line supplier can come back without a normal line
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SupplyError {
    // Input is exhausted, carries whatever came after the last delimiter
    #[error("end of input")]
    Eof(String),

    #[error("input temporarily unavailable")]
    Retry,

    #[error("input cancelled")]
    Cancelled,

    #[error("{reason}")]
    Fatal { partial: String, reason: String },
}
