//run: cargo test supplier_tests -- --nocapture

use crate::error::SupplyError;
use futures::future::{FutureExt, LocalBoxFuture};
use futures::stream::{self, Stream, StreamExt};

/// Where a session gets more text once the buffer runs dry
///
/// 'delimiter' is what the session wants the line to end with, a terminal
/// front end may use it to decide when a line is done. Returning
/// 'SupplyError::Eof' ends input for good, the text it carries is still
/// lexed
pub trait LineSupplier {
    fn next_line(&mut self, delimiter: char) -> LocalBoxFuture<'_, Result<String, SupplyError>>;
}

/// Any stream of lines, the stream running out counts as end of input
pub struct StreamSupplier<S> {
    lines: S,
}

impl<S> LineSupplier for StreamSupplier<S>
where
    S: Stream<Item = Result<String, SupplyError>> + Unpin,
{
    fn next_line(&mut self, _delimiter: char) -> LocalBoxFuture<'_, Result<String, SupplyError>> {
        async move {
            match self.lines.next().await {
                Some(line) => line,
                None => Err(SupplyError::Eof(String::new())),
            }
        }
        .boxed_local()
    }
}

pub fn from_stream<S>(lines: S) -> StreamSupplier<S>
where
    S: Stream<Item = Result<String, SupplyError>> + Unpin,
{
    StreamSupplier { lines }
}

// Each item is handed out as is, so include the '\n' when one is wanted
pub fn from_lines<I, T>(lines: I) -> impl LineSupplier
where
    I: IntoIterator<Item = T>,
    T: Into<String>,
{
    let lines: Vec<_> = lines.into_iter().map(|line| Ok(line.into())).collect();
    from_stream(stream::iter(lines))
}

#[cfg(test)]
mod supplier_tests {
    use super::*;
    use async_std::task::block_on;

    #[test]
    fn lines_then_eof() {
        let mut supplier = from_lines(vec!["a\n", "b"]);
        block_on(async {
            assert_eq!(supplier.next_line('\n').await, Ok("a\n".to_string()));
            assert_eq!(supplier.next_line('\n').await, Ok("b".to_string()));
            assert_eq!(supplier.next_line('\n').await, Err(SupplyError::Eof(String::new())));
            assert_eq!(supplier.next_line('\n').await, Err(SupplyError::Eof(String::new())));
        });
    }

    #[test]
    fn errors_pass_through() {
        let items = vec![Err(SupplyError::Retry), Ok("x\n".to_string())];
        let mut supplier = from_stream(stream::iter(items));
        block_on(async {
            assert_eq!(supplier.next_line('\n').await, Err(SupplyError::Retry));
            assert_eq!(supplier.next_line('\n').await, Ok("x\n".to_string()));
        });
    }
}
