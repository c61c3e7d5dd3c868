// Interactive token dump: every line typed at the prompt is lexed and the
// tokens printed along with the current first word. RUST_LOG picks the log
// level (default warn), logs go to stderr

use crossterm::{
    cursor,
    event::{Event, EventStream, KeyCode, KeyModifiers},
    style::Print,
    terminal, ExecutableCommand,
};
use futures::future::{self, FutureExt, LocalBoxFuture};
use futures::stream::{LocalBoxStream, Stream, StreamExt};
use shell_lexer::{Lexer, LineSupplier, Options, SupplyError, TokenSource};
use std::io::Write;
use tracing_subscriber::EnvFilter;

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = async_std::task::block_on(repl()) {
        let _ = terminal::disable_raw_mode();
        eprintln!("lexdump: {}", err);
        std::process::exit(1);
    }
}

fn parse_user_input(input_stream: EventStream) -> impl Stream<Item = Result<String, SupplyError>> {
    let mut line_buffer = String::with_capacity(1024);
    let mut stdout = std::io::stdout();
    input_stream.filter_map(move |event| {
        let output = match event {
            Ok(Event::Key(e)) => match (e.code, e.modifiers) {
                (KeyCode::Esc, _) => Some(Err(SupplyError::Eof(line_buffer.split_off(0)))),
                (KeyCode::Char('c'), KeyModifiers::CONTROL) => {
                    line_buffer.clear();
                    let _ = stdout.write_all(b"^C\r\n");
                    Some(Err(SupplyError::Cancelled))
                }
                (KeyCode::Char('d'), KeyModifiers::CONTROL) => {
                    if line_buffer.is_empty() {
                        Some(Err(SupplyError::Eof(String::new())))
                    } else {
                        None
                    }
                }

                (KeyCode::Enter, _) => {
                    let _ = stdout.write_all(b"\r\n");
                    let mut line = line_buffer.split_off(0);
                    line.push('\n');
                    Some(Ok(line))
                }

                (KeyCode::Backspace, _) => {
                    if line_buffer.pop().is_some() {
                        let _ = stdout
                            .execute(cursor::MoveLeft(1))
                            .and_then(|out| out.execute(Print(" ")))
                            .and_then(|out| out.execute(cursor::MoveLeft(1)));
                    }
                    None
                }

                (KeyCode::Char(ch), _) => {
                    let _ = stdout.execute(Print(ch));
                    line_buffer.push(ch);
                    None
                }
                _ => None,
            },
            Ok(_) => None,
            Err(err) => Some(Err(SupplyError::Fatal {
                partial: line_buffer.split_off(0),
                reason: err.to_string(),
            })),
        };
        future::ready(output)
    })
}

fn prompt() -> &'static str {
    "> "
}

struct Terminal {
    lines: LocalBoxStream<'static, Result<String, SupplyError>>,
}

impl LineSupplier for Terminal {
    fn next_line(&mut self, _delimiter: char) -> LocalBoxFuture<'_, Result<String, SupplyError>> {
        async move {
            let _ = std::io::stdout().execute(Print(prompt()));
            match self.lines.next().await {
                Some(line) => line,
                None => Err(SupplyError::Eof(String::new())),
            }
        }
        .boxed_local()
    }
}

async fn repl() -> crossterm::Result<()> {
    let mut stdout = std::io::stdout();

    terminal::enable_raw_mode()?;

    let lines = parse_user_input(EventStream::new()).boxed_local();
    let options = Options::new("tty").interactive(true);
    let mut lexer = Lexer::new(options).with_supplier(Terminal { lines });

    loop {
        match lexer.next_token().await {
            Ok(Some(token)) if lexer.is_fatal(&token) => {
                // Forget the half-typed command and start over
                lexer.reset();
                lexer.discard();
            }
            Ok(Some(token)) => {
                let first = lexer.first_word().unwrap_or_default();
                let line = format!("  {:<32} first word {:?}\r\n", token.to_string(), first);
                stdout.execute(Print(line))?;
            }
            Ok(None) => break,
            Err(err) => {
                stdout.execute(Print(format!("{}\r\n", err)))?;
                break;
            }
        }
    }

    terminal::disable_raw_mode()?;
    Ok(())
}
