//run: cargo test session_tests -- --nocapture

// The live lexer. Scanning happens on a spawned task that hands tokens over
// one at a time through a zero-capacity channel, so it is never more than
// one token ahead of whoever is reading. When the task runs out of input it
// drops its end of the channel, the reader sees that, gets another line from
// the supplier and spawns a new task on the longer buffer
//
// Interrupts and shutdowns travel on a second channel so they can cut into
// a reader that is parked on either the tokens or the supplier

use crate::context::Context;
use crate::error::{LexError, SupplyError};
use crate::lexer::{Scanner, Step};
use crate::model::{Token, INTERRUPT};
use crate::options::Options;
use crate::probe::Probe;
use crate::source::{TokenSource, YieldFn};
use crate::supplier::LineSupplier;

use futures::channel::mpsc::{self, Receiver, Sender, UnboundedReceiver, UnboundedSender};
use futures::{select, FutureExt, SinkExt, StreamExt};
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, trace, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Signal {
    Interrupt,
    Shutdown,
}

// Tokens go out numbered so the reader can tell which one it got
type Ticket = (u64, Token);

// What woke up the reader
enum Event {
    Token(Option<Ticket>),
    Signal(Option<Signal>),
    Line(Result<String, SupplyError>),
}

/// Lets other tasks (or a signal handler thread) poke a running 'Lexer'
#[derive(Clone, Debug)]
pub struct Handle {
    alive: Arc<AtomicBool>,
    signals: UnboundedSender<Signal>,
}

impl Handle {
    /// The reader gets the interrupt token next, even if it is blocked
    pub fn interrupt(&self) {
        let _ = self.signals.unbounded_send(Signal::Interrupt);
    }

    /// Stop scanning for good. A blocked reader gets "no token"
    pub fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
        let _ = self.signals.unbounded_send(Signal::Shutdown);
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

// Everything the scan task and the reader both touch
struct Shared {
    scanner: Scanner,
    // Scanned but not yet taken by the reader. The scanner has already moved
    // past it, so a snapshot has to replay it
    held: Option<Ticket>,
    sequence: u64,
}

impl Shared {
    fn release(&mut self, sequence: u64) {
        if self.held.as_ref().map(|(n, _)| *n) == Some(sequence) {
            self.held = None;
        }
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

// Never hold the lock across an await
//
// @VOLATILE: the closed check has to happen under the lock. 'discard()'
//            closes the channel before clearing the buffer, so a task that
//            gets in afterwards cannot eat input meant for its replacement
fn step(shared: &Mutex<Shared>, tokens: &Sender<Ticket>) -> Option<Ticket> {
    let mut shared = lock(shared);
    if tokens.is_closed() {
        return None;
    }
    match shared.scanner.scan() {
        Step::Emit(token) => {
            shared.sequence += 1;
            let ticket = (shared.sequence, token);
            shared.held = Some(ticket.clone());
            Some(ticket)
        }
        Step::Halt => None,
    }
}

async fn run(shared: Arc<Mutex<Shared>>, alive: Arc<AtomicBool>, mut tokens: Sender<Ticket>) {
    while alive.load(Ordering::SeqCst) {
        let ticket = match step(&shared, &tokens) {
            Some(ticket) => ticket,
            None => break,
        };
        // Shut down while scanning, do not hand out anything more
        if !alive.load(Ordering::SeqCst) {
            break;
        }
        if tokens.send(ticket).await.is_err() {
            break;
        }
    }
    trace!("scan task done");
}

pub struct Lexer {
    shared: Arc<Mutex<Shared>>,
    context: Context,
    tokens: Receiver<Ticket>,
    signals: UnboundedReceiver<Signal>,
    handle: Handle,
    // A scan task owns the other end of 'tokens'
    running: bool,
    // Input was appended while a task was running, it may have missed it
    rescan: bool,
    supplier: Option<Box<dyn LineSupplier>>,
    on_yield: Option<YieldFn>,
    failure: Option<LexError>,
    label: String,
    lines: usize,
}

impl Lexer {
    pub fn new(options: Options) -> Self {
        let context = Context::default();
        if options.interactive {
            context.activate();
        }
        let (signal_sender, signals) = mpsc::unbounded();
        // Nothing to read until the first scan is spawned
        let (_, tokens) = mpsc::channel(0);

        Self {
            shared: Arc::new(Mutex::new(Shared {
                scanner: Scanner::new(context.clone()),
                held: None,
                sequence: 0,
            })),
            context,
            tokens,
            signals,
            handle: Handle {
                alive: Arc::new(AtomicBool::new(true)),
                signals: signal_sender,
            },
            running: false,
            rescan: false,
            supplier: None,
            on_yield: None,
            failure: None,
            label: options.label,
            lines: options.lines,
        }
    }

    pub fn with_supplier(mut self, supplier: impl LineSupplier + 'static) -> Self {
        self.supplier = Some(Box::new(supplier));
        self
    }

    pub fn on_yield(mut self, on_yield: impl FnMut(Box<dyn Any>) -> bool + 'static) -> Self {
        self.on_yield = Some(Box::new(on_yield));
        self
    }

    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn lines(&self) -> usize {
        self.lines
    }

    pub fn first_word(&self) -> Option<String> {
        self.context.word()
    }

    /// Start tracking first words (again) from an empty top level
    pub fn interactive(&self) {
        self.context.activate();
    }

    pub fn reset(&self) {
        self.context.reset();
    }

    /// Throw away everything not yet handed out, including a token the
    /// scan task may already be holding
    pub fn discard(&mut self) {
        self.tokens.close();
        self.running = false;
        self.rescan = false;
        let mut shared = lock(&self.shared);
        shared.scanner.discard();
        shared.held = None;
        debug!(label = %self.label, "discarded pending input");
    }

    /// Append text directly, for sessions without a supplier (or on top of one)
    pub fn feed(&mut self, input: &str) -> Result<(), LexError> {
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        if !self.handle.is_alive() {
            return Err(LexError::ShutDown);
        }

        lock(&self.shared).scanner.append(input.as_bytes());
        if self.running {
            self.rescan = true;
        } else {
            self.spawn();
        }
        Ok(())
    }

    /// Lex 'line' on top of a private copy of the current state. Nothing the
    /// probe does is seen by this lexer
    pub fn probe(&self, line: &str) -> Probe {
        let shared = lock(&self.shared);
        let mut scanner = shared.scanner.snapshot();
        scanner.append(line.as_bytes());
        let held = shared.held.as_ref().map(|(_, token)| token.clone());
        Probe::new(scanner, held, self.label.clone(), self.lines)
    }

    /// 'Ok(None)' once there is nothing left: no supplier and the buffer
    /// is used up, or the lexer was shut down
    pub async fn next_token(&mut self) -> Result<Option<Token>, LexError> {
        let mut retries = 0usize;
        loop {
            if let Some(failure) = &self.failure {
                return Err(failure.clone());
            }
            if let Some(Some(signal)) = self.signals.next().now_or_never() {
                match self.on_signal(signal) {
                    Some(token) => return Ok(Some(token)),
                    None => continue,
                }
            }
            if !self.handle.is_alive() {
                return Ok(None);
            }

            if self.running {
                let event = select! {
                    token = self.tokens.next() => Event::Token(token),
                    signal = self.signals.next() => Event::Signal(signal),
                };
                match event {
                    Event::Token(Some((sequence, token))) => {
                        lock(&self.shared).release(sequence);
                        return Ok(Some(token));
                    }
                    Event::Token(None) => {
                        self.running = false;
                        if self.rescan {
                            self.spawn();
                        }
                    }
                    Event::Signal(Some(signal)) => {
                        if let Some(token) = self.on_signal(signal) {
                            return Ok(Some(token));
                        }
                    }
                    Event::Signal(None) | Event::Line(_) => {}
                }
                continue;
            }

            let event = match self.supplier.as_mut() {
                None => return Ok(None),
                Some(supplier) => {
                    debug!(label = %self.label, line = self.lines + 1, "requesting input");
                    let mut line = supplier.next_line('\n').fuse();
                    select! {
                        line = line => Event::Line(line),
                        signal = self.signals.next() => Event::Signal(signal),
                    }
                }
            };

            let (line, last, failed) = match event {
                Event::Line(Ok(line)) => {
                    retries = 0;
                    (line, false, None)
                }
                Event::Line(Err(SupplyError::Retry)) => {
                    retries += 1;
                    warn!(label = %self.label, retries, "input unavailable, retrying");
                    continue;
                }
                Event::Line(Err(SupplyError::Cancelled)) => {
                    debug!(label = %self.label, "input cancelled");
                    return Ok(Some(INTERRUPT));
                }
                Event::Line(Err(SupplyError::Eof(rest))) => {
                    debug!(label = %self.label, lines = self.lines + 1, "end of input");
                    (rest, true, None)
                }
                Event::Line(Err(SupplyError::Fatal { partial, reason })) => {
                    error!(label = %self.label, line = self.lines + 1, %reason, "input failed");
                    (partial, true, Some(reason))
                }
                Event::Signal(Some(signal)) => match self.on_signal(signal) {
                    Some(token) => return Ok(Some(token)),
                    None => continue,
                },
                Event::Signal(None) | Event::Token(_) => continue,
            };

            self.lines += 1;
            let mut line = line.replace("\\\n", "");
            if last {
                line.push('\n');
                self.supplier = None;
            }
            lock(&self.shared).scanner.append(line.as_bytes());
            self.spawn();

            if let Some(reason) = failed {
                return Ok(Some(Token::error(reason)));
            }
        }
    }

    pub fn shutdown(&mut self) {
        debug!(label = %self.label, "shutting down");
        self.close();
    }

    /// Tear the session down, every later call fails with the same error
    pub fn abort(&mut self, message: &str) -> LexError {
        let failure = LexError::Aborted {
            label: self.label.clone(),
            line: self.lines,
            message: message.to_string(),
        };
        error!(%failure, "aborting");
        self.close();
        {
            // Wait out a scan in flight, it would write the context
            let _shared = lock(&self.shared);
            self.context.reset();
        }
        self.failure = Some(failure.clone());
        failure
    }

    fn spawn(&mut self) {
        let (sender, receiver) = mpsc::channel(0);
        self.tokens = receiver;
        self.running = true;
        self.rescan = false;
        async_std::task::spawn(run(self.shared.clone(), self.handle.alive.clone(), sender));
    }

    fn on_signal(&mut self, signal: Signal) -> Option<Token> {
        match signal {
            Signal::Interrupt => {
                debug!(label = %self.label, "interrupted");
                Some(INTERRUPT)
            }
            Signal::Shutdown => {
                debug!(label = %self.label, "shut down by handle");
                self.close();
                None
            }
        }
    }

    // Safe to race with a scan in flight, the task checks 'alive' before
    // every hand-off and a closed channel unblocks it
    fn close(&mut self) {
        self.handle.alive.store(false, Ordering::SeqCst);
        self.tokens.close();
        self.running = false;
        self.rescan = false;
        lock(&self.shared).held = None;
    }
}

impl Drop for Lexer {
    fn drop(&mut self) {
        self.close();
    }
}

impl TokenSource for Lexer {
    fn lex(&mut self) -> Result<Token, LexError> {
        let token = async_std::task::block_on(self.next_token())?;
        Ok(token.unwrap_or_else(Token::end_of_input))
    }

    fn error(&mut self, message: &str) -> LexError {
        self.abort(message)
    }

    fn submit(&mut self, value: Box<dyn Any>) -> bool {
        match self.on_yield.as_mut() {
            Some(on_yield) => on_yield(value),
            None => true,
        }
    }

    fn first_word(&self) -> Option<String> {
        self.context.word()
    }
}

#[cfg(test)]
mod session_tests {
    use super::*;
    use crate::model::TokenKind;
    use crate::supplier::{from_lines, from_stream};
    use async_std::task::block_on;
    use futures::stream;
    use futures_timer::Delay;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    fn t(kind: TokenKind, text: &str) -> Option<Token> {
        Some(Token::new(kind, text))
    }

    fn supplied_by(supplier: impl LineSupplier + 'static) -> Lexer {
        Lexer::new(Options::default()).with_supplier(supplier)
    }

    async fn drain(lexer: &mut Lexer) -> Vec<Token> {
        let mut tokens = Vec::new();
        while let Ok(Some(token)) = lexer.next_token().await {
            tokens.push(token);
        }
        tokens
    }

    #[test]
    fn incomplete_then_continuation() {
        let mut lexer = Lexer::new(Options::default());
        block_on(async {
            lexer.feed("\"abc").unwrap();
            assert_eq!(lexer.next_token().await, Ok(None));

            lexer.feed("def\"").unwrap();
            assert_eq!(lexer.next_token().await, Ok(t(TokenKind::DoubleQuoted, "abcdef")));
            assert_eq!(lexer.next_token().await, Ok(None));
        });
    }

    #[test]
    fn pulls_lines_until_eof() {
        let supplier = from_lines(vec!["echo hi\n", "ls"]);
        let mut lexer = Lexer::new(Options::new("script")).with_supplier(supplier);
        block_on(async {
            let tokens = drain(&mut lexer).await;
            assert_eq!(
                tokens,
                vec![
                    Token::new(TokenKind::Symbol, "echo"),
                    Token::new(TokenKind::Symbol, "hi"),
                    Token::new(TokenKind::Newline, "\n"),
                    Token::new(TokenKind::Symbol, "ls"),
                    Token::new(TokenKind::Newline, "\n"),
                ]
            );
            // The end of input counts as a line
            assert_eq!(lexer.lines(), 3);
            assert_eq!(lexer.label(), "script");
            assert_eq!(lexer.next_token().await, Ok(None));
        });
    }

    #[test]
    fn escaped_newline_joins_lines() {
        let mut lexer = supplied_by(from_lines(vec!["echo a\\\n", "b\n"]));
        block_on(async {
            let texts: Vec<_> = drain(&mut lexer).await.into_iter().map(|t| t.text).collect();
            assert_eq!(texts, vec!["echo", "ab", "\n", "\n"]);
        });
    }

    #[test]
    fn operator_at_end_of_line_waits_for_more() {
        let mut lexer = supplied_by(from_lines(vec!["a &&\n", "b\n"]));
        block_on(async {
            let kinds: Vec<_> = drain(&mut lexer).await.into_iter().map(|t| t.kind).collect();
            assert_eq!(
                kinds,
                vec![
                    TokenKind::Symbol,
                    TokenKind::And,
                    TokenKind::Symbol,
                    TokenKind::Newline,
                    TokenKind::Newline,
                ]
            );
        });
    }

    #[test]
    fn retry_does_not_count_a_line() {
        let items = vec![Err(SupplyError::Retry), Ok("a\n".to_string()), Err(SupplyError::Retry)];
        let mut lexer = supplied_by(from_stream(stream::iter(items)));
        block_on(async {
            let texts: Vec<_> = drain(&mut lexer).await.into_iter().map(|t| t.text).collect();
            assert_eq!(texts, vec!["a", "\n", "\n"]);
            assert_eq!(lexer.lines(), 2);
        });
    }

    #[test]
    fn cancelled_input_is_an_interrupt() {
        let items = vec![Err(SupplyError::Cancelled), Ok("x\n".to_string())];
        let mut lexer = supplied_by(from_stream(stream::iter(items)));
        block_on(async {
            let token = lexer.next_token().await.unwrap().unwrap();
            assert!(lexer.is_fatal(&token));
            assert_eq!(lexer.next_token().await, Ok(t(TokenKind::Symbol, "x")));
        });
    }

    #[test]
    fn fatal_input_reports_and_stops() {
        let items = vec![
            Ok("a ".to_string()),
            Err(SupplyError::Fatal {
                partial: "b".into(),
                reason: "terminal went away".into(),
            }),
            Ok("never read\n".to_string()),
        ];
        let mut lexer = supplied_by(from_stream(stream::iter(items)));
        block_on(async {
            assert_eq!(lexer.next_token().await, Ok(t(TokenKind::Symbol, "a")));
            assert_eq!(lexer.next_token().await, Ok(t(TokenKind::Error, "terminal went away")));
            assert_eq!(lexer.next_token().await, Ok(t(TokenKind::Symbol, "b")));
            assert_eq!(lexer.next_token().await, Ok(t(TokenKind::Newline, "\n")));
            assert_eq!(lexer.next_token().await, Ok(None));
        });
    }

    #[test]
    fn interrupt_unblocks_a_waiting_reader() {
        let pending = stream::pending::<Result<String, SupplyError>>();
        let mut lexer = Lexer::new(Options::default()).with_supplier(from_stream(pending));
        let handle = lexer.handle();
        block_on(async {
            async_std::task::spawn(async move {
                Delay::new(Duration::from_millis(50)).await;
                handle.interrupt();
            });
            assert_eq!(lexer.next_token().await, Ok(Some(INTERRUPT)));

            // Still usable afterwards
            lexer.feed("ok\n").unwrap();
            assert_eq!(lexer.next_token().await, Ok(t(TokenKind::Symbol, "ok")));
        });
    }

    #[test]
    fn shutdown_releases_a_waiting_reader() {
        let pending = stream::pending::<Result<String, SupplyError>>();
        let mut lexer = Lexer::new(Options::default()).with_supplier(from_stream(pending));
        let handle = lexer.handle();
        block_on(async {
            async_std::task::spawn(async move {
                Delay::new(Duration::from_millis(50)).await;
                handle.shutdown();
            });
            assert_eq!(lexer.next_token().await, Ok(None));
            assert_eq!(lexer.feed("more\n"), Err(LexError::ShutDown));
            assert_eq!(lexer.next_token().await, Ok(None));
            assert!(!lexer.handle().is_alive());
        });
    }

    #[test]
    fn shutdown_drops_unread_tokens() {
        let mut lexer = Lexer::new(Options::default());
        block_on(async {
            lexer.feed("a b c\n").unwrap();
            assert_eq!(lexer.next_token().await, Ok(t(TokenKind::Symbol, "a")));
            lexer.shutdown();
            assert_eq!(lexer.next_token().await, Ok(None));
        });
    }

    #[test]
    fn first_word_while_scanning() {
        let options = Options::default().interactive(true);
        let mut lexer = Lexer::new(options).with_supplier(from_lines(vec!["ls (foo bar) baz\n"]));
        block_on(async {
            // The scan task may be one token ahead, so only look where the
            // next token cannot change the answer
            let mut seen = Vec::new();
            while let Ok(Some(token)) = lexer.next_token().await {
                match token.text.as_str() {
                    "foo" => assert_eq!(lexer.first_word().as_deref(), Some("foo")),
                    ")" | "baz" => assert_eq!(lexer.first_word().as_deref(), Some("ls")),
                    _ => {}
                }
                seen.push(token.text);
            }
            assert_eq!(seen, vec!["ls", "(", "foo", "bar", ")", "baz", "\n", "\n"]);
        });

        lexer.reset();
        assert_eq!(lexer.first_word().as_deref(), Some(""));
    }

    #[test]
    fn first_word_off_by_default() {
        let mut lexer = Lexer::new(Options::default());
        block_on(async {
            lexer.feed("ls\n").unwrap();
            drain(&mut lexer).await;
        });
        assert_eq!(lexer.first_word(), None);
        lexer.reset();
        assert_eq!(lexer.first_word(), None);
        lexer.interactive();
        assert_eq!(lexer.first_word().as_deref(), Some(""));
    }

    #[test]
    fn probe_leaves_the_session_alone() {
        let mut lexer = Lexer::new(Options::default().interactive(true));
        block_on(async {
            lexer.feed("echo \"ab").unwrap();
            assert_eq!(lexer.next_token().await, Ok(t(TokenKind::Symbol, "echo")));
            assert_eq!(lexer.next_token().await, Ok(None));
        });

        let mut probe = lexer.probe("c\" (x\n");
        assert!(!probe.is_complete());
        assert_eq!(probe.first_word().as_deref(), Some("x"));

        let mut probe = lexer.probe("\n");
        assert_eq!(probe.next_token(), None);
        assert!(!probe.is_complete());

        assert_eq!(lexer.first_word().as_deref(), Some("echo"));
        block_on(async {
            lexer.feed("d\"\n").unwrap();
            assert_eq!(lexer.next_token().await, Ok(t(TokenKind::DoubleQuoted, "abd")));
            assert_eq!(lexer.next_token().await, Ok(t(TokenKind::Newline, "\n")));
        });
    }

    #[test]
    fn snapshot_replays_the_token_scanned_ahead() {
        let mut lexer = Lexer::new(Options::default().interactive(true));
        let texts = |tokens: Vec<Token>| tokens.into_iter().map(|t| t.text).collect::<Vec<_>>();
        block_on(async {
            lexer.feed("echo (a").unwrap();
            assert_eq!(lexer.next_token().await, Ok(t(TokenKind::Symbol, "echo")));
            // Give the scan task time to get "(" ready
            Delay::new(Duration::from_millis(50)).await;
        });

        let mut copy = lexer.probe(")\n");
        let tried = texts(copy.by_ref().collect());
        assert_eq!(tried, vec!["(", "a", ")", "\n"]);
        assert!(copy.is_complete());

        // The same again, once the token is out of the channel
        let mut live = Vec::new();
        block_on(async {
            live.extend(drain(&mut lexer).await);
            lexer.feed(")\n").unwrap();
            live.extend(drain(&mut lexer).await);
        });
        assert_eq!(texts(live), tried);
        assert_eq!(lexer.probe("").next_token(), None);
    }

    #[test]
    fn discard_drops_the_half_typed_command() {
        let mut lexer = Lexer::new(Options::default());
        block_on(async {
            lexer.feed("(echo \"half").unwrap();
            assert_eq!(lexer.next_token().await, Ok(t(TokenKind::OpenParen, "(")));
            lexer.discard();
            lexer.feed("ok\n").unwrap();
            assert_eq!(lexer.next_token().await, Ok(t(TokenKind::Symbol, "ok")));
            assert_eq!(lexer.next_token().await, Ok(t(TokenKind::Newline, "\n")));
        });
    }

    #[test]
    fn abort_tears_down_for_good() {
        let mut lexer = Lexer::new(Options::new("rc").lines(7).interactive(true));
        lexer.feed("ls (x\n").unwrap();
        let err = lexer.error("unexpected end");
        assert_eq!(
            err,
            LexError::Aborted {
                label: "rc".into(),
                line: 7,
                message: "unexpected end".into(),
            }
        );
        assert_eq!(err.to_string(), "rc:7: unexpected end");
        assert_eq!(lexer.lex(), Err(err.clone()));
        assert_eq!(lexer.feed("more\n"), Err(err));
        assert_eq!(lexer.first_word().as_deref(), Some(""));
    }

    #[test]
    fn lex_ends_with_end_of_input() {
        let mut lexer = Lexer::new(Options::default());
        lexer.feed("a\n").unwrap();
        assert_eq!(lexer.lex().map(|t| t.kind), Ok(TokenKind::Symbol));
        assert_eq!(lexer.lex().map(|t| t.kind), Ok(TokenKind::Newline));
        assert_eq!(lexer.lex(), Ok(Token::end_of_input()));
        assert_eq!(lexer.lex(), Ok(Token::end_of_input()));
    }

    #[test]
    fn submit_goes_to_the_yield_hook() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let mut lexer = Lexer::new(Options::default()).on_yield(move |value| {
            if let Ok(n) = value.downcast::<i32>() {
                sink.borrow_mut().push(*n);
            }
            sink.borrow().len() < 2
        });
        assert!(lexer.submit(Box::new(1)));
        assert!(!lexer.submit(Box::new(2)));
        assert_eq!(*seen.borrow(), vec![1, 2]);

        let mut plain = Lexer::new(Options::default());
        assert!(plain.submit(Box::new("anything")));
    }
}
