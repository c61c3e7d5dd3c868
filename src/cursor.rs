//run: cargo test cursor -- --nocapture

// A growing byte buffer walked one rune at a time
//
// 'start' is where the token being scanned begins, 'index' is the scan
// position and 'width' is the byte length of the last rune read so that
// 'backup()' can step back over it. Always 0 <= start <= index <= len
//
// The buffer is bytes and not a String because lines arrive from outside and
// a multi-byte character can be split across two of them

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Rune {
    Char(char),
    Invalid(u8),
    // Nothing (complete) left to read, more input may still arrive
    End,
}

#[derive(Clone, Debug, Default)]
pub struct Cursor {
    bytes: Vec<u8>,
    index: usize,
    start: usize,
    width: usize,
}

impl Cursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, input: &[u8]) {
        self.trim();
        self.bytes.extend_from_slice(input);
    }

    // @VOLATILE: only what precedes 'start' can go. An open quote or a
    //            pending escape still needs every byte from 'start' on
    fn trim(&mut self) {
        if self.start >= self.bytes.len() {
            self.bytes.clear();
            self.index = 0;
        } else {
            self.bytes.drain(..self.start);
            self.index -= self.start;
        }
        self.start = 0;
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
        self.index = 0;
        self.start = 0;
        self.width = 0;
    }

    pub fn peek(&self) -> (Rune, usize) {
        let rest = &self.bytes[self.index..];
        let lead = match rest.first() {
            Some(byte) => *byte,
            None => return (Rune::End, 0),
        };
        let len = match sequence_length(lead) {
            Some(len) => len,
            None => return (Rune::Invalid(lead), 1),
        };

        if rest.len() < len {
            // Split sequence, wait for the rest unless it is already broken
            return if rest[1..].iter().all(|b| is_continuation(*b)) {
                (Rune::End, 0)
            } else {
                (Rune::Invalid(lead), 1)
            };
        }

        match std::str::from_utf8(&rest[..len]) {
            Ok(s) => match s.chars().next() {
                Some(ch) => (Rune::Char(ch), len),
                None => (Rune::End, 0),
            },
            Err(_) => (Rune::Invalid(lead), 1),
        }
    }

    pub fn next(&mut self) -> Rune {
        let (rune, width) = self.peek();
        self.skip(width);
        rune
    }

    pub fn skip(&mut self, width: usize) {
        self.width = width;
        self.index += width;
    }

    /// Unread the last rune. Only valid once per 'next()'
    pub fn backup(&mut self) {
        debug_assert!(self.index - self.width >= self.start);
        self.index -= self.width;
        self.width = 0;
    }

    /// Begin a new token at the current position
    pub fn mark(&mut self) {
        self.start = self.index;
    }

    /// Hand out the text of the token and begin the next one
    pub fn take(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.bytes[self.start..self.index]).into_owned();
        self.start = self.index;
        text
    }

    pub fn first_byte(&self) -> Option<u8> {
        self.bytes.get(self.start).copied()
    }

    /// Every byte has been handed out as part of some token
    pub fn is_drained(&self) -> bool {
        self.start == self.bytes.len()
    }

    /// Bytes not yet handed out, i.e. what trimming must keep
    #[cfg(test)]
    pub fn pending(&self) -> &[u8] {
        &self.bytes[self.start..]
    }
}

fn sequence_length(lead: u8) -> Option<usize> {
    match lead {
        0x00..=0x7F => Some(1),
        0xC0..=0xDF => Some(2),
        0xE0..=0xEF => Some(3),
        0xF0..=0xF7 => Some(4),
        _ => None,
    }
}

fn is_continuation(byte: u8) -> bool {
    byte & 0xC0 == 0x80
}

#[test]
fn cursor_hits_unicode_boundaries() {
    let buffer = "你好號碼hello\ndarkness別忘了我my ol\nd朋友a阿a";
    let mut cursor = Cursor::new();
    cursor.append(buffer.as_bytes());

    let mut seen = String::new();
    loop {
        match cursor.next() {
            Rune::Char(ch) => seen.push(ch),
            Rune::End => break,
            Rune::Invalid(byte) => panic!("invalid byte {:#x}", byte),
        }
    }
    assert_eq!(seen, buffer);
    assert_eq!(cursor.take(), buffer);
    assert!(cursor.is_drained());
}

#[test]
fn split_sequence_waits_for_the_rest() {
    let bytes = "é".as_bytes();
    let mut cursor = Cursor::new();
    cursor.append(&bytes[..1]);
    assert_eq!(cursor.peek(), (Rune::End, 0));

    cursor.append(&bytes[1..]);
    assert_eq!(cursor.next(), Rune::Char('é'));
    assert_eq!(cursor.next(), Rune::End);
}

#[test]
fn broken_sequences_are_invalid() {
    let mut cursor = Cursor::new();
    cursor.append(&[0xFF, b'a', 0xC3, b'b']);
    assert_eq!(cursor.next(), Rune::Invalid(0xFF));
    assert_eq!(cursor.next(), Rune::Char('a'));
    assert_eq!(cursor.next(), Rune::Invalid(0xC3));
    assert_eq!(cursor.next(), Rune::Char('b'));

    // A lone continuation byte is not a lead byte
    let mut cursor = Cursor::new();
    cursor.append(&[0x80]);
    assert_eq!(cursor.peek(), (Rune::Invalid(0x80), 1));
}

#[test]
fn backup_unreads_one_rune() {
    let mut cursor = Cursor::new();
    cursor.append("a號b".as_bytes());
    cursor.next();
    assert_eq!(cursor.next(), Rune::Char('號'));
    cursor.backup();
    assert_eq!(cursor.take(), "a");
    assert_eq!(cursor.next(), Rune::Char('號'));
}

#[test]
fn trimming_keeps_the_unfinished_token() {
    let mut cursor = Cursor::new();
    cursor.append(b"echo \"ab");
    for _ in 0.."echo".len() {
        cursor.next();
    }
    assert_eq!(cursor.take(), "echo");
    cursor.next(); // ' '
    cursor.mark();
    cursor.next(); // '"'
    cursor.next();
    cursor.next();

    cursor.append(b"c\"");
    assert_eq!(cursor.pending(), b"\"abc\"");
    assert_eq!(cursor.first_byte(), Some(b'"'));
    assert_eq!(cursor.next(), Rune::Char('c'));
    assert_eq!(cursor.next(), Rune::Char('"'));
    assert_eq!(cursor.take(), "\"abc\"");

    // Fully consumed input is dropped on the next append
    cursor.append(b"x");
    assert_eq!(cursor.pending(), b"x");
}
