/// How a 'Lexer' is set up. Built once, nothing reads it afterwards
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Options {
    // Names the input in diagnostics
    pub label: String,
    // Lines already consumed before this lexer took over
    pub lines: usize,
    // Track the first word of every command
    pub interactive: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            label: "stdin".to_string(),
            lines: 0,
            interactive: false,
        }
    }
}

impl Options {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    pub fn lines(mut self, lines: usize) -> Self {
        self.lines = lines;
        self
    }

    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }
}

#[test]
fn options_chain() {
    let options = Options::new("rc").lines(3).interactive(true);
    assert_eq!(options.label, "rc");
    assert_eq!(options.lines, 3);
    assert!(options.interactive);
    assert_eq!(Options::default().label, "stdin");
}
