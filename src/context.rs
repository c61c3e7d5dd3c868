//run: cargo test context_tests -- --nocapture

use crate::model::{Token, TokenKind};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

// One open '(' or '{' and the command name seen inside it so far
#[derive(Debug)]
struct Scope {
    word: String,
    parent: Option<Arc<Scope>>,
}

// Persistent list of open groups, innermost first. Nothing is mutated in
// place so a copy (e.g. for a probe) costs one Arc clone and never sees
// later changes
#[derive(Clone, Debug, Default)]
pub struct Scopes {
    head: Option<Arc<Scope>>,
}

impl Scopes {
    fn root() -> Self {
        Self {
            head: Some(Arc::new(Scope {
                word: String::new(),
                parent: None,
            })),
        }
    }

    pub fn is_active(&self) -> bool {
        self.head.is_some()
    }

    pub fn word(&self) -> Option<&str> {
        self.head.as_ref().map(|scope| scope.word.as_str())
    }

    #[cfg(test)]
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut scope = self.head.as_ref();
        while let Some(s) = scope {
            depth += 1;
            scope = s.parent.as_ref();
        }
        depth
    }

    fn set_word(&mut self, word: String) {
        if let Some(head) = self.head.take() {
            let parent = head.parent.clone();
            self.head = Some(Arc::new(Scope { word, parent }));
        }
    }

    fn push(&mut self) {
        if let Some(head) = self.head.take() {
            self.head = Some(Arc::new(Scope {
                word: String::new(),
                parent: Some(head),
            }));
        }
    }

    // The root scope is never popped
    fn pop(&mut self) {
        if let Some(parent) = self.head.as_ref().and_then(|head| head.parent.clone()) {
            self.head = Some(parent);
        }
    }

    fn observe(&mut self, token: &Token) {
        match token.kind {
            TokenKind::Symbol if self.word() == Some("") => self.set_word(token.text.clone()),
            TokenKind::OpenParen | TokenKind::OpenBrace => self.push(),
            TokenKind::CloseParen | TokenKind::CloseBrace => self.pop(),
            TokenKind::Colon => self.set_word(String::new()),
            _ => {}
        }
    }
}

/// Which word is in command-name position, shared between the scan task
/// (writer) and anyone asking (readers)
#[derive(Clone, Debug, Default)]
pub struct Context {
    scopes: Arc<RwLock<Scopes>>,
}

impl Context {
    /// Word recorded for the innermost open group, 'None' if not tracking
    pub fn word(&self) -> Option<String> {
        self.read().word().map(String::from)
    }

    #[cfg(test)]
    pub fn depth(&self) -> usize {
        self.read().depth()
    }

    #[cfg(test)]
    pub fn is_active(&self) -> bool {
        self.read().is_active()
    }

    /// Start (or restart) tracking from a single empty scope
    pub fn activate(&self) {
        *self.write() = Scopes::root();
    }

    pub fn reset(&self) {
        let mut scopes = self.write();
        if scopes.is_active() {
            *scopes = Scopes::root();
        }
    }

    pub(crate) fn observe(&self, token: &Token) {
        let mut scopes = self.write();
        if scopes.is_active() {
            scopes.observe(token);
        }
    }

    // Independent copy, later changes on either side stay on that side
    pub(crate) fn fork(&self) -> Self {
        let scopes = self.read().clone();
        Self {
            scopes: Arc::new(RwLock::new(scopes)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Scopes> {
        self.scopes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Scopes> {
        self.scopes.write().unwrap_or_else(PoisonError::into_inner)
    }
}
