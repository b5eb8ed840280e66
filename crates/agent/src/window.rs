//! Bounded conversation window with a pinned prefix.
//!
//! The first `pinned_len` turns (the personality prompt and the tool
//! catalogue) survive every trim. When an append pushes the window past its
//! cap, the oldest non-pinned turns are evicted until it fits again.

use chatrelay_core::error::Error;
use chatrelay_core::message::Turn;

#[derive(Debug, Clone)]
pub struct ContextWindow {
    turns: Vec<Turn>,
    pinned_len: usize,
    cap: usize,
}

impl ContextWindow {
    /// Create a window holding `pinned` as its permanent prefix.
    ///
    /// Fails with a configuration error when `cap` cannot hold the prefix.
    pub fn new(pinned: Vec<Turn>, cap: usize) -> Result<Self, Error> {
        if cap < pinned.len() {
            return Err(Error::config(format!(
                "history cap {cap} is smaller than the pinned prefix ({} turns)",
                pinned.len()
            )));
        }
        Ok(Self {
            pinned_len: pinned.len(),
            turns: pinned,
            cap,
        })
    }

    /// Add a turn at the end, evicting the oldest non-pinned turns if needed.
    ///
    /// With `cap == pinned_len` the new turn is evicted immediately.
    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
        if self.turns.len() > self.cap {
            let excess = self.turns.len() - self.cap;
            self.turns.drain(self.pinned_len..self.pinned_len + excess);
        }
    }

    /// The full ordered sequence, for submission to the completion service.
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.clone()
    }

    /// Drop everything but the pinned prefix.
    pub fn reset(&mut self) {
        self.turns.truncate(self.pinned_len);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn pinned_len(&self) -> usize {
        self.pinned_len
    }

    pub fn cap(&self) -> usize {
        self.cap
    }
}
