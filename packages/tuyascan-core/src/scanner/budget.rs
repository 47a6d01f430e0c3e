//! Adaptive retry budget for the broadcast listener.
//!
//! Each dialect has a silence counter. Timeouts and repeated announcements
//! push it up; a device seen for the first time pulls it back down, so the
//! scan keeps listening while new devices keep showing up. Listening stops
//! once the two counters together exceed the budget.

use super::Dialect;

/// Lowest value a silence counter can be pulled down to.
pub const SILENCE_FLOOR: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetState {
    Listening,
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct RetryBudget {
    silent_legacy: u32,
    silent_encrypted: u32,
    max_retries: u32,
    extensions: u32,
}

impl RetryBudget {
    pub fn new(max_retries: u32) -> Self {
        Self {
            silent_legacy: 0,
            silent_encrypted: 0,
            max_retries,
            extensions: 0,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn silence(&self, dialect: Dialect) -> u32 {
        match dialect {
            Dialect::Legacy => self.silent_legacy,
            Dialect::Encrypted => self.silent_encrypted,
        }
    }

    /// How many times a new device pulled a counter down.
    pub fn extensions(&self) -> u32 {
        self.extensions
    }

    pub fn state(&self) -> BudgetState {
        if self.silent_legacy.saturating_add(self.silent_encrypted) <= self.max_retries {
            BudgetState::Listening
        } else {
            BudgetState::Exhausted
        }
    }

    /// Which endpoint to service next: the quieter one, legacy on ties.
    pub fn next_dialect(&self) -> Dialect {
        if self.silent_legacy <= self.silent_encrypted {
            Dialect::Legacy
        } else {
            Dialect::Encrypted
        }
    }

    /// Receive timed out (or failed) on `dialect`.
    pub fn record_silence(&mut self, dialect: Dialect) -> BudgetState {
        self.bump(dialect);
        self.state()
    }

    /// A device already in the registry announced itself again.
    pub fn record_duplicate(&mut self, dialect: Dialect) -> BudgetState {
        self.bump(dialect);
        self.state()
    }

    /// A device was seen for the first time.
    pub fn record_novel(&mut self, dialect: Dialect) -> BudgetState {
        let counter = self.counter_mut(dialect);
        if *counter > SILENCE_FLOOR {
            *counter -= 1;
            self.extensions += 1;
        }
        self.state()
    }

    fn bump(&mut self, dialect: Dialect) {
        let counter = self.counter_mut(dialect);
        *counter = counter.saturating_add(1);
    }

    fn counter_mut(&mut self, dialect: Dialect) -> &mut u32 {
        match dialect {
            Dialect::Legacy => &mut self.silent_legacy,
            Dialect::Encrypted => &mut self.silent_encrypted,
        }
    }
}
