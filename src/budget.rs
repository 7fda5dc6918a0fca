//! Budgets and cooperative cancellation.
//
//  A `Control` is shared between the engine and the tokenizer; both call
//  `checkpoint()` at chunk boundaries and every `CHECK_INTERVAL` bytes, so
//  cancellation latency is bounded without a branch on every byte.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{BudgetKind, SiftError};

/// Bytes between cancellation/budget polls inside the byte loops.
pub const CHECK_INTERVAL: usize = 32 * 1024;

/// Advisory ceilings, checked strictly from above.
#[derive(Debug, Clone, Default)]
pub struct Budget {
    pub max_matches: Option<u64>,
    pub max_bytes: Option<u64>,
    pub max_duration: Option<Duration>,
}

impl Budget {
    pub fn unlimited() -> Budget {
        Budget::default()
    }
}

/// Caller-set cancellation flag. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> CancelFlag {
        CancelFlag::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Budget + cancel flag + start instant, bundled for the poll sites.
#[derive(Debug, Clone)]
pub struct Control {
    budget: Budget,
    cancel: CancelFlag,
    started: Instant,
}

impl Default for Control {
    fn default() -> Self {
        Control::new(Budget::unlimited(), CancelFlag::new())
    }
}

impl Control {
    pub fn new(budget: Budget, cancel: CancelFlag) -> Control {
        Control {
            budget,
            cancel,
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Poll site: cancellation first, then byte and duration ceilings.
    /// `offset` is the logical position, which equals processed bytes.
    pub fn checkpoint(&self, offset: u64) -> Result<(), SiftError> {
        if self.cancel.is_cancelled() {
            return Err(SiftError::Aborted { offset });
        }
        if let Some(max) = self.budget.max_bytes {
            if offset > max {
                return Err(SiftError::BudgetExhausted {
                    kind: BudgetKind::Bytes,
                    offset,
                });
            }
        }
        if let Some(max) = self.budget.max_duration {
            if self.started.elapsed() > max {
                return Err(SiftError::BudgetExhausted {
                    kind: BudgetKind::Duration,
                    offset,
                });
            }
        }
        Ok(())
    }

    /// Match-count ceiling, consulted once per emission. Fails strictly
    /// after the count is exceeded, before the over-budget match is
    /// delivered.
    pub fn check_matches(&self, matched: u64, offset: u64) -> Result<(), SiftError> {
        if let Some(max) = self.budget.max_matches {
            if matched > max {
                return Err(SiftError::BudgetExhausted {
                    kind: BudgetKind::Matches,
                    offset,
                });
            }
        }
        Ok(())
    }
}
