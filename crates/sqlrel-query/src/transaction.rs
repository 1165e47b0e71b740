//! Transaction handles.
//!
//! A handle is shared (through `Arc`) by every query chained from the same
//! `begin()`. Nesting depth is counted while queries are built: each nested
//! `begin()` adds one, each `commit()`/`rollback()` removes one, and only the
//! outermost pair produces SQL. Execution state (`PendingAcquire`, `Active`,
//! `Closed`) advances as those statements actually run.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use sqlrel_core::{Error, Result, TransactionErrorKind};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Execution phase of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxPhase {
    /// Begin requested, no connection bound yet
    PendingAcquire,
    /// Connection bound, statements run on it
    Active,
    /// Terminal statement executed
    Closed,
}

/// Role a statement plays in its transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxRole {
    /// The outermost BEGIN
    Begin,
    /// A nested begin/commit/rollback that emits no SQL
    Nested,
    /// Any ordinary statement
    Statement,
    /// The commit/rollback that brings depth to zero
    Terminal,
}

#[derive(Debug)]
struct TxState {
    depth: u32,
    phase: TxPhase,
    begun: bool,
    needs_acquire: bool,
    needs_release: bool,
}

/// Shared state of one logical transaction.
#[derive(Debug)]
pub struct TransactionHandle {
    id: u64,
    state: Mutex<TxState>,
}

impl TransactionHandle {
    /// New handle at depth 1, waiting for its begin to execute.
    pub fn new() -> Self {
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(TxState {
                depth: 1,
                phase: TxPhase::PendingAcquire,
                begun: false,
                needs_acquire: true,
                needs_release: false,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TxState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn depth(&self) -> u32 {
        self.lock().depth
    }

    pub fn phase(&self) -> TxPhase {
        self.lock().phase
    }

    pub fn needs_acquire(&self) -> bool {
        self.lock().needs_acquire
    }

    pub fn needs_release(&self) -> bool {
        self.lock().needs_release
    }

    /// Whether further `begin()` calls may nest into this handle.
    pub fn is_open_for_nesting(&self) -> bool {
        let state = self.lock();
        state.depth > 0 && state.phase != TxPhase::Closed
    }

    /// Record a nested begin.
    pub(crate) fn enter(&self) {
        self.lock().depth += 1;
    }

    /// Record a commit or rollback. Returns the role of the statement that
    /// performs it, or `None` when the handle was already at depth zero.
    pub(crate) fn exit(&self) -> Option<TxRole> {
        let mut state = self.lock();
        if state.depth == 0 {
            return None;
        }
        state.depth -= 1;
        if state.depth == 0 {
            state.needs_release = true;
            Some(TxRole::Terminal)
        } else {
            Some(TxRole::Nested)
        }
    }

    /// Check that a statement with `role` may run now.
    pub fn validate(&self, role: TxRole) -> Result<()> {
        let state = self.lock();
        if state.phase == TxPhase::Closed {
            return Err(Error::transaction(
                TransactionErrorKind::Closed,
                format!("transaction {} is closed", self.id),
            ));
        }
        if role != TxRole::Begin && !state.begun {
            return Err(Error::transaction(
                TransactionErrorKind::BeginNotExecuted,
                format!(
                    "must execute begin before using the transaction (transaction {})",
                    self.id
                ),
            ));
        }
        Ok(())
    }

    /// The outermost begin started executing.
    pub fn mark_begun(&self) {
        self.lock().begun = true;
    }

    /// A connection was bound.
    pub fn mark_active(&self) {
        let mut state = self.lock();
        state.needs_acquire = false;
        if state.phase == TxPhase::PendingAcquire {
            state.phase = TxPhase::Active;
        }
    }

    /// The terminal statement ran and the connection was released.
    pub fn mark_closed(&self) {
        let mut state = self.lock();
        state.phase = TxPhase::Closed;
        state.needs_release = false;
    }
}

impl Default for TransactionHandle {
    fn default() -> Self {
        Self::new()
    }
}
