//! Cancellation for blocking registry waits.
//!
//! Every blocking operation takes a `&dyn Interrupt`, re-checked each time the
//! waiting thread wakes. [`OperationContext`] is the stock implementation: a
//! [`CancellationToken`] plus an optional deadline.

use crate::error::{IndexBuildError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Why a blocking wait gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InterruptReason {
    /// The owning operation was killed.
    Killed,
    /// The owning operation ran past its deadline.
    DeadlineExceeded,
    /// The process is shutting down.
    Shutdown,
}

impl InterruptReason {
    pub fn code(&self) -> &'static str {
        match self {
            InterruptReason::Killed => "interrupted",
            InterruptReason::DeadlineExceeded => "max_time_ms_expired",
            InterruptReason::Shutdown => "interrupted_at_shutdown",
        }
    }
}

impl fmt::Display for InterruptReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterruptReason::Killed => write!(f, "operation was killed"),
            InterruptReason::DeadlineExceeded => write!(f, "operation exceeded its time limit"),
            InterruptReason::Shutdown => write!(f, "interrupted at shutdown"),
        }
    }
}

/// Source of interruption for a blocking wait.
pub trait Interrupt: Send + Sync {
    /// `Err(Cancelled(_))` once the caller should stop waiting.
    fn check_for_interrupt(&self) -> Result<()>;

    /// Point in time after which `check_for_interrupt` starts failing, if any.
    /// Waits use it to avoid sleeping past the deadline.
    fn deadline(&self) -> Option<Instant> {
        None
    }
}

impl Interrupt for CancellationToken {
    fn check_for_interrupt(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(IndexBuildError::Cancelled(InterruptReason::Killed));
        }
        Ok(())
    }
}

/// Never interrupts. For callers that must wait unconditionally, such as
/// teardown paths that already serialized against every other writer.
#[derive(Debug, Clone, Copy, Default)]
pub struct Uninterruptible;

impl Interrupt for Uninterruptible {
    fn check_for_interrupt(&self) -> Result<()> {
        Ok(())
    }
}

/// Execution context of one caller operation: a cancellation token, the
/// reason it was cancelled, and an optional deadline.
///
/// Clones share the same token. [`OperationContext::child`] derives a context
/// that is cancelled with its parent but can also be cancelled on its own.
#[derive(Debug, Clone)]
pub struct OperationContext {
    token: CancellationToken,
    // Own reason first, then each ancestor's.
    reasons: Vec<Arc<OnceLock<InterruptReason>>>,
    deadline: Option<Instant>,
    // Deadline of the parent at derivation time; a child never outlives it.
    inherited_deadline: Option<Instant>,
}

impl Default for OperationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationContext {
    pub fn new() -> Self {
        OperationContext {
            token: CancellationToken::new(),
            reasons: vec![Arc::new(OnceLock::new())],
            deadline: None,
            inherited_deadline: None,
        }
    }

    /// Set the deadline. On a derived context it is clamped to the parent's.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.inherited_deadline {
            Some(inherited) => deadline.min(inherited),
            None => deadline,
        });
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn child(&self) -> Self {
        let mut reasons = Vec::with_capacity(self.reasons.len() + 1);
        reasons.push(Arc::new(OnceLock::new()));
        reasons.extend(self.reasons.iter().cloned());
        OperationContext {
            token: self.token.child_token(),
            reasons,
            deadline: self.deadline,
            inherited_deadline: self.deadline,
        }
    }

    /// The underlying token, for handing to async code (`token.cancelled().await`).
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Cancel this context (and its children) with `reason`. The first reason
    /// recorded wins.
    pub fn cancel(&self, reason: InterruptReason) {
        let _ = self.reasons[0].set(reason);
        self.token.cancel();
    }

    pub fn kill(&self) {
        self.cancel(InterruptReason::Killed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    fn cancel_reason(&self) -> InterruptReason {
        self.reasons
            .iter()
            .find_map(|r| r.get().copied())
            .unwrap_or(InterruptReason::Killed)
    }
}

impl Interrupt for OperationContext {
    fn check_for_interrupt(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(IndexBuildError::Cancelled(self.cancel_reason()));
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(IndexBuildError::Cancelled(InterruptReason::DeadlineExceeded));
            }
        }
        Ok(())
    }

    fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}
