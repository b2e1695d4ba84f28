//! Cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cancellation token shared by the caller and every pipeline stage.
///
/// The flag only ever goes from `false` to `true`. Stages poll it before each unit of work,
/// so cancellation takes effect at line granularity. A child token is cancelled when either
/// itself or its parent is; cancelling the child leaves the parent untouched.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
    parent: Option<Arc<AtomicBool>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken::default()
    }

    /// Creates a token that observes this token's cancellation in addition to its own.
    pub fn child_token(&self) -> CancellationToken {
        CancellationToken {
            flag: Arc::new(AtomicBool::new(false)),
            parent: Some(self.flag.clone()),
        }
    }

    /// Requests cancellation.
    /// Returns `true` if this call was the one that set the flag.
    pub fn cancel(&self) -> bool {
        !self.flag.swap(true, Ordering::AcqRel)
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire) || self.parent.as_ref().map_or(false, |p| p.load(Ordering::Acquire))
    }
}
