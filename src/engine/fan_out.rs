//! Structured fan-out
//!
//! Sibling branches are started together and awaited together. The first
//! failure flips the group's cancel flag so branches that have not begun
//! descending skip their work, while branches already in flight are drained
//! before the error is returned.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::join_all;

use super::errors::EngineError;

/// Cancel flag of one fan-out group, linked to the groups enclosing it.
#[derive(Debug, Clone, Default)]
pub struct CancelScope {
    flag: Arc<AtomicBool>,
    parent: Option<Arc<CancelScope>>,
}

impl CancelScope {
    pub fn root() -> Self {
        Self::default()
    }

    /// A nested group; cancelled when it or any enclosing group is.
    pub fn child(&self) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            parent: Some(Arc::new(self.clone())),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || self.parent.as_ref().is_some_and(|p| p.is_cancelled())
    }

    pub fn check(&self) -> Result<(), EngineError> {
        if self.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Run `branches` concurrently under `group` and return their results in
/// order, or the first real failure once every branch has settled.
pub async fn fan_out<T, F>(group: &CancelScope, branches: Vec<F>) -> Result<Vec<T>, EngineError>
where
    F: Future<Output = Result<T, EngineError>>,
{
    let guarded = branches.into_iter().map(|branch| async move {
        group.check()?;
        let result = branch.await;
        if result.is_err() {
            group.cancel();
        }
        result
    });
    let settled = join_all(guarded).await;

    let total = settled.len();
    let mut values = Vec::with_capacity(total);
    let mut failure: Option<EngineError> = None;
    for result in settled {
        match result {
            Ok(value) => values.push(value),
            Err(err) => {
                // Prefer the failure that caused the cancellation.
                if failure.as_ref().map_or(true, EngineError::is_cancelled) {
                    failure = Some(err);
                }
            }
        }
    }

    match failure {
        None => Ok(values),
        Some(err) => {
            if !values.is_empty() {
                log::warn!(
                    "Discarding {} of {} completed branch result(s) after failure: {}",
                    values.len(),
                    total,
                    err
                );
            }
            Err(err)
        }
    }
}
