//! Requeue decisions for finished passes.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use bkapp_config::RequeuePolicy;
use bkapp_core::{Error, ErrorClass, ObjectKey};

use crate::pipeline::PassOutcome;

/// When the next pass for an application should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Only when the object or one of its children changes.
    OnChange,
    After(Duration),
}

/// Per-application count of consecutive blocked passes.
#[derive(Debug, Default)]
pub struct BlockedAttempts {
    attempts: Mutex<HashMap<ObjectKey, u32>>,
}

impl BlockedAttempts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a blocked pass, returning how many came before it.
    pub fn bump(&self, key: &ObjectKey) -> u32 {
        let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        let entry = attempts.entry(key.clone()).or_insert(0);
        let previous = *entry;
        *entry = entry.saturating_add(1);
        previous
    }

    pub fn reset(&self, key: &ObjectKey) {
        self.attempts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }

    pub fn get(&self, key: &ObjectKey) -> u32 {
        self.attempts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .copied()
            .unwrap_or(0)
    }
}

/// Delay before retrying after `error`.
pub fn requeue_for_error(policy: &RequeuePolicy, error: &Error) -> Requeue {
    Requeue::After(match error.class() {
        ErrorClass::Conflict => policy.conflict,
        ErrorClass::Transient | ErrorClass::Cancelled => policy.error,
        ErrorClass::Fatal => policy.fatal,
    })
}

/// Decide the next pass for `key` after `outcome`, updating its backoff state.
pub fn requeue_for(
    policy: &RequeuePolicy,
    attempts: &BlockedAttempts,
    key: &ObjectKey,
    outcome: &PassOutcome,
) -> Requeue {
    match outcome {
        PassOutcome::Completed => {
            attempts.reset(key);
            Requeue::OnChange
        }
        PassOutcome::Aborted { requeue_after, .. } => {
            let attempt = attempts.bump(key);
            Requeue::After(requeue_after.unwrap_or_else(|| policy.blocked_delay(attempt)))
        }
        PassOutcome::Failed { error, .. } => requeue_for_error(policy, error),
    }
}
