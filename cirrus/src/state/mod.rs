//! Per-stack lifecycle state and the legal transition table.
//!
//! The transition function is pure; the orchestrator is the only writer of
//! the store. Fingerprints of resolved parameters drive idempotent no-op
//! detection: an unchanged fingerprint skips the backend entirely.

use crate::core::{ResolvedParameters, StackAction, StackIntent, StackStatus};
use crate::errors::InvalidTransitionError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// The tracked state of a single stack.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StackRecord {
    /// The stack id.
    pub id: String,
    /// Current lifecycle status.
    pub status: StackStatus,
    /// Fingerprint of the last successfully applied parameters.
    pub fingerprint: Option<String>,
    /// Error detail if the stack is Failed.
    pub error: Option<String>,
}

impl StackRecord {
    /// Creates a fresh record in `Unknown` status.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: StackStatus::Unknown,
            fingerprint: None,
            error: None,
        }
    }
}

/// The legal status transition table.
///
/// Any pair not listed is rejected, which guards against the backend
/// reporting a status the lifecycle cannot have produced.
const LEGAL_TRANSITIONS: &[(StackStatus, StackStatus)] = &[
    (StackStatus::Unknown, StackStatus::PendingCreate),
    (StackStatus::Unknown, StackStatus::PendingDelete),
    (StackStatus::PendingCreate, StackStatus::Creating),
    (StackStatus::Creating, StackStatus::Deployed),
    (StackStatus::Creating, StackStatus::Failed),
    (StackStatus::Deployed, StackStatus::PendingUpdate),
    (StackStatus::PendingUpdate, StackStatus::Updating),
    (StackStatus::Updating, StackStatus::Deployed),
    (StackStatus::Updating, StackStatus::Failed),
    (StackStatus::Deployed, StackStatus::PendingDelete),
    (StackStatus::PendingDelete, StackStatus::Deleting),
    (StackStatus::Deleting, StackStatus::Deleted),
    (StackStatus::Deleting, StackStatus::Failed),
    // Manual retry arcs out of Failed.
    (StackStatus::Failed, StackStatus::PendingCreate),
    (StackStatus::Failed, StackStatus::PendingUpdate),
    (StackStatus::Failed, StackStatus::PendingDelete),
    // Re-create after deletion within the same store lifetime.
    (StackStatus::Deleted, StackStatus::PendingCreate),
    // Reconciliation arcs: an operation interrupted by cancellation leaves
    // the stack mid-flight; the next run re-enters through pending.
    (StackStatus::Creating, StackStatus::PendingCreate),
    (StackStatus::Creating, StackStatus::PendingDelete),
    (StackStatus::Updating, StackStatus::PendingUpdate),
    (StackStatus::Updating, StackStatus::PendingDelete),
    (StackStatus::Deleting, StackStatus::PendingCreate),
    (StackStatus::Deleting, StackStatus::PendingDelete),
];

/// Validates a status transition against the legal table.
///
/// # Errors
///
/// Returns [`InvalidTransitionError`] for any pair not in the table.
pub fn transition(
    stack_id: &str,
    current: StackStatus,
    next: StackStatus,
) -> Result<StackStatus, InvalidTransitionError> {
    if LEGAL_TRANSITIONS.contains(&(current, next)) {
        Ok(next)
    } else {
        Err(InvalidTransitionError::new(stack_id, current, next))
    }
}

/// Decides the per-stack operation for a run action.
///
/// `fingerprint_changed` compares the newly resolved fingerprint against
/// the last applied one; an unchanged deployed stack is a no-op.
#[must_use]
pub fn decide_intent(
    current: StackStatus,
    action: StackAction,
    fingerprint_changed: bool,
) -> StackIntent {
    match (action, current) {
        (StackAction::Deploy, StackStatus::Unknown | StackStatus::Deleted) => StackIntent::Create,
        (StackAction::Deploy, StackStatus::Deployed) => {
            if fingerprint_changed {
                StackIntent::Update
            } else {
                StackIntent::Noop
            }
        }
        (StackAction::Deploy, StackStatus::Failed) => StackIntent::Create,
        // An interrupted operation left the remote state unknown; redo it
        // regardless of the fingerprint.
        (StackAction::Deploy, StackStatus::Creating | StackStatus::Deleting) => {
            StackIntent::Create
        }
        (StackAction::Deploy, StackStatus::Updating) => StackIntent::Update,
        (
            StackAction::Delete,
            StackStatus::Deployed
            | StackStatus::Failed
            | StackStatus::Creating
            | StackStatus::Updating
            | StackStatus::Deleting,
        ) => StackIntent::Delete,
        (StackAction::Delete, StackStatus::Unknown | StackStatus::Deleted) => StackIntent::Noop,
        // Pending statuses never persist past a decision point.
        _ => StackIntent::Noop,
    }
}

/// Computes the fingerprint of a template reference and resolved parameters.
///
/// Parameters are already canonically ordered (`BTreeMap`), so equal inputs
/// always hash identically.
#[must_use]
pub fn fingerprint(template: &str, parameters: &ResolvedParameters) -> String {
    let mut hasher = Sha256::new();
    hasher.update(template.as_bytes());
    for (key, value) in parameters {
        hasher.update([0u8]);
        hasher.update(key.as_bytes());
        hasher.update([0u8]);
        hasher.update(value.as_bytes());
    }
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}

/// Store of per-stack records for the lifetime of an orchestrator.
///
/// A stack appears in exactly one batch, so no record is ever mutated
/// concurrently; the lock only synchronizes map access itself.
#[derive(Debug, Default)]
pub struct StateStore {
    records: RwLock<HashMap<String, StackRecord>>,
}

impl StateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the record for a stack, creating it if absent.
    #[must_use]
    pub fn record(&self, stack_id: &str) -> StackRecord {
        self.records
            .write()
            .entry(stack_id.to_string())
            .or_insert_with(|| StackRecord::new(stack_id))
            .clone()
    }

    /// Returns the current status of a stack.
    #[must_use]
    pub fn status(&self, stack_id: &str) -> StackStatus {
        self.records
            .read()
            .get(stack_id)
            .map_or(StackStatus::Unknown, |record| record.status)
    }

    /// Applies a validated transition and stores the new status.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransitionError`] if the transition is illegal; the
    /// stored status is left unchanged in that case.
    pub fn apply_transition(
        &self,
        stack_id: &str,
        next: StackStatus,
    ) -> Result<StackStatus, InvalidTransitionError> {
        let mut records = self.records.write();
        let record = records
            .entry(stack_id.to_string())
            .or_insert_with(|| StackRecord::new(stack_id));
        record.status = transition(stack_id, record.status, next)?;
        Ok(record.status)
    }

    /// Records the fingerprint that was successfully applied.
    pub fn set_fingerprint(&self, stack_id: &str, fingerprint: impl Into<String>) {
        let mut records = self.records.write();
        let record = records
            .entry(stack_id.to_string())
            .or_insert_with(|| StackRecord::new(stack_id));
        record.fingerprint = Some(fingerprint.into());
    }

    /// Records an error detail for a failed stack.
    pub fn set_error(&self, stack_id: &str, error: impl Into<String>) {
        let mut records = self.records.write();
        let record = records
            .entry(stack_id.to_string())
            .or_insert_with(|| StackRecord::new(stack_id));
        record.error = Some(error.into());
    }

    /// Returns a snapshot of every record.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, StackRecord> {
        self.records.read().clone()
    }
}
