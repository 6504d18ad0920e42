//! Error types for the Billing Engine.
//!
//! [`BillingError`] is what callers of the engine see.  [`StoreError`]
//! is what the collaborator stores report; the engine decides whether a
//! store failure is fatal for the whole call (finalization) or only for
//! one employee (summarization).

use thiserror::Error;

use crate::models::BillingKey;

#[derive(Debug, Error)]
pub enum BillingError {
    /// Start after end, or a date that could not be parsed.  Raised
    /// before any store is touched.
    #[error("invalid date range: {0}")]
    InvalidDateRange(String),

    #[error("project {project_id} has unknown billing policy {billing_type:?}")]
    UnknownBillingPolicy {
        project_id: String,
        billing_type: String,
    },

    #[error("project {project_id} is billed {billing_type:?} but its activity was logged as {quantity_kind:?}")]
    QuantityKindMismatch {
        project_id: String,
        billing_type: String,
        quantity_kind: crate::models::QuantityKind,
    },

    #[error("billed amount for project {project_id} is out of range")]
    AmountOverflow { project_id: String },

    #[error("billing records already exist for {}", format_keys(.0))]
    DuplicateBillingPeriod(Vec<BillingKey>),

    /// The atomic commit did not complete.  No records were created and
    /// the call may be retried.
    #[error("billing records could not be persisted: {0}")]
    PersistenceFailure(String),

    #[error("employee directory unavailable: {0}")]
    DirectoryUnavailable(String),

    #[error("calculation cancelled")]
    Cancelled,
}

impl BillingError {
    /// Whether retrying the same call unchanged may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BillingError::PersistenceFailure(_) | BillingError::DirectoryUnavailable(_)
        )
    }
}

fn format_keys(keys: &[BillingKey]) -> String {
    keys.iter()
        .map(|key| key.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Failures reported by the data stores.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// The write would violate the billing record uniqueness key.
    #[error("conflicting billing records: {}", format_keys(.0))]
    Conflict(Vec<BillingKey>),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}
