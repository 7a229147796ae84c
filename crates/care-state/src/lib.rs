//! # care-state — Lifecycle Rules for the Care Coordination Stack
//!
//! Pure, I/O-free transition functions. The datastore calls them inside a
//! transaction with the affected rows locked, so a rule violation aborts
//! the transaction and leaves stored state unchanged.
//!
//! - [`client`] — the `waiting_list → in_care → discharging → discharged`
//!   DAG with its conditional-field rules.
//! - [`evaluation`] — draft/submitted rules, progress-log validation and
//!   next-evaluation scheduling.

pub mod client;
pub mod evaluation;

pub use client::{
    complete_discharge, move_to_care, promote, start_discharge, update_waiting_list_priority,
    ClientPhase, CompleteDischarge, LifecycleError, MoveToCare, StartDischarge,
};
pub use evaluation::{
    classify_due, ensure_draft, ensure_submitted, next_evaluation_date, validate_progress_logs,
    DueBucket, EvaluationRuleError, ProgressEntry, DEFAULT_INTERVAL_WEEKS,
};
