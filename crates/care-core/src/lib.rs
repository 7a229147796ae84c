//! # care-core — Foundational Types for the Care Coordination Stack
//!
//! Every other crate in the workspace depends on this one. It has no
//! internal crate dependencies and carries no I/O.
//!
//! ## Contents
//!
//! - [`id`] — 20-character opaque identifiers drawn from the OS CSPRNG.
//! - [`enums`] — closed vocabularies serialized as lowercase snake_case.
//! - [`records`] — the persisted domain records (clients, forms, evaluations, ...).
//! - [`page`] — pagination request clamping and the list envelope.
//! - [`audit`] — canonical audit tuple, SHA-256 hash chain and verifier.
//! - [`temporal`] — date/time parsing and microsecond-precision clocks.
//! - [`digest`] — SHA-256 helpers used for audit hashing and key privacy.

pub mod audit;
pub mod digest;
pub mod enums;
pub mod error;
pub mod id;
pub mod page;
pub mod records;
pub mod temporal;

pub use audit::{verify_chain, AuditEntry, ChainVerification, NewAuditEntry, GENESIS};
pub use digest::sha256_hex;
pub use enums::{
    AuditAction, AuditStatus, CareType, ClientStatus, DischargeReason, DischargeStatus,
    EvaluationStatus, Gender, GoalProgressStatus, IncidentSeverity, IncidentStatus, IncidentType,
    IntakeStatus, RegistrationStatus, WaitingListPriority,
};
pub use error::ValidationError;
pub use id::{is_valid_id, new_id, ID_LEN};
pub use page::{Page, PageRequest};
pub use temporal::now_micros;
