//! # Services
//!
//! Multi-step operations that sit between handlers and the datastore. Each
//! service owns a closed error enum, translates the [`StoreError`] variants
//! it can name, and converts into [`AppError`](crate::error::AppError) with a
//! canonical code. Handlers only call a service function and propagate.
//!
//! | Module | Operations |
//! |--------|------------|
//! | [`auth`] | login, refresh rotation, logout, profile, employee accounts |
//! | [`clients`] | promotion to the waiting list, lifecycle transitions, reads |
//! | [`evaluations`] | create, drafts, submit, update, due listings |
//! | [`rbac`] | roles, permission grants, user role assignment |
//!
//! [`StoreError`]: crate::db::StoreError

pub mod auth;
pub mod clients;
pub mod evaluations;
pub mod rbac;
