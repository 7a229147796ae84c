//! # Route Modules
//!
//! One module per resource. Every module exposes `router()`; authenticated
//! routes declare their permission with [`guard`](crate::middleware::rbac::guard)
//! next to the handler.
//!
//! | Module | Prefix | Permission resource |
//! |--------|--------|---------------------|
//! | [`auth`] | `/auth/*` | public, `/auth/me` authenticated |
//! | [`employees`] | `/employees/*`, `/users/*` | `employee`, `user` |
//! | [`referring_orgs`] | `/referring-orgs/*` | `referring_org` |
//! | [`locations`] | `/locations/*` | `location` |
//! | [`registration_forms`] | `/registration-forms/*` | `registration_form` |
//! | [`intake_forms`] | `/intake-forms/*` | `intake_form` |
//! | [`clients`] | `/clients/*` | `client` |
//! | [`evaluations`] | `/evaluations/*`, `/clients/:id/evaluations/*` | `evaluation` |
//! | [`incidents`] | `/incidents/*` | `incident` |
//! | [`attachments`] | `/attachments/*` | `attachment` |
//! | [`roles`] | `/roles/*`, `/permissions` | `role` |
//! | [`dashboard`] | `/dashboard/*` | `dashboard` |
//! | [`audit`] | `/audit/*` | `audit` |

pub mod attachments;
pub mod audit;
pub mod auth;
pub mod clients;
pub mod dashboard;
pub mod employees;
pub mod evaluations;
pub mod incidents;
pub mod intake_forms;
pub mod locations;
pub mod referring_orgs;
pub mod registration_forms;
pub mod roles;
