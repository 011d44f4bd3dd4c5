//! Router Module Index
//!
//! Routes are grouped by the identity they accept, so access tiers are visible at the
//! routing level. Class-level authorization still happens in the handlers through
//! `crate::access`.

/// No identity required.
pub mod public;

/// Signed-in users or guests. Handlers resolve a `Principal` and run the access guard.
pub mod shared;

/// Signed-in users only; wrapped in the `AuthUser` middleware layer.
pub mod authenticated;
