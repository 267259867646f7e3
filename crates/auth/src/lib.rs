//! `agrinet-auth`: authorization boundary types.
//!
//! Authentication (passwords, tokens) happens upstream; this crate only models
//! what an authenticated request carries and how it is refused.

pub mod authorize;
pub mod principal;
pub mod roles;

pub use authorize::{AuthzError, require_admin};
pub use principal::Actor;
pub use roles::Role;
