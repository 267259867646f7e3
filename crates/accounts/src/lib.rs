//! Accounts domain module: users and the KYC gate.
//!
//! Credentials live with the external auth gate. This crate only holds the
//! attributes the marketplace reads: display name, role and verification.

pub mod kyc;
pub mod user;

pub use kyc::{KycDocuments, KycGate, KycOutcome, KycVerifier, VerifierError};
pub use user::{KycApproved, NameChanged, RoleAssigned, User, UserEvent, UserRegistered};
