//! # Repository Layer
//!
//! SeaORM-backed persistence. Repositories encapsulate queries and at-rest
//! encryption and expose the domain [`crate::store::AccountStore`] contract.

pub mod credential;

pub use credential::CredentialRepository;
