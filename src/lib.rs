//! # Social Accounts Library
//!
//! Credential lifecycle for linked social media accounts: an encrypted account
//! store, a token validator that refreshes OAuth 2.0 tokens before they expire,
//! and a dual-auth signer for Twitter/X's OAuth 2.0 and OAuth 1.0a surfaces.

pub mod auth;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod platforms;
pub mod repositories;
pub mod server;
pub mod service;
pub mod signer;
pub mod store;
pub mod telemetry;
pub mod token_refresh;
pub use migration;
