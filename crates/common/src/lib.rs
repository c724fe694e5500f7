//! Common utilities and shared types for herald.
//!
//! This crate provides foundational components used across all herald crates:
//!
//! - **Configuration**: Application settings via [`Config`]
//! - **Error handling**: Unified error types via [`AppError`] and [`AppResult`]
//! - **Delivery outcomes**: The result of one job attempt via [`DeliveryOutcome`]
//! - **Cryptography**: RSA key generation for HTTP Signatures
//! - **HTTP Signatures**: Signing and verification of federation requests
//! - **ID Generation**: ULID-based unique identifiers via [`IdGenerator`]
//!
//! # Example
//!
//! ```no_run
//! use herald_common::{AppResult, Config, IdGenerator};
//!
//! fn example() -> AppResult<()> {
//!     let config = Config::load()?;
//!     let id_gen = IdGenerator::new();
//!     println!("{} polls every {:?}", id_gen.generate(), config.queue.poll_interval());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod crypto;
pub mod error;
pub mod http_signature;
pub mod id;
pub mod outcome;

pub use config::{
    Config, DatabaseConfig, FanOutConfig, FederationConfig, QueueBackendKind, QueueConfig,
    RedisConfig, StompConfig,
};
pub use crypto::{RsaKeypair, generate_rsa_keypair};
pub use error::{AppError, AppResult};
pub use http_signature::{
    HttpSignature, build_signature_string, calculate_digest, http_date, sign_request,
    verify_signature,
};
pub use id::IdGenerator;
pub use outcome::DeliveryOutcome;
