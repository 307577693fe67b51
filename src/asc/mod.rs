//! App Store Connect API integration.
//!
//! - [`token`] — ES256 bearer-token signing
//! - [`client`] — authenticated HTTP client with retry/backoff
//! - [`models`] — JSON:API resource types
//! - [`query`] — read-only registry operations
//! - [`mutate`] — state-changing registry operations

pub mod client;
pub mod models;
pub mod mutate;
pub mod query;
pub mod token;

pub use client::AscClient;
pub use mutate::AppStoreMutation;
pub use query::AppStoreQuery;
pub use token::TokenSigner;
