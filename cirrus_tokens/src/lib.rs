//! Bearer-token acquisition and caching for cloud API clients
//!
//! Clients of a cloud control plane authenticate every request with a
//! short-lived bearer token. This crate obtains those tokens and keeps them
//! in a form that can be shared by every process running as the same
//! principal.
//!
//! Tokens come from an [`AsyncTokenSource`][sources::AsyncTokenSource]:
//!
//! * [`ServicePrincipalSource`][sources::ServicePrincipalSource] exchanges a
//!   client ID and secret at the authority's token endpoint.
//! * [`UserCredentialSource`][sources::UserCredentialSource] exchanges a
//!   username and password.
//! * [`StaticTokenSource`][sources::StaticTokenSource] hands out a token
//!   obtained elsewhere.
//!
//! Any of these can be wrapped in an
//! [`EncryptedCache`][cache::EncryptedCache], which stores the latest token
//! in an encrypted file guarded by a lock file. Processes configured for the
//! same principal then fetch at most one token between them per expiry.
//!
//! ```no_run
//! use cirrus_tokens::{
//!     cache::{CacheConfig, EncryptedCache},
//!     sources::{AsyncTokenSource, ServicePrincipalCredentials, ServicePrincipalSource},
//!     ClientId, ClientSecret,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let source = ServicePrincipalSource::new(
//!     reqwest::Client::new(),
//!     "https://auth.example.com/api/token".parse()?,
//!     ServicePrincipalCredentials {
//!         client_id: ClientId::from_static("my-client"),
//!         client_secret: ClientSecret::from_static("my-secret"),
//!         name: None,
//!     },
//! );
//!
//! let cached = EncryptedCache::for_source(source, CacheConfig::default().with_env_overrides()?);
//!
//! let token = cached.request_token().await?;
//! tracing::info!(expiry = token.expiry().0, "obtained token");
//! # Ok(())
//! # }
//! ```
//!
//! The example in this crate's `examples` folder does the same from the
//! command line.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod braids;
pub mod cache;
pub mod retry;
pub mod sources;
mod token;


pub use braids::*;
pub use token::{Token, TokenParseError};
