//! Middleware to automatically attach bearer tokens to outgoing requests
//!
//! A [`TokenAuthorizer`] keeps the most recent token from any
//! [`AsyncTokenSource`] and replaces it only once it has expired. Concurrent
//! callers that find the token expired wait on a single refresh and then
//! share its result.
//!
//! When using [`ClientWithMiddleware`](reqwest_middleware::ClientWithMiddleware),
//! include the [`AccessTokenMiddleware`] in the middleware stack to stamp
//! every outbound request with `Authorization: Bearer <token>`. Any
//! `Authorization` header already on the request is replaced.
//!
//! ```no_run
//! use cirrus_reqwest::{AccessTokenMiddleware, TokenAuthorizer};
//! use cirrus_tokens::{
//!     cache::{CacheConfig, EncryptedCache},
//!     sources::ServiceAccount,
//! };
//! use reqwest::Client;
//! use reqwest_middleware::ClientBuilder;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let source = ServiceAccount::from_file("service-account.json")
//!     .await?
//!     .into_source(Client::new())?;
//! let cached = EncryptedCache::for_source(source, CacheConfig::default());
//!
//! let client = ClientBuilder::new(Client::new())
//!     .with(AccessTokenMiddleware::new(TokenAuthorizer::new(cached)))
//!     .build();
//!
//! let resp = client.get("https://api.example.com/v1/clusters").send().await?;
//! # drop(resp);
//! # Ok(())
//! # }
//! ```
//!
//! Requests sent without the middleware can be stamped directly with
//! [`TokenAuthorizer::authorize()`], which returns an authorized copy and
//! leaves the original request untouched.

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

use std::{error, fmt, sync::Arc};

use bytes::{BufMut, BytesMut};
use cirrus_clock::{Clock, System};
use cirrus_tokens::{sources::AsyncTokenSource, Token};
use reqwest::{header, Request, Response};
use reqwest_middleware::{Middleware, Next, Result};
use thiserror::Error;
use tokio::sync::Mutex;

/// An error authorizing a request
#[derive(Debug, Error)]
pub enum AuthorizeError {
    /// The token source failed to provide a fresh token
    #[error("unable to refresh access token")]
    Refresh(#[source] Box<dyn error::Error + Send + Sync + 'static>),
    /// The request body is a stream, so the request cannot be copied
    #[error("request body cannot be cloned")]
    BodyNotCloneable,
    /// The token contains bytes that are not allowed in a header
    #[error("access token is not a valid header value")]
    InvalidHeader(#[from] header::InvalidHeaderValue),
}

/// Hands out a valid token, refreshing it from a source once it expires
///
/// The current token starts out as the always-expired default, so the first
/// request triggers a refresh. A failed refresh leaves the previous token in
/// place.
#[derive(Debug)]
pub struct TokenAuthorizer<S, C = System> {
    source: S,
    clock: C,
    current: Mutex<Token>,
}

impl<S> TokenAuthorizer<S, System> {
    /// Constructs an authorizer over `source`
    pub fn new(source: S) -> Self {
        Self {
            source,
            clock: System,
            current: Mutex::new(Token::default()),
        }
    }
}

impl<S, C> TokenAuthorizer<S, C> {
    /// Replaces the clock used to judge expiry
    pub fn with_clock<D: Clock>(self, clock: D) -> TokenAuthorizer<S, D> {
        TokenAuthorizer {
            source: self.source,
            clock,
            current: self.current,
        }
    }

    /// The token source
    pub fn source(&self) -> &S {
        &self.source
    }
}

impl<S, C> TokenAuthorizer<S, C>
where
    S: AsyncTokenSource,
    C: Clock + Send + Sync,
{
    /// A token that has not expired, refreshing first if needed
    ///
    /// Only one refresh runs at a time; callers arriving during a refresh
    /// receive its result.
    pub async fn token(&self) -> std::result::Result<Token, S::Error> {
        let mut current = self.current.lock().await;

        if current.is_expired_with_clock(&self.clock) {
            tracing::debug!(expiry = current.expiry().0, "access token expired, refreshing");
            *current = self.source.request_token().await?;
            tracing::debug!(expiry = current.expiry().0, "access token refreshed");
        }

        Ok(current.clone())
    }

    /// The `Authorization` header value for the current token
    pub async fn bearer_header(&self) -> std::result::Result<header::HeaderValue, AuthorizeError> {
        let token = self
            .token()
            .await
            .map_err(|err| AuthorizeError::Refresh(Box::new(err)))?;

        if tracing::enabled!(tracing::Level::TRACE) {
            let now = self.clock.now();
            tracing::trace!(
                token.expiry = token.expiry().0,
                token.until_expired = token.until_expired_at(now).0,
                "obtained access token"
            );
        }

        let raw = token.access_token().as_str();
        let mut header_value = BytesMut::with_capacity(raw.len() + 7);
        header_value.put_slice(b"Bearer ");
        header_value.put_slice(raw.as_bytes());

        let mut value = header::HeaderValue::from_maybe_shared(header_value.freeze())?;
        value.set_sensitive(true);
        Ok(value)
    }

    /// Returns a copy of `req` carrying the current token
    ///
    /// `req` itself is not modified.
    pub async fn authorize(&self, req: &Request) -> std::result::Result<Request, AuthorizeError> {
        let mut authorized = req.try_clone().ok_or(AuthorizeError::BodyNotCloneable)?;
        let value = self.bearer_header().await?;
        authorized.headers_mut().insert(header::AUTHORIZATION, value);
        Ok(authorized)
    }
}

/// A middleware that injects an access token into outgoing requests
pub struct AccessTokenMiddleware<S, C = System> {
    authorizer: Arc<TokenAuthorizer<S, C>>,
}

impl<S, C> AccessTokenMiddleware<S, C> {
    /// Construct a new middleware from an authorizer
    pub fn new(authorizer: TokenAuthorizer<S, C>) -> Self {
        Self::from_arc(Arc::new(authorizer))
    }

    /// Construct a new middleware sharing an authorizer with other users
    pub fn from_arc(authorizer: Arc<TokenAuthorizer<S, C>>) -> Self {
        Self { authorizer }
    }

    /// The underlying authorizer
    pub fn authorizer(&self) -> &Arc<TokenAuthorizer<S, C>> {
        &self.authorizer
    }
}

impl<S, C> Clone for AccessTokenMiddleware<S, C> {
    fn clone(&self) -> Self {
        Self {
            authorizer: Arc::clone(&self.authorizer),
        }
    }
}

impl<S: fmt::Debug, C: fmt::Debug> fmt::Debug for AccessTokenMiddleware<S, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessTokenMiddleware")
            .field("authorizer", &self.authorizer)
            .finish()
    }
}

#[async_trait::async_trait]
impl<S, C> Middleware for AccessTokenMiddleware<S, C>
where
    S: AsyncTokenSource + 'static,
    C: Clock + Send + Sync + 'static,
{
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        let value = match self.authorizer.bearer_header().await {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(
                    url = %req.url(),
                    %error,
                    "not sending request without an access token"
                );
                return Err(reqwest_middleware::Error::middleware(error));
            }
        };

        req.headers_mut().insert(header::AUTHORIZATION, value);
        next.run(req, extensions).await
    }
}
