//! Token sources

use std::{convert::Infallible, error, sync::Arc};

use async_trait::async_trait;

use crate::Token;

pub mod exchange;
pub mod service_principal;
pub mod user;

pub use exchange::TokenRequestError;
pub use service_principal::{
    ServiceAccount, ServiceAccountError, ServicePrincipalCredentials, ServicePrincipalSource,
};
pub use user::{UserCredentialSource, UserCredentials};

/// An asynchronous source for tokens
///
/// Implementations take `&self` so that one source can be shared between
/// concurrent callers. Cancelling a request is done by dropping the returned
/// future, and deadlines by wrapping it in [`tokio::time::timeout`].
#[async_trait]
pub trait AsyncTokenSource: Send + Sync {
    /// The error type returned in the event that retrieving a token fails
    type Error: error::Error + Send + Sync + 'static;

    /// Requests a token from the source
    async fn request_token(&self) -> Result<Token, Self::Error>;
}

#[async_trait]
impl<T: AsyncTokenSource + ?Sized> AsyncTokenSource for Arc<T> {
    type Error = T::Error;

    async fn request_token(&self) -> Result<Token, Self::Error> {
        (**self).request_token().await
    }
}

#[async_trait]
impl<T: AsyncTokenSource + ?Sized> AsyncTokenSource for Box<T> {
    type Error = T::Error;

    async fn request_token(&self) -> Result<Token, Self::Error> {
        (**self).request_token().await
    }
}

/// Material an encrypted cache needs to share tokens for one principal
///
/// Processes configured with the same principal derive the same cache file
/// and the same encryption key, and so converge on one shared token.
pub trait CacheMaterial {
    /// Identifies the principal; hashed into the cache file name
    fn cache_suffix(&self) -> String;

    /// Long-lived secret from which the cache encryption key is derived
    fn cache_secret(&self) -> &[u8];
}

/// A token source that always returns the same token
#[derive(Clone, Debug)]
pub struct StaticTokenSource {
    token: Token,
}

impl StaticTokenSource {
    /// Constructs a new static token source
    pub fn new(token: Token) -> Self {
        Self { token }
    }
}

#[async_trait]
impl AsyncTokenSource for StaticTokenSource {
    type Error = Infallible;

    async fn request_token(&self) -> Result<Token, Self::Error> {
        Ok(self.token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::token_with_exp;

    #[tokio::test]
    async fn static_source_returns_its_token() {
        let token = token_with_exp(1_900_000_000);
        let source = Arc::new(StaticTokenSource::new(token.clone()));

        assert_eq!(source.request_token().await.unwrap(), token);
        assert_eq!(source.request_token().await.unwrap(), token);
    }
}
