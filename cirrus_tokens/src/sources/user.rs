//! A token source that authenticates as a user account

use async_trait::async_trait;

use super::{
    exchange::{self, dto, TokenRequestError},
    AsyncTokenSource, CacheMaterial,
};
use crate::{retry::RetryPolicy, Password, Token, Username, UsernameRef};

/// Username and password of a user account
#[derive(Clone, Debug)]
pub struct UserCredentials {
    /// The account name
    pub username: Username,

    /// The account password
    pub password: Password,
}

/// A token source exchanging user credentials for tokens
#[derive(Clone, Debug)]
pub struct UserCredentialSource {
    client: reqwest::Client,
    token_url: reqwest::Url,
    credentials: UserCredentials,
    retry: RetryPolicy,
}

impl UserCredentialSource {
    /// Constructs a new user credential source
    pub fn new(
        client: reqwest::Client,
        token_url: reqwest::Url,
        credentials: UserCredentials,
    ) -> Self {
        Self {
            client,
            token_url,
            credentials,
            retry: RetryPolicy::default(),
        }
    }

    /// Replaces the default retry policy
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The account this source authenticates as
    pub fn username(&self) -> &UsernameRef {
        &self.credentials.username
    }
}

#[async_trait]
impl AsyncTokenSource for UserCredentialSource {
    type Error = TokenRequestError;

    async fn request_token(&self) -> Result<Token, Self::Error> {
        request_token(&self.client, &self.token_url, &self.credentials, &self.retry).await
    }
}

#[tracing::instrument(
    err,
    skip(client, token_url, credentials, retry),
    fields(
        token_url = %token_url,
        credentials.username = %credentials.username,
    ),
)]
async fn request_token(
    client: &reqwest::Client,
    token_url: &reqwest::Url,
    credentials: &UserCredentials,
    retry: &RetryPolicy,
) -> Result<Token, TokenRequestError> {
    tracing::trace!("requesting user token from authority");

    let payload = dto::UserRequest {
        username: &credentials.username,
        password: &credentials.password,
    };

    let access_token = exchange::exchange(client, token_url, &payload, retry)
        .await?
        .into_access_token()
        .ok_or(TokenRequestError::MissingField("access_token"))?;
    let token = Token::parse(access_token)?;

    tracing::info!(expiry = token.expiry().0, "received new user token");

    Ok(token)
}

impl CacheMaterial for UserCredentialSource {
    fn cache_suffix(&self) -> String {
        format!("{}|{}", self.token_url, self.credentials.username)
    }

    fn cache_secret(&self) -> &[u8] {
        self.credentials.password.as_str().as_bytes()
    }
}
