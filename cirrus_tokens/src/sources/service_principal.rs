//! A token source that authenticates as a service principal

use std::{error, io, path::Path};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use super::{
    exchange::{self, dto, TokenRequestError},
    AsyncTokenSource, CacheMaterial,
};
use crate::{retry::RetryPolicy, ClientId, ClientIdRef, ClientSecret, Token};

/// Credentials identifying a service principal
#[derive(Clone, Debug)]
pub struct ServicePrincipalCredentials {
    /// The client ID
    pub client_id: ClientId,

    /// The client secret
    pub client_secret: ClientSecret,

    /// The display name of the principal, sent when present
    pub name: Option<String>,
}

/// A token source exchanging service principal credentials for tokens
#[derive(Clone, Debug)]
pub struct ServicePrincipalSource {
    client: reqwest::Client,
    token_url: reqwest::Url,
    credentials: ServicePrincipalCredentials,
    retry: RetryPolicy,
}

impl ServicePrincipalSource {
    /// Constructs a new service principal source
    pub fn new(
        client: reqwest::Client,
        token_url: reqwest::Url,
        credentials: ServicePrincipalCredentials,
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

    /// The client ID this source authenticates as
    pub fn client_id(&self) -> &ClientIdRef {
        &self.credentials.client_id
    }

    /// The token endpoint
    pub fn token_url(&self) -> &reqwest::Url {
        &self.token_url
    }
}

#[async_trait]
impl AsyncTokenSource for ServicePrincipalSource {
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
        credentials.client_id = %credentials.client_id,
    ),
)]
async fn request_token(
    client: &reqwest::Client,
    token_url: &reqwest::Url,
    credentials: &ServicePrincipalCredentials,
    retry: &RetryPolicy,
) -> Result<Token, TokenRequestError> {
    tracing::trace!("requesting service principal token from authority");

    let payload = dto::ServicePrincipalRequest {
        client_id: &credentials.client_id,
        client_secret: &credentials.client_secret,
        name: credentials.name.as_deref(),
    };

    let resp = exchange::exchange(client, token_url, &payload, retry).await?;

    match &resp.client_id {
        Some(received) if *received == credentials.client_id => {}
        Some(received) => {
            return Err(TokenRequestError::ClientIdMismatch {
                expected: credentials.client_id.clone(),
                received: received.clone(),
            })
        }
        None => return Err(TokenRequestError::MissingField("client_id")),
    }

    let access_token = resp
        .into_access_token()
        .ok_or(TokenRequestError::MissingField("access_token"))?;
    let token = Token::parse(access_token)?;

    tracing::info!(expiry = token.expiry().0, "received new service principal token");

    Ok(token)
}

impl CacheMaterial for ServicePrincipalSource {
    fn cache_suffix(&self) -> String {
        format!("{}|{}", self.token_url, self.credentials.client_id)
    }

    fn cache_secret(&self) -> &[u8] {
        self.credentials.client_secret.as_str().as_bytes()
    }
}

/// A service account as exported to a JSON credentials file
#[derive(Clone, Debug, Deserialize)]
pub struct ServiceAccount {
    /// The display name of the account
    #[serde(default)]
    pub name: Option<String>,

    /// The client ID
    pub client_id: ClientId,

    /// The client secret
    pub client_secret: ClientSecret,

    /// The token endpoint of the account
    pub access_token_uri: String,
}

/// An error loading a service account
#[derive(Debug, Error)]
pub enum ServiceAccountError {
    /// The credentials file could not be read
    #[error("unable to read service account file")]
    Read(#[from] io::Error),
    /// The credentials are not a valid service account document
    #[error("unable to parse service account")]
    Parse(#[from] serde_json::Error),
    /// The access token URI is not a valid URL
    #[error("service account access token URI is not a valid URL")]
    InvalidUri(#[source] Box<dyn error::Error + Send + Sync + 'static>),
}

impl ServiceAccount {
    /// Parses a service account from its JSON representation
    pub fn from_json(json: &str) -> Result<Self, ServiceAccountError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads a service account from a JSON credentials file
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ServiceAccountError> {
        let data = tokio::fs::read_to_string(path).await?;
        Self::from_json(&data)
    }

    /// Builds a token source that authenticates as this account
    pub fn into_source(
        self,
        client: reqwest::Client,
    ) -> Result<ServicePrincipalSource, ServiceAccountError> {
        let token_url = reqwest::Url::parse(&self.access_token_uri)
            .map_err(|err| ServiceAccountError::InvalidUri(err.into()))?;

        Ok(ServicePrincipalSource::new(
            client,
            token_url,
            ServicePrincipalCredentials {
                client_id: self.client_id,
                client_secret: self.client_secret,
                name: self.name,
            },
        ))
    }
}
