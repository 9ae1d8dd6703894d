//! The credential-for-token exchange shared by network sources

use std::fmt;

use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;

use crate::{retry::RetryPolicy, ClientId, TokenParseError};

pub(crate) mod dto;

/// An error while attempting to request a new token from the authority
#[derive(Debug, Error)]
pub enum TokenRequestError {
    /// The authority could not be reached within the retry budget
    #[error("token endpoint unreachable after {attempts} attempts")]
    Unreachable {
        /// Number of attempts made
        attempts: u32,
        /// The error from the final attempt
        source: reqwest::Error,
    },
    /// The authority kept answering with a server error
    #[error("token endpoint returned {status} after {attempts} attempts")]
    ServerError {
        /// Number of attempts made
        attempts: u32,
        /// The status of the final response
        status: StatusCode,
        /// The error message decoded from the final response, if any
        message: Option<String>,
    },
    /// The authority refused the credentials
    #[error("token request rejected with {status}: {message}")]
    Rejected {
        /// The response status
        status: StatusCode,
        /// The error message decoded from the response
        message: String,
    },
    /// The authority answered for a different principal
    #[error("token response is for client `{received}` but `{expected}` was requested")]
    ClientIdMismatch {
        /// The client ID sent in the request
        expected: ClientId,
        /// The client ID echoed in the response
        received: ClientId,
    },
    /// A successful response lacked a required field
    #[error("token response is missing `{0}`")]
    MissingField(&'static str),
    /// Unable to deserialize the token body
    #[error("error deserializing token body from authority")]
    Body(#[from] serde_json::Error),
    /// The access token in the response is not a valid token
    #[error("token response contains an invalid access token")]
    InvalidToken(#[from] TokenParseError),
    /// Unable to read the response
    #[error("error reading response body")]
    BodyRead(#[source] reqwest::Error),
    /// The request could not be constructed or sent for a non-transient reason
    #[error("error sending request to authority")]
    RequestSend(#[source] reqwest::Error),
}

impl TokenRequestError {
    /// Whether the failure was transient and a later attempt may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable { .. } | Self::ServerError { .. })
    }

    /// Whether the authority rejected the credentials or answered for
    /// someone else
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. } | Self::ClientIdMismatch { .. })
    }

    /// Whether a successful response did not carry a usable token
    pub fn is_invalid_response(&self) -> bool {
        matches!(
            self,
            Self::MissingField(_) | Self::Body(_) | Self::InvalidToken(_)
        )
    }
}

enum TransientFailure {
    Transport(reqwest::Error),
    Status {
        status: StatusCode,
        message: Option<String>,
    },
}

impl TransientFailure {
    fn into_error(self, attempts: u32) -> TokenRequestError {
        match self {
            Self::Transport(source) => TokenRequestError::Unreachable { attempts, source },
            Self::Status { status, message } => TokenRequestError::ServerError {
                attempts,
                status,
                message,
            },
        }
    }
}

impl fmt::Display for TransientFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(err) => fmt::Display::fmt(err, f),
            Self::Status { status, .. } => write!(f, "server responded with {status}"),
        }
    }
}

fn is_transient(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout() || err.is_request()
}

/// Posts `payload` to `token_url` and decodes the token response
///
/// Connection failures, timeouts and 5xx responses are retried per `retry`.
/// Any other non-success status is returned immediately as
/// [`TokenRequestError::Rejected`].
pub(crate) async fn exchange<P>(
    client: &reqwest::Client,
    token_url: &reqwest::Url,
    payload: &P,
    retry: &RetryPolicy,
) -> Result<dto::TokenResponse, TokenRequestError>
where
    P: Serialize + ?Sized,
{
    let resp = send_with_retry(client, token_url, payload, retry).await?;
    let status = resp.status();

    tracing::debug!(
        response.status = status.as_u16(),
        "received token response from issuing authority"
    );

    if !status.is_success() {
        let message = error_message(resp)
            .await
            .unwrap_or_else(|| fallback_message(status));
        return Err(TokenRequestError::Rejected { status, message });
    }

    let body = resp.bytes().await.map_err(TokenRequestError::BodyRead)?;
    Ok(serde_json::from_slice(&body)?)
}

async fn send_with_retry<P>(
    client: &reqwest::Client,
    token_url: &reqwest::Url,
    payload: &P,
    retry: &RetryPolicy,
) -> Result<reqwest::Response, TokenRequestError>
where
    P: Serialize + ?Sized,
{
    let mut backoff = retry.backoff_handler();
    let mut attempt = 0;

    loop {
        attempt += 1;

        let result = client
            .post(token_url.clone())
            .timeout(retry.attempt_timeout())
            .json(payload)
            .send()
            .await;

        let failure = match result {
            Ok(resp) if resp.status().is_server_error() => {
                let status = resp.status();
                TransientFailure::Status {
                    status,
                    message: error_message(resp).await,
                }
            }
            Ok(resp) => return Ok(resp),
            Err(err) if is_transient(&err) => TransientFailure::Transport(err),
            Err(err) => return Err(TokenRequestError::RequestSend(err)),
        };

        if attempt >= retry.max_attempts() {
            tracing::error!(attempt, error = %failure, "all token request attempts failed");
            return Err(failure.into_error(attempt));
        }

        let delay = backoff.error();
        tracing::warn!(
            attempt,
            max_attempts = retry.max_attempts(),
            delay_ms = delay.as_millis() as u64,
            error = %failure,
            "token request failed, will retry"
        );
        tokio::time::sleep(delay).await;
    }
}

async fn error_message(resp: reqwest::Response) -> Option<String> {
    let body = resp.bytes().await.ok()?;
    serde_json::from_slice::<dto::ErrorResponse>(&body)
        .ok()?
        .into_message()
}

fn fallback_message(status: StatusCode) -> String {
    status
        .canonical_reason()
        .map(str::to_owned)
        .unwrap_or_else(|| status.as_str().to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_message_uses_reason_phrase() {
        assert_eq!(fallback_message(StatusCode::UNAUTHORIZED), "Unauthorized");
        assert_eq!(
            fallback_message(StatusCode::from_u16(499).unwrap()),
            "499"
        );
    }

    #[test]
    fn classification_is_disjoint() {
        let err = TokenRequestError::MissingField("access_token");
        assert!(err.is_invalid_response());
        assert!(!err.is_transient());
        assert!(!err.is_rejected());

        let err = TokenRequestError::ServerError {
            attempts: 3,
            status: StatusCode::BAD_GATEWAY,
            message: None,
        };
        assert!(err.is_transient());
        assert!(!err.is_rejected());

        let err = TokenRequestError::ClientIdMismatch {
            expected: ClientId::from_static("a"),
            received: ClientId::from_static("b"),
        };
        assert!(err.is_rejected());
        assert!(!err.is_transient());
    }
}
