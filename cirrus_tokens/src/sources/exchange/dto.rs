//! DTOs for interacting with token endpoints

use serde::{Deserialize, Serialize};

use crate::{AccessToken, ClientId, ClientSecret, Password, Username};

#[derive(Debug, Serialize)]
pub(crate) struct ServicePrincipalRequest<'a> {
    pub client_id: &'a ClientId,
    pub client_secret: &'a ClientSecret,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub(crate) struct UserRequest<'a> {
    pub username: &'a Username,
    pub password: &'a Password,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<AccessToken>,
    #[serde(default)]
    pub client_id: Option<ClientId>,
}

impl TokenResponse {
    /// The access token, treating an empty string as absent
    pub fn into_access_token(self) -> Option<String> {
        self.access_token
            .filter(|t| !t.as_str().is_empty())
            .map(String::from)
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorResponse {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl ErrorResponse {
    pub fn into_message(self) -> Option<String> {
        let non_empty = |m: Option<String>| m.filter(|m| !m.is_empty());
        non_empty(self.message)
            .or_else(|| non_empty(self.error_description))
            .or_else(|| non_empty(self.error))
    }
}
