use base64::{
    alphabet,
    engine::{general_purpose::GeneralPurposeConfig, DecodePaddingMode, GeneralPurpose},
    Engine,
};
use cirrus_clock::{Clock, DurationSecs, UnixTime};
use thiserror::Error;

use crate::{AccessToken, AccessTokenRef};

/// Base64url that tolerates both padded and unpadded input
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// A bearer token together with the expiry embedded in its claims
///
/// A `Token` can only be obtained by successfully parsing a compact signed
/// token, or as the [`Default`] value, which is always considered expired.
/// The signature is not verified; the issuing authority is trusted and the
/// claims are read solely to learn when the token stops being useful.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    access_token: AccessToken,
    expiry: UnixTime,
}

/// The reason a string could not be parsed as a [`Token`]
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenParseError {
    /// The token is not three dot-separated segments
    #[error("token is not a compact token with three segments")]
    Malformed,
    /// The claims segment is not valid base64url
    #[error("token claims segment is not valid base64url")]
    ClaimsEncoding,
    /// The claims segment does not decode to a JSON object
    #[error("token claims segment is not a JSON object")]
    ClaimsNotObject,
    /// The `exp` claim is missing
    #[error("token has no `exp` claim")]
    MissingExpiry,
    /// The `exp` claim is not a non-negative number
    #[error("token `exp` claim is not a non-negative number")]
    InvalidExpiry,
}

macro_rules! expect_three {
    ($iter:expr) => {{
        let mut i = $iter;
        match (i.next(), i.next(), i.next(), i.next()) {
            (Some(first), Some(second), Some(third), None) => Some((first, second, third)),
            _ => None,
        }
    }};
}

impl Token {
    /// Parses a compact signed token and extracts its expiry
    ///
    /// # Errors
    ///
    /// Fails if `raw` is not three dot-separated segments, if the middle
    /// segment is not a base64url-encoded JSON object, or if that object
    /// lacks a numeric `exp` claim.
    pub fn parse(raw: impl Into<String>) -> Result<Self, TokenParseError> {
        let raw = raw.into();
        let expiry = expiry_claim(&raw)?;

        Ok(Self {
            access_token: AccessToken::new(raw),
            expiry,
        })
    }

    /// The raw access token
    #[inline]
    pub fn access_token(&self) -> &AccessTokenRef {
        &self.access_token
    }

    /// The instant at which the token expires
    #[inline]
    pub fn expiry(&self) -> UnixTime {
        self.expiry
    }

    /// Whether the token is unusable at `now`
    ///
    /// The cutoff is exact: a token is expired from the second named by its
    /// `exp` claim onward. The default token is always expired.
    #[inline]
    pub fn is_expired(&self, now: UnixTime) -> bool {
        self.access_token.as_str().is_empty() || now >= self.expiry
    }

    /// Whether the token is unusable according to `clock`
    #[inline]
    pub fn is_expired_with_clock<C: Clock>(&self, clock: &C) -> bool {
        self.is_expired(clock.now())
    }

    /// How much longer the token remains usable as of `now`
    #[inline]
    pub fn until_expired_at(&self, now: UnixTime) -> DurationSecs {
        if self.is_expired(now) {
            DurationSecs(0)
        } else {
            self.expiry - now
        }
    }
}

impl Default for Token {
    fn default() -> Self {
        Self {
            access_token: AccessToken::from_static(""),
            expiry: UnixTime::EPOCH,
        }
    }
}

fn expiry_claim(raw: &str) -> Result<UnixTime, TokenParseError> {
    let (_header, claims, _signature) =
        expect_three!(raw.split('.')).ok_or(TokenParseError::Malformed)?;

    let decoded = URL_SAFE_LENIENT
        .decode(claims)
        .map_err(|_| TokenParseError::ClaimsEncoding)?;

    let claims: serde_json::Map<String, serde_json::Value> =
        serde_json::from_slice(&decoded).map_err(|_| TokenParseError::ClaimsNotObject)?;

    let exp = claims.get("exp").ok_or(TokenParseError::MissingExpiry)?;

    if let Some(secs) = exp.as_u64() {
        Ok(UnixTime(secs))
    } else {
        match exp.as_f64() {
            Some(secs) if secs >= 0.0 && secs.is_finite() => Ok(UnixTime(secs as u64)),
            _ => Err(TokenParseError::InvalidExpiry),
        }
    }
}
