//! Core credential types.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{LinkError, Result};

/// Access/refresh token pair for the active session.
///
/// Both tokens are non-empty. An unauthenticated session is represented by the
/// absence of a credential, never by empty strings.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    access_token: String,
    refresh_token: String,
}

impl Credential {
    /// Create a credential, rejecting empty tokens.
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Result<Self> {
        let credential = Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        };
        credential.validate()?;
        Ok(credential)
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn refresh_token(&self) -> &str {
        &self.refresh_token
    }

    /// Value for the `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }

    /// Check both tokens are present (deserialized values skip `new`).
    pub fn validate(&self) -> Result<()> {
        if self.access_token.is_empty() {
            return Err(LinkError::InvalidCredential("empty access token".into()));
        }
        if self.refresh_token.is_empty() {
            return Err(LinkError::InvalidCredential("empty refresh token".into()));
        }
        Ok(())
    }
}

/// Token values never end up in logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &mask(&self.access_token))
            .field("refresh_token", &mask(&self.refresh_token))
            .finish()
    }
}

/// Keep the first four characters of a token.
pub fn mask(token: &str) -> String {
    let visible: String = token.chars().take(4).collect();
    if token.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("{visible}****")
    }
}

/// Body returned by the renewal endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewalResult {
    pub access_token: String,
    pub refresh_token: String,
}

impl TryFrom<RenewalResult> for Credential {
    type Error = LinkError;

    fn try_from(result: RenewalResult) -> Result<Self> {
        Credential::new(result.access_token, result.refresh_token)
    }
}
