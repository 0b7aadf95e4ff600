//! Session token and the identity carried in it.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

/// User identity read from a token's claims.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// `user_id` claim, stringified.
    pub user_id: Option<String>,
    /// `user` claim (the account name).
    pub user: Option<String>,
}

#[derive(Deserialize)]
struct Claims {
    #[serde(default)]
    user_id: Option<serde_json::Value>,
    #[serde(default)]
    user: Option<String>,
}

impl Identity {
    /// Read the identity from a JWT's payload segment.
    ///
    /// The signature is not checked; the backends verify tokens. Returns
    /// `None` for anything that is not a three-segment token with a JSON
    /// payload carrying at least one of the claims.
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        let mut segments = token.split('.');
        let (_header, payload, _sig) = (segments.next()?, segments.next()?, segments.next()?);
        if segments.next().is_some() {
            return None;
        }
        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .ok()?;
        let claims: Claims = serde_json::from_slice(&bytes).ok()?;
        let user_id = claims.user_id.and_then(|v| match v {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
        if user_id.is_none() && claims.user.is_none() {
            return None;
        }
        Some(Self {
            user_id,
            user: claims.user,
        })
    }
}

/// The multiplexer-wide session.
///
/// Set by the most recent `setToken`; a new token overwrites the previous
/// one (identity included), nothing is merged.
#[derive(Clone, Default)]
pub struct Session {
    token: Option<String>,
    identity: Option<Identity>,
}

impl Session {
    /// Replace the token and re-derive the identity.
    pub fn set_token(&mut self, token: String) {
        self.identity = Identity::from_token(&token);
        self.token = Some(token);
    }

    /// Current token, if any.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Identity read from the current token.
    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Whether a token has been set.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("identity", &self.identity)
            .finish()
    }
}
