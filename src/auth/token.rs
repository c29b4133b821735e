//! RS256 device token minting
//!
//! Claims follow the IoT Core device authentication contract: `iat`, `exp`
//! one hour later, and `aud` set to the cloud project id.

use super::clock::{Clock, SystemClock};
use crate::error::{PublisherError, PublisherResult};
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

/// Token validity window in seconds
pub const TOKEN_LIFETIME_SECS: i64 = 3600;

/// Claim set carried by a device token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Issued at, seconds since the Unix epoch
    pub iat: i64,
    /// Expiry, always `iat + TOKEN_LIFETIME_SECS`
    pub exp: i64,
    /// Audience: the cloud project id
    pub aud: String,
}

impl Claims {
    /// Claims for a token issued at `issued_at`
    pub fn issued_at(issued_at: DateTime<Utc>, audience: &str) -> Self {
        let iat = issued_at.timestamp();
        Self {
            iat,
            exp: iat + TOKEN_LIFETIME_SECS,
            aud: audience.to_string(),
        }
    }
}

/// Signed compact JWT together with the claims it carries
#[derive(Clone)]
pub struct AuthToken {
    token: String,
    claims: Claims,
}

impl AuthToken {
    /// Compact `header.claims.signature` form used as the MQTT password
    pub fn as_str(&self) -> &str {
        &self.token
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    /// Expiry as a timestamp
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.claims.exp, 0)
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("token", &"***")
            .field("claims", &self.claims)
            .finish()
    }
}

/// Mints device tokens for a single audience
pub struct TokenMinter<C: Clock = SystemClock> {
    audience: String,
    clock: C,
}

impl TokenMinter<SystemClock> {
    /// Minter using the wall clock
    pub fn new<S: Into<String>>(audience: S) -> Self {
        Self::with_clock(audience, SystemClock)
    }
}

impl<C: Clock> TokenMinter<C> {
    pub fn with_clock<S: Into<String>>(audience: S, clock: C) -> Self {
        Self {
            audience: audience.into(),
            clock,
        }
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// Read a PEM private key from `path` and mint a token with it
    pub fn mint_from_file<P: AsRef<Path>>(&self, path: P) -> PublisherResult<AuthToken> {
        let path = path.as_ref();
        let token = {
            let pem = std::fs::read(path).map_err(|e| PublisherError::file_access(path, e))?;
            self.mint(&pem)?
        };

        info!(
            audience = %self.audience,
            expires_at = token.claims.exp,
            "Minted device token"
        );
        Ok(token)
    }

    /// Mint a token from PEM encoded RSA private key bytes
    pub fn mint(&self, pem: &[u8]) -> PublisherResult<AuthToken> {
        let key = EncodingKey::from_rsa_pem(pem)
            .map_err(|e| PublisherError::key_parse(e.to_string()))?;

        let claims = Claims::issued_at(self.clock.now(), &self.audience);
        // A PEM public key parses fine and is only rejected once signing starts
        let token = encode(&Header::new(Algorithm::RS256), &claims, &key).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidRsaKey(_) | ErrorKind::InvalidKeyFormat => {
                    PublisherError::key_parse(e.to_string())
                }
                _ => PublisherError::signing(e.to_string()),
            }
        })?;

        debug!(iat = claims.iat, exp = claims.exp, "Signed RS256 token");
        Ok(AuthToken { token, claims })
    }
}
