//! JWT-backed session codec.
//!
//! Default inner codec for [`CompressedSessionCodec`](super::CompressedSessionCodec):
//! sessions are signed JWTs whose audience and issuer are the service
//! provider's base URL.

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

use super::SessionCodec;
use crate::saml::Middleware;

/// Errors from signing or verifying session JWTs.
#[derive(Debug, Error)]
pub enum JwtCodecError {
    #[error("session token rejected: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("token is not a SAML session (saml-session claim missing or false)")]
    NotSamlSession,
}

/// Claims carried by a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Audience (SP base URL).
    pub aud: String,
    /// Expiration time (unix seconds).
    pub exp: i64,
    /// Token ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    /// Issued at (unix seconds).
    pub iat: i64,
    /// Issuer (SP base URL).
    pub iss: String,
    /// Not before (unix seconds).
    pub nbf: i64,
    /// Subject, usually the assertion's NameID.
    pub sub: String,
    /// SAML attributes, multi-valued.
    #[serde(default)]
    pub attr: BTreeMap<String, Vec<String>>,
    /// Marks tokens minted for SAML sessions.
    #[serde(rename = "saml-session", default)]
    pub saml_session: bool,
}

impl SessionClaims {
    /// First value of an attribute.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attr
            .get(name)
            .and_then(|values| values.first())
            .map(|s| s.as_str())
    }
}

/// Signing and verification keys for session tokens.
pub struct SessionKeys {
    algorithm: Algorithm,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SessionKeys {
    /// HS256 keys from a shared secret.
    pub fn hmac(secret: &[u8]) -> Self {
        Self {
            algorithm: Algorithm::HS256,
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }

    /// RS256 keys from a PEM private key and the matching PEM public key.
    pub fn rsa_pem(private_key_pem: &[u8], public_key_pem: &[u8]) -> Result<Self, JwtCodecError> {
        Ok(Self {
            algorithm: Algorithm::RS256,
            encoding: EncodingKey::from_rsa_pem(private_key_pem)?,
            decoding: DecodingKey::from_rsa_pem(public_key_pem)?,
        })
    }
}

/// Signs [`SessionClaims`] as JWTs.
pub struct JwtSessionCodec {
    keys: SessionKeys,
    audience: String,
    issuer: String,
    max_age: Duration,
}

impl JwtSessionCodec {
    pub fn new(
        keys: SessionKeys,
        audience: impl Into<String>,
        issuer: impl Into<String>,
        max_age: Duration,
    ) -> Self {
        Self {
            keys,
            audience: audience.into(),
            issuer: issuer.into(),
            max_age,
        }
    }

    /// Codec bound to a bootstrapped middleware: audience and issuer are its
    /// base URL, lifetime is its token max-age.
    pub fn for_middleware(middleware: &Middleware, keys: SessionKeys) -> Self {
        let url = middleware.base_url().to_string();
        Self::new(keys, url.clone(), url, middleware.token_max_age())
    }

    /// Token lifetime.
    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Build fresh claims for `subject`, valid from now for the codec's max age.
    pub fn new_session(
        &self,
        subject: impl Into<String>,
        attributes: BTreeMap<String, Vec<String>>,
    ) -> SessionClaims {
        let now = Utc::now().timestamp();
        let lifetime = i64::try_from(self.max_age.as_secs()).unwrap_or(i64::MAX);
        SessionClaims {
            aud: self.audience.clone(),
            exp: now.saturating_add(lifetime),
            jti: Some(uuid::Uuid::new_v4().to_string()),
            iat: now,
            iss: self.issuer.clone(),
            nbf: now,
            sub: subject.into(),
            attr: attributes,
            saml_session: true,
        }
    }
}

impl SessionCodec for JwtSessionCodec {
    type Session = SessionClaims;
    type Error = JwtCodecError;

    fn encode(&self, session: &SessionClaims) -> Result<String, JwtCodecError> {
        let header = Header::new(self.keys.algorithm);
        Ok(encode(&header, session, &self.keys.encoding)?)
    }

    fn decode(&self, token: &str) -> Result<SessionClaims, JwtCodecError> {
        let mut validation = Validation::new(self.keys.algorithm);
        validation.set_audience(&[&self.audience]);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.validate_nbf = true;

        let data = decode::<SessionClaims>(token, &self.keys.decoding, &validation)?;
        if !data.claims.saml_session {
            return Err(JwtCodecError::NotSamlSession);
        }
        Ok(data.claims)
    }
}
