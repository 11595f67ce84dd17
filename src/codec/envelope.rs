//! Compressed token envelope.
//!
//! Rewrites only the payload segment of a `header.payload.signature` token.
//! The inner codec re-verifies the signature over the reconstructed token, so
//! decode must reproduce the inner codec's original text byte for byte.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use thiserror::Error;
use tracing::debug;

use super::compression::{self, CompressionError, DEFAULT_MAX_DECOMPRESSED_SIZE};
use super::SessionCodec;

/// Errors from the compressed envelope, wrapping the inner codec's error.
#[derive(Debug, Error)]
pub enum EnvelopeError<E>
where
    E: std::error::Error + 'static,
{
    #[error("malformed token: {0}")]
    MalformedToken(String),

    #[error(transparent)]
    Compression(#[from] CompressionError),

    #[error(transparent)]
    Inner(E),
}

/// Session codec that gzips the claims segment of the inner codec's tokens.
#[derive(Debug, Clone)]
pub struct CompressedSessionCodec<C> {
    inner: C,
    max_decompressed_size: u64,
}

impl<C: SessionCodec> CompressedSessionCodec<C> {
    /// Wrap `inner` with the default decompression cap.
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            max_decompressed_size: DEFAULT_MAX_DECOMPRESSED_SIZE,
        }
    }

    /// Override the cap on expanded payload size.
    pub fn with_max_decompressed_size(mut self, limit: u64) -> Self {
        self.max_decompressed_size = limit;
        self
    }

    /// The wrapped signing codec.
    pub fn inner(&self) -> &C {
        &self.inner
    }
}

impl<C: SessionCodec> SessionCodec for CompressedSessionCodec<C> {
    type Session = C::Session;
    type Error = EnvelopeError<C::Error>;

    fn encode(&self, session: &Self::Session) -> Result<String, Self::Error> {
        let token = self.inner.encode(session).map_err(EnvelopeError::Inner)?;
        let [header, payload, signature] =
            split_token(&token).map_err(EnvelopeError::MalformedToken)?;

        let claims = decode_segment(payload).map_err(EnvelopeError::MalformedToken)?;
        // Decode enforces the same cap, so refuse tokens it could never read back.
        if claims.len() as u64 > self.max_decompressed_size {
            return Err(CompressionError::TooLarge {
                limit: self.max_decompressed_size,
            }
            .into());
        }
        let compressed = compression::compress(&claims)?;

        Ok(join_token(
            header,
            &URL_SAFE_NO_PAD.encode(compressed),
            signature,
        ))
    }

    fn decode(&self, token: &str) -> Result<Self::Session, Self::Error> {
        let [header, payload, signature] =
            split_token(token).map_err(EnvelopeError::MalformedToken)?;

        let compressed = decode_segment(payload).map_err(EnvelopeError::MalformedToken)?;
        let claims = compression::decompress_with_limit(&compressed, self.max_decompressed_size)
            .map_err(|e| {
                debug!(error = %e, "Rejected session token payload");
                e
            })?;

        let original = join_token(header, &URL_SAFE_NO_PAD.encode(claims), signature);
        self.inner.decode(&original).map_err(EnvelopeError::Inner)
    }
}

fn split_token(token: &str) -> Result<[&str; 3], String> {
    let parts: Vec<&str> = token.split('.').collect();
    match parts.as_slice() {
        [header, payload, signature] => Ok([*header, *payload, *signature]),
        _ => Err(format!("expected 3 segments, found {}", parts.len())),
    }
}

fn decode_segment(segment: &str) -> Result<Vec<u8>, String> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| format!("payload is not base64url: {}", e))
}

fn join_token(header: &str, payload: &str, signature: &str) -> String {
    let mut token = String::with_capacity(header.len() + payload.len() + signature.len() + 2);
    token.push_str(header);
    token.push('.');
    token.push_str(payload);
    token.push('.');
    token.push_str(signature);
    token
}
