//! Session token codecs.
//!
//! A [`SessionCodec`] turns a session into a signed compact token and back.
//! [`CompressedSessionCodec`] wraps any codec and gzips the claims segment so
//! large attribute sets still fit in a cookie.

pub mod compression;
pub mod envelope;
pub mod jwt;

pub use compression::{compress, decompress, CompressionError, DEFAULT_MAX_DECOMPRESSED_SIZE};
pub use envelope::{CompressedSessionCodec, EnvelopeError};
pub use jwt::{JwtCodecError, JwtSessionCodec, SessionClaims, SessionKeys};

/// Encodes sessions into signed three-segment tokens and decodes them back.
///
/// Implementations must be safe to share between request handlers.
pub trait SessionCodec: Send + Sync {
    /// Session value carried inside the token.
    type Session;

    /// Error produced when signing or verification fails.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Serialize and sign a session.
    fn encode(&self, session: &Self::Session) -> Result<String, Self::Error>;

    /// Verify and deserialize a token produced by [`SessionCodec::encode`].
    fn decode(&self, token: &str) -> Result<Self::Session, Self::Error>;
}
