//! SAML service provider support.
//!
//! - [`saml`]: middleware bootstrap with resilient IdP metadata discovery.
//! - [`metadata`]: `EntityDescriptor` / `EntitiesDescriptor` parsing.
//! - [`codec`]: session token codecs, including a gzip envelope that keeps
//!   large attribute sets within cookie limits.

pub mod codec;
pub mod metadata;
pub mod saml;

pub use codec::{CompressedSessionCodec, JwtSessionCodec, SessionClaims, SessionCodec};
pub use metadata::{select_entity, EntityDescriptor, MetadataError};
pub use saml::{BootstrapError, Middleware, MiddlewareOptions};
