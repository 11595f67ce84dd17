//! IdP metadata parsing.
//!
//! Metadata documents come in two shapes: a single `EntityDescriptor`, or an
//! `EntitiesDescriptor` federation feed. The selector inspects the root
//! element to pick the parse path.

pub mod selector;
pub mod types;

#[cfg(test)]
pub(crate) mod fixtures;

use thiserror::Error;

pub use selector::{parse_metadata, select_entity, MetadataDocument};
pub use types::{
    Endpoint, EntitiesDescriptor, EntityDescriptor, IdpSsoDescriptor, HTTP_POST_BINDING,
    HTTP_REDIRECT_BINDING, METADATA_NS,
};

/// Errors from parsing or selecting IdP metadata.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("failed to parse IdP metadata: {0}")]
    Parse(String),

    #[error("unexpected metadata root element <{0}>")]
    UnexpectedRoot(String),

    #[error("no entity found with IDPSSODescriptor")]
    NoIdpEntity,
}
