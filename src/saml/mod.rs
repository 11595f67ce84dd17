//! SAML service provider bootstrap.
//!
//! Builds the SP middleware configuration and resolves the trusted IdP from
//! static or remote metadata.

pub mod config;
pub mod fetch;
pub mod middleware;

pub use config::{
    ConfigError, CookieSettings, MiddlewareOptions, MiddlewareOptionsJson, SigningMaterial,
    DEFAULT_COOKIE_NAME, DEFAULT_TOKEN_MAX_AGE,
};
pub use fetch::{FetchError, HttpMetadataFetcher, MetadataFetcher, RetryPolicy, USER_AGENT};
pub use middleware::{BootstrapError, Middleware};
