//! Service provider middleware options.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use super::fetch::RetryPolicy;
use crate::metadata::{select_entity, EntityDescriptor, MetadataError};

/// Cookie name used when none is configured.
pub const DEFAULT_COOKIE_NAME: &str = "token";

/// Session token lifetime used when none is configured.
pub const DEFAULT_TOKEN_MAX_AGE: Duration = Duration::from_secs(60 * 60);

/// Errors loading options from a JSON file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid options file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid {field}: {source}")]
    InvalidUrl {
        field: &'static str,
        #[source]
        source: url::ParseError,
    },

    #[error("invalid static IdP metadata: {0}")]
    Metadata(#[from] MetadataError),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

/// SP key material, passed through to the SAML engine untouched.
#[derive(Clone, Default)]
pub struct SigningMaterial {
    /// PEM private key.
    pub key_pem: Option<String>,
    /// PEM certificate published in SP metadata.
    pub certificate_pem: Option<String>,
    /// PEM intermediate certificates.
    pub intermediate_pems: Vec<String>,
}

impl std::fmt::Debug for SigningMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningMaterial")
            .field("key_pem", &self.key_pem.as_ref().map(|_| "[redacted]"))
            .field("certificate_pem", &self.certificate_pem.is_some())
            .field("intermediates", &self.intermediate_pems.len())
            .finish()
    }
}

/// Options for [`Middleware::new`](super::Middleware::new).
#[derive(Debug, Clone)]
pub struct MiddlewareOptions {
    /// Root URL of the service provider; SAML endpoints hang off it.
    pub url: Url,
    pub signing: SigningMaterial,
    pub allow_idp_initiated: bool,
    /// Statically supplied IdP metadata.
    pub idp_metadata: Option<EntityDescriptor>,
    /// Remote IdP metadata, fetched at construction.
    pub idp_metadata_url: Option<Url>,
    /// Client for the metadata fetch; a default client is built if unset.
    pub http_client: Option<reqwest::Client>,
    pub cookie_max_age: Option<Duration>,
    pub cookie_name: Option<String>,
    pub cookie_domain: Option<String>,
    pub cookie_secure: bool,
    pub force_authn: bool,
    pub retry: RetryPolicy,
}

impl MiddlewareOptions {
    /// Options with every optional field unset.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            signing: SigningMaterial::default(),
            allow_idp_initiated: false,
            idp_metadata: None,
            idp_metadata_url: None,
            http_client: None,
            cookie_max_age: None,
            cookie_name: None,
            cookie_domain: None,
            cookie_secure: false,
            force_authn: false,
            retry: RetryPolicy::default(),
        }
    }
}

/// Resolved cookie attributes for the session token cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieSettings {
    pub name: String,
    pub domain: String,
    pub secure: bool,
    pub max_age: Duration,
}

impl CookieSettings {
    /// Build a `Set-Cookie` value carrying `token`.
    pub fn build_cookie(&self, token: &str) -> String {
        let mut cookie = format!("{}={}", self.name, token);

        if !self.domain.is_empty() {
            cookie.push_str(&format!("; Domain={}", self.domain));
        }

        cookie.push_str("; Path=/");

        if self.secure {
            cookie.push_str("; Secure");
        }

        cookie.push_str("; HttpOnly");
        cookie.push_str(&format!("; Max-Age={}", self.max_age.as_secs()));

        cookie
    }

    /// Build a `Set-Cookie` value that removes the session cookie.
    pub fn build_expired_cookie(&self) -> String {
        let mut cookie = format!("{}=; Path=/; Max-Age=0; HttpOnly", self.name);
        if !self.domain.is_empty() {
            cookie.push_str(&format!("; Domain={}", self.domain));
        }
        cookie
    }

    /// Extract the session token from a `Cookie` request header.
    pub fn parse_cookie<'a>(&self, cookie_header: &'a str) -> Option<&'a str> {
        cookie_header.split(';').find_map(|part| {
            let (name, value) = part.trim().split_once('=')?;
            (name == self.name).then_some(value)
        })
    }
}

/// JSON options file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct MiddlewareOptionsJson {
    /// Root URL of the service provider.
    pub url: String,

    /// PEM private key file.
    #[serde(default)]
    pub signing_key_path: Option<PathBuf>,

    /// PEM certificate file.
    #[serde(default)]
    pub certificate_path: Option<PathBuf>,

    /// PEM intermediate certificate files.
    #[serde(default)]
    pub intermediate_paths: Vec<PathBuf>,

    #[serde(default)]
    pub allow_idp_initiated: bool,

    /// IdP metadata XML (inline).
    #[serde(default)]
    pub idp_metadata_xml: Option<String>,

    /// IdP metadata XML file.
    #[serde(default)]
    pub idp_metadata_path: Option<PathBuf>,

    /// IdP metadata URL (fetched on startup).
    #[serde(default)]
    pub idp_metadata_url: Option<String>,

    /// Session cookie lifetime in seconds (default: 1 hour).
    #[serde(default)]
    pub cookie_max_age_secs: Option<u64>,

    #[serde(default)]
    pub cookie_name: Option<String>,

    /// Cookie domain (defaults to the host of `url`).
    #[serde(default)]
    pub cookie_domain: Option<String>,

    #[serde(default)]
    pub cookie_secure: bool,

    #[serde(default)]
    pub force_authn: bool,

    /// Total metadata fetch attempts.
    #[serde(default = "default_fetch_attempts")]
    pub metadata_fetch_attempts: u32,

    /// Delay between metadata fetch attempts in seconds.
    #[serde(default = "default_fetch_delay_secs")]
    pub metadata_fetch_delay_secs: u64,

    /// Overall metadata fetch deadline in seconds.
    #[serde(default)]
    pub metadata_fetch_deadline_secs: Option<u64>,

    /// Per-request HTTP timeout for the metadata fetch in seconds.
    #[serde(default)]
    pub http_timeout_secs: Option<u64>,
}

fn default_fetch_attempts() -> u32 {
    RetryPolicy::default().max_attempts
}

fn default_fetch_delay_secs() -> u64 {
    RetryPolicy::default().delay.as_secs()
}

impl MiddlewareOptionsJson {
    /// Load options from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = read_file(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Resolve file references and build [`MiddlewareOptions`].
    pub fn into_options(self) -> Result<MiddlewareOptions, ConfigError> {
        let url = Url::parse(&self.url).map_err(|source| ConfigError::InvalidUrl {
            field: "url",
            source,
        })?;

        let mut options = MiddlewareOptions::new(url);

        options.signing = SigningMaterial {
            key_pem: self.signing_key_path.as_deref().map(read_file).transpose()?,
            certificate_pem: self.certificate_path.as_deref().map(read_file).transpose()?,
            intermediate_pems: self
                .intermediate_paths
                .iter()
                .map(|p| read_file(p))
                .collect::<Result<_, _>>()?,
        };

        let static_xml = match (self.idp_metadata_xml, &self.idp_metadata_path) {
            (Some(xml), _) => Some(xml),
            (None, Some(path)) => Some(read_file(path)?),
            (None, None) => None,
        };
        options.idp_metadata = static_xml
            .map(|xml| select_entity(xml.as_bytes()))
            .transpose()?;

        options.idp_metadata_url = self
            .idp_metadata_url
            .as_deref()
            .map(Url::parse)
            .transpose()
            .map_err(|source| ConfigError::InvalidUrl {
                field: "idp-metadata-url",
                source,
            })?;

        if let Some(secs) = self.http_timeout_secs {
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(secs))
                .build()
                .map_err(ConfigError::HttpClient)?;
            options.http_client = Some(client);
        }

        options.allow_idp_initiated = self.allow_idp_initiated;
        options.cookie_max_age = self.cookie_max_age_secs.map(Duration::from_secs);
        options.cookie_name = self.cookie_name;
        options.cookie_domain = self.cookie_domain;
        options.cookie_secure = self.cookie_secure;
        options.force_authn = self.force_authn;
        options.retry = RetryPolicy {
            max_attempts: self.metadata_fetch_attempts,
            delay: Duration::from_secs(self.metadata_fetch_delay_secs),
            deadline: self.metadata_fetch_deadline_secs.map(Duration::from_secs),
        };

        Ok(options)
    }
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}
