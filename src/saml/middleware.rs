//! Service provider middleware bootstrap.
//!
//! Resolves the SP endpoints, cookie defaults and, when configured, fetches
//! the IdP metadata with bounded retries.

use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

use super::config::{
    CookieSettings, MiddlewareOptions, SigningMaterial, DEFAULT_COOKIE_NAME, DEFAULT_TOKEN_MAX_AGE,
};
use super::fetch::{FetchError, HttpMetadataFetcher, MetadataFetcher, RetryPolicy};
use crate::metadata::{select_entity, EntityDescriptor, MetadataError};

const METADATA_PATH: &str = "saml/metadata";
const ACS_PATH: &str = "saml/acs";
const SLO_PATH: &str = "saml/slo";

/// Errors that prevent the middleware from being constructed.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("cannot resolve {path} against base URL: {source}")]
    InvalidUrl {
        path: &'static str,
        #[source]
        source: url::ParseError,
    },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("failed to fetch IdP metadata after {attempts} attempts: {source}")]
    Fetch {
        attempts: u32,
        #[source]
        source: FetchError,
    },

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error("IdP metadata fetch cancelled")]
    Cancelled,

    #[error("IdP metadata fetch did not complete within {0:?}")]
    DeadlineExceeded(Duration),
}

/// Immutable SP configuration produced by bootstrap.
#[derive(Debug, Clone)]
pub struct Middleware {
    base_url: Url,
    metadata_url: Url,
    acs_url: Url,
    slo_url: Url,
    signing: SigningMaterial,
    allow_idp_initiated: bool,
    force_authn: bool,
    cookies: CookieSettings,
    token_max_age: Duration,
    idp_metadata: Option<EntityDescriptor>,
}

impl Middleware {
    /// Build the middleware, fetching IdP metadata over HTTP if a metadata
    /// URL is configured.
    pub async fn new(options: MiddlewareOptions) -> Result<Self, BootstrapError> {
        Self::new_with_cancellation(options, &CancellationToken::new()).await
    }

    /// Like [`Middleware::new`], aborting the metadata fetch when `cancel`
    /// fires.
    pub async fn new_with_cancellation(
        mut options: MiddlewareOptions,
        cancel: &CancellationToken,
    ) -> Result<Self, BootstrapError> {
        if options.idp_metadata_url.is_none() {
            return Self::assemble(&options);
        }

        let fetcher = match options.http_client.take() {
            Some(client) => HttpMetadataFetcher::new(client),
            None => HttpMetadataFetcher::with_default_client().map_err(BootstrapError::HttpClient)?,
        };
        Self::bootstrap(options, &fetcher, cancel).await
    }

    /// Build the middleware using `fetcher` for remote metadata.
    pub async fn bootstrap<F>(
        options: MiddlewareOptions,
        fetcher: &F,
        cancel: &CancellationToken,
    ) -> Result<Self, BootstrapError>
    where
        F: MetadataFetcher + ?Sized,
    {
        let middleware = Self::assemble(&options)?;
        match options.idp_metadata_url {
            Some(url) => {
                middleware
                    .resolve_idp(&url, fetcher, &options.retry, cancel)
                    .await
            }
            None => Ok(middleware),
        }
    }

    fn assemble(options: &MiddlewareOptions) -> Result<Self, BootstrapError> {
        let resolve = |path: &'static str| {
            options
                .url
                .join(path)
                .map_err(|source| BootstrapError::InvalidUrl { path, source })
        };

        let token_max_age = options.cookie_max_age.unwrap_or(DEFAULT_TOKEN_MAX_AGE);

        let cookies = CookieSettings {
            name: options
                .cookie_name
                .clone()
                .unwrap_or_else(|| DEFAULT_COOKIE_NAME.to_string()),
            domain: options
                .cookie_domain
                .clone()
                .unwrap_or_else(|| default_cookie_domain(&options.url)),
            secure: options.cookie_secure,
            max_age: token_max_age,
        };

        Ok(Self {
            base_url: options.url.clone(),
            metadata_url: resolve(METADATA_PATH)?,
            acs_url: resolve(ACS_PATH)?,
            slo_url: resolve(SLO_PATH)?,
            signing: options.signing.clone(),
            allow_idp_initiated: options.allow_idp_initiated,
            force_authn: options.force_authn,
            cookies,
            token_max_age,
            idp_metadata: options.idp_metadata.clone(),
        })
    }

    async fn resolve_idp<F>(
        mut self,
        url: &Url,
        fetcher: &F,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<Self, BootstrapError>
    where
        F: MetadataFetcher + ?Sized,
    {
        let fetch = fetch_with_retry(fetcher, url, policy, cancel);
        let body = match policy.deadline {
            Some(deadline) => tokio::time::timeout(deadline, fetch)
                .await
                .map_err(|_| BootstrapError::DeadlineExceeded(deadline))??,
            None => fetch.await?,
        };

        // Parse failures are not transient; no retry.
        let entity = select_entity(&body)?;

        info!(
            url = %url,
            entity_id = %entity.entity_id,
            "Resolved IdP metadata"
        );

        self.idp_metadata = Some(entity);
        Ok(self)
    }

    /// Root URL of the service provider.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// SP metadata endpoint (also the SP entity ID).
    pub fn metadata_url(&self) -> &Url {
        &self.metadata_url
    }

    /// Assertion consumer service endpoint.
    pub fn acs_url(&self) -> &Url {
        &self.acs_url
    }

    /// Single logout endpoint.
    pub fn slo_url(&self) -> &Url {
        &self.slo_url
    }

    pub fn signing(&self) -> &SigningMaterial {
        &self.signing
    }

    pub fn allow_idp_initiated(&self) -> bool {
        self.allow_idp_initiated
    }

    pub fn force_authn(&self) -> bool {
        self.force_authn
    }

    pub fn cookies(&self) -> &CookieSettings {
        &self.cookies
    }

    /// Lifetime of session tokens.
    pub fn token_max_age(&self) -> Duration {
        self.token_max_age
    }

    /// The IdP this SP trusts, if known.
    pub fn idp_metadata(&self) -> Option<&EntityDescriptor> {
        self.idp_metadata.as_ref()
    }
}

/// Fetch with the policy's attempt bound, returning the last error once
/// attempts run out.
async fn fetch_with_retry<F>(
    fetcher: &F,
    url: &Url,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<Vec<u8>, BootstrapError>
where
    F: MetadataFetcher + ?Sized,
{
    let max_attempts = policy.attempts();
    let mut attempt = 0;

    loop {
        attempt += 1;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(BootstrapError::Cancelled),
            result = fetcher.fetch(url) => result,
        };

        let error = match result {
            Ok(body) => return Ok(body),
            Err(e) => e,
        };

        if attempt >= max_attempts {
            return Err(BootstrapError::Fetch {
                attempts: attempt,
                source: error,
            });
        }

        let delay = policy.delay_for(attempt);
        warn!(
            url = %url,
            attempt,
            max_attempts,
            retry_in_ms = delay.as_millis() as u64,
            error = %error,
            "Failed to fetch IdP metadata (will retry)"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(BootstrapError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Host of the base URL without port; the full host when no port is given.
fn default_cookie_domain(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    if url.port().is_some() {
        host.trim_start_matches('[').trim_end_matches(']').to_string()
    } else {
        host.to_string()
    }
}
