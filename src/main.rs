//! SAML SP bootstrap
//!
//! Loads middleware options, resolves the trusted IdP (fetching remote
//! metadata with retries when configured) and prints the resolved service
//! provider configuration.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

use samlsp_bootstrap::metadata::HTTP_REDIRECT_BINDING;
use samlsp_bootstrap::saml::{Middleware, MiddlewareOptionsJson};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "samlsp-bootstrap")]
#[command(about = "Resolve SAML service provider endpoints and IdP metadata")]
struct Args {
    /// Path to the JSON options file
    #[arg(short, long, env = "SAMLSP_CONFIG")]
    config: PathBuf,

    /// IdP metadata URL (overrides the options file)
    #[arg(long, env = "SAMLSP_IDP_METADATA_URL")]
    idp_metadata_url: Option<Url>,

    /// Enable verbose logging
    #[arg(short, long, env = "SAMLSP_VERBOSE")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("{}={}", env!("CARGO_CRATE_NAME"), log_level))
        .json()
        .init();

    let mut options = MiddlewareOptionsJson::load(&args.config)
        .and_then(MiddlewareOptionsJson::into_options)
        .with_context(|| format!("Failed to load options from {:?}", args.config))?;

    if let Some(url) = args.idp_metadata_url {
        options.idp_metadata_url = Some(url);
    }

    info!(
        url = %options.url,
        idp_metadata_url = ?options.idp_metadata_url.as_ref().map(Url::as_str),
        static_metadata = options.idp_metadata.is_some(),
        max_attempts = options.retry.max_attempts,
        "Options loaded"
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, aborting bootstrap");
            on_signal.cancel();
        }
    });

    let middleware = Middleware::new_with_cancellation(options, &cancel)
        .await
        .context("Failed to bootstrap SAML middleware")?;

    let idp = middleware.idp_metadata();
    if idp.is_none() {
        warn!("No IdP metadata configured; SSO will be unavailable");
    }

    let summary = serde_json::json!({
        "metadata-url": middleware.metadata_url().as_str(),
        "acs-url": middleware.acs_url().as_str(),
        "slo-url": middleware.slo_url().as_str(),
        "cookie-name": middleware.cookies().name,
        "cookie-domain": middleware.cookies().domain,
        "cookie-secure": middleware.cookies().secure,
        "token-max-age-secs": middleware.token_max_age().as_secs(),
        "idp-entity-id": idp.map(|e| e.entity_id.as_str()),
        "idp-sso-url": idp.and_then(|e| e.sso_location(HTTP_REDIRECT_BINDING)),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
