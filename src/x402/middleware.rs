//! Payment interceptor for reqwest
//!
//! [`RouterPayments`] wraps a reqwest client and transparently attaches a
//! signed payment authorization to every chargeable request addressed at
//! the configured router. Config and metadata paths, and anything on a
//! foreign origin, pass through untouched. When the router answers a
//! request with a classifiable 401/402 payment challenge, the interceptor
//! rewrites its signing domain from the challenge, refreshes the
//! authorization, and retries exactly once.

use std::sync::Arc;

use async_trait::async_trait;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::{Extensions, StatusCode};
use reqwest::{Request, Response};
use reqwest_middleware as rqm;
use tokio::sync::OnceCell;
use url::{Origin, Url};

use crate::x402::config::{RemoteRouterConfig, RouterConfig};
use crate::x402::factory::{FactoryError, HeaderFactory, HeaderOverrides, IssuedHeader, PermitSigner};
use crate::x402::source::SigningSource;
use crate::x402::types::{ErrorResponse, PaymentRequiredHeader, TokenAmount};

/// Response header carrying the base64 payment challenge.
pub const PAYMENT_REQUIRED_HEADER: &str = "PAYMENT-REQUIRED";

/// Router paths that never carry a charge and must never trigger signing.
const FREE_PATH_SUFFIXES: &[&str] = &["/v1/config", "/config", "/v1/models", "/models"];

// ============================================================================
// Error types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PaymentsError {
    #[error("Invalid router URL")]
    InvalidRouterUrl(#[source] url::ParseError),
    #[error(transparent)]
    Factory(#[from] FactoryError),
    #[error("Request object is not cloneable. Are you passing a streaming body?")]
    RequestNotCloneable,
    #[error("Invalid payment header name")]
    HeaderNameEncode(#[source] http::header::InvalidHeaderName),
    #[error("Failed to encode payment header value")]
    HeaderValueEncode(#[source] http::header::InvalidHeaderValue),
    #[error("Failed to rebuild challenge response")]
    ResponseRebuild(#[source] http::Error),
}

impl From<PaymentsError> for rqm::Error {
    fn from(error: PaymentsError) -> Self {
        rqm::Error::Middleware(error.into())
    }
}

// ============================================================================
// RouterPayments middleware
// ============================================================================

/// Reqwest middleware that pays for requests to one router.
pub struct RouterPayments {
    router_origin: Origin,
    router_base: String,
    permit_cap: TokenAmount,
    source: SigningSource,
    initial_config: Option<RouterConfig>,
    fallback_network: Option<String>,
    factory: OnceCell<Arc<HeaderFactory>>,
}

impl RouterPayments {
    /// Create an interceptor for `router_url`, authorizing up to
    /// `permit_cap` base units per permit through the given source.
    pub fn new(
        router_url: &str,
        permit_cap: TokenAmount,
        source: SigningSource,
    ) -> Result<Self, PaymentsError> {
        let parsed = Url::parse(router_url).map_err(PaymentsError::InvalidRouterUrl)?;
        Ok(Self {
            router_origin: parsed.origin(),
            router_base: router_url.trim_end_matches('/').to_string(),
            permit_cap,
            source,
            initial_config: None,
            fallback_network: None,
            factory: OnceCell::new(),
        })
    }

    /// Seed the signing domain instead of fetching `{router}/v1/config`.
    pub fn with_initial_config(mut self, config: RouterConfig) -> Self {
        self.initial_config = Some(config);
        self
    }

    /// CAIP-2 network used by the fallback config when the router's
    /// config endpoint is unavailable.
    pub fn with_network(mut self, caip2: impl Into<String>) -> Self {
        self.fallback_network = Some(caip2.into());
        self
    }

    fn is_chargeable(&self, url: &Url) -> bool {
        if url.origin() != self.router_origin {
            return false;
        }
        let path = url.path();
        !FREE_PATH_SUFFIXES.iter().any(|suffix| path.ends_with(suffix))
    }

    /// The factory is built at most once; all callers share the same
    /// initialization future.
    async fn factory(
        &self,
        signer: &Arc<dyn PermitSigner>,
        extensions: &mut Extensions,
        next: &rqm::Next<'_>,
    ) -> Arc<HeaderFactory> {
        self.factory
            .get_or_init(|| async move {
                let config = match &self.initial_config {
                    Some(config) => config.clone(),
                    None => self.fetch_router_config(extensions, next).await,
                };
                Arc::new(HeaderFactory::new(config, signer.clone(), self.permit_cap))
            })
            .await
            .clone()
    }

    /// Fetch `{router}/v1/config` through the wrapped transport. Any
    /// failure falls back to the Base USDC defaults; the first challenge
    /// will supply the real domain.
    async fn fetch_router_config(
        &self,
        extensions: &mut Extensions,
        next: &rqm::Next<'_>,
    ) -> RouterConfig {
        let fallback = || RouterConfig::base_usdc_default(self.fallback_network.as_deref());

        let url = format!("{}/v1/config", self.router_base);
        let Ok(url) = Url::parse(&url) else {
            return fallback();
        };

        let request = Request::new(reqwest::Method::GET, url);
        match next.clone().run(request, extensions).await {
            Ok(response) if response.status().is_success() => {
                match response.json::<RemoteRouterConfig>().await {
                    Ok(remote) => remote.into_router_config(self.fallback_network.as_deref()),
                    Err(error) => {
                        tracing::warn!(%error, "Malformed router config, using defaults");
                        fallback()
                    }
                }
            }
            Ok(response) => {
                tracing::warn!(status = %response.status(), "Router config unavailable, using defaults");
                fallback()
            }
            Err(error) => {
                tracing::warn!(%error, "Router config fetch failed, using defaults");
                fallback()
            }
        }
    }

    async fn handle_with_signer(
        &self,
        signer: &Arc<dyn PermitSigner>,
        req: Request,
        extensions: &mut Extensions,
        next: rqm::Next<'_>,
    ) -> rqm::Result<Response> {
        let factory = self.factory(signer, extensions, &next).await;
        let issued = factory
            .get_header(HeaderOverrides::default())
            .await
            .map_err(PaymentsError::Factory)?;

        // A pristine clone, captured before the header goes in, becomes
        // the retry request.
        let retry_req = req.try_clone();
        let mut first = req;
        insert_payment_header(&mut first, &issued)?;

        let response = next.clone().run(first, extensions).await?;
        let status = response.status();
        if status != StatusCode::PAYMENT_REQUIRED && status != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        // Buffer the challenge so the caller can still consume the body
        // if no retry happens.
        let url = response.url().clone();
        let headers = response.headers().clone();
        let challenge = headers
            .get(PAYMENT_REQUIRED_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(PaymentRequiredHeader::from_base64);
        let body = response.bytes().await?;
        let error = serde_json::from_slice::<serde_json::Value>(&body)
            .ok()
            .as_ref()
            .and_then(ErrorResponse::from_json);

        // A quoted requirement rewrites the signing domain whether or not
        // a retry follows.
        let requirement = challenge.as_ref().and_then(PaymentRequiredHeader::first);
        if let Some(requirement) = requirement {
            let updated = factory.config().apply_requirement(requirement);
            factory.update_config(updated);
        }

        let Some(kind) = error.as_ref().and_then(ErrorResponse::classify) else {
            tracing::debug!(status = %status, "Unclassifiable payment challenge, returning response");
            return rebuild_response(status, url, headers, body);
        };

        let mut retry = retry_req.ok_or(PaymentsError::RequestNotCloneable)?;
        factory.invalidate();

        // The server cap applies to this retry only; later calls revert
        // to the configured cap.
        let cap_override = requirement
            .and_then(|r| r.cap())
            .and_then(|cap| cap.parse().ok());
        tracing::debug!(?kind, cap = ?cap_override, "Refreshing payment authorization for retry");

        let refreshed = factory
            .get_header(HeaderOverrides {
                cap_override,
                min_deadline_exclusive: Some(issued.deadline),
            })
            .await
            .map_err(PaymentsError::Factory)?;
        insert_payment_header(&mut retry, &refreshed)?;

        // The retry response is final, success or not.
        next.run(retry, extensions).await
    }
}

impl std::fmt::Debug for RouterPayments {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterPayments")
            .field("router_base", &self.router_base)
            .field("permit_cap", &self.permit_cap)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl rqm::Middleware for RouterPayments {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: rqm::Next<'_>,
    ) -> rqm::Result<Response> {
        if !self.is_chargeable(req.url()) {
            return next.run(req, extensions).await;
        }

        match &self.source {
            SigningSource::StaticHeader { name, value } => {
                let mut req = req;
                let header_name = HeaderName::from_bytes(name.as_bytes())
                    .map_err(PaymentsError::HeaderNameEncode)?;
                let header_value =
                    HeaderValue::from_str(value).map_err(PaymentsError::HeaderValueEncode)?;
                req.headers_mut().insert(header_name, header_value);
                next.run(req, extensions).await
            }
            SigningSource::Signature(signer) => {
                let signer = signer.clone();
                self.handle_with_signer(&signer, req, extensions, next).await
            }
        }
    }
}

fn insert_payment_header(req: &mut Request, issued: &IssuedHeader) -> Result<(), PaymentsError> {
    let name = HeaderName::from_bytes(issued.header_name.as_bytes())
        .map_err(PaymentsError::HeaderNameEncode)?;
    let value =
        HeaderValue::from_str(&issued.header_value).map_err(PaymentsError::HeaderValueEncode)?;
    req.headers_mut().insert(name, value);
    Ok(())
}

/// Reassemble a buffered challenge response so the caller receives it
/// verbatim with a consumable body.
fn rebuild_response<B: Into<reqwest::Body>>(
    status: StatusCode,
    url: Url,
    headers: HeaderMap,
    body: B,
) -> rqm::Result<Response> {
    use reqwest::ResponseBuilderExt;

    let mut builder = http::Response::builder().status(status).url(url);
    if let Some(slot) = builder.headers_mut() {
        *slot = headers;
    }
    let rebuilt = builder
        .body(body.into())
        .map_err(PaymentsError::ResponseRebuild)?;
    Ok(Response::from(rebuilt))
}

// ============================================================================
// Builder extension
// ============================================================================

/// Attach a [`RouterPayments`] interceptor to a reqwest client.
pub trait ReqwestWithRouterPayments {
    fn with_router_payments(self, payments: RouterPayments) -> rqm::ClientWithMiddleware;
}

impl ReqwestWithRouterPayments for reqwest::Client {
    fn with_router_payments(self, payments: RouterPayments) -> rqm::ClientWithMiddleware {
        rqm::ClientBuilder::new(self).with(payments).build()
    }
}
