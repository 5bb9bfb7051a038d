//! Pay-as-you-fetch HTTP middleware for x402 "upto" payment-gated routers.
//!
//! Wrap a reqwest client with [`RouterPayments`] and every chargeable
//! request to the router transparently carries a base64 header holding a
//! signed ERC-2612 Permit authorization. Signed headers are cached per
//! signing domain and refreshed once, with a fresh cap and a strictly
//! later deadline, when the router answers with a classifiable payment
//! challenge.
//!
//! ```no_run
//! use payfetch::x402::{
//!     resolve_signing_source, ReqwestWithRouterPayments, RouterPayments, Secrets,
//!     SignerSettings, TokenAmount,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let source = resolve_signing_source(
//!     &SignerSettings::default(),
//!     &Secrets {
//!         x402_private_key: Some("0x…".to_string()),
//!         ..Default::default()
//!     },
//! )?;
//! let payments = RouterPayments::new(
//!     "https://router.example.com",
//!     "1000000".parse::<TokenAmount>()?,
//!     source,
//! )?;
//! let client = reqwest::Client::new().with_router_payments(payments);
//!
//! let response = client
//!     .post("https://router.example.com/v1/chat/completions")
//!     .body("{}")
//!     .send()
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod eth;
pub mod x402;

pub use x402::{ReqwestWithRouterPayments, RouterConfig, RouterPayments, SigningSource, TokenAmount};
