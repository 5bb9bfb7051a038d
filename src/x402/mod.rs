//! Client-side x402 "upto" payment protocol
//!
//! This module carries the whole authorization lifecycle:
//! - wire types and challenge classification ([`types`])
//! - the router signing-domain config ([`config`])
//! - signing source resolution ([`source`])
//! - the cached header factory ([`factory`])
//! - the reqwest payment interceptor ([`middleware`])

pub mod config;
pub mod factory;
pub mod middleware;
pub mod source;
pub mod timestamp;
pub mod types;

pub use config::{RemoteRouterConfig, RouterConfig, DEFAULT_PAYMENT_HEADER};
pub use factory::{
    FactoryError, HeaderFactory, HeaderOverrides, IssuedHeader, PermitSigner, SignError,
    SignatureInput, SignatureOutput, PRE_INVALIDATE_WINDOW_SECS,
};
pub use middleware::{
    PaymentsError, ReqwestWithRouterPayments, RouterPayments, PAYMENT_REQUIRED_HEADER,
};
pub use source::{
    normalize_private_key, resolve_signing_source, EnvKeySigner, Secrets, SignerMode,
    SignerSettings, SigningSource, SourceError,
};
pub use timestamp::UnixTimestamp;
pub use types::{
    ErrorResponse, PaymentErrorKind, PaymentPayload, PaymentRequiredHeader, PaymentRequirement,
    PermitNonce, RequirementExtra, Scheme, TokenAmount, X402Version,
};
