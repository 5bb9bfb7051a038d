//! Signing source resolution
//!
//! Translates injected settings and secrets into either a permit-signing
//! backend or a static bearer header. All failures here are configuration
//! errors raised before any I/O; the crate itself never reads the process
//! environment.

use std::str::FromStr;
use std::sync::Arc;

use alloy_primitives::Address;
use async_trait::async_trait;

use crate::eth::chain::{caip2_chain_id, ChainInfo};
use crate::eth::eip712::{Eip712Domain, Eip712Error, Permit};
use crate::eth::rpc::RpcClient;
use crate::eth::signer::EvmSigner;
use crate::x402::config::DEFAULT_PAYMENT_HEADER;
use crate::x402::factory::{PermitSigner, SignError, SignatureInput, SignatureOutput};
use crate::x402::timestamp::UnixTimestamp;
use crate::x402::types::PermitNonce;

/// Lifetime of a freshly signed permit.
const PERMIT_TTL_SECS: u64 = 3600;

/// How outgoing authorizations are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignerMode {
    /// Sign permits with an injected private key
    #[default]
    EnvPk,
    /// Attach a pre-issued opaque header value
    StaticHeader,
}

impl FromStr for SignerMode {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "env_pk" => Ok(SignerMode::EnvPk),
            "static_header" => Ok(SignerMode::StaticHeader),
            other => Err(SourceError::UnsupportedMode(other.to_string())),
        }
    }
}

/// Resolver inputs that are not secret.
#[derive(Debug, Clone, Default)]
pub struct SignerSettings {
    pub signer_mode: SignerMode,
    /// Header name override for static mode
    pub payment_header: Option<String>,
    /// JSON-RPC endpoint override; defaults come from the chain registry
    pub rpc_url: Option<String>,
}

/// Injected secret material. The resolver consumes these; nothing else in
/// the crate touches them.
#[derive(Clone, Default)]
pub struct Secrets {
    pub x402_private_key: Option<String>,
    pub x402_static_payment_header: Option<String>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("x402_private_key", &self.x402_private_key.as_ref().map(|_| "<redacted>"))
            .field(
                "x402_static_payment_header",
                &self.x402_static_payment_header.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// A resolved signing source, tagged so the interceptor branches on one
/// discriminant instead of a pair of nullable fields.
#[derive(Clone)]
pub enum SigningSource {
    Signature(Arc<dyn PermitSigner>),
    StaticHeader { name: String, value: String },
}

impl std::fmt::Debug for SigningSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SigningSource::Signature(_) => f.write_str("SigningSource::Signature"),
            SigningSource::StaticHeader { name, .. } => f
                .debug_struct("SigningSource::StaticHeader")
                .field("name", name)
                .finish_non_exhaustive(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("X402_PRIVATE_KEY is not set")]
    MissingPrivateKey,
    #[error("X402_PRIVATE_KEY is not a 0x-prefixed 32-byte hex key")]
    InvalidPrivateKey,
    #[error("X402_STATIC_PAYMENT_HEADER is not set")]
    MissingStaticHeader,
    #[error("Unsupported signer mode: {0}")]
    UnsupportedMode(String),
}

/// Normalize a private key string: trim, rewrite a leading `0X` to `0x`,
/// and require exactly 64 hex digits behind the prefix.
pub fn normalize_private_key(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let rest = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))?;
    if rest.len() != 64 || !rest.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Some(format!("0x{rest}"))
}

/// Resolve settings + secrets into a [`SigningSource`].
pub fn resolve_signing_source(
    settings: &SignerSettings,
    secrets: &Secrets,
) -> Result<SigningSource, SourceError> {
    match settings.signer_mode {
        SignerMode::StaticHeader => {
            let value = secrets
                .x402_static_payment_header
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .ok_or(SourceError::MissingStaticHeader)?;
            Ok(SigningSource::StaticHeader {
                name: settings
                    .payment_header
                    .clone()
                    .unwrap_or_else(|| DEFAULT_PAYMENT_HEADER.to_string()),
                value: value.to_string(),
            })
        }
        SignerMode::EnvPk => {
            let raw = secrets
                .x402_private_key
                .as_deref()
                .ok_or(SourceError::MissingPrivateKey)?;
            let normalized =
                normalize_private_key(raw).ok_or(SourceError::InvalidPrivateKey)?;
            let signer =
                EvmSigner::from_hex(&normalized).map_err(|_| SourceError::InvalidPrivateKey)?;
            tracing::debug!(address = %signer.address(), "Resolved permit signer");
            Ok(SigningSource::Signature(Arc::new(EnvKeySigner {
                signer,
                rpc_override: settings.rpc_url.clone(),
            })))
        }
    }
}

/// Permit signer backed by an in-process private key and a read-only RPC
/// client for the token's permit nonce.
pub struct EnvKeySigner {
    signer: EvmSigner,
    rpc_override: Option<String>,
}

impl EnvKeySigner {
    pub fn account_address(&self) -> Address {
        self.signer.address()
    }

    fn rpc_client(&self, chain: &ChainInfo) -> RpcClient {
        match &self.rpc_override {
            Some(url) => RpcClient::new(url.clone()),
            None => RpcClient::new(chain.rpc_url),
        }
    }
}

#[async_trait]
impl PermitSigner for EnvKeySigner {
    async fn sign_permit(&self, input: &SignatureInput) -> Result<SignatureOutput, SignError> {
        let chain = ChainInfo::from_caip2_or_base(&input.network);
        let owner = self.signer.address();

        let asset = Address::from_str(&input.asset)
            .map_err(|_| SignError::Eip712(Eip712Error::InvalidAddress(input.asset.clone())))?;
        let nonce = self.rpc_client(chain).permit_nonce(asset, owner).await?;

        let now = UnixTimestamp::try_now()?;
        let mut deadline = now + PERMIT_TTL_SECS;
        if let Some(min) = input.min_deadline_exclusive
            && deadline <= min
        {
            deadline = min + 1;
        }

        // The domain chain id comes from the CAIP-2 reference itself; the
        // registry only chooses the RPC endpoint.
        let chain_id = caip2_chain_id(&input.network).unwrap_or(chain.chain_id);
        let domain = Eip712Domain {
            name: input.token_name.clone(),
            version: input.token_version.clone(),
            chain_id,
            verifying_contract: input.asset.clone(),
        };

        // An unconfigured spender hashes as the zero address so the
        // bootstrap request can still reach the router's challenge.
        let spender = if input.facilitator_signer.trim().is_empty() {
            Address::ZERO.to_string()
        } else {
            input.facilitator_signer.clone()
        };

        let permit = Permit {
            owner: owner.to_string(),
            spender,
            value: input.permit_cap,
            nonce: PermitNonce(nonce),
            deadline,
        };
        let signature = permit.sign(&domain, &self.signer)?;

        Ok(SignatureOutput {
            signature,
            nonce: PermitNonce(nonce),
            deadline,
            account_address: owner.to_string(),
        })
    }
}
