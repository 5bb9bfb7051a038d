//! Payment header factory
//!
//! Builds the base64 authorization header from a signed permit and caches
//! exactly one header per signing domain. The cache is a hint: concurrent
//! callers may each sign and the last writer wins, which is harmless
//! because identical inputs over an unchanged on-chain nonce produce
//! identical payloads. The state lock is never held across an await.

use std::sync::{Arc, Mutex};
use std::time::SystemTimeError;

use async_trait::async_trait;

use crate::eth::eip712::Eip712Error;
use crate::eth::rpc::RpcError;
use crate::x402::config::RouterConfig;
use crate::x402::timestamp::UnixTimestamp;
use crate::x402::types::{
    AcceptedRequirement, DomainExtra, PaymentPayload, PermitAuthorization, PermitNonce, Scheme,
    SignedPermit, TokenAmount, X402Version,
};

/// Safety margin before the permit deadline during which a cached header
/// is treated as stale, so an in-flight request cannot race a deadline
/// the router would reject as too close.
pub const PRE_INVALIDATE_WINDOW_SECS: u64 = 60;

// ============================================================================
// Signing contract
// ============================================================================

/// Everything a signer needs to produce one permit signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureInput {
    /// CAIP-2 chain identifier
    pub network: String,
    /// Token contract address (EIP-712 verifying contract)
    pub asset: String,
    /// Permit spender
    pub facilitator_signer: String,
    /// EIP-712 domain name
    pub token_name: String,
    /// EIP-712 domain version
    pub token_version: String,
    /// Authorized cap in token base units
    pub permit_cap: TokenAmount,
    /// When set, the produced deadline must be strictly greater
    pub min_deadline_exclusive: Option<UnixTimestamp>,
}

/// A produced permit signature with the values that went into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureOutput {
    /// 0x-prefixed 65-byte hex signature
    pub signature: String,
    /// On-chain permit nonce used
    pub nonce: PermitNonce,
    /// Permit deadline
    pub deadline: UnixTimestamp,
    /// Address of the signing account
    pub account_address: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SignError {
    #[error("Failed to read permit nonce")]
    Rpc(#[from] RpcError),
    #[error("Failed to sign permit")]
    Eip712(#[from] Eip712Error),
    #[error("Failed to get system clock")]
    Clock(#[from] SystemTimeError),
}

/// Produces permit signatures for the header factory.
#[async_trait]
pub trait PermitSigner: Send + Sync {
    async fn sign_permit(&self, input: &SignatureInput) -> Result<SignatureOutput, SignError>;
}

// ============================================================================
// Factory
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum FactoryError {
    #[error(transparent)]
    Sign(#[from] SignError),
    #[error("Failed to encode payment payload to json")]
    Encode(#[source] serde_json::Error),
}

/// Per-call knobs for [`HeaderFactory::get_header`]. The defaults describe
/// a plain first attempt; a challenge retry sets both fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderOverrides {
    /// Cap for this call only; the configured default cap is restored on
    /// the next call.
    pub cap_override: Option<TokenAmount>,
    /// Forces a fresh signature with a deadline strictly past this point.
    pub min_deadline_exclusive: Option<UnixTimestamp>,
}

/// A ready-to-attach authorization header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedHeader {
    pub header_name: String,
    pub header_value: String,
    pub deadline: UnixTimestamp,
}

#[derive(Debug, Clone)]
struct CachedHeader {
    header_value: String,
    deadline: UnixTimestamp,
    max_value: TokenAmount,
    network: String,
    asset: String,
    pay_to: String,
}

#[derive(Debug)]
struct FactoryState {
    config: RouterConfig,
    cached: Option<CachedHeader>,
}

/// Owns the signing domain config and the single-slot header cache.
pub struct HeaderFactory {
    signer: Arc<dyn PermitSigner>,
    default_cap: TokenAmount,
    state: Mutex<FactoryState>,
}

impl HeaderFactory {
    pub fn new(config: RouterConfig, signer: Arc<dyn PermitSigner>, default_cap: TokenAmount) -> Self {
        Self {
            signer,
            default_cap,
            state: Mutex::new(FactoryState {
                config,
                cached: None,
            }),
        }
    }

    /// Return an authorization header for the current config, reusing the
    /// cached one when the cap and domain tuple match and the deadline is
    /// comfortably in the future. Any `min_deadline_exclusive` bypasses
    /// the cache outright.
    pub async fn get_header(&self, overrides: HeaderOverrides) -> Result<IssuedHeader, FactoryError> {
        let now = UnixTimestamp::try_now().map_err(SignError::Clock)?;
        let effective_cap = overrides.cap_override.unwrap_or(self.default_cap);

        let config = {
            let state = self.state.lock().expect("factory state lock poisoned");
            if overrides.min_deadline_exclusive.is_none()
                && let Some(cached) = &state.cached
                && cached.max_value == effective_cap
                && cached.network == state.config.network
                && cached.asset == state.config.asset
                && cached.pay_to == state.config.pay_to
                && now.seconds_until(cached.deadline) > PRE_INVALIDATE_WINDOW_SECS
            {
                tracing::debug!(deadline = %cached.deadline, "Reusing cached payment header");
                return Ok(IssuedHeader {
                    header_name: state.config.header_name().to_string(),
                    header_value: cached.header_value.clone(),
                    deadline: cached.deadline,
                });
            }
            state.config.clone()
        };

        let input = SignatureInput {
            network: config.network.clone(),
            asset: config.asset.clone(),
            facilitator_signer: config.facilitator_signer.clone(),
            token_name: config.token_name.clone(),
            token_version: config.token_version.clone(),
            permit_cap: effective_cap,
            min_deadline_exclusive: overrides.min_deadline_exclusive,
        };
        let output = self.signer.sign_permit(&input).await?;
        tracing::debug!(
            account = %output.account_address,
            nonce = %output.nonce,
            deadline = %output.deadline,
            cap = %effective_cap,
            "Signed payment authorization"
        );

        let payload = PaymentPayload {
            x402_version: X402Version::V2,
            accepted: AcceptedRequirement {
                scheme: Scheme::Upto,
                network: config.network.clone(),
                asset: config.asset.clone(),
                pay_to: config.pay_to.clone(),
                extra: DomainExtra {
                    name: config.token_name.clone(),
                    version: config.token_version.clone(),
                },
            },
            payload: SignedPermit {
                authorization: PermitAuthorization {
                    from: output.account_address,
                    to: config.facilitator_signer.clone(),
                    value: effective_cap,
                    valid_before: output.deadline,
                    nonce: output.nonce,
                },
                signature: output.signature,
            },
        };
        let header_value = payload.to_base64().map_err(FactoryError::Encode)?;

        {
            let mut state = self.state.lock().expect("factory state lock poisoned");
            state.cached = Some(CachedHeader {
                header_value: header_value.clone(),
                deadline: output.deadline,
                max_value: effective_cap,
                network: config.network,
                asset: config.asset,
                pay_to: config.pay_to,
            });
        }

        Ok(IssuedHeader {
            header_name: config.payment_header.unwrap_or_else(|| {
                crate::x402::config::DEFAULT_PAYMENT_HEADER.to_string()
            }),
            header_value,
            deadline: output.deadline,
        })
    }

    /// Drop the cached header unconditionally.
    pub fn invalidate(&self) {
        let mut state = self.state.lock().expect("factory state lock poisoned");
        state.cached = None;
        tracing::debug!("Invalidated cached payment header");
    }

    /// Replace the signing domain config. The cache is left in place; a
    /// changed domain tuple simply misses on the next call.
    pub fn update_config(&self, next: RouterConfig) {
        let mut state = self.state.lock().expect("factory state lock poisoned");
        state.config = next;
    }

    /// Cloned snapshot of the current config.
    pub fn config(&self) -> RouterConfig {
        self.state
            .lock()
            .expect("factory state lock poisoned")
            .config
            .clone()
    }
}

impl std::fmt::Debug for HeaderFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeaderFactory")
            .field("default_cap", &self.default_cap)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Signer that hands out sequential nonces and deadlines and counts
    /// its invocations.
    struct ScriptedSigner {
        calls: AtomicU64,
        deadline_offset_secs: u64,
    }

    impl ScriptedSigner {
        fn new(deadline_offset_secs: u64) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU64::new(0),
                deadline_offset_secs,
            })
        }

        fn call_count(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PermitSigner for ScriptedSigner {
        async fn sign_permit(&self, input: &SignatureInput) -> Result<SignatureOutput, SignError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let now = UnixTimestamp::try_now()?;
            let mut deadline = now + self.deadline_offset_secs + call;
            if let Some(min) = input.min_deadline_exclusive
                && deadline <= min
            {
                deadline = min + 1;
            }
            Ok(SignatureOutput {
                signature: format!("0xsig{call}"),
                nonce: PermitNonce::from(call),
                deadline,
                account_address: "0x9999999999999999999999999999999999999999".to_string(),
            })
        }
    }

    fn test_config() -> RouterConfig {
        RouterConfig {
            network: "eip155:8453".to_string(),
            asset: "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913".to_string(),
            pay_to: "0x1234567890123456789012345678901234565678".to_string(),
            facilitator_signer: "0x1234567890123456789012345678901234565678".to_string(),
            token_name: "USD Coin".to_string(),
            token_version: "2".to_string(),
            payment_header: None,
        }
    }

    fn factory_with(signer: Arc<ScriptedSigner>) -> HeaderFactory {
        HeaderFactory::new(test_config(), signer, TokenAmount::from(1_000_000u64))
    }

    #[tokio::test]
    async fn cache_reuse_signs_once() {
        let signer = ScriptedSigner::new(600);
        let factory = factory_with(signer.clone());

        let first = factory.get_header(HeaderOverrides::default()).await.unwrap();
        let second = factory.get_header(HeaderOverrides::default()).await.unwrap();

        assert_eq!(signer.call_count(), 1);
        assert_eq!(first.header_value, second.header_value);
        assert_eq!(first.header_name, "PAYMENT-SIGNATURE");
    }

    #[tokio::test]
    async fn issued_payload_carries_domain_and_cap() {
        let signer = ScriptedSigner::new(600);
        let factory = factory_with(signer);

        let issued = factory.get_header(HeaderOverrides::default()).await.unwrap();
        let payload = PaymentPayload::from_base64(&issued.header_value).unwrap();

        assert_eq!(payload.accepted.network, "eip155:8453");
        assert_eq!(payload.accepted.pay_to, test_config().pay_to);
        assert_eq!(
            payload.payload.authorization.value,
            TokenAmount::from(1_000_000u64)
        );
        assert_eq!(payload.payload.authorization.nonce, PermitNonce::from(1u64));
        assert_eq!(
            payload.payload.authorization.to,
            test_config().facilitator_signer
        );
        assert_eq!(
            payload.payload.authorization.from,
            "0x9999999999999999999999999999999999999999"
        );
        assert_eq!(payload.payload.authorization.valid_before, issued.deadline);
    }

    #[tokio::test]
    async fn min_deadline_exclusive_bypasses_cache() {
        let signer = ScriptedSigner::new(600);
        let factory = factory_with(signer.clone());

        let first = factory.get_header(HeaderOverrides::default()).await.unwrap();
        let refreshed = factory
            .get_header(HeaderOverrides {
                min_deadline_exclusive: Some(first.deadline),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(signer.call_count(), 2);
        assert!(refreshed.deadline > first.deadline);
    }

    #[tokio::test]
    async fn invalidate_forces_resign() {
        let signer = ScriptedSigner::new(600);
        let factory = factory_with(signer.clone());

        factory.get_header(HeaderOverrides::default()).await.unwrap();
        factory.invalidate();
        factory.get_header(HeaderOverrides::default()).await.unwrap();

        assert_eq!(signer.call_count(), 2);
    }

    #[tokio::test]
    async fn changed_domain_tuple_misses_cache() {
        let signer = ScriptedSigner::new(600);
        let factory = factory_with(signer.clone());

        factory.get_header(HeaderOverrides::default()).await.unwrap();

        let mut next = factory.config();
        next.pay_to = "0xcccc000000000000000000000000000000000000".to_string();
        factory.update_config(next);
        factory.get_header(HeaderOverrides::default()).await.unwrap();

        assert_eq!(signer.call_count(), 2);
    }

    #[tokio::test]
    async fn unchanged_config_update_keeps_cache() {
        let signer = ScriptedSigner::new(600);
        let factory = factory_with(signer.clone());

        factory.get_header(HeaderOverrides::default()).await.unwrap();
        factory.update_config(factory.config());
        factory.get_header(HeaderOverrides::default()).await.unwrap();

        assert_eq!(signer.call_count(), 1);
    }

    #[tokio::test]
    async fn deadline_inside_window_is_stale() {
        // Deadline lands 31 s out, inside the 60 s pre-invalidate window,
        // so the second call must re-sign even though cap and domain match.
        let signer = ScriptedSigner::new(30);
        let factory = factory_with(signer.clone());

        factory.get_header(HeaderOverrides::default()).await.unwrap();
        factory.get_header(HeaderOverrides::default()).await.unwrap();

        assert_eq!(signer.call_count(), 2);
    }

    #[tokio::test]
    async fn cap_override_applies_once() {
        let signer = ScriptedSigner::new(600);
        let factory = factory_with(signer.clone());

        let overridden = factory
            .get_header(HeaderOverrides {
                cap_override: Some(TokenAmount::from(500_000u64)),
                ..Default::default()
            })
            .await
            .unwrap();
        let payload = PaymentPayload::from_base64(&overridden.header_value).unwrap();
        assert_eq!(
            payload.payload.authorization.value,
            TokenAmount::from(500_000u64)
        );

        // Next plain call reverts to the configured cap, which also means
        // the cached 500000 header cannot be reused.
        let plain = factory.get_header(HeaderOverrides::default()).await.unwrap();
        let payload = PaymentPayload::from_base64(&plain.header_value).unwrap();
        assert_eq!(
            payload.payload.authorization.value,
            TokenAmount::from(1_000_000u64)
        );
        assert_eq!(signer.call_count(), 2);
    }

    #[tokio::test]
    async fn header_name_follows_config() {
        let signer = ScriptedSigner::new(600);
        let mut config = test_config();
        config.payment_header = Some("X-ROUTER-AUTH".to_string());
        let factory = HeaderFactory::new(config, signer, TokenAmount::from(1_000_000u64));

        let issued = factory.get_header(HeaderOverrides::default()).await.unwrap();
        assert_eq!(issued.header_name, "X-ROUTER-AUTH");
    }
}
