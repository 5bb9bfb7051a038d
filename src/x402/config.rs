//! Router signing-domain configuration
//!
//! The config names where a payment goes and which EIP-712 domain the
//! permit is signed in. It is seeded from an explicit value, from the
//! router's `/v1/config` endpoint, or from the Base USDC defaults, and is
//! later overlaid with whatever a payment challenge quotes.

use serde::{Deserialize, Serialize};

use crate::x402::types::PaymentRequirement;

/// Default name of the request header that carries the authorization.
pub const DEFAULT_PAYMENT_HEADER: &str = "PAYMENT-SIGNATURE";

/// CAIP-2 id of the default network (Base mainnet).
pub const DEFAULT_NETWORK: &str = "eip155:8453";

/// USDC deployment on Base.
pub const USDC_BASE: &str = "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913";

const USDC_DOMAIN_NAME: &str = "USD Coin";
const USDC_DOMAIN_VERSION: &str = "2";

/// The signing domain for outgoing payment authorizations.
///
/// Address strings are kept byte-for-byte as received; they are only
/// parsed into checksummed form at the hashing boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// CAIP-2 chain identifier, e.g. `eip155:8453`
    pub network: String,
    /// Token contract address
    pub asset: String,
    /// Payment recipient
    pub pay_to: String,
    /// Spender of the permit; starts equal to `pay_to` and may diverge
    /// after a challenge
    pub facilitator_signer: String,
    /// EIP-712 domain name of the token contract
    pub token_name: String,
    /// EIP-712 domain version of the token contract
    pub token_version: String,
    /// Header name override for the authorization
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_header: Option<String>,
}

impl RouterConfig {
    /// Fallback config used when the router's config endpoint is
    /// unavailable: Base USDC with empty recipient addresses. The first
    /// challenge supplies the real domain.
    pub fn base_usdc_default(network: Option<&str>) -> Self {
        RouterConfig {
            network: network.unwrap_or(DEFAULT_NETWORK).to_string(),
            asset: USDC_BASE.to_string(),
            pay_to: String::new(),
            facilitator_signer: String::new(),
            token_name: USDC_DOMAIN_NAME.to_string(),
            token_version: USDC_DOMAIN_VERSION.to_string(),
            payment_header: Some(DEFAULT_PAYMENT_HEADER.to_string()),
        }
    }

    pub fn header_name(&self) -> &str {
        self.payment_header.as_deref().unwrap_or(DEFAULT_PAYMENT_HEADER)
    }

    /// Overlay a challenge requirement onto this config. Fields the
    /// requirement omits are retained; `facilitator_signer` follows the
    /// new `pay_to` when one is quoted.
    pub fn apply_requirement(&self, requirement: &PaymentRequirement) -> RouterConfig {
        let mut next = self.clone();
        if let Some(network) = &requirement.network {
            next.network = network.clone();
        }
        if let Some(asset) = &requirement.asset {
            next.asset = asset.clone();
        }
        if let Some(pay_to) = requirement.pay_to() {
            next.pay_to = pay_to.to_string();
            next.facilitator_signer = pay_to.to_string();
        }
        if let Some(extra) = &requirement.extra {
            if let Some(name) = &extra.name {
                next.token_name = name.clone();
            }
            if let Some(version) = &extra.version {
                next.token_version = version.clone();
            }
        }
        next
    }
}

// ============================================================================
// Remote config endpoint shape
// ============================================================================

/// Response body of `GET {router}/v1/config`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteRouterConfig {
    #[serde(default)]
    pub networks: Vec<RemoteNetwork>,
    #[serde(default)]
    pub payment_header: Option<String>,
    #[serde(default)]
    pub eip712_config: Option<RemoteEip712Config>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteNetwork {
    #[serde(default)]
    pub network_id: Option<String>,
    #[serde(default)]
    pub asset: Option<RemoteAsset>,
    #[serde(default)]
    pub pay_to: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteAsset {
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteEip712Config {
    #[serde(default)]
    pub domain_name: Option<String>,
    #[serde(default)]
    pub domain_version: Option<String>,
}

impl RemoteRouterConfig {
    /// Build a [`RouterConfig`] from the first advertised network; any
    /// missing field falls back to the Base USDC defaults.
    pub fn into_router_config(self, fallback_network: Option<&str>) -> RouterConfig {
        let mut config = RouterConfig::base_usdc_default(fallback_network);

        if let Some(first) = self.networks.into_iter().next() {
            if let Some(network_id) = first.network_id {
                config.network = network_id;
            }
            if let Some(address) = first.asset.and_then(|a| a.address) {
                config.asset = address;
            }
            if let Some(pay_to) = first.pay_to {
                config.pay_to = pay_to.clone();
                config.facilitator_signer = pay_to;
            }
        }
        if let Some(eip712) = self.eip712_config {
            if let Some(name) = eip712.domain_name {
                config.token_name = name;
            }
            if let Some(version) = eip712.domain_version {
                config.token_version = version;
            }
        }
        if let Some(header) = self.payment_header {
            config.payment_header = Some(header);
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::x402::types::RequirementExtra;

    #[test]
    fn default_config_is_base_usdc() {
        let config = RouterConfig::base_usdc_default(None);
        assert_eq!(config.network, "eip155:8453");
        assert_eq!(config.asset, USDC_BASE);
        assert!(config.pay_to.is_empty());
        assert!(config.facilitator_signer.is_empty());
        assert_eq!(config.header_name(), "PAYMENT-SIGNATURE");

        let sepolia = RouterConfig::base_usdc_default(Some("eip155:84532"));
        assert_eq!(sepolia.network, "eip155:84532");
    }

    #[test]
    fn remote_config_maps_first_network() {
        let body = serde_json::json!({
            "networks": [
                {
                    "network_id": "eip155:84532",
                    "asset": { "address": "0x036CbD53842c5426634e7929541eC2318f3dCF7e" },
                    "pay_to": "0x1234567890123456789012345678901234565678",
                },
                { "network_id": "eip155:1" },
            ],
            "payment_header": "X-ROUTER-AUTH",
            "eip712_config": { "domain_name": "USDC", "domain_version": "2" },
        });
        let remote: RemoteRouterConfig = serde_json::from_value(body).unwrap();
        let config = remote.into_router_config(None);

        assert_eq!(config.network, "eip155:84532");
        assert_eq!(config.asset, "0x036CbD53842c5426634e7929541eC2318f3dCF7e");
        assert_eq!(config.pay_to, "0x1234567890123456789012345678901234565678");
        assert_eq!(config.facilitator_signer, config.pay_to);
        assert_eq!(config.token_name, "USDC");
        assert_eq!(config.header_name(), "X-ROUTER-AUTH");
    }

    #[test]
    fn remote_config_partial_fields_fall_back() {
        let remote: RemoteRouterConfig = serde_json::from_value(serde_json::json!({
            "networks": [ { "network_id": "eip155:1" } ],
        }))
        .unwrap();
        let config = remote.into_router_config(None);

        assert_eq!(config.network, "eip155:1");
        assert_eq!(config.asset, USDC_BASE);
        assert_eq!(config.token_name, "USD Coin");
        assert_eq!(config.header_name(), "PAYMENT-SIGNATURE");
    }

    #[test]
    fn requirement_overlay_follows_pay_to() {
        let config = RouterConfig {
            network: "eip155:8453".to_string(),
            asset: USDC_BASE.to_string(),
            pay_to: "0xaaaa000000000000000000000000000000000000".to_string(),
            facilitator_signer: "0xbbbb000000000000000000000000000000000000".to_string(),
            token_name: "USD Coin".to_string(),
            token_version: "2".to_string(),
            payment_header: None,
        };

        let requirement = PaymentRequirement {
            network: Some("eip155:84532".to_string()),
            pay_to: Some("0xcccc000000000000000000000000000000000000".to_string()),
            extra: Some(RequirementExtra {
                name: Some("USDC".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let next = config.apply_requirement(&requirement);
        assert_eq!(next.network, "eip155:84532");
        // Asset was not quoted, so it is retained.
        assert_eq!(next.asset, USDC_BASE);
        assert_eq!(next.pay_to, "0xcccc000000000000000000000000000000000000");
        assert_eq!(next.facilitator_signer, next.pay_to);
        assert_eq!(next.token_name, "USDC");
        assert_eq!(next.token_version, "2");
    }

    #[test]
    fn requirement_without_pay_to_keeps_facilitator() {
        let config = RouterConfig::base_usdc_default(None);
        let requirement = PaymentRequirement {
            network: Some("eip155:1".to_string()),
            ..Default::default()
        };
        let next = config.apply_requirement(&requirement);
        assert_eq!(next.facilitator_signer, config.facilitator_signer);
        assert_eq!(next.pay_to, config.pay_to);
    }
}
