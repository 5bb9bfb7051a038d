//! Chain descriptors keyed by CAIP-2 identifier
//!
//! The payment pipeline only needs enough chain metadata to bind a
//! read-only RPC client and name the chain in logs. Routers may quote any
//! `eip155:*` network; unknown ids fall back to Base.

/// Metadata for one supported chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainInfo {
    /// CAIP-2 identifier, e.g. `eip155:8453`
    pub caip2: &'static str,
    /// EVM chain id
    pub chain_id: u64,
    /// Human-readable name
    pub name: &'static str,
    /// Default public JSON-RPC endpoint for read calls
    pub rpc_url: &'static str,
}

const BASE: ChainInfo = ChainInfo {
    caip2: "eip155:8453",
    chain_id: 8453,
    name: "base",
    rpc_url: "https://mainnet.base.org",
};

const BASE_SEPOLIA: ChainInfo = ChainInfo {
    caip2: "eip155:84532",
    chain_id: 84532,
    name: "base-sepolia",
    rpc_url: "https://sepolia.base.org",
};

const ETHEREUM: ChainInfo = ChainInfo {
    caip2: "eip155:1",
    chain_id: 1,
    name: "ethereum",
    rpc_url: "https://eth.llamarpc.com",
};

const CHAIN_REGISTRY: &[ChainInfo] = &[BASE, BASE_SEPOLIA, ETHEREUM];

impl ChainInfo {
    /// Look up a chain by its CAIP-2 identifier.
    pub fn from_caip2(caip2: &str) -> Option<&'static ChainInfo> {
        CHAIN_REGISTRY.iter().find(|info| info.caip2 == caip2)
    }

    /// Look up a chain by CAIP-2 identifier, falling back to Base.
    pub fn from_caip2_or_base(caip2: &str) -> &'static ChainInfo {
        Self::from_caip2(caip2).unwrap_or(&BASE)
    }

    /// The default chain (Base).
    pub fn base() -> &'static ChainInfo {
        &BASE
    }
}

/// Parse the decimal chain reference out of an `eip155:<id>` identifier.
pub fn caip2_chain_id(caip2: &str) -> Option<u64> {
    let reference = caip2.strip_prefix("eip155:")?;
    reference.parse().ok()
}
