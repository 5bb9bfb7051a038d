//! EIP-712 hashing and signing for ERC-2612 Permit authorizations
//!
//! Hand-rolled domain and struct encoding; inputs and outputs are plain
//! strings and U256 so no curve types leak into the payment layer.

use std::str::FromStr;

use alloy_primitives::{keccak256, Address, U256};
use once_cell::sync::Lazy;

use crate::eth::signer::EvmSigner;
use crate::x402::timestamp::UnixTimestamp;
use crate::x402::types::{PermitNonce, TokenAmount};

/// EIP-712 type hash for the EIP712Domain struct
static EIP712_DOMAIN_TYPE_HASH: Lazy<[u8; 32]> = Lazy::new(|| {
    keccak256("EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)")
        .into()
});

/// EIP-712 type hash for the ERC-2612 Permit struct
static PERMIT_TYPE_HASH: Lazy<[u8; 32]> = Lazy::new(|| {
    keccak256("Permit(address owner,address spender,uint256 value,uint256 nonce,uint256 deadline)")
        .into()
});

/// EIP-712 domain parameters of the token contract.
#[derive(Debug, Clone)]
pub struct Eip712Domain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: String,
}

impl Eip712Domain {
    fn encode(&self, verifying_contract: &Address) -> [u8; 32] {
        let name_hash = keccak256(self.name.as_bytes());
        let version_hash = keccak256(self.version.as_bytes());

        let mut encoded = Vec::with_capacity(160);
        encoded.extend_from_slice(&*EIP712_DOMAIN_TYPE_HASH);
        encoded.extend_from_slice(name_hash.as_slice());
        encoded.extend_from_slice(version_hash.as_slice());
        encoded.extend_from_slice(&U256::from(self.chain_id).to_be_bytes::<32>());
        // Addresses are 20 bytes, left-padded to a 32-byte word
        encoded.extend_from_slice(&[0u8; 12]);
        encoded.extend_from_slice(verifying_contract.as_slice());

        keccak256(&encoded).into()
    }
}

/// An ERC-2612 Permit: `owner` lets `spender` draw up to `value` until
/// `deadline`, sequenced by the token's per-owner `nonce`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permit {
    pub owner: String,
    pub spender: String,
    pub value: TokenAmount,
    pub nonce: PermitNonce,
    pub deadline: UnixTimestamp,
}

impl Permit {
    fn encode(&self, owner: &Address, spender: &Address) -> [u8; 32] {
        let mut encoded = Vec::with_capacity(192);
        encoded.extend_from_slice(&*PERMIT_TYPE_HASH);

        encoded.extend_from_slice(&[0u8; 12]);
        encoded.extend_from_slice(owner.as_slice());
        encoded.extend_from_slice(&[0u8; 12]);
        encoded.extend_from_slice(spender.as_slice());

        encoded.extend_from_slice(&self.value.0.to_be_bytes::<32>());
        encoded.extend_from_slice(&self.nonce.0.to_be_bytes::<32>());
        encoded.extend_from_slice(&U256::from(self.deadline.0).to_be_bytes::<32>());

        keccak256(&encoded).into()
    }

    /// Compute the EIP-712 signing digest:
    /// `keccak256("\x19\x01" || domainSeparator || structHash)`.
    pub fn eip712_hash(&self, domain: &Eip712Domain) -> Result<[u8; 32], Eip712Error> {
        let owner = Address::from_str(&self.owner)
            .map_err(|_| Eip712Error::InvalidAddress(self.owner.clone()))?;
        let spender = Address::from_str(&self.spender)
            .map_err(|_| Eip712Error::InvalidAddress(self.spender.clone()))?;
        let verifying_contract = Address::from_str(&domain.verifying_contract)
            .map_err(|_| Eip712Error::InvalidAddress(domain.verifying_contract.clone()))?;

        let domain_separator = domain.encode(&verifying_contract);
        let struct_hash = self.encode(&owner, &spender);

        let mut encoded = Vec::with_capacity(66);
        encoded.extend_from_slice(b"\x19\x01");
        encoded.extend_from_slice(&domain_separator);
        encoded.extend_from_slice(&struct_hash);

        Ok(keccak256(&encoded).into())
    }

    /// Sign this Permit with the given key, returning the 0x-prefixed
    /// 65-byte hex signature.
    pub fn sign(&self, domain: &Eip712Domain, signer: &EvmSigner) -> Result<String, Eip712Error> {
        let hash = self.eip712_hash(domain)?;
        let signature = signer
            .sign_hash(&alloy_primitives::B256::from(hash))
            .map_err(|e| Eip712Error::Signing(format!("{e}")))?;
        Ok(format!("0x{}", hex::encode(signature.as_bytes())))
    }

    /// Verify a signature over this Permit by recovery; returns the
    /// recovered signer address.
    pub fn verify(&self, domain: &Eip712Domain, signature: &[u8]) -> Result<Address, Eip712Error> {
        let hash = self.eip712_hash(domain)?;
        let sig = alloy_primitives::Signature::try_from(signature)
            .map_err(|_| Eip712Error::Signing("invalid signature format".to_string()))?;
        crate::eth::signer::recover_address(&sig, &alloy_primitives::B256::from(hash))
            .map_err(|e| Eip712Error::Signing(format!("{e}")))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Eip712Error {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Signing failed: {0}")]
    Signing(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usdc_base_domain() -> Eip712Domain {
        Eip712Domain {
            name: "USD Coin".to_string(),
            version: "2".to_string(),
            chain_id: 8453,
            verifying_contract: "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913".to_string(),
        }
    }

    fn sample_permit(owner: &str) -> Permit {
        Permit {
            owner: owner.to_string(),
            spender: "0x2222222222222222222222222222222222222222".to_string(),
            value: TokenAmount(U256::from(1_000_000u64)),
            nonce: PermitNonce(U256::from(1u64)),
            deadline: UnixTimestamp(1_700_000_000),
        }
    }

    #[test]
    fn permit_digest_is_32_bytes() {
        let permit = sample_permit("0x1111111111111111111111111111111111111111");
        let hash = permit.eip712_hash(&usdc_base_domain()).unwrap();
        assert_eq!(hash.len(), 32);
    }

    #[test]
    fn digest_changes_with_deadline() {
        let permit = sample_permit("0x1111111111111111111111111111111111111111");
        let mut later = permit.clone();
        later.deadline = UnixTimestamp(1_700_000_001);

        let domain = usdc_base_domain();
        assert_ne!(
            permit.eip712_hash(&domain).unwrap(),
            later.eip712_hash(&domain).unwrap()
        );
    }

    #[test]
    fn signature_recovers_to_owner() {
        let signer = EvmSigner::random();
        let permit = sample_permit(&signer.address().to_string());
        let domain = usdc_base_domain();

        let sig_hex = permit.sign(&domain, &signer).unwrap();
        let sig_bytes = hex::decode(sig_hex.trim_start_matches("0x")).unwrap();

        let recovered = permit.verify(&domain, &sig_bytes).unwrap();
        assert_eq!(recovered, signer.address());
    }

    #[test]
    fn rejects_malformed_contract_address() {
        let permit = sample_permit("0x1111111111111111111111111111111111111111");
        let mut domain = usdc_base_domain();
        domain.verifying_contract = "not-an-address".to_string();
        assert!(matches!(
            permit.eip712_hash(&domain),
            Err(Eip712Error::InvalidAddress(_))
        ));
    }
}
