//! Minimal Ethereum signer built on k256
//!
//! Implements only what the payment pipeline needs: key parsing, address
//! derivation, and prehash signing with Ethereum-style recovery ids.

use std::fmt;
use std::str::FromStr;

use alloy_primitives::{keccak256, Address, Signature, B256};
use k256::ecdsa::{RecoveryId, SigningKey, VerifyingKey};

/// A secp256k1 private-key signer with a cached Ethereum address.
#[derive(Clone)]
pub struct EvmSigner {
    key: SigningKey,
    address: Address,
}

impl EvmSigner {
    pub fn new(key: SigningKey) -> Self {
        let address = Self::derive_address(&key);
        Self { key, address }
    }

    /// Generate a signer from a fresh random key.
    pub fn random() -> Self {
        use k256::elliptic_curve::rand_core::OsRng;
        Self::new(SigningKey::random(&mut OsRng))
    }

    /// Create a signer from raw key bytes (32 bytes).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SignerError> {
        let key = SigningKey::from_slice(bytes).map_err(|_| SignerError::InvalidKey)?;
        Ok(Self::new(key))
    }

    /// Create a signer from a hex string, with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, SignerError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|_| SignerError::InvalidHex)?;
        Self::from_bytes(&bytes)
    }

    pub fn address(&self) -> Address {
        self.address
    }

    fn derive_address(key: &SigningKey) -> Address {
        Self::address_from_verifying_key(key.verifying_key())
    }

    fn address_from_verifying_key(key: &VerifyingKey) -> Address {
        // Uncompressed public key is 0x04 || x || y; the address is the
        // last 20 bytes of keccak256(x || y).
        let public_key = key.to_encoded_point(false);
        let hash = keccak256(&public_key.as_bytes()[1..]);
        Address::from_slice(&hash[12..])
    }

    /// Sign a 32-byte hash, producing a 65-byte (r, s, v) signature with
    /// `v = 27 + recovery_id`.
    pub fn sign_hash(&self, hash: &B256) -> Result<Signature, SignerError> {
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(hash.as_slice())
            .map_err(|_| SignerError::SigningFailed)?;

        let r_bytes: [u8; 32] = signature.r().to_bytes().into();
        let s_bytes: [u8; 32] = signature.s().to_bytes().into();

        let mut sig_bytes = [0u8; 65];
        sig_bytes[0..32].copy_from_slice(&r_bytes);
        sig_bytes[32..64].copy_from_slice(&s_bytes);
        sig_bytes[64] = recovery_id.to_byte() + 27;

        Signature::try_from(&sig_bytes[..]).map_err(|_| SignerError::InvalidSignature)
    }
}

impl FromStr for EvmSigner {
    type Err = SignerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl fmt::Debug for EvmSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvmSigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    #[error("Invalid private key")]
    InvalidKey,
    #[error("Invalid hex string")]
    InvalidHex,
    #[error("Signing failed")]
    SigningFailed,
    #[error("Invalid signature format")]
    InvalidSignature,
    #[error("Signature recovery failed")]
    RecoveryFailed,
}

/// Recover the signing address from a 65-byte signature over a prehash.
pub fn recover_address(signature: &Signature, hash: &B256) -> Result<Address, SignerError> {
    let sig_bytes = signature.as_bytes();
    if sig_bytes.len() != 65 {
        return Err(SignerError::InvalidSignature);
    }

    let r_bytes: [u8; 32] = sig_bytes[0..32].try_into().unwrap();
    let s_bytes: [u8; 32] = sig_bytes[32..64].try_into().unwrap();
    let v = sig_bytes[64];

    let sig = k256::ecdsa::Signature::from_scalars(r_bytes, s_bytes)
        .map_err(|_| SignerError::InvalidSignature)?;

    let recovery_byte = if v >= 27 { v - 27 } else { v };
    let recid = RecoveryId::from_byte(recovery_byte).ok_or(SignerError::RecoveryFailed)?;

    let recovered = VerifyingKey::recover_from_prehash(hash.as_slice(), &sig, recid)
        .map_err(|_| SignerError::RecoveryFailed)?;

    Ok(EvmSigner::address_from_verifying_key(&recovered))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_signer_has_address() {
        let signer = EvmSigner::random();
        assert_ne!(signer.address(), Address::ZERO);
    }

    #[test]
    fn from_hex_known_key() {
        let hex_key = "0000000000000000000000000000000000000000000000000000000000000001";
        let signer = EvmSigner::from_hex(hex_key).unwrap();

        // Well-known address for private key = 1.
        assert_eq!(
            signer.address().to_string(),
            "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf"
        );
    }

    #[test]
    fn sign_and_recover_round_trip() {
        let signer = EvmSigner::random();
        let hash = keccak256(b"payment authorization digest");

        let signature = signer.sign_hash(&hash).unwrap();
        assert_eq!(signature.as_bytes().len(), 65);

        let recovered = recover_address(&signature, &hash).unwrap();
        assert_eq!(recovered, signer.address());
    }

    #[test]
    fn rejects_short_key() {
        assert!(EvmSigner::from_hex("0x1234").is_err());
    }
}
