//! Wire types for the x402 "upto" payment scheme
//!
//! Everything that crosses the HTTP boundary lives here: the signed
//! payment payload carried in the request header, the challenge shape the
//! router sends back, and the error body classification that drives the
//! retry decision. Numeric authorization fields are decimal strings
//! end-to-end; they never pass through a float.

use std::fmt;
use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

use alloy_primitives::U256;
use base64::engine::general_purpose::STANDARD as b64;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::x402::timestamp::UnixTimestamp;

// ============================================================================
// Protocol Version
// ============================================================================

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum X402Version {
    #[default]
    V2,
}

impl Serialize for X402Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            X402Version::V2 => serializer.serialize_u8(2),
        }
    }
}

impl<'de> Deserialize<'de> for X402Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match u8::deserialize(deserializer)? {
            2 => Ok(X402Version::V2),
            other => Err(serde::de::Error::custom(format!(
                "Unsupported x402Version: {other}"
            ))),
        }
    }
}

impl Display for X402Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            X402Version::V2 => write!(f, "2"),
        }
    }
}

// ============================================================================
// Scheme
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// Permit-backed authorization for any charge up to a cap.
    #[default]
    Upto,
}

impl Display for Scheme {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "upto")
    }
}

// ============================================================================
// Decimal-string U256 newtypes
// ============================================================================

/// A token amount in base units, serialized as a decimal string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TokenAmount(pub U256);

impl Display for TokenAmount {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TokenAmount {
    type Err = alloy_primitives::ruint::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(TokenAmount(U256::from_str(s)?))
    }
}

impl From<u64> for TokenAmount {
    fn from(value: u64) -> Self {
        TokenAmount(U256::from(value))
    }
}

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let value = U256::from_str(&s).map_err(serde::de::Error::custom)?;
        Ok(TokenAmount(value))
    }
}

/// An ERC-2612 permit sequence number, serialized as a decimal string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PermitNonce(pub U256);

impl Display for PermitNonce {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for PermitNonce {
    fn from(value: u64) -> Self {
        PermitNonce(U256::from(value))
    }
}

impl Serialize for PermitNonce {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for PermitNonce {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let value = U256::from_str(&s).map_err(serde::de::Error::custom)?;
        Ok(PermitNonce(value))
    }
}

// ============================================================================
// Base64 Bytes
// ============================================================================

/// Raw bytes carried through a base64-encoded HTTP header.
#[derive(Clone, PartialEq, Eq)]
pub struct Base64Bytes(Vec<u8>);

impl Base64Bytes {
    pub fn from_encoded(s: &str) -> Result<Self, base64::DecodeError> {
        Ok(Base64Bytes(b64.decode(s.trim())?))
    }

    pub fn encode(bytes: &[u8]) -> String {
        b64.encode(bytes)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl Debug for Base64Bytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Base64({})", b64.encode(&self.0))
    }
}

// ============================================================================
// Payment Payload
// ============================================================================

/// The authorization header value before base64: which requirement was
/// accepted, and the signed permit backing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentPayload {
    #[serde(rename = "x402Version", default)]
    pub x402_version: X402Version,
    pub accepted: AcceptedRequirement,
    pub payload: SignedPermit,
}

impl PaymentPayload {
    pub fn to_base64(&self) -> Result<String, serde_json::Error> {
        Ok(Base64Bytes::encode(&serde_json::to_vec(self)?))
    }

    pub fn from_base64(s: &str) -> Option<Self> {
        let bytes = Base64Bytes::from_encoded(s).ok()?;
        serde_json::from_slice(bytes.as_slice()).ok()
    }
}

/// The requirement the payload settles against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptedRequirement {
    pub scheme: Scheme,
    pub network: String,
    pub asset: String,
    #[serde(rename = "payTo")]
    pub pay_to: String,
    pub extra: DomainExtra,
}

/// EIP-712 domain fields of the token contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainExtra {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPermit {
    pub authorization: PermitAuthorization,
    pub signature: String,
}

/// The permit terms: `from` authorizes `to` to draw up to `value` until
/// `validBefore`, sequenced by the on-chain `nonce`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermitAuthorization {
    pub from: String,
    pub to: String,
    pub value: TokenAmount,
    #[serde(rename = "validBefore")]
    pub valid_before: UnixTimestamp,
    pub nonce: PermitNonce,
}

// ============================================================================
// Payment Challenge
// ============================================================================

/// Decoded `PAYMENT-REQUIRED` response header. Only the first entry of
/// `accepts` is consulted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequiredHeader {
    pub accepts: Vec<PaymentRequirement>,
}

impl PaymentRequiredHeader {
    /// Decode a base64 header value; any malformed input yields `None`.
    pub fn from_base64(s: &str) -> Option<Self> {
        let bytes = Base64Bytes::from_encoded(s).ok()?;
        serde_json::from_slice(bytes.as_slice()).ok()
    }

    pub fn first(&self) -> Option<&PaymentRequirement> {
        self.accepts.first()
    }
}

/// One payment option from a challenge. Routers in the wild emit both
/// camelCase and snake_case spellings, so both are kept as distinct
/// fields rather than serde aliases (a payload carrying both spellings
/// must not fail to parse).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PaymentRequirement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset: Option<String>,
    #[serde(default, rename = "payTo", skip_serializing_if = "Option::is_none")]
    pub pay_to: Option<String>,
    #[serde(default, rename = "pay_to", skip_serializing_if = "Option::is_none")]
    pub pay_to_snake: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<RequirementExtra>,
}

impl PaymentRequirement {
    /// Recipient address, accepting either casing (camelCase wins).
    pub fn pay_to(&self) -> Option<&str> {
        self.pay_to.as_deref().or(self.pay_to_snake.as_deref())
    }

    /// Server-specified cap override, if the requirement carries one.
    pub fn cap(&self) -> Option<&str> {
        self.extra.as_ref().and_then(RequirementExtra::cap)
    }
}

/// The `extra` block of a requirement: EIP-712 domain fields plus the cap
/// override under one of its five observed spellings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequirementExtra {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(
        default,
        rename = "maxAmountRequired",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_amount_required: Option<String>,
    #[serde(
        default,
        rename = "max_amount_required",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_amount_required_snake: Option<String>,
    #[serde(default, rename = "maxAmount", skip_serializing_if = "Option::is_none")]
    pub max_amount: Option<String>,
    #[serde(default, rename = "max_amount", skip_serializing_if = "Option::is_none")]
    pub max_amount_snake: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
}

impl RequirementExtra {
    /// First non-empty cap field, in the fixed precedence order
    /// maxAmountRequired, max_amount_required, maxAmount, max_amount,
    /// amount.
    pub fn cap(&self) -> Option<&str> {
        [
            &self.max_amount_required,
            &self.max_amount_required_snake,
            &self.max_amount,
            &self.max_amount_snake,
            &self.amount,
        ]
        .into_iter()
        .filter_map(|field| field.as_deref())
        .find(|value| !value.is_empty())
    }
}

// ============================================================================
// Error Response Classification
// ============================================================================

/// Error kinds that warrant a one-shot authorization refresh and retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaymentErrorKind {
    CapExhausted,
    SessionClosed,
    SettlementBlocked,
}

/// Normalized 401/402 response body. Routers answer with either a flat
/// `{ code, error, message }` object or the fields nested under `error`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorResponse {
    pub code: Option<String>,
    pub error: Option<String>,
    pub message: Option<String>,
}

fn string_field(obj: &serde_json::Map<String, serde_json::Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(|v| v.as_str()).map(ToOwned::to_owned)
}

impl ErrorResponse {
    /// Normalize a parsed response body; non-object bodies yield `None`.
    pub fn from_json(value: &serde_json::Value) -> Option<ErrorResponse> {
        let obj = value.as_object()?;
        let nested = obj.get("error").and_then(|v| v.as_object());

        let code = string_field(obj, "code").or_else(|| {
            nested.and_then(|n| string_field(n, "code").or_else(|| string_field(n, "type")))
        });
        let error = string_field(obj, "error");
        let message = string_field(obj, "message").or_else(|| {
            nested.and_then(|n| string_field(n, "message").or_else(|| string_field(n, "error")))
        });

        Some(ErrorResponse {
            code,
            error,
            message,
        })
    }

    /// Classify the error. An exact `code` match decides alone; the
    /// substring fallback over `error` + `message` only applies when no
    /// code is present.
    pub fn classify(&self) -> Option<PaymentErrorKind> {
        if let Some(code) = &self.code {
            return match code.as_str() {
                "cap_exhausted" => Some(PaymentErrorKind::CapExhausted),
                "session_closed" => Some(PaymentErrorKind::SessionClosed),
                "settlement_blocked" => Some(PaymentErrorKind::SettlementBlocked),
                _ => None,
            };
        }

        let haystack = format!(
            "{} {}",
            self.error.as_deref().unwrap_or(""),
            self.message.as_deref().unwrap_or("")
        )
        .to_lowercase();

        if haystack.contains("cap exhausted") {
            Some(PaymentErrorKind::CapExhausted)
        } else if haystack.contains("session closed") {
            Some(PaymentErrorKind::SessionClosed)
        } else if haystack.contains("settlement blocked")
            || haystack.contains("blocked after previous settlement")
        {
            Some(PaymentErrorKind::SettlementBlocked)
        } else {
            None
        }
    }
}
