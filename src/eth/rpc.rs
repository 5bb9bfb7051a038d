//! Read-only JSON-RPC client for ERC-2612 state
//!
//! A deliberately small `eth_call` client: the payment pipeline only ever
//! reads the token's `nonces(address owner)` view, so the calldata is
//! encoded by hand (4-byte selector + padded owner word) instead of
//! pulling in a full provider stack.

use alloy_primitives::{Address, U256};
use serde::Deserialize;

/// Function selector for `nonces(address)` (ERC-2612), i.e. the first four
/// bytes of `keccak256("nonces(address)")`.
const NONCES_SELECTOR: [u8; 4] = [0x7e, 0xce, 0xbe, 0x00];

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("RPC transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("RPC endpoint returned error {code}: {message}")]
    Endpoint { code: i64, message: String },
    #[error("RPC response missing result")]
    MissingResult,
    #[error("Failed to decode RPC result: {0}")]
    Decode(String),
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// HTTP JSON-RPC client bound to one endpoint.
#[derive(Debug, Clone)]
pub struct RpcClient {
    url: String,
    http: reqwest::Client,
}

impl RpcClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            http: reqwest::Client::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Read the current ERC-2612 permit nonce for `owner` on `token`.
    pub async fn permit_nonce(&self, token: Address, owner: Address) -> Result<U256, RpcError> {
        let calldata = encode_nonces(owner);
        let result = self.eth_call(token, &calldata).await?;
        let nonce = decode_uint_word(&result)?;
        tracing::debug!(token = %token, owner = %owner, nonce = %nonce, "Read permit nonce");
        Ok(nonce)
    }

    async fn eth_call(&self, to: Address, data: &[u8]) -> Result<Vec<u8>, RpcError> {
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_call",
            "params": [
                { "to": to.to_string(), "data": format!("0x{}", hex::encode(data)) },
                "latest",
            ],
        });

        let response: JsonRpcResponse = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(err) = response.error {
            return Err(RpcError::Endpoint {
                code: err.code,
                message: err.message,
            });
        }

        let result = response.result.ok_or(RpcError::MissingResult)?;
        hex::decode(result.trim_start_matches("0x")).map_err(|e| RpcError::Decode(e.to_string()))
    }
}

/// Encode a `nonces(address)` call: selector plus the owner left-padded to
/// a 32-byte word.
pub fn encode_nonces(owner: Address) -> Vec<u8> {
    let mut data = Vec::with_capacity(36);
    data.extend_from_slice(&NONCES_SELECTOR);
    data.extend_from_slice(&[0u8; 12]);
    data.extend_from_slice(owner.as_slice());
    data
}

/// Decode a single uint256 return word.
fn decode_uint_word(data: &[u8]) -> Result<U256, RpcError> {
    if data.len() < 32 {
        return Err(RpcError::Decode(format!(
            "expected a 32-byte word, got {} bytes",
            data.len()
        )));
    }
    Ok(U256::from_be_slice(&data[..32]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::keccak256;
    use std::str::FromStr;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn selector_matches_signature() {
        assert_eq!(NONCES_SELECTOR, keccak256(b"nonces(address)")[0..4]);
    }

    #[test]
    fn nonces_calldata_layout() {
        let owner = Address::from_str("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913").unwrap();
        let data = encode_nonces(owner);

        assert_eq!(data.len(), 36);
        assert_eq!(&data[0..4], &NONCES_SELECTOR);
        assert_eq!(&data[4..16], &[0u8; 12]);
        assert_eq!(&data[16..36], owner.as_slice());
    }

    #[test]
    fn decodes_uint_word() {
        let mut word = [0u8; 32];
        word[31] = 7;
        assert_eq!(decode_uint_word(&word).unwrap(), U256::from(7u64));
        assert!(decode_uint_word(&word[..16]).is_err());
    }

    #[tokio::test]
    async fn reads_nonce_over_json_rpc() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"method": "eth_call"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": format!("0x{:064x}", 42),
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = RpcClient::new(server.uri());
        let token = Address::from_str("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913").unwrap();
        let owner = Address::from_str("0x9999999999999999999999999999999999999999").unwrap();

        let nonce = client.permit_nonce(token, owner).await.unwrap();
        assert_eq!(nonce, U256::from(42u64));
    }

    #[tokio::test]
    async fn surfaces_endpoint_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": { "code": -32000, "message": "execution reverted" },
            })))
            .mount(&server)
            .await;

        let client = RpcClient::new(server.uri());
        let token = Address::from_str("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913").unwrap();
        let owner = Address::from_str("0x9999999999999999999999999999999999999999").unwrap();

        let err = client.permit_nonce(token, owner).await.unwrap_err();
        assert!(matches!(err, RpcError::Endpoint { code: -32000, .. }));
    }
}
