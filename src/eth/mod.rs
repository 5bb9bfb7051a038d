pub mod chain;
pub mod eip712;
pub mod rpc;
pub mod signer;

pub use chain::{caip2_chain_id, ChainInfo};
pub use eip712::{Eip712Domain, Permit};
pub use rpc::RpcClient;
pub use signer::{recover_address, EvmSigner, SignerError};
