//! Ethereum JSON-RPC gateway built on an alloy provider.
//!
//! Reads go through `eth_call`, writes through `eth_sendTransaction` (the node
//! or wallet behind the endpoint signs), and settlement is polled with
//! `eth_getTransactionReceipt`.

use std::time::Duration;

use alloy::network::{ReceiptResponse, TransactionBuilder};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::client::RpcClient;
use alloy::rpc::types::TransactionRequest;
use alloy::sol_types::{SolInterface, decode_revert_reason};
use alloy::transports::http::Http;
use alloy::transports::{RpcError, TransportError};
use alloy_primitives::{Address, Bytes};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use tracing::{debug, warn};

use super::contract::{ContractCall, signature};
use super::{ContractGateway, TxHandle, TxReceipt};
use crate::config::RpcConfig;
use crate::error::GatewayError;

/// EIP-1474 / geth code for "execution reverted".
const EXECUTION_REVERTED: i64 = 3;

/// Lower bound for the receipt poll interval; a zero interval cannot tick.
pub const MIN_RECEIPT_POLL: Duration = Duration::from_millis(1);

/// Contract gateway backed by a JSON-RPC endpoint.
pub struct JsonRpcGateway {
    provider: DynProvider,
    from: Option<Address>,
    receipt_poll_interval: Duration,
    receipt_timeout: Duration,
}

impl JsonRpcGateway {
    pub fn new(config: &RpcConfig) -> Result<Self, GatewayError> {
        let url = reqwest::Url::parse(config.url.expose_secret())
            .map_err(|e| GatewayError::Transport(format!("invalid RPC URL: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let transport = Http::with_client(http, url);
        let is_local = transport.guess_local();
        let provider = ProviderBuilder::new()
            .disable_recommended_fillers()
            .connect_client(RpcClient::new(transport, is_local))
            .erased();

        Ok(Self {
            provider,
            from: config.from,
            receipt_poll_interval: config.receipt_poll_interval.max(MIN_RECEIPT_POLL),
            receipt_timeout: config.receipt_timeout,
        })
    }

    fn request(&self, contract: Address, call: &ContractCall) -> TransactionRequest {
        TransactionRequest::default()
            .with_to(contract)
            .with_input(call.abi_encode())
    }
}

#[async_trait]
impl ContractGateway for JsonRpcGateway {
    async fn read(&self, contract: Address, call: &ContractCall) -> Result<Bytes, GatewayError> {
        let data = self
            .provider
            .call(self.request(contract, call))
            .await
            .map_err(classify_rpc_error)?;

        // Some nodes answer a revert without reason as an empty success.
        if data.is_empty() {
            return Err(GatewayError::Reverted {
                reason: format!("{} returned no data", signature(call)),
            });
        }
        Ok(data)
    }

    async fn write(&self, contract: Address, call: &ContractCall) -> Result<TxHandle, GatewayError> {
        let from = self.from.ok_or(GatewayError::NoSender)?;
        let pending = self
            .provider
            .send_transaction(self.request(contract, call).with_from(from))
            .await
            .map_err(classify_rpc_error)?;

        let hash = *pending.tx_hash();
        debug!(tx_hash = %hash, function = signature(call), "Transaction submitted");
        Ok(TxHandle { hash })
    }

    async fn confirm(&self, tx: &TxHandle) -> Result<TxReceipt, GatewayError> {
        let poll = async {
            let mut interval = tokio::time::interval(self.receipt_poll_interval);
            loop {
                interval.tick().await;
                let receipt = self
                    .provider
                    .get_transaction_receipt(tx.hash)
                    .await
                    .map_err(classify_rpc_error)?;
                if let Some(receipt) = receipt {
                    return Ok::<_, GatewayError>(TxReceipt {
                        hash: receipt.transaction_hash(),
                        success: receipt.status(),
                        block_number: receipt.block_number(),
                    });
                }
                debug!(tx_hash = %tx.hash, "Receipt not yet available");
            }
        };

        match tokio::time::timeout(self.receipt_timeout, poll).await {
            Ok(result) => result,
            Err(_) => {
                warn!(tx_hash = %tx.hash, timeout = ?self.receipt_timeout, "Receipt wait timed out");
                Err(GatewayError::Timeout(self.receipt_timeout))
            }
        }
    }
}

/// Separate contract reverts from everything else that can go wrong.
fn classify_rpc_error(err: TransportError) -> GatewayError {
    match err {
        RpcError::ErrorResp(payload) => {
            if let Some(data) = payload.as_revert_data() {
                let reason =
                    decode_revert_reason(&data).unwrap_or_else(|| payload.message.to_string());
                return GatewayError::Reverted { reason };
            }
            if payload.code == EXECUTION_REVERTED {
                return GatewayError::Reverted {
                    reason: payload.message.to_string(),
                };
            }
            GatewayError::Rpc {
                code: payload.code,
                message: payload.message.to_string(),
            }
        }
        RpcError::Transport(kind) => GatewayError::Transport(kind.to_string()),
        RpcError::NullResp => GatewayError::InvalidResponse("null response".into()),
        RpcError::DeserError { err, .. } => GatewayError::InvalidResponse(err.to_string()),
        other => GatewayError::Transport(other.to_string()),
    }
}
