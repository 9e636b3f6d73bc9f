use std::str::FromStr;
use std::time::Duration;

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info};

use purser_core::config::LedgerConfig;
use purser_core::payment::ledger::{LedgerClient, LedgerError, ReceiptStatus};

use crate::rpc::{parse_hex_u256, parse_hex_u64, RpcClient, RpcError};
use crate::tx::{
    balance_of_calldata, transfer_calldata, Eip1559Transaction, SignerError, TransactionSigner,
};
use crate::units::{from_base_units, to_base_units};

/// Cap on the tip; the node's gas price is used when it is lower.
const MAX_PRIORITY_FEE_WEI: u64 = 1_500_000_000;

#[derive(Debug, Error)]
pub enum EvmSetupError {
    #[error("invalid ledger configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Signer(#[from] SignerError),
    #[error("http client could not be built: {0}")]
    Http(#[from] reqwest::Error),
}

/// ERC-20 ledger over Ethereum JSON-RPC.
///
/// Without a private key the client can still read balances and receipts,
/// but every transfer is rejected.
#[derive(Debug)]
pub struct EvmLedgerClient {
    rpc: RpcClient,
    signer: Option<TransactionSigner>,
    chain_id: u64,
    token: Address,
    token_decimals: u32,
    gas_limit: u64,
}

impl EvmLedgerClient {
    pub fn from_config(config: &LedgerConfig) -> Result<Self, EvmSetupError> {
        let rpc = RpcClient::new(
            config.rpc_url.clone(),
            config.fallback_rpc_url.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )?;
        let token = Address::from_str(&config.token_contract).map_err(|error| {
            EvmSetupError::InvalidConfig(format!(
                "token contract `{}`: {error}",
                config.token_contract
            ))
        })?;
        let signer = config
            .private_key
            .as_ref()
            .map(|key| TransactionSigner::from_hex(key.expose_secret()))
            .transpose()?;

        Ok(Self {
            rpc,
            signer,
            chain_id: config.chain_id,
            token,
            token_decimals: config.token_decimals,
            gas_limit: config.gas_limit,
        })
    }

    pub fn can_sign(&self) -> bool {
        self.signer.is_some()
    }

    async fn token_balance(&self, owner: Address) -> Result<U256, RpcError> {
        let data = balance_of_calldata(owner);
        let raw = self
            .rpc
            .call_str(
                "eth_call",
                json!([
                    { "to": self.token.to_string(), "data": format!("0x{}", hex::encode(&data)) },
                    "latest"
                ]),
            )
            .await?;
        parse_hex_u256(&raw, "balanceOf result")
    }

    async fn fees(&self) -> Result<(U256, U256), RpcError> {
        let raw = self.rpc.call_str("eth_gasPrice", json!([])).await?;
        let gas_price = parse_hex_u256(&raw, "eth_gasPrice")?;
        Ok(fee_caps(gas_price))
    }

    async fn pending_nonce(&self, address: Address) -> Result<u64, RpcError> {
        let raw = self
            .rpc
            .call_str("eth_getTransactionCount", json!([address.to_string(), "pending"]))
            .await?;
        parse_hex_u64(&raw, "eth_getTransactionCount")
    }
}

/// `(max_priority_fee_per_gas, max_fee_per_gas)` for a given gas price.
pub fn fee_caps(gas_price: U256) -> (U256, U256) {
    let priority = gas_price.min(U256::from(MAX_PRIORITY_FEE_WEI));
    let max_fee = gas_price.saturating_mul(U256::from(2u8)).saturating_add(priority);
    (priority, max_fee)
}

/// Reads an `eth_getTransactionReceipt` result.
pub fn receipt_status(reference: &str, result: &Value) -> Result<ReceiptStatus, LedgerError> {
    if result.is_null() {
        return Err(LedgerError::NotFound(reference.to_owned()));
    }
    let status = result
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| LedgerError::NetworkUnavailable("receipt status was missing".to_owned()))?;
    match parse_hex_u64(status, "receipt status").map_err(LedgerError::from)? {
        1 => {
            let block = result
                .get("blockNumber")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    LedgerError::NetworkUnavailable("receipt block number was missing".to_owned())
                })?;
            let number = parse_hex_u64(block, "receipt blockNumber").map_err(LedgerError::from)?;
            Ok(ReceiptStatus::Confirmed { block_reference: number.to_string() })
        }
        _ => Ok(ReceiptStatus::Reverted),
    }
}

fn parse_address(raw: &str) -> Result<Address, LedgerError> {
    Address::from_str(raw.trim())
        .map_err(|error| LedgerError::InvalidAddress(format!("{raw}: {error}")))
}

#[async_trait]
impl LedgerClient for EvmLedgerClient {
    fn payer_address(&self) -> String {
        self.signer
            .as_ref()
            .map(|signer| signer.address())
            .unwrap_or(Address::ZERO)
            .to_checksum(None)
    }

    async fn get_balance(&self, owner: &str) -> Result<Decimal, LedgerError> {
        let owner = parse_address(owner)?;
        let raw = self.token_balance(owner).await?;
        from_base_units(raw, self.token_decimals)
            .map_err(|error| LedgerError::NetworkUnavailable(error.to_string()))
    }

    async fn submit_transfer(&self, recipient: &str, amount: Decimal) -> Result<String, LedgerError> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| LedgerError::Rejected("no payer private key configured".to_owned()))?;
        let recipient = parse_address(recipient)?;
        let value = to_base_units(amount, self.token_decimals)
            .map_err(|error| LedgerError::Rejected(error.to_string()))?;

        let nonce = self.pending_nonce(signer.address()).await?;
        let (max_priority_fee_per_gas, max_fee_per_gas) = self.fees().await?;
        let tx = Eip1559Transaction {
            chain_id: U256::from(self.chain_id),
            nonce: U256::from(nonce),
            max_priority_fee_per_gas,
            max_fee_per_gas,
            gas_limit: U256::from(self.gas_limit),
            to: self.token,
            value: U256::ZERO,
            data: transfer_calldata(recipient, value),
        };
        let signed = signer.sign(&tx).map_err(|error| LedgerError::Rejected(error.to_string()))?;
        debug!(
            event_name = "ledger.transfer.signed",
            nonce,
            max_fee_per_gas = %max_fee_per_gas,
            transaction_reference = %signed.hash_hex(),
            "transfer signed"
        );

        let reported = self.rpc.call_str("eth_sendRawTransaction", json!([signed.raw_hex()])).await?;
        let reference = reported.trim().to_ascii_lowercase();
        info!(
            event_name = "ledger.transfer.broadcast",
            transaction_reference = %reference,
            recipient = %recipient,
            amount = %amount,
            "transfer accepted by node"
        );
        Ok(reference)
    }

    async fn get_receipt(&self, reference: &str) -> Result<ReceiptStatus, LedgerError> {
        let result = self.rpc.call("eth_getTransactionReceipt", json!([reference])).await?;
        receipt_status(reference, &result)
    }
}
