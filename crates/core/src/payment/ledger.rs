use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("recipient address is not valid: {0}")]
    InvalidAddress(String),
    #[error("insufficient token balance: have {available}, need {required}")]
    InsufficientFunds { available: Decimal, required: Decimal },
    #[error("ledger network unavailable: {0}")]
    NetworkUnavailable(String),
    #[error("ledger rejected the transfer: {0}")]
    Rejected(String),
    #[error("transaction not found: {0}")]
    NotFound(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReceiptStatus {
    Pending,
    Confirmed { block_reference: String },
    Reverted,
}

/// Token transfers on one network in one currency, as seen from the paying wallet.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    fn payer_address(&self) -> String;

    async fn get_balance(&self, owner: &str) -> Result<Decimal, LedgerError>;

    /// Broadcasts a transfer and returns its transaction reference.
    async fn submit_transfer(&self, recipient: &str, amount: Decimal)
        -> Result<String, LedgerError>;

    async fn get_receipt(&self, transaction_reference: &str)
        -> Result<ReceiptStatus, LedgerError>;
}

pub fn is_valid_address(candidate: &str) -> bool {
    candidate.len() == 42
        && candidate.starts_with("0x")
        && candidate.bytes().skip(2).all(|byte| byte.is_ascii_hexdigit())
}
