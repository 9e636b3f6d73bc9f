//! Ethereum ledger access for payments.
//!
//! `EvmLedgerClient` implements the core `LedgerClient` seam for an ERC-20
//! token: balances through `balanceOf`, transfers as signed EIP-1559
//! transactions, and settlement through transaction receipts.

pub mod client;
pub mod rpc;
pub mod tx;
pub mod units;

pub use client::{EvmLedgerClient, EvmSetupError};
pub use rpc::{RpcClient, RpcError};
pub use tx::{SignedTransaction, TransactionSigner};
