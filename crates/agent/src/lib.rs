//! Buyer negotiation agent
//!
//! This crate turns counterparty messages into buyer actions:
//! - Extracts prices, wallet addresses and transaction references from text
//! - Picks the next action from an ordered rule list
//! - Guards every payment against the budget and prior attempts
//! - Runs payments and records each turn in session memory
//!
//! # Architecture
//!
//! Each turn follows a fixed loop:
//! 1. **Fact Extraction** (`facts`) - Parse text into `ExtractedFacts`
//! 2. **Decision** (`decision`) - First matching rule yields a `Decision`
//! 3. **Payment Guard** (`guardrails`) - Deny transfers over budget or already made
//! 4. **Execution** (`runtime`) - Submit the payment, write the turn to memory
//!
//! # Key Types
//!
//! - `AgentRuntime` - Per-turn orchestrator (see `runtime` module)
//! - `DecisionEngine` - Deterministic rule evaluation
//! - `PaymentGuard` - Idempotency and budget checks over typed attempt state
//!
//! # Safety Principle
//!
//! Whether a payment already happened is read from recorded `PaymentAttempt`
//! states only. Nothing the counterparty writes can mark a payment as done.

pub mod decision;
pub mod facts;
pub mod guardrails;
pub mod runtime;

pub use decision::{DecisionEngine, SettlementTerms, Verdict};
pub use facts::FactExtractor;
pub use guardrails::{PaymentGuard, PaymentGuardDecision};
pub use runtime::{AgentRuntime, RuntimeError, TurnOutcome};
