//! Payment submission and confirmation tracking.
//!
//! [`PaymentExecutor`] drives one transfer from `Pending` to a terminal state,
//! journaling every transition so a crash between submission and
//! confirmation still leaves the transaction reference on record.

pub mod ledger;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::PaymentConfig;
use crate::domain::payment::{PaymentAttempt, PaymentFailure, PaymentState};
use crate::domain::session::SessionId;
use crate::errors::{ApplicationError, DomainError};

use self::ledger::{is_valid_address, LedgerClient, LedgerError, ReceiptStatus};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentSettings {
    pub poll_interval: Duration,
    pub confirmation_timeout: Duration,
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self { poll_interval: Duration::from_secs(10), confirmation_timeout: Duration::from_secs(300) }
    }
}

impl From<&PaymentConfig> for PaymentSettings {
    fn from(config: &PaymentConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            confirmation_timeout: Duration::from_secs(config.confirmation_timeout_secs),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("payment journal write failed: {0}")]
pub struct JournalError(pub String);

/// Durable record of payment attempts, keyed by session.
#[async_trait]
pub trait PaymentJournal: Send + Sync {
    async fn record_payment_attempt(
        &self,
        session_id: &SessionId,
        attempt: &PaymentAttempt,
    ) -> Result<(), JournalError>;
}

#[derive(Debug, Error)]
pub enum PaymentError {
    /// The attempt reached `attempt.state` but could not be recorded.
    #[error("payment attempt {} reached `{}` but was not journaled: {source}", .attempt.id.0, .attempt.state.as_str())]
    Journal { attempt: Box<PaymentAttempt>, source: JournalError },
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl PaymentError {
    pub fn attempt(&self) -> Option<&PaymentAttempt> {
        match self {
            Self::Journal { attempt, .. } => Some(attempt),
            Self::Domain(_) => None,
        }
    }
}

impl From<PaymentError> for ApplicationError {
    fn from(value: PaymentError) -> Self {
        match value {
            PaymentError::Journal { .. } => Self::Persistence(value.to_string()),
            PaymentError::Domain(error) => Self::Domain(error),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalletSummary {
    pub address: String,
    pub balance: Decimal,
}

pub struct PaymentExecutor {
    ledger: Arc<dyn LedgerClient>,
    journal: Arc<dyn PaymentJournal>,
    settings: PaymentSettings,
}

impl PaymentExecutor {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        journal: Arc<dyn PaymentJournal>,
        settings: PaymentSettings,
    ) -> Self {
        Self { ledger, journal, settings }
    }

    pub fn settings(&self) -> &PaymentSettings {
        &self.settings
    }

    pub async fn submit(
        &self,
        session_id: &SessionId,
        amount: Decimal,
        recipient_address: &str,
    ) -> Result<PaymentAttempt, PaymentError> {
        self.submit_with_cancellation(session_id, amount, recipient_address, CancellationToken::new())
            .await
    }

    /// Submits a transfer and waits for it to settle.
    ///
    /// Always returns an attempt in a terminal state unless the journal
    /// refuses a write. Cancelling `cancel` while confirmation is pending
    /// ends the wait with `TimedOut`; the transfer itself is not recalled.
    pub async fn submit_with_cancellation(
        &self,
        session_id: &SessionId,
        amount: Decimal,
        recipient_address: &str,
        cancel: CancellationToken,
    ) -> Result<PaymentAttempt, PaymentError> {
        let mut attempt = PaymentAttempt::pending(amount, recipient_address);
        info!(
            event_name = "payment.submit.started",
            session_id = %session_id,
            attempt_id = %attempt.id.0,
            amount = %amount,
            recipient = recipient_address,
            "payment attempt created"
        );
        self.journal(session_id, &attempt).await?;

        if let Some((failure, detail)) = self.preflight(amount, recipient_address).await {
            return self.finish_failed(session_id, attempt, failure, detail).await;
        }

        let reference = match self.ledger.submit_transfer(recipient_address, amount).await {
            Ok(reference) => reference,
            Err(error) => {
                let failure = failure_for(&error);
                return self.finish_failed(session_id, attempt, failure, error.to_string()).await;
            }
        };

        attempt.mark_submitted(reference.clone())?;
        info!(
            event_name = "payment.submit.broadcast",
            session_id = %session_id,
            attempt_id = %attempt.id.0,
            transaction_reference = %reference,
            "transfer broadcast, awaiting confirmation"
        );
        // The transfer already left the wallet; keep tracking it even if this
        // write fails so the terminal state gets another chance to land.
        if let Err(error) = self.journal.record_payment_attempt(session_id, &attempt).await {
            warn!(
                event_name = "payment.journal.submitted_write_failed",
                session_id = %session_id,
                attempt_id = %attempt.id.0,
                transaction_reference = %reference,
                error = %error,
                "could not journal submitted payment"
            );
        }

        let state = self.await_confirmation(&mut attempt, &reference, &cancel).await;
        attempt.transition_to(state)?;
        info!(
            event_name = "payment.submit.finished",
            session_id = %session_id,
            attempt_id = %attempt.id.0,
            transaction_reference = %reference,
            state = attempt.state.as_str(),
            polls = attempt.polls,
            "payment attempt reached terminal state"
        );
        self.journal(session_id, &attempt).await?;
        Ok(attempt)
    }

    /// Re-checks a timed-out attempt once and upgrades it if it has settled since.
    pub async fn reconcile(
        &self,
        session_id: &SessionId,
        mut attempt: PaymentAttempt,
    ) -> Result<PaymentAttempt, PaymentError> {
        if attempt.state != PaymentState::TimedOut {
            return Ok(attempt);
        }
        let Some(reference) = attempt.transaction_reference.clone() else {
            return Ok(attempt);
        };

        let next = match self.ledger.get_receipt(&reference).await {
            Ok(ReceiptStatus::Confirmed { block_reference }) => {
                PaymentState::Confirmed { block_reference }
            }
            Ok(ReceiptStatus::Reverted) => PaymentState::Reverted,
            Ok(ReceiptStatus::Pending) | Err(LedgerError::NotFound(_)) => return Ok(attempt),
            Err(error) => {
                warn!(
                    event_name = "payment.reconcile.query_failed",
                    session_id = %session_id,
                    transaction_reference = %reference,
                    error = %error,
                    "could not re-check timed out payment"
                );
                return Ok(attempt);
            }
        };

        attempt.polls += 1;
        attempt.transition_to(next)?;
        info!(
            event_name = "payment.reconcile.settled",
            session_id = %session_id,
            attempt_id = %attempt.id.0,
            transaction_reference = %reference,
            state = attempt.state.as_str(),
            "timed out payment settled late"
        );
        self.journal(session_id, &attempt).await?;
        Ok(attempt)
    }

    pub async fn wallet_summary(&self) -> Result<WalletSummary, LedgerError> {
        let address = self.ledger.payer_address();
        let balance = self.ledger.get_balance(&address).await?;
        Ok(WalletSummary { address, balance })
    }

    pub async fn transaction_status(&self, reference: &str) -> Result<ReceiptStatus, LedgerError> {
        self.ledger.get_receipt(reference).await
    }

    async fn preflight(
        &self,
        amount: Decimal,
        recipient_address: &str,
    ) -> Option<(PaymentFailure, String)> {
        if !is_valid_address(recipient_address) {
            return Some((
                PaymentFailure::InvalidAddress,
                format!("`{recipient_address}` is not a 0x-prefixed 20-byte address"),
            ));
        }
        if amount <= Decimal::ZERO {
            return Some((
                PaymentFailure::SubmissionRejected,
                format!("amount must be positive, got {amount}"),
            ));
        }

        let payer = self.ledger.payer_address();
        match self.ledger.get_balance(&payer).await {
            Ok(balance) if balance < amount => Some((
                PaymentFailure::InsufficientFunds,
                LedgerError::InsufficientFunds { available: balance, required: amount }.to_string(),
            )),
            Ok(_) => None,
            Err(error) => Some((PaymentFailure::NetworkUnavailable, error.to_string())),
        }
    }

    async fn await_confirmation(
        &self,
        attempt: &mut PaymentAttempt,
        reference: &str,
        cancel: &CancellationToken,
    ) -> PaymentState {
        let deadline = Instant::now() + self.settings.confirmation_timeout;
        let mut query_failures = 0_u32;
        let mut not_found = 0_u32;

        loop {
            attempt.polls += 1;
            let receipt =
                tokio::time::timeout_at(deadline, self.ledger.get_receipt(reference)).await;
            match receipt {
                Ok(Ok(ReceiptStatus::Confirmed { block_reference })) => {
                    return PaymentState::Confirmed { block_reference };
                }
                Ok(Ok(ReceiptStatus::Reverted)) => return PaymentState::Reverted,
                Ok(Ok(ReceiptStatus::Pending)) | Ok(Err(LedgerError::NotFound(_))) => {
                    not_found += 1;
                    query_failures = 0;
                }
                Ok(Err(error)) => {
                    query_failures += 1;
                    attempt.last_error = Some(error.to_string());
                    warn!(
                        event_name = "payment.poll.query_failed",
                        transaction_reference = reference,
                        consecutive_failures = query_failures,
                        error = %error,
                        "receipt query failed, will retry"
                    );
                }
                Err(_elapsed) => break,
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let wait = self.settings.poll_interval.min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(
                        event_name = "payment.poll.cancelled",
                        transaction_reference = reference,
                        polls = attempt.polls,
                        "confirmation wait cancelled"
                    );
                    return PaymentState::TimedOut;
                }
                _ = tokio::time::sleep(wait) => {}
            }
            if Instant::now() >= deadline {
                break;
            }
        }

        warn!(
            event_name = "payment.poll.timed_out",
            transaction_reference = reference,
            polls = attempt.polls,
            not_found,
            "no receipt before the confirmation ceiling"
        );
        PaymentState::TimedOut
    }

    async fn finish_failed(
        &self,
        session_id: &SessionId,
        mut attempt: PaymentAttempt,
        failure: PaymentFailure,
        detail: String,
    ) -> Result<PaymentAttempt, PaymentError> {
        warn!(
            event_name = "payment.submit.failed",
            session_id = %session_id,
            attempt_id = %attempt.id.0,
            failure = failure.as_str(),
            detail = %detail,
            "payment failed before settlement"
        );
        attempt.mark_failed(failure, detail)?;
        self.journal(session_id, &attempt).await?;
        Ok(attempt)
    }

    async fn journal(
        &self,
        session_id: &SessionId,
        attempt: &PaymentAttempt,
    ) -> Result<(), PaymentError> {
        self.journal
            .record_payment_attempt(session_id, attempt)
            .await
            .map_err(|source| PaymentError::Journal { attempt: Box::new(attempt.clone()), source })
    }
}

fn failure_for(error: &LedgerError) -> PaymentFailure {
    match error {
        LedgerError::InvalidAddress(_) => PaymentFailure::InvalidAddress,
        LedgerError::InsufficientFunds { .. } => PaymentFailure::InsufficientFunds,
        LedgerError::NetworkUnavailable(_) => PaymentFailure::NetworkUnavailable,
        LedgerError::Rejected(_) | LedgerError::NotFound(_) => PaymentFailure::SubmissionRejected,
    }
}
