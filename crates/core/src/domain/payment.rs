use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaymentAttemptId(pub String);

impl PaymentAttemptId {
    pub fn generate() -> Self {
        Self(format!("pay-{}", Uuid::new_v4()))
    }
}

/// Why a transfer never reached the ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentFailure {
    InvalidAddress,
    InsufficientFunds,
    NetworkUnavailable,
    SubmissionRejected,
}

impl PaymentFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidAddress => "invalid_address",
            Self::InsufficientFunds => "insufficient_funds",
            Self::NetworkUnavailable => "network_unavailable",
            Self::SubmissionRejected => "submission_rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "invalid_address" => Some(Self::InvalidAddress),
            "insufficient_funds" => Some(Self::InsufficientFunds),
            "network_unavailable" => Some(Self::NetworkUnavailable),
            "submission_rejected" => Some(Self::SubmissionRejected),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PaymentState {
    Pending,
    Submitted,
    Confirmed { block_reference: String },
    Reverted,
    TimedOut,
    Failed { failure: PaymentFailure },
}

impl PaymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::Confirmed { .. } => "confirmed",
            Self::Reverted => "reverted",
            Self::TimedOut => "timed_out",
            Self::Failed { .. } => "failed",
        }
    }

    /// Rebuilds a state from its storage columns.
    pub fn from_parts(
        state: &str,
        block_reference: Option<&str>,
        failure: Option<&str>,
    ) -> Option<Self> {
        match state.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "submitted" => Some(Self::Submitted),
            "confirmed" => {
                block_reference.map(|block| Self::Confirmed { block_reference: block.to_owned() })
            }
            "reverted" => Some(Self::Reverted),
            "timed_out" => Some(Self::TimedOut),
            "failed" => failure.and_then(PaymentFailure::parse).map(|failure| Self::Failed { failure }),
            _ => None,
        }
    }

    pub fn block_reference(&self) -> Option<&str> {
        match self {
            Self::Confirmed { block_reference } => Some(block_reference),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<PaymentFailure> {
        match self {
            Self::Failed { failure } => Some(*failure),
            _ => None,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Pending | Self::Submitted)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_in_flight()
    }

    /// An attempt in one of these states forbids issuing another transfer.
    pub fn blocks_new_payment(&self) -> bool {
        matches!(self, Self::Pending | Self::Submitted | Self::Confirmed { .. })
    }

    fn can_transition_to(&self, next: &PaymentState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Submitted)
                | (Self::Pending, Self::Failed { .. })
                | (Self::Submitted, Self::Confirmed { .. })
                | (Self::Submitted, Self::Reverted)
                | (Self::Submitted, Self::TimedOut)
                | (Self::TimedOut, Self::Confirmed { .. })
                | (Self::TimedOut, Self::Reverted)
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAttempt {
    pub id: PaymentAttemptId,
    pub amount: Decimal,
    pub recipient_address: String,
    pub state: PaymentState,
    pub transaction_reference: Option<String>,
    pub polls: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentAttempt {
    pub fn pending(amount: Decimal, recipient_address: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: PaymentAttemptId::generate(),
            amount,
            recipient_address: recipient_address.into(),
            state: PaymentState::Pending,
            transaction_reference: None,
            polls: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn transition_to(&mut self, next: PaymentState) -> Result<(), DomainError> {
        if !self.state.can_transition_to(&next) {
            return Err(DomainError::invalid_transition(&self.state, &next));
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn mark_submitted(&mut self, transaction_reference: String) -> Result<(), DomainError> {
        self.transition_to(PaymentState::Submitted)?;
        self.transaction_reference = Some(transaction_reference);
        Ok(())
    }

    pub fn mark_failed(
        &mut self,
        failure: PaymentFailure,
        detail: impl Into<String>,
    ) -> Result<(), DomainError> {
        self.transition_to(PaymentState::Failed { failure })?;
        self.last_error = Some(detail.into());
        Ok(())
    }
}
