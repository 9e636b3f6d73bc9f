use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::session::SessionId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiationContext {
    pub goal: String,
    pub budget: Decimal,
    pub user_id: String,
    pub session_id: SessionId,
}

impl NegotiationContext {
    pub fn new(
        goal: impl Into<String>,
        budget: Decimal,
        user_id: impl Into<String>,
        session_id: SessionId,
    ) -> Result<Self, DomainError> {
        let goal = goal.into();
        if goal.trim().is_empty() {
            return Err(DomainError::InvariantViolation("goal must not be empty".to_owned()));
        }
        if budget <= Decimal::ZERO {
            return Err(DomainError::InvariantViolation(format!(
                "budget must be positive, got {budget}"
            )));
        }
        Ok(Self { goal, budget, user_id: user_id.into(), session_id })
    }

    /// Lowercased goal words long enough to identify the product.
    pub fn goal_keywords(&self) -> Vec<String> {
        self.goal
            .split_whitespace()
            .filter(|word| word.chars().count() > 3)
            .map(str::to_lowercase)
            .collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactKind {
    Price,
    RecipientAddress,
    TransactionReference,
}

impl FactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Price => "price",
            Self::RecipientAddress => "recipient_address",
            Self::TransactionReference => "transaction_reference",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedFacts {
    pub price: Option<Decimal>,
    pub recipient_address: Option<String>,
    pub transaction_reference: Option<String>,
    pub confirmation_signal: bool,
    pub unavailable_signal: bool,
    pub product_mentioned: bool,
    /// Kinds whose winning text held more than one distinct candidate.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ambiguities: Vec<FactKind>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Decision {
    SendMessage { text: String },
    ExecutePayment { amount: Decimal, recipient_address: String },
    ProvideShippingReference { transaction_reference: String },
    EndConversation { text: String },
}

impl Decision {
    pub fn send(text: impl Into<String>) -> Self {
        Self::SendMessage { text: text.into() }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::SendMessage { .. } => "send_message",
            Self::ExecutePayment { .. } => "execute_payment",
            Self::ProvideShippingReference { .. } => "provide_shipping_reference",
            Self::EndConversation { .. } => "end_conversation",
        }
    }

    /// Text to relay to the counterparty, when the decision carries one directly.
    pub fn message(&self) -> Option<String> {
        match self {
            Self::SendMessage { text } | Self::EndConversation { text } => Some(text.clone()),
            Self::ProvideShippingReference { transaction_reference } => Some(format!(
                "Payment was already sent. Transaction reference: {transaction_reference}"
            )),
            Self::ExecutePayment { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{Decision, NegotiationContext};
    use crate::domain::session::SessionId;
    use crate::errors::DomainError;

    #[test]
    fn context_rejects_non_positive_budget() {
        let result = NegotiationContext::new(
            "Sony headphones",
            Decimal::ZERO,
            "buyer",
            SessionId("buyer_1".into()),
        );
        assert!(matches!(result, Err(DomainError::InvariantViolation(_))));
    }

    #[test]
    fn goal_keywords_skip_short_words() {
        let context = NegotiationContext::new(
            "Sony WH-1000XM5 for me",
            Decimal::new(100, 0),
            "buyer",
            SessionId("buyer_1".into()),
        )
        .expect("valid context");

        assert_eq!(context.goal_keywords(), vec!["sony".to_owned(), "wh-1000xm5".to_owned()]);
    }

    #[test]
    fn shipping_reference_message_quotes_the_reference() {
        let decision =
            Decision::ProvideShippingReference { transaction_reference: "0xabc".to_owned() };
        assert_eq!(
            decision.message().as_deref(),
            Some("Payment was already sent. Transaction reference: 0xabc")
        );
        assert_eq!(decision.kind(), "provide_shipping_reference");
    }
}
