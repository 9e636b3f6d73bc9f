use rust_decimal::Decimal;

use purser_core::domain::negotiation::NegotiationContext;
use purser_core::domain::payment::PaymentState;
use purser_core::domain::session::SessionRecord;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymentGuardDecision {
    Allow,
    Deny { reason_code: &'static str, user_message: String },
}

impl PaymentGuardDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Last check before any transfer is requested.
///
/// Decisions rest on the typed attempt history only, never on conversation
/// text, so an echoed "payment successful" cannot block or unblock a payment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PaymentGuard;

impl PaymentGuard {
    pub fn evaluate(
        &self,
        context: &NegotiationContext,
        amount: Decimal,
        session: &SessionRecord,
    ) -> PaymentGuardDecision {
        if amount > context.budget {
            return PaymentGuardDecision::Deny {
                reason_code: "budget_exceeded",
                user_message: over_budget_message(context, amount),
            };
        }

        match session.blocking_attempt() {
            None => match session.latest_timed_out() {
                // Its transfer may still be mined.
                Some(attempt) => PaymentGuardDecision::Deny {
                    reason_code: "payment_unresolved",
                    user_message: format!(
                        "My earlier payment of ${} hasn't settled yet (transaction {}). \
                         I won't send another until it confirms or fails on-chain.",
                        attempt.amount,
                        attempt.transaction_reference.as_deref().unwrap_or("unavailable"),
                    ),
                },
                None => PaymentGuardDecision::Allow,
            },
            Some(attempt) => match &attempt.state {
                PaymentState::Confirmed { .. } => PaymentGuardDecision::Deny {
                    reason_code: "payment_already_confirmed",
                    user_message: format!(
                        "I already paid ${} for {}. Transaction reference: {}",
                        attempt.amount,
                        context.goal,
                        attempt.transaction_reference.as_deref().unwrap_or("unavailable"),
                    ),
                },
                _ => PaymentGuardDecision::Deny {
                    reason_code: "payment_in_flight",
                    user_message: match attempt.transaction_reference.as_deref() {
                        Some(reference) => format!(
                            "My payment of ${} is still confirming (transaction {reference}). \
                             I'll follow up once it settles.",
                            attempt.amount
                        ),
                        None => format!(
                            "My payment of ${} is still being processed. I'll follow up shortly.",
                            attempt.amount
                        ),
                    },
                },
            },
        }
    }
}

pub(crate) fn over_budget_message(context: &NegotiationContext, price: Decimal) -> String {
    format!(
        "${price} is over my ${} budget. Do you have {} at a lower price?",
        context.budget, context.goal
    )
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use purser_core::domain::negotiation::NegotiationContext;
    use purser_core::domain::payment::{PaymentAttempt, PaymentFailure, PaymentState};
    use purser_core::domain::session::{SessionId, SessionRecord};

    use super::{PaymentGuard, PaymentGuardDecision};

    const RECIPIENT: &str = "0xABCDEF0123456789ABCDEF0123456789ABCDEF01";
    const REFERENCE: &str = "0x2222222222222222222222222222222222222222222222222222222222222222";

    fn context() -> NegotiationContext {
        NegotiationContext::new("headphones", Decimal::new(100, 0), "buyer", SessionId("buyer_1".into()))
            .expect("valid context")
    }

    fn session_with(attempt: Option<PaymentAttempt>) -> SessionRecord {
        let mut record = SessionRecord::new(SessionId("buyer_1".into()), Some("buyer".into()));
        if let Some(attempt) = attempt {
            record.upsert_payment_attempt(attempt);
        }
        record
    }

    fn reason(decision: PaymentGuardDecision) -> Option<&'static str> {
        match decision {
            PaymentGuardDecision::Allow => None,
            PaymentGuardDecision::Deny { reason_code, .. } => Some(reason_code),
        }
    }

    #[test]
    fn budget_boundary_is_inclusive() {
        let guard = PaymentGuard;
        let session = session_with(None);

        assert!(guard.evaluate(&context(), Decimal::new(100, 0), &session).is_allowed());
        assert_eq!(
            reason(guard.evaluate(&context(), Decimal::new(10_001, 2), &session)),
            Some("budget_exceeded")
        );
    }

    #[test]
    fn submitted_attempt_blocks_another_payment() {
        let mut attempt = PaymentAttempt::pending(Decimal::new(60, 0), RECIPIENT);
        attempt.mark_submitted(REFERENCE.to_owned()).expect("submit");

        let decision = PaymentGuard.evaluate(&context(), Decimal::new(60, 0), &session_with(Some(attempt)));

        match decision {
            PaymentGuardDecision::Deny { reason_code, user_message } => {
                assert_eq!(reason_code, "payment_in_flight");
                assert!(user_message.contains(REFERENCE));
            }
            PaymentGuardDecision::Allow => panic!("in-flight payment must block"),
        }
    }

    #[test]
    fn confirmed_attempt_blocks_and_quotes_reference() {
        let mut attempt = PaymentAttempt::pending(Decimal::new(60, 0), RECIPIENT);
        attempt.mark_submitted(REFERENCE.to_owned()).expect("submit");
        attempt
            .transition_to(PaymentState::Confirmed { block_reference: "42".into() })
            .expect("confirm");

        let decision = PaymentGuard.evaluate(&context(), Decimal::new(60, 0), &session_with(Some(attempt)));

        assert_eq!(reason(decision.clone()), Some("payment_already_confirmed"));
        let PaymentGuardDecision::Deny { user_message, .. } = decision else {
            panic!("confirmed payment must block");
        };
        assert!(user_message.ends_with(REFERENCE));
    }

    #[test]
    fn unresolved_timed_out_attempt_blocks_until_it_settles() {
        let mut attempt = PaymentAttempt::pending(Decimal::new(60, 0), RECIPIENT);
        attempt.mark_submitted(REFERENCE.to_owned()).expect("submit");
        attempt.transition_to(PaymentState::TimedOut).expect("time out");

        let decision =
            PaymentGuard.evaluate(&context(), Decimal::new(60, 0), &session_with(Some(attempt.clone())));
        assert_eq!(reason(decision.clone()), Some("payment_unresolved"));
        let PaymentGuardDecision::Deny { user_message, .. } = decision else {
            panic!("unresolved payment must block");
        };
        assert!(user_message.contains(REFERENCE));

        attempt.transition_to(PaymentState::Reverted).expect("revert");
        assert!(PaymentGuard
            .evaluate(&context(), Decimal::new(60, 0), &session_with(Some(attempt)))
            .is_allowed());
    }

    #[test]
    fn failed_attempt_allows_retry() {
        let mut attempt = PaymentAttempt::pending(Decimal::new(60, 0), RECIPIENT);
        attempt.mark_failed(PaymentFailure::NetworkUnavailable, "rpc down").expect("fail");

        assert!(PaymentGuard
            .evaluate(&context(), Decimal::new(60, 0), &session_with(Some(attempt)))
            .is_allowed());
    }
}
