use std::collections::BTreeMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use purser_core::domain::negotiation::{Decision, ExtractedFacts, NegotiationContext};
use purser_core::domain::payment::{PaymentAttempt, PaymentFailure, PaymentState};
use purser_core::domain::session::{SessionId, SessionRecord};
use purser_core::errors::{ApplicationError, DomainError};
use purser_core::payment::{PaymentError, PaymentExecutor};
use purser_db::{SessionLocks, SessionStore, StoreError};

use crate::decision::{DecisionEngine, Verdict};
use crate::facts::FactExtractor;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Payment(#[from] PaymentError),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl From<RuntimeError> for ApplicationError {
    fn from(value: RuntimeError) -> Self {
        match value {
            RuntimeError::Store(error) => error.into(),
            RuntimeError::Payment(error) => error.into(),
            RuntimeError::Domain(error) => Self::Domain(error),
        }
    }
}

/// Result of one counterparty message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TurnOutcome {
    pub session_id: SessionId,
    pub rule: &'static str,
    pub decision: Decision,
    /// Text to send back to the counterparty.
    pub reply: String,
    pub payment: Option<PaymentAttempt>,
    pub ended: bool,
}

pub struct AgentRuntime {
    store: Arc<SessionStore>,
    executor: PaymentExecutor,
    engine: DecisionEngine,
    turn_locks: SessionLocks,
    history_window: usize,
}

impl AgentRuntime {
    pub fn new(
        store: Arc<SessionStore>,
        executor: PaymentExecutor,
        engine: DecisionEngine,
        history_window: usize,
    ) -> Self {
        Self { store, executor, engine, turn_locks: SessionLocks::default(), history_window }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn executor(&self) -> &PaymentExecutor {
        &self.executor
    }

    pub fn engine(&self) -> &DecisionEngine {
        &self.engine
    }

    /// Resolves the user's session and builds a validated context for it.
    pub async fn resolve_context(
        &self,
        user_id: &str,
        hint: Option<SessionId>,
        goal: &str,
        budget: Decimal,
    ) -> Result<NegotiationContext, RuntimeError> {
        let session_id = self.store.get_or_create(user_id, hint).await?;
        Ok(NegotiationContext::new(goal, budget, user_id, session_id)?)
    }

    /// Produces and records the buyer's first message.
    pub async fn open(&self, context: &NegotiationContext) -> Result<TurnOutcome, RuntimeError> {
        let _turn = self.turn_locks.acquire(&context.session_id).await;
        let decision = self.engine.opening(context);
        let reply = decision.message().unwrap_or_default();

        let mut annotations = BTreeMap::new();
        annotations.insert("rule".to_owned(), "opening".to_owned());
        annotations.insert("decision".to_owned(), decision.kind().to_owned());
        self.store.append_turn(&context.session_id, "", &reply, annotations).await?;

        info!(
            event_name = "agent.negotiation.opened",
            session_id = %context.session_id,
            goal = %context.goal,
            budget = %context.budget,
            "negotiation opened"
        );
        Ok(TurnOutcome {
            session_id: context.session_id.clone(),
            rule: "opening",
            decision,
            reply,
            payment: None,
            ended: false,
        })
    }

    pub async fn handle_turn(
        &self,
        context: &NegotiationContext,
        counterparty_text: &str,
    ) -> Result<TurnOutcome, RuntimeError> {
        self.handle_turn_with_cancellation(context, counterparty_text, CancellationToken::new())
            .await
    }

    /// Extracts facts, decides, pays if told to, and records the turn.
    ///
    /// Turns for one session run strictly one after another. `cancel` only
    /// shortens a confirmation wait; the attempt still ends `TimedOut`.
    pub async fn handle_turn_with_cancellation(
        &self,
        context: &NegotiationContext,
        counterparty_text: &str,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome, RuntimeError> {
        let session_id = &context.session_id;
        let _turn = self.turn_locks.acquire(session_id).await;

        let mut session = self.store.read(session_id).await?;
        if self.reconcile_timed_out(&session).await? {
            session = self.store.read(session_id).await?;
        }

        let (facts, verdict) = self.assess(context, counterparty_text, &session);
        log_ambiguities(session_id, &facts);
        info!(
            event_name = "agent.turn.decided",
            session_id = %session_id,
            rule = verdict.rule,
            decision = verdict.decision.kind(),
            guard_reason = verdict.guard_reason.unwrap_or("none"),
            "decision made"
        );

        let payment = match &verdict.decision {
            Decision::ExecutePayment { amount, recipient_address } => Some(
                self.executor
                    .submit_with_cancellation(session_id, *amount, recipient_address, cancel)
                    .await?,
            ),
            _ => None,
        };
        let reply = match &payment {
            Some(attempt) => self.payment_report(attempt),
            None => verdict.decision.message().unwrap_or_default(),
        };

        let annotations = turn_annotations(&verdict, &facts, payment.as_ref());
        self.store.append_turn(session_id, counterparty_text, &reply, annotations).await?;

        Ok(TurnOutcome {
            session_id: session_id.clone(),
            rule: verdict.rule,
            ended: matches!(verdict.decision, Decision::EndConversation { .. }),
            decision: verdict.decision,
            reply,
            payment,
        })
    }

    /// Decides what the buyer would do with `counterparty_text` without
    /// paying or recording anything.
    pub async fn preview(
        &self,
        context: &NegotiationContext,
        counterparty_text: &str,
    ) -> Result<(ExtractedFacts, Verdict), RuntimeError> {
        let session = self.store.read(&context.session_id).await?;
        Ok(self.assess(context, counterparty_text, &session))
    }

    fn assess(
        &self,
        context: &NegotiationContext,
        counterparty_text: &str,
        session: &SessionRecord,
    ) -> (ExtractedFacts, Verdict) {
        let history = session.recent_counterparty_text(self.history_window);
        let facts = FactExtractor::for_context(context).extract(counterparty_text, &history);
        let verdict = self.engine.evaluate(context, &facts, counterparty_text, session);
        (facts, verdict)
    }

    /// Gives a timed-out transfer one more look before anything can retry it.
    /// Returns whether the stored attempt changed.
    async fn reconcile_timed_out(&self, session: &SessionRecord) -> Result<bool, RuntimeError> {
        if session.blocking_attempt().is_some() {
            return Ok(false);
        }
        let Some(attempt) = session.latest_timed_out().cloned() else {
            return Ok(false);
        };
        let reconciled = self.executor.reconcile(&session.session_id, attempt).await?;
        Ok(reconciled.state != PaymentState::TimedOut)
    }

    fn payment_report(&self, attempt: &PaymentAttempt) -> String {
        let currency = &self.engine.terms().currency;
        let reference = attempt.transaction_reference.as_deref().unwrap_or("unavailable");
        match &attempt.state {
            PaymentState::Confirmed { block_reference } => format!(
                "Payment sent: ${} {currency} to {}. Transaction reference: {reference} \
                 (confirmed in block {block_reference}).",
                attempt.amount, attempt.recipient_address
            ),
            PaymentState::Reverted => format!(
                "My payment of ${} {currency} to {} was reverted on-chain (transaction {reference}). \
                 Please double-check the wallet address.",
                attempt.amount, attempt.recipient_address
            ),
            PaymentState::TimedOut => format!(
                "My payment of ${} {currency} was broadcast but is not confirmed yet. \
                 Transaction reference: {reference}",
                attempt.amount
            ),
            PaymentState::Failed { failure } => format!(
                "I couldn't send the payment of ${} {currency}: {}.",
                attempt.amount,
                failure_reason(*failure)
            ),
            PaymentState::Pending | PaymentState::Submitted => format!(
                "My payment of ${} {currency} is still processing. Transaction reference: {reference}",
                attempt.amount
            ),
        }
    }
}

fn failure_reason(failure: PaymentFailure) -> &'static str {
    match failure {
        PaymentFailure::InvalidAddress => "the wallet address is not valid",
        PaymentFailure::InsufficientFunds => "my wallet balance is too low",
        PaymentFailure::NetworkUnavailable => "the network is unavailable right now",
        PaymentFailure::SubmissionRejected => "the network rejected the transfer",
    }
}

fn log_ambiguities(session_id: &SessionId, facts: &ExtractedFacts) {
    for kind in &facts.ambiguities {
        warn!(
            event_name = "agent.extraction.ambiguous",
            session_id = %session_id,
            fact = kind.as_str(),
            "several candidates found, using the leftmost"
        );
    }
}

fn turn_annotations(
    verdict: &Verdict,
    facts: &ExtractedFacts,
    payment: Option<&PaymentAttempt>,
) -> BTreeMap<String, String> {
    let mut annotations = BTreeMap::new();
    annotations.insert("rule".to_owned(), verdict.rule.to_owned());
    annotations.insert("decision".to_owned(), verdict.decision.kind().to_owned());
    if let Some(reason) = verdict.guard_reason {
        annotations.insert("guard_reason".to_owned(), reason.to_owned());
    }
    if !facts.ambiguities.is_empty() {
        let kinds: Vec<&str> = facts.ambiguities.iter().map(|kind| kind.as_str()).collect();
        annotations.insert("ambiguities".to_owned(), kinds.join(","));
    }
    if let Some(attempt) = payment {
        annotations.insert("payment_attempt_id".to_owned(), attempt.id.0.clone());
        annotations.insert("payment_state".to_owned(), attempt.state.as_str().to_owned());
        if let Some(reference) = &attempt.transaction_reference {
            annotations.insert("transaction_reference".to_owned(), reference.clone());
        }
    }
    annotations
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use rust_decimal::Decimal;

    use purser_core::domain::negotiation::Decision;
    use purser_core::domain::payment::{PaymentAttempt, PaymentState};
    use purser_core::payment::ledger::{LedgerClient, LedgerError, ReceiptStatus};
    use purser_core::payment::{PaymentExecutor, PaymentJournal, PaymentSettings};
    use purser_db::{InMemorySessionRepository, SessionStore};

    use super::AgentRuntime;
    use crate::decision::DecisionEngine;

    const WALLET: &str = "0xABCDEF0123456789ABCDEF0123456789ABCDEF01";
    const REFERENCE: &str = "0x4444444444444444444444444444444444444444444444444444444444444444";

    struct LateLedger {
        receipt: Mutex<ReceiptStatus>,
        submissions: Mutex<u32>,
    }

    #[async_trait]
    impl LedgerClient for LateLedger {
        fn payer_address(&self) -> String {
            "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf".to_owned()
        }

        async fn get_balance(&self, _owner: &str) -> Result<Decimal, LedgerError> {
            Ok(Decimal::new(500, 0))
        }

        async fn submit_transfer(&self, _to: &str, _amount: Decimal) -> Result<String, LedgerError> {
            *self.submissions.lock().expect("lock") += 1;
            Ok(REFERENCE.to_owned())
        }

        async fn get_receipt(&self, _reference: &str) -> Result<ReceiptStatus, LedgerError> {
            Ok(self.receipt.lock().expect("lock").clone())
        }
    }

    fn runtime(ledger: Arc<LateLedger>) -> AgentRuntime {
        let store = Arc::new(SessionStore::new(Arc::new(InMemorySessionRepository::default()), 0));
        let journal: Arc<dyn PaymentJournal> = store.clone();
        let executor = PaymentExecutor::new(ledger, journal, PaymentSettings::default());
        AgentRuntime::new(store, executor, DecisionEngine::default(), 6)
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_payment_is_reconciled_before_retrying() {
        let ledger = Arc::new(LateLedger {
            receipt: Mutex::new(ReceiptStatus::Pending),
            submissions: Mutex::new(0),
        });
        let runtime = runtime(ledger.clone());
        let context = runtime
            .resolve_context("buyer", None, "headphones", Decimal::new(100, 0))
            .await
            .expect("context");

        let first = runtime
            .handle_turn(&context, &format!("$60 to {WALLET}"))
            .await
            .expect("first turn");
        assert_eq!(
            first.payment.as_ref().map(|attempt| &attempt.state),
            Some(&PaymentState::TimedOut)
        );
        assert!(first.reply.contains(REFERENCE));

        *ledger.receipt.lock().expect("lock") =
            ReceiptStatus::Confirmed { block_reference: "12".into() };
        let second = runtime
            .handle_turn(&context, &format!("Payment not found. Resend $60 to {WALLET}"))
            .await
            .expect("second turn");

        assert!(!matches!(second.decision, Decision::ExecutePayment { .. }));
        assert_eq!(second.rule, "retry_payment");
        assert_eq!(*ledger.submissions.lock().expect("lock"), 1);

        let session = runtime.store().read(&context.session_id).await.expect("read");
        let attempts: Vec<&PaymentAttempt> = session.payment_attempts.iter().collect();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].state.block_reference(), Some("12"));
        assert_eq!(
            session.conversation_history[1].annotations.get("guard_reason").map(String::as_str),
            Some("payment_already_confirmed")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unsettled_timed_out_payment_blocks_a_retry_until_it_reverts() {
        let ledger = Arc::new(LateLedger {
            receipt: Mutex::new(ReceiptStatus::Pending),
            submissions: Mutex::new(0),
        });
        let runtime = runtime(ledger.clone());
        let context = runtime
            .resolve_context("buyer", None, "headphones", Decimal::new(100, 0))
            .await
            .expect("context");

        runtime.handle_turn(&context, &format!("$60 to {WALLET}")).await.expect("first turn");
        let retry = format!("Payment not found. Resend $60 to {WALLET}");

        let blocked = runtime.handle_turn(&context, &retry).await.expect("second turn");
        assert_eq!(blocked.rule, "retry_payment");
        assert!(!matches!(blocked.decision, Decision::ExecutePayment { .. }));
        assert!(blocked.reply.contains(REFERENCE));
        assert_eq!(*ledger.submissions.lock().expect("lock"), 1);

        let session = runtime.store().read(&context.session_id).await.expect("read");
        assert_eq!(session.payment_attempts[0].state, PaymentState::TimedOut);
        assert_eq!(
            session.conversation_history[1].annotations.get("guard_reason").map(String::as_str),
            Some("payment_unresolved")
        );

        *ledger.receipt.lock().expect("lock") = ReceiptStatus::Reverted;
        let resent = runtime.handle_turn(&context, &retry).await.expect("third turn");
        assert!(matches!(resent.decision, Decision::ExecutePayment { .. }));
        assert_eq!(*ledger.submissions.lock().expect("lock"), 2);
    }

    #[tokio::test]
    async fn unavailable_product_ends_the_turn_loop() {
        let ledger = Arc::new(LateLedger {
            receipt: Mutex::new(ReceiptStatus::Pending),
            submissions: Mutex::new(0),
        });
        let runtime = runtime(ledger);
        let context = runtime
            .resolve_context("buyer", None, "headphones", Decimal::new(100, 0))
            .await
            .expect("context");

        let outcome =
            runtime.handle_turn(&context, "Sorry, we don't have headphones").await.expect("turn");

        assert!(outcome.ended);
        assert_eq!(outcome.reply, "Okay, thank you. I'm only looking for that specific item.");
    }

    #[tokio::test]
    async fn preview_decides_without_paying_or_recording() {
        let ledger = Arc::new(LateLedger {
            receipt: Mutex::new(ReceiptStatus::Pending),
            submissions: Mutex::new(0),
        });
        let runtime = runtime(ledger.clone());
        let context = runtime
            .resolve_context("buyer", None, "headphones", Decimal::new(100, 0))
            .await
            .expect("context");

        let (facts, verdict) =
            runtime.preview(&context, &format!("$60, send to {WALLET}")).await.expect("preview");

        assert_eq!(facts.price, Some(Decimal::new(60, 0)));
        assert!(matches!(verdict.decision, Decision::ExecutePayment { .. }));
        assert_eq!(*ledger.submissions.lock().expect("lock"), 0);
        let session = runtime.store().read(&context.session_id).await.expect("read");
        assert!(session.conversation_history.is_empty());
        assert!(session.payment_attempts.is_empty());
    }
}
