use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rust_decimal::Decimal;

use purser_agent::{AgentRuntime, DecisionEngine};
use purser_core::domain::negotiation::Decision;
use purser_core::domain::payment::PaymentState;
use purser_core::payment::ledger::{LedgerClient, LedgerError, ReceiptStatus};
use purser_core::payment::{PaymentExecutor, PaymentJournal, PaymentSettings};
use purser_db::{InMemorySessionRepository, SessionStore};

const WALLET: &str = "0xABCDEF0123456789ABCDEF0123456789ABCDEF01";
const REFERENCE: &str = "0x5555555555555555555555555555555555555555555555555555555555555555";

#[derive(Default)]
struct ConfirmingLedger {
    transfers: Mutex<Vec<(String, Decimal)>>,
}

#[async_trait]
impl LedgerClient for ConfirmingLedger {
    fn payer_address(&self) -> String {
        "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf".to_owned()
    }

    async fn get_balance(&self, _owner: &str) -> Result<Decimal, LedgerError> {
        Ok(Decimal::new(1_000, 0))
    }

    async fn submit_transfer(&self, recipient: &str, amount: Decimal) -> Result<String, LedgerError> {
        self.transfers.lock().expect("lock").push((recipient.to_owned(), amount));
        Ok(REFERENCE.to_owned())
    }

    async fn get_receipt(&self, _reference: &str) -> Result<ReceiptStatus, LedgerError> {
        Ok(ReceiptStatus::Confirmed { block_reference: "6100200".to_owned() })
    }
}

fn build_runtime(ledger: Arc<ConfirmingLedger>) -> AgentRuntime {
    let store = Arc::new(SessionStore::new(Arc::new(InMemorySessionRepository::default()), 1));
    let journal: Arc<dyn PaymentJournal> = store.clone();
    let executor = PaymentExecutor::new(ledger, journal, PaymentSettings::default());
    AgentRuntime::new(store, executor, DecisionEngine::default(), 6)
}

#[tokio::test(start_paused = true)]
async fn headphones_negotiation_pays_once_and_hands_over_reference() {
    let ledger = Arc::new(ConfirmingLedger::default());
    let runtime = build_runtime(ledger.clone());
    let context = runtime
        .resolve_context("alice", None, "headphones", Decimal::new(75, 0))
        .await
        .expect("context");

    let opening = runtime.open(&context).await.expect("open");
    assert_eq!(
        opening.reply,
        "I want to buy headphones. Do you have it in stock? My budget is $75."
    );

    let first = runtime.handle_turn(&context, "Do you have the headphones?").await.expect("turn 1");
    assert!(matches!(first.decision, Decision::SendMessage { .. }));
    assert!(first.payment.is_none());

    let second = runtime
        .handle_turn(&context, &format!("Yes, $60. Wallet: {WALLET}"))
        .await
        .expect("turn 2");
    assert_eq!(
        second.decision,
        Decision::ExecutePayment { amount: Decimal::new(60, 0), recipient_address: WALLET.to_owned() }
    );
    let attempt = second.payment.expect("payment attempted");
    assert_eq!(attempt.state, PaymentState::Confirmed { block_reference: "6100200".to_owned() });
    assert!(second.reply.contains(REFERENCE));

    let third = runtime
        .handle_turn(&context, "Got it. Please provide your shipping address.")
        .await
        .expect("turn 3");
    assert_eq!(
        third.decision,
        Decision::ProvideShippingReference { transaction_reference: REFERENCE.to_owned() }
    );

    let fourth = runtime
        .handle_turn(&context, &format!("Can you send $60 to {WALLET} again?"))
        .await
        .expect("turn 4");
    assert!(!matches!(fourth.decision, Decision::ExecutePayment { .. }));

    assert_eq!(ledger.transfers.lock().expect("lock").len(), 1);

    let session = runtime.store().read(&context.session_id).await.expect("read");
    assert_eq!(session.conversation_history.len(), 5);
    assert_eq!(session.payment_attempts.len(), 1);
    assert!(session.has_confirmed_payment());
    assert_eq!(
        session.conversation_history[2].annotations.get("transaction_reference").map(String::as_str),
        Some(REFERENCE)
    );
}

#[tokio::test]
async fn separate_users_keep_separate_sessions() {
    let runtime = build_runtime(Arc::new(ConfirmingLedger::default()));

    let alice = runtime
        .resolve_context("alice", None, "headphones", Decimal::new(75, 0))
        .await
        .expect("alice");
    let bob = runtime
        .resolve_context("bob", None, "keyboard", Decimal::new(40, 0))
        .await
        .expect("bob");
    assert_ne!(alice.session_id, bob.session_id);

    runtime.handle_turn(&alice, "Do you have the headphones?").await.expect("alice turn");

    let bob_session = runtime.store().read(&bob.session_id).await.expect("read bob");
    assert!(bob_session.conversation_history.is_empty());

    let again = runtime
        .resolve_context("alice", None, "headphones", Decimal::new(75, 0))
        .await
        .expect("alice again");
    assert_eq!(again.session_id, alice.session_id);
}
