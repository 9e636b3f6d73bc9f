use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use purser_core::config::NegotiationConfig;
use purser_core::domain::negotiation::{Decision, ExtractedFacts, NegotiationContext};
use purser_core::domain::session::SessionRecord;

use crate::facts::contains_any;
use crate::guardrails::{over_budget_message, PaymentGuard, PaymentGuardDecision};

const SHIPPING_REQUEST_PHRASES: &[&str] = &[
    "shipping address",
    "delivery address",
    "full name",
    "street address",
    "shipping details",
    "provide",
];
const RETRY_PHRASES: &[&str] =
    &["payment failed", "transaction hash", "not found", "invalid", "timeout", "timed out"];
const REFERENCE_REQUEST_PHRASES: &[&str] = &["hash", "transaction reference", "tx reference"];
const PAYMENT_KEYWORDS: &[&str] = &["payment", "usdt", "wallet"];
const AVAILABILITY_KEYWORDS: &[&str] = &["in stock", "stock", "inventory", "available"];

pub const UNKNOWN_REFERENCE: &str = "reference-unknown";

/// How this buyer pays. Fixed per deployment, not per negotiation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementTerms {
    pub currency: String,
    pub network: String,
}

impl Default for SettlementTerms {
    fn default() -> Self {
        Self { currency: "USDT".to_owned(), network: "Sepolia".to_owned() }
    }
}

impl From<&NegotiationConfig> for SettlementTerms {
    fn from(config: &NegotiationConfig) -> Self {
        Self { currency: config.currency.clone(), network: config.network.clone() }
    }
}

/// The decision plus the name of the rule that produced it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub rule: &'static str,
    pub decision: Decision,
    /// Set when a payment rule fired but the guard turned it into a message.
    pub guard_reason: Option<&'static str>,
}

struct Turn<'a> {
    terms: &'a SettlementTerms,
    context: &'a NegotiationContext,
    facts: &'a ExtractedFacts,
    raw_text: &'a str,
    lowered: String,
    session: &'a SessionRecord,
}

struct Rule {
    name: &'static str,
    apply: fn(&Turn<'_>) -> Option<Verdict>,
}

/// First match wins. Reordering these changes negotiation behavior.
const RULES: &[Rule] = &[
    Rule { name: "shipping_after_payment", apply: shipping_after_payment },
    Rule { name: "payment_confirmed", apply: payment_confirmed },
    Rule { name: "retry_payment", apply: retry_payment },
    Rule { name: "reference_requested", apply: reference_requested },
    Rule { name: "pay_when_ready", apply: pay_when_ready },
    Rule { name: "confirm_price", apply: confirm_price },
    Rule { name: "price_offered", apply: price_offered },
    Rule { name: "request_wallet", apply: request_wallet },
    Rule { name: "in_stock", apply: in_stock },
    Rule { name: "unavailable", apply: unavailable },
    Rule { name: "restate_requirement", apply: restate_requirement },
];

#[derive(Clone, Debug, Default)]
pub struct DecisionEngine {
    terms: SettlementTerms,
    guard: PaymentGuard,
}

impl DecisionEngine {
    pub fn new(terms: SettlementTerms) -> Self {
        Self { terms, guard: PaymentGuard }
    }

    pub fn terms(&self) -> &SettlementTerms {
        &self.terms
    }

    /// First message of a negotiation, before the counterparty has said anything.
    pub fn opening(&self, context: &NegotiationContext) -> Decision {
        Decision::send(format!(
            "I want to buy {}. Do you have it in stock? My budget is ${}.",
            context.goal, context.budget
        ))
    }

    pub fn decide(
        &self,
        context: &NegotiationContext,
        facts: &ExtractedFacts,
        counterparty_text: &str,
        session: &SessionRecord,
    ) -> Decision {
        self.evaluate(context, facts, counterparty_text, session).decision
    }

    /// Runs the rule list. Total: the last rule always fires.
    pub fn evaluate(
        &self,
        context: &NegotiationContext,
        facts: &ExtractedFacts,
        counterparty_text: &str,
        session: &SessionRecord,
    ) -> Verdict {
        let turn = Turn {
            terms: &self.terms,
            context,
            facts,
            raw_text: counterparty_text,
            lowered: counterparty_text.to_lowercase(),
            session,
        };

        let verdict = RULES
            .iter()
            .find_map(|rule| {
                (rule.apply)(&turn).map(|mut verdict| {
                    verdict.rule = rule.name;
                    verdict
                })
            })
            .unwrap_or_else(|| Verdict {
                rule: "restate_requirement",
                decision: restate(context),
                guard_reason: None,
            });

        match verdict.decision {
            Decision::ExecutePayment { amount, .. } => self.guarded(verdict, context, amount, session),
            _ => verdict,
        }
    }

    fn guarded(
        &self,
        verdict: Verdict,
        context: &NegotiationContext,
        amount: Decimal,
        session: &SessionRecord,
    ) -> Verdict {
        match self.guard.evaluate(context, amount, session) {
            PaymentGuardDecision::Allow => verdict,
            PaymentGuardDecision::Deny { reason_code, user_message } => Verdict {
                rule: verdict.rule,
                decision: Decision::send(user_message),
                guard_reason: Some(reason_code),
            },
        }
    }
}

fn verdict(decision: Decision) -> Option<Verdict> {
    Some(Verdict { rule: "", decision, guard_reason: None })
}

fn pay(amount: Decimal, recipient_address: &str) -> Option<Verdict> {
    verdict(Decision::ExecutePayment { amount, recipient_address: recipient_address.to_owned() })
}

fn known_reference<'a>(turn: &'a Turn<'_>) -> Option<&'a str> {
    turn.session
        .known_transaction_reference()
        .or(turn.facts.transaction_reference.as_deref())
}

fn restate(context: &NegotiationContext) -> Decision {
    Decision::send(format!(
        "I specifically need {}. Do you have this exact product and what's the price?",
        context.goal
    ))
}

fn shipping_after_payment(turn: &Turn<'_>) -> Option<Verdict> {
    turn.session.blocking_attempt()?;
    if !contains_any(&turn.lowered, SHIPPING_REQUEST_PHRASES) {
        return None;
    }
    let reference = known_reference(turn).unwrap_or(UNKNOWN_REFERENCE);
    verdict(Decision::ProvideShippingReference { transaction_reference: reference.to_owned() })
}

fn payment_confirmed(turn: &Turn<'_>) -> Option<Verdict> {
    if !turn.facts.confirmation_signal {
        return None;
    }
    match known_reference(turn) {
        Some(reference) => verdict(Decision::ProvideShippingReference {
            transaction_reference: reference.to_owned(),
        }),
        None => verdict(Decision::send(
            "Great! Payment confirmed. Please let me provide my shipping address for delivery.",
        )),
    }
}

fn retry_payment(turn: &Turn<'_>) -> Option<Verdict> {
    if !contains_any(&turn.lowered, RETRY_PHRASES) {
        return None;
    }
    let address = turn.facts.recipient_address.as_deref()?;
    let price = turn.facts.price?;
    if price > turn.context.budget {
        return None;
    }
    pay(price, address)
}

fn reference_requested(turn: &Turn<'_>) -> Option<Verdict> {
    if !contains_any(&turn.lowered, REFERENCE_REQUEST_PHRASES) {
        return None;
    }
    let address = turn.facts.recipient_address.as_deref()?;
    let price = turn.facts.price?;
    pay(price, address)
}

fn pay_when_ready(turn: &Turn<'_>) -> Option<Verdict> {
    let address = turn.facts.recipient_address.as_deref()?;
    let price = turn.facts.price?;
    if turn.session.blocking_attempt().is_some() {
        return None;
    }
    if price > turn.context.budget {
        return verdict(Decision::send(over_budget_message(turn.context, price)));
    }
    pay(price, address)
}

fn confirm_price(turn: &Turn<'_>) -> Option<Verdict> {
    turn.facts.recipient_address.as_ref()?;
    if turn.facts.price.is_some() {
        return None;
    }
    verdict(Decision::send(format!(
        "I see your wallet address. Just to confirm, the total for {} is how much? \
         I'll send the {} payment once confirmed.",
        turn.context.goal, turn.terms.currency
    )))
}

fn price_offered(turn: &Turn<'_>) -> Option<Verdict> {
    if !turn.facts.product_mentioned {
        return None;
    }
    if !turn.raw_text.contains('$') && !turn.lowered.contains("price") {
        return None;
    }
    let context = turn.context;
    let text = match turn.facts.price {
        Some(price) if price <= context.budget => format!(
            "Perfect! I'll take the {} for ${price}. Please provide your {} {} wallet address \
             so I can send the payment.",
            context.goal, turn.terms.network, turn.terms.currency
        ),
        Some(price) => over_budget_message(context, price),
        None => format!("What's the price for {}?", context.goal),
    };
    verdict(Decision::send(text))
}

fn request_wallet(turn: &Turn<'_>) -> Option<Verdict> {
    if turn.facts.recipient_address.is_some() || !contains_any(&turn.lowered, PAYMENT_KEYWORDS) {
        return None;
    }
    verdict(Decision::send(format!(
        "I can pay with {} on {}. Please provide your {} wallet address.",
        turn.terms.currency, turn.terms.network, turn.terms.network
    )))
}

fn in_stock(turn: &Turn<'_>) -> Option<Verdict> {
    if !turn.facts.product_mentioned
        || turn.facts.unavailable_signal
        || !contains_any(&turn.lowered, AVAILABILITY_KEYWORDS)
    {
        return None;
    }
    verdict(Decision::send(format!("Great! What's the price for {}?", turn.context.goal)))
}

fn unavailable(turn: &Turn<'_>) -> Option<Verdict> {
    if !turn.facts.unavailable_signal {
        return None;
    }
    verdict(Decision::EndConversation {
        text: "Okay, thank you. I'm only looking for that specific item.".to_owned(),
    })
}

fn restate_requirement(turn: &Turn<'_>) -> Option<Verdict> {
    verdict(restate(turn.context))
}
