use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use rust_decimal::Decimal;

use purser_core::domain::negotiation::{ExtractedFacts, FactKind, NegotiationContext};

/// `$60`, `$ 60`, `$1,299.99`. Thousands groups must be complete.
pub static PRICE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\s?(\d{1,3}(?:,\d{3})+|\d+)(?:\.(\d{1,2}))?\b").unwrap()
});

/// A whole 20-byte address token. The trailing boundary keeps a 32-byte
/// reference from matching on its first 40 digits.
pub static ADDRESS_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b0x[0-9a-fA-F]{40}\b").unwrap());

pub static REFERENCE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b0x[0-9a-fA-F]{64}\b").unwrap());

const CONFIRMATION_PHRASES: &[&str] =
    &["payment received", "payment confirmed", "transaction confirmed", "successfully received"];

const UNAVAILABLE_PHRASES: &[&str] = &["don't have", "do not have", "out of stock", "not available"];

/// Pulls negotiation facts out of counterparty text.
///
/// Extraction never looks at session state. The current message outranks
/// recent history, and inside one text the leftmost candidate wins.
#[derive(Clone, Debug, Default)]
pub struct FactExtractor {
    goal_keywords: Vec<String>,
}

impl FactExtractor {
    pub fn new(goal_keywords: Vec<String>) -> Self {
        Self { goal_keywords }
    }

    pub fn for_context(context: &NegotiationContext) -> Self {
        Self::new(context.goal_keywords())
    }

    pub fn extract(&self, current_text: &str, recent_history_text: &str) -> ExtractedFacts {
        let mut facts = ExtractedFacts::default();

        let price = first_of(current_text, recent_history_text, price_candidates);
        let address = first_of(current_text, recent_history_text, |text| {
            token_candidates(&ADDRESS_PATTERN, text)
        });
        let reference = first_of(current_text, recent_history_text, |text| {
            token_candidates(&REFERENCE_PATTERN, text)
        });

        if let Some((value, ambiguous)) = price {
            facts.price = Some(value);
            if ambiguous {
                facts.ambiguities.push(FactKind::Price);
            }
        }
        if let Some((value, ambiguous)) = address {
            facts.recipient_address = Some(value);
            if ambiguous {
                facts.ambiguities.push(FactKind::RecipientAddress);
            }
        }
        if let Some((value, ambiguous)) = reference {
            facts.transaction_reference = Some(value);
            if ambiguous {
                facts.ambiguities.push(FactKind::TransactionReference);
            }
        }

        let lowered = current_text.to_lowercase();
        facts.confirmation_signal = contains_any(&lowered, CONFIRMATION_PHRASES);
        facts.unavailable_signal = contains_any(&lowered, UNAVAILABLE_PHRASES);
        facts.product_mentioned = self
            .goal_keywords
            .iter()
            .filter(|keyword| keyword.chars().count() > 3)
            .any(|keyword| lowered.contains(keyword.as_str()));
        facts
    }
}

pub(crate) fn contains_any(lowered: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|phrase| lowered.contains(phrase))
}

/// Leftmost candidate from the first text that has any, plus whether that
/// text offered more than one distinct value.
fn first_of<T, F>(current: &str, history: &str, candidates: F) -> Option<(T, bool)>
where
    T: PartialEq,
    F: Fn(&str) -> Vec<T>,
{
    [current, history].into_iter().find_map(|text| {
        let mut found = candidates(text).into_iter();
        let first = found.next()?;
        let ambiguous = found.any(|other| other != first);
        Some((first, ambiguous))
    })
}

fn price_candidates(text: &str) -> Vec<Decimal> {
    PRICE_PATTERN
        .captures_iter(text)
        .filter_map(|captures| {
            let whole = captures.get(1)?.as_str().replace(',', "");
            let literal = match captures.get(2) {
                Some(fraction) => format!("{whole}.{}", fraction.as_str()),
                None => whole,
            };
            Decimal::from_str(&literal).ok()
        })
        .collect()
}

fn token_candidates(pattern: &Regex, text: &str) -> Vec<String> {
    pattern.find_iter(text).map(|found| found.as_str().to_owned()).collect()
}
