//! Dry-run of a single counterparty message: extraction plus the decision,
//! with no transfer and nothing written.

use purser_agent::{DecisionEngine, FactExtractor, SettlementTerms, Verdict};
use purser_core::domain::negotiation::{ExtractedFacts, NegotiationContext};
use purser_core::domain::session::{SessionId, SessionRecord};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::bootstrap::bootstrap_with_config;
use crate::commands::{async_runtime, load_config, CommandResult, Failure};

const DRY_RUN_USER: &str = "dry-run";

#[derive(Clone, Debug)]
pub struct DecideArgs {
    pub goal: String,
    pub budget: Decimal,
    pub text: String,
    /// Evaluate against this stored session's history and payments.
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct DryRun {
    session_id: Option<String>,
    facts: ExtractedFacts,
    verdict: Verdict,
}

pub fn run(args: DecideArgs) -> CommandResult {
    let result = match args.session_id.clone() {
        None => standalone(&args),
        Some(session_id) => against_session(&args, session_id),
    };
    match result {
        Ok(dry_run) => {
            let message = dry_run.verdict.decision.message().unwrap_or_else(|| {
                format!("{} (rule {})", dry_run.verdict.decision.kind(), dry_run.verdict.rule)
            });
            CommandResult::success_with("decide", message, dry_run)
        }
        Err(failure) => failure.into_result("decide"),
    }
}

fn standalone(args: &DecideArgs) -> Result<DryRun, Failure> {
    let session_id = SessionId(DRY_RUN_USER.to_string());
    let context = NegotiationContext::new(&args.goal, args.budget, DRY_RUN_USER, session_id.clone())
        .map_err(|error| Failure::new("invalid_input", error.to_string(), 7))?;
    let terms = load_config().map(|config| SettlementTerms::from(&config.negotiation))?;

    let facts = FactExtractor::for_context(&context).extract(&args.text, "");
    let verdict = DecisionEngine::new(terms).evaluate(
        &context,
        &facts,
        &args.text,
        &SessionRecord::new(session_id, None),
    );
    Ok(DryRun { session_id: None, facts, verdict })
}

fn against_session(args: &DecideArgs, session_id: String) -> Result<DryRun, Failure> {
    let config = load_config()?;
    let runtime = async_runtime()?;

    runtime.block_on(async move {
        let app = bootstrap_with_config(config).await?;
        let context = NegotiationContext::new(
            &args.goal,
            args.budget,
            DRY_RUN_USER,
            SessionId(session_id.clone()),
        )
        .map_err(|error| Failure::new("invalid_input", error.to_string(), 7))?;
        let (facts, verdict) = app.runtime.preview(&context, &args.text).await?;
        app.db_pool.close().await;
        Ok::<_, Failure>(DryRun { session_id: Some(session_id), facts, verdict })
    })
}
