pub mod config;
pub mod domain;
pub mod errors;
pub mod payment;

pub use domain::negotiation::{Decision, ExtractedFacts, FactKind, NegotiationContext};
pub use domain::payment::{PaymentAttempt, PaymentAttemptId, PaymentFailure, PaymentState};
pub use domain::session::{SearchRecord, SessionId, SessionRecord, TurnRecord};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use payment::ledger::{LedgerClient, LedgerError, ReceiptStatus};
pub use payment::{JournalError, PaymentError, PaymentExecutor, PaymentJournal, PaymentSettings};
