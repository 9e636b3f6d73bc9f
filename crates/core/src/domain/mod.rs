pub mod negotiation;
pub mod payment;
pub mod session;
