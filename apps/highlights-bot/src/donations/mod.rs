pub mod conversation;
pub mod ledger;
pub mod service;
pub mod types;

pub use conversation::ConversationTracker;
pub use ledger::DonationLedger;
pub use service::{CustomAmountOutcome, PaymentController, PaymentPolicy};
