pub mod create_deposit;
pub mod manual_settlement;
pub mod reconcile_payment;

pub use create_deposit::{CreateDeposit, CreateDepositError};
pub use manual_settlement::{ApprovedDeposit, ManualSettlement, ManualSettlementError};
pub use reconcile_payment::{NoMatchReason, ReconcileOutcome, ReconcilePayment};
