pub mod deposit;
pub mod reference;

pub use deposit::{
    DepositIntent, DepositStatus, LedgerEntryType, LedgerStatus, LedgerTransaction,
    NewDepositIntent, SettledPaymentEvent, SettlementRequest, UserId,
};
pub use reference::ReferenceCode;
