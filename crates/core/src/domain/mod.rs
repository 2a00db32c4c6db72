pub mod approval;
pub mod escrow;
pub mod order;
pub mod party;
pub mod payee;
pub mod payout;
pub mod quote;
pub mod time_entry;
