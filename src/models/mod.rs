// Data models for the dashboard API

pub mod account;
pub mod query;

pub use account::{normalize_accounts, Account, AccountList};
pub use query::TransactionParams;
