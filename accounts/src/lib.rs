//! Event-sourced bank accounts.
//!
//! Each account is an entity hosted by the Eventkeep runtime: deposits and
//! withdrawals become `Deposited.v1` / `Withdrawn.v1` events tagged
//! `"account"`, and the balance is the fold of those events. A projection
//! keeps a balance view per account up to date from the tagged feed.
//!
//! ```text
//! Accounts ──ask──▶ EntityRouter<Account> ──▶ account instance ──append──▶ event log
//!                                                                            │
//!                          account_balances ◀── AccountProjection ◀── events_by_tag("account")
//! ```
//!
//! # Example
//!
//! ```ignore
//! use accounts::{AccountId, Accounts};
//!
//! let accounts = Accounts::new(events, snapshots, clock, RuntimeConfig::default());
//! let id = AccountId::new("100");
//!
//! accounts.deposit(&id, "100".parse()?).await?;
//! accounts.withdraw(&id, "99.95".parse()?).await?;
//! assert_eq!(accounts.get(&id).await?.map(|a| a.balance.to_string()), Some("$0.05".into()));
//! ```

pub mod account;
pub mod config;
pub mod postgres;
pub mod read_side;
pub mod service;
pub mod types;

pub use account::{Account, AccountCommand, AccountEvent, AccountReply};
pub use config::{AppConfig, ConfigError};
pub use postgres::PostgresAccountView;
pub use read_side::{AccountProjection, AccountView, InMemoryAccountView};
pub use service::{AccountError, Accounts};
pub use types::{AccountId, Money, MoneyError};
