//! The account entity: commands, events, replies and the state they fold into.
//!
//! ```text
//! Deposit    ──▶ Deposited{amount}  ──apply──▶ balance + amount
//! Withdrawal ──▶ Withdrawn{amount}  ──apply──▶ balance - amount
//! GetAccount ──▶ Found(account) | NotFound(id)
//! ```
//!
//! Withdrawals are not checked against the balance, so a balance may go
//! negative. A command whose amount would push the balance out of the
//! representable range is rejected and nothing is persisted.

use crate::types::{AccountId, Money, MoneyError};
use chrono::{DateTime, Utc};
use eventkeep_core::entity::{CommandContext, Decision, Entity};
use eventkeep_core::event::Event;
use eventkeep_core::key::EntityKey;
use serde::{Deserialize, Serialize};

/// A single bank account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account identifier
    pub id: AccountId,
    /// Current balance
    pub balance: Money,
}

impl Account {
    /// An account with a zero balance
    #[must_use]
    pub const fn new(id: AccountId) -> Self {
        Self {
            id,
            balance: Money::ZERO,
        }
    }

    /// Add a deposited amount to the balance.
    pub const fn apply_deposit(&mut self, amount: Money) {
        self.balance = self.balance.saturating_add(amount);
    }

    /// Take a withdrawn amount off the balance.
    pub const fn apply_withdrawal(&mut self, amount: Money) {
        self.balance = self.balance.saturating_sub(amount);
    }

    fn reject(&self, error: MoneyError) -> Decision<AccountEvent, AccountReply> {
        Decision::Reply(AccountReply::Rejected {
            account_id: self.id.clone(),
            error,
        })
    }
}

/// Commands accepted by an account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccountCommand {
    /// Put money into the account
    Deposit {
        /// Target account
        account_id: AccountId,
        /// Amount to deposit
        amount: Money,
    },
    /// Take money out of the account
    Withdrawal {
        /// Source account
        account_id: AccountId,
        /// Amount to withdraw
        amount: Money,
    },
    /// Read the current account state
    GetAccount {
        /// Account to read
        account_id: AccountId,
    },
}

impl AccountCommand {
    /// The account this command is addressed to
    #[must_use]
    pub const fn account_id(&self) -> &AccountId {
        match self {
            Self::Deposit { account_id, .. }
            | Self::Withdrawal { account_id, .. }
            | Self::GetAccount { account_id } => account_id,
        }
    }
}

/// Events persisted by an account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountEvent {
    /// Money was deposited
    Deposited {
        /// Account that received the money
        account_id: AccountId,
        /// Amount deposited
        amount: Money,
        /// When it happened
        timestamp: DateTime<Utc>,
    },
    /// Money was withdrawn
    Withdrawn {
        /// Account the money left
        account_id: AccountId,
        /// Amount withdrawn
        amount: Money,
        /// When it happened
        timestamp: DateTime<Utc>,
    },
}

impl AccountEvent {
    /// Type name of [`AccountEvent::Deposited`] payloads
    pub const DEPOSITED: &'static str = "Deposited.v1";
    /// Type name of [`AccountEvent::Withdrawn`] payloads
    pub const WITHDRAWN: &'static str = "Withdrawn.v1";

    /// Whether `event_type` names a payload this enum decodes
    #[must_use]
    pub fn is_known_type(event_type: &str) -> bool {
        event_type == Self::DEPOSITED || event_type == Self::WITHDRAWN
    }

    /// The account the event belongs to
    #[must_use]
    pub const fn account_id(&self) -> &AccountId {
        match self {
            Self::Deposited { account_id, .. } | Self::Withdrawn { account_id, .. } => account_id,
        }
    }

    /// The event's effect on the balance: positive for deposits, negative for withdrawals
    #[must_use]
    pub const fn signed_amount(&self) -> Money {
        match self {
            Self::Deposited { amount, .. } => *amount,
            Self::Withdrawn { amount, .. } => amount.saturating_neg(),
        }
    }
}

impl Event for AccountEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::Deposited { .. } => Self::DEPOSITED,
            Self::Withdrawn { .. } => Self::WITHDRAWN,
        }
    }
}

/// Replies sent back for account commands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccountReply {
    /// The command's event was persisted and applied
    Persisted(AccountEvent),
    /// The account has history; here is its current state
    Found(Account),
    /// Nothing was ever persisted for this account
    NotFound(AccountId),
    /// The command was refused; nothing was persisted
    Rejected {
        /// Account that refused the command
        account_id: AccountId,
        /// Why the amount could not be applied
        error: MoneyError,
    },
}

impl Entity for Account {
    type Command = AccountCommand;
    type Event = AccountEvent;
    type Reply = AccountReply;

    const TAG: &'static str = "account";

    fn empty(key: &EntityKey) -> Self {
        Self::new(AccountId::from(key))
    }

    fn decide(&self, command: AccountCommand, ctx: &CommandContext<'_>) -> Decision<AccountEvent, AccountReply> {
        match command {
            AccountCommand::Deposit { amount, .. } => match self.balance.checked_add(amount) {
                Ok(_) => Decision::Persist(AccountEvent::Deposited {
                    account_id: self.id.clone(),
                    amount,
                    timestamp: ctx.now,
                }),
                Err(error) => self.reject(error),
            },
            AccountCommand::Withdrawal { amount, .. } => match self.balance.checked_sub(amount) {
                Ok(_) => Decision::Persist(AccountEvent::Withdrawn {
                    account_id: self.id.clone(),
                    amount,
                    timestamp: ctx.now,
                }),
                Err(error) => self.reject(error),
            },
            AccountCommand::GetAccount { .. } if ctx.has_data => Decision::Reply(AccountReply::Found(self.clone())),
            AccountCommand::GetAccount { .. } => Decision::Reply(AccountReply::NotFound(self.id.clone())),
        }
    }

    fn apply(&mut self, event: &AccountEvent) {
        match event {
            AccountEvent::Deposited { amount, .. } => self.apply_deposit(*amount),
            AccountEvent::Withdrawn { amount, .. } => self.apply_withdrawal(*amount),
        }
    }

    fn persisted_reply(&self, event: AccountEvent) -> AccountReply {
        AccountReply::Persisted(event)
    }
}
