//! Write-side facade over the account entity router.

use crate::account::{Account, AccountCommand, AccountEvent, AccountReply};
use crate::types::{AccountId, Money, MoneyError};
use eventkeep_core::environment::Clock;
use eventkeep_core::event_store::EventStore;
use eventkeep_core::snapshot::SnapshotStore;
use eventkeep_runtime::{EntityRouter, RuntimeConfig, RuntimeError};
use std::sync::Arc;
use thiserror::Error;

/// Errors returned by [`Accounts`].
#[derive(Error, Debug)]
pub enum AccountError {
    /// The entity runtime could not handle the command.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// The account refused the command and persisted nothing.
    #[error("Account {account_id} rejected the command: {source}")]
    Rejected {
        /// The account that refused.
        account_id: AccountId,
        /// Why the amount could not be applied.
        source: MoneyError,
    },

    /// The account answered with a reply that does not fit the command.
    #[error("Unexpected reply from account {account_id}: {reply}")]
    UnexpectedReply {
        /// The account that answered.
        account_id: AccountId,
        /// What it answered.
        reply: String,
    },
}

/// Entry point for account commands.
///
/// Cheap to clone; clones share the same router and live instances.
///
/// # Example
///
/// ```ignore
/// let accounts = Accounts::new(events, snapshots, Arc::new(SystemClock), RuntimeConfig::default());
/// let id = AccountId::new("100");
///
/// accounts.deposit(&id, "100".parse()?).await?;
/// let account = accounts.get(&id).await?;
/// ```
#[derive(Clone)]
pub struct Accounts {
    router: EntityRouter<Account>,
}

impl Accounts {
    /// Create the facade and its router.
    #[must_use]
    pub fn new(
        events: Arc<dyn EventStore>,
        snapshots: Arc<dyn SnapshotStore>,
        clock: Arc<dyn Clock>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            router: EntityRouter::for_entity(events, snapshots, clock, config),
        }
    }

    /// The router hosting account instances.
    #[must_use]
    pub const fn router(&self) -> &EntityRouter<Account> {
        &self.router
    }

    /// Send any command to the account it names.
    ///
    /// # Errors
    ///
    /// Returns [`AccountError::Runtime`] if the command could not be handled.
    pub async fn send(&self, command: AccountCommand) -> Result<AccountReply, AccountError> {
        let key = command.account_id().entity_key();
        Ok(self.router.ask(&key, command).await?)
    }

    /// Deposit `amount` and return the persisted event.
    ///
    /// # Errors
    ///
    /// Returns [`AccountError::Rejected`] if the balance would overflow, or
    /// [`AccountError::Runtime`] if the event was not persisted.
    pub async fn deposit(&self, account_id: &AccountId, amount: Money) -> Result<AccountEvent, AccountError> {
        let reply = self
            .send(AccountCommand::Deposit {
                account_id: account_id.clone(),
                amount,
            })
            .await?;
        persisted(account_id, reply)
    }

    /// Withdraw `amount` and return the persisted event.
    ///
    /// There is no balance check.
    ///
    /// # Errors
    ///
    /// Returns [`AccountError::Rejected`] if the balance would overflow, or
    /// [`AccountError::Runtime`] if the event was not persisted.
    pub async fn withdraw(&self, account_id: &AccountId, amount: Money) -> Result<AccountEvent, AccountError> {
        let reply = self
            .send(AccountCommand::Withdrawal {
                account_id: account_id.clone(),
                amount,
            })
            .await?;
        persisted(account_id, reply)
    }

    /// Current state of the account, or `None` if nothing was ever persisted.
    ///
    /// # Errors
    ///
    /// Returns [`AccountError::Runtime`] if the account could not be activated.
    pub async fn get(&self, account_id: &AccountId) -> Result<Option<Account>, AccountError> {
        let reply = self
            .send(AccountCommand::GetAccount {
                account_id: account_id.clone(),
            })
            .await?;
        match reply {
            AccountReply::Found(account) => Ok(Some(account)),
            AccountReply::NotFound(_) => Ok(None),
            other @ (AccountReply::Persisted(_) | AccountReply::Rejected { .. }) => {
                Err(unexpected(account_id, &other))
            }
        }
    }

    /// Ask the account's live instance to stop. Returns `false` if none was live.
    pub async fn passivate(&self, account_id: &AccountId) -> bool {
        self.router.passivate(&account_id.entity_key()).await
    }

    /// Number of live account instances.
    pub async fn live_instances(&self) -> usize {
        self.router.live_count().await
    }

    /// Stop every live instance and refuse further commands.
    pub async fn shutdown(&self) {
        self.router.shutdown().await;
    }
}

fn persisted(account_id: &AccountId, reply: AccountReply) -> Result<AccountEvent, AccountError> {
    match reply {
        AccountReply::Persisted(event) => Ok(event),
        AccountReply::Rejected { account_id, error } => Err(AccountError::Rejected {
            account_id,
            source: error,
        }),
        other => Err(unexpected(account_id, &other)),
    }
}

fn unexpected(account_id: &AccountId, reply: &AccountReply) -> AccountError {
    AccountError::UnexpectedReply {
        account_id: account_id.clone(),
        reply: format!("{reply:?}"),
    }
}
