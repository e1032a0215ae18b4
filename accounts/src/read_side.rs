//! Account balance projection.
//!
//! Keeps one row per account holding its balance and the sequence number of
//! the last event folded into it. A row only moves forward: an event whose
//! sequence number is not greater than the row's is a duplicate and leaves
//! the row alone, which makes re-delivery after a restart harmless.

use crate::account::AccountEvent;
use crate::types::{AccountId, Money};
use eventkeep_core::event::Event;
use eventkeep_core::event_feed::EventEnvelope;
use eventkeep_core::key::{EntityKey, SequenceNr};
use eventkeep_core::projection::{Ack, Projection, ProjectionError, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// Storage for projected account balances.
pub trait AccountView: Send + Sync + 'static {
    /// Add `delta` to the account's balance if `sequence_nr` is greater than
    /// the last one applied to its row. A missing row starts at zero.
    ///
    /// Returns whether the row changed.
    fn apply_delta(
        &self,
        account_id: &AccountId,
        delta: Money,
        sequence_nr: SequenceNr,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Projected balance, or `None` if no event was applied for the account.
    fn balance(&self, account_id: &AccountId) -> impl Future<Output = Result<Option<Money>>> + Send;

    /// Remove every row.
    fn clear(&self) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Debug, Clone, Copy)]
struct BalanceRow {
    balance: Money,
    last_sequence_nr: SequenceNr,
}

#[derive(Debug, Default)]
struct ViewInner {
    rows: RwLock<HashMap<AccountId, BalanceRow>>,
    failing_writes: AtomicUsize,
}

/// In-memory [`AccountView`] with failure injection.
///
/// Clones share the same rows.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAccountView {
    inner: Arc<ViewInner>,
}

impl InMemoryAccountView {
    /// Create an empty view
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` writes fail with a storage error.
    pub fn fail_next_writes(&self, count: usize) {
        self.inner.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Last sequence number applied to the account's row.
    pub async fn last_sequence_nr(&self, account_id: &AccountId) -> Option<SequenceNr> {
        self.inner
            .rows
            .read()
            .await
            .get(account_id)
            .map(|row| row.last_sequence_nr)
    }

    /// All projected balances, ordered by account.
    pub async fn balances(&self) -> Vec<(AccountId, Money)> {
        let rows = self.inner.rows.read().await;
        let mut balances: Vec<_> = rows.iter().map(|(id, row)| (id.clone(), row.balance)).collect();
        balances.sort();
        balances
    }

    fn take_failure(&self) -> bool {
        self.inner
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

impl AccountView for InMemoryAccountView {
    async fn apply_delta(&self, account_id: &AccountId, delta: Money, sequence_nr: SequenceNr) -> Result<bool> {
        if self.take_failure() {
            return Err(ProjectionError::Storage("injected write failure".to_string()));
        }

        let mut rows = self.inner.rows.write().await;
        let row = rows.entry(account_id.clone()).or_insert(BalanceRow {
            balance: Money::ZERO,
            last_sequence_nr: SequenceNr::INITIAL,
        });
        if sequence_nr <= row.last_sequence_nr {
            return Ok(false);
        }
        row.balance = row.balance.saturating_add(delta);
        row.last_sequence_nr = sequence_nr;
        Ok(true)
    }

    async fn balance(&self, account_id: &AccountId) -> Result<Option<Money>> {
        Ok(self.inner.rows.read().await.get(account_id).map(|row| row.balance))
    }

    async fn clear(&self) -> Result<()> {
        self.inner.rows.write().await.clear();
        Ok(())
    }
}

/// Projection folding account events into an [`AccountView`].
pub struct AccountProjection<V> {
    view: V,
}

impl<V: AccountView> AccountProjection<V> {
    /// Name the projection checkpoints under
    pub const NAME: &'static str = "account_balances";

    /// Project into `view`
    #[must_use]
    pub const fn new(view: V) -> Self {
        Self { view }
    }

    /// The view being updated
    #[must_use]
    pub const fn view(&self) -> &V {
        &self.view
    }
}

fn decode(envelope: &EventEnvelope) -> Result<AccountEvent> {
    AccountEvent::from_bytes(&envelope.event.data).map_err(|e| {
        ProjectionError::Serialization(format!(
            "{} at offset {}: {e}",
            envelope.event.event_type, envelope.offset
        ))
    })
}

impl<V: AccountView> Projection for AccountProjection<V> {
    fn name(&self) -> &str {
        Self::NAME
    }

    /// Routes by the account named in the payload.
    fn route_key(&self, envelope: &EventEnvelope) -> EntityKey {
        if AccountEvent::is_known_type(&envelope.event.event_type) {
            if let Ok(event) = decode(envelope) {
                return event.account_id().entity_key();
            }
        }
        envelope.key.clone()
    }

    async fn apply_event(&self, envelope: &EventEnvelope) -> Result<Ack> {
        if !AccountEvent::is_known_type(&envelope.event.event_type) {
            tracing::debug!(
                event_type = %envelope.event.event_type,
                offset = envelope.offset,
                "Skipping unknown event type"
            );
            return Ok(Ack::NotProcessed);
        }

        let event = decode(envelope)?;
        let applied = self
            .view
            .apply_delta(event.account_id(), event.signed_amount(), envelope.sequence_nr)
            .await?;

        if applied {
            tracing::debug!(
                account_id = %event.account_id(),
                sequence_nr = %envelope.sequence_nr,
                "Balance updated"
            );
            Ok(Ack::Processed)
        } else {
            tracing::debug!(
                account_id = %event.account_id(),
                sequence_nr = %envelope.sequence_nr,
                "Already applied, skipping"
            );
            Ok(Ack::Duplicate)
        }
    }

    async fn rebuild(&self) -> Result<()> {
        self.view.clear().await
    }
}
