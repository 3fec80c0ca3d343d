// Copyright 2025-2026 Waygate Devs
//
// This library is free software; you can redistribute it and/or
// modify it under the terms of the GNU Lesser General Public
// License as published by the Free Software Foundation; either
// version 3 of the License, or (at your option) any later version.
//
// This library is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU
// Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public
// License along with this library; if not, write to the Free Software
// Foundation, Inc., 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301, USA

//! Chain observation. Watchers poll a [`ChainAdapter`] until the condition they wait on
//! resolves, canceling through a [`watch`] channel owned by the task registry. Adapter errors
//! never abort a watcher, an RPC hiccup must not make the engine forget a lock it is supposed
//! to act on; errors are logged and the poll retried on the next interval.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::warn;

use crate::blockchain::{ChainAdapter, LockQuery, LockStatus, SwapQuery, TxStatus};
use crate::crypto::Secret;
use crate::transaction::TxId;

/// Sleep one poll interval, returning `true` when the watcher was canceled meanwhile. A closed
/// cancellation channel counts as canceled, the registry owning the sender is gone.
async fn pause(interval: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    if *cancel.borrow_and_update() {
        return true;
    }
    tokio::select! {
        _ = sleep(interval) => false,
        changed = cancel.changed() => changed.map(|_| *cancel.borrow()).unwrap_or(true),
    }
}

/// How waiting on the confirmation of one transaction ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    /// The transaction confirmed at the depth the adapter requires.
    Confirmed,
    /// The transaction was dropped or reverted and will not confirm.
    Dropped,
    /// A bounded wait ran past its deadline without a confirmation.
    DeadlinePassed,
    /// The watcher was canceled.
    Canceled,
}

/// Waits until one broadcast transaction confirms, is dropped, or the optional deadline passes.
#[derive(Debug)]
pub struct ConfirmationWatcher<C: ChainAdapter> {
    chain: Arc<C>,
    tx_id: TxId,
    poll_interval: Duration,
    deadline: Option<DateTime<Utc>>,
}

impl<C: ChainAdapter> ConfirmationWatcher<C> {
    /// Watch until the transaction confirms or is dropped, without a time bound.
    pub fn new(chain: Arc<C>, tx_id: TxId, poll_interval: Duration) -> Self {
        ConfirmationWatcher {
            chain,
            tx_id,
            poll_interval,
            deadline: None,
        }
    }

    /// Watch with a deadline after which the wait gives up.
    pub fn bounded(
        chain: Arc<C>,
        tx_id: TxId,
        poll_interval: Duration,
        deadline: DateTime<Utc>,
    ) -> Self {
        ConfirmationWatcher {
            chain,
            tx_id,
            poll_interval,
            deadline: Some(deadline),
        }
    }

    pub async fn wait(&self, cancel: &mut watch::Receiver<bool>) -> ConfirmationOutcome {
        loop {
            match self.chain.tx_status(&self.tx_id).await {
                Ok(TxStatus::Confirmed) => return ConfirmationOutcome::Confirmed,
                Ok(TxStatus::Failed) => return ConfirmationOutcome::Dropped,
                Ok(TxStatus::Pending) => {}
                Err(error) if error.is_transient() => {
                    warn!(tx = %self.tx_id, %error, "Transient error while polling confirmation, retrying");
                }
                Err(error) => {
                    warn!(tx = %self.tx_id, %error, "Error while polling confirmation, retrying");
                }
            }
            if let Some(deadline) = self.deadline {
                if Utc::now() >= deadline {
                    return ConfirmationOutcome::DeadlinePassed;
                }
            }
            if pause(self.poll_interval, cancel).await {
                return ConfirmationOutcome::Canceled;
            }
        }
    }
}

/// How waiting on the counterparty lock ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitiationOutcome {
    /// A matching lock is on-chain, confirmed or not.
    Seen,
    /// A matching lock is confirmed at the depth the adapter requires.
    Confirmed,
    /// A lock under the right secret hash exists but its parameters do not match the swap.
    Mismatched(String),
    /// The deadline passed without an acceptable lock.
    DeadlinePassed,
    /// The watcher was canceled.
    Canceled,
}

/// Waits for the counterparty lock to appear and confirm on its chain, checked against the lock
/// parameters the swap expects.
#[derive(Debug)]
pub struct InitiationWatcher<C: ChainAdapter> {
    chain: Arc<C>,
    query: LockQuery,
    poll_interval: Duration,
    deadline: DateTime<Utc>,
}

impl<C: ChainAdapter> InitiationWatcher<C> {
    pub fn new(
        chain: Arc<C>,
        query: LockQuery,
        poll_interval: Duration,
        deadline: DateTime<Utc>,
    ) -> Self {
        InitiationWatcher {
            chain,
            query,
            poll_interval,
            deadline,
        }
    }

    /// Wait until a matching lock is visible on-chain, confirmed or not.
    pub async fn wait_seen(&self, cancel: &mut watch::Receiver<bool>) -> InitiationOutcome {
        self.wait_until(false, cancel).await
    }

    /// Wait until a matching lock is confirmed.
    pub async fn wait_confirmed(&self, cancel: &mut watch::Receiver<bool>) -> InitiationOutcome {
        self.wait_until(true, cancel).await
    }

    async fn wait_until(
        &self,
        confirmed: bool,
        cancel: &mut watch::Receiver<bool>,
    ) -> InitiationOutcome {
        loop {
            match self.chain.lock_status(&self.query).await {
                Ok(LockStatus::Confirmed) => {
                    return if confirmed {
                        InitiationOutcome::Confirmed
                    } else {
                        InitiationOutcome::Seen
                    }
                }
                Ok(LockStatus::Pending) if !confirmed => return InitiationOutcome::Seen,
                Ok(LockStatus::Pending) | Ok(LockStatus::Missing) => {}
                Ok(LockStatus::Mismatched(reason)) => {
                    return InitiationOutcome::Mismatched(reason)
                }
                Err(error) if error.is_transient() => {
                    warn!(%error, "Transient error while polling the counterparty lock, retrying");
                }
                Err(error) => {
                    warn!(%error, "Error while polling the counterparty lock, retrying");
                }
            }
            if Utc::now() >= self.deadline {
                return InitiationOutcome::DeadlinePassed;
            }
            if pause(self.poll_interval, cancel).await {
                return InitiationOutcome::Canceled;
            }
        }
    }
}

/// How waiting on the redeem of a lock ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedeemOutcome {
    /// The lock was redeemed, revealing the preimage.
    Redeemed(Secret),
    /// The refund time of the watched lock was reached without a redeem.
    DeadlinePassed,
    /// The watcher was canceled.
    Canceled,
}

/// Waits until the queried lock is redeemed by anyone, extracting the revealed secret. Gives up
/// only once the refund time of the lock is reached, before that a redeem can still land.
#[derive(Debug)]
pub struct RedeemWatcher<C: ChainAdapter> {
    chain: Arc<C>,
    query: SwapQuery,
    poll_interval: Duration,
    deadline: DateTime<Utc>,
}

impl<C: ChainAdapter> RedeemWatcher<C> {
    pub fn new(
        chain: Arc<C>,
        query: SwapQuery,
        poll_interval: Duration,
        deadline: DateTime<Utc>,
    ) -> Self {
        RedeemWatcher {
            chain,
            query,
            poll_interval,
            deadline,
        }
    }

    pub async fn wait(&self, cancel: &mut watch::Receiver<bool>) -> RedeemOutcome {
        loop {
            match self.chain.redeemed_secret(&self.query).await {
                Ok(Some(secret)) => return RedeemOutcome::Redeemed(secret),
                Ok(None) => {}
                Err(error) if error.is_transient() => {
                    warn!(%error, "Transient error while polling for a redeem, retrying");
                }
                Err(error) => {
                    warn!(%error, "Error while polling for a redeem, retrying");
                }
            }
            if Utc::now() >= self.deadline {
                return RedeemOutcome::DeadlinePassed;
            }
            if pause(self.poll_interval, cancel).await {
                return RedeemOutcome::Canceled;
            }
        }
    }
}
