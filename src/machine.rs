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

//! The swap engine. A [`SwapStateMachine`] drives every registered swap through its payment,
//! redeem, and refund transactions, one pair of chains per machine.
//!
//! Operations are trigger-driven and idempotent: the embedder, the background watchers, and the
//! restart path all call the same [`pay`], [`redeem`], and [`refund`] entry points, and each call
//! re-reads the persisted [`SwapRecord`] to decide whether anything is left to do. A repeated
//! trigger, a crash between two steps, or two concurrent triggers for the same swap never
//! broadcast conflicting transactions: operations on one swap are serialized behind a per-swap
//! lock and signing is serialized per address.
//!
//! Every durable step appends a [`StateFlag`] to the record before observers are notified, so
//! the store is always at least as advanced as what subscribers saw. Facts are only ever added;
//! the engine decides what to do next from the facts alone, which is what makes [`resume`]
//! after a restart nothing more than re-dispatching every active record.
//!
//! [`pay`]: SwapStateMachine::pay
//! [`redeem`]: SwapStateMachine::redeem
//! [`refund`]: SwapStateMachine::refund
//! [`resume`]: SwapStateMachine::resume

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::blockchain::{
    self, ChainAdapter, FeePriority, LockQuery, LockRequest, LockTx, RedeemRequest, RefundRequest,
};
use crate::crypto::{self, Secret};
use crate::events::{swap_channel, TxChange, UpdateReceiver, UpdateSender};
use crate::locker::{AddressLocker, SwapLocker};
use crate::role::SwapRole;
use crate::scheduler::{wait_for_refund_time, ScheduleOutcome, TaskKind, TaskRegistry};
use crate::store::{self, SwapStore};
use crate::swap::{StateFlag, SwapId, SwapPhase, SwapRecord};
use crate::timelock::{self, SwapTimings};
use crate::transaction::{TxId, TxLabel, TxRef};
use crate::watcher::{
    ConfirmationOutcome, ConfirmationWatcher, InitiationOutcome, InitiationWatcher, RedeemOutcome,
    RedeemWatcher,
};

/// Errors returned by the swap operations. Conditions an operation absorbs by itself, like
/// insufficient funds or a rejected broadcast, are logged and do not surface here; a retry on
/// the next trigger is the recovery for those.
#[derive(Error, Debug)]
pub enum Error {
    /// The persistence layer failed.
    #[error("Store error: {0}")]
    Store(#[from] store::Error),
    /// A chain adapter failed in a way the operation cannot absorb.
    #[error("Chain error: {0}")]
    Chain(#[from] blockchain::Error),
    /// A secret failed validation against the stored secret hash.
    #[error("Cryptographic error: {0}")]
    Crypto(#[from] crypto::Error),
    /// The timings were rejected at machine construction.
    #[error("Time lock error: {0}")]
    Timelock(#[from] timelock::Error),
    /// Too little remains of the counterparty lock to redeem it safely, or the margin for
    /// redeeming the local lock on behalf of the counterparty is gone.
    #[error("The redeem window of swap {0} is closed")]
    RedeemWindowClosed(SwapId),
    /// The local lock has not expired yet, the chain would reject the refund.
    #[error("The local lock of swap {0} is not refundable yet")]
    RefundBeforeDeadline(SwapId),
    /// No preimage is stored for a swap that needs one to redeem.
    #[error("No secret is known for swap {0}")]
    MissingSecret(SwapId),
    /// An allowance transaction of a token payment did not confirm within its bound.
    #[error("An allowance transaction of swap {0} did not confirm in time")]
    ApproveTimeout(SwapId),
    /// The counterparty reclaimed its lock before this party redeemed it.
    #[error("Swap {0} cannot settle, the counterparty lock was refunded")]
    Unsettled(SwapId),
}

/// Whether the engine broadcasts the redeem on its own once the secret is known, or leaves the
/// call to the embedder.
#[derive(Display, Debug, Clone, Copy, PartialEq, Eq)]
#[display(Debug)]
pub enum RedeemPolicy {
    /// Redeem as soon as the secret and the deadlines allow it.
    Auto,
    /// Only record the revealed secret; the embedder calls [`SwapStateMachine::redeem`].
    Manual,
}

impl Default for RedeemPolicy {
    fn default() -> Self {
        RedeemPolicy::Auto
    }
}

/// Drives the swaps between one local chain and one counterparty chain.
///
/// `C` is the adapter of the chain this party locks its funds on, `P` the adapter of the chain
/// the counterparty locks on. The machine is a handle: clones share the same store, chains,
/// locks, and task registry, which is how the background tasks call back into the operations.
/// The spawned tasks outlive individual handles; [`shutdown`] on any of them stops all tasks.
///
/// [`shutdown`]: SwapStateMachine::shutdown
pub struct SwapStateMachine<C, P> {
    chain: Arc<C>,
    party_chain: Arc<P>,
    store: Arc<dyn SwapStore>,
    timings: SwapTimings,
    policy: RedeemPolicy,
    updates: UpdateSender,
    address_locks: Arc<AddressLocker>,
    swap_locks: Arc<SwapLocker>,
    tasks: Arc<TaskRegistry>,
}

impl<C, P> Clone for SwapStateMachine<C, P> {
    fn clone(&self) -> Self {
        SwapStateMachine {
            chain: Arc::clone(&self.chain),
            party_chain: Arc::clone(&self.party_chain),
            store: Arc::clone(&self.store),
            timings: self.timings.clone(),
            policy: self.policy,
            updates: self.updates.clone(),
            address_locks: Arc::clone(&self.address_locks),
            swap_locks: Arc::clone(&self.swap_locks),
            tasks: Arc::clone(&self.tasks),
        }
    }
}

impl<C, P> SwapStateMachine<C, P>
where
    C: ChainAdapter + 'static,
    P: ChainAdapter + 'static,
{
    /// Create a machine over the two chain adapters and the store, validating the timings.
    /// Returns the machine together with the receiving half of its update feed.
    pub fn new(
        chain: Arc<C>,
        party_chain: Arc<P>,
        store: Arc<dyn SwapStore>,
        timings: SwapTimings,
        policy: RedeemPolicy,
    ) -> Result<(Self, UpdateReceiver), Error> {
        timings.validate()?;
        let (updates, receiver) = swap_channel();
        let machine = SwapStateMachine {
            chain,
            party_chain,
            store,
            timings,
            policy,
            updates,
            address_locks: Arc::new(AddressLocker::new()),
            swap_locks: Arc::new(SwapLocker::new()),
            tasks: Arc::new(TaskRegistry::new()),
        };
        Ok((machine, receiver))
    }

    /// File a freshly negotiated swap. When the record carries the preimage it must match the
    /// secret hash, a mismatched pair would produce an unredeemable lock.
    pub async fn register(&self, record: SwapRecord) -> Result<(), Error> {
        if let Some(secret) = record.secret {
            record.hash_algo.verify(&secret, &record.secret_hash)?;
        }
        debug!(swap_id = %record.swap_id, role = %record.role, "Registering swap");
        self.store.insert(record.clone()).await?;
        self.updates.notify(&record, None);
        Ok(())
    }

    /// Sign and broadcast the local lock. The first transaction returned by the adapter is the
    /// payment itself; for token standards the allowance transactions follow it and each must
    /// confirm within the approve bound before the swap proceeds. A repeated trigger is a no-op
    /// once the payment is broadcast.
    ///
    /// Insufficient funds, a signature failure, and a rejected broadcast all abort the attempt
    /// without failing it: the record keeps the facts it had and the next trigger retries.
    pub async fn pay(&self, swap_id: SwapId) -> Result<(), Error> {
        let _swap_guard = self.swap_locks.lock(&swap_id).await;
        let record = self.store.get(swap_id).await?;
        if !Self::payment_is_relevant(&record) {
            debug!(%swap_id, phase = %record.phase(), "Payment is not relevant anymore");
            return Ok(());
        }

        let request = LockRequest {
            secret_hash: record.secret_hash,
            counterparty_address: record.party_address.clone(),
            refund_address: record.refund_address.clone(),
            amount: record.amount,
            lock_duration: self.timings.lock_duration(record.role),
            reward_for_redeem: record.reward_for_redeem,
        };
        let txs = match self.chain.build_lock_txs(&request).await {
            Ok(txs) => txs,
            Err(blockchain::Error::InsufficientFunds { needed, available }) => {
                warn!(%swap_id, needed, available, "Insufficient funds for the payment, waiting for the next trigger");
                return Ok(());
            }
            Err(error) => return Err(error.into()),
        };
        if txs.is_empty() {
            debug!(%swap_id, "The adapter returned no lock transaction, nothing to pay");
            return Ok(());
        }

        for (index, lock_tx) in txs.into_iter().enumerate() {
            let LockTx {
                label,
                from,
                mut tx,
            } = lock_tx;
            let _address_guard = self.address_locks.lock(&from).await;
            if let Err(error) = self.chain.sign(&mut tx, &from).await {
                error!(%swap_id, %label, %error, "Failed to sign a lock transaction, aborting the payment attempt");
                return Ok(());
            }
            let tx_id = match self.chain.broadcast(&tx).await {
                Ok(tx_id) => tx_id,
                Err(blockchain::Error::BroadcastFailed(reason)) => {
                    warn!(%swap_id, %label, reason, "Lock broadcast rejected, aborting the payment attempt");
                    return Ok(());
                }
                Err(error) => return Err(error.into()),
            };
            info!(%swap_id, %label, tx = %tx_id, "Broadcast lock transaction");

            if index == 0 {
                let tx_ref = TxRef::broadcast_now(tx_id, label);
                let change = TxChange::from(&tx_ref);
                self.store.attach_tx(swap_id, tx_ref).await?;
                let updated = self
                    .store
                    .append_flag(swap_id, StateFlag::PaymentSigned)
                    .await?;
                self.updates.notify(&updated, None);
                let updated = self
                    .store
                    .append_flag(swap_id, StateFlag::PaymentBroadcast)
                    .await?;
                self.updates.notify(&updated, Some(change));
            } else if label == TxLabel::TokenApprove {
                let watcher = ConfirmationWatcher::bounded(
                    Arc::clone(&self.chain),
                    tx_id,
                    self.timings.poll_interval,
                    self.timings.approve_deadline(Utc::now()),
                );
                let (_hold, mut cancel) = watch::channel(false);
                match watcher.wait(&mut cancel).await {
                    ConfirmationOutcome::Confirmed => {}
                    outcome => {
                        warn!(%swap_id, ?outcome, "An allowance transaction did not confirm within its bound");
                        return Err(Error::ApproveTimeout(swap_id));
                    }
                }
            }
        }

        self.start_party_payment_control(&record).await;
        self.start_wait_for_redeem(&record).await;
        Ok(())
    }

    /// Redeem the counterparty lock with the stored secret, settling the inbound leg.
    ///
    /// The broadcast only happens when nothing settled it already: a redeem observed on-chain is
    /// recorded as confirmed, a recent own broadcast is re-watched instead of replaced, and a
    /// counterparty lock that was refunded marks the swap unsettled. Past the safe margin before
    /// the counterparty refund time no redeem is attempted at all, a redeem racing the refund
    /// would hand the counterparty both legs.
    pub async fn redeem(&self, swap_id: SwapId) -> Result<(), Error> {
        let _swap_guard = self.swap_locks.lock(&swap_id).await;
        let record = self.store.get(swap_id).await?;

        if record.has(StateFlag::RedeemConfirmed) {
            debug!(%swap_id, "Redeem already confirmed");
            return Ok(());
        }
        if let Some(secret) = self
            .party_chain
            .redeemed_secret(&record.party_lock_query())
            .await?
        {
            self.settle_party_lock_redeem(swap_id, secret).await;
            return Ok(());
        }

        let now = Utc::now();
        if record.has(StateFlag::RedeemBroadcast) {
            if let Some(tx) = record.redeem_tx.as_ref() {
                if tx.is_fresh(now, self.timings.tx_freshness) {
                    debug!(%swap_id, tx = %tx.id, "A recent redeem is in flight, re-watching it");
                    self.start_redeem_confirmation_watch(swap_id, tx.id.clone())
                        .await;
                    return Ok(());
                }
            }
        }

        if record.role == SwapRole::Acceptor
            && now >= self.timings.refund_deadline(record.created_at, record.role.other())
            && self
                .party_chain
                .is_refunded(&record.party_lock_query())
                .await?
        {
            warn!(%swap_id, "Counterparty lock was refunded, the swap cannot settle");
            let updated = self.store.append_flag(swap_id, StateFlag::Unsettled).await?;
            self.updates.notify(&updated, None);
            return Err(Error::Unsettled(swap_id));
        }
        if now >= self.timings.safe_redeem_deadline(record.created_at, record.role) {
            return Err(Error::RedeemWindowClosed(swap_id));
        }

        let secret = record.secret.ok_or(Error::MissingSecret(swap_id))?;
        record.hash_algo.verify(&secret, &record.secret_hash)?;

        let from = match self
            .party_chain
            .spendable_address(0, FeePriority::High)
            .await
        {
            Ok(address) => address,
            Err(blockchain::Error::InsufficientFunds { needed, available }) => {
                warn!(%swap_id, needed, available, "No address can pay the redeem fees, waiting for the next trigger");
                return Ok(());
            }
            Err(error) => return Err(error.into()),
        };
        let request = RedeemRequest {
            secret_hash: record.secret_hash,
            secret,
            from_address: from.clone(),
        };
        let mut tx = self.party_chain.build_redeem_tx(&request).await?;
        let _address_guard = self.address_locks.lock(&from).await;
        if let Err(error) = self.party_chain.sign(&mut tx, &from).await {
            error!(%swap_id, %error, "Failed to sign the redeem transaction, aborting the attempt");
            return Ok(());
        }
        let tx_id = match self.party_chain.broadcast(&tx).await {
            Ok(tx_id) => tx_id,
            Err(blockchain::Error::BroadcastFailed(reason)) => {
                warn!(%swap_id, reason, "Redeem broadcast rejected, aborting the attempt");
                return Ok(());
            }
            Err(error) => return Err(error.into()),
        };
        info!(%swap_id, tx = %tx_id, "Broadcast redeem transaction");

        let tx_ref = TxRef::broadcast_now(tx_id.clone(), TxLabel::Redeem);
        let change = TxChange::from(&tx_ref);
        self.store.attach_tx(swap_id, tx_ref).await?;
        let updated = self
            .store
            .append_flag(swap_id, StateFlag::RedeemSigned)
            .await?;
        self.updates.notify(&updated, None);
        let updated = self
            .store
            .append_flag(swap_id, StateFlag::RedeemBroadcast)
            .await?;
        self.updates.notify(&updated, Some(change));
        self.start_redeem_confirmation_watch(swap_id, tx_id).await;
        Ok(())
    }

    /// Redeem the local lock toward the counterparty, collecting the reward it offered. Used by
    /// parties acting as redeem helpers for counterparties that cannot stay online.
    ///
    /// The transaction spends fees on the local chain and moves the locked funds to the
    /// counterparty, exactly what the counterparty's own redeem would do, so no state is
    /// recorded for it. Close to the local refund time the operation refuses to run, the helper
    /// redeem must never race the own refund.
    pub async fn redeem_for_counterparty(&self, swap_id: SwapId) -> Result<(), Error> {
        let _swap_guard = self.swap_locks.lock(&swap_id).await;
        let record = self.store.get(swap_id).await?;

        let now = Utc::now();
        if now >= self.timings.party_redeem_deadline(record.created_at, record.role) {
            return Err(Error::RedeemWindowClosed(swap_id));
        }
        if self
            .chain
            .redeemed_secret(&record.own_lock_query())
            .await?
            .is_some()
        {
            debug!(%swap_id, "Local lock is already redeemed, nothing left for the counterparty");
            return Ok(());
        }

        let secret = record.secret.ok_or(Error::MissingSecret(swap_id))?;
        record.hash_algo.verify(&secret, &record.secret_hash)?;

        let from = match self.chain.spendable_address(0, FeePriority::High).await {
            Ok(address) => address,
            Err(blockchain::Error::InsufficientFunds { needed, available }) => {
                warn!(%swap_id, needed, available, "No address can pay the helper redeem fees");
                return Ok(());
            }
            Err(error) => return Err(error.into()),
        };
        let request = RedeemRequest {
            secret_hash: record.secret_hash,
            secret,
            from_address: from.clone(),
        };
        let mut tx = self.chain.build_redeem_tx(&request).await?;
        let _address_guard = self.address_locks.lock(&from).await;
        if let Err(error) = self.chain.sign(&mut tx, &from).await {
            error!(%swap_id, %error, "Failed to sign the helper redeem, aborting the attempt");
            return Ok(());
        }
        let tx_id = match self.chain.broadcast(&tx).await {
            Ok(tx_id) => tx_id,
            Err(blockchain::Error::BroadcastFailed(reason)) => {
                warn!(%swap_id, reason, "Helper redeem broadcast rejected, aborting the attempt");
                return Ok(());
            }
            Err(error) => return Err(error.into()),
        };
        info!(%swap_id, tx = %tx_id, "Redeemed the local lock on behalf of the counterparty");
        Ok(())
    }

    /// Reclaim the expired local lock.
    ///
    /// Never broadcasts before the local refund time, the chain contract would reject it. When
    /// the lock turns out to be redeemed instead, the revealed secret is absorbed and, under
    /// [`RedeemPolicy::Auto`], the redeem of the counterparty lock is attempted in its place: a
    /// counterparty that redeemed late must not stop this party from settling its own leg.
    pub async fn refund(&self, swap_id: SwapId) -> Result<(), Error> {
        let absorbed_secret = self.refund_or_absorb(swap_id).await?;
        if absorbed_secret && self.policy == RedeemPolicy::Auto {
            if let Err(error) = self.redeem(swap_id).await {
                warn!(%swap_id, %error, "Redeem with the absorbed secret failed");
            }
        }
        Ok(())
    }

    /// The guarded part of [`refund`]: everything under the per-swap lock. Returns `true` when
    /// a secret was absorbed from a redeem of the local lock, the caller chains the redeem once
    /// the lock is released.
    ///
    /// [`refund`]: SwapStateMachine::refund
    async fn refund_or_absorb(&self, swap_id: SwapId) -> Result<bool, Error> {
        let _swap_guard = self.swap_locks.lock(&swap_id).await;
        let record = self.store.get(swap_id).await?;

        if record.has(StateFlag::RefundConfirmed) {
            debug!(%swap_id, "Refund already confirmed");
            return Ok(false);
        }
        if self.chain.is_refunded(&record.own_lock_query()).await? {
            info!(%swap_id, "Local lock is already refunded");
            let updated = self
                .store
                .append_flag(swap_id, StateFlag::RefundConfirmed)
                .await?;
            self.updates.notify(&updated, None);
            return Ok(false);
        }
        if let Some(secret) = self.chain.redeemed_secret(&record.own_lock_query()).await? {
            info!(%swap_id, "Local lock was redeemed, absorbing the secret instead of refunding");
            record.hash_algo.verify(&secret, &record.secret_hash)?;
            let updated = self.store.set_secret(swap_id, secret).await?;
            self.updates.notify(&updated, None);
            return Ok(true);
        }

        let now = Utc::now();
        if now < self.timings.refund_deadline(record.created_at, record.role) {
            return Err(Error::RefundBeforeDeadline(swap_id));
        }
        if record.has(StateFlag::RefundBroadcast) {
            if let Some(tx) = record.refund_tx.as_ref() {
                if tx.is_fresh(now, self.timings.tx_freshness) {
                    debug!(%swap_id, tx = %tx.id, "A recent refund is in flight, re-watching it");
                    self.start_refund_confirmation_watch(swap_id, tx.id.clone())
                        .await;
                    return Ok(false);
                }
            }
        }

        let from = match self.chain.spendable_address(0, FeePriority::Normal).await {
            Ok(address) => address,
            Err(blockchain::Error::InsufficientFunds { needed, available }) => {
                warn!(%swap_id, needed, available, "No address can pay the refund fees, waiting for the next trigger");
                return Ok(false);
            }
            Err(error) => return Err(error.into()),
        };
        let request = RefundRequest {
            secret_hash: record.secret_hash,
            from_address: from.clone(),
        };
        let mut tx = self.chain.build_refund_tx(&request).await?;
        let _address_guard = self.address_locks.lock(&from).await;
        if let Err(error) = self.chain.sign(&mut tx, &from).await {
            error!(%swap_id, %error, "Failed to sign the refund transaction, aborting the attempt");
            return Ok(false);
        }
        let tx_id = match self.chain.broadcast(&tx).await {
            Ok(tx_id) => tx_id,
            Err(blockchain::Error::BroadcastFailed(reason)) => {
                warn!(%swap_id, reason, "Refund broadcast rejected, aborting the attempt");
                return Ok(false);
            }
            Err(error) => return Err(error.into()),
        };
        info!(%swap_id, tx = %tx_id, "Broadcast refund transaction");

        let tx_ref = TxRef::broadcast_now(tx_id.clone(), TxLabel::Refund);
        let change = TxChange::from(&tx_ref);
        self.store.attach_tx(swap_id, tx_ref).await?;
        let updated = self
            .store
            .append_flag(swap_id, StateFlag::RefundSigned)
            .await?;
        self.updates.notify(&updated, None);
        let updated = self
            .store
            .append_flag(swap_id, StateFlag::RefundBroadcast)
            .await?;
        self.updates.notify(&updated, Some(change));
        self.start_refund_confirmation_watch(swap_id, tx_id).await;
        Ok(false)
    }

    /// Re-dispatch every active swap after a restart, returning how many were picked up. One
    /// failing swap never stops the others, its error is logged and the loop continues.
    pub async fn resume(&self) -> Result<usize, Error> {
        let records = self.store.list_active().await?;
        let count = records.len();
        info!(count, "Resuming active swaps");
        for record in records {
            if let Err(error) = self.resume_swap(&record).await {
                error!(swap_id = %record.swap_id, %error, "Failed to resume swap");
            }
        }
        Ok(count)
    }

    async fn resume_swap(&self, record: &SwapRecord) -> Result<(), Error> {
        let swap_id = record.swap_id;
        debug!(%swap_id, phase = %record.phase(), "Resuming swap");
        if record.has(StateFlag::PaymentBroadcast) && !record.is_settled() {
            self.start_wait_for_redeem(record).await;
        }
        match record.phase() {
            SwapPhase::Refunding => self.refund(swap_id).await?,
            SwapPhase::Redeeming => self.redeem(swap_id).await?,
            SwapPhase::PartyPaymentConfirmed => {
                if record.party_reward_for_redeem > 0 {
                    self.start_wait_for_redeem_by_someone(record).await;
                }
                if record.secret.is_some() && self.policy == RedeemPolicy::Auto {
                    self.redeem(swap_id).await?;
                }
            }
            SwapPhase::PartyPaymentSeen | SwapPhase::PaymentBroadcast => {
                self.start_party_payment_control(record).await;
            }
            SwapPhase::Created | SwapPhase::PaymentPending => self.pay(swap_id).await?,
            SwapPhase::Redeemed | SwapPhase::Refunded | SwapPhase::Unsettled => {}
        }
        Ok(())
    }

    /// Watch the counterparty chain for the lock the swap expects, recording it when it appears
    /// and confirms. Once confirmed, the redeem-by-someone watch is armed when the counterparty
    /// offered a reward, and the redeem is chained under [`RedeemPolicy::Auto`].
    ///
    /// A lock that never appears before its refund time only stops the watch: the own lock is
    /// reclaimed through its own deadline path and needs nothing from here.
    pub async fn start_party_payment_control(&self, record: &SwapRecord) {
        let machine = self.clone();
        let swap_id = record.swap_id;
        let deadline = self
            .timings
            .refund_deadline(record.created_at, record.role.other());
        let query = LockQuery {
            secret_hash: record.secret_hash,
            recipient: record.to_address.clone(),
            expected_amount: record.party_amount,
            refund_deadline: deadline,
        };
        self.tasks
            .spawn(swap_id, TaskKind::PartyPaymentControl, move |mut cancel| {
                async move {
                    let watcher = InitiationWatcher::new(
                        Arc::clone(&machine.party_chain),
                        query,
                        machine.timings.poll_interval,
                        deadline,
                    );
                    match watcher.wait_seen(&mut cancel).await {
                        InitiationOutcome::Seen | InitiationOutcome::Confirmed => {}
                        InitiationOutcome::Mismatched(reason) => {
                            warn!(%swap_id, reason, "Counterparty lock does not match the swap, stopping control");
                            return;
                        }
                        InitiationOutcome::DeadlinePassed => {
                            warn!(%swap_id, "No counterparty lock appeared before its refund time");
                            return;
                        }
                        InitiationOutcome::Canceled => return,
                    }
                    match machine
                        .store
                        .append_flag(swap_id, StateFlag::PartyPaymentSeen)
                        .await
                    {
                        Ok(updated) => {
                            info!(%swap_id, "Counterparty payment is on-chain");
                            machine.updates.notify(&updated, None);
                        }
                        Err(error) => {
                            error!(%swap_id, %error, "Failed to record the counterparty payment");
                            return;
                        }
                    }
                    match watcher.wait_confirmed(&mut cancel).await {
                        InitiationOutcome::Confirmed | InitiationOutcome::Seen => {}
                        InitiationOutcome::Mismatched(reason) => {
                            warn!(%swap_id, reason, "Counterparty lock does not match the swap, stopping control");
                            return;
                        }
                        InitiationOutcome::DeadlinePassed => {
                            warn!(%swap_id, "Counterparty lock did not confirm before its refund time");
                            return;
                        }
                        InitiationOutcome::Canceled => return,
                    }
                    let updated = match machine
                        .store
                        .append_flag(swap_id, StateFlag::PartyPaymentConfirmed)
                        .await
                    {
                        Ok(updated) => updated,
                        Err(error) => {
                            error!(%swap_id, %error, "Failed to record the counterparty payment confirmation");
                            return;
                        }
                    };
                    info!(%swap_id, "Counterparty payment confirmed");
                    machine.updates.notify(&updated, None);
                    if updated.party_reward_for_redeem > 0 {
                        machine.start_wait_for_redeem_by_someone(&updated).await;
                    }
                    if updated.secret.is_some() && machine.policy == RedeemPolicy::Auto {
                        if let Err(error) = machine.redeem(swap_id).await {
                            warn!(%swap_id, %error, "Automatic redeem failed");
                        }
                    }
                }
            })
            .await;
    }

    /// Watch the local lock for the redeem that reveals the secret, until the local refund time.
    /// A revealed secret is recorded and, under [`RedeemPolicy::Auto`], the redeem of the
    /// counterparty lock is chained; a deadline that passes instead schedules the refund.
    pub async fn start_wait_for_redeem(&self, record: &SwapRecord) {
        let machine = self.clone();
        let swap_id = record.swap_id;
        let query = record.own_lock_query();
        let deadline = self.timings.refund_deadline(record.created_at, record.role);
        let hash_algo = record.hash_algo;
        let secret_hash = record.secret_hash;
        self.tasks
            .spawn(swap_id, TaskKind::OwnLockRedeemWatch, move |mut cancel| {
                async move {
                    let watcher = RedeemWatcher::new(
                        Arc::clone(&machine.chain),
                        query,
                        machine.timings.poll_interval,
                        deadline,
                    );
                    match watcher.wait(&mut cancel).await {
                        RedeemOutcome::Redeemed(secret) => {
                            if let Err(error) = hash_algo.verify(&secret, &secret_hash) {
                                error!(%swap_id, %error, "A redeem of the local lock revealed an invalid preimage");
                                return;
                            }
                            match machine.store.set_secret(swap_id, secret).await {
                                Ok(updated) => {
                                    info!(%swap_id, "Local lock was redeemed, the secret is revealed");
                                    machine.updates.notify(&updated, None);
                                    if machine.policy == RedeemPolicy::Auto {
                                        if let Err(error) = machine.redeem(swap_id).await {
                                            warn!(%swap_id, %error, "Automatic redeem failed");
                                        }
                                    }
                                }
                                Err(error) => {
                                    error!(%swap_id, %error, "Failed to record the revealed secret");
                                }
                            }
                        }
                        RedeemOutcome::DeadlinePassed => match machine.store.get(swap_id).await {
                            Ok(record) => machine.schedule_refund(&record).await,
                            Err(error) => {
                                error!(%swap_id, %error, "Failed to load the swap for its refund");
                            }
                        },
                        RedeemOutcome::Canceled => {}
                    }
                }
            })
            .await;
    }

    /// Watch the counterparty lock for a redeem by anyone. Armed when the counterparty offered a
    /// reward on its lock: a helper redeeming in this party's place settles the inbound leg
    /// without any local broadcast.
    pub async fn start_wait_for_redeem_by_someone(&self, record: &SwapRecord) {
        let machine = self.clone();
        let swap_id = record.swap_id;
        let query = record.party_lock_query();
        let deadline = self
            .timings
            .refund_deadline(record.created_at, record.role.other());
        self.tasks
            .spawn(swap_id, TaskKind::PartyLockRedeemWatch, move |mut cancel| {
                async move {
                    let watcher = RedeemWatcher::new(
                        Arc::clone(&machine.party_chain),
                        query,
                        machine.timings.poll_interval,
                        deadline,
                    );
                    match watcher.wait(&mut cancel).await {
                        RedeemOutcome::Redeemed(secret) => {
                            machine.settle_party_lock_redeem(swap_id, secret).await;
                        }
                        RedeemOutcome::DeadlinePassed | RedeemOutcome::Canceled => {}
                    }
                }
            })
            .await;
    }

    /// Arm the refund of the local lock at its refund time. Errors of the refund itself are
    /// logged, the own-lock watch or the next restart retries.
    pub async fn schedule_refund(&self, record: &SwapRecord) {
        let machine = self.clone();
        let swap_id = record.swap_id;
        let refund_at = self.timings.refund_deadline(record.created_at, record.role);
        debug!(%swap_id, %refund_at, "Scheduling the refund of the local lock");
        self.tasks
            .spawn(swap_id, TaskKind::RefundSchedule, move |mut cancel| {
                async move {
                    match wait_for_refund_time(refund_at, &mut cancel).await {
                        ScheduleOutcome::Due => {
                            if let Err(error) = machine.refund(swap_id).await {
                                error!(%swap_id, %error, "Scheduled refund failed");
                            }
                        }
                        ScheduleOutcome::Canceled => {}
                    }
                }
            })
            .await;
    }

    /// Stop the background tasks of one swap. The record is untouched, a later trigger or
    /// restart picks the swap up again.
    pub async fn cancel_swap(&self, swap_id: SwapId) {
        debug!(%swap_id, "Canceling the background tasks of the swap");
        self.tasks.cancel_swap(swap_id).await;
        self.swap_locks.evict_unused(&swap_id).await;
    }

    /// Cancel every background task and wait for all of them to wind down.
    pub async fn shutdown(&self) {
        info!("Shutting down the swap engine");
        self.tasks.shutdown().await;
    }

    /// A redeem of the counterparty lock is effective on-chain, no matter who broadcast it:
    /// record the revealed secret and settle the inbound leg. Store failures are logged, the
    /// next trigger observes the chain again.
    async fn settle_party_lock_redeem(&self, swap_id: SwapId, secret: Secret) {
        if let Err(error) = self.store.set_secret(swap_id, secret).await {
            error!(%swap_id, %error, "Failed to record the secret of the counterparty lock redeem");
            return;
        }
        match self
            .store
            .append_flag(swap_id, StateFlag::RedeemConfirmed)
            .await
        {
            Ok(updated) => {
                info!(%swap_id, "Counterparty lock was redeemed toward this party");
                self.updates.notify(&updated, None);
            }
            Err(error) => {
                error!(%swap_id, %error, "Failed to record the redeem of the counterparty lock");
            }
        }
    }

    /// [`redeem`] behind an erased future type. The confirmation watches re-enter the
    /// operations that spawn them; a spawned task must be a `Send` future that does not
    /// contain its own type.
    ///
    /// [`redeem`]: SwapStateMachine::redeem
    fn redeem_boxed(
        &self,
        swap_id: SwapId,
    ) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send + '_>> {
        Box::pin(self.redeem(swap_id))
    }

    /// [`refund`] behind an erased future type, for the refund confirmation watch.
    ///
    /// [`refund`]: SwapStateMachine::refund
    fn refund_boxed(
        &self,
        swap_id: SwapId,
    ) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send + '_>> {
        Box::pin(self.refund(swap_id))
    }

    /// Watch a broadcast redeem until it confirms. A dropped transaction re-enters through
    /// [`redeem`]: within the freshness window that re-attaches this watch, past it the redeem
    /// is rebuilt, so a replacement eventually lands while the window is open.
    ///
    /// [`redeem`]: SwapStateMachine::redeem
    async fn start_redeem_confirmation_watch(&self, swap_id: SwapId, tx_id: TxId) {
        let machine = self.clone();
        self.tasks
            .spawn(swap_id, TaskKind::RedeemConfirmation, move |mut cancel| {
                async move {
                    let watcher = ConfirmationWatcher::new(
                        Arc::clone(&machine.party_chain),
                        tx_id,
                        machine.timings.poll_interval,
                    );
                    match watcher.wait(&mut cancel).await {
                        ConfirmationOutcome::Confirmed => {
                            match machine
                                .store
                                .append_flag(swap_id, StateFlag::RedeemConfirmed)
                                .await
                            {
                                Ok(updated) => {
                                    info!(%swap_id, "Redeem confirmed");
                                    machine.updates.notify(&updated, None);
                                }
                                Err(error) => {
                                    error!(%swap_id, %error, "Failed to record the redeem confirmation");
                                }
                            }
                        }
                        ConfirmationOutcome::Dropped => {
                            warn!(%swap_id, "Redeem transaction was dropped, retrying");
                            sleep(machine.timings.poll_interval).await;
                            if let Err(error) = machine.redeem_boxed(swap_id).await {
                                error!(%swap_id, %error, "Redeem retry after a dropped transaction failed");
                            }
                        }
                        ConfirmationOutcome::DeadlinePassed | ConfirmationOutcome::Canceled => {}
                    }
                }
            })
            .await;
    }

    /// Watch a broadcast refund until it confirms, re-entering through [`refund`] when the
    /// transaction is dropped.
    ///
    /// [`refund`]: SwapStateMachine::refund
    async fn start_refund_confirmation_watch(&self, swap_id: SwapId, tx_id: TxId) {
        let machine = self.clone();
        self.tasks
            .spawn(swap_id, TaskKind::RefundConfirmation, move |mut cancel| {
                async move {
                    let watcher = ConfirmationWatcher::new(
                        Arc::clone(&machine.chain),
                        tx_id,
                        machine.timings.poll_interval,
                    );
                    match watcher.wait(&mut cancel).await {
                        ConfirmationOutcome::Confirmed => {
                            match machine
                                .store
                                .append_flag(swap_id, StateFlag::RefundConfirmed)
                                .await
                            {
                                Ok(updated) => {
                                    info!(%swap_id, "Refund confirmed");
                                    machine.updates.notify(&updated, None);
                                }
                                Err(error) => {
                                    error!(%swap_id, %error, "Failed to record the refund confirmation");
                                }
                            }
                        }
                        ConfirmationOutcome::Dropped => {
                            warn!(%swap_id, "Refund transaction was dropped, retrying");
                            sleep(machine.timings.poll_interval).await;
                            if let Err(error) = machine.refund_boxed(swap_id).await {
                                error!(%swap_id, %error, "Refund retry after a dropped transaction failed");
                            }
                        }
                        ConfirmationOutcome::DeadlinePassed | ConfirmationOutcome::Canceled => {}
                    }
                }
            })
            .await;
    }

    /// The payment runs while nothing is broadcast and the swap is alive. Everything else is a
    /// repeated trigger or a swap already decided.
    fn payment_is_relevant(record: &SwapRecord) -> bool {
        !record.has(StateFlag::PaymentBroadcast) && !record.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::{Address, Blockchain, LockStatus, Network, SwapQuery, TxStatus};
    use crate::crypto::{SecretHash, SecretHashAlgo};
    use crate::store::MemoryStore;
    use crate::swap::StateFlags;
    use crate::timelock::LockDuration;

    use async_trait::async_trait;

    /// An adapter for tests that never reach a chain.
    struct IdleChain;

    #[async_trait]
    impl ChainAdapter for IdleChain {
        type Tx = ();

        fn blockchain(&self) -> Blockchain {
            Blockchain::Ethereum
        }

        async fn build_lock_txs(
            &self,
            _request: &LockRequest,
        ) -> Result<Vec<LockTx<()>>, blockchain::Error> {
            unimplemented!()
        }

        async fn build_redeem_tx(&self, _request: &RedeemRequest) -> Result<(), blockchain::Error> {
            unimplemented!()
        }

        async fn build_refund_tx(&self, _request: &RefundRequest) -> Result<(), blockchain::Error> {
            unimplemented!()
        }

        async fn sign(&self, _tx: &mut (), _from: &Address) -> Result<(), blockchain::Error> {
            unimplemented!()
        }

        async fn broadcast(&self, _tx: &()) -> Result<TxId, blockchain::Error> {
            unimplemented!()
        }

        async fn tx_status(&self, _id: &TxId) -> Result<TxStatus, blockchain::Error> {
            unimplemented!()
        }

        async fn lock_status(&self, _query: &LockQuery) -> Result<LockStatus, blockchain::Error> {
            unimplemented!()
        }

        async fn redeemed_secret(
            &self,
            _query: &SwapQuery,
        ) -> Result<Option<Secret>, blockchain::Error> {
            unimplemented!()
        }

        async fn is_refunded(&self, _query: &SwapQuery) -> Result<bool, blockchain::Error> {
            unimplemented!()
        }

        async fn spendable_address(
            &self,
            _min_balance: u64,
            _priority: FeePriority,
        ) -> Result<Address, blockchain::Error> {
            unimplemented!()
        }

        async fn find_locks(&self, _query: &SwapQuery) -> Result<Vec<()>, blockchain::Error> {
            unimplemented!()
        }

        async fn find_additional_locks(
            &self,
            _query: &SwapQuery,
        ) -> Result<Vec<()>, blockchain::Error> {
            unimplemented!()
        }

        async fn find_redeems(&self, _query: &SwapQuery) -> Result<Vec<()>, blockchain::Error> {
            unimplemented!()
        }

        async fn find_refunds(&self, _query: &SwapQuery) -> Result<Vec<()>, blockchain::Error> {
            unimplemented!()
        }
    }

    fn record(swap_id: SwapId) -> SwapRecord {
        SwapRecord {
            swap_id,
            role: SwapRole::Initiator,
            blockchain: Blockchain::Ethereum,
            party_blockchain: Blockchain::Tezos,
            network: Network::Mainnet,
            hash_algo: SecretHashAlgo::Sha256,
            secret_hash: SecretHash::zero(),
            secret: None,
            created_at: Utc::now(),
            to_address: Address("tz1-to".to_string()),
            party_address: Address("0x-party".to_string()),
            refund_address: Address("0x-refund".to_string()),
            party_refund_address: Address("tz1-refund".to_string()),
            amount: 1_000,
            party_amount: 2_000,
            reward_for_redeem: 0,
            party_reward_for_redeem: 0,
            state: StateFlags::empty(),
            payment_tx: None,
            redeem_tx: None,
            refund_tx: None,
        }
    }

    fn machine(
        timings: SwapTimings,
    ) -> Result<(SwapStateMachine<IdleChain, IdleChain>, UpdateReceiver), Error> {
        SwapStateMachine::new(
            Arc::new(IdleChain),
            Arc::new(IdleChain),
            Arc::new(MemoryStore::new()),
            timings,
            RedeemPolicy::default(),
        )
    }

    #[test]
    fn payment_relevance_follows_the_recorded_facts() {
        let mut swap = record(SwapId::random());
        assert!(SwapStateMachine::<IdleChain, IdleChain>::payment_is_relevant(&swap));
        swap.state.insert(StateFlag::PaymentSigned);
        assert!(SwapStateMachine::<IdleChain, IdleChain>::payment_is_relevant(&swap));
        swap.state.insert(StateFlag::PaymentBroadcast);
        assert!(!SwapStateMachine::<IdleChain, IdleChain>::payment_is_relevant(&swap));

        let mut unsettled = record(SwapId::random());
        unsettled.state.insert(StateFlag::Unsettled);
        assert!(!SwapStateMachine::<IdleChain, IdleChain>::payment_is_relevant(&unsettled));
    }

    #[test]
    fn construction_rejects_invalid_timings() {
        let timings = SwapTimings {
            initiator_lock: LockDuration::from_hours(5),
            acceptor_lock: LockDuration::from_hours(10),
            ..SwapTimings::default()
        };
        assert!(matches!(machine(timings), Err(Error::Timelock(_))));
    }

    #[test]
    fn default_policy_redeems_automatically() {
        assert_eq!(RedeemPolicy::default(), RedeemPolicy::Auto);
    }

    #[tokio::test]
    async fn register_rejects_a_mismatched_secret() {
        let (machine, _updates) = machine(SwapTimings::default()).unwrap();
        let mut swap = record(SwapId::random());
        swap.secret = Some(Secret::from_bytes([7u8; 32]));
        assert!(matches!(
            machine.register(swap).await,
            Err(Error::Crypto(crypto::Error::SecretMismatch))
        ));
    }

    #[tokio::test]
    async fn register_files_the_record_and_notifies() {
        let (machine, mut updates) = machine(SwapTimings::default()).unwrap();
        let swap_id = SwapId::random();
        machine.register(record(swap_id)).await.unwrap();
        let update = updates.recv().await.unwrap();
        assert_eq!(update.swap_id, swap_id);
        assert_eq!(update.state, StateFlags::empty());
    }
}
