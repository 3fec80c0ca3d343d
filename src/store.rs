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

//! Persistence of swap records. The engine persists every state change before it notifies
//! anyone, so a restart can trust that whatever the store returns is at least as advanced as
//! anything an observer was told. Writes are append-only: flags accumulate, transaction
//! references and the secret fill empty slots, and a whole-record update must carry a superset
//! of the stored facts.

use std::collections::HashMap;
use std::error;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::crypto::Secret;
use crate::swap::{StateFlag, SwapId, SwapRecord};
use crate::transaction::{TxLabel, TxRef};

/// Errors of the swap record store.
#[derive(Error, Debug)]
pub enum Error {
    /// The swap is not filed in the store.
    #[error("Swap not found")]
    NotFound,
    /// A record with the same identifier is already filed.
    #[error("Swap already exists")]
    AlreadyExists,
    /// The write would drop a fact already recorded for the swap.
    #[error("Recorded facts accumulate and are never dropped")]
    MonotonicityViolation,
    /// The record has no slot for transactions carrying this label.
    #[error("No record slot for {0} transactions")]
    UnsupportedLabel(TxLabel),
    /// A different secret is already recorded for the swap.
    #[error("A different secret is already recorded")]
    SecretConflict,
    /// Any store error not part of this list.
    #[error("Other: {0}")]
    Other(Box<dyn error::Error + Send + Sync + 'static>),
}

impl Error {
    /// Creates a new store error of type other with an arbitrary payload.
    pub fn new<E>(error: E) -> Self
    where
        E: Into<Box<dyn error::Error + Send + Sync + 'static>>,
    {
        Self::Other(error.into())
    }

    /// Consumes the `Other` error type and returns the inner error, otherwise `None`.
    pub fn into_inner(self) -> Option<Box<dyn error::Error + Send + Sync + 'static>> {
        match self {
            Self::Other(error) => Some(error),
            _ => None,
        }
    }
}

/// Where swap records live. Implementations must persist a write before returning from it; the
/// engine relies on the write being durable when it notifies observers of the change.
#[async_trait]
pub trait SwapStore: Send + Sync {
    /// File a freshly negotiated record. Fails with [`Error::AlreadyExists`] when the identifier
    /// is taken.
    async fn insert(&self, record: SwapRecord) -> Result<(), Error>;

    /// Fetch the record of a swap.
    async fn get(&self, swap_id: SwapId) -> Result<SwapRecord, Error>;

    /// All records still needing local action, the set a restart resumes. A swap leaves this
    /// set once a redeem or refund confirmed; an unsettled swap stays until its own lock is
    /// reclaimed.
    async fn list_active(&self) -> Result<Vec<SwapRecord>, Error>;

    /// Record a fact for the swap and return the updated record. Recording a fact twice is a
    /// no-op, not an error.
    async fn append_flag(&self, swap_id: SwapId, flag: StateFlag) -> Result<SwapRecord, Error>;

    /// File the reference of the last broadcast transaction in the slot its label names.
    /// Allowance transactions have no slot, they are never reattached after a restart.
    async fn attach_tx(&self, swap_id: SwapId, tx: TxRef) -> Result<SwapRecord, Error>;

    /// Record the revealed preimage. Storing the same secret again is a no-op; storing a
    /// different one fails with [`Error::SecretConflict`].
    async fn set_secret(&self, swap_id: SwapId, secret: Secret) -> Result<SwapRecord, Error>;

    /// Replace a stored record wholesale. The new state must be a superset of the stored facts,
    /// otherwise the write fails with [`Error::MonotonicityViolation`].
    async fn update(&self, record: SwapRecord) -> Result<(), Error>;
}

/// An in-memory store over a [`HashMap`] guarded by an async lock. The reference implementation
/// for tests and for embedders that persist elsewhere.
#[derive(Debug, Default)]
pub struct MemoryStore {
    swaps: RwLock<HashMap<SwapId, SwapRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SwapStore for MemoryStore {
    async fn insert(&self, record: SwapRecord) -> Result<(), Error> {
        let mut swaps = self.swaps.write().await;
        if swaps.contains_key(&record.swap_id) {
            return Err(Error::AlreadyExists);
        }
        swaps.insert(record.swap_id, record);
        Ok(())
    }

    async fn get(&self, swap_id: SwapId) -> Result<SwapRecord, Error> {
        self.swaps
            .read()
            .await
            .get(&swap_id)
            .cloned()
            .ok_or(Error::NotFound)
    }

    async fn list_active(&self) -> Result<Vec<SwapRecord>, Error> {
        Ok(self
            .swaps
            .read()
            .await
            .values()
            .filter(|record| !record.is_settled())
            .cloned()
            .collect())
    }

    async fn append_flag(&self, swap_id: SwapId, flag: StateFlag) -> Result<SwapRecord, Error> {
        let mut swaps = self.swaps.write().await;
        let record = swaps.get_mut(&swap_id).ok_or(Error::NotFound)?;
        record.state.insert(flag);
        Ok(record.clone())
    }

    async fn attach_tx(&self, swap_id: SwapId, tx: TxRef) -> Result<SwapRecord, Error> {
        let mut swaps = self.swaps.write().await;
        let record = swaps.get_mut(&swap_id).ok_or(Error::NotFound)?;
        match tx.label {
            TxLabel::Payment => record.payment_tx = Some(tx),
            TxLabel::Redeem => record.redeem_tx = Some(tx),
            TxLabel::Refund => record.refund_tx = Some(tx),
            TxLabel::TokenApprove => return Err(Error::UnsupportedLabel(tx.label)),
        }
        Ok(record.clone())
    }

    async fn set_secret(&self, swap_id: SwapId, secret: Secret) -> Result<SwapRecord, Error> {
        let mut swaps = self.swaps.write().await;
        let record = swaps.get_mut(&swap_id).ok_or(Error::NotFound)?;
        match record.secret {
            Some(existing) if existing != secret => return Err(Error::SecretConflict),
            _ => record.secret = Some(secret),
        }
        Ok(record.clone())
    }

    async fn update(&self, record: SwapRecord) -> Result<(), Error> {
        let mut swaps = self.swaps.write().await;
        let stored = swaps.get_mut(&record.swap_id).ok_or(Error::NotFound)?;
        if !record.state.is_superset(&stored.state) {
            return Err(Error::MonotonicityViolation);
        }
        *stored = record;
        Ok(())
    }
}
