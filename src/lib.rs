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

//! Waygate core library implements the swap engine used by the Waygate non-custodial exchange
//! client to execute atomic swaps across its supported chains. A swap locks funds on two
//! blockchains under the same secret hash; the engine signs and broadcasts the lock, redeem, and
//! refund transactions of the local party, watches both chains for the counterparty moves, and
//! drives every swap to one of its terminal states: redeemed, refunded, or unsettled.
//!
//! ## The engine
//!
//! [`machine::SwapStateMachine`] holds the operations a party runs over the lifetime of a swap:
//! paying the local lock, controlling the counterparty lock, redeeming with the revealed secret,
//! and refunding after the local time lock expires. Each operation reads and appends to the
//! monotonic [`swap::StateFlags`] of a [`swap::SwapRecord`] persisted in a [`store::SwapStore`],
//! so a crashed client resumes exactly where it stopped.
//!
//! ## Chains
//!
//! Blockchains are reached through the [`blockchain::ChainAdapter`] trait. An adapter builds,
//! signs, and broadcasts the contract transactions of one chain and answers the queries the
//! watchers poll with. The engine itself never touches keys or wire formats, it only sequences
//! adapter calls and records outcomes.
//!
//! ## Time
//!
//! All swap deadlines derive from [`timelock::SwapTimings`]: the initiator locks strictly longer
//! than the acceptor, redeems stop before the counterparty refund window opens, and refunds fire
//! only once the local lock expired. The [`scheduler`] and [`watcher`] modules turn those
//! deadlines into cancellable background tasks.

#[macro_use]
extern crate amplify;
#[macro_use]
extern crate serde;

use thiserror::Error;

use std::error;
use std::io;

#[macro_use]
pub mod consensus;

pub mod blockchain;
pub mod crypto;
pub mod events;
pub mod hash;
pub mod locker;
pub mod machine;
pub mod role;
pub mod scheduler;
pub mod store;
pub mod swap;
pub mod timelock;
pub mod transaction;
pub mod watcher;

use consensus::{Decodable, Encodable};

/// A list of possible errors when executing a cross-chain atomic swap with the **Waygate**
/// software stack. Each error can have multiple levels down to the blockchain implementation.
#[derive(Error, Debug)]
pub enum Error {
    /// A consensus error during encoding/decoding operation or data type mismatch.
    #[error("Consensus error: {0}")]
    Consensus(#[from] consensus::Error),
    /// A cryptographic error during secret generation, hashing, or validation.
    #[error("Cryptographic error: {0}")]
    Crypto(#[from] crypto::Error),
    /// A blockchain adapter error during transaction construction, signature, broadcast, or
    /// chain queries.
    #[error("Blockchain error: {0}")]
    Blockchain(#[from] blockchain::Error),
    /// A swap store error during persistence or state transition.
    #[error("Store error: {0}")]
    Store(#[from] store::Error),
    /// A time lock configuration or ordering error.
    #[error("Time lock error: {0}")]
    Timelock(#[from] timelock::Error),
    /// A swap engine error while driving a swap operation.
    #[error("Swap engine error: {0}")]
    Machine(#[from] machine::Error),
    /// Any other error not part of this list.
    #[error("Other error: {0}")]
    Other(Box<dyn error::Error + Send + Sync>),
}

impl Error {
    /// Creates a new error of type [`Self::Other`] with an arbitrary payload.
    pub fn new<E>(error: E) -> Self
    where
        E: Into<Box<dyn error::Error + Send + Sync>>,
    {
        Self::Other(error.into())
    }

    /// Consumes the `Error`, returning its inner error (if any).
    ///
    /// If this [`enum@Error`] was constructed via [`new`] then this function will return [`Some`],
    /// otherwise it will return [`None`].
    ///
    /// [`new`]: Error::new
    ///
    pub fn into_inner(self) -> Option<Box<dyn error::Error + Send + Sync>> {
        match self {
            Self::Other(error) => Some(error),
            _ => None,
        }
    }
}

/// Result type used when the returned `Ok` case and the returned `Err` case can come from any
/// module of the library.
pub type Res<T> = Result<T, Error>;

/// A unique identifier, a wrapper around [`uuid::Uuid`] implementing the consensus encoding used
/// by identifiers across the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(transparent)]
#[display(inner)]
pub struct Uuid(uuid::Uuid);

impl Uuid {
    /// Generate a new random (version 4) identifier.
    pub fn new() -> Self {
        Uuid(uuid::Uuid::new_v4())
    }
}

impl Default for Uuid {
    fn default() -> Self {
        Self::new()
    }
}

impl From<uuid::Uuid> for Uuid {
    fn from(u: uuid::Uuid) -> Self {
        Uuid(u)
    }
}

impl From<Uuid> for uuid::Uuid {
    fn from(u: Uuid) -> Self {
        u.0
    }
}

impl Encodable for Uuid {
    fn consensus_encode<W: io::Write>(&self, writer: &mut W) -> Result<usize, io::Error> {
        self.0.to_bytes_le().consensus_encode(writer)
    }
}

impl Decodable for Uuid {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        let bytes: [u8; 16] = Decodable::consensus_decode(d)?;
        Ok(Uuid(uuid::Uuid::from_bytes_le(bytes)))
    }
}

impl_strict_encoding!(Uuid);
