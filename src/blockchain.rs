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

//! Defines the chains a swap can settle on and the interface the swap engine drives them
//! through. One [`ChainAdapter`] implementation covers one chain or token standard: it builds and
//! broadcasts the three contract transactions and answers the queries the watchers poll with.

use std::error;
use std::fmt::Debug;
use std::io;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::consensus::{self, CanonicalBytes, Decodable, Encodable};
use crate::crypto::{Secret, SecretHash};
use crate::timelock::LockDuration;
use crate::transaction::{TxId, TxLabel};

/// List of errors a chain adapter can return. The engine reacts differently depending on the
/// variant: some abort the current attempt without touching the swap state, some are retried on
/// the next poll, the rest propagate to the caller.
#[derive(Error, Debug)]
pub enum Error {
    /// A transient provider or network error, worth retrying on the next poll.
    #[error("Transient chain error: {0}")]
    Transient(Box<dyn error::Error + Send + Sync>),
    /// No managed address holds enough balance for the requested outflow.
    #[error("Insufficient funds: needed {needed}, available {available}")]
    InsufficientFunds {
        /// Amount the transaction needs, in the smallest chain unit.
        needed: u64,
        /// Best available balance found, in the smallest chain unit.
        available: u64,
    },
    /// The wallet refused to sign for the given address.
    #[error("Signing rejected for address {0}")]
    SigningRejected(Address),
    /// The node accepted the call but rejected the transaction or returned no usable id.
    #[error("Broadcast failed: {0}")]
    BroadcastFailed(String),
    /// Any adapter error not part of this list.
    #[error("Other: {0}")]
    Other(Box<dyn error::Error + Send + Sync>),
}

impl Error {
    /// Creates a new adapter error of type [`Self::Other`] with an arbitrary payload.
    pub fn new<E>(error: E) -> Self
    where
        E: Into<Box<dyn error::Error + Send + Sync>>,
    {
        Self::Other(error.into())
    }

    /// Creates a new adapter error of type [`Self::Transient`] with an arbitrary payload.
    pub fn transient<E>(error: E) -> Self
    where
        E: Into<Box<dyn error::Error + Send + Sync>>,
    {
        Self::Transient(error.into())
    }

    /// Returns `true` when retrying the same call on the next poll interval may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Consumes the `Error`, returning its inner error (if any).
    pub fn into_inner(self) -> Option<Box<dyn error::Error + Send + Sync>> {
        match self {
            Self::Transient(error) => Some(error),
            Self::Other(error) => Some(error),
            _ => None,
        }
    }
}

/// The chains and token standards a swap leg can settle on.
#[derive(Display, Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[display(Debug)]
pub enum Blockchain {
    /// The Ethereum blockchain, native ether.
    Ethereum,
    /// An ERC20 token contract on Ethereum.
    Erc20,
    /// The Tezos blockchain, native tez.
    Tezos,
    /// An FA1.2 token contract on Tezos.
    Fa12,
    /// An FA2 token contract on Tezos.
    Fa2,
    /// An NYX token contract on Tezos.
    Nyx,
}

impl Blockchain {
    /// Returns `true` when the chain is a token standard on top of a native chain. Token locks
    /// need an allowance transaction before the contract can pull the funds.
    pub fn is_token(&self) -> bool {
        matches!(
            self,
            Blockchain::Erc20 | Blockchain::Fa12 | Blockchain::Fa2 | Blockchain::Nyx
        )
    }
}

impl Encodable for Blockchain {
    fn consensus_encode<W: io::Write>(&self, writer: &mut W) -> Result<usize, io::Error> {
        match self {
            Blockchain::Ethereum => 0x01u8.consensus_encode(writer),
            Blockchain::Erc20 => 0x02u8.consensus_encode(writer),
            Blockchain::Tezos => 0x03u8.consensus_encode(writer),
            Blockchain::Fa12 => 0x04u8.consensus_encode(writer),
            Blockchain::Fa2 => 0x05u8.consensus_encode(writer),
            Blockchain::Nyx => 0x06u8.consensus_encode(writer),
        }
    }
}

impl Decodable for Blockchain {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        match Decodable::consensus_decode(d)? {
            0x01u8 => Ok(Blockchain::Ethereum),
            0x02u8 => Ok(Blockchain::Erc20),
            0x03u8 => Ok(Blockchain::Tezos),
            0x04u8 => Ok(Blockchain::Fa12),
            0x05u8 => Ok(Blockchain::Fa2),
            0x06u8 => Ok(Blockchain::Nyx),
            _ => Err(consensus::Error::UnknownType),
        }
    }
}

impl_strict_encoding!(Blockchain);

impl FromStr for Blockchain {
    type Err = consensus::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Ethereum" | "ethereum" => Ok(Blockchain::Ethereum),
            "Erc20" | "erc20" => Ok(Blockchain::Erc20),
            "Tezos" | "tezos" => Ok(Blockchain::Tezos),
            "Fa12" | "fa12" => Ok(Blockchain::Fa12),
            "Fa2" | "fa2" => Ok(Blockchain::Fa2),
            "Nyx" | "nyx" => Ok(Blockchain::Nyx),
            _ => Err(consensus::Error::UnknownType),
        }
    }
}

/// Defines a blockchain network, identifies in which context the system interacts with the
/// blockchain.
#[derive(Display, Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[display(Debug)]
pub enum Network {
    /// Represents a real asset on his valuable network.
    Mainnet,
    /// Represents non-valuable assets on test networks.
    Testnet,
    /// Local and private testnets.
    Local,
}

impl Encodable for Network {
    fn consensus_encode<W: io::Write>(&self, writer: &mut W) -> Result<usize, io::Error> {
        match self {
            Network::Mainnet => 0x01u8.consensus_encode(writer),
            Network::Testnet => 0x02u8.consensus_encode(writer),
            Network::Local => 0x03u8.consensus_encode(writer),
        }
    }
}

impl Decodable for Network {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        match Decodable::consensus_decode(d)? {
            0x01u8 => Ok(Network::Mainnet),
            0x02u8 => Ok(Network::Testnet),
            0x03u8 => Ok(Network::Local),
            _ => Err(consensus::Error::UnknownType),
        }
    }
}

impl_strict_encoding!(Network);

impl FromStr for Network {
    type Err = consensus::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Mainnet" | "mainnet" => Ok(Network::Mainnet),
            "Testnet" | "testnet" => Ok(Network::Testnet),
            "Local" | "local" => Ok(Network::Local),
            _ => Err(consensus::Error::UnknownType),
        }
    }
}

/// Defines how aggressively an adapter prices the fees of a transaction it builds.
#[derive(Display, Debug, Clone, Copy, PartialEq, Eq)]
#[display(Debug)]
pub enum FeePriority {
    /// Price the transaction for inclusion within a reasonable number of blocks.
    Normal,
    /// Price the transaction for the next blocks, used when a deadline is close.
    High,
}

/// A chain address in the string format of its chain. The engine treats addresses as opaque
/// identifiers, only adapters interpret them.
#[derive(Display, Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[display(inner)]
#[serde(transparent)]
pub struct Address(pub String);

impl From<String> for Address {
    fn from(s: String) -> Self {
        Address(s)
    }
}

impl FromStr for Address {
    type Err = consensus::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(consensus::Error::ParseFailed("address must not be empty"));
        }
        Ok(Address(s.into()))
    }
}

impl CanonicalBytes for Address {
    fn as_canonical_bytes(&self) -> Vec<u8> {
        self.0.as_canonical_bytes()
    }

    fn from_canonical_bytes(bytes: &[u8]) -> Result<Self, consensus::Error>
    where
        Self: Sized,
    {
        Ok(Address(String::from_canonical_bytes(bytes)?))
    }
}

impl Encodable for Address {
    fn consensus_encode<W: io::Write>(&self, writer: &mut W) -> Result<usize, io::Error> {
        self.0.consensus_encode(writer)
    }
}

impl Decodable for Address {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        Ok(Address(Decodable::consensus_decode(d)?))
    }
}

impl_strict_encoding!(Address);

/// Confirmation status of a broadcast transaction.
#[derive(Display, Debug, Clone, Copy, PartialEq, Eq)]
#[display(Debug)]
pub enum TxStatus {
    /// The transaction is known but not yet confirmed.
    Pending,
    /// The transaction is confirmed at the depth the adapter requires.
    Confirmed,
    /// The transaction was dropped or reverted and will not confirm.
    Failed,
}

/// What the chain shows for the counterparty lock a swap expects.
#[derive(Display, Debug, Clone, PartialEq, Eq)]
#[display(Debug)]
pub enum LockStatus {
    /// No lock matching the swap parameters was found.
    Missing,
    /// A matching lock is on-chain but not confirmed yet.
    Pending,
    /// A matching lock is confirmed at the depth the adapter requires.
    Confirmed,
    /// A lock under the right secret hash exists but its parameters do not match the swap, with
    /// the reason the adapter rejected it.
    Mismatched(String),
}

/// Parameters to build the lock transactions of the local party.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRequest {
    /// The secret hash gating the contract.
    pub secret_hash: SecretHash,
    /// The counterparty address allowed to redeem the lock.
    pub counterparty_address: Address,
    /// The local address refunded when the time lock expires.
    pub refund_address: Address,
    /// Amount to lock, in the smallest chain unit.
    pub amount: u64,
    /// Duration after which the lock becomes refundable.
    pub lock_duration: LockDuration,
    /// Reward granted to a third party redeeming on behalf of the counterparty, in the smallest
    /// chain unit. Zero disables the reward output.
    pub reward_for_redeem: u64,
}

/// Parameters to build a redeem transaction revealing the secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedeemRequest {
    /// The secret hash identifying the contract to redeem.
    pub secret_hash: SecretHash,
    /// The preimage of the secret hash.
    pub secret: Secret,
    /// The address paying the redeem fees.
    pub from_address: Address,
}

/// Parameters to build a refund transaction reclaiming an expired lock. The contract pays the
/// funds back to the refund address it was created with; `from_address` only covers the fees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundRequest {
    /// The secret hash identifying the contract to refund.
    pub secret_hash: SecretHash,
    /// The address paying the refund fees.
    pub from_address: Address,
}

/// Identifies one side of a swap contract on a chain for redeem, refund, and audit queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapQuery {
    /// The secret hash gating the contract.
    pub secret_hash: SecretHash,
    /// The participant allowed to redeem the queried lock.
    pub participant: Address,
}

/// The lock parameters a counterparty payment must match before the swap proceeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockQuery {
    /// The secret hash gating the contract.
    pub secret_hash: SecretHash,
    /// The local address that must be allowed to redeem the lock.
    pub recipient: Address,
    /// Minimum amount the lock must hold, in the smallest chain unit.
    pub expected_amount: u64,
    /// Earliest refund time the lock must honor. A lock refundable before this instant gives the
    /// counterparty a free exit and must be rejected.
    pub refund_deadline: DateTime<Utc>,
}

/// One transaction of a lock sequence, with the address that signs it and the label the engine
/// files it under.
#[derive(Debug, Clone)]
pub struct LockTx<T> {
    /// What the transaction does in the lock sequence.
    pub label: TxLabel,
    /// The address signing and funding the transaction.
    pub from: Address,
    /// The unsigned transaction.
    pub tx: T,
}

/// Interface between the swap engine and one chain or token standard. Implementations talk to a
/// node or indexer; the engine only sequences the calls and records the outcomes, so an adapter
/// must not mutate swap state on its own.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    /// Concrete transaction type of the chain.
    type Tx: Clone + Debug + Send + Sync;

    /// The chain or token standard this adapter drives.
    fn blockchain(&self) -> Blockchain;

    /// Build the unsigned lock transactions for the local payment. Token standards return the
    /// allowance transactions after the payment; funds split over several addresses return one
    /// payment per address. An empty vector means there is nothing to pay.
    async fn build_lock_txs(&self, request: &LockRequest) -> Result<Vec<LockTx<Self::Tx>>, Error>;

    /// Build the unsigned transaction redeeming the lock gated by the request's secret hash,
    /// revealing the secret on-chain.
    async fn build_redeem_tx(&self, request: &RedeemRequest) -> Result<Self::Tx, Error>;

    /// Build the unsigned transaction reclaiming the expired local lock.
    async fn build_refund_tx(&self, request: &RefundRequest) -> Result<Self::Tx, Error>;

    /// Sign the transaction with the key of the given address.
    async fn sign(&self, tx: &mut Self::Tx, from: &Address) -> Result<(), Error>;

    /// Submit a signed transaction to the chain and return its id.
    async fn broadcast(&self, tx: &Self::Tx) -> Result<TxId, Error>;

    /// Confirmation status of a broadcast transaction.
    async fn tx_status(&self, id: &TxId) -> Result<TxStatus, Error>;

    /// What the chain shows for the counterparty lock described by the query.
    async fn lock_status(&self, query: &LockQuery) -> Result<LockStatus, Error>;

    /// Returns the revealed secret when the queried lock was redeemed, [`None`] otherwise.
    async fn redeemed_secret(&self, query: &SwapQuery) -> Result<Option<Secret>, Error>;

    /// Returns `true` when the queried lock was refunded to its owner.
    async fn is_refunded(&self, query: &SwapQuery) -> Result<bool, Error>;

    /// Pick a managed address holding at least `min_balance`, preferring addresses that can pay
    /// fees at the given priority.
    async fn spendable_address(
        &self,
        min_balance: u64,
        priority: FeePriority,
    ) -> Result<Address, Error>;

    /// Scan the chain for the lock transactions matching the query, for recovery and audit.
    async fn find_locks(&self, query: &SwapQuery) -> Result<Vec<Self::Tx>, Error>;

    /// Scan the chain for top-up transactions raising an existing lock, for recovery and audit.
    async fn find_additional_locks(&self, query: &SwapQuery) -> Result<Vec<Self::Tx>, Error>;

    /// Scan the chain for redeem transactions of the queried lock, for recovery and audit.
    async fn find_redeems(&self, query: &SwapQuery) -> Result<Vec<Self::Tx>, Error>;

    /// Scan the chain for refund transactions of the queried lock, for recovery and audit.
    async fn find_refunds(&self, query: &SwapQuery) -> Result<Vec<Self::Tx>, Error>;
}
