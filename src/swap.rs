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

//! The swap record and its append-only state. A [`SwapRecord`] is the aggregate root of one
//! negotiated trade: immutable parameters fixed by the negotiation layer and a monotonic set of
//! [`StateFlags`] the engine appends to as transactions move. Flags are facts, never unset; a
//! restart derives where to resume from the highest facts recorded.

use std::fmt::{self, Display};
use std::io;
use std::str::FromStr;

use bitvec::array::BitArray;
use bitvec::order::Lsb0;
use chrono::{DateTime, TimeZone, Utc};
use serde::ser::{Serialize, Serializer};
use serde::{de, Deserialize, Deserializer};
use strict_encoding::{StrictDecode, StrictEncode};
use tiny_keccak::{Hasher, Keccak};

use crate::blockchain::{Address, Blockchain, Network, SwapQuery};
use crate::consensus::{self, serialize, Decodable, Encodable};
use crate::crypto::{Secret, SecretHash, SecretHashAlgo};
use crate::role::SwapRole;
use crate::transaction::TxRef;
use crate::Uuid;

/// Magic bytes leading every consensus encoded swap record.
pub const SWAP_MAGIC_BYTES: &[u8; 6] = b"WGSWAP";

/// The identifier of a swap, assigned by the exchange when the trade matches. This is a wrapper
/// around [`Uuid`].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    Serialize,
    Deserialize,
    StrictEncode,
    StrictDecode,
)]
#[serde(transparent)]
#[display(inner)]
pub struct SwapId(pub Uuid);

impl SwapId {
    /// Generate a random identifier.
    pub fn random() -> Self {
        SwapId(Uuid::new())
    }
}

impl From<Uuid> for SwapId {
    fn from(u: Uuid) -> Self {
        SwapId(u)
    }
}

impl From<uuid::Uuid> for SwapId {
    fn from(u: uuid::Uuid) -> Self {
        SwapId(u.into())
    }
}

impl Encodable for SwapId {
    fn consensus_encode<W: io::Write>(&self, s: &mut W) -> Result<usize, io::Error> {
        self.0.consensus_encode(s)
    }
}

impl Decodable for SwapId {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        Ok(Self(Decodable::consensus_decode(d)?))
    }
}

/// One boolean fact in the life of a swap. Facts are independent and monotonic: the engine only
/// ever adds them, which keeps every past observation auditable.
#[derive(Display, Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[display(Debug)]
pub enum StateFlag {
    /// The local payment is signed.
    PaymentSigned,
    /// The local payment is broadcast.
    PaymentBroadcast,
    /// The counterparty lock was observed on-chain.
    PartyPaymentSeen,
    /// The counterparty lock is confirmed and matches the swap parameters.
    PartyPaymentConfirmed,
    /// The local redeem of the counterparty lock is signed.
    RedeemSigned,
    /// The local redeem is broadcast.
    RedeemBroadcast,
    /// The inbound leg settled: the counterparty lock was redeemed toward this party.
    RedeemConfirmed,
    /// The local refund is signed.
    RefundSigned,
    /// The local refund is broadcast.
    RefundBroadcast,
    /// The local lock was reclaimed after its time lock expired.
    RefundConfirmed,
    /// The counterparty refunded before this party could redeem; the swap failed terminally.
    Unsettled,
}

impl StateFlag {
    /// All facts, in bit order.
    pub const ALL: [StateFlag; 11] = [
        StateFlag::PaymentSigned,
        StateFlag::PaymentBroadcast,
        StateFlag::PartyPaymentSeen,
        StateFlag::PartyPaymentConfirmed,
        StateFlag::RedeemSigned,
        StateFlag::RedeemBroadcast,
        StateFlag::RedeemConfirmed,
        StateFlag::RefundSigned,
        StateFlag::RefundBroadcast,
        StateFlag::RefundConfirmed,
        StateFlag::Unsettled,
    ];

    /// Position of the fact in the [`StateFlags`] bitset.
    pub fn bit(&self) -> usize {
        *self as usize
    }
}

impl Encodable for StateFlag {
    fn consensus_encode<W: io::Write>(&self, writer: &mut W) -> Result<usize, io::Error> {
        match self {
            StateFlag::PaymentSigned => 0x01u16.consensus_encode(writer),
            StateFlag::PaymentBroadcast => 0x02u16.consensus_encode(writer),
            StateFlag::PartyPaymentSeen => 0x03u16.consensus_encode(writer),
            StateFlag::PartyPaymentConfirmed => 0x04u16.consensus_encode(writer),
            StateFlag::RedeemSigned => 0x05u16.consensus_encode(writer),
            StateFlag::RedeemBroadcast => 0x06u16.consensus_encode(writer),
            StateFlag::RedeemConfirmed => 0x07u16.consensus_encode(writer),
            StateFlag::RefundSigned => 0x08u16.consensus_encode(writer),
            StateFlag::RefundBroadcast => 0x09u16.consensus_encode(writer),
            StateFlag::RefundConfirmed => 0x0au16.consensus_encode(writer),
            StateFlag::Unsettled => 0x0bu16.consensus_encode(writer),
        }
    }
}

impl Decodable for StateFlag {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        match Decodable::consensus_decode(d)? {
            0x01u16 => Ok(StateFlag::PaymentSigned),
            0x02u16 => Ok(StateFlag::PaymentBroadcast),
            0x03u16 => Ok(StateFlag::PartyPaymentSeen),
            0x04u16 => Ok(StateFlag::PartyPaymentConfirmed),
            0x05u16 => Ok(StateFlag::RedeemSigned),
            0x06u16 => Ok(StateFlag::RedeemBroadcast),
            0x07u16 => Ok(StateFlag::RedeemConfirmed),
            0x08u16 => Ok(StateFlag::RefundSigned),
            0x09u16 => Ok(StateFlag::RefundBroadcast),
            0x0au16 => Ok(StateFlag::RefundConfirmed),
            0x0bu16 => Ok(StateFlag::Unsettled),
            _ => Err(consensus::Error::UnknownType),
        }
    }
}

impl_strict_encoding!(StateFlag);

impl FromStr for StateFlag {
    type Err = consensus::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StateFlag::ALL
            .iter()
            .find(|flag| format!("{}", flag) == s)
            .copied()
            .ok_or(consensus::Error::UnknownType)
    }
}

/// Bits a [`StateFlags`] value may carry.
const VALID_FLAG_MASK: u16 = (1 << StateFlag::ALL.len()) - 1;

/// The append-only set of facts recorded for a swap. Serialized as a plain 16-bit mask, one bit
/// per [`StateFlag`].
#[derive(Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct StateFlags {
    bits: BitArray<[u16; 1], Lsb0>,
}

impl StateFlags {
    /// The empty set, state of a freshly negotiated swap.
    pub fn empty() -> Self {
        StateFlags {
            bits: BitArray::ZERO,
        }
    }

    /// Record a fact. Recording a fact twice is a no-op.
    pub fn insert(&mut self, flag: StateFlag) {
        self.bits.set(flag.bit(), true);
    }

    /// Returns `true` when the fact was recorded.
    pub fn contains(&self, flag: StateFlag) -> bool {
        self.bits[flag.bit()]
    }

    /// Returns `true` when every fact of `other` is also recorded here. Monotonicity means a
    /// newer state of the same swap is always a superset of an older one.
    pub fn is_superset(&self, other: &StateFlags) -> bool {
        self.raw() & other.raw() == other.raw()
    }

    /// Returns `true` when the swap reached one of its terminal states.
    pub fn is_terminal(&self) -> bool {
        self.contains(StateFlag::RedeemConfirmed)
            || self.contains(StateFlag::RefundConfirmed)
            || self.contains(StateFlag::Unsettled)
    }

    /// Returns `true` once a confirmed redeem or refund closed the swap locally. An unsettled
    /// swap is terminal for its inbound leg but stays unsettled locally until the own lock is
    /// reclaimed, so it does not count as settled.
    pub fn is_settled(&self) -> bool {
        self.contains(StateFlag::RedeemConfirmed) || self.contains(StateFlag::RefundConfirmed)
    }

    /// The recorded facts, in bit order.
    pub fn flags(&self) -> impl Iterator<Item = StateFlag> + '_ {
        StateFlag::ALL
            .iter()
            .copied()
            .filter(move |flag| self.contains(*flag))
    }

    /// The raw 16-bit mask.
    pub fn raw(&self) -> u16 {
        self.bits.data[0]
    }

    /// The phase the recorded facts amount to. Later facts shadow earlier ones, the refund
    /// branch shadows the redeem branch it aborts, and [`StateFlag::Unsettled`] shadows
    /// everything.
    pub fn phase(&self) -> SwapPhase {
        if self.contains(StateFlag::Unsettled) {
            SwapPhase::Unsettled
        } else if self.contains(StateFlag::RefundConfirmed) {
            SwapPhase::Refunded
        } else if self.contains(StateFlag::RefundSigned) || self.contains(StateFlag::RefundBroadcast)
        {
            SwapPhase::Refunding
        } else if self.contains(StateFlag::RedeemConfirmed) {
            SwapPhase::Redeemed
        } else if self.contains(StateFlag::RedeemSigned) || self.contains(StateFlag::RedeemBroadcast)
        {
            SwapPhase::Redeeming
        } else if self.contains(StateFlag::PartyPaymentConfirmed) {
            SwapPhase::PartyPaymentConfirmed
        } else if self.contains(StateFlag::PartyPaymentSeen) {
            SwapPhase::PartyPaymentSeen
        } else if self.contains(StateFlag::PaymentBroadcast) {
            SwapPhase::PaymentBroadcast
        } else if self.contains(StateFlag::PaymentSigned) {
            SwapPhase::PaymentPending
        } else {
            SwapPhase::Created
        }
    }
}

impl Default for StateFlags {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for StateFlags {
    fn eq(&self, other: &Self) -> bool {
        self.raw() == other.raw()
    }
}

impl Eq for StateFlags {}

impl std::hash::Hash for StateFlags {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.raw().hash(state);
    }
}

impl Display for StateFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.raw() == 0 {
            return write!(f, "none");
        }
        let names: Vec<String> = self.flags().map(|flag| format!("{}", flag)).collect();
        write!(f, "{}", names.join(" | "))
    }
}

impl fmt::Debug for StateFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "StateFlags({})", self)
    }
}

impl TryFrom<u16> for StateFlags {
    type Error = consensus::Error;

    fn try_from(raw: u16) -> Result<Self, Self::Error> {
        if raw & !VALID_FLAG_MASK != 0 {
            return Err(consensus::Error::UnknownType);
        }
        Ok(StateFlags {
            bits: BitArray::new([raw]),
        })
    }
}

impl From<StateFlags> for u16 {
    fn from(flags: StateFlags) -> u16 {
        flags.raw()
    }
}

impl Encodable for StateFlags {
    fn consensus_encode<W: io::Write>(&self, writer: &mut W) -> Result<usize, io::Error> {
        self.raw().consensus_encode(writer)
    }
}

impl Decodable for StateFlags {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        let raw: u16 = Decodable::consensus_decode(d)?;
        StateFlags::try_from(raw)
    }
}

impl_strict_encoding!(StateFlags);

/// The phase a swap is in, derived from its [`StateFlags`]. Not stored, purely a view for
/// operators and logs.
#[derive(Display, Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[display(Debug)]
pub enum SwapPhase {
    /// No transaction moved yet.
    Created,
    /// The local payment is signed but not broadcast.
    PaymentPending,
    /// The local payment is on-chain.
    PaymentBroadcast,
    /// The counterparty lock was observed.
    PartyPaymentSeen,
    /// The counterparty lock is confirmed.
    PartyPaymentConfirmed,
    /// A redeem of the counterparty lock is in flight.
    Redeeming,
    /// The inbound leg settled. Terminal.
    Redeemed,
    /// A refund of the local lock is in flight.
    Refunding,
    /// The local lock was reclaimed. Terminal.
    Refunded,
    /// The counterparty refunded before this party redeemed. Terminal.
    Unsettled,
}

impl SwapPhase {
    /// Returns `true` for the three phases a swap never leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SwapPhase::Redeemed | SwapPhase::Refunded | SwapPhase::Unsettled
        )
    }
}

fixed_hash::construct_fixed_hash!(
    /// Identify a swap by its content, internally store the hash of the swap parameters
    /// serialized with Waygate consensus.
    pub struct SwapFingerprint(32);
);

impl Serialize for SwapFingerprint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(format!("{:#x}", self).as_ref())
    }
}

impl<'de> Deserialize<'de> for SwapFingerprint {
    fn deserialize<D>(deserializer: D) -> Result<SwapFingerprint, D::Error>
    where
        D: Deserializer<'de>,
    {
        SwapFingerprint::from_str(&deserializer.deserialize_string(crate::hash::HashString)?)
            .map_err(de::Error::custom)
    }
}

/// The aggregate root of one negotiated trade. Parameters are fixed by the negotiation layer and
/// never change; the engine only appends [`StateFlags`], stores the revealed secret, and files
/// the [`TxRef`] of each phase transaction. Records are never deleted, terminal swaps stay as
/// history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRecord {
    /// The swap unique identifier, assigned by the exchange.
    pub swap_id: SwapId,
    /// The role this party plays.
    pub role: SwapRole,
    /// Chain of the local lock.
    pub blockchain: Blockchain,
    /// Chain of the counterparty lock.
    pub party_blockchain: Blockchain,
    /// Network both legs settle on.
    pub network: Network,
    /// Hash algorithm the contracts of this swap compute the secret hash with.
    pub hash_algo: SecretHashAlgo,
    /// The hash both parties lock under.
    pub secret_hash: SecretHash,
    /// The preimage, present for the secret holder from creation and for the counterparty once
    /// extracted from a redeem observed on-chain.
    pub secret: Option<Secret>,
    /// Creation time, the anchor every deadline derives from.
    pub created_at: DateTime<Utc>,
    /// Local address receiving the counterparty funds.
    pub to_address: Address,
    /// Counterparty address receiving the local funds.
    pub party_address: Address,
    /// Local address refunded when the local lock expires.
    pub refund_address: Address,
    /// Counterparty refund address on the counterparty chain.
    pub party_refund_address: Address,
    /// Amount this party locks, in the smallest unit of its chain.
    pub amount: u64,
    /// Amount the counterparty must lock, in the smallest unit of its chain.
    pub party_amount: u64,
    /// Reward offered to whoever redeems the local lock on behalf of the counterparty.
    pub reward_for_redeem: u64,
    /// Reward the counterparty offers on its own lock.
    pub party_reward_for_redeem: u64,
    /// The facts recorded so far.
    pub state: StateFlags,
    /// Reference to the last broadcast payment transaction.
    pub payment_tx: Option<TxRef>,
    /// Reference to the last broadcast redeem transaction.
    pub redeem_tx: Option<TxRef>,
    /// Reference to the last broadcast refund transaction.
    pub refund_tx: Option<TxRef>,
}

/// Immutable parameters of a record, the part the fingerprint commits to.
#[derive(Debug)]
struct RecordParams<'a>(&'a SwapRecord);

impl Encodable for RecordParams<'_> {
    fn consensus_encode<W: io::Write>(&self, s: &mut W) -> Result<usize, io::Error> {
        let record = self.0;
        let mut len = record.role.consensus_encode(s)?;
        len += record.blockchain.consensus_encode(s)?;
        len += record.party_blockchain.consensus_encode(s)?;
        len += record.network.consensus_encode(s)?;
        len += record.hash_algo.consensus_encode(s)?;
        len += record.secret_hash.consensus_encode(s)?;
        len += record.created_at.timestamp().consensus_encode(s)?;
        len += record.to_address.consensus_encode(s)?;
        len += record.party_address.consensus_encode(s)?;
        len += record.refund_address.consensus_encode(s)?;
        len += record.party_refund_address.consensus_encode(s)?;
        len += record.amount.consensus_encode(s)?;
        len += record.party_amount.consensus_encode(s)?;
        len += record.reward_for_redeem.consensus_encode(s)?;
        Ok(len + record.party_reward_for_redeem.consensus_encode(s)?)
    }
}

impl SwapRecord {
    /// Returns `true` when the fact was recorded for this swap.
    pub fn has(&self, flag: StateFlag) -> bool {
        self.state.contains(flag)
    }

    /// The phase the recorded facts amount to.
    pub fn phase(&self) -> SwapPhase {
        self.state.phase()
    }

    /// Returns `true` when the swap reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Returns `true` once a confirmed redeem or refund closed the swap locally.
    pub fn is_settled(&self) -> bool {
        self.state.is_settled()
    }

    /// Query identifying the local lock: the counterparty is the participant allowed to redeem
    /// it.
    pub fn own_lock_query(&self) -> SwapQuery {
        SwapQuery {
            secret_hash: self.secret_hash,
            participant: self.party_address.clone(),
        }
    }

    /// Query identifying the counterparty lock: this party is the participant allowed to redeem
    /// it.
    pub fn party_lock_query(&self) -> SwapQuery {
        SwapQuery {
            secret_hash: self.secret_hash,
            participant: self.to_address.clone(),
        }
    }

    /// Generate the [`SwapFingerprint`] of the record. The fingerprint identifies the content of
    /// the swap parameters (**without the uuid and without the mutable state**) by taking the
    /// hash value of their serialization.
    pub fn fingerprint(&self) -> SwapFingerprint {
        let mut keccak = Keccak::v256();
        let mut out = [0u8; 32];
        keccak.update(&serialize(&RecordParams(self)));
        keccak.finalize(&mut out);
        SwapFingerprint(out)
    }

    /// Returns the hex string representation of the consensus encoded record.
    pub fn to_hex(&self) -> String {
        consensus::serialize_hex(self)
    }
}

impl Display for SwapRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Uuid: {}", self.swap_id)?;
        writeln!(f, "Fingerprint: {:?}", self.fingerprint())?;
        writeln!(f, "Role: {}", self.role)?;
        writeln!(f, "Network: {}", self.network)?;
        writeln!(f, "Blockchain: {}", self.blockchain)?;
        writeln!(f, "- amount: {}", self.amount)?;
        writeln!(f, "- reward for redeem: {}", self.reward_for_redeem)?;
        writeln!(f, "Party blockchain: {}", self.party_blockchain)?;
        writeln!(f, "- amount: {}", self.party_amount)?;
        writeln!(f, "- reward for redeem: {}", self.party_reward_for_redeem)?;
        writeln!(f, "Secret hash: {:#x}", self.secret_hash)?;
        writeln!(f, "Created at: {}", self.created_at)?;
        writeln!(f, "State: {}", self.state)?;
        writeln!(f, "Phase: {}", self.phase())
    }
}

impl Encodable for SwapRecord {
    fn consensus_encode<W: io::Write>(&self, s: &mut W) -> Result<usize, io::Error> {
        let mut len = SWAP_MAGIC_BYTES.consensus_encode(s)?;
        len += self.swap_id.consensus_encode(s)?;
        len += RecordParams(self).consensus_encode(s)?;
        len += self.secret.consensus_encode(s)?;
        len += self.state.consensus_encode(s)?;
        len += self.payment_tx.consensus_encode(s)?;
        len += self.redeem_tx.consensus_encode(s)?;
        Ok(len + self.refund_tx.consensus_encode(s)?)
    }
}

impl Decodable for SwapRecord {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        let magic: [u8; 6] = Decodable::consensus_decode(d)?;
        if magic != *SWAP_MAGIC_BYTES {
            return Err(consensus::Error::IncorrectMagicBytes);
        }
        let swap_id = Decodable::consensus_decode(d)?;
        let role = Decodable::consensus_decode(d)?;
        let blockchain = Decodable::consensus_decode(d)?;
        let party_blockchain = Decodable::consensus_decode(d)?;
        let network = Decodable::consensus_decode(d)?;
        let hash_algo = Decodable::consensus_decode(d)?;
        let secret_hash = Decodable::consensus_decode(d)?;
        let timestamp: i64 = Decodable::consensus_decode(d)?;
        let created_at = Utc
            .timestamp_opt(timestamp, 0)
            .single()
            .ok_or(consensus::Error::ParseFailed("invalid creation timestamp"))?;
        Ok(SwapRecord {
            swap_id,
            role,
            blockchain,
            party_blockchain,
            network,
            hash_algo,
            secret_hash,
            created_at,
            to_address: Decodable::consensus_decode(d)?,
            party_address: Decodable::consensus_decode(d)?,
            refund_address: Decodable::consensus_decode(d)?,
            party_refund_address: Decodable::consensus_decode(d)?,
            amount: Decodable::consensus_decode(d)?,
            party_amount: Decodable::consensus_decode(d)?,
            reward_for_redeem: Decodable::consensus_decode(d)?,
            party_reward_for_redeem: Decodable::consensus_decode(d)?,
            secret: Decodable::consensus_decode(d)?,
            state: Decodable::consensus_decode(d)?,
            payment_tx: Decodable::consensus_decode(d)?,
            redeem_tx: Decodable::consensus_decode(d)?,
            refund_tx: Decodable::consensus_decode(d)?,
        })
    }
}

impl_strict_encoding!(SwapRecord);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::deserialize;
    use crate::crypto::Secret;
    use crate::transaction::{TxId, TxLabel};

    fn sample_record() -> SwapRecord {
        let secret = Secret::from_bytes([7u8; 32]);
        let hash_algo = SecretHashAlgo::Sha256d;
        SwapRecord {
            swap_id: SwapId::random(),
            role: SwapRole::Initiator,
            blockchain: Blockchain::Ethereum,
            party_blockchain: Blockchain::Fa12,
            network: Network::Testnet,
            hash_algo,
            secret_hash: hash_algo.hash(&secret),
            secret: Some(secret),
            created_at: Utc.timestamp_opt(1_700_000_000, 0).single().unwrap(),
            to_address: Address("tz1VSUr8wwNhLAzempoch5d6hLRiTh8Cjcjb".to_string()),
            party_address: Address("0x1f9090aaE28b8a3dCeaDf281B0F12828e676c326".to_string()),
            refund_address: Address("0xAb5801a7D398351b8bE11C439e05C5b3259aeC9B".to_string()),
            party_refund_address: Address("tz1XrCvviH8CqoHMSKpKuznLArEa1yR9U7ep".to_string()),
            amount: 1_500_000_000_000_000_000,
            party_amount: 42_000_000,
            reward_for_redeem: 0,
            party_reward_for_redeem: 10_000,
            state: StateFlags::empty(),
            payment_tx: None,
            redeem_tx: None,
            refund_tx: None,
        }
    }

    #[test]
    fn flags_are_monotonic_inserts() {
        let mut flags = StateFlags::empty();
        assert!(!flags.contains(StateFlag::PaymentSigned));
        flags.insert(StateFlag::PaymentSigned);
        flags.insert(StateFlag::PaymentSigned);
        assert!(flags.contains(StateFlag::PaymentSigned));
        assert_eq!(flags.raw(), 0b1);
        flags.insert(StateFlag::Unsettled);
        assert_eq!(flags.raw(), 0b100_0000_0001);
    }

    #[test]
    fn superset_orders_states_of_one_swap() {
        let mut older = StateFlags::empty();
        older.insert(StateFlag::PaymentSigned);
        let mut newer = older;
        newer.insert(StateFlag::PaymentBroadcast);
        assert!(newer.is_superset(&older));
        assert!(!older.is_superset(&newer));
        assert!(newer.is_superset(&newer));
    }

    #[test]
    fn unknown_bits_rejected() {
        assert!(StateFlags::try_from(0x07ff).is_ok());
        assert!(StateFlags::try_from(0x0800).is_err());
        assert!(StateFlags::try_from(0xffff).is_err());
    }

    #[test]
    fn flag_consensus_codes() {
        assert_eq!(serialize(&StateFlag::PaymentSigned), vec![0x01, 0x00]);
        assert_eq!(serialize(&StateFlag::Unsettled), vec![0x0b, 0x00]);
        assert_eq!(
            deserialize::<StateFlag>(&[0x07, 0x00]).unwrap(),
            StateFlag::RedeemConfirmed
        );
        assert!(deserialize::<StateFlag>(&[0x0c, 0x00]).is_err());
    }

    #[test]
    fn phase_priorities() {
        let mut flags = StateFlags::empty();
        assert_eq!(flags.phase(), SwapPhase::Created);
        flags.insert(StateFlag::PaymentSigned);
        assert_eq!(flags.phase(), SwapPhase::PaymentPending);
        flags.insert(StateFlag::PaymentBroadcast);
        assert_eq!(flags.phase(), SwapPhase::PaymentBroadcast);
        flags.insert(StateFlag::PartyPaymentSeen);
        flags.insert(StateFlag::PartyPaymentConfirmed);
        assert_eq!(flags.phase(), SwapPhase::PartyPaymentConfirmed);
        flags.insert(StateFlag::RedeemSigned);
        flags.insert(StateFlag::RedeemBroadcast);
        assert_eq!(flags.phase(), SwapPhase::Redeeming);
        flags.insert(StateFlag::RefundSigned);
        assert_eq!(flags.phase(), SwapPhase::Refunding);
        flags.insert(StateFlag::RedeemConfirmed);
        assert_eq!(flags.phase(), SwapPhase::Refunding);
        flags.insert(StateFlag::Unsettled);
        assert_eq!(flags.phase(), SwapPhase::Unsettled);
        assert!(flags.phase().is_terminal());
    }

    #[test]
    fn terminal_facts() {
        let mut flags = StateFlags::empty();
        flags.insert(StateFlag::RedeemBroadcast);
        assert!(!flags.is_terminal());
        flags.insert(StateFlag::RedeemConfirmed);
        assert!(flags.is_terminal());
        assert!(flags.is_settled());
    }

    #[test]
    fn unsettled_is_terminal_but_not_settled() {
        let mut flags = StateFlags::empty();
        flags.insert(StateFlag::Unsettled);
        assert!(flags.is_terminal());
        assert!(!flags.is_settled());
        flags.insert(StateFlag::RefundConfirmed);
        assert!(flags.is_settled());
    }

    #[test]
    fn state_flags_display() {
        let mut flags = StateFlags::empty();
        assert_eq!(format!("{}", flags), "none");
        flags.insert(StateFlag::PaymentSigned);
        flags.insert(StateFlag::PaymentBroadcast);
        assert_eq!(format!("{}", flags), "PaymentSigned | PaymentBroadcast");
    }

    #[test]
    fn record_consensus_round_trip() {
        let mut record = sample_record();
        record.state.insert(StateFlag::PaymentSigned);
        record.state.insert(StateFlag::PaymentBroadcast);
        record.payment_tx = Some(TxRef {
            id: TxId("0xdeadbeef".to_string()),
            label: TxLabel::Payment,
            broadcast_at: Utc.timestamp_opt(1_700_000_100, 0).single().unwrap(),
        });
        let bytes = serialize(&record);
        assert_eq!(deserialize::<SwapRecord>(&bytes).unwrap(), record);
    }

    #[test]
    fn corrupted_magic_bytes_rejected() {
        let mut bytes = serialize(&sample_record());
        bytes[0] = b'X';
        assert!(matches!(
            deserialize::<SwapRecord>(&bytes),
            Err(consensus::Error::IncorrectMagicBytes)
        ));
    }

    #[test]
    fn fingerprint_ignores_uuid_and_mutable_state() {
        let record = sample_record();
        let mut twin = record.clone();
        twin.swap_id = SwapId::random();
        twin.secret = None;
        twin.state.insert(StateFlag::RedeemConfirmed);
        assert_eq!(record.fingerprint(), twin.fingerprint());

        let mut other = record.clone();
        other.amount += 1;
        assert_ne!(record.fingerprint(), other.fingerprint());
    }

    #[test]
    fn record_serde_round_trip() {
        let record = sample_record();
        let yaml = serde_yaml::to_string(&record).unwrap();
        let back: SwapRecord = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn record_strict_encoding_round_trip() {
        let record = sample_record();
        let bytes = strict_encoding::strict_serialize(&record).unwrap();
        let back: SwapRecord = strict_encoding::strict_deserialize(&bytes).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn queries_name_the_redeeming_participant() {
        let record = sample_record();
        assert_eq!(record.own_lock_query().participant, record.party_address);
        assert_eq!(record.party_lock_query().participant, record.to_address);
        assert_eq!(record.own_lock_query().secret_hash, record.secret_hash);
    }
}
