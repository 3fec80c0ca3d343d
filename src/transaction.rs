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

//! Labels and references for the contract transactions of a swap. A [`SwapRecord`] does not keep
//! transactions themselves, only the [`TxRef`] of the last broadcast per phase, enough to
//! re-attach a confirmation watcher after a restart instead of broadcasting again.
//!
//! [`SwapRecord`]: crate::swap::SwapRecord

use std::io;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use crate::consensus::{self, Decodable, Encodable};

/// The role a transaction plays in the lifecycle of a swap.
#[derive(Display, Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[display(Debug)]
pub enum TxLabel {
    /// A transaction locking local funds under the secret hash.
    Payment,
    /// A token allowance transaction required before a token contract can pull the payment.
    TokenApprove,
    /// A transaction claiming a lock with the revealed secret.
    Redeem,
    /// A transaction reclaiming an expired local lock.
    Refund,
}

impl Encodable for TxLabel {
    fn consensus_encode<W: io::Write>(&self, writer: &mut W) -> Result<usize, io::Error> {
        match self {
            TxLabel::Payment => 0x01u16.consensus_encode(writer),
            TxLabel::TokenApprove => 0x02u16.consensus_encode(writer),
            TxLabel::Redeem => 0x03u16.consensus_encode(writer),
            TxLabel::Refund => 0x04u16.consensus_encode(writer),
        }
    }
}

impl Decodable for TxLabel {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        match Decodable::consensus_decode(d)? {
            0x01u16 => Ok(TxLabel::Payment),
            0x02u16 => Ok(TxLabel::TokenApprove),
            0x03u16 => Ok(TxLabel::Redeem),
            0x04u16 => Ok(TxLabel::Refund),
            _ => Err(consensus::Error::UnknownType),
        }
    }
}

impl_strict_encoding!(TxLabel);

impl FromStr for TxLabel {
    type Err = consensus::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Payment" | "payment" => Ok(TxLabel::Payment),
            "TokenApprove" | "tokenapprove" => Ok(TxLabel::TokenApprove),
            "Redeem" | "redeem" => Ok(TxLabel::Redeem),
            "Refund" | "refund" => Ok(TxLabel::Refund),
            _ => Err(consensus::Error::UnknownType),
        }
    }
}

/// A transaction id in the string format of its chain.
#[derive(Display, Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[display(inner)]
#[serde(transparent)]
pub struct TxId(pub String);

impl From<String> for TxId {
    fn from(s: String) -> Self {
        TxId(s)
    }
}

impl FromStr for TxId {
    type Err = consensus::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(consensus::Error::ParseFailed(
                "transaction id must not be empty",
            ));
        }
        Ok(TxId(s.into()))
    }
}

impl Encodable for TxId {
    fn consensus_encode<W: io::Write>(&self, writer: &mut W) -> Result<usize, io::Error> {
        self.0.consensus_encode(writer)
    }
}

impl Decodable for TxId {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        Ok(TxId(Decodable::consensus_decode(d)?))
    }
}

impl_strict_encoding!(TxId);

/// Reference to a broadcast contract transaction, kept in the swap record so the engine can
/// re-attach to it instead of building a replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRef {
    /// Chain id of the broadcast transaction.
    pub id: TxId,
    /// What the transaction does for the swap.
    pub label: TxLabel,
    /// When the engine broadcast it.
    pub broadcast_at: DateTime<Utc>,
}

impl TxRef {
    /// Create a reference for a transaction broadcast now.
    pub fn broadcast_now(id: TxId, label: TxLabel) -> Self {
        TxRef {
            id,
            label,
            broadcast_at: Utc::now(),
        }
    }

    /// Returns `true` when the broadcast is recent enough to re-attach a watcher to it instead
    /// of building a replacement. A broadcast timestamp in the future comes from clock skew and
    /// counts as fresh.
    pub fn is_fresh(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match now.signed_duration_since(self.broadcast_at).to_std() {
            Ok(age) => age <= window,
            Err(_) => true,
        }
    }
}

impl Encodable for TxRef {
    fn consensus_encode<W: io::Write>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut len = self.id.consensus_encode(writer)?;
        len += self.label.consensus_encode(writer)?;
        Ok(len + self.broadcast_at.timestamp().consensus_encode(writer)?)
    }
}

impl Decodable for TxRef {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        let id = Decodable::consensus_decode(d)?;
        let label = Decodable::consensus_decode(d)?;
        let timestamp: i64 = Decodable::consensus_decode(d)?;
        let broadcast_at = Utc
            .timestamp_opt(timestamp, 0)
            .single()
            .ok_or(consensus::Error::ParseFailed("invalid broadcast timestamp"))?;
        Ok(TxRef {
            id,
            label,
            broadcast_at,
        })
    }
}

impl_strict_encoding!(TxRef);
