//! Update feed of the swap engine. Every persisted state change produces one [`SwapUpdated`]
//! event after the write lands, so subscribers never observe a state the store could lose on a
//! crash.

use std::io;

use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::mpsc;
use tracing::debug;

use crate::consensus::{self, Decodable, Encodable};
use crate::swap::{StateFlags, SwapId, SwapRecord};
use crate::transaction::{TxId, TxLabel, TxRef};

/// The transaction a state change moved, when one did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxChange {
    pub label: TxLabel,
    pub id: TxId,
}

impl From<&TxRef> for TxChange {
    fn from(tx: &TxRef) -> Self {
        TxChange {
            label: tx.label,
            id: tx.id.clone(),
        }
    }
}

impl Encodable for TxChange {
    fn consensus_encode<W: io::Write>(&self, s: &mut W) -> Result<usize, io::Error> {
        let len = self.label.consensus_encode(s)?;
        Ok(len + self.id.consensus_encode(s)?)
    }
}

impl Decodable for TxChange {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        Ok(Self {
            label: TxLabel::consensus_decode(d)?,
            id: TxId::consensus_decode(d)?,
        })
    }
}

impl_strict_encoding!(TxChange);

/// One persisted state change of one swap. Carries the full flag set after the change, not a
/// delta, so a subscriber that missed events still converges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapUpdated {
    pub swap_id: SwapId,
    pub state: StateFlags,
    pub changed_tx: Option<TxChange>,
    pub at: DateTime<Utc>,
}

impl Encodable for SwapUpdated {
    fn consensus_encode<W: io::Write>(&self, s: &mut W) -> Result<usize, io::Error> {
        let mut len = self.swap_id.consensus_encode(s)?;
        len += self.state.consensus_encode(s)?;
        len += self.changed_tx.consensus_encode(s)?;
        Ok(len + self.at.timestamp().consensus_encode(s)?)
    }
}

impl Decodable for SwapUpdated {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        let swap_id = SwapId::consensus_decode(d)?;
        let state = StateFlags::consensus_decode(d)?;
        let changed_tx = Option::<TxChange>::consensus_decode(d)?;
        let timestamp = i64::consensus_decode(d)?;
        let at = Utc
            .timestamp_opt(timestamp, 0)
            .single()
            .ok_or(consensus::Error::ParseFailed("invalid update timestamp"))?;
        Ok(Self {
            swap_id,
            state,
            changed_tx,
            at,
        })
    }
}

impl_strict_encoding!(SwapUpdated);

/// Receiving half of the update feed.
pub type UpdateReceiver = mpsc::UnboundedReceiver<SwapUpdated>;

/// Sending half of the update feed, held by the engine. Notifications are fire-and-forget: a
/// dropped receiver never blocks or fails a swap operation.
#[derive(Debug, Clone)]
pub struct UpdateSender {
    sender: mpsc::UnboundedSender<SwapUpdated>,
}

impl UpdateSender {
    /// Emit the update for a record whose change was just persisted.
    pub fn notify(&self, record: &SwapRecord, changed_tx: Option<TxChange>) {
        let update = SwapUpdated {
            swap_id: record.swap_id,
            state: record.state,
            changed_tx,
            at: Utc::now(),
        };
        if self.sender.send(update).is_err() {
            debug!(swap_id = %record.swap_id, "No subscriber listening, dropping swap update");
        }
    }
}

/// Create the update feed of one engine instance.
pub fn swap_channel() -> (UpdateSender, UpdateReceiver) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (UpdateSender { sender }, receiver)
}
