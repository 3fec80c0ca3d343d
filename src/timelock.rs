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

//! Time lock durations and the deadline arithmetic of a swap. The initiator lock is strictly
//! longer than the acceptor lock, so the acceptor always observes the initiator settle or refund
//! before its own refund window opens. Redeems stop a reserve before the counterparty lock
//! expires, a redeem later than that risks racing the counterparty refund.

use std::io;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::consensus::{self, Decodable, Encodable};
use crate::role::SwapRole;

/// List of errors a time lock configuration can fail validation with.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The initiator lock does not exceed the acceptor lock.
    #[error("Initiator lock {0} must be strictly longer than acceptor lock {1}")]
    LockOrdering(LockDuration, LockDuration),
    /// A lock duration of zero cannot secure funds.
    #[error("Lock durations must not be zero")]
    ZeroLock,
    /// A redeem reserve must leave room inside the shorter lock.
    #[error("Reserve {0} must be shorter than the acceptor lock {1}")]
    ReserveTooLong(LockDuration, LockDuration),
}

/// A contract time lock duration in seconds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize, Deserialize,
)]
#[display("{0} s")]
#[serde(transparent)]
pub struct LockDuration(u32);

impl LockDuration {
    /// Create a duration of the given number of seconds.
    pub const fn from_secs(secs: u32) -> Self {
        LockDuration(secs)
    }

    /// Create a duration of the given number of hours.
    pub const fn from_hours(hours: u32) -> Self {
        LockDuration(hours * 3600)
    }

    /// Duration in seconds.
    pub fn as_secs(&self) -> u32 {
        self.0
    }

    /// The same duration as a [`chrono::Duration`] for deadline arithmetic.
    pub fn to_chrono(self) -> chrono::Duration {
        chrono::Duration::seconds(self.0 as i64)
    }
}

impl Encodable for LockDuration {
    fn consensus_encode<W: io::Write>(&self, writer: &mut W) -> Result<usize, io::Error> {
        self.0.consensus_encode(writer)
    }
}

impl Decodable for LockDuration {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        Ok(LockDuration(Decodable::consensus_decode(d)?))
    }
}

impl_strict_encoding!(LockDuration);

/// The lock durations and engine timings of a swap pair. One value is shared by every swap a
/// machine drives; the durations are not stored per record, deadlines derive from the record
/// creation time and the role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapTimings {
    /// Time lock the initiator applies to its payment.
    pub initiator_lock: LockDuration,
    /// Time lock the acceptor applies to its payment, strictly shorter.
    pub acceptor_lock: LockDuration,
    /// Safety margin before the counterparty lock expiry after which self-redeem is refused.
    pub redeem_reserve: LockDuration,
    /// Stricter margin before the local lock expiry after which redeeming on behalf of the
    /// counterparty is refused.
    pub party_redeem_reserve: LockDuration,
    /// Interval between two chain polls of a watcher.
    pub poll_interval: Duration,
    /// Recency window within which a broadcast transaction is re-attached instead of replaced.
    pub tx_freshness: Duration,
    /// Bound on the confirmation wait of a token allowance transaction during payment.
    pub approve_timeout: Duration,
}

impl Default for SwapTimings {
    fn default() -> Self {
        SwapTimings {
            initiator_lock: LockDuration::from_hours(10),
            acceptor_lock: LockDuration::from_hours(5),
            redeem_reserve: LockDuration::from_secs(90 * 60),
            party_redeem_reserve: LockDuration::from_secs(120 * 60),
            poll_interval: Duration::from_secs(45),
            tx_freshness: Duration::from_secs(5 * 60),
            approve_timeout: Duration::from_secs(40 * 60),
        }
    }
}

impl SwapTimings {
    /// Check the role asymmetry and reserve bounds. Must pass before a machine accepts the
    /// timings.
    pub fn validate(&self) -> Result<(), Error> {
        if self.initiator_lock.as_secs() == 0 || self.acceptor_lock.as_secs() == 0 {
            return Err(Error::ZeroLock);
        }
        if self.initiator_lock <= self.acceptor_lock {
            return Err(Error::LockOrdering(self.initiator_lock, self.acceptor_lock));
        }
        if self.redeem_reserve >= self.acceptor_lock {
            return Err(Error::ReserveTooLong(self.redeem_reserve, self.acceptor_lock));
        }
        if self.party_redeem_reserve >= self.acceptor_lock {
            return Err(Error::ReserveTooLong(
                self.party_redeem_reserve,
                self.acceptor_lock,
            ));
        }
        Ok(())
    }

    /// Time lock a party applies to its own payment.
    pub fn lock_duration(&self, role: SwapRole) -> LockDuration {
        match role {
            SwapRole::Initiator => self.initiator_lock,
            SwapRole::Acceptor => self.acceptor_lock,
        }
    }

    /// When the local lock of a swap created at `created_at` becomes refundable.
    pub fn refund_deadline(&self, created_at: DateTime<Utc>, role: SwapRole) -> DateTime<Utc> {
        created_at + self.lock_duration(role).to_chrono()
    }

    /// Latest instant a party may still broadcast its own redeem of the counterparty lock.
    pub fn safe_redeem_deadline(&self, created_at: DateTime<Utc>, role: SwapRole) -> DateTime<Utc> {
        created_at + self.lock_duration(role.other()).to_chrono() - self.redeem_reserve.to_chrono()
    }

    /// Latest instant a reward collector may redeem the local lock on behalf of the
    /// counterparty.
    pub fn party_redeem_deadline(&self, created_at: DateTime<Utc>, role: SwapRole) -> DateTime<Utc> {
        created_at + self.lock_duration(role).to_chrono()
            - self.party_redeem_reserve.to_chrono()
    }

    /// Latest instant an allowance transaction broadcast at `from` may take to confirm.
    pub fn approve_deadline(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        from + chrono::Duration::seconds(self.approve_timeout.as_secs() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::{deserialize, serialize_hex};
    use chrono::TimeZone;

    #[test]
    fn default_timings_are_valid() {
        assert!(SwapTimings::default().validate().is_ok());
    }

    #[test]
    fn initiator_must_lock_longer() {
        let timings = SwapTimings {
            initiator_lock: LockDuration::from_hours(5),
            acceptor_lock: LockDuration::from_hours(5),
            ..Default::default()
        };
        assert_eq!(
            timings.validate(),
            Err(Error::LockOrdering(
                LockDuration::from_hours(5),
                LockDuration::from_hours(5)
            ))
        );
    }

    #[test]
    fn zero_locks_rejected() {
        let timings = SwapTimings {
            acceptor_lock: LockDuration::from_secs(0),
            ..Default::default()
        };
        assert_eq!(timings.validate(), Err(Error::ZeroLock));
    }

    #[test]
    fn reserve_must_fit_in_acceptor_lock() {
        let timings = SwapTimings {
            redeem_reserve: LockDuration::from_hours(5),
            ..Default::default()
        };
        assert!(matches!(
            timings.validate(),
            Err(Error::ReserveTooLong(_, _))
        ));
    }

    #[test]
    fn acceptor_refund_window_opens_first() {
        let timings = SwapTimings::default();
        let created = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap();
        assert!(
            timings.refund_deadline(created, SwapRole::Acceptor)
                < timings.refund_deadline(created, SwapRole::Initiator)
        );
    }

    #[test]
    fn safe_redeem_precedes_counterparty_refund() {
        let timings = SwapTimings::default();
        let created = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap();
        for role in [SwapRole::Initiator, SwapRole::Acceptor] {
            assert!(
                timings.safe_redeem_deadline(created, role)
                    < timings.refund_deadline(created, role.other())
            );
        }
    }

    #[test]
    fn party_redeem_gate_is_stricter_than_own_refund() {
        let timings = SwapTimings::default();
        let created = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap();
        for role in [SwapRole::Initiator, SwapRole::Acceptor] {
            assert!(
                timings.party_redeem_deadline(created, role)
                    < timings.refund_deadline(created, role)
            );
        }
    }

    #[test]
    fn lock_duration_display_and_consensus() {
        let lock = LockDuration::from_secs(3600);
        assert_eq!(format!("{}", lock), "3600 s");
        assert_eq!(serialize_hex(&lock), "100e0000");
        assert_eq!(deserialize::<LockDuration>(&[0x10, 0x0e, 0, 0]).unwrap(), lock);
    }
}
