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

//! Roles used to distinguish the participants of a swap. The role decides the length of the time
//! lock a party applies to its payment and the order in which the parties are expected to move.

use std::fmt::Debug;
use std::io;
use std::str::FromStr;

use crate::consensus::{self, Decodable, Encodable};

/// Possible roles during the swap phase. The role is fixed when the swap is registered and never
/// changes afterwards.
#[derive(Display, Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[display(Debug)]
pub enum SwapRole {
    /// The initiator locks first and uses the longer time lock. It holds the secret and reveals
    /// it on the counterparty chain when redeeming.
    Initiator,
    /// The acceptor locks second, after seeing the initiator payment, and uses the shorter time
    /// lock. It learns the secret from the initiator redeem.
    Acceptor,
}

impl SwapRole {
    /// Return the other role possible in the swap phase.
    pub fn other(&self) -> Self {
        match self {
            Self::Initiator => Self::Acceptor,
            Self::Acceptor => Self::Initiator,
        }
    }

    /// Returns `true` if this party is the one holding the secret.
    pub fn holds_secret(&self) -> bool {
        matches!(self, Self::Initiator)
    }
}

impl Encodable for SwapRole {
    fn consensus_encode<W: io::Write>(&self, writer: &mut W) -> Result<usize, io::Error> {
        match self {
            SwapRole::Initiator => 0x01u8.consensus_encode(writer),
            SwapRole::Acceptor => 0x02u8.consensus_encode(writer),
        }
    }
}

impl Decodable for SwapRole {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        match Decodable::consensus_decode(d)? {
            0x01u8 => Ok(SwapRole::Initiator),
            0x02u8 => Ok(SwapRole::Acceptor),
            _ => Err(consensus::Error::UnknownType),
        }
    }
}

impl_strict_encoding!(SwapRole);

impl FromStr for SwapRole {
    type Err = consensus::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Initiator" | "initiator" => Ok(SwapRole::Initiator),
            "Acceptor" | "acceptor" => Ok(SwapRole::Acceptor),
            _ => Err(consensus::Error::UnknownType),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SwapRole;
    use crate::consensus::{deserialize, serialize_hex};
    use std::str::FromStr;

    #[test]
    fn swap_role_consensus_codes() {
        assert_eq!(serialize_hex(&SwapRole::Initiator), "01");
        assert_eq!(serialize_hex(&SwapRole::Acceptor), "02");
        assert_eq!(
            deserialize::<SwapRole>(&[0x02]).unwrap(),
            SwapRole::Acceptor
        );
        assert!(deserialize::<SwapRole>(&[0x03]).is_err());
    }

    #[test]
    fn swap_role_other_is_involutive() {
        assert_eq!(SwapRole::Initiator.other(), SwapRole::Acceptor);
        assert_eq!(SwapRole::Acceptor.other().other(), SwapRole::Acceptor);
    }

    #[test]
    fn parse_swap_role() {
        for (s, role) in [
            ("Initiator", SwapRole::Initiator),
            ("initiator", SwapRole::Initiator),
            ("Acceptor", SwapRole::Acceptor),
            ("acceptor", SwapRole::Acceptor),
        ] {
            assert_eq!(SwapRole::from_str(s).unwrap(), role);
        }
        assert!(SwapRole::from_str("maker").is_err());
    }

    #[test]
    fn only_initiator_holds_secret() {
        assert!(SwapRole::Initiator.holds_secret());
        assert!(!SwapRole::Acceptor.holds_secret());
    }
}
