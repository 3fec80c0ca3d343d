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

//! Cryptographic primitives of a swap: the secret a swap settles on, the secret hash gating the
//! contract transactions on both chains, and the hash algorithms the deployed contracts compute
//! with.

use std::collections::HashMap;
use std::error;
use std::fmt::{self, Debug};
use std::io;
use std::str::FromStr;

use rand::{thread_rng, RngCore};
use serde::ser::{Serialize, Serializer};
use serde::{de, Deserialize, Deserializer};
use sha2::{Digest, Sha256};
use sha3::{Digest as Sha3Digest, Keccak256};
use thiserror::Error;

use crate::consensus::{self, CanonicalBytes, Decodable, Encodable};
use crate::hash::{HashString, SecretString};

/// List of cryptographic errors that can be encountered when handling swap secrets.
#[derive(Error, Debug)]
pub enum Error {
    /// The secret does not hash to the expected secret hash.
    #[error("Secret does not match the expected secret hash")]
    SecretMismatch,
    /// The secret or its format is not supported.
    #[error("Unsupported secret or secret format")]
    UnsupportedSecret,
    /// Any cryptographic error not part of this list.
    #[error("Other: {0}")]
    Other(Box<dyn error::Error + Send + Sync>),
}

impl Error {
    /// Creates a new cryptographic error of type [`Self::Other`] with an arbitrary payload.
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

/// The 32-byte preimage a swap settles on. The secret holder generates it when the swap is
/// registered and reveals it on-chain with its redeem transaction; the counterparty extracts it
/// from that transaction to redeem on the other chain.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Secret([u8; 32]);

impl Secret {
    /// Generate a fresh random secret.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        thread_rng().fill_bytes(&mut bytes);
        Secret(bytes)
    }

    /// Create a secret from its raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Secret(bytes)
    }

    /// Returns the raw bytes of the secret.
    pub fn to_bytes(self) -> [u8; 32] {
        self.0
    }
}

impl Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Secret({})", self)
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for Secret {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(Error::new)?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| Error::UnsupportedSecret)?;
        Ok(Secret(bytes))
    }
}

impl Serialize for Secret {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(format!("{}", self).as_ref())
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D>(deserializer: D) -> Result<Secret, D::Error>
    where
        D: Deserializer<'de>,
    {
        Secret::from_str(&deserializer.deserialize_string(SecretString)?)
            .map_err(de::Error::custom)
    }
}

impl CanonicalBytes for Secret {
    fn as_canonical_bytes(&self) -> Vec<u8> {
        self.0.into()
    }

    fn from_canonical_bytes(bytes: &[u8]) -> Result<Self, consensus::Error>
    where
        Self: Sized,
    {
        Ok(Secret(bytes.try_into().map_err(consensus::Error::new)?))
    }
}

impl Encodable for Secret {
    fn consensus_encode<W: io::Write>(&self, writer: &mut W) -> Result<usize, io::Error> {
        self.0.consensus_encode(writer)
    }
}

impl Decodable for Secret {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        Ok(Secret(Decodable::consensus_decode(d)?))
    }
}

impl_strict_encoding!(Secret);

fixed_hash::construct_fixed_hash!(
    /// The hash both parties lock under. Each contract releases its funds to the redeemer
    /// presenting the preimage of this hash, computed with the [`SecretHashAlgo`] of the swap.
    pub struct SecretHash(32);
);

impl Serialize for SecretHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(format!("{:#x}", self).as_ref())
    }
}

impl<'de> Deserialize<'de> for SecretHash {
    fn deserialize<D>(deserializer: D) -> Result<SecretHash, D::Error>
    where
        D: Deserializer<'de>,
    {
        SecretHash::from_str(&deserializer.deserialize_string(HashString)?)
            .map_err(de::Error::custom)
    }
}

impl Encodable for SecretHash {
    fn consensus_encode<W: io::Write>(&self, writer: &mut W) -> Result<usize, io::Error> {
        self.0.consensus_encode(writer)
    }
}

impl Decodable for SecretHash {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        Ok(SecretHash(Decodable::consensus_decode(d)?))
    }
}

impl_strict_encoding!(SecretHash);

/// Hash algorithms the deployed swap contracts compute the secret hash with. The algorithm is
/// fixed by the chain pair when the swap is registered and must match on both legs, otherwise the
/// locks are not redeemable by the same preimage.
#[derive(Display, Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[display(Debug)]
pub enum SecretHashAlgo {
    /// Single SHA-256.
    Sha256,
    /// SHA-256 applied twice.
    Sha256d,
    /// Keccak-256 with the legacy padding used by Ethereum.
    Keccak256,
}

impl SecretHashAlgo {
    /// Compute the secret hash of the given secret under this algorithm.
    pub fn hash(&self, secret: &Secret) -> SecretHash {
        let bytes = secret.to_bytes();
        match self {
            SecretHashAlgo::Sha256 => {
                let digest = Sha256::digest(&bytes);
                SecretHash::from_slice(digest.as_slice())
            }
            SecretHashAlgo::Sha256d => {
                let first = Sha256::digest(&bytes);
                let digest = Sha256::digest(first.as_slice());
                SecretHash::from_slice(digest.as_slice())
            }
            SecretHashAlgo::Keccak256 => {
                let digest = Keccak256::digest(bytes);
                SecretHash::from_slice(digest.as_slice())
            }
        }
    }

    /// Check that the given secret is the preimage of the expected secret hash under this
    /// algorithm.
    pub fn verify(&self, secret: &Secret, expected: &SecretHash) -> Result<(), Error> {
        if self.hash(secret) == *expected {
            Ok(())
        } else {
            Err(Error::SecretMismatch)
        }
    }
}

impl Encodable for SecretHashAlgo {
    fn consensus_encode<W: io::Write>(&self, writer: &mut W) -> Result<usize, io::Error> {
        match self {
            SecretHashAlgo::Sha256 => 0x01u8.consensus_encode(writer),
            SecretHashAlgo::Sha256d => 0x02u8.consensus_encode(writer),
            SecretHashAlgo::Keccak256 => 0x03u8.consensus_encode(writer),
        }
    }
}

impl Decodable for SecretHashAlgo {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        match Decodable::consensus_decode(d)? {
            0x01u8 => Ok(SecretHashAlgo::Sha256),
            0x02u8 => Ok(SecretHashAlgo::Sha256d),
            0x03u8 => Ok(SecretHashAlgo::Keccak256),
            _ => Err(consensus::Error::UnknownType),
        }
    }
}

impl_strict_encoding!(SecretHashAlgo);

impl FromStr for SecretHashAlgo {
    type Err = consensus::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Sha256" | "sha256" => Ok(SecretHashAlgo::Sha256),
            "Sha256d" | "sha256d" => Ok(SecretHashAlgo::Sha256d),
            "Keccak256" | "keccak256" => Ok(SecretHashAlgo::Keccak256),
            _ => Err(consensus::Error::UnknownType),
        }
    }
}

/// Generates and keeps the preimages this party holds. Only the secret holder side of a swap
/// carries a vault entry; the counterparty learns the preimage from the chain. Entries live from
/// negotiation until the swap settles and [`SecretVault::forget`] is called.
#[derive(Debug)]
pub struct SecretVault {
    algo: SecretHashAlgo,
    secrets: HashMap<SecretHash, Secret>,
}

impl SecretVault {
    /// Create an empty vault hashing under the given algorithm.
    pub fn new(algo: SecretHashAlgo) -> Self {
        SecretVault {
            algo,
            secrets: HashMap::new(),
        }
    }

    /// The algorithm all entries of this vault are hashed with.
    pub fn algo(&self) -> SecretHashAlgo {
        self.algo
    }

    /// Generate a fresh secret, keep it, and return it with its hash.
    pub fn create(&mut self) -> (Secret, SecretHash) {
        let secret = Secret::generate();
        let hash = self.store(secret);
        (secret, hash)
    }

    /// Keep an existing secret, e.g. when restoring from persistent storage. Returns its hash.
    pub fn store(&mut self, secret: Secret) -> SecretHash {
        let hash = self.algo.hash(&secret);
        self.secrets.insert(hash, secret);
        hash
    }

    /// Reveal the preimage of the given hash, if this party holds it.
    pub fn open(&self, hash: &SecretHash) -> Option<Secret> {
        self.secrets.get(hash).copied()
    }

    /// Check that the given secret is the preimage of the expected hash under the vault
    /// algorithm.
    pub fn verify(&self, secret: &Secret, expected: &SecretHash) -> Result<(), Error> {
        self.algo.verify(secret, expected)
    }

    /// Drop the entry of a settled swap. Returns the secret when one was held.
    pub fn forget(&mut self, hash: &SecretHash) -> Option<Secret> {
        self.secrets.remove(hash)
    }
}
