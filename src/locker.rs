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

//! Per-key async mutexes. Two transactions spending from the same address must not be signed
//! and broadcast concurrently or they race on the account nonce; the engine serializes them by
//! taking the lock of the sending address. The same mechanism serializes the operations of one
//! swap under its identifier.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::blockchain::Address;
use crate::swap::SwapId;

/// A lazily grown map of async mutexes, one per key. Entries appear on first use and retire
/// through [`evict_unused`] once the key is idle, so the map tracks the addresses and swaps
/// currently in play rather than every key ever seen.
///
/// [`evict_unused`]: KeyedLocks::evict_unused
#[derive(Debug, Default)]
pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        KeyedLocks {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Take the lock of `key`, waiting until the current holder releases it. The guard is owned
    /// and may be held across await points and task boundaries.
    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        let entry = {
            let mut locks = self.locks.lock().await;
            locks.entry(key.clone()).or_default().clone()
        };
        entry.lock_owned().await
    }

    /// Drop the entry of `key` when nobody holds or awaits its lock. Every clone of the entry
    /// lives inside a guard or a waiter, so a strong count of one under the map lock proves the
    /// key is idle; an entry under contention stays until the next eviction.
    pub async fn evict_unused(&self, key: &K) {
        let mut locks = self.locks.lock().await;
        if let Some(entry) = locks.get(key) {
            if Arc::strong_count(entry) == 1 {
                locks.remove(key);
            }
        }
    }
}

/// Serializes transactions spending from the same address.
pub type AddressLocker = KeyedLocks<Address>;

/// Serializes the operations of one swap.
pub type SwapLocker = KeyedLocks<SwapId>;
