//! A bounded cache of the latest write address of every conflict key, with a
//! wildcard remembering the newest address no longer tracked individually.

// Copyright 2021 The seqchain Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::num::NonZeroUsize;

use log::trace;
use lru::LruCache;

use crate::types::{ConflictParam, StreamId};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConflictKey {
    pub stream_id: StreamId,
    pub param: ConflictParam,
}

impl ConflictKey {
    pub fn new(stream_id: StreamId, param: &[u8]) -> ConflictKey {
        ConflictKey {
            stream_id,
            param: param.to_vec(),
        }
    }
}

impl std::fmt::Display for ConflictKey {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.stream_id)?;
        for b in &self.param {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RemovalCause {
    /// The key was written again, the entry still tracks it.
    Replaced,
    /// The cache exceeded its capacity.
    Size,
    /// The entry was dropped by a trim sweep.
    Explicit,
}

/// A LRU cache from conflict key to global address.
///
/// Every removal not caused by replacement advances the wildcard to at least
/// the removed address, so the wildcard never decreases.
#[derive(Debug)]
pub struct ConflictCache {
    entries: LruCache<ConflictKey, u64>,
    wildcard: Option<u64>,
}

impl ConflictCache {
    pub fn new(capacity: usize) -> ConflictCache {
        debug_assert!(capacity > 0, "capacity of conflict cache must be positive");
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        ConflictCache {
            entries: LruCache::new(capacity),
            wildcard: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The newest address among all evicted entries, `None` if nothing has
    /// been evicted since the last reset.
    pub fn wildcard(&self) -> Option<u64> {
        self.wildcard
    }

    /// Read the address of `key` without refreshing it.
    pub fn peek(&self, key: &ConflictKey) -> Option<u64> {
        self.entries.peek(key).cloned()
    }

    /// Read the address of `key` and mark it as recently used.
    pub fn get(&mut self, key: &ConflictKey) -> Option<u64> {
        self.entries.get(key).cloned()
    }

    /// Record `address` as the latest write of `key`, evicting the least
    /// recently used entry if the cache is full.
    pub fn put(&mut self, key: ConflictKey, address: u64) {
        debug_assert!(
            self.entries.peek(&key).map_or(true, |prev| *prev <= address),
            "conflict key {} goes backward to {}",
            key,
            address
        );
        if let Some((displaced, prev_address)) = self.entries.push(key, address) {
            let cause = if self.entries.contains(&displaced) {
                RemovalCause::Replaced
            } else {
                RemovalCause::Size
            };
            self.on_removal(&displaced, prev_address, cause);
        }
    }

    /// Drop every entry whose address is below `mark`, returns the number of
    /// evicted entries.
    pub fn evict_below(&mut self, mark: u64) -> usize {
        let victims = self
            .entries
            .iter()
            .filter(|(_, address)| **address < mark)
            .map(|(k, _)| k.clone())
            .collect::<Vec<_>>();
        for key in &victims {
            if let Some(address) = self.entries.pop(key) {
                self.on_removal(key, address, RemovalCause::Explicit);
            }
        }
        victims.len()
    }

    /// Drop all entries and set the wildcard without consulting the evicted
    /// addresses.
    pub fn reset(&mut self, wildcard: Option<u64>) {
        self.entries.clear();
        self.wildcard = wildcard;
    }

    fn on_removal(&mut self, key: &ConflictKey, address: u64, cause: RemovalCause) {
        if cause == RemovalCause::Replaced {
            return;
        }
        let wildcard = self.wildcard.map(|w| w.max(address)).unwrap_or(address);
        trace!(
            "update wildcard from {:?} to {}, conflict key {}, cause {:?}",
            self.wildcard,
            wildcard,
            key,
            cause
        );
        self.wildcard = Some(wildcard);
    }
}
