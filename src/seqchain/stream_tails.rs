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

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::types::StreamId;

/// The last global address issued to every stream written since the last
/// reset.
///
/// Readers never block each other; writers are expected to be serialized by
/// the sequencer.
#[derive(Debug, Default)]
pub struct StreamTailTable {
    tails: RwLock<HashMap<StreamId, u64>>,
}

impl StreamTailTable {
    pub fn new() -> StreamTailTable {
        StreamTailTable::default()
    }

    pub fn get(&self, stream_id: &StreamId) -> Option<u64> {
        self.tails.read().get(stream_id).cloned()
    }

    /// Set the tail of `stream_id` to `address`, returns the previous tail.
    pub fn swap(&self, stream_id: StreamId, address: u64) -> Option<u64> {
        self.tails.write().insert(stream_id, address)
    }

    /// Set the tails of all `stream_ids` to `address` in one critical section,
    /// returns the previous tail of each stream.
    pub fn swap_all<'a, I>(&self, stream_ids: I, address: u64) -> Vec<(StreamId, Option<u64>)>
    where
        I: IntoIterator<Item = &'a StreamId>,
    {
        let mut tails = self.tails.write();
        stream_ids
            .into_iter()
            .map(|id| (*id, tails.insert(*id, address)))
            .collect()
    }

    /// Drop every entry and install `snapshot` instead.
    pub fn replace(&self, snapshot: HashMap<StreamId, u64>) {
        *self.tails.write() = snapshot;
    }

    pub fn snapshot(&self) -> HashMap<StreamId, u64> {
        self.tails.read().clone()
    }

    pub fn len(&self) -> usize {
        self.tails.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tails.read().is_empty()
    }
}
