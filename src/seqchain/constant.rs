//! The crate `constant` defines a set constant used by seqchain.

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

/// The first address of the global log.
pub const MIN_ADDRESS: u64 = 0;

/// A special value is used to mark "no address", eg: the tail of an empty log.
pub const NON_ADDRESS: u64 = std::u64::MAX;

/// A special value is used as the backpointer or the tail of a stream which
/// has never been written.
pub const NOT_FOUND: u64 = std::u64::MAX - 1;

/// A special value is carried by aborts which have no meaningful address.
pub const ABORTED: u64 = std::u64::MAX - 2;

/// A special value is used to mark a sequencer which has never been
/// bootstrapped.
pub const INVALID_EPOCH: u64 = std::u64::MAX;

/// The default capacity of the conflict cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 250_000;

/// A helper function is used to detect whether an address is one of the
/// reserved sentinels instead of a real log position.
pub fn is_sentinel(address: u64) -> bool {
    address >= ABORTED
}
