//! # seqchain
//!
//! `seqchain` is the commit core of a distributed shared log: a totally
//! ordered, replicated append log used as the substrate for transactional
//! objects. It is made of two parts:
//!
//! - the **sequencer**, the single authority handing out positions of the
//!   global log. It keeps the tail of every stream to build backpointer chains,
//!   and performs optimistic concurrency control for transaction commits by
//!   checking conflict sets against a bounded cache of recent writes.
//! - the **chain replication protocol**, which durably commits a value at a
//!   position allocated by the sequencer across an ordered chain of replicas,
//!   recovers contended writes, and serves reads from the tail of the chain.
//!
//! A client first asks the [`Sequencer`] for a [`Token`](types::Token), then
//! asks the [`ChainReplicationProtocol`] to write its payload at the token
//! address. Once an address is committed, no token can target it again and
//! every reader observes the same value there.
//!
//! The cluster layout and the storage units are provided by the user through
//! the [`Layout`] and [`LogUnit`] traits.

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

extern crate chrono;
extern crate log;
extern crate lru;
extern crate parking_lot;
extern crate rand;
extern crate serde;
extern crate thiserror;
extern crate uuid;

mod conflict_cache;
mod error;
mod sequencer;
mod stream_tails;

pub mod constant;
pub mod layout;
pub mod log_unit;
pub mod logger;
pub mod replication;
pub mod types;

pub use crate::conflict_cache::{ConflictCache, ConflictKey, RemovalCause};
pub use crate::error::{Error, Result};
pub use crate::layout::{Layout, ReplicaChain, SegmentLayout};
pub use crate::log_unit::{LogUnit, MemLogUnit, WriteStatus};
pub use crate::replication::{
    AlwaysHoleFill, ChainReplicationProtocol, HoleFillOption, HoleFillPolicy, RetryHoleFill,
};
pub use crate::sequencer::{Sequencer, SequencerOption};
pub use crate::stream_tails::StreamTailTable;
