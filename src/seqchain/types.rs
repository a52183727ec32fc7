//! The crate `types` defines a set types used by seqchain.

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

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constant::*;

/// The identifier of a stream, an application-level sublog.
pub type StreamId = Uuid;

/// An opaque key identifying a logical resource used for fine-grained
/// conflict detection.
pub type ConflictParam = Vec<u8>;

/// The conflict-resolution infos a transaction attaches to its commit token
/// request.
#[derive(Clone, Serialize, Deserialize)]
pub struct TxResolutionInfo {
    pub tx_id: Uuid,

    /// The global address the transaction read its snapshot at.
    pub snapshot_timestamp: u64,

    /// The streams read by the transaction, each with the conflict parameters
    /// it touched. An empty set falls back to stream-level detection.
    pub conflict_set: BTreeMap<StreamId, Vec<ConflictParam>>,

    /// The conflict parameters written by the transaction, recorded into the
    /// conflict cache once the transaction commits.
    pub write_conflict_params: BTreeMap<StreamId, Vec<ConflictParam>>,

    /// Per stream, the address up to which the client has manually verified
    /// there is no true conflict.
    pub validated_streams: HashMap<StreamId, u64>,
}

impl TxResolutionInfo {
    pub fn new(snapshot_timestamp: u64) -> TxResolutionInfo {
        TxResolutionInfo {
            tx_id: Uuid::new_v4(),
            snapshot_timestamp,
            conflict_set: BTreeMap::new(),
            write_conflict_params: BTreeMap::new(),
            validated_streams: HashMap::new(),
        }
    }

    pub fn read(mut self, stream_id: StreamId, params: Vec<ConflictParam>) -> Self {
        self.conflict_set
            .entry(stream_id)
            .or_insert_with(Vec::new)
            .extend(params);
        self
    }

    pub fn write(mut self, stream_id: StreamId, params: Vec<ConflictParam>) -> Self {
        self.write_conflict_params
            .entry(stream_id)
            .or_insert_with(Vec::new)
            .extend(params);
        self
    }

    pub fn validated(mut self, stream_id: StreamId, address: u64) -> Self {
        self.validated_streams.insert(stream_id, address);
        self
    }
}

impl std::fmt::Debug for TxResolutionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxResolutionInfo")
            .field("tx_id", &self.tx_id)
            .field("snapshot", &self.snapshot_timestamp)
            .field("num_read_streams", &self.conflict_set.len())
            .field("num_write_streams", &self.write_conflict_params.len())
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TokenRequest {
    /// Query the tail of the log, or the tail of one stream.
    Query { streams: Vec<StreamId> },
    /// Extend the global log without any stream bookkeeping.
    Raw { num_tokens: u64 },
    /// Allocate addresses for one or more streams.
    MultiStream {
        num_tokens: u64,
        streams: Vec<StreamId>,
        txn_resolution: Option<TxResolutionInfo>,
    },
    /// Allocate the commit address of a transaction, if it can commit.
    Tx {
        num_tokens: u64,
        streams: Vec<StreamId>,
        txn_resolution: TxResolutionInfo,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Token {
    /// The first address assigned, or the queried tail.
    pub address: u64,
    pub epoch: u64,
    /// The previous tail of every participating stream, `NOT_FOUND` if the
    /// stream had none.
    pub backpointers: HashMap<StreamId, u64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AbortReason {
    /// The snapshot precedes the trim mark.
    Trim,
    /// The snapshot precedes the conflict wildcard.
    SequencerOverflow,
    /// A conflict parameter was written after the snapshot.
    ConflictKey,
    /// A stream was written after the snapshot.
    ConflictStream,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let reason = match self {
            AbortReason::Trim => "TRIM",
            AbortReason::SequencerOverflow => "SEQUENCER_OVERFLOW",
            AbortReason::ConflictKey => "CONFLICT_KEY",
            AbortReason::ConflictStream => "CONFLICT_STREAM",
        };
        write!(f, "{}", reason)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxAbort {
    pub reason: AbortReason,
    /// The trim mark, the conflicting address, or `ABORTED`.
    pub address: u64,
    pub stream_id: Option<StreamId>,
    pub conflict_param: Option<ConflictParam>,
    pub epoch: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum TokenResponse {
    Normal(Token),
    Abort(TxAbort),
}

impl TokenResponse {
    pub fn is_abort(&self) -> bool {
        matches!(self, TokenResponse::Abort(_))
    }

    pub fn token(&self) -> Option<&Token> {
        match self {
            TokenResponse::Normal(token) => Some(token),
            TokenResponse::Abort(_) => None,
        }
    }

    pub fn abort(&self) -> Option<&TxAbort> {
        match self {
            TokenResponse::Normal(_) => None,
            TokenResponse::Abort(abort) => Some(abort),
        }
    }
}

/// The message used to bootstrap (or reset) a sequencer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequencerTailsRecovery {
    pub global_tail: u64,
    pub stream_tails: HashMap<StreamId, u64>,
    pub ready_epoch: u64,
}

/// The value written at a global address.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    pub backpointers: BTreeMap<StreamId, u64>,
    pub payload: Vec<u8>,
}

impl LogEntry {
    pub fn new(payload: Vec<u8>) -> LogEntry {
        LogEntry {
            backpointers: BTreeMap::new(),
            payload,
        }
    }

    /// Build the entry from the token which allocated its address.
    pub fn with_token(token: &Token, payload: Vec<u8>) -> LogEntry {
        LogEntry {
            backpointers: token
                .backpointers
                .iter()
                .map(|(id, addr)| (*id, *addr))
                .collect(),
            payload,
        }
    }

    /// The previous address of `stream_id`, if this entry belongs to it and
    /// the stream was written before.
    pub fn backpointer(&self, stream_id: &StreamId) -> Option<u64> {
        self.backpointers
            .get(stream_id)
            .cloned()
            .filter(|addr| !is_sentinel(*addr))
    }
}

impl std::fmt::Debug for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogEntry")
            .field("backpointers", &self.backpointers)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// A committed value: either data, or a hole which permanently marks the
/// address as holding nothing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum LogData {
    Data(LogEntry),
    Hole,
}

impl LogData {
    pub fn is_hole(&self) -> bool {
        matches!(self, LogData::Hole)
    }

    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            LogData::Data(entry) => Some(&entry.payload),
            LogData::Hole => None,
        }
    }
}

impl From<LogEntry> for LogData {
    fn from(entry: LogEntry) -> Self {
        LogData::Data(entry)
    }
}

impl std::fmt::Display for LogData {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            LogData::Data(entry) => write!(f, "Data({} bytes)", entry.payload.len()),
            LogData::Hole => write!(f, "Hole"),
        }
    }
}
