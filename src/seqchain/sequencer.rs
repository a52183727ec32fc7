//! The sequencer hands out positions in the global log, maintains the tail of
//! every stream for backpointers, and decides whether a transaction can commit
//! by checking its conflict set against recent history.

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

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, info, trace, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::conflict_cache::{ConflictCache, ConflictKey};
use crate::constant::*;
use crate::error::{Error, Result};
use crate::stream_tails::StreamTailTable;
use crate::types::*;

/// The options for create a sequencer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerOption {
    /// The first address handed out by a fresh sequencer.
    ///
    /// default: 0
    pub initial_token: u64,

    /// Specify the maximum number of conflict keys tracked individually. Once
    /// the capacity is exceeded, the least recently used keys are evicted and
    /// transactions reading before them abort conservatively.
    ///
    /// default: 250000
    pub cache_capacity: usize,
}

impl Default for SequencerOption {
    fn default() -> SequencerOption {
        SequencerOption {
            initial_token: MIN_ADDRESS,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl SequencerOption {
    /// Load options from a json document, absent fields take their defaults.
    pub fn from_json(content: &str) -> Result<SequencerOption> {
        let opt: SequencerOption = serde_json::from_str(content)?;
        opt.validate()?;
        Ok(opt)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_capacity == 0 {
            return Err(Error::Config("cache_capacity must be positive".to_owned()));
        }
        if is_sentinel(self.initial_token) {
            return Err(Error::Config(format!(
                "initial_token {} is a reserved address",
                self.initial_token
            )));
        }
        Ok(())
    }
}

/// The states mutated only by the serialized paths of the sequencer.
#[derive(Debug)]
struct ConflictState {
    cache: ConflictCache,
    trim_mark: Option<u64>,
}

/// A sequencer instance.
///
/// Queries and raw allocations touch only atomics and the stream tail table.
/// Every operation which reads or writes the conflict cache, or must observe
/// the stream tails consistently with it, runs under `state`.
#[derive(Debug)]
pub struct Sequencer {
    /// The first unissued address of the global log.
    global_tail: AtomicU64,
    serving_epoch: AtomicU64,
    ready_epoch: AtomicU64,
    stream_tails: StreamTailTable,
    state: Mutex<ConflictState>,
}

impl Sequencer {
    pub fn new(opt: SequencerOption) -> Sequencer {
        info!(
            "new sequencer with initial token {}, cache capacity {}",
            opt.initial_token, opt.cache_capacity
        );
        Sequencer {
            global_tail: AtomicU64::new(opt.initial_token),
            serving_epoch: AtomicU64::new(0),
            ready_epoch: AtomicU64::new(INVALID_EPOCH),
            stream_tails: StreamTailTable::new(),
            state: Mutex::new(ConflictState {
                cache: ConflictCache::new(opt.cache_capacity),
                trim_mark: None,
            }),
        }
    }

    /// The router reports the epoch it is serving at.
    pub fn set_serving_epoch(&self, epoch: u64) {
        self.serving_epoch.store(epoch, Ordering::SeqCst);
    }

    pub fn serving_epoch(&self) -> u64 {
        self.serving_epoch.load(Ordering::SeqCst)
    }

    /// The epoch of the last accepted bootstrap, `INVALID_EPOCH` if the
    /// sequencer has never been bootstrapped.
    pub fn ready_epoch(&self) -> u64 {
        self.ready_epoch.load(Ordering::SeqCst)
    }

    pub fn is_ready(&self) -> bool {
        self.ready_epoch() == self.serving_epoch()
    }

    /// The first unissued address.
    pub fn global_tail(&self) -> u64 {
        self.global_tail.load(Ordering::SeqCst)
    }

    pub fn trim_mark(&self) -> Option<u64> {
        self.state.lock().trim_mark
    }

    pub fn wildcard(&self) -> Option<u64> {
        self.state.lock().cache.wildcard()
    }

    pub fn conflict_cache_len(&self) -> usize {
        self.state.lock().cache.len()
    }

    pub fn stream_tails(&self) -> HashMap<StreamId, u64> {
        self.stream_tails.snapshot()
    }

    /// Dispatch a token request to the operation of its type.
    pub fn handle_token_request(&self, req: TokenRequest) -> Result<TokenResponse> {
        match req {
            TokenRequest::Query { streams } => {
                let tail = self.query(&streams)?;
                Ok(TokenResponse::Normal(Token {
                    address: tail,
                    epoch: self.serving_epoch(),
                    backpointers: HashMap::new(),
                }))
            }
            TokenRequest::Raw { num_tokens } => {
                self.raw_allocate(num_tokens).map(TokenResponse::Normal)
            }
            TokenRequest::MultiStream {
                num_tokens,
                streams,
                txn_resolution,
            } => self
                .allocate(num_tokens, &streams, txn_resolution.as_ref())
                .map(TokenResponse::Normal),
            TokenRequest::Tx {
                num_tokens,
                streams,
                txn_resolution,
            } => self.commit_tx(num_tokens, &streams, &txn_resolution),
        }
    }

    /// Returns the last issued address if `streams` is empty, otherwise the
    /// tail of the single given stream (`NOT_FOUND` if never written).
    pub fn query(&self, streams: &[StreamId]) -> Result<u64> {
        self.check_ready()?;
        match streams {
            [] => Ok(self.global_tail().checked_sub(1).unwrap_or(NON_ADDRESS)),
            [stream_id] => Ok(self.stream_tails.get(stream_id).unwrap_or(NOT_FOUND)),
            _ => Err(Error::InvalidRequest(format!(
                "query supports at most one stream, got {}",
                streams.len()
            ))),
        }
    }

    /// Extend the global log by `num_tokens` without any stream bookkeeping.
    pub fn raw_allocate(&self, num_tokens: u64) -> Result<Token> {
        let epoch = self.check_ready()?;
        check_token_count(num_tokens)?;
        let address = self.reserve(num_tokens)?;
        trace!("raw token {} num {}", address, num_tokens);
        Ok(Token {
            address,
            epoch,
            backpointers: HashMap::new(),
        })
    }

    /// Allocate `num_tokens` addresses for `streams`, and record the write
    /// conflict parameters of `tx_info` if any.
    pub fn allocate(
        &self,
        num_tokens: u64,
        streams: &[StreamId],
        tx_info: Option<&TxResolutionInfo>,
    ) -> Result<Token> {
        let epoch = self.check_ready()?;
        check_token_count(num_tokens)?;
        let mut state = self.state.lock();
        self.allocate_locked(&mut state, num_tokens, streams, tx_info, epoch)
    }

    /// Allocate the commit address of a transaction, or abort it if a
    /// conflicting update may have happened after its snapshot. Aborts don't
    /// mutate any state.
    pub fn commit_tx(
        &self,
        num_tokens: u64,
        streams: &[StreamId],
        tx_info: &TxResolutionInfo,
    ) -> Result<TokenResponse> {
        let epoch = self.check_ready()?;
        check_token_count(num_tokens)?;
        let mut state = self.state.lock();
        if let Some(abort) = self.resolve_conflicts(&mut state, tx_info, epoch) {
            return Ok(TokenResponse::Abort(abort));
        }
        self.allocate_locked(&mut state, num_tokens, streams, Some(tx_info), epoch)
            .map(TokenResponse::Normal)
    }

    /// Advance the trim mark to `mark` (if larger), and evict every conflict
    /// key written below the trim mark.
    pub fn trim(&self, mark: u64) -> Result<()> {
        self.check_ready()?;
        let mut state = self.state.lock();
        info!("trim cache: starting cache eviction, mark {}", mark);
        let current = state.trim_mark;
        let trim_mark = match current {
            Some(current) if current >= mark => current,
            _ => {
                state.trim_mark = Some(mark);
                mark
            }
        };
        let evicted = state.cache.evict_below(trim_mark);
        info!(
            "trim cache: evicted {} entries below {}, wildcard {:?}",
            evicted,
            trim_mark,
            state.cache.wildcard()
        );
        Ok(())
    }

    /// Reset the sequencer to `msg.global_tail` if it is ahead of the current
    /// tail, then mark the sequencer ready at `msg.ready_epoch`.
    pub fn bootstrap(&self, msg: SequencerTailsRecovery) -> Result<()> {
        if is_sentinel(msg.global_tail) {
            return Err(Error::InvalidRequest(format!(
                "bootstrap global tail {} is a reserved address",
                msg.global_tail
            )));
        }
        let mut state = self.state.lock();
        let ready_epoch = self.ready_epoch();
        if ready_epoch != INVALID_EPOCH && msg.ready_epoch < ready_epoch {
            info!(
                "sequencer already bootstrapped at epoch {}, discard bootstrap request with epoch {}",
                ready_epoch, msg.ready_epoch
            );
            return Err(Error::StaleBootstrap {
                ready_epoch,
                request_epoch: msg.ready_epoch,
            });
        }

        let prev_tail = self.global_tail.fetch_max(msg.global_tail, Ordering::SeqCst);
        if msg.global_tail > prev_tail {
            // Nothing is known about updates before the new tail, so any
            // transaction whose snapshot precedes it aborts conservatively.
            state.cache.reset(Some(msg.global_tail - 1));
            let stream_tails = msg
                .stream_tails
                .into_iter()
                .filter(|(_, addr)| !is_sentinel(*addr))
                .collect::<HashMap<_, _>>();
            self.stream_tails.replace(stream_tails);
        }

        self.ready_epoch.store(msg.ready_epoch, Ordering::SeqCst);
        info!(
            "sequencer reset with token {} (previous tail {}), {} stream tails, ready epoch {}",
            msg.global_tail,
            prev_tail,
            self.stream_tails.len(),
            msg.ready_epoch
        );
        Ok(())
    }

    /// Returns the serving epoch if the sequencer is ready to serve it.
    fn check_ready(&self) -> Result<u64> {
        let serving_epoch = self.serving_epoch();
        let ready_epoch = self.ready_epoch();
        if serving_epoch != ready_epoch {
            warn!(
                "reject request at sequencer: ready epoch {}, serving epoch {}",
                ready_epoch, serving_epoch
            );
            return Err(Error::NotReady {
                serving_epoch,
                ready_epoch,
            });
        }
        Ok(serving_epoch)
    }

    fn resolve_conflicts(
        &self,
        state: &mut ConflictState,
        tx_info: &TxResolutionInfo,
        epoch: u64,
    ) -> Option<TxAbort> {
        let snapshot = tx_info.snapshot_timestamp;
        if let Some(trim_mark) = state.trim_mark {
            if snapshot < trim_mark {
                debug!(
                    "abort {:?}: snapshot {} precedes trim mark {}",
                    tx_info, snapshot, trim_mark
                );
                return Some(TxAbort {
                    reason: AbortReason::Trim,
                    address: trim_mark,
                    stream_id: None,
                    conflict_param: None,
                    epoch,
                });
            }
        }

        for (stream_id, params) in &tx_info.conflict_set {
            if let Some(wildcard) = state.cache.wildcard() {
                if snapshot < wildcard {
                    debug!(
                        "abort {:?}: snapshot {} precedes wildcard {}, stream {}",
                        tx_info, snapshot, wildcard, stream_id
                    );
                    return Some(TxAbort {
                        reason: AbortReason::SequencerOverflow,
                        address: ABORTED,
                        stream_id: Some(*stream_id),
                        conflict_param: params.first().cloned(),
                        epoch,
                    });
                }
            }

            if params.is_empty() {
                match self.stream_tails.get(stream_id) {
                    Some(stream_tail) if stream_tail > snapshot => {
                        debug!(
                            "abort {:?}: conflict stream {} (ts={})",
                            tx_info, stream_id, stream_tail
                        );
                        return Some(TxAbort {
                            reason: AbortReason::ConflictStream,
                            address: stream_tail,
                            stream_id: Some(*stream_id),
                            conflict_param: None,
                            epoch,
                        });
                    }
                    stream_tail => {
                        trace!("ok {:?}: stream {} (ts={:?})", tx_info, stream_id, stream_tail)
                    }
                }
                continue;
            }

            let validated = tx_info.validated_streams.get(stream_id).cloned();
            for param in params {
                let key = ConflictKey::new(*stream_id, param);
                match state.cache.get(&key) {
                    Some(conflict_tail) if conflict_tail > snapshot => match validated {
                        Some(validated) if validated >= conflict_tail => {
                            // The client has verified there is no true
                            // conflict up to the validated address.
                            warn!(
                                "validated stream {} at {} overrides conflict key {} at {}",
                                stream_id, validated, key, conflict_tail
                            );
                        }
                        _ => {
                            debug!(
                                "abort {:?}: conflict key {} (ts={}), validated {:?}",
                                tx_info, key, conflict_tail, validated
                            );
                            return Some(TxAbort {
                                reason: AbortReason::ConflictKey,
                                address: conflict_tail,
                                stream_id: Some(*stream_id),
                                conflict_param: Some(param.clone()),
                                epoch,
                            });
                        }
                    },
                    conflict_tail => {
                        trace!("ok {:?}: conflict key {} (ts={:?})", tx_info, key, conflict_tail)
                    }
                }
            }
        }
        None
    }

    fn allocate_locked(
        &self,
        state: &mut ConflictState,
        num_tokens: u64,
        streams: &[StreamId],
        tx_info: Option<&TxResolutionInfo>,
        epoch: u64,
    ) -> Result<Token> {
        let current_tail = self.reserve(num_tokens)?;
        let last_address = current_tail + num_tokens - 1;

        let stream_ids = streams.iter().collect::<BTreeSet<_>>();
        let backpointers = self
            .stream_tails
            .swap_all(stream_ids, last_address)
            .into_iter()
            .map(|(id, prev)| (id, prev.unwrap_or(NOT_FOUND)))
            .collect::<HashMap<_, _>>();

        if let Some(tx_info) = tx_info {
            for (stream_id, params) in &tx_info.write_conflict_params {
                for param in params {
                    state
                        .cache
                        .put(ConflictKey::new(*stream_id, param), last_address);
                }
            }
        }

        trace!("token {} backpointers {:?}", current_tail, backpointers);
        Ok(Token {
            address: current_tail,
            epoch,
            backpointers,
        })
    }

    /// Advance the global tail by `num_tokens`, returns the first reserved
    /// address. The tail is left untouched if the reserved range would reach
    /// the sentinel addresses.
    fn reserve(&self, num_tokens: u64) -> Result<u64> {
        self.global_tail
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |tail| {
                tail.checked_add(num_tokens).filter(|end| *end <= ABORTED)
            })
            .map_err(|tail| {
                warn!(
                    "reject {} tokens at global tail {}, the address space is exhausted",
                    num_tokens, tail
                );
                Error::InvalidTokenCount(num_tokens)
            })
    }
}

#[inline(always)]
fn check_token_count(num_tokens: u64) -> Result<()> {
    if num_tokens == 0 {
        Err(Error::InvalidTokenCount(num_tokens))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::thread;

    use rand::{thread_rng, Rng};
    use uuid::Uuid;

    use crate::logger;

    fn ready_sequencer_with(opt: SequencerOption) -> Sequencer {
        logger::init(log::LevelFilter::Trace);
        let seq = Sequencer::new(opt);
        seq.set_serving_epoch(1);
        seq.bootstrap(SequencerTailsRecovery {
            global_tail: 0,
            stream_tails: HashMap::new(),
            ready_epoch: 1,
        })
        .unwrap();
        seq
    }

    fn ready_sequencer() -> Sequencer {
        ready_sequencer_with(SequencerOption::default())
    }

    fn commit(seq: &Sequencer, stream_id: StreamId, tx: TxResolutionInfo) -> TokenResponse {
        seq.commit_tx(1, &[stream_id], &tx).unwrap()
    }

    #[test]
    fn option_from_json() {
        let opt = SequencerOption::from_json(r#"{"cache_capacity": 16}"#).unwrap();
        assert_eq!(opt.cache_capacity, 16);
        assert_eq!(opt.initial_token, 0);

        let opt = SequencerOption::from_json("{}").unwrap();
        assert_eq!(opt.cache_capacity, DEFAULT_CACHE_CAPACITY);

        assert!(matches!(
            SequencerOption::from_json(r#"{"cache_capacity": 0}"#),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            SequencerOption::from_json("not json"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn reject_until_ready() {
        logger::init(log::LevelFilter::Trace);
        let seq = Sequencer::new(SequencerOption::default());
        assert!(!seq.is_ready());
        assert!(matches!(seq.query(&[]), Err(Error::NotReady { .. })));
        assert!(matches!(seq.raw_allocate(1), Err(Error::NotReady { .. })));
        assert!(matches!(seq.trim(1), Err(Error::NotReady { .. })));

        seq.set_serving_epoch(2);
        seq.bootstrap(SequencerTailsRecovery {
            global_tail: 0,
            stream_tails: HashMap::new(),
            ready_epoch: 2,
        })
        .unwrap();
        assert!(seq.is_ready());
        assert_eq!(seq.raw_allocate(1).unwrap().epoch, 2);

        // the router moves on, the sequencer must be bootstrapped again.
        seq.set_serving_epoch(3);
        assert!(matches!(
            seq.allocate(1, &[Uuid::new_v4()], None),
            Err(Error::NotReady {
                serving_epoch: 3,
                ready_epoch: 2
            })
        ));
    }

    #[test]
    fn initial_token() {
        let seq = ready_sequencer_with(SequencerOption {
            initial_token: 10,
            ..SequencerOption::default()
        });
        assert_eq!(seq.query(&[]).unwrap(), 9);
        assert_eq!(seq.raw_allocate(1).unwrap().address, 10);
    }

    #[test]
    fn query_is_idempotent() {
        let seq = ready_sequencer();
        let s = Uuid::new_v4();
        assert_eq!(seq.query(&[]).unwrap(), NON_ADDRESS);
        assert_eq!(seq.query(&[s]).unwrap(), NOT_FOUND);

        seq.allocate(3, &[s], None).unwrap();
        for _ in 0..3 {
            assert_eq!(seq.query(&[]).unwrap(), 2);
            assert_eq!(seq.query(&[s]).unwrap(), 2);
        }
        assert!(matches!(
            seq.query(&[s, Uuid::new_v4()]),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn raw_allocation() {
        let seq = ready_sequencer();
        assert_eq!(seq.raw_allocate(1).unwrap().address, 0);
        assert_eq!(seq.raw_allocate(5).unwrap().address, 1);
        assert_eq!(seq.raw_allocate(1).unwrap().address, 6);
        assert!(matches!(seq.raw_allocate(0), Err(Error::InvalidTokenCount(0))));
        assert!(seq.stream_tails().is_empty());
    }

    #[test]
    fn token_count_exhausting_address_space() {
        let seq = ready_sequencer();
        let s = Uuid::new_v4();
        assert_eq!(seq.raw_allocate(5).unwrap().address, 0);

        assert!(matches!(
            seq.raw_allocate(u64::MAX),
            Err(Error::InvalidTokenCount(u64::MAX))
        ));
        assert!(matches!(
            seq.allocate(u64::MAX, &[s], None),
            Err(Error::InvalidTokenCount(_))
        ));
        let tx = TxResolutionInfo::new(4).write(s, vec![b"k".to_vec()]);
        assert!(matches!(
            seq.commit_tx(ABORTED - 4, &[s], &tx),
            Err(Error::InvalidTokenCount(_))
        ));

        // nothing was reserved by the rejected requests.
        assert_eq!(seq.global_tail(), 5);
        assert_eq!(seq.query(&[s]).unwrap(), NOT_FOUND);
        assert_eq!(seq.conflict_cache_len(), 0);
        assert_eq!(seq.raw_allocate(1).unwrap().address, 5);

        // the last non sentinel address can still be handed out.
        let last = seq.raw_allocate(ABORTED - 6).unwrap();
        assert_eq!(last.address, 6);
        assert_eq!(seq.global_tail(), ABORTED);
        assert!(!is_sentinel(seq.query(&[]).unwrap()));
        assert!(matches!(
            seq.raw_allocate(1),
            Err(Error::InvalidTokenCount(1))
        ));
    }

    #[test]
    fn backpointer_chain() {
        let seq = ready_sequencer();
        let s1 = Uuid::new_v4();
        let s2 = Uuid::new_v4();

        let t1 = seq.allocate(1, &[s1], None).unwrap();
        let t2 = seq.allocate(1, &[s1], None).unwrap();
        assert_eq!(t1.backpointers[&s1], NOT_FOUND);
        assert_eq!(t2.backpointers[&s1], t1.address);

        seq.raw_allocate(4).unwrap();
        let t3 = seq.allocate(2, &[s1, s2, s1], None).unwrap();
        assert_eq!(t3.backpointers.len(), 2);
        assert_eq!(t3.backpointers[&s1], t2.address);
        assert_eq!(t3.backpointers[&s2], NOT_FOUND);
        assert_eq!(seq.query(&[s1]).unwrap(), t3.address + 1);
        assert_eq!(seq.query(&[s2]).unwrap(), t3.address + 1);
    }

    #[test]
    fn bootstrap_resets_state() {
        let seq = ready_sequencer_with(SequencerOption {
            cache_capacity: 4,
            ..SequencerOption::default()
        });
        let s = Uuid::new_v4();
        let tx = TxResolutionInfo::new(0).write(s, vec![b"k".to_vec()]);
        seq.commit_tx(1, &[s], &tx).unwrap();
        assert_eq!(seq.conflict_cache_len(), 1);

        let other = Uuid::new_v4();
        let mut stream_tails = HashMap::new();
        stream_tails.insert(other, 50);
        seq.bootstrap(SequencerTailsRecovery {
            global_tail: 100,
            stream_tails,
            ready_epoch: 1,
        })
        .unwrap();
        assert_eq!(seq.query(&[]).unwrap(), 99);
        assert_eq!(seq.wildcard(), Some(99));
        assert_eq!(seq.conflict_cache_len(), 0);
        assert_eq!(seq.query(&[s]).unwrap(), NOT_FOUND);
        assert_eq!(seq.query(&[other]).unwrap(), 50);

        // a smaller tail keeps the state, but still moves the epoch.
        seq.set_serving_epoch(2);
        seq.bootstrap(SequencerTailsRecovery {
            global_tail: 10,
            stream_tails: HashMap::new(),
            ready_epoch: 2,
        })
        .unwrap();
        assert_eq!(seq.ready_epoch(), 2);
        assert_eq!(seq.query(&[]).unwrap(), 99);
        assert_eq!(seq.query(&[other]).unwrap(), 50);

        // stale
        assert!(matches!(
            seq.bootstrap(SequencerTailsRecovery {
                global_tail: 200,
                stream_tails: HashMap::new(),
                ready_epoch: 1,
            }),
            Err(Error::StaleBootstrap {
                ready_epoch: 2,
                request_epoch: 1
            })
        ));
        assert_eq!(seq.query(&[]).unwrap(), 99);
    }

    #[test]
    fn bootstrap_rejects_reserved_tail() {
        let seq = ready_sequencer();
        seq.raw_allocate(3).unwrap();
        for tail in [NON_ADDRESS, NOT_FOUND, ABORTED] {
            assert!(matches!(
                seq.bootstrap(SequencerTailsRecovery {
                    global_tail: tail,
                    stream_tails: HashMap::new(),
                    ready_epoch: 2,
                }),
                Err(Error::InvalidRequest(_))
            ));
        }
        assert_eq!(seq.ready_epoch(), 1);
        assert_eq!(seq.query(&[]).unwrap(), 2);
        assert_eq!(seq.wildcard(), None);
    }

    #[test]
    fn bootstrap_fresh_sequencer() {
        logger::init(log::LevelFilter::Trace);
        let seq = Sequencer::new(SequencerOption::default());
        seq.set_serving_epoch(1);
        seq.bootstrap(SequencerTailsRecovery {
            global_tail: 100,
            stream_tails: HashMap::new(),
            ready_epoch: 1,
        })
        .unwrap();
        assert_eq!(seq.query(&[]).unwrap(), 99);
    }

    #[test]
    fn tx_conflict_key() {
        let seq = ready_sequencer();
        let s = Uuid::new_v4();
        let p = b"p".to_vec();

        seq.raw_allocate(3).unwrap();
        let first = commit(
            &seq,
            s,
            TxResolutionInfo::new(2)
                .read(s, vec![p.clone()])
                .write(s, vec![p.clone()]),
        );
        let first = first.token().unwrap().clone();
        assert_eq!(first.address, 3);

        // read before the first commit.
        let second = commit(
            &seq,
            s,
            TxResolutionInfo::new(first.address - 1)
                .read(s, vec![p.clone()])
                .write(s, vec![p.clone()]),
        );
        assert_eq!(
            second,
            TokenResponse::Abort(TxAbort {
                reason: AbortReason::ConflictKey,
                address: first.address,
                stream_id: Some(s),
                conflict_param: Some(p.clone()),
                epoch: 1,
            })
        );

        // aborts don't mutate any state.
        assert_eq!(seq.query(&[]).unwrap(), first.address);
        assert_eq!(seq.query(&[s]).unwrap(), first.address);

        // a snapshot including the first commit goes through.
        let third = commit(&seq, s, TxResolutionInfo::new(first.address).read(s, vec![p.clone()]));
        assert_eq!(third.token().unwrap().backpointers[&s], first.address);

        // other keys of the same stream don't conflict.
        let fourth = commit(&seq, s, TxResolutionInfo::new(0).read(s, vec![b"q".to_vec()]));
        assert!(!fourth.is_abort());
    }

    #[test]
    fn tx_snapshot_at_conflict_address_commits() {
        let seq = ready_sequencer();
        let s = Uuid::new_v4();
        let p = b"p".to_vec();
        seq.raw_allocate(2).unwrap();
        let writer = commit(&seq, s, TxResolutionInfo::new(1).write(s, vec![p.clone()]));
        let conflict = writer.token().unwrap().address;

        // the snapshot has observed the write at `conflict`.
        let reader = commit(
            &seq,
            s,
            TxResolutionInfo::new(conflict)
                .read(s, vec![p.clone()])
                .write(s, vec![p.clone()]),
        );
        assert_eq!(reader.token().unwrap().address, conflict + 1);

        let stale = commit(&seq, s, TxResolutionInfo::new(conflict).read(s, vec![p]));
        assert_eq!(stale.abort().unwrap().address, conflict + 1);
    }

    #[test]
    fn tx_validated_override() {
        let seq = ready_sequencer();
        let s = Uuid::new_v4();
        let p = b"p".to_vec();
        seq.raw_allocate(5).unwrap();
        let writer = commit(&seq, s, TxResolutionInfo::new(4).write(s, vec![p.clone()]));
        let conflict = writer.token().unwrap().address;

        let stale = TxResolutionInfo::new(1)
            .read(s, vec![p.clone()])
            .validated(s, conflict - 1);
        let abort = commit(&seq, s, stale);
        assert_eq!(abort.abort().unwrap().reason, AbortReason::ConflictKey);
        assert_eq!(abort.abort().unwrap().address, conflict);

        let validated = TxResolutionInfo::new(1)
            .read(s, vec![p.clone()])
            .validated(s, conflict);
        assert!(!commit(&seq, s, validated).is_abort());
    }

    #[test]
    fn tx_conflict_stream() {
        let seq = ready_sequencer();
        let s1 = Uuid::new_v4();
        let s2 = Uuid::new_v4();
        let t = seq.allocate(1, &[s1], None).unwrap();

        let ok = commit(&seq, s2, TxResolutionInfo::new(0).read(s1, vec![]).read(s2, vec![]));
        // the first write of s1 is at 0, which isn't after snapshot 0.
        assert!(!ok.is_abort());

        seq.allocate(1, &[s1], None).unwrap();
        let abort = commit(&seq, s2, TxResolutionInfo::new(t.address).read(s1, vec![]));
        let abort = abort.abort().unwrap();
        assert_eq!(abort.reason, AbortReason::ConflictStream);
        assert_eq!(abort.stream_id, Some(s1));
        assert_eq!(abort.conflict_param, None);
        assert_eq!(abort.address, seq.query(&[s1]).unwrap());

        // never written streams don't conflict.
        let ok = commit(&seq, s2, TxResolutionInfo::new(0).read(Uuid::new_v4(), vec![]));
        assert!(!ok.is_abort());
    }

    #[test]
    fn tx_trim_and_wildcard() {
        let seq = ready_sequencer_with(SequencerOption {
            cache_capacity: 2,
            ..SequencerOption::default()
        });
        let s = Uuid::new_v4();
        for i in 0..3u8 {
            commit(&seq, s, TxResolutionInfo::new(0).write(s, vec![vec![i]]));
        }
        // key 0 written at 0 is evicted by capacity.
        assert_eq!(seq.wildcard(), Some(0));
        assert_eq!(seq.conflict_cache_len(), 2);

        seq.trim(2).unwrap();
        assert_eq!(seq.trim_mark(), Some(2));
        assert_eq!(seq.conflict_cache_len(), 1);
        assert_eq!(seq.wildcard(), Some(1));

        let abort = commit(&seq, s, TxResolutionInfo::new(1).read(s, vec![vec![2]]));
        assert_eq!(
            abort.abort().unwrap(),
            &TxAbort {
                reason: AbortReason::Trim,
                address: 2,
                stream_id: None,
                conflict_param: None,
                epoch: 1,
            }
        );

        // a lower trim mark doesn't move it backward.
        seq.trim(1).unwrap();
        assert_eq!(seq.trim_mark(), Some(2));

        // bootstrap pushes the wildcard ahead of the trim mark.
        seq.bootstrap(SequencerTailsRecovery {
            global_tail: 10,
            stream_tails: HashMap::new(),
            ready_epoch: 1,
        })
        .unwrap();
        let abort = commit(&seq, s, TxResolutionInfo::new(5).read(s, vec![vec![7]]));
        let abort = abort.abort().unwrap();
        assert_eq!(abort.reason, AbortReason::SequencerOverflow);
        assert_eq!(abort.stream_id, Some(s));
        assert_eq!(abort.conflict_param, Some(vec![7]));
        assert_eq!(abort.address, ABORTED);

        assert!(!commit(&seq, s, TxResolutionInfo::new(9).read(s, vec![vec![7]])).is_abort());
    }

    #[test]
    fn handle_token_request_dispatch() {
        let seq = ready_sequencer();
        let s = Uuid::new_v4();

        let raw = seq.handle_token_request(TokenRequest::Raw { num_tokens: 2 }).unwrap();
        assert_eq!(raw.token().unwrap().address, 0);

        let multi = seq
            .handle_token_request(TokenRequest::MultiStream {
                num_tokens: 1,
                streams: vec![s],
                txn_resolution: None,
            })
            .unwrap();
        assert_eq!(multi.token().unwrap().address, 2);

        let tx = seq
            .handle_token_request(TokenRequest::Tx {
                num_tokens: 1,
                streams: vec![s],
                txn_resolution: TxResolutionInfo::new(1).read(s, vec![]),
            })
            .unwrap();
        assert_eq!(tx.abort().unwrap().reason, AbortReason::ConflictStream);

        let query = seq
            .handle_token_request(TokenRequest::Query { streams: vec![s] })
            .unwrap();
        assert_eq!(query.token().unwrap().address, 2);
        assert!(query.token().unwrap().backpointers.is_empty());
    }

    #[test]
    fn concurrent_allocations_are_unique() {
        let seq = Arc::new(ready_sequencer());
        let streams = Arc::new((0..4).map(|_| Uuid::new_v4()).collect::<Vec<_>>());

        let handles = (0..8)
            .map(|_| {
                let seq = seq.clone();
                let streams = streams.clone();
                thread::spawn(move || {
                    let mut rng = thread_rng();
                    let mut tokens = Vec::new();
                    for _ in 0..200 {
                        if rng.gen_bool(0.3) {
                            seq.raw_allocate(rng.gen_range(1..4)).unwrap();
                        } else {
                            let s = streams[rng.gen_range(0..streams.len())];
                            tokens.push((s, seq.allocate(1, &[s], None).unwrap()));
                        }
                    }
                    tokens
                })
            })
            .collect::<Vec<_>>();

        let mut tokens = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect::<Vec<_>>();
        tokens.sort_by_key(|(_, t)| t.address);

        // addresses are unique, and the backpointers of each stream link
        // its allocations in address order.
        let mut last_of_stream: HashMap<StreamId, u64> = HashMap::new();
        let mut prev_address = None;
        for (s, token) in &tokens {
            assert!(prev_address < Some(token.address));
            prev_address = Some(token.address);
            let expect = last_of_stream.get(s).cloned().unwrap_or(NOT_FOUND);
            assert_eq!(token.backpointers[s], expect);
            last_of_stream.insert(*s, token.address);
        }
        for (s, last) in &last_of_stream {
            assert_eq!(seq.query(&[*s]).unwrap(), *last);
        }
    }

    #[test]
    fn concurrent_tx_on_same_key() {
        let seq = Arc::new(ready_sequencer());
        let s = Uuid::new_v4();
        let p = b"counter".to_vec();

        // every tx reads the key at the same snapshot, only one commits.
        let snapshot = seq.raw_allocate(1).unwrap().address;
        let handles = (0..8)
            .map(|_| {
                let seq = seq.clone();
                let p = p.clone();
                thread::spawn(move || {
                    let tx = TxResolutionInfo::new(snapshot)
                        .read(s, vec![p.clone()])
                        .write(s, vec![p]);
                    seq.commit_tx(1, &[s], &tx).unwrap()
                })
            })
            .collect::<Vec<_>>();
        let responses = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect::<Vec<_>>();

        let committed = responses.iter().filter_map(|r| r.token()).collect::<Vec<_>>();
        assert_eq!(committed.len(), 1);
        for abort in responses.iter().filter_map(|r| r.abort()) {
            assert_eq!(abort.reason, AbortReason::ConflictKey);
            assert_eq!(abort.address, committed[0].address);
        }
    }
}
