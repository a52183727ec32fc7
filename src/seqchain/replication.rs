//! Chain replication of the values of the global log.
//!
//! A value is written to the head of the chain first, then propagated to every
//! other replica in chain order, so a replica never holds a value until all
//! replicas before it do. The tail is therefore the last to learn a value, and
//! reads are served by it. When a writer finds the head already written, it
//! drives whatever the head holds to completion before reporting its failure.

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

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, error, trace};
use rand::{thread_rng, Rng};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::layout::{Layout, ReplicaChain};
use crate::log_unit::{LogUnit, WriteStatus};
use crate::types::{LogData, LogEntry};

/// Decides how long a reader waits for an unwritten address before filling it
/// with a hole.
pub trait HoleFillPolicy: Send + Sync {
    /// Peek `address` until it holds a value or a hole fill is required,
    /// returns `None` in the latter case.
    fn peek_until_hole_fill_required(
        &self,
        address: u64,
        peek: &dyn Fn(u64) -> Result<Option<LogData>>,
    ) -> Result<Option<LogData>>;
}

/// Fill a hole as soon as an address is found empty.
#[derive(Debug, Default)]
pub struct AlwaysHoleFill;

impl HoleFillPolicy for AlwaysHoleFill {
    fn peek_until_hole_fill_required(
        &self,
        address: u64,
        peek: &dyn Fn(u64) -> Result<Option<LogData>>,
    ) -> Result<Option<LogData>> {
        peek(address)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HoleFillOption {
    /// Specify how many times an empty address is peeked again before it is
    /// filled.
    ///
    /// default: 3
    pub retries: u32,

    /// default: 10
    pub base_wait_ms: u64,

    /// Each wait is extended by a random value between `[0, jitter_ms]`, so
    /// readers of the same address don't retry in lockstep.
    ///
    /// default: 10
    pub jitter_ms: u64,
}

impl Default for HoleFillOption {
    fn default() -> HoleFillOption {
        HoleFillOption {
            retries: 3,
            base_wait_ms: 10,
            jitter_ms: 10,
        }
    }
}

/// Give the writer of an address a chance to finish before filling it.
#[derive(Debug, Default)]
pub struct RetryHoleFill {
    opt: HoleFillOption,
}

impl RetryHoleFill {
    pub fn new(opt: HoleFillOption) -> RetryHoleFill {
        RetryHoleFill { opt }
    }

    fn next_wait(&self) -> Duration {
        let jitter = if self.opt.jitter_ms == 0 {
            0
        } else {
            thread_rng().gen_range(0..=self.opt.jitter_ms)
        };
        Duration::from_millis(self.opt.base_wait_ms + jitter)
    }
}

impl HoleFillPolicy for RetryHoleFill {
    fn peek_until_hole_fill_required(
        &self,
        address: u64,
        peek: &dyn Fn(u64) -> Result<Option<LogData>>,
    ) -> Result<Option<LogData>> {
        for attempt in 0..=self.opt.retries {
            if let Some(data) = peek(address)? {
                return Ok(Some(data));
            }
            if attempt < self.opt.retries {
                let wait = self.next_wait();
                trace!(
                    "address {} is empty, retry {} after {:?}",
                    address,
                    attempt + 1,
                    wait
                );
                thread::sleep(wait);
            }
        }
        Ok(None)
    }
}

pub struct ChainReplicationProtocol {
    layout: Arc<dyn Layout>,
    hole_fill_policy: Box<dyn HoleFillPolicy>,
}

impl ChainReplicationProtocol {
    pub fn new(
        layout: Arc<dyn Layout>,
        hole_fill_policy: Box<dyn HoleFillPolicy>,
    ) -> ChainReplicationProtocol {
        ChainReplicationProtocol {
            layout,
            hole_fill_policy,
        }
    }

    /// Write `entry` at `address`. If another value won the head, that value
    /// is driven to completion and `Error::Overwritten` is returned.
    pub fn write(&self, address: u64, entry: LogEntry) -> Result<()> {
        let chain = self.layout.chain_for_address(address)?;
        trace!("write {}: chain head 1/{}", address, chain.len());
        match chain.head().write(address, &entry)? {
            WriteStatus::Written => {
                self.propagate_chain(address, &chain, &LogData::Data(entry))?;
                Ok(())
            }
            WriteStatus::Overwritten => {
                debug!("write {}: overwritten at chain head, recover it", address);
                self.recover_chain(address, &chain)?;
                Err(Error::Overwritten(address))
            }
        }
    }

    /// Propagate `data` to every replica but the head, which must already
    /// hold it. Replicas already written by someone else are skipped.
    pub fn propagate(&self, address: u64, data: &LogData) -> Result<()> {
        let chain = self.layout.chain_for_address(address)?;
        self.propagate_chain(address, &chain, data)
    }

    /// Drive the value at the chain head of `address` to every replica,
    /// returns the value. Fails with `Error::Recovery` if the head is empty,
    /// since recovery is only invoked after the head was written.
    pub fn recover(&self, address: u64) -> Result<LogData> {
        let chain = self.layout.chain_for_address(address)?;
        self.recover_chain(address, &chain)
    }

    /// Read `address` from the tail of the chain, `None` if it isn't fully
    /// written yet.
    pub fn peek(&self, address: u64) -> Result<Option<LogData>> {
        let chain = self.layout.chain_for_address(address)?;
        trace!("read {}: chain {}/{}", address, chain.len(), chain.len());
        chain.tail().read(address)
    }

    /// Read the committed value of `address`. If it stays empty as long as
    /// the hole fill policy allows, the address is filled with a hole, or
    /// with whatever a concurrent writer managed to put at the head.
    pub fn read(&self, address: u64) -> Result<LogData> {
        let peek = |addr: u64| self.peek(addr);
        if let Some(data) = self
            .hole_fill_policy
            .peek_until_hole_fill_required(address, &peek)?
        {
            return Ok(data);
        }

        self.hole_fill(address)?;
        match self.peek(address)? {
            Some(data) => Ok(data),
            None => {
                error!("read {}: chain tail is empty after hole fill", address);
                Err(Error::Recovery(address))
            }
        }
    }

    /// Fill `address` with a hole. If the head was already written, its value
    /// is driven to completion instead.
    pub fn hole_fill(&self, address: u64) -> Result<()> {
        let chain = self.layout.chain_for_address(address)?;
        trace!("fill hole {}: chain head 1/{}", address, chain.len());
        match chain.head().fill_hole(address)? {
            WriteStatus::Written => self.propagate_chain(address, &chain, &LogData::Hole),
            WriteStatus::Overwritten => {
                debug!("fill hole {}: head already written, recover it", address);
                self.recover_chain(address, &chain).map(|_| ())
            }
        }
    }

    fn propagate_chain(&self, address: u64, chain: &ReplicaChain, data: &LogData) -> Result<()> {
        for (idx, unit) in chain.successors() {
            trace!("propagate {}: chain {}/{}", address, idx + 1, chain.len());
            if write_unit(unit, address, data)? == WriteStatus::Overwritten {
                trace!("propagate {}: completed by other writer", address);
            }
        }
        Ok(())
    }

    fn recover_chain(&self, address: u64, chain: &ReplicaChain) -> Result<LogData> {
        debug!("recover {}: read chain head 1/{}", address, chain.len());
        let data = match chain.head().read(address)? {
            Some(data) => data,
            None => {
                error!(
                    "recover {}: nothing at chain head {}",
                    address,
                    chain.head().name()
                );
                return Err(Error::Recovery(address));
            }
        };

        for (idx, unit) in chain.successors() {
            match write_unit(unit, address, &data)? {
                WriteStatus::Written => debug!(
                    "recover {}: recovered {} at chain {}/{}",
                    address,
                    data,
                    idx + 1,
                    chain.len()
                ),
                WriteStatus::Overwritten => debug!(
                    "recover {}: overwritten at chain {}/{}",
                    address,
                    idx + 1,
                    chain.len()
                ),
            }
        }
        Ok(data)
    }
}

impl std::fmt::Debug for ChainReplicationProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainReplicationProtocol").finish()
    }
}

#[inline(always)]
fn write_unit(unit: &Arc<dyn LogUnit>, address: u64, data: &LogData) -> Result<WriteStatus> {
    match data {
        LogData::Data(entry) => unit.write(address, entry),
        LogData::Hole => unit.fill_hole(address),
    }
}
