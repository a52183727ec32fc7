//! The crate `layout` defines how the replication protocol finds the replica
//! chain responsible for an address.

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

use crate::constant::*;
use crate::error::{Error, Result};
use crate::log_unit::LogUnit;

/// The ordered replicas of a segment, the first one is the head and the last
/// one is the tail.
#[derive(Clone)]
pub struct ReplicaChain {
    units: Vec<Arc<dyn LogUnit>>,
}

impl ReplicaChain {
    pub fn new(units: Vec<Arc<dyn LogUnit>>) -> Result<ReplicaChain> {
        if units.is_empty() {
            return Err(Error::Layout("replica chain is empty".to_owned()));
        }
        Ok(ReplicaChain { units })
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn head(&self) -> &Arc<dyn LogUnit> {
        &self.units[0]
    }

    pub fn tail(&self) -> &Arc<dyn LogUnit> {
        &self.units[self.units.len() - 1]
    }

    pub fn unit(&self, index: usize) -> Option<&Arc<dyn LogUnit>> {
        self.units.get(index)
    }

    /// Iterate all units except the head, in chain order.
    pub fn successors(&self) -> impl Iterator<Item = (usize, &Arc<dyn LogUnit>)> {
        self.units.iter().enumerate().skip(1)
    }
}

impl std::fmt::Debug for ReplicaChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.units.iter().map(|u| u.name()))
            .finish()
    }
}

/// A trait is used by the replication protocol to read the topology. The
/// chain returned for an address is used unchanged for a whole operation.
pub trait Layout: Send + Sync {
    fn chain_for_address(&self, address: u64) -> Result<ReplicaChain>;

    fn segment_length(&self, address: u64) -> Result<usize> {
        Ok(self.chain_for_address(address)?.len())
    }
}

#[derive(Debug, Clone)]
pub struct Segment {
    pub start: u64,
    /// Exclusive, `NON_ADDRESS` if the segment is open.
    pub end: u64,
    pub chain: ReplicaChain,
}

impl Segment {
    fn contains(&self, address: u64) -> bool {
        self.start <= address && address < self.end
    }
}

/// A static layout made of contiguous segments.
#[derive(Debug, Clone)]
pub struct SegmentLayout {
    epoch: u64,
    segments: Vec<Segment>,
}

impl SegmentLayout {
    pub fn new(epoch: u64) -> SegmentLayout {
        SegmentLayout {
            epoch,
            segments: Vec::new(),
        }
    }

    /// A layout whose single open segment is served by `chain`.
    pub fn single(epoch: u64, chain: ReplicaChain) -> SegmentLayout {
        SegmentLayout {
            epoch,
            segments: vec![Segment {
                start: MIN_ADDRESS,
                end: NON_ADDRESS,
                chain,
            }],
        }
    }

    /// Append the segment `[start, end)`, which must start where the last
    /// segment ends.
    pub fn add_segment(mut self, start: u64, end: u64, chain: ReplicaChain) -> Result<Self> {
        if start >= end {
            return Err(Error::Layout(format!("empty segment [{}, {})", start, end)));
        }
        let expect_start = self.segments.last().map(|s| s.end).unwrap_or(MIN_ADDRESS);
        if start != expect_start {
            return Err(Error::Layout(format!(
                "segment starts at {}, expect {}",
                start, expect_start
            )));
        }
        self.segments.push(Segment { start, end, chain });
        Ok(self)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }
}

impl Layout for SegmentLayout {
    fn chain_for_address(&self, address: u64) -> Result<ReplicaChain> {
        let idx = self.segments.partition_point(|s| s.end <= address);
        match self.segments.get(idx) {
            Some(segment) if segment.contains(address) => Ok(segment.chain.clone()),
            _ => Err(Error::Layout(format!(
                "no segment covers address {} at epoch {}",
                address, self.epoch
            ))),
        }
    }
}
