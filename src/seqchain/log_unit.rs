//! The crate `log_unit` defines the contract of a per-replica storage unit,
//! and an in-memory implementation of it.

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
use std::sync::atomic::{AtomicBool, Ordering};

use log::trace;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::types::{LogData, LogEntry};

/// The result of a write or hole fill which reached the unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    Written,
    /// The address already holds a value (data or hole) at this unit.
    Overwritten,
}

/// A trait is used by the replication protocol to access one replica.
///
/// A unit accepts at most one value per address. Every call may block, and
/// any `Err` is a failure the protocol doesn't interpret (eg: network or
/// timeout), which is returned to the caller as is.
pub trait LogUnit: Send + Sync {
    /// The name of this unit, used by logs.
    fn name(&self) -> &str;
    /// Write `entry` at `address`.
    fn write(&self, address: u64, entry: &LogEntry) -> Result<WriteStatus>;
    /// Read the value at `address`, `None` if nothing was written.
    fn read(&self, address: u64) -> Result<Option<LogData>>;
    /// Mark `address` as a hole.
    fn fill_hole(&self, address: u64) -> Result<WriteStatus>;
}

/// A log unit keeps everything in memory.
#[derive(Debug)]
pub struct MemLogUnit {
    name: String,
    slots: Mutex<HashMap<u64, LogData>>,
    unavailable: AtomicBool,
}

impl MemLogUnit {
    pub fn new(name: &str) -> MemLogUnit {
        MemLogUnit {
            name: name.to_owned(),
            slots: Mutex::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Make every following request fail (or succeed again) as if the unit
    /// were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    fn check_available(&self, address: u64) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Unit {
                address,
                reason: format!("unit {} is unavailable", self.name),
            });
        }
        Ok(())
    }

    fn put(&self, address: u64, data: LogData) -> WriteStatus {
        let mut slots = self.slots.lock();
        if slots.contains_key(&address) {
            trace!("unit {} address {} is overwritten", self.name, address);
            return WriteStatus::Overwritten;
        }
        slots.insert(address, data);
        WriteStatus::Written
    }
}

impl LogUnit for MemLogUnit {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&self, address: u64, entry: &LogEntry) -> Result<WriteStatus> {
        self.check_available(address)?;
        Ok(self.put(address, LogData::Data(entry.clone())))
    }

    fn read(&self, address: u64) -> Result<Option<LogData>> {
        self.check_available(address)?;
        Ok(self.slots.lock().get(&address).cloned())
    }

    fn fill_hole(&self, address: u64) -> Result<WriteStatus> {
        self.check_available(address)?;
        Ok(self.put(address, LogData::Hole))
    }
}
