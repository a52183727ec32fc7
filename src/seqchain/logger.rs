//! A tiny backend of the `log` facade, which prints records to stdout.

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

use std::sync::Once;

use chrono::Local;
use log::{Level, LevelFilter, Metadata, Record};

/// Records of this crate pass at the configured max level, records of other
/// crates only at `Warn` and above.
const CRATE_TARGET: &str = env!("CARGO_CRATE_NAME");

#[derive(Debug)]
pub struct SimpleLogger;

#[inline(always)]
fn level_tag(level: Level) -> char {
    match level {
        Level::Error => 'E',
        Level::Warn => 'W',
        Level::Info => 'I',
        Level::Debug => 'D',
        Level::Trace => 'T',
    }
}

#[inline(always)]
fn is_crate_target(target: &str) -> bool {
    target == CRATE_TARGET || target.starts_with(&format!("{}::", CRATE_TARGET))
}

impl log::Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        is_crate_target(metadata.target()) || metadata.level() <= Level::Warn
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        // The module path is enough to locate a record of this crate.
        let target = record.target();
        let module = target.strip_prefix(CRATE_TARGET).unwrap_or(target);
        println!(
            "{}{} {}:{} {}",
            level_tag(record.level()),
            Local::now().format("%m%d %H:%M:%S%.6f"),
            module.trim_start_matches("::"),
            record.line().unwrap_or(0),
            record.args()
        );
    }

    fn flush(&self) {}
}

static LOGGER: SimpleLogger = SimpleLogger;
static SETUP_LOGGER: Once = Once::new();

/// Install `SimpleLogger` as the global logger. Only the first call takes
/// effect, and nothing happens if another logger was installed before.
pub fn init(level: LevelFilter) {
    SETUP_LOGGER.call_once(|| {
        if log::set_logger(&LOGGER).is_ok() {
            log::set_max_level(level);
        }
    });
}
