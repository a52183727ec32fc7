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

#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    /// The sequencer hasn't been bootstrapped for the epoch it is serving, the
    /// request is rejected and the client should retry later.
    #[error("sequencer not ready (serving epoch {serving_epoch}, ready epoch {ready_epoch})")]
    NotReady { serving_epoch: u64, ready_epoch: u64 },

    /// The bootstrap request carries an epoch older than the one the
    /// sequencer is already ready at.
    #[error("stale bootstrap at epoch {request_epoch}, already ready at epoch {ready_epoch}")]
    StaleBootstrap { ready_epoch: u64, request_epoch: u64 },

    #[error("invalid number of tokens {0}")]
    InvalidTokenCount(u64),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Another writer won the address, the value of the caller isn't the one
    /// committed.
    #[error("address {0} was overwritten by another writer")]
    Overwritten(u64),

    /// The head of the chain holds nothing while recovering.
    #[error("nothing to recover at the chain head of address {0}")]
    Recovery(u64),

    #[error("layout: {0}")]
    Layout(String),

    /// A log unit failed in a way the protocol can't interpret.
    #[error("log unit failed at address {address}: {reason}")]
    Unit { address: u64, reason: String },

    #[error("invalid config: {0}")]
    Config(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Error {
        Error::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
