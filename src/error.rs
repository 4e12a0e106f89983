// Copyright 2025 FastLabs Developers
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

//! Error types for the pool.

use thiserror::Error;

/// A type-erased error returned by factories and initializers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A specialized `Result` for pool operations.
pub type Result<T> = std::result::Result<T, PoolError>;

/// The errors surfaced by pool operations.
///
/// No variant is fatal to the pool. Construction errors abort construction;
/// runtime errors are either per-call (surfaced to the caller) or transient
/// (absorbed by the maintainer's backoff and never propagated).
#[derive(Error, Debug)]
pub enum PoolError {
    /// Capacity is reached and nothing is idle. Back off and retry.
    #[error("no available resource")]
    NoAvailableResource,

    /// A release was requested for a resource that is not in use. This
    /// indicates an accounting bug upstream and is never retried.
    #[error("resource {0} is not in use")]
    InvalidState(String),

    /// A [`stat`](crate::Pool::stat) miss. Informational.
    #[error("resource {0} not found")]
    NotFound(String),

    /// The caller's cancellation token fired, or the pool shut down, while
    /// the caller was waiting for creation budget.
    #[error("cancelled while waiting for creation budget")]
    Cancelled,

    /// The pool configuration violates `min_idle <= max_idle <= capacity`
    /// or uses a zero interval.
    #[error("invalid pool configuration: {0}")]
    InvalidArguments(String),

    /// The initializer callback failed during construction.
    #[error("pool initializer failed")]
    Initializer(#[source] BoxError),

    /// The factory failed to create a resource on the acquire path.
    #[error("factory create failed")]
    Create(#[source] BoxError),
}
