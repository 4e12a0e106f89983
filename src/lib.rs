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

#![deny(missing_docs)]

//! Enipool provides a deadline-aware object pool for expensive, externally
//! provisioned network resources such as elastic network interfaces.
//!
//! Unlike a connection pool, the resources here are provisioned against a
//! cloud provider: creating one may take seconds and count against a quota,
//! and a resource released by one caller is often wanted back by the same
//! caller shortly after. The pool therefore:
//!
//! - enforces an absolute `capacity` on everything outstanding through a
//!   token budget, where `idle + inuse + tokens = capacity`;
//! - keeps the idle population inside a `[min_idle, max_idle]` band with a
//!   background maintainer that creates when short and disposes when
//!   overfull, backing off exponentially on provider failures;
//! - orders idle resources by a *reclamation deadline*, so a resource
//!   released with [`Pool::release_with_reverse`] is held for its former
//!   owner: a specific-ID [`Pool::acquire`] can take it back at any time,
//!   while the maintainer will not dispose it until the deadline passes;
//! - replays duplicated acquire requests idempotently on
//!   `(resource id, idempotent key)`, since callers retry across their own
//!   faults.
//!
//! The pool is resource-agnostic: implement [`ResourceHandle`] for your
//! handle type and [`ManageResource`] for the provider client, and
//! optionally seed pre-existing resources through
//! [`Pool::with_initializer`]. See the [`pool`] module documentation for a
//! complete example.

pub use common::CreateOutcome;
pub use common::ManageResource;
pub use common::ResourceHandle;
pub use common::ResourceHolder;
pub use error::BoxError;
pub use error::PoolError;
pub use error::Result;
pub use pool::Pool;
pub use pool::PoolConfig;
pub use pool::PoolStatus;

mod common;
mod error;
mod heap;

pub mod pool;
