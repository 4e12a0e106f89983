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

use std::future::Future;

use crate::error::BoxError;

/// A handle to a pooled network resource.
///
/// The pool never looks inside a resource; it only needs a stable identifier
/// to key the in-use map and the idle heap. Handles are cheap to clone; a
/// typical implementation wraps the provider object in an [`Arc`].
///
/// Two handles refer to the same resource exactly when their IDs are equal.
///
/// [`Arc`]: std::sync::Arc
pub trait ResourceHandle: Clone + Send + Sync + 'static {
    /// Returns the stable identifier of this resource.
    fn resource_id(&self) -> &str;
}

/// The outcome of a batch creation request against the provider.
///
/// Providers routinely satisfy only part of a batch, e.g. when an ENI quota
/// is hit after two of five interfaces attach. Both the resources that did
/// come up and the error that stopped the rest must reach the pool, so this
/// is a struct rather than a `Result`.
#[derive(Debug)]
pub struct CreateOutcome<T> {
    /// The resources that were actually created, possibly fewer than asked.
    pub resources: Vec<T>,
    /// The error that interrupted the batch, if any.
    pub error: Option<BoxError>,
}

impl<T> CreateOutcome<T> {
    /// A fully successful batch.
    pub fn complete(resources: Vec<T>) -> Self {
        Self {
            resources,
            error: None,
        }
    }

    /// A batch that failed outright, creating nothing.
    pub fn failed(error: impl Into<BoxError>) -> Self {
        Self {
            resources: Vec::new(),
            error: Some(error.into()),
        }
    }

    /// A batch that was interrupted after creating some resources.
    pub fn interrupted(resources: Vec<T>, error: impl Into<BoxError>) -> Self {
        Self {
            resources,
            error: Some(error.into()),
        }
    }
}

/// A trait whose instance provisions and deprovisions pooled resources.
///
/// The pool trusts the factory: resources it returns are assumed usable, and
/// every returned resource must carry a unique, stable ID. Creation consumes
/// one unit of the pool's capacity budget per resource; a successful dispose
/// returns one unit.
pub trait ManageResource: Send + Sync + 'static {
    /// The type of resources that this instance creates and disposes.
    type Resource: ResourceHandle;

    /// Creates up to `count` new resources.
    ///
    /// Partial success is expected: the outcome may carry fewer resources
    /// than requested, with or without an accompanying error.
    fn create(&self, count: usize) -> impl Future<Output = CreateOutcome<Self::Resource>> + Send;

    /// Disposes a resource.
    ///
    /// Failures are treated as transient: the pool keeps the resource and
    /// retries later, so this must be safe to call again for the same
    /// resource.
    fn dispose(&self, res: &Self::Resource) -> impl Future<Output = Result<(), BoxError>> + Send;
}

impl<M: ManageResource> ManageResource for std::sync::Arc<M> {
    type Resource = M::Resource;

    fn create(&self, count: usize) -> impl Future<Output = CreateOutcome<Self::Resource>> + Send {
        (**self).create(count)
    }

    fn dispose(&self, res: &Self::Resource) -> impl Future<Output = Result<(), BoxError>> + Send {
        (**self).dispose(res)
    }
}

/// Accepts pre-existing resources into the pool during construction.
///
/// The surrounding system discovers resources out-of-band (e.g. interfaces
/// already attached to the host after a daemon restart) and reconciles them
/// into pool accounting before the creation budget is computed. See
/// [`Pool::with_initializer`](crate::Pool::with_initializer).
pub trait ResourceHolder<T> {
    /// Adds a resource directly to the idle set, immediately reclaimable.
    fn add_idle(&mut self, res: T);

    /// Adds a resource directly to the in-use set under the given owner key.
    fn add_inuse(&mut self, res: T, idempotent_key: &str);
}
