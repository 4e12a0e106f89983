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

//! The deadline-aware resource pool.
//!
//! A [`Pool`] manages a bounded population of expensive, externally
//! provisioned resources. Callers acquire a resource by identity or "any",
//! use it, and release it back, optionally with a reclamation deadline
//! during which the resource is retained idle and preferentially re-handed
//! to the same caller.
//!
//! A background maintainer keeps the idle population inside the configured
//! `[min_idle, max_idle]` band, creating fresh resources when short and
//! disposing surplus ones when overfull, while an absolute `capacity`
//! bounds everything outstanding. The creation budget is a token semaphore:
//! `idle + inuse + tokens = capacity` holds at every quiescent point.
//!
//! ## Examples
//!
//! ```
//! use std::sync::atomic::AtomicUsize;
//! use std::sync::atomic::Ordering;
//!
//! use enipool::CreateOutcome;
//! use enipool::ManageResource;
//! use enipool::Pool;
//! use enipool::PoolConfig;
//! use enipool::ResourceHandle;
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Clone)]
//! struct Eni {
//!     id: String,
//! }
//!
//! impl ResourceHandle for Eni {
//!     fn resource_id(&self) -> &str {
//!         &self.id
//!     }
//! }
//!
//! struct EniFactory {
//!     next: AtomicUsize,
//! }
//!
//! impl ManageResource for EniFactory {
//!     type Resource = Eni;
//!
//!     async fn create(&self, count: usize) -> CreateOutcome<Eni> {
//!         let resources = (0..count)
//!             .map(|_| Eni {
//!                 id: format!("eni-{}", self.next.fetch_add(1, Ordering::SeqCst)),
//!             })
//!             .collect();
//!         CreateOutcome::complete(resources)
//!     }
//!
//!     async fn dispose(&self, _res: &Eni) -> Result<(), enipool::BoxError> {
//!         Ok(())
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = PoolConfig::new(5).with_idle_bounds(1, 3);
//! let factory = EniFactory {
//!     next: AtomicUsize::new(0),
//! };
//! let pool = Pool::new(config, factory).unwrap();
//!
//! let cancel = CancellationToken::new();
//! let res = pool.acquire_any(&cancel, "pod-a").await.unwrap();
//! pool.release(res.resource_id()).unwrap();
//! pool.shutdown();
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::ManageResource;
use crate::ResourceHandle;
use crate::ResourceHolder;
use crate::error::BoxError;
use crate::error::PoolError;
use crate::error::Result;
use crate::heap::IdleHeap;
use crate::heap::IdleItem;

const DEFAULT_CHECK_IDLE_INTERVAL: Duration = Duration::from_secs(120);
const DEFAULT_BACKOFF: Duration = Duration::from_secs(60);
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(3600);

/// The configuration of [`Pool`].
#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub struct PoolConfig {
    /// The idle population the maintainer replenishes toward.
    pub min_idle: usize,

    /// The idle population above which the maintainer disposes surplus
    /// entries whose reclamation deadline has passed.
    pub max_idle: usize,

    /// Absolute bound on outstanding resources: idle, in use, and being
    /// created.
    pub capacity: usize,

    /// Interval between unconditional maintainer passes. The maintainer
    /// also wakes on every pool state change, so this only bounds the
    /// latency of a lost wake-up.
    pub check_idle_interval: Duration,

    /// Backoff applied after the first transient factory failure. Doubles
    /// on every further failure and resets on success.
    pub initial_backoff: Duration,

    /// Upper bound on the doubling backoff.
    pub max_backoff: Duration,
}

impl PoolConfig {
    /// Creates a new [`PoolConfig`] with the given capacity, an idle band
    /// of `[0, capacity]`, and default maintenance timings.
    pub fn new(capacity: usize) -> Self {
        Self {
            min_idle: 0,
            max_idle: capacity,
            capacity,
            check_idle_interval: DEFAULT_CHECK_IDLE_INTERVAL,
            initial_backoff: DEFAULT_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }

    /// Returns a new [`PoolConfig`] with the specified idle band.
    pub fn with_idle_bounds(mut self, min_idle: usize, max_idle: usize) -> Self {
        self.min_idle = min_idle;
        self.max_idle = max_idle;
        self
    }

    /// Returns a new [`PoolConfig`] with the specified maintainer interval.
    pub fn with_check_idle_interval(mut self, interval: Duration) -> Self {
        self.check_idle_interval = interval;
        self
    }

    /// Returns a new [`PoolConfig`] with the specified backoff range.
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.min_idle > self.max_idle {
            return Err(PoolError::InvalidArguments(format!(
                "min_idle ({}) exceeds max_idle ({})",
                self.min_idle, self.max_idle
            )));
        }
        if self.max_idle > self.capacity {
            return Err(PoolError::InvalidArguments(format!(
                "max_idle ({}) exceeds capacity ({})",
                self.max_idle, self.capacity
            )));
        }
        if self.check_idle_interval.is_zero() || self.initial_backoff.is_zero() {
            return Err(PoolError::InvalidArguments(
                "maintenance intervals must be non-zero".to_string(),
            ));
        }
        if self.max_backoff < self.initial_backoff {
            return Err(PoolError::InvalidArguments(format!(
                "max_backoff ({:?}) is below initial_backoff ({:?})",
                self.max_backoff, self.initial_backoff
            )));
        }
        Ok(())
    }
}

/// The current pool status.
///
/// See [`Pool::status`].
#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub struct PoolStatus {
    /// The number of idle resources.
    pub idle: usize,

    /// The number of resources currently handed out.
    pub inuse: usize,

    /// The remaining creation budget.
    pub tokens: usize,
}

struct InuseItem<T> {
    res: T,
    idempotent_key: String,
}

struct PoolState<T> {
    inuse: HashMap<String, InuseItem<T>>,
    idle: IdleHeap<T>,
}

impl<T: ResourceHandle> PoolState<T> {
    fn size(&self) -> usize {
        self.idle.len() + self.inuse.len()
    }

    /// Takes the requested entry from idle if present, the earliest-deadline
    /// entry otherwise. Returns `None` only when idle is empty.
    fn take_idle(&mut self, res_id: &str) -> Option<IdleItem<T>> {
        if !res_id.is_empty() {
            if let Some(item) = self.idle.rob(res_id) {
                return Some(item);
            }
        }
        self.idle.pop()
    }

    fn too_many_idle(&self, config: &PoolConfig) -> bool {
        self.idle.len() > config.max_idle
            || (!self.idle.is_empty() && self.size() > config.capacity)
    }
}

impl<T: ResourceHandle> ResourceHolder<T> for PoolState<T> {
    fn add_idle(&mut self, res: T) {
        self.idle.push(IdleItem {
            res,
            reclaim_at: Instant::now(),
        });
    }

    fn add_inuse(&mut self, res: T, idempotent_key: &str) {
        self.inuse.insert(
            res.resource_id().to_string(),
            InuseItem {
                res,
                idempotent_key: idempotent_key.to_string(),
            },
        );
    }
}

struct PoolInner<M: ManageResource> {
    factory: M,
    config: PoolConfig,
    state: Mutex<PoolState<M::Resource>>,
    /// Creation budget. `idle + inuse + tokens = capacity` at every
    /// quiescent point.
    tokens: Semaphore,
    /// Coalescing wake-up for the maintainer. A `notify_one` with no waiter
    /// stores at most one permit, so pending wake-ups collapse into one.
    notify: Arc<Notify>,
    shutdown: CancellationToken,
    backoff: Mutex<Duration>,
}

impl<M: ManageResource> Drop for PoolInner<M> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Deadline-aware pool of externally provisioned resources.
///
/// Cloning a `Pool` is cheap and shares the underlying state. The
/// background maintainer stops when [`Pool::shutdown`] is called or when
/// the last clone is dropped.
///
/// See the [module level documentation](self) for more.
pub struct Pool<M: ManageResource> {
    inner: Arc<PoolInner<M>>,
}

impl<M: ManageResource> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: ManageResource> std::fmt::Debug for Pool<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.status();
        f.debug_struct("Pool")
            .field("config", &self.inner.config)
            .field("status", &status)
            .finish()
    }
}

type Initializer<'a, T> =
    Box<dyn FnOnce(&mut dyn ResourceHolder<T>) -> std::result::Result<(), BoxError> + 'a>;

impl<M: ManageResource> Pool<M> {
    /// Creates a new [`Pool`] and starts its background maintainer.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidArguments`] if the configuration
    /// violates `min_idle <= max_idle <= capacity` or uses zero intervals.
    pub fn new(config: PoolConfig, factory: M) -> Result<Self> {
        Self::build(config, factory, None)
    }

    /// Creates a new [`Pool`], seeding it with pre-existing resources.
    ///
    /// The initializer runs before the creation budget is computed, so
    /// every seeded resource reduces the budget by one. Seeding beyond
    /// `capacity` leaves a zero budget and the maintainer disposes the
    /// overflow as deadlines allow.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidArguments`] on a bad configuration, or
    /// [`PoolError::Initializer`] if the callback fails.
    pub fn with_initializer<I>(config: PoolConfig, factory: M, initializer: I) -> Result<Self>
    where
        I: FnOnce(&mut dyn ResourceHolder<M::Resource>) -> std::result::Result<(), BoxError>,
    {
        Self::build(config, factory, Some(Box::new(initializer)))
    }

    fn build(
        config: PoolConfig,
        factory: M,
        initializer: Option<Initializer<'_, M::Resource>>,
    ) -> Result<Self> {
        config.validate()?;

        let mut state = PoolState {
            inuse: HashMap::new(),
            idle: IdleHeap::new(),
        };
        if let Some(initializer) = initializer {
            initializer(&mut state).map_err(PoolError::Initializer)?;
        }

        let seeded = state.size();
        let idle_ids: Vec<&str> = state.idle.iter().map(|it| it.res.resource_id()).collect();
        let inuse_ids: Vec<&str> = state.inuse.keys().map(String::as_str).collect();
        tracing::info!(
            capacity = config.capacity,
            max_idle = config.max_idle,
            min_idle = config.min_idle,
            idle = ?idle_ids,
            inuse = ?inuse_ids,
            "pool initial state"
        );

        let inner = Arc::new(PoolInner {
            factory,
            config,
            state: Mutex::new(state),
            tokens: Semaphore::new(config.capacity.saturating_sub(seeded)),
            notify: Arc::new(Notify::new()),
            shutdown: CancellationToken::new(),
            backoff: Mutex::new(config.initial_backoff),
        });

        tokio::spawn(maintain(
            Arc::downgrade(&inner),
            inner.notify.clone(),
            inner.shutdown.clone(),
            config.check_idle_interval,
        ));

        Ok(Self { inner })
    }

    /// Acquires a resource, preferring the one identified by `res_id`.
    ///
    /// The lookup order is:
    ///
    /// 1. If `res_id` is already in use under the same `idempotent_key`,
    ///    the same handle is returned. Callers retry across their own
    ///    faults, so a duplicated request must be idempotent on
    ///    `(res_id, idempotent_key)`.
    /// 2. If anything is idle, the requested entry is taken if present,
    ///    the earliest-deadline entry otherwise. A reclamation deadline
    ///    still in the future does not keep an entry from being handed
    ///    out here; the deadline gates disposal and deadline ordering,
    ///    not reuse.
    /// 3. If capacity is reached, fails with
    ///    [`PoolError::NoAvailableResource`].
    /// 4. Otherwise a creation token is awaited and the factory mints a
    ///    fresh resource. Cancellation is honored only while waiting for
    ///    the token; once the factory is called the call runs to
    ///    completion.
    pub async fn acquire(
        &self,
        cancel: &CancellationToken,
        res_id: &str,
        idempotent_key: &str,
    ) -> Result<M::Resource> {
        {
            let mut state = self.inner.state.lock();

            if !res_id.is_empty() {
                if let Some(item) = state.inuse.get(res_id) {
                    if item.idempotent_key == idempotent_key {
                        return Ok(item.res.clone());
                    }
                }
            }

            if let Some(item) = state.take_idle(res_id) {
                let res = item.res;
                state.add_inuse(res.clone(), idempotent_key);
                drop(state);
                tracing::info!(
                    expect = res_id,
                    got = res.resource_id(),
                    "acquire served from idle"
                );
                self.inner.notify.notify_one();
                return Ok(res);
            }

            let size = state.size();
            if size >= self.inner.config.capacity {
                drop(state);
                tracing::info!(
                    expect = res_id,
                    size,
                    capacity = self.inner.config.capacity,
                    "acquire rejected, capacity reached and nothing idle"
                );
                return Err(PoolError::NoAvailableResource);
            }
        }

        let permit = tokio::select! {
            permit = self.inner.tokens.acquire() => match permit {
                Ok(permit) => permit,
                // The semaphore only closes on shutdown.
                Err(_) => return Err(PoolError::Cancelled),
            },
            () = cancel.cancelled() => {
                tracing::info!(expect = res_id, "acquire cancelled while waiting for budget");
                return Err(PoolError::Cancelled);
            }
        };
        permit.forget();

        // The token is spent once the resource lands in `inuse`; until then
        // any exit must hand it back.
        let token_guard = scopeguard::guard(&self.inner.tokens, |tokens| {
            tokens.add_permits(1);
        });

        let mut outcome = self.inner.factory.create(1).await;
        if outcome.error.is_some() || outcome.resources.is_empty() {
            let error = outcome
                .error
                .unwrap_or_else(|| "factory returned no resources".into());
            return Err(PoolError::Create(error));
        }
        let res = outcome.resources.swap_remove(0);
        scopeguard::ScopeGuard::into_inner(token_guard);

        tracing::info!(
            expect = res_id,
            got = res.resource_id(),
            "acquire created new resource"
        );
        let mut state = self.inner.state.lock();
        state.add_inuse(res.clone(), idempotent_key);
        drop(state);
        Ok(res)
    }

    /// Acquires any resource. Equivalent to [`Pool::acquire`] with an
    /// empty `res_id`.
    pub async fn acquire_any(
        &self,
        cancel: &CancellationToken,
        idempotent_key: &str,
    ) -> Result<M::Resource> {
        self.acquire(cancel, "", idempotent_key).await
    }

    /// Releases an in-use resource back to idle, immediately reclaimable.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidState`] if `res_id` is not in use.
    pub fn release(&self, res_id: &str) -> Result<()> {
        self.release_with_reverse(res_id, Duration::ZERO)
    }

    /// Releases an in-use resource back to idle, holding it for `reverse`.
    ///
    /// Until the deadline passes the entry is not disposed by the
    /// maintainer and sorts after sooner-reclaimable entries, so an
    /// any-ID acquire prefers other idle resources while a specific-ID
    /// acquire can still take it back immediately.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidState`] if `res_id` is not in use.
    pub fn release_with_reverse(&self, res_id: &str, reverse: Duration) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            let Some(item) = state.inuse.remove(res_id) else {
                tracing::info!(res_id, "release of resource that is not in use");
                return Err(PoolError::InvalidState(res_id.to_string()));
            };
            state.idle.push(IdleItem {
                res: item.res,
                reclaim_at: Instant::now() + reverse,
            });
        }
        tracing::info!(res_id, reverse_ms = reverse.as_millis() as u64, "released resource");
        self.inner.notify.notify_one();
        Ok(())
    }

    /// Succeeds if the resource is known to the pool, idle or in use.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::NotFound`] otherwise.
    pub fn stat(&self, res_id: &str) -> Result<()> {
        let state = self.inner.state.lock();
        if state.inuse.contains_key(res_id) || state.idle.find(res_id).is_some() {
            Ok(())
        } else {
            Err(PoolError::NotFound(res_id.to_string()))
        }
    }

    /// Returns the current status of the pool.
    ///
    /// The three counters are sampled without a common critical section
    /// with in-flight factory calls, so under load they are an overall
    /// insight rather than an exact snapshot.
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        let (idle, inuse) = (state.idle.len(), state.inuse.len());
        drop(state);

        PoolStatus {
            idle,
            inuse,
            tokens: self.inner.tokens.available_permits(),
        }
    }

    /// Stops the background maintainer and fails acquires that are
    /// waiting for creation budget.
    ///
    /// Idle resources are left to the surrounding system to deprovision;
    /// the pool does not drain them.
    pub fn shutdown(&self) {
        tracing::info!("pool shutting down");
        self.inner.shutdown.cancel();
        self.inner.tokens.close();
    }
}

impl<M: ManageResource> PoolInner<M> {
    /// Drains overfull idle entries whose reclamation deadline has passed,
    /// one factory call at a time. A failed dispose puts the entry back
    /// and backs off before the next attempt.
    async fn check_idle(&self) {
        loop {
            let item = {
                let mut state = self.state.lock();
                if !state.too_many_idle(&self.config) {
                    return;
                }
                let due = state
                    .idle
                    .peek()
                    .is_some_and(|item| item.reclaim_at <= Instant::now());
                if !due {
                    return;
                }
                state.idle.pop()
            };
            let Some(item) = item else { return };

            let res_id = item.res.resource_id().to_string();
            tracing::info!(res_id = %res_id, "disposing surplus idle resource");
            match self.factory.dispose(&item.res).await {
                Ok(()) => {
                    self.tokens.add_permits(1);
                    *self.backoff.lock() = self.config.initial_backoff;
                }
                Err(error) => {
                    tracing::warn!(
                        res_id = %res_id,
                        error = %error,
                        "dispose failed, returning resource to idle"
                    );
                    {
                        let mut state = self.state.lock();
                        state.add_idle(item.res);
                    }
                    let delay = self.bump_backoff();
                    if !self.backoff_pause(delay).await {
                        return;
                    }
                }
            }
        }
    }

    /// Replenishes idle toward `min_idle` with whatever creation budget is
    /// immediately available. The drain is non-blocking so that foreground
    /// acquires waiting on the budget are never starved by maintenance.
    async fn check_insufficient(&self) {
        let addition = {
            let state = self.state.lock();
            let want = self.config.min_idle as isize - state.idle.len() as isize;
            let room = self.config.capacity as isize - state.size() as isize;
            want.min(room)
        };
        if addition <= 0 {
            return;
        }

        let mut acquired = 0usize;
        for _ in 0..addition {
            match self.tokens.try_acquire() {
                Ok(permit) => {
                    permit.forget();
                    acquired += 1;
                }
                Err(_) => break,
            }
        }
        tracing::debug!(tokens = acquired, "maintainer drained creation budget");
        if acquired == 0 {
            return;
        }

        let outcome = self.factory.create(acquired).await;
        if let Some(error) = &outcome.error {
            tracing::error!(error = %error, "failed to replenish idle resources");
        }
        if outcome.resources.len() == acquired {
            *self.backoff.lock() = self.config.initial_backoff;
        }

        let mut leftover = acquired;
        {
            let mut state = self.state.lock();
            for res in outcome.resources {
                tracing::info!(res_id = res.resource_id(), "adding resource to idle");
                state.add_idle(res);
                leftover -= 1;
            }
        }
        if leftover != 0 {
            self.tokens.add_permits(leftover);
            // Retry the shortfall on the next wake rather than waiting a
            // full tick.
            self.notify.notify_one();
        }

        if outcome.error.is_some() {
            let delay = self.bump_backoff();
            self.backoff_pause(delay).await;
        }
    }

    fn bump_backoff(&self) -> Duration {
        let mut backoff = self.backoff.lock();
        *backoff = (*backoff * 2).min(self.config.max_backoff);
        *backoff
    }

    /// Sleeps for `delay`, returning `false` if shutdown fired first.
    async fn backoff_pause(&self, delay: Duration) -> bool {
        tokio::select! {
            () = tokio::time::sleep(delay) => true,
            () = self.shutdown.cancelled() => false,
        }
    }
}

/// The maintainer loop. Holds only a weak reference to the pool so that
/// dropping the last `Pool` clone stops maintenance; the ticker bounds the
/// latency of any wake-up lost to coalescing.
async fn maintain<M: ManageResource>(
    pool: Weak<PoolInner<M>>,
    notify: Arc<Notify>,
    shutdown: CancellationToken,
    period: Duration,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // The first tick fires immediately, which doubles as the startup pass.
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            () = notify.notified() => {}
            () = shutdown.cancelled() => return,
        }

        let Some(pool) = pool.upgrade() else { return };
        pool.check_idle().await;
        pool.check_insufficient().await;
    }
}
