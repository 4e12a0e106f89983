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

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use enipool::BoxError;
use enipool::CreateOutcome;
use enipool::ManageResource;
use enipool::Pool;
use enipool::PoolConfig;
use enipool::PoolError;
use enipool::ResourceHandle;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Debug, PartialEq, Eq)]
struct Res {
    id: String,
}

impl ResourceHandle for Res {
    fn resource_id(&self) -> &str {
        &self.id
    }
}

/// A factory whose create takes a long time, so the creation budget stays
/// consumed while another caller waits for it.
struct SlowCreateFactory {
    created: AtomicUsize,
    create_calls: AtomicUsize,
    delay: Duration,
}

impl SlowCreateFactory {
    fn new(delay: Duration) -> Self {
        Self {
            created: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
            delay,
        }
    }
}

impl ManageResource for SlowCreateFactory {
    type Resource = Res;

    async fn create(&self, count: usize) -> CreateOutcome<Res> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let resources = (0..count)
            .map(|_| Res {
                id: format!("r{}", self.created.fetch_add(1, Ordering::SeqCst) + 1),
            })
            .collect();
        CreateOutcome::complete(resources)
    }

    async fn dispose(&self, _res: &Res) -> Result<(), BoxError> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn cancelled_budget_wait_fails_without_leaking() {
    let factory = Arc::new(SlowCreateFactory::new(Duration::from_secs(3600)));
    let pool = Pool::new(PoolConfig::new(1), factory.clone()).unwrap();

    // The first caller takes the only token and parks inside the factory.
    let first = tokio::spawn({
        let pool = pool.clone();
        async move {
            let cancel = CancellationToken::new();
            pool.acquire_any(&cancel, "k1").await
        }
    });
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(factory.create_calls.load(Ordering::SeqCst), 1);

    // The second caller has room (nothing is in use yet) but no budget.
    let cancel = CancellationToken::new();
    let second = tokio::spawn({
        let pool = pool.clone();
        let cancel = cancel.clone();
        async move { pool.acquire_any(&cancel, "k2").await }
    });
    tokio::time::sleep(Duration::from_millis(1)).await;

    cancel.cancel();
    let err = second.await.unwrap().unwrap_err();
    assert!(
        matches!(err, PoolError::Cancelled),
        "expected Cancelled, got {err:?}"
    );
    assert_eq!(
        factory.create_calls.load(Ordering::SeqCst),
        1,
        "the cancelled caller must not reach the factory"
    );

    // The first caller is unaffected and accounting stays intact.
    let res = first.await.unwrap().unwrap();
    assert!(pool.stat(res.resource_id()).is_ok());
    let status = pool.status();
    assert_eq!(status.inuse, 1);
    assert_eq!(status.tokens, 0, "no token may leak from the cancellation");
}

#[tokio::test(start_paused = true)]
async fn shutdown_fails_callers_waiting_for_budget() {
    let factory = Arc::new(SlowCreateFactory::new(Duration::from_secs(3600)));
    let pool = Pool::new(PoolConfig::new(1), factory.clone()).unwrap();

    let first = tokio::spawn({
        let pool = pool.clone();
        async move {
            let cancel = CancellationToken::new();
            pool.acquire_any(&cancel, "k1").await
        }
    });
    tokio::time::sleep(Duration::from_millis(1)).await;

    let second = tokio::spawn({
        let pool = pool.clone();
        async move {
            let cancel = CancellationToken::new();
            pool.acquire_any(&cancel, "k2").await
        }
    });
    tokio::time::sleep(Duration::from_millis(1)).await;

    pool.shutdown();
    let err = second.await.unwrap().unwrap_err();
    assert!(
        matches!(err, PoolError::Cancelled),
        "expected Cancelled, got {err:?}"
    );

    // The in-flight creation still lands.
    let res = first.await.unwrap().unwrap();
    assert_eq!(pool.status().inuse, 1);
    assert!(pool.stat(res.resource_id()).is_ok());
}

#[tokio::test(start_paused = true)]
async fn cancellation_after_the_factory_starts_is_ignored() {
    let factory = Arc::new(SlowCreateFactory::new(Duration::from_secs(60)));
    let pool = Pool::new(PoolConfig::new(1), factory.clone()).unwrap();

    let cancel = CancellationToken::new();
    let caller = tokio::spawn({
        let pool = pool.clone();
        let cancel = cancel.clone();
        async move { pool.acquire_any(&cancel, "k1").await }
    });
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(factory.create_calls.load(Ordering::SeqCst), 1);

    // Too late: the token is spent and the factory is already running.
    cancel.cancel();

    let res = caller.await.unwrap().unwrap();
    assert!(pool.stat(res.resource_id()).is_ok());
    assert_eq!(pool.status().inuse, 1);
}
