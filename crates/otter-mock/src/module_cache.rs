//! Module cache with single-flight evaluation
//!
//! Each cache key has at most one evaluation in flight. Concurrent requests
//! for the same key share one [`Shared`] future. Requests record which
//! evaluation they are waiting from, so a request that would wait on an
//! evaluation that is (transitively) waiting on the requester gets the
//! partially filled namespace instead of deadlocking, like a circular ESM
//! import.
//!
//! Completion bookkeeping runs inside the shared future itself: whoever
//! polls it to the end also records the result, and an evaluation that was
//! invalidated meanwhile has its result dropped.

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared, join_all};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::MockResult;
use crate::resolver::ModuleId;
use crate::value::ModuleNamespace;

/// Real and substituted namespaces of the same module live side by side.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Actual(ModuleId),
    Mocked(ModuleId),
}

impl CacheKey {
    pub fn id(&self) -> &ModuleId {
        match self {
            Self::Actual(id) | Self::Mocked(id) => id,
        }
    }
}

/// Observable state of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Evaluating,
    Evaluated,
}

pub type EvalFuture = BoxFuture<'static, MockResult<ModuleNamespace>>;
type SharedEval = Shared<EvalFuture>;

enum Slot {
    Evaluating {
        generation: u64,
        namespace: ModuleNamespace,
        future: SharedEval,
    },
    Evaluated {
        namespace: ModuleNamespace,
    },
}

#[derive(Default)]
struct CacheInner {
    slots: HashMap<CacheKey, Slot>,
    /// waiter -> keys it is waiting on, with a count per key
    waiting: HashMap<CacheKey, HashMap<CacheKey, usize>>,
    /// In-flight evaluations dropped by invalidation, still to be settled
    detached: Vec<SharedEval>,
    next_generation: u64,
}

impl CacheInner {
    /// Whether `from` waits, directly or through other evaluations, on `target`.
    fn waits_on(&self, from: &CacheKey, target: &CacheKey) -> bool {
        let mut stack = vec![from];
        let mut seen = std::collections::HashSet::new();
        while let Some(key) = stack.pop() {
            if !seen.insert(key) {
                continue;
            }
            if let Some(deps) = self.waiting.get(key) {
                for dep in deps.keys() {
                    if dep == target {
                        return true;
                    }
                    stack.push(dep);
                }
            }
        }
        false
    }

    fn add_wait(&mut self, waiter: &CacheKey, key: &CacheKey) {
        *self
            .waiting
            .entry(waiter.clone())
            .or_default()
            .entry(key.clone())
            .or_insert(0) += 1;
    }

    fn remove_wait(&mut self, waiter: &CacheKey, key: &CacheKey) {
        let Some(deps) = self.waiting.get_mut(waiter) else {
            return;
        };
        if let Some(count) = deps.get_mut(key) {
            *count -= 1;
            if *count == 0 {
                deps.remove(key);
            }
        }
        if deps.is_empty() {
            self.waiting.remove(waiter);
        }
    }

    /// Forget detached evaluations that already finished.
    fn prune_detached(&mut self) {
        self.detached.retain(|future| future.peek().is_none());
    }

    fn evict(&mut self, key: &CacheKey) -> bool {
        self.prune_detached();
        match self.slots.remove(key) {
            Some(Slot::Evaluating { future, .. }) => {
                self.detached.push(future);
                true
            }
            Some(Slot::Evaluated { .. }) => true,
            None => false,
        }
    }
}

/// A recorded wait of `waiter` on `key`. Removed when the request finishes
/// or is dropped mid-wait.
struct WaitEdge {
    inner: Arc<Mutex<CacheInner>>,
    waiter: CacheKey,
    key: CacheKey,
}

impl Drop for WaitEdge {
    fn drop(&mut self) {
        self.inner.lock().remove_wait(&self.waiter, &self.key);
    }
}

/// Per-context module cache. Cloning yields another handle to the same cache.
#[derive(Clone, Default)]
pub struct ModuleCache {
    inner: Arc<Mutex<CacheInner>>,
}

enum Lookup {
    Ready(ModuleNamespace),
    Wait(SharedEval, Option<WaitEdge>),
    Missing,
}

impl ModuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached namespace for `key`, join its in-flight evaluation,
    /// or start one with `evaluate`.
    ///
    /// `waiter` is the evaluation making the request, if any. `evaluate`
    /// receives the namespace that cyclic importers see while it runs.
    pub async fn get_or_evaluate<F>(
        &self,
        key: CacheKey,
        waiter: Option<&CacheKey>,
        evaluate: F,
    ) -> MockResult<ModuleNamespace>
    where
        F: FnOnce(ModuleNamespace) -> EvalFuture,
    {
        let (future, _edge) = match self.lookup(&key, waiter) {
            Lookup::Ready(namespace) => return Ok(namespace),
            Lookup::Wait(future, edge) => (future, edge),
            Lookup::Missing => {
                let namespace = ModuleNamespace::new();
                let work = evaluate(namespace.clone());
                self.start(&key, waiter, namespace, work)?
            }
        };

        future.await
    }

    /// Record that `waiter` waits on `key`; the lock must be held by the caller.
    fn add_edge(&self, inner: &mut CacheInner, waiter: &CacheKey, key: &CacheKey) -> WaitEdge {
        inner.add_wait(waiter, key);
        WaitEdge {
            inner: self.inner.clone(),
            waiter: waiter.clone(),
            key: key.clone(),
        }
    }

    fn lookup(&self, key: &CacheKey, waiter: Option<&CacheKey>) -> Lookup {
        let mut inner = self.inner.lock();
        let found = match inner.slots.get(key) {
            Some(Slot::Evaluated { namespace }) => return Lookup::Ready(namespace.clone()),
            Some(Slot::Evaluating {
                namespace, future, ..
            }) => Some((namespace.clone(), future.clone())),
            None => None,
        };

        let Some((namespace, future)) = found else {
            return Lookup::Missing;
        };
        if let Some(waiter) = waiter {
            if waiter == key || inner.waits_on(key, waiter) {
                tracing::trace!("Cyclic request for {:?}, returning partial namespace", key);
                return Lookup::Ready(namespace);
            }
            let edge = self.add_edge(&mut inner, waiter, key);
            return Lookup::Wait(future, Some(edge));
        }
        Lookup::Wait(future, None)
    }

    /// Register a new evaluation. Another task may have started one since
    /// the lookup; in that case `work` is dropped unpolled and theirs is
    /// joined.
    fn start(
        &self,
        key: &CacheKey,
        waiter: Option<&CacheKey>,
        namespace: ModuleNamespace,
        work: EvalFuture,
    ) -> MockResult<(SharedEval, Option<WaitEdge>)> {
        let mut inner = self.inner.lock();
        if inner.slots.contains_key(key) {
            drop(inner);
            return match self.lookup(key, waiter) {
                Lookup::Wait(future, edge) => Ok((future, edge)),
                Lookup::Ready(namespace) => {
                    Ok((async move { Ok(namespace) }.boxed().shared(), None))
                }
                Lookup::Missing => Err(crate::error::MockError::internal(format!(
                    "cache slot for {:?} vanished",
                    key
                ))),
            };
        }

        inner.prune_detached();
        let generation = inner.next_generation;
        inner.next_generation += 1;

        let cache = self.clone();
        let slot_key = key.clone();
        let future = async move {
            let result = work.await;
            cache.complete(&slot_key, generation, &result);
            result
        }
        .boxed()
        .shared();

        tracing::trace!("Evaluating {:?} (generation {})", key, generation);
        inner.slots.insert(
            key.clone(),
            Slot::Evaluating {
                generation,
                namespace,
                future: future.clone(),
            },
        );
        let edge = waiter.map(|waiter| self.add_edge(&mut inner, waiter, key));
        Ok((future, edge))
    }

    fn complete(&self, key: &CacheKey, generation: u64, result: &MockResult<ModuleNamespace>) {
        let mut inner = self.inner.lock();
        let current = matches!(
            inner.slots.get(key),
            Some(Slot::Evaluating { generation: g, .. }) if *g == generation
        );
        if !current {
            tracing::trace!("Discarding result of invalidated evaluation {:?}", key);
            return;
        }

        match result {
            Ok(namespace) => {
                inner.slots.insert(
                    key.clone(),
                    Slot::Evaluated {
                        namespace: namespace.clone(),
                    },
                );
            }
            Err(err) => {
                tracing::debug!("Evaluation of {:?} failed: {}", key, err);
                inner.slots.remove(key);
            }
        }
    }

    /// Drop the entry for `key`. An in-flight evaluation keeps running and
    /// its result is discarded. Returns whether anything was removed.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.inner.lock().evict(key)
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        let keys: Vec<CacheKey> = inner.slots.keys().cloned().collect();
        for key in keys {
            inner.evict(&key);
        }
    }

    pub fn state(&self, key: &CacheKey) -> Option<CacheState> {
        match self.inner.lock().slots.get(key)? {
            Slot::Evaluating { .. } => Some(CacheState::Evaluating),
            Slot::Evaluated { .. } => Some(CacheState::Evaluated),
        }
    }

    /// Namespace of a finished evaluation
    pub fn get(&self, key: &CacheKey) -> Option<ModuleNamespace> {
        match self.inner.lock().slots.get(key)? {
            Slot::Evaluated { namespace } => Some(namespace.clone()),
            Slot::Evaluating { .. } => None,
        }
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.inner.lock().slots.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().slots.is_empty()
    }

    pub fn in_flight(&self) -> usize {
        self.inner
            .lock()
            .slots
            .values()
            .filter(|slot| matches!(slot, Slot::Evaluating { .. }))
            .count()
    }

    /// Await every in-flight evaluation, repeating until none are left,
    /// since finishing one evaluation can start new ones. Returns the
    /// number of rounds.
    pub async fn settle(&self) -> usize {
        let mut rounds = 0;
        loop {
            let pending: Vec<SharedEval> = {
                let mut inner = self.inner.lock();
                let mut pending: Vec<SharedEval> = inner
                    .slots
                    .values()
                    .filter_map(|slot| match slot {
                        Slot::Evaluating { future, .. } => Some(future.clone()),
                        Slot::Evaluated { .. } => None,
                    })
                    .collect();
                pending.append(&mut inner.detached);
                pending
            };

            if pending.is_empty() {
                return rounds;
            }
            rounds += 1;
            tracing::trace!("Settle round {}: {} evaluations", rounds, pending.len());
            join_all(pending).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MockError;
    use crate::value::ExportValue;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn key(id: &str) -> CacheKey {
        CacheKey::Actual(ModuleId::new(id))
    }

    fn ready(value: i32) -> impl FnOnce(ModuleNamespace) -> EvalFuture {
        move |ns| {
            async move {
                ns.set("value", ExportValue::from(value));
                Ok(ns)
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_result_is_cached() {
        let cache = ModuleCache::new();
        let first = cache.get_or_evaluate(key("a"), None, ready(1)).await.unwrap();
        let second = cache.get_or_evaluate(key("a"), None, ready(2)).await.unwrap();
        assert!(first.ptr_eq(&second));
        assert_eq!(second.get("value"), Some(ExportValue::from(1)));
        assert_eq!(cache.state(&key("a")), Some(CacheState::Evaluated));
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_evaluation() {
        let cache = ModuleCache::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let slow = |runs: Arc<AtomicUsize>| {
            move |ns: ModuleNamespace| {
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(ns)
                }
                .boxed()
            }
        };

        let (a, b) = tokio::join!(
            cache.get_or_evaluate(key("m"), None, slow(runs.clone())),
            cache.get_or_evaluate(key("m"), None, slow(runs.clone())),
        );
        assert!(a.unwrap().ptr_eq(&b.unwrap()));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let cache = ModuleCache::new();
        let err = cache
            .get_or_evaluate(key("bad"), None, |_| {
                async { Err(MockError::evaluation("bad", "boom")) }.boxed()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, MockError::Evaluation { .. }));
        assert_eq!(cache.state(&key("bad")), None);

        let ok = cache.get_or_evaluate(key("bad"), None, ready(3)).await.unwrap();
        assert_eq!(ok.get("value"), Some(ExportValue::from(3)));
    }

    #[tokio::test]
    async fn test_self_request_gets_partial_namespace() {
        let cache = ModuleCache::new();
        let inner_cache = cache.clone();
        let ns = cache
            .get_or_evaluate(key("self"), None, move |ns| {
                async move {
                    ns.set("early", ExportValue::from(1));
                    let partial = inner_cache
                        .get_or_evaluate(key("self"), Some(&key("self")), ready(9))
                        .await?;
                    assert!(partial.ptr_eq(&ns));
                    assert!(partial.has("early"));
                    Ok::<_, MockError>(ns)
                }
                .boxed()
            })
            .await
            .unwrap();
        assert!(ns.has("early"));
    }

    #[tokio::test]
    async fn test_transitive_cycle_does_not_deadlock() {
        let cache = ModuleCache::new();
        let c1 = cache.clone();
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            cache.get_or_evaluate(key("a"), None, move |ns_a| {
                async move {
                    let c2 = c1.clone();
                    // a -> b -> a
                    c1.get_or_evaluate(key("b"), Some(&key("a")), move |ns_b| {
                        async move {
                            let a = c2
                                .get_or_evaluate(key("a"), Some(&key("b")), ready(0))
                                .await?;
                            ns_b.set("sawA", ExportValue::from(a.has("started")));
                            Ok::<_, MockError>(ns_b)
                        }
                        .boxed()
                    })
                    .await?;
                    ns_a.set("started", ExportValue::from(true));
                    Ok::<_, MockError>(ns_a)
                }
                .boxed()
            }),
        )
        .await;
        let ns = result.expect("cycle deadlocked").unwrap();
        assert!(ns.has("started"));
        let b = cache.get(&key("b")).unwrap();
        assert_eq!(b.get("sawA"), Some(ExportValue::from(false)));
    }

    #[tokio::test]
    async fn test_invalidated_result_is_discarded() {
        let cache = ModuleCache::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let pending = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_evaluate(key("m"), None, move |ns| {
                        async move {
                            let _ = rx.await;
                            Ok(ns)
                        }
                        .boxed()
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        while cache.state(&key("m")).is_none() {
            tokio::task::yield_now().await;
        }

        assert!(cache.invalidate(&key("m")));
        tx.send(()).unwrap();
        // the waiter still gets its result
        assert!(pending.await.unwrap().is_ok());
        assert_eq!(cache.state(&key("m")), None);
    }

    fn gated(rx: tokio::sync::oneshot::Receiver<()>) -> impl FnOnce(ModuleNamespace) -> EvalFuture {
        move |ns| {
            async move {
                let _ = rx.await;
                ns.set("done", ExportValue::from(true));
                Ok(ns)
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_abandoned_wait_leaves_no_edge() {
        let cache = ModuleCache::new();
        let (release_b, b_gate) = tokio::sync::oneshot::channel::<()>();
        let b = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_or_evaluate(key("b"), None, gated(b_gate)).await })
        };
        while cache.state(&key("b")).is_none() {
            tokio::task::yield_now().await;
        }

        // `a` waits on `b`, then gives up
        let gave_up = tokio::time::timeout(
            Duration::from_millis(10),
            cache.get_or_evaluate(key("b"), Some(&key("a")), ready(0)),
        )
        .await;
        assert!(gave_up.is_err());
        assert!(cache.inner.lock().waiting.is_empty());

        // `b` asking for an in-flight `a` must now wait instead of seeing a cycle
        let (release_a, a_gate) = tokio::sync::oneshot::channel::<()>();
        let a = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_or_evaluate(key("a"), None, gated(a_gate)).await })
        };
        while cache.state(&key("a")).is_none() {
            tokio::task::yield_now().await;
        }
        let from_b = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_or_evaluate(key("a"), Some(&key("b")), ready(0)).await })
        };
        while !cache.inner.lock().waiting.contains_key(&key("b")) {
            tokio::task::yield_now().await;
        }
        release_a.send(()).unwrap();
        let seen = from_b.await.unwrap().unwrap();
        assert_eq!(seen.get("done"), Some(ExportValue::from(true)));

        release_b.send(()).unwrap();
        assert!(a.await.unwrap().is_ok());
        assert!(b.await.unwrap().is_ok());
        assert!(cache.inner.lock().waiting.is_empty());
    }

    #[tokio::test]
    async fn test_finished_detached_evaluations_are_dropped() {
        let cache = ModuleCache::new();
        let (release, gate) = tokio::sync::oneshot::channel::<()>();
        let pending = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_or_evaluate(key("m"), None, gated(gate)).await })
        };
        while cache.state(&key("m")).is_none() {
            tokio::task::yield_now().await;
        }

        assert!(cache.invalidate(&key("m")));
        assert_eq!(cache.inner.lock().detached.len(), 1);
        release.send(()).unwrap();
        assert!(pending.await.unwrap().is_ok());

        // without settling, finished ones are forgotten by later cache work
        cache.get_or_evaluate(key("n"), None, ready(1)).await.unwrap();
        assert!(cache.invalidate(&key("n")));
        assert!(cache.inner.lock().detached.is_empty());
    }

    #[tokio::test]
    async fn test_settle_reaches_fixed_point() {
        let cache = ModuleCache::new();
        let spawner = cache.clone();

        // evaluation of `a` kicks off `b` without awaiting it
        let a = cache.get_or_evaluate(key("a"), None, move |ns| {
            async move {
                let background = spawner.clone();
                tokio::spawn(async move {
                    background
                        .get_or_evaluate(key("b"), None, |ns| {
                            async move {
                                tokio::time::sleep(Duration::from_millis(10)).await;
                                Ok(ns)
                            }
                            .boxed()
                        })
                        .await
                });
                tokio::task::yield_now().await;
                Ok(ns)
            }
            .boxed()
        });
        a.await.unwrap();

        while !cache.contains(&key("b")) {
            tokio::task::yield_now().await;
        }
        let rounds = cache.settle().await;
        assert!(rounds >= 1);
        assert_eq!(cache.in_flight(), 0);
        assert_eq!(cache.state(&key("b")), Some(CacheState::Evaluated));
    }

    #[tokio::test]
    async fn test_clear_drops_everything() {
        let cache = ModuleCache::new();
        cache.get_or_evaluate(key("a"), None, ready(1)).await.unwrap();
        cache
            .get_or_evaluate(CacheKey::Mocked(ModuleId::new("a")), None, ready(2))
            .await
            .unwrap();
        assert_eq!(cache.len(), 2);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.settle().await, 0);
    }
}
