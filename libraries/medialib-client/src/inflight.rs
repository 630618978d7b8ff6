//! Single-flight coordination of identical requests.

use crate::error::{ApiError, Result};
use crate::request::RequestIdentity;
use crate::response::RawResponse;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// A shared handle onto one running execution.
///
/// Every clone resolves to the same result. Dropping a clone detaches that
/// caller only; the execution keeps running for the others.
pub type SharedExecution<T> = Shared<BoxFuture<'static, Result<T>>>;

struct Slot<T: Clone> {
    generation: u64,
    execution: SharedExecution<T>,
}

struct Slots<T: Clone> {
    next_generation: u64,
    by_identity: HashMap<RequestIdentity, Slot<T>>,
}

/// Maps a request identity to its one outstanding execution.
///
/// Entries only live while their execution runs: the slot is removed as the
/// execution finishes, before any joined caller observes the result, so the
/// registry never acts as a cache.
pub struct InFlightRegistry<T: Clone = RawResponse> {
    slots: Mutex<Slots<T>>,
}

impl<T> InFlightRegistry<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Slots {
                next_generation: 0,
                by_identity: HashMap::new(),
            }),
        }
    }

    /// Join the execution for `identity`, starting it with `producer` if none is running.
    ///
    /// The lookup and the registration happen under one lock, so two callers
    /// can never both start an execution for the same identity. The execution
    /// is spawned onto the tokio runtime after that lock is released, so it
    /// outlives any individual caller. Without a runtime the execution
    /// resolves to [`ApiError::Aborted`].
    pub fn join<F, Fut>(self: &Arc<Self>, identity: RequestIdentity, producer: F) -> SharedExecution<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();

        let (generation, execution) = {
            let mut slots = self.slots();

            if let Some(slot) = slots.by_identity.get(&identity) {
                debug!(identity = %identity, "Joining in-flight request");
                return slot.execution.clone();
            }

            let generation = slots.next_generation;
            slots.next_generation = slots.next_generation.wrapping_add(1);

            let execution = async move {
                receiver.await.unwrap_or_else(|_| {
                    Err(ApiError::Aborted(
                        "request execution ended without a result".into(),
                    ))
                })
            }
            .boxed()
            .shared();

            slots.by_identity.insert(
                identity.clone(),
                Slot {
                    generation,
                    execution: execution.clone(),
                },
            );
            (generation, execution)
        };

        // From here on, dropping the guard is what unregisters the slot
        let guard = SlotGuard {
            registry: Arc::clone(self),
            identity,
            generation,
            sender: Some(sender),
        };

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!(identity = %guard.identity, error = %e, "No runtime to execute request on");
                drop(guard);
                return execution;
            }
        };

        debug!(identity = %guard.identity, "Starting request execution");
        let work = producer();
        runtime.spawn(async move {
            let result = work.await;
            guard.complete(result);
        });

        execution
    }

    /// Number of executions currently running.
    pub fn len(&self) -> usize {
        self.slots().by_identity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, identity: &RequestIdentity) -> bool {
        self.slots().by_identity.contains_key(identity)
    }

    fn slots(&self) -> MutexGuard<'_, Slots<T>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Default for InFlightRegistry<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Removes a slot when its execution ends, including by panic or abort.
///
/// The slot is always removed before the result reaches any waiter. A guard
/// dropped without completing closes the channel, which waiters see as
/// [`ApiError::Aborted`].
struct SlotGuard<T: Clone + Send + Sync + 'static> {
    registry: Arc<InFlightRegistry<T>>,
    identity: RequestIdentity,
    generation: u64,
    sender: Option<oneshot::Sender<Result<T>>>,
}

impl<T: Clone + Send + Sync + 'static> SlotGuard<T> {
    fn complete(mut self, result: Result<T>) {
        self.release();
        if let Some(sender) = self.sender.take() {
            // Every caller may have gone away
            let _ = sender.send(result);
        }
    }

    fn release(&self) {
        let mut slots = self.registry.slots();
        let current = slots
            .by_identity
            .get(&self.identity)
            .map(|slot| slot.generation);

        if current == Some(self.generation) {
            slots.by_identity.remove(&self.identity);
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Drop for SlotGuard<T> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestDescriptor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn identity(path: &str) -> RequestIdentity {
        RequestDescriptor::get(path).identity()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_joins_share_one_execution() {
        let registry: Arc<InFlightRegistry<String>> = Arc::new(InFlightRegistry::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let mut release_rx = Some(release_rx);

        let mut executions = Vec::new();
        for _ in 0..8 {
            let calls = Arc::clone(&calls);
            let gate = release_rx.take();
            executions.push(registry.join(identity("status"), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if let Some(gate) = gate {
                    let _ = gate.await;
                }
                Ok("done".to_string())
            }));
        }

        assert_eq!(registry.len(), 1);
        release_tx.send(()).unwrap();

        let results = futures_util::future::join_all(executions).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for result in results {
            assert_eq!(result.unwrap(), "done");
        }
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_distinct_identities_run_separately() {
        let registry: Arc<InFlightRegistry<u32>> = Arc::new(InFlightRegistry::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut executions = Vec::new();
        for (i, path) in ["a", "b", "c"].iter().enumerate() {
            let calls = Arc::clone(&calls);
            executions.push(registry.join(identity(path), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(i as u32)
            }));
        }

        assert_eq!(registry.len(), 3);
        let results = futures_util::future::join_all(executions).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            results.into_iter().map(|r| r.unwrap()).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[tokio::test]
    async fn test_errors_are_shared() {
        let registry: Arc<InFlightRegistry<String>> = Arc::new(InFlightRegistry::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let make = |calls: Arc<AtomicUsize>| {
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Err(ApiError::Http {
                    status: 500,
                    body: "boom".into(),
                })
            }
        };

        let first = registry.join(identity("broken"), make(Arc::clone(&calls)));
        let second = registry.join(identity("broken"), make(Arc::clone(&calls)));

        let (a, b) = tokio::join!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.unwrap_err().status(), Some(500));
        assert_eq!(b.unwrap_err().status(), Some(500));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_completed_execution_is_not_reused() {
        let registry: Arc<InFlightRegistry<usize>> = Arc::new(InFlightRegistry::new());
        let calls = Arc::new(AtomicUsize::new(0));

        for expected in 1..=3 {
            let calls = Arc::clone(&calls);
            let result = registry
                .join(identity("status"), move || async move {
                    Ok(calls.fetch_add(1, Ordering::SeqCst) + 1)
                })
                .await;
            assert_eq!(result.unwrap(), expected);
            assert!(registry.is_empty());
        }
    }

    #[tokio::test]
    async fn test_dropping_one_caller_keeps_execution_alive() {
        let registry: Arc<InFlightRegistry<String>> = Arc::new(InFlightRegistry::new());
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let first = registry.join(identity("slow"), move || async move {
            let _ = release_rx.await;
            Ok("finished".to_string())
        });
        let second = registry.join(identity("slow"), || async { Ok("not started".to_string()) });

        // The first caller gives up waiting
        let timed_out = tokio::time::timeout(Duration::from_millis(10), first).await;
        assert!(timed_out.is_err());
        assert!(registry.contains(&identity("slow")));

        release_tx.send(()).unwrap();
        assert_eq!(second.await.unwrap(), "finished");
    }

    #[tokio::test]
    async fn test_execution_continues_with_no_callers() {
        let registry: Arc<InFlightRegistry<()>> = Arc::new(InFlightRegistry::new());
        let (done_tx, done_rx) = oneshot::channel::<()>();

        let execution = registry.join(identity("background"), move || async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = done_tx.send(());
            Ok(())
        });
        drop(execution);

        tokio::time::timeout(Duration::from_secs(2), done_rx)
            .await
            .expect("execution should finish")
            .unwrap();
    }

    #[tokio::test]
    async fn test_panicking_execution_is_aborted_and_removed() {
        let registry: Arc<InFlightRegistry<()>> = Arc::new(InFlightRegistry::new());

        let result = registry
            .join(identity("panics"), || async {
                if true {
                    panic!("producer blew up");
                }
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(ApiError::Aborted(_))));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_join_without_runtime_is_aborted_and_removed() {
        let registry: Arc<InFlightRegistry<()>> = Arc::new(InFlightRegistry::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let counted = Arc::clone(&calls);
        let execution = registry.join(identity("status"), move || async move {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert!(registry.is_empty());

        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let result = runtime.block_on(execution);
        assert!(matches!(result, Err(ApiError::Aborted(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_slot_is_removed_before_result_is_visible() {
        let registry: Arc<InFlightRegistry<bool>> = Arc::new(InFlightRegistry::new());

        let result = registry
            .join(identity("status"), || async { Ok(true) })
            .await
            .unwrap();

        assert!(result);
        assert!(!registry.contains(&identity("status")));
    }
}
