use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::trace;

type Flight<T> = Shared<BoxFuture<'static, T>>;
type Slot<T> = Arc<Mutex<Option<(u64, Flight<T>)>>>;

/// Start-or-join for an async operation.
///
/// While an operation is in flight every caller of [`Coalescer::run`] awaits
/// that same operation and receives a clone of its output. The slot is
/// emptied by the operation itself when it settles, whatever the outcome, so
/// the next call after that starts a fresh one. Callers dropping their future
/// never cancel the operation for the others.
pub struct Coalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    slot: Slot<T>,
    next_id: AtomicU64,
}

impl<T> Default for Coalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Coalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Join the in-flight operation, or start one with `start`.
    ///
    /// `start` is only called when nothing is in flight.
    pub async fn run<F, Fut>(&self, start: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let flight = {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some((id, flight)) => {
                    trace!(flight = id, "joining in-flight operation");
                    flight.clone()
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let flight = settle_and_clear(Arc::clone(&self.slot), id, start())
                        .boxed()
                        .shared();
                    *slot = Some((id, flight.clone()));
                    trace!(flight = id, "started operation");
                    flight
                }
            }
        };
        flight.await
    }
}

async fn settle_and_clear<T, Fut>(slot: Slot<T>, id: u64, op: Fut) -> T
where
    T: Clone + Send + Sync + 'static,
    Fut: Future<Output = T>,
{
    let out = op.await;
    let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
    if guard.as_ref().map(|(current, _)| *current == id).unwrap_or(false) {
        *guard = None;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use futures::future::join_all;
    use tokio::time::sleep;

    #[tokio::test]
    async fn concurrent_callers_share_one_operation() {
        let coalescer: Coalescer<usize> = Coalescer::new();
        let starts = Arc::new(AtomicUsize::new(0));

        let calls = (0..16).map(|_| {
            let starts = starts.clone();
            coalescer.run(move || async move {
                let n = starts.fetch_add(1, Ordering::SeqCst);
                sleep(Duration::from_millis(50)).await;
                n + 100
            })
        });
        let results = join_all(calls).await;

        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| *r == 100));
        assert!(!coalescer.is_in_flight());
    }

    #[tokio::test]
    async fn slot_is_cleared_after_failure() {
        let coalescer: Coalescer<Result<u8, String>> = Coalescer::new();

        let first = coalescer.run(|| async { Err("refused".to_owned()) }).await;
        assert_eq!(first, Err("refused".to_owned()));
        assert!(!coalescer.is_in_flight());

        let second = coalescer.run(|| async { Ok(1) }).await;
        assert_eq!(second, Ok(1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn abandoned_leader_does_not_cancel_joiners() {
        let coalescer = Arc::new(Coalescer::<u32>::new());
        let starts = Arc::new(AtomicUsize::new(0));

        let leader = {
            let coalescer = coalescer.clone();
            let starts = starts.clone();
            tokio::spawn(async move {
                coalescer
                    .run(move || async move {
                        starts.fetch_add(1, Ordering::SeqCst);
                        sleep(Duration::from_millis(100)).await;
                        7
                    })
                    .await
            })
        };
        sleep(Duration::from_millis(20)).await;
        assert!(coalescer.is_in_flight());

        let joiner = {
            let coalescer = coalescer.clone();
            tokio::spawn(async move { coalescer.run(|| async { 0 }).await })
        };
        sleep(Duration::from_millis(10)).await;
        leader.abort();

        assert_eq!(joiner.await.unwrap(), 7);
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert!(!coalescer.is_in_flight());
    }
}
