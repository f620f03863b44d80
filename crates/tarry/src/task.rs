//! Non-blocking poll entry points (tokio).
//!
//! [`Poller::spawn`] returns a [`PollHandle`] that can be awaited, or given a
//! completion callback with [`PollHandle::on_complete`]. Each evaluation runs
//! on the blocking pool, since [`crate::RemoteClient`] calls are synchronous,
//! and the gap between evaluations is a `tokio::time::sleep` owned by the
//! driving task. The sleep is dropped with the task on every exit path.

use crate::poll::{evaluate, IntoCheck, PollOutcome, PollState, Poller, Resolution, WaitResult};
use crate::result::{TarryError, TarryResult};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// A poll running on a tokio runtime
#[derive(Debug)]
pub struct PollHandle {
    task: JoinHandle<TarryResult<WaitResult>>,
    runtime: Handle,
}

/// Holds a completion callback until it is called.
///
/// If the delivering task is dropped first (runtime shutdown), the callback
/// still runs once, with a predicate error.
struct Delivery<F>
where
    F: FnOnce(TarryResult<WaitResult>),
{
    on_complete: Option<F>,
}

impl<F> Delivery<F>
where
    F: FnOnce(TarryResult<WaitResult>),
{
    const fn new(on_complete: F) -> Self {
        Self {
            on_complete: Some(on_complete),
        }
    }

    fn deliver(mut self, result: TarryResult<WaitResult>) {
        if let Some(on_complete) = self.on_complete.take() {
            on_complete(result);
        }
    }
}

impl<F> Drop for Delivery<F>
where
    F: FnOnce(TarryResult<WaitResult>),
{
    fn drop(&mut self) {
        if let Some(on_complete) = self.on_complete.take() {
            tracing::debug!("poll dropped before resolving, delivering error");
            on_complete(Err(TarryError::predicate(
                "runtime shut down before the poll resolved",
            )));
        }
    }
}

impl PollHandle {
    /// Deliver the result to `on_complete` exactly once, without blocking.
    ///
    /// If the runtime shuts down before the poll resolves, `on_complete`
    /// receives a [`TarryError::Predicate`] instead of being skipped.
    pub fn on_complete<F>(self, on_complete: F)
    where
        F: FnOnce(TarryResult<WaitResult>) + Send + 'static,
    {
        let runtime = self.runtime.clone();
        let delivery = Delivery::new(on_complete);
        drop(runtime.spawn(async move { delivery.deliver(self.await) }));
    }

    /// Whether the poll has resolved
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Future for PollHandle {
    type Output = TarryResult<WaitResult>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.task).poll(cx).map(|joined| {
            joined.unwrap_or_else(|e| Err(TarryError::predicate(format!("poll task failed: {e}"))))
        })
    }
}

async fn drive<P, R>(mut predicate: P, timeout: Duration, interval: Duration) -> Resolution
where
    P: FnMut() -> R + Send + 'static,
    R: IntoCheck + 'static,
{
    let mut state = PollState::new(Instant::now(), timeout, interval);

    loop {
        if state.expired(Instant::now()) {
            return state.finish(PollOutcome::TimedOut, Instant::now());
        }
        let evaluated = tokio::task::spawn_blocking(move || {
            let check = evaluate(&mut predicate);
            (predicate, check)
        })
        .await;
        let check = match evaluated {
            Ok((returned, check)) => {
                predicate = returned;
                check
            }
            Err(e) => {
                let outcome = PollOutcome::PredicateError(format!("evaluation task failed: {e}"));
                return state.finish(outcome, Instant::now());
            }
        };
        tracing::trace!(tick = state.ticks() + 1, ?check, "evaluated predicate");
        if let Some(outcome) = state.record(check) {
            return state.finish(outcome, Instant::now());
        }
        tokio::time::sleep(state.delay(Instant::now())).await;
    }
}

impl Poller {
    /// Start polling on the current tokio runtime and return immediately.
    ///
    /// # Errors
    ///
    /// [`TarryError::Config`] for an invalid config or when called outside a
    /// tokio runtime. Nothing is evaluated in that case.
    pub fn spawn<P, R>(&self, predicate: P) -> TarryResult<PollHandle>
    where
        P: FnMut() -> R + Send + 'static,
        R: IntoCheck + 'static,
    {
        let runtime = Handle::try_current()
            .map_err(|e| TarryError::config(format!("async poll needs a tokio runtime: {e}")))?;
        let (guard, timeout) = self.prepare()?;
        let interval = self.config.interval();
        let description = self.description.clone();
        let task = runtime.spawn(async move {
            let _guard = guard;
            drive(predicate, timeout, interval)
                .await
                .into_result(&description)
        });
        Ok(PollHandle { task, runtime })
    }

    /// Start polling and hand the result to `on_complete` once resolved.
    ///
    /// `on_complete` runs exactly once. A runtime shutdown before resolution
    /// delivers a [`TarryError::Predicate`].
    ///
    /// # Errors
    ///
    /// Same as [`Poller::spawn`]; `on_complete` is not called then.
    pub fn poll_with<P, R, F>(&self, predicate: P, on_complete: F) -> TarryResult<()>
    where
        P: FnMut() -> R + Send + 'static,
        R: IntoCheck + 'static,
        F: FnOnce(TarryResult<WaitResult>) + Send + 'static,
    {
        self.spawn(predicate)?.on_complete(on_complete);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::config::PollConfig;
    use crate::mock::MockRemote;
    use crate::RemoteClient;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::oneshot;

    fn poller(interval_ms: u64, timeout_ms: u64) -> (Arc<MockRemote>, Poller) {
        let mock = Arc::new(MockRemote::with_ambient_timeout(Duration::from_millis(20)));
        let poller = Poller::new(mock.clone()).with_config(
            PollConfig::new()
                .with_interval(interval_ms)
                .with_timeout(timeout_ms),
        );
        (mock, poller)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_spawn_resolves_success() {
        let (_, poller) = poller(20, 1_000);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result = poller
            .spawn(move || counter.fetch_add(1, Ordering::SeqCst) + 1 >= 3)
            .unwrap()
            .await
            .unwrap();
        assert_eq!(result.ticks, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(result.elapsed >= Duration::from_millis(40));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_spawn_returns_before_resolution() {
        let (_, poller) = poller(10, 200);
        let started = Instant::now();
        let handle = poller.spawn(|| false).unwrap();
        assert!(started.elapsed() < Duration::from_millis(50));
        assert!(handle.await.unwrap_err().is_timeout());
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_spawned_timeout_window() {
        let (_, poller) = poller(30, 100);
        let started = Instant::now();
        let mut handle = poller.spawn(|| false).unwrap();
        let err = (&mut handle).await.unwrap_err();
        let elapsed = started.elapsed();
        assert!(matches!(err, TarryError::Timeout { ms: 100, .. }));
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(130) + Duration::from_millis(150));
        assert!(handle.is_finished());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_spawned_success_after_k_ticks() {
        let (_, poller) = poller(40, 1_000);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut handle = poller
            .spawn(move || counter.fetch_add(1, Ordering::SeqCst) + 1 >= 4)
            .unwrap();
        let result = (&mut handle).await.unwrap();
        assert_eq!(result.ticks, 4);
        assert!(result.elapsed >= Duration::from_millis(120));
        assert!(result.elapsed < Duration::from_millis(120) + Duration::from_millis(150));
        assert!(handle.is_finished());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_final_tick_on_deadline_runs() {
        let (_, poller) = poller(50, 200);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result = poller
            .spawn(move || counter.fetch_add(1, Ordering::SeqCst) + 1 > 4)
            .unwrap()
            .await
            .unwrap();
        assert_eq!(result.ticks, 5);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_callback_fires_on_runtime_shutdown() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap();
        let (_, poller) = poller(1_000, 60_000);
        let fired = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = std::sync::mpsc::channel();
        {
            let _entered = runtime.enter();
            let counter = fired.clone();
            poller
                .poll_with(
                    || false,
                    move |result| {
                        counter.fetch_add(1, Ordering::SeqCst);
                        let _ = tx.send(result);
                    },
                )
                .unwrap();
        }
        std::thread::sleep(Duration::from_millis(50));
        runtime.shutdown_timeout(Duration::from_secs(1));

        let result = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(result.unwrap_err().is_predicate());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_callback_fires_exactly_once() {
        let (_, poller) = poller(10, 50);
        let fired = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel();
        let counter = fired.clone();
        poller
            .poll_with(
                || false,
                move |result| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let _ = tx.send(result);
                },
            )
            .unwrap();
        let result = rx.await.unwrap();
        assert!(result.unwrap_err().is_timeout());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_callback_receives_predicate_error_immediately() {
        let (_, poller) = poller(1_000, 5_000);
        let (tx, rx) = oneshot::channel();
        let started = Instant::now();
        poller
            .poll_with(
                || -> bool { panic!("no such frame") },
                move |result| {
                    let _ = tx.send(result);
                },
            )
            .unwrap();
        let err = rx.await.unwrap().unwrap_err();
        assert!(err.is_predicate());
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_ambient_restored_after_task() {
        let (mock, poller) = poller(10, 400);
        let probe = mock.clone();
        let raised = poller
            .spawn(move || probe.ambient_timeout() == Duration::from_millis(400))
            .unwrap()
            .await;
        assert!(raised.is_ok());
        assert_eq!(mock.ambient_timeout(), Duration::from_millis(20));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_invalid_config_rejected_synchronously() {
        let (_, poller) = poller(0, 100);
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let err = poller
            .poll_with(|| true, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap_err();
        assert!(err.is_config());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_spawn_outside_runtime() {
        let (_, poller) = poller(10, 100);
        let err = poller.spawn(|| true).unwrap_err();
        assert!(err.is_config());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_polls_are_independent() {
        let (_, fast) = poller(5, 1_000);
        let (_, slow) = poller(5, 60);
        let a = fast.spawn(|| true).unwrap();
        let b = slow.spawn(|| false).unwrap();
        let (a, b) = tokio::join!(a, b);
        assert_eq!(a.unwrap().ticks, 1);
        assert!(b.unwrap_err().is_timeout());
    }
}
