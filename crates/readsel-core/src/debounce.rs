//! Trailing-edge debouncer.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

/// Coalesces rapid calls into one trailing handler invocation.
///
/// Every [`call`](Self::call) restarts the quiet period; the handler runs once
/// `wait` has elapsed without further calls. By default it receives the
/// arguments of the last call; [`with_merge`](Self::with_merge) folds all
/// arguments of a burst instead.
///
/// The handler runs on the debouncer's own task, so calls arriving while it
/// runs start the next burst. Dropping the debouncer cancels a pending call
/// and a handler in flight.
pub struct Debouncer<T> {
    tx: mpsc::UnboundedSender<T>,
    task: JoinHandle<()>,
}

impl<T: Send + 'static> Debouncer<T> {
    /// Last-call-wins debouncer. Must be created inside a tokio runtime.
    pub fn new<F, Fut>(wait: Duration, handler: F) -> Self
    where
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::with_merge(wait, |pending, next| *pending = next, handler)
    }

    /// Debouncer folding every call of a burst into the pending value.
    pub fn with_merge<M, F, Fut>(wait: Duration, merge: M, mut handler: F) -> Self
    where
        M: Fn(&mut T, T) + Send + 'static,
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<T>();

        let task = tokio::spawn(async move {
            while let Some(mut pending) = rx.recv().await {
                loop {
                    tokio::select! {
                        biased;
                        next = rx.recv() => match next {
                            Some(value) => merge(&mut pending, value),
                            None => return,
                        },
                        _ = tokio::time::sleep(wait) => break,
                    }
                }
                handler(pending).await;
            }
        });

        Self { tx, task }
    }

    /// Schedule the handler, restarting the quiet period.
    pub fn call(&self, args: T) {
        if self.tx.send(args).is_err() {
            trace!("Debouncer task has ended, call dropped");
        }
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tokio::time::sleep;

    fn recording<T: Send + 'static>(wait: Duration) -> (Debouncer<T>, Arc<Mutex<Vec<T>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        let debouncer = Debouncer::new(wait, move |value| {
            sink.lock().push(value);
            async {}
        });
        (debouncer, calls)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_runs_once_with_last_argument() {
        let (debouncer, calls) = recording(Duration::from_millis(100));

        for i in 1..=5 {
            debouncer.call(i);
            sleep(Duration::from_millis(10)).await;
        }
        sleep(Duration::from_millis(150)).await;

        assert_eq!(*calls.lock(), vec![5]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_bursts_run_separately() {
        let (debouncer, calls) = recording(Duration::from_millis(100));

        debouncer.call("first");
        sleep(Duration::from_millis(200)).await;
        debouncer.call("second");
        sleep(Duration::from_millis(200)).await;

        assert_eq!(*calls.lock(), vec!["first", "second"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_call_restarts_quiet_period() {
        let (debouncer, calls) = recording(Duration::from_millis(100));

        for _ in 0..5 {
            debouncer.call(());
            sleep(Duration::from_millis(60)).await;
        }
        assert!(calls.lock().is_empty());

        sleep(Duration::from_millis(100)).await;
        assert_eq!(calls.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_merge_folds_burst() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        let debouncer = Debouncer::with_merge(
            Duration::from_millis(100),
            |pending: &mut Vec<u32>, next| pending.extend(next),
            move |batch| {
                sink.lock().push(batch);
                async {}
            },
        );

        debouncer.call(vec![1]);
        debouncer.call(vec![2, 3]);
        debouncer.call(vec![4]);
        sleep(Duration::from_millis(150)).await;

        assert_eq!(*calls.lock(), vec![vec![1, 2, 3, 4]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_pending_call() {
        let (debouncer, calls) = recording(Duration::from_millis(100));

        debouncer.call(1);
        sleep(Duration::from_millis(50)).await;
        drop(debouncer);
        sleep(Duration::from_millis(200)).await;

        assert!(calls.lock().is_empty());
    }
}
