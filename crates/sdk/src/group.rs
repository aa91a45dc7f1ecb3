//! Structured task spawning tied to cancellation.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// A set of tasks scoped to a cancellation token. Dropping the group does
/// not abort the tasks; call `wait` (normal teardown) after cancelling the
/// token.
pub struct TaskGroup {
    cancel: CancellationToken,
    tasks: JoinSet<()>,
}

impl TaskGroup {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel, tasks: JoinSet::new() }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn a task that receives the group's token. Tasks are expected to
    /// return promptly once the token is cancelled.
    pub fn spawn<F, Fut>(&mut self, f: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.cancel.clone();
        self.tasks.spawn(f(token));
    }

    /// Wait for every task to finish.
    pub async fn wait(mut self) {
        while let Some(res) = self.tasks.join_next().await {
            if let Err(e) = res {
                if e.is_panic() {
                    tracing::error!(error = %e, "worker task panicked");
                }
            }
        }
    }
}

/// Run `f` on a fixed interval until the token is cancelled. With
/// `immediate`, the first run happens right away instead of after one
/// interval.
pub async fn run_interval<F, Fut>(
    cancel: &CancellationToken,
    interval: Duration,
    immediate: bool,
    mut f: F,
) where
    F: FnMut(CancellationToken) -> Fut,
    Fut: Future<Output = ()>,
{
    if immediate {
        if cancel.is_cancelled() {
            return;
        }
        f(cancel.clone()).await;
    }

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick of tokio's interval fires immediately; consume it.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                f(cancel.clone()).await;
            }
            _ = cancel.cancelled() => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn group_waits_for_all_tasks() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut group = TaskGroup::new(CancellationToken::new());
        for _ in 0..3 {
            let counter = counter.clone();
            group.spawn(move |cancel| async move {
                cancel.cancelled().await;
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        group.cancel_token().cancel();
        group.wait().await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_runs_immediately_then_ticks() {
        let cancel = CancellationToken::new();
        let counter = Arc::new(AtomicU32::new(0));
        let c2 = counter.clone();
        let cancel2 = cancel.clone();

        let handle = tokio::spawn(async move {
            run_interval(&cancel2, Duration::from_secs(10), true, |_| {
                let c = c2.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;
        });

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert!(counter.load(Ordering::SeqCst) >= 3);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn cancelled_interval_skips_immediate_run() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let counter = AtomicU32::new(0);
        run_interval(&cancel, Duration::from_secs(1), true, |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {}
        })
        .await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
