//! Periodic frequency-analysis polling

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// A running poll loop; aborted when stopped or dropped
#[derive(Debug)]
pub(crate) struct AnalysisLoop {
    handle: JoinHandle<()>,
}

impl AnalysisLoop {
    /// Call `tick` every `period` until it returns false
    ///
    /// The first tick fires one period after spawning.
    pub(crate) fn spawn(
        runtime: &tokio::runtime::Handle,
        period: Duration,
        mut tick: impl FnMut() -> bool + Send + 'static,
    ) -> Self {
        let handle = runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval.tick().await;
            loop {
                interval.tick().await;
                if !tick() {
                    break;
                }
            }
        });
        Self { handle }
    }

    pub(crate) fn stop(self) {
        self.handle.abort();
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for AnalysisLoop {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn ticks_until_stopped() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let analysis = AnalysisLoop::spawn(
            &tokio::runtime::Handle::current(),
            Duration::from_millis(50),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                true
            },
        );

        tokio::time::sleep(Duration::from_millis(175)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);

        analysis.stop();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn tick_returning_false_ends_loop() {
        let analysis = AnalysisLoop::spawn(
            &tokio::runtime::Handle::current(),
            Duration::from_millis(10),
            || false,
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(analysis.is_finished());
    }
}
