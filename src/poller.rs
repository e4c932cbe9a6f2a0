//! Fixed-interval repetition of an async action.
//!
//! A [`Poller`] runs one [`PollStep`] at a time: the next sleep only starts once the previous step
//! has completed, so steps never overlap even when one takes longer than the interval.

use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::handle::WatchHandle;

/// One iteration of a polling loop.
pub trait PollStep: Send + 'static {
    fn step(&mut self) -> impl Future<Output = ()> + Send;
}

/// [`PollStep`] built from a closure returning a future. See [`poll_fn`].
#[derive(Debug)]
pub struct PollFn<F>(F);

/// Wraps `f` into a [`PollStep`].
pub fn poll_fn<F, Fut>(f: F) -> PollFn<F>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    PollFn(f)
}

impl<F, Fut> PollStep for PollFn<F>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    fn step(&mut self) -> impl Future<Output = ()> + Send {
        (self.0)()
    }
}

/// Runs a [`PollStep`] every `interval` on a background task.
#[derive(Debug, Clone, Copy)]
pub struct Poller {
    interval: Duration,
    emit_on_begin: bool,
}

impl Poller {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self { interval, emit_on_begin: false }
    }

    /// Run the first step immediately instead of after one interval.
    #[must_use]
    pub fn emit_on_begin(mut self, emit_on_begin: bool) -> Self {
        self.emit_on_begin = emit_on_begin;
        self
    }

    pub(crate) fn emits_on_begin(&self) -> bool {
        self.emit_on_begin
    }

    /// Spawns the polling loop. Stopping the returned handle interrupts a pending sleep.
    pub fn start<S: PollStep>(self, step: S) -> WatchHandle {
        let token = CancellationToken::new();
        let task = tokio::spawn(self.run(step, token.clone()));
        WatchHandle::new(token, task)
    }

    pub(crate) async fn run<S: PollStep>(self, mut step: S, token: CancellationToken) {
        trace!(interval_ms = self.interval.as_millis(), "Poller started");

        if !self.emit_on_begin {
            tokio::select! {
                () = token.cancelled() => return,
                () = sleep(self.interval) => {}
            }
        }

        loop {
            if token.is_cancelled() {
                break;
            }

            step.step().await;

            tokio::select! {
                biased;

                () = token.cancelled() => break,
                () = sleep(self.interval) => {}
            }
        }

        trace!("Poller stopped");
    }
}
