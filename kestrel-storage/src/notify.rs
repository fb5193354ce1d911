use event_listener::{listener, Event, IntoNotification, Listener};
use std::time::{Duration, Instant};

/// Signal wraps an event with bounded-wait-and-recheck semantics.
///
/// Waiters never block without timeout: they register a listener,
/// re-check the condition, then sleep at most one interval before
/// checking again. So a missed notification only costs latency.
#[repr(transparent)]
pub struct Signal(Event);

impl Default for Signal {
    #[inline]
    fn default() -> Self {
        Signal(Event::new())
    }
}

impl Signal {
    #[inline]
    pub fn notify_one(&self) {
        self.0.notify(1usize.additional());
    }

    #[inline]
    pub fn notify_all(&self) {
        self.0.notify(usize::MAX);
    }

    /// Block until `cond` returns true, re-checking at least once
    /// per `interval`.
    #[inline]
    pub fn wait_until<F: FnMut() -> bool>(&self, interval: Duration, mut cond: F) {
        loop {
            if cond() {
                return;
            }
            listener!(self.0 => listener);
            if cond() {
                return;
            }
            listener.wait_timeout(interval);
        }
    }

    /// Same as `wait_until` but gives up after `deadline` elapsed.
    /// Returns whether the condition holds.
    #[inline]
    pub fn wait_until_for<F: FnMut() -> bool>(
        &self,
        interval: Duration,
        deadline: Duration,
        mut cond: F,
    ) -> bool {
        let start = Instant::now();
        loop {
            if cond() {
                return true;
            }
            let elapsed = start.elapsed();
            if elapsed >= deadline {
                return false;
            }
            listener!(self.0 => listener);
            if cond() {
                return true;
            }
            listener.wait_timeout(interval.min(deadline - elapsed));
        }
    }

    /// Wait for one notification or timeout, without any condition.
    #[inline]
    pub fn wait_timeout(&self, timeout: Duration) {
        listener!(self.0 => listener);
        listener.wait_timeout(timeout);
    }
}
