//! Deadline primitives for the client send paths.
//!
//! Both hold at most one buffered value and one outstanding deadline. They
//! never sleep themselves: the caller asks for [`Debounce::deadline`] /
//! [`Throttle::deadline`], waits with `tokio::time::sleep_until`, and then
//! polls with the current instant. That keeps them usable under a paused
//! test clock and inside a `select!` loop.
//!
//! ```text
//! edits:     x  x x   x                 x
//! debounce:  ─────────────────▶ send    ─────────────────▶ send
//!                   (quiet for `delay` after the last edit)
//!
//! pointer:   p p p p p p p p p
//! throttle:  ▶ send ···· ▶ send ···· ▶ send (latest value, trailing edge)
//! ```

use std::time::Duration;
use tokio::time::Instant;

/// Sleep until `deadline`, or forever when there is none.
pub async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Trailing-edge debounce. Each push replaces the buffered value and pushes
/// the deadline back; the value is released once no push arrived for
/// `delay`.
#[derive(Debug)]
pub struct Debounce<T> {
    delay: Duration,
    pending: Option<T>,
    deadline: Option<Instant>,
}

impl<T> Debounce<T> {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
            deadline: None,
        }
    }

    pub fn push(&mut self, value: T, now: Instant) {
        self.pending = Some(value);
        self.deadline = Some(now + self.delay);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Release the buffered value if the quiet period has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<T> {
        match self.deadline {
            Some(deadline) if now >= deadline => self.take(),
            _ => None,
        }
    }

    /// Rewrite the buffered value in place. The deadline is unchanged.
    pub fn map_pending(&mut self, f: impl FnOnce(T) -> T) {
        self.pending = self.pending.take().map(f);
    }

    /// Release the buffered value immediately.
    pub fn take(&mut self) -> Option<T> {
        self.deadline = None;
        self.pending.take()
    }
}

/// Leading and trailing throttle. The first value after a quiet spell goes
/// out immediately; values arriving within `interval` of the last release
/// are coalesced and the latest one is released when the interval ends.
#[derive(Debug)]
pub struct Throttle<T> {
    interval: Duration,
    last_sent: Option<Instant>,
    pending: Option<T>,
}

impl<T> Throttle<T> {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: None,
            pending: None,
        }
    }

    /// Returns the value back when it may be sent right away.
    pub fn push(&mut self, value: T, now: Instant) -> Option<T> {
        if self.is_open(now) {
            self.last_sent = Some(now);
            self.pending = None;
            Some(value)
        } else {
            self.pending = Some(value);
            None
        }
    }

    /// When the buffered value becomes due, if there is one.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending
            .as_ref()
            .and(self.last_sent)
            .map(|last| last + self.interval)
    }

    pub fn poll(&mut self, now: Instant) -> Option<T> {
        if self.pending.is_some() && self.is_open(now) {
            self.last_sent = Some(now);
            return self.pending.take();
        }
        None
    }

    fn is_open(&self, now: Instant) -> bool {
        self.last_sent.map_or(true, |last| now >= last + self.interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn test_debounce_waits_for_quiet() {
        let t0 = Instant::now();
        let mut d = Debounce::new(50 * MS);

        d.push(1, t0);
        d.push(2, t0 + 20 * MS);
        d.push(3, t0 + 40 * MS);
        assert_eq!(d.deadline(), Some(t0 + 90 * MS));

        assert_eq!(d.poll(t0 + 60 * MS), None);
        assert_eq!(d.poll(t0 + 90 * MS), Some(3));
        assert!(!d.is_pending());
        assert_eq!(d.deadline(), None);
    }

    #[test]
    fn test_debounce_take_flushes() {
        let t0 = Instant::now();
        let mut d = Debounce::new(50 * MS);
        d.push("edit", t0);
        assert_eq!(d.take(), Some("edit"));
        assert_eq!(d.poll(t0 + 100 * MS), None);
    }

    #[test]
    fn test_debounce_map_keeps_deadline() {
        let t0 = Instant::now();
        let mut d = Debounce::new(50 * MS);
        d.map_pending(|v: i32| v + 1);
        assert!(!d.is_pending());

        d.push(1, t0);
        d.map_pending(|v| v * 10);
        assert_eq!(d.deadline(), Some(t0 + 50 * MS));
        assert_eq!(d.poll(t0 + 50 * MS), Some(10));
    }

    #[test]
    fn test_throttle_leading_then_trailing() {
        let t0 = Instant::now();
        let mut t = Throttle::new(30 * MS);

        assert_eq!(t.push((0, 0), t0), Some((0, 0)));
        assert_eq!(t.push((1, 1), t0 + 5 * MS), None);
        assert_eq!(t.push((2, 2), t0 + 10 * MS), None);
        assert_eq!(t.deadline(), Some(t0 + 30 * MS));

        assert_eq!(t.poll(t0 + 20 * MS), None);
        assert_eq!(t.poll(t0 + 30 * MS), Some((2, 2)));
        assert_eq!(t.deadline(), None);
    }

    #[test]
    fn test_throttle_reopens_after_interval() {
        let t0 = Instant::now();
        let mut t = Throttle::new(30 * MS);

        assert!(t.push(1, t0).is_some());
        assert!(t.push(2, t0 + 31 * MS).is_some());
        assert!(t.push(3, t0 + 40 * MS).is_none());
        assert_eq!(t.poll(t0 + 61 * MS), Some(3));
    }
}
