//! Readiness polling.
//!
//! [`wait_until`] re-evaluates a probe on a fixed tick until it reports a
//! result or a hard deadline passes. [`wait_for_nested`] builds on it to wait
//! for a dotted property path to appear in an inspected JSON snapshot, for
//! clients that cannot push lifecycle events.
//!
//! Probes are synchronous and run between ticks, so no lock is held while
//! waiting.

use crate::client::MessagingClient;
use crate::error::{SessionError, SessionResult};
use crate::session::SessionHandle;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

/// Default interval between probes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default deadline for a wait.
pub const DEFAULT_POLL_DEADLINE: Duration = Duration::from_secs(10);

/// Timing of a polling wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    /// Time between two probes.
    pub interval: Duration,
    /// Total time before giving up.
    pub deadline: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            deadline: DEFAULT_POLL_DEADLINE,
        }
    }
}

impl PollOptions {
    /// Create options from an interval and a deadline.
    #[must_use]
    pub const fn new(interval: Duration, deadline: Duration) -> Self {
        Self { interval, deadline }
    }
}

/// Outcome of a single probe.
#[derive(Debug)]
pub enum Probe<T> {
    /// Not there yet; probe again on the next tick.
    Pending,
    /// Done.
    Ready(T),
    /// Stop waiting with this error.
    Failed(SessionError),
}

/// Poll `probe` every `options.interval` until it settles.
///
/// The first probe runs immediately.
///
/// # Errors
///
/// Returns the error carried by [`Probe::Failed`], or
/// [`SessionError::Timeout`] once `options.deadline` has elapsed.
pub async fn wait_until<T, F>(mut probe: F, options: PollOptions) -> SessionResult<T>
where
    F: FnMut() -> Probe<T>,
{
    let deadline = Instant::now() + options.deadline;
    let mut ticker = tokio::time::interval(options.interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match probe() {
            Probe::Ready(value) => return Ok(value),
            Probe::Failed(err) => return Err(err),
            Probe::Pending => {}
        }
        if Instant::now() >= deadline {
            return Err(SessionError::Timeout(options.deadline));
        }
    }
}

/// Something whose internal state can be captured as JSON.
pub trait Inspect {
    /// Current state snapshot.
    fn snapshot(&self) -> Value;
}

impl Inspect for Value {
    fn snapshot(&self) -> Value {
        self.clone()
    }
}

impl Inspect for dyn MessagingClient {
    fn snapshot(&self) -> Value {
        self.inspect()
    }
}

impl Inspect for SessionHandle {
    fn snapshot(&self) -> Value {
        self.client().map_or(Value::Null, |client| client.inspect())
    }
}

impl<T: Inspect + ?Sized> Inspect for Arc<T> {
    fn snapshot(&self) -> Value {
        (**self).snapshot()
    }
}

/// Resolve a dotted path (`"page.mainFrame"`) inside `value`.
///
/// Numeric segments index into arrays. `null` counts as absent.
#[must_use]
pub fn resolve_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
        .filter(|resolved| !resolved.is_null())
}

/// Wait until `path` resolves in `source`'s snapshot.
///
/// Resolves with the snapshot in which the path was found.
///
/// # Errors
///
/// Returns [`SessionError::Timeout`] if the path never appears.
pub async fn wait_for_nested<S>(source: &S, path: &str, options: PollOptions) -> SessionResult<Value>
where
    S: Inspect + Sync + ?Sized,
{
    wait_until(
        || {
            let snapshot = source.snapshot();
            if resolve_path(&snapshot, path).is_some() {
                Probe::Ready(snapshot)
            } else {
                Probe::Pending
            }
        },
        options,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct Growing {
        state: Mutex<Value>,
    }

    impl Inspect for Growing {
        fn snapshot(&self) -> Value {
            self.state.lock().unwrap().clone()
        }
    }

    #[test]
    fn test_resolve_path() {
        let value = json!({ "page": { "frames": [null, { "url": "x" }] }, "empty": null });
        assert_eq!(resolve_path(&value, "page.frames.1.url"), Some(&json!("x")));
        assert!(resolve_path(&value, "page.frames.0").is_none());
        assert!(resolve_path(&value, "empty").is_none());
        assert!(resolve_path(&value, "page.missing").is_none());
        assert!(resolve_path(&value, "page").is_some());
        assert!(resolve_path(&Value::Null, "").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_ready() {
        let mut calls = 0;
        let result = wait_until(
            || {
                calls += 1;
                if calls == 3 { Probe::Ready(calls) } else { Probe::Pending }
            },
            PollOptions::default(),
        )
        .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_times_out() {
        let started = Instant::now();
        let options = PollOptions::new(Duration::from_millis(50), Duration::from_secs(2));
        let result: SessionResult<()> = wait_until(|| Probe::Pending, options).await;

        assert!(matches!(result, Err(SessionError::Timeout(d)) if d == Duration::from_secs(2)));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_failure_stops_early() {
        let result: SessionResult<()> = wait_until(
            || Probe::Failed(SessionError::not_found("gone")),
            PollOptions::default(),
        )
        .await;
        assert!(matches!(result, Err(SessionError::NotFound(id)) if id == "gone"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_nested_appears() {
        let source = Arc::new(Growing {
            state: Mutex::new(json!({})),
        });

        let writer = Arc::clone(&source);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(350)).await;
            *writer.state.lock().unwrap() = json!({ "page": { "ready": true } });
        });

        let snapshot = wait_for_nested(&source, "page.ready", PollOptions::default())
            .await
            .unwrap();
        assert_eq!(snapshot["page"]["ready"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_nested_never_appears() {
        let source = json!({ "page": null });
        let options = PollOptions::new(Duration::from_millis(100), Duration::from_millis(500));
        let result = wait_for_nested(&source, "page", options).await;
        assert!(matches!(result, Err(SessionError::Timeout(_))));
    }
}
