//! Liveness flag with change notification and optional inactivity timeout.
//!
//! Used standalone by consumers that mirror a bridge's reachability,
//! and composed by [`BridgeClient`](crate::client::BridgeClient), which
//! flips it from socket, watchdog, and reconnect events. Change events
//! fire only on boolean transitions; repeated `set_available(true)`
//! calls are silent but still re-arm the inactivity timer.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// A single availability transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityChange {
    pub available: bool,
    pub error: Option<String>,
}

/// Shared, cloneable liveness flag.
///
/// Cheaply cloneable via `Arc`; all clones observe and mutate the same
/// state. When an inactivity timeout is configured the instance must
/// live inside a Tokio runtime, since the expiry timer is a spawned task.
#[derive(Clone)]
pub struct Availability {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
    change_tx: Mutex<Option<broadcast::Sender<AvailabilityChange>>>,
    timeout: Option<Duration>,
}

struct State {
    available: bool,
    error: Option<String>,
    timer: Option<JoinHandle<()>>,
    closed: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Availability {
    /// Create a flag with an initial value and no inactivity timeout.
    pub fn new(available: bool) -> Self {
        Self::with_timeout_opt(available, None)
    }

    /// Create a flag that automatically becomes unavailable when not
    /// refreshed within `timeout`.
    pub fn with_timeout(available: bool, timeout: Duration) -> Self {
        Self::with_timeout_opt(available, Some(timeout))
    }

    fn with_timeout_opt(available: bool, timeout: Option<Duration>) -> Self {
        let (change_tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let this = Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    available,
                    error: None,
                    timer: None,
                    closed: false,
                }),
                change_tx: Mutex::new(Some(change_tx)),
                timeout,
            }),
        };
        if available && timeout.is_some() {
            let mut state = lock(&this.inner.state);
            state.timer = Some(this.spawn_expiry_timer());
        }
        this
    }

    pub fn available(&self) -> bool {
        lock(&self.inner.state).available
    }

    pub fn last_error(&self) -> Option<String> {
        lock(&self.inner.state).error.clone()
    }

    /// Subscribe to boolean transitions. Dropping the receiver
    /// unsubscribes; after [`close`](Self::close) the receiver reports
    /// the channel as closed.
    pub fn subscribe(&self) -> broadcast::Receiver<AvailabilityChange> {
        match lock(&self.inner.change_tx).as_ref() {
            Some(tx) => tx.subscribe(),
            None => {
                // Closed: hand out a receiver that immediately reports Closed.
                let (tx, rx) = broadcast::channel(1);
                drop(tx);
                rx
            }
        }
    }

    /// Record a new liveness value.
    ///
    /// Cancels and, for `available == true` with a configured timeout,
    /// re-arms the expiry timer. Emits a change event only if the
    /// boolean actually flipped; the error is recorded either way.
    pub fn set_available(&self, available: bool, error: Option<String>) {
        let mut state = lock(&self.inner.state);
        if state.closed {
            return;
        }

        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        if available && self.inner.timeout.is_some() {
            state.timer = Some(self.spawn_expiry_timer());
        }

        let changed = state.available != available;
        state.available = available;
        state.error = error.clone();

        if changed {
            // Send while holding the state lock so subscribers observe
            // transitions in the order they happened.
            if let Some(tx) = lock(&self.inner.change_tx).as_ref() {
                let _ = tx.send(AvailabilityChange { available, error });
            }
        }
    }

    /// Force unavailable and release all subscriptions. Idempotent;
    /// the instance stays unavailable permanently afterwards.
    pub fn close(&self) {
        self.set_available(false, Some("closed".into()));
        let mut state = lock(&self.inner.state);
        state.closed = true;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        drop(state);
        lock(&self.inner.change_tx).take();
    }

    /// Mirror `other` into this instance: copy its current state now
    /// and follow every future change until the returned guard is
    /// dropped or detached. `other` is unaffected.
    pub fn bind_to(&self, other: &Availability) -> BindGuard {
        let (available, error) = {
            let state = lock(&other.inner.state);
            (state.available, state.error.clone())
        };
        self.set_available(available, error);

        let mut rx = other.subscribe();
        let this = self.clone();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(change) => this.set_available(change.available, change.error),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "availability mirror lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        BindGuard { task }
    }

    fn spawn_expiry_timer(&self) -> JoinHandle<()> {
        // Caller holds the state lock; the spawned task re-takes it only
        // after the sleep, so there is no lock re-entrancy.
        let this = self.clone();
        let timeout = self.inner.timeout.unwrap_or_default();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            this.set_available(
                false,
                Some(format!(
                    "no message received for {}s",
                    timeout.as_secs()
                )),
            );
        })
    }
}

/// Detachable handle returned by [`Availability::bind_to`]. Dropping it
/// stops the mirroring.
pub struct BindGuard {
    task: JoinHandle<()>,
}

impl BindGuard {
    /// Stop mirroring explicitly.
    pub fn detach(self) {
        self.task.abort();
    }
}

impl Drop for BindGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use tokio::sync::broadcast::error::TryRecvError;

    use super::*;

    #[tokio::test]
    async fn change_fires_only_on_boolean_transition() {
        let availability = Availability::new(false);
        let mut rx = availability.subscribe();

        availability.set_available(true, None);
        availability.set_available(true, None);

        let change = rx.try_recv().unwrap();
        assert!(change.available);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn error_is_recorded_without_an_event() {
        let availability = Availability::new(false);
        availability.set_available(false, Some("x".into()));
        let mut rx = availability.subscribe();

        availability.set_available(false, Some("y".into()));

        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(availability.last_error().as_deref(), Some("y"));
    }

    #[tokio::test(start_paused = true)]
    async fn inactivity_timeout_expires() {
        let availability = Availability::with_timeout(true, Duration::from_millis(1000));
        let mut rx = availability.subscribe();

        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert!(!availability.available());
        let change = rx.recv().await.unwrap();
        assert!(!change.available);
        assert!(change.error.unwrap().contains("1s"));
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_rearms_the_timer() {
        let availability = Availability::with_timeout(true, Duration::from_millis(1000));

        tokio::time::sleep(Duration::from_millis(700)).await;
        availability.set_available(true, None);
        tokio::time::sleep(Duration::from_millis(700)).await;

        // 1.4s elapsed overall, but never 1s without a refresh.
        assert!(availability.available());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!availability.available());
    }

    #[tokio::test]
    async fn close_is_terminal_and_idempotent() {
        let availability = Availability::new(true);
        let mut rx = availability.subscribe();

        availability.close();
        availability.close();

        let change = rx.recv().await.unwrap();
        assert!(!change.available);
        assert_eq!(change.error.as_deref(), Some("closed"));

        availability.set_available(true, None);
        assert!(!availability.available());

        // Subscriptions are released: the channel reports closed.
        assert!(matches!(
            rx.try_recv(),
            Err(TryRecvError::Closed)
        ));
    }

    #[tokio::test]
    async fn bind_to_mirrors_until_detached() {
        let source = Availability::new(true);
        let mirror = Availability::new(false);

        let guard = mirror.bind_to(&source);
        assert!(mirror.available());

        source.set_available(false, Some("offline".into()));
        tokio::task::yield_now().await;
        assert!(!mirror.available());
        assert_eq!(mirror.last_error().as_deref(), Some("offline"));

        guard.detach();
        source.set_available(true, None);
        tokio::task::yield_now().await;
        assert!(!mirror.available());
    }
}
