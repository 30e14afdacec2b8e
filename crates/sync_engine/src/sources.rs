//! Shared value sources
//!
//! Latest-value containers shared between the control plane (writers) and
//! sensor threads (readers). One mutex guards each value; nothing holds it
//! across I/O.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use contracts::{
    OrientationValue, PositionValue, SharedClock, TimeMode, Timestamped, UtcTime,
};

/// Shared position
pub type PositionSource = ValueSource<PositionValue>;

/// Shared orientation
pub type OrientationSource = ValueSource<OrientationValue>;

/// The three sources shared by one node for one run
#[derive(Debug, Clone)]
pub struct SourceSet {
    pub time: Arc<TimeSource>,
    pub position: Arc<PositionSource>,
    pub orientation: Arc<OrientationSource>,
}

impl SourceSet {
    pub fn new(mode: TimeMode, clock: SharedClock) -> Self {
        Self {
            time: Arc::new(TimeSource::new(mode, clock)),
            position: Arc::new(PositionSource::default()),
            orientation: Arc::new(OrientationSource::default()),
        }
    }
}

fn relock<G>(result: Result<G, PoisonError<G>>) -> G {
    result.unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct Slot<T> {
    value: T,
    generation: u64,
}

/// Latest value plus change notification
///
/// `wait` may report a wake-up for a value the caller already saw, or miss
/// a value set just before the wait started. Consumers confirm novelty by
/// comparing timestamps, or use [`ValueSource::wait_newer`].
#[derive(Debug)]
pub struct ValueSource<T> {
    slot: Mutex<Slot<T>>,
    changed: Condvar,
}

impl<T: Default> Default for ValueSource<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> ValueSource<T> {
    pub fn new(initial: T) -> Self {
        Self {
            slot: Mutex::new(Slot {
                value: initial,
                generation: 0,
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        relock(self.slot.lock())
    }

    /// Replace the value and wake every waiter.
    pub fn set(&self, value: T) {
        let mut slot = self.lock();
        slot.value = value;
        slot.generation = slot.generation.wrapping_add(1);
        drop(slot);
        self.changed.notify_all();
    }

    /// Number of `set` calls so far.
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Block until the next `set` or until `timeout` elapses.
    ///
    /// Returns `true` if a `set` happened while waiting.
    pub fn wait(&self, timeout: Duration) -> bool {
        let slot = self.lock();
        let start = slot.generation;
        let (slot, _) = relock(
            self.changed
                .wait_timeout_while(slot, timeout, |s| s.generation == start),
        );
        slot.generation != start
    }
}

impl<T: Clone> ValueSource<T> {
    /// Latest value.
    pub fn get(&self) -> T {
        self.lock().value.clone()
    }
}

impl<T: Clone + Timestamped> ValueSource<T> {
    /// Wait for a value whose timestamp differs from `last_utc`.
    ///
    /// Returns immediately if the current value is already new; `None` if
    /// nothing new arrived within `timeout`.
    pub fn wait_newer(&self, last_utc: UtcTime, timeout: Duration) -> Option<T> {
        let slot = self.lock();
        let (slot, _) = relock(self.changed.wait_timeout_while(slot, timeout, |s| {
            s.value.utc_time() == last_utc
        }));
        (slot.value.utc_time() != last_utc).then(|| slot.value.clone())
    }
}

#[derive(Debug)]
struct TimeState {
    base: UtcTime,
    reference: Option<f64>,
    is_set: bool,
    generation: u64,
}

/// Shared UTC time
///
/// - `Simple`: the latest value as-is
/// - `Precise`: latest value plus local time elapsed since it last changed
/// - `RelativePrecise`: the first value wins, then advances with the local clock
pub struct TimeSource {
    mode: TimeMode,
    clock: SharedClock,
    state: Mutex<TimeState>,
    changed: Condvar,
}

impl std::fmt::Debug for TimeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeSource")
            .field("mode", &self.mode)
            .field("state", &*relock(self.state.lock()))
            .finish()
    }
}

impl TimeSource {
    pub fn new(mode: TimeMode, clock: SharedClock) -> Self {
        Self {
            mode,
            clock,
            state: Mutex::new(TimeState {
                base: 0.0,
                reference: None,
                is_set: false,
                generation: 0,
            }),
            changed: Condvar::new(),
        }
    }

    pub fn mode(&self) -> TimeMode {
        self.mode
    }

    fn lock(&self) -> MutexGuard<'_, TimeState> {
        relock(self.state.lock())
    }

    /// Local time elapsed since `since`, or zero if the clock went backwards.
    fn elapsed_since(&self, since: f64) -> f64 {
        let elapsed = self.clock.now() - since;
        if elapsed < 0.0 {
            tracing::warn!(
                elapsed,
                mode = ?self.mode,
                "negative time elapsed in time source"
            );
            metrics::counter!("pisc_time_source_anomalies_total").increment(1);
            return 0.0;
        }
        elapsed
    }

    /// Current UTC estimate.
    pub fn get(&self) -> UtcTime {
        let state = self.lock();
        match (self.mode, state.reference) {
            (TimeMode::Simple, _) | (_, None) => state.base,
            (_, Some(reference)) => state.base + self.elapsed_since(reference),
        }
    }

    /// Whether a real value has arrived.
    pub fn is_set(&self) -> bool {
        self.lock().is_set
    }

    /// Store a new time. Returns `false` if the mode rejected it.
    pub fn set(&self, time: UtcTime) -> bool {
        self.store(time, None)
    }

    /// Store `time` measured at local instant `reference`.
    ///
    /// The local time elapsed between `reference` and acquiring the lock is
    /// added to `time`.
    pub fn set_with_ref(&self, time: UtcTime, reference: f64) -> bool {
        self.store(time, Some(reference))
    }

    fn store(&self, time: UtcTime, reference: Option<f64>) -> bool {
        let mut state = self.lock();
        let now = self.clock.now();
        let value = match reference {
            Some(r) => time + self.elapsed_since(r),
            None => time,
        };

        let accepted = match self.mode {
            TimeMode::Simple => {
                state.base = value;
                true
            }
            TimeMode::Precise => {
                // The reference instant only moves when the value does.
                if !state.is_set || state.base != value {
                    state.reference = Some(now);
                }
                state.base = value;
                true
            }
            TimeMode::RelativePrecise => {
                if state.is_set {
                    false
                } else {
                    state.reference = Some(now);
                    state.base = value;
                    true
                }
            }
        };

        if accepted {
            state.is_set = true;
            state.generation = state.generation.wrapping_add(1);
            drop(state);
            self.changed.notify_all();
        }
        accepted
    }

    /// Block until the next accepted set or until `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> bool {
        let state = self.lock();
        let start = state.generation;
        let (state, _) = relock(
            self.changed
                .wait_timeout_while(state, timeout, |s| s.generation == start),
        );
        state.generation != start
    }
}
