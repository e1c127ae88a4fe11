//! Rate-controlled, pausable virtual clock over bag time
//!
//! The clock maps bag timestamps to wall-clock sleeps. Its "now" is
//! piecewise-linear in wall time: a reference pair (bag time, wall instant)
//! plus a rate. Every mutation rebases the reference and wakes all sleepers,
//! so an in-progress `sleep_until` returns `false` and the caller retries
//! against the new state.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Bounded nap taken by `sleep_until` while the clock is paused.
const PAUSED_SLEEP_PERIOD: Duration = Duration::from_millis(100);

struct ClockState {
    /// Bag time at the reference point; equals "now" while paused
    reference_bag_time: i64,
    /// Wall instant of the reference point
    reference_wall_time: Instant,
    rate: f64,
    paused: bool,
}

impl ClockState {
    fn now(&self) -> i64 {
        if self.paused {
            return self.reference_bag_time;
        }
        let elapsed = self.reference_wall_time.elapsed().as_nanos() as f64;
        self.reference_bag_time + (elapsed * self.rate) as i64
    }

    /// Wall instant at which bag time reaches `until`, given the current
    /// reference and rate. Saturates to the reference for past targets.
    fn wall_deadline(&self, until: i64) -> Instant {
        let remaining_bag = until.saturating_sub(self.reference_bag_time);
        if remaining_bag <= 0 {
            return self.reference_wall_time;
        }
        let wall_nanos = (remaining_bag as f64 / self.rate) as u64;
        self.reference_wall_time + Duration::from_nanos(wall_nanos)
    }

    fn rebase(&mut self) {
        self.reference_bag_time = self.now();
        self.reference_wall_time = Instant::now();
    }
}

/// The virtual clock pacing playback.
pub struct PlayerClock {
    state: Mutex<ClockState>,
    cv: Condvar,
}

impl PlayerClock {
    /// Create a clock positioned at `starting_time` with rate 1.0, running.
    pub fn new(starting_time: i64) -> Self {
        Self {
            state: Mutex::new(ClockState {
                reference_bag_time: starting_time,
                reference_wall_time: Instant::now(),
                rate: 1.0,
                paused: false,
            }),
            cv: Condvar::new(),
        }
    }

    /// Current bag time.
    pub fn now(&self) -> i64 {
        self.state.lock().now()
    }

    /// Block until bag time reaches `until`.
    ///
    /// Returns `true` when the target was reached, `false` when the sleep was
    /// interrupted by a rate change, pause, resume or jump, or when the clock
    /// is paused. Callers retry with the same target until `true`, which makes
    /// the sleep adapt to rate changes and cancel cleanly on pause.
    pub fn sleep_until(&self, until: i64) -> bool {
        let mut state = self.state.lock();
        if state.paused {
            // Nap instead of blocking forever so is-shutdown checks upstream
            // still run; never report the target reached while paused.
            self.cv.wait_for(&mut state, PAUSED_SLEEP_PERIOD);
            return false;
        }
        let deadline = state.wall_deadline(until);
        self.cv.wait_until(&mut state, deadline);
        if state.paused {
            return false;
        }
        state.now() >= until
    }

    /// Change the playback rate. Only finite rates > 0 are accepted; the
    /// return value reports acceptance. Wakes all sleepers.
    pub fn set_rate(&self, rate: f64) -> bool {
        if !rate.is_finite() || rate <= 0.0 {
            return false;
        }
        let mut state = self.state.lock();
        state.rebase();
        state.rate = rate;
        self.cv.notify_all();
        true
    }

    /// Current playback rate.
    pub fn get_rate(&self) -> f64 {
        self.state.lock().rate
    }

    /// Freeze bag time at its current value. Wakes all sleepers.
    pub fn pause(&self) {
        let mut state = self.state.lock();
        if state.paused {
            return;
        }
        state.rebase();
        state.paused = true;
        self.cv.notify_all();
    }

    /// Continue from the paused position. Wakes all sleepers.
    pub fn resume(&self) {
        let mut state = self.state.lock();
        if !state.paused {
            return;
        }
        state.reference_wall_time = Instant::now();
        state.paused = false;
        self.cv.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    /// Move bag time to `time`, keeping rate and pause state. Wakes all
    /// sleepers. This is the only operation that may move "now" backward.
    pub fn jump(&self, time: i64) {
        let mut state = self.state.lock();
        state.reference_bag_time = time;
        state.reference_wall_time = Instant::now();
        self.cv.notify_all();
    }
}
