use std::time::{Duration, Instant};

use serde::Serialize;

/// Moving averages advance in fixed steps; marks in between are accumulated.
const TICK_INTERVAL: Duration = Duration::from_secs(5);

/// Exponentially weighted moving average of a per-second rate.
struct Ewma {
    alpha: f64,
    rate: f64,
    uncounted: u64,
    initialized: bool,
}

impl Ewma {
    fn over_minutes(minutes: f64) -> Self {
        Self {
            alpha: 1.0 - (-TICK_INTERVAL.as_secs_f64() / 60.0 / minutes).exp(),
            rate: 0.0,
            uncounted: 0,
            initialized: false,
        }
    }

    fn update(&mut self, n: u64) {
        self.uncounted = self.uncounted.saturating_add(n);
    }

    fn tick(&mut self) {
        let instant_rate = self.uncounted as f64 / TICK_INTERVAL.as_secs_f64();
        self.uncounted = 0;
        if self.initialized {
            self.rate += self.alpha * (instant_rate - self.rate);
        } else {
            self.rate = instant_rate;
            self.initialized = true;
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MeterSnapshot {
    pub count: u64,
    pub mean_rate: f64,
    pub one_minute_rate: f64,
    pub five_minute_rate: f64,
    pub fifteen_minute_rate: f64,
}

/// Monotonic counter with a lifetime mean rate and 1/5/15 minute moving
/// rates, all in events per second.
pub struct Meter {
    count: u64,
    started: Instant,
    last_tick: Instant,
    m1: Ewma,
    m5: Ewma,
    m15: Ewma,
}

impl Meter {
    pub fn new(now: Instant) -> Self {
        Self {
            count: 0,
            started: now,
            last_tick: now,
            m1: Ewma::over_minutes(1.0),
            m5: Ewma::over_minutes(5.0),
            m15: Ewma::over_minutes(15.0),
        }
    }

    pub fn mark(&mut self, n: u64, now: Instant) {
        self.tick_if_necessary(now);
        self.count = self.count.saturating_add(n);
        self.m1.update(n);
        self.m5.update(n);
        self.m15.update(n);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn snapshot(&mut self, now: Instant) -> MeterSnapshot {
        self.tick_if_necessary(now);

        let elapsed = now.saturating_duration_since(self.started).as_secs_f64();
        let mean_rate = if self.count == 0 || elapsed <= 0.0 {
            0.0
        } else {
            self.count as f64 / elapsed
        };

        MeterSnapshot {
            count: self.count,
            mean_rate,
            one_minute_rate: self.m1.rate,
            five_minute_rate: self.m5.rate,
            fifteen_minute_rate: self.m15.rate,
        }
    }

    fn tick_if_necessary(&mut self, now: Instant) {
        let age = now.saturating_duration_since(self.last_tick);
        if age < TICK_INTERVAL {
            return;
        }

        let interval = TICK_INTERVAL.as_nanos();
        let ticks = age.as_nanos() / interval;
        let remainder = u64::try_from(age.as_nanos() % interval).unwrap_or(0);
        self.last_tick = now - Duration::from_nanos(remainder);

        for _ in 0..ticks {
            self.m1.tick();
            self.m5.tick();
            self.m15.tick();
        }
    }
}
