/*
 * Copyright 2021 Luca Fulchir <luker@fenrirproject.org>
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *   http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Adaptive sizer: hill-climbs the window/SLRU capacity split from
//! observed hit-rate feedback (spec.md §4.7). Disabled by default; the
//! coordinator only steps this once `adaptive(true)` was set on the
//! builder.

const INITIAL_PROBE_DELTA: f32 = 6.25;
const PROBE_DECAY: f32 = 0.98;
const SNAP_BACK_THRESHOLD: f32 = 0.05;
const MIN_PCT: f32 = 1.0;
const MAX_PCT: f32 = 99.0;

pub(crate) struct Sizer {
    lru_pct: f32,
    step: u64,
    interval: u64,
    probe_delta: f32,
    went_up: bool,
    last_success: f32,
    hits: u64,
    misses: u64,
}

impl Sizer {
    pub(crate) fn new(initial_lru_pct: f32, step: u64) -> Self {
        Sizer {
            lru_pct: initial_lru_pct.clamp(MIN_PCT, MAX_PCT),
            step: step.max(1),
            interval: 0,
            probe_delta: INITIAL_PROBE_DELTA,
            went_up: true,
            last_success: 0.0,
            hits: 0,
            misses: 0,
        }
    }

    pub(crate) fn lru_pct(&self) -> f32 {
        self.lru_pct
    }

    pub(crate) fn record(&mut self, hit: bool) {
        if hit {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
    }

    /// Advance the epoch by one operation. Returns the new `lru_pct` when
    /// a probe fired this call, `None` otherwise.
    pub(crate) fn tick(&mut self) -> Option<f32> {
        self.interval += 1;
        if self.interval < self.step {
            return None;
        }
        self.interval = 0;

        let total = self.hits + self.misses;
        let success = if total == 0 {
            0.0
        } else {
            self.hits as f32 / total as f32
        };

        if success < self.last_success {
            self.went_up = !self.went_up;
        }

        self.lru_pct = if self.went_up {
            (self.lru_pct + self.probe_delta).clamp(MIN_PCT, MAX_PCT)
        } else {
            (self.lru_pct - self.probe_delta).clamp(MIN_PCT, MAX_PCT)
        };

        self.probe_delta *= PROBE_DECAY;
        if (success - self.last_success).abs() > SNAP_BACK_THRESHOLD {
            self.probe_delta = INITIAL_PROBE_DELTA;
        }

        self.last_success = success;
        self.hits = 0;
        self.misses = 0;

        Some(self.lru_pct)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_probe_before_step() {
        let mut s = Sizer::new(50.0, 10);
        for _ in 0..9 {
            s.record(true);
            assert!(s.tick().is_none());
        }
    }

    #[test]
    fn probe_fires_on_step_and_moves_pct() {
        let mut s = Sizer::new(50.0, 4);
        s.record(true);
        s.record(true);
        s.record(true);
        let pct = s.tick();
        assert!(pct.is_some());
        assert_ne!(pct.unwrap(), 50.0);
    }

    #[test]
    fn pct_stays_within_bounds() {
        let mut s = Sizer::new(98.0, 1);
        for _ in 0..50 {
            s.record(true);
            s.tick();
        }
        assert!(s.lru_pct() <= MAX_PCT);
        assert!(s.lru_pct() >= MIN_PCT);
    }

    #[test]
    fn large_swing_snaps_probe_delta_back() {
        let mut s = Sizer::new(50.0, 1);
        s.record(true);
        s.tick(); // last_success = 1.0
        s.record(false);
        s.tick(); // success = 0.0, swing of 1.0 > 0.05
        assert_eq!(s.probe_delta, INITIAL_PROBE_DELTA);
    }
}
