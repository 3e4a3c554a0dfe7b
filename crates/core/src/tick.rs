// SPDX-License-Identifier: Apache-2.0

//! Tick integration (§4.L): a single periodic emitter at
//! `gcd(credit_round_interval, force_batch_interval)` drives both the
//! credit cycle and the force-batch cycle, counting ticks to decide which
//! work is due. Grounded on `pipeline_ctrl.rs`'s `TimerSet`/
//! `PipelineCtrlMsgManager::run` pattern, simplified to a single fixed
//! period instead of per-node dynamic timers.

use std::time::Duration;
use tokio::sync::watch;

fn gcd_millis(a: u128, b: u128) -> u128 {
    let (mut a, mut b) = (a, b);
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

/// Which periodic activities are due on a given tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct TickWork {
    /// Run the credit cycle: offer every inbound sub-queue a chance to
    /// recalibrate and emit `ack_batch`.
    pub credit_cycle: bool,
    /// Run the force-batch cycle: call `force_emit_batches()` on every
    /// outbound path of every stream manager.
    pub force_batch_cycle: bool,
}

/// Counts ticks at a fixed base period and reports which of the two
/// configured cycles are due.
pub struct TickDriver {
    base_period: Duration,
    credit_every: u64,
    force_every: u64,
    tick_count: u64,
}

impl TickDriver {
    /// Builds a driver whose base period is the GCD of the two configured
    /// intervals (§6 `stream.credit-round-interval-ms` /
    /// `stream.force-batch-interval-ms`). `force_batch_interval` must
    /// divide `credit_round_interval` evenly (enforced by
    /// [`crate::config::StreamConfig::validate`]).
    #[must_use]
    pub fn new(credit_round_interval: Duration, force_batch_interval: Duration) -> Self {
        let credit_ms = credit_round_interval.as_millis().max(1);
        let force_ms = force_batch_interval.as_millis().max(1);
        let base_ms = gcd_millis(credit_ms, force_ms).max(1);
        TickDriver {
            base_period: Duration::from_millis(base_ms as u64),
            credit_every: (credit_ms / base_ms) as u64,
            force_every: (force_ms / base_ms) as u64,
            tick_count: 0,
        }
    }

    /// The base period this driver actually sleeps on between ticks.
    #[must_use]
    pub fn base_period(&self) -> Duration {
        self.base_period
    }

    /// Advances one tick and reports which cycles are due.
    pub fn tick(&mut self) -> TickWork {
        self.tick_count += 1;
        TickWork {
            credit_cycle: self.tick_count % self.credit_every == 0,
            force_batch_cycle: self.tick_count % self.force_every == 0,
        }
    }

    /// Drives `on_tick` forever at `base_period`, until `stop` is set to
    /// `true` or its sender is dropped.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>, mut on_tick: impl FnMut(TickWork)) {
        loop {
            tokio::select! {
                biased;
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
                () = tokio::time::sleep(self.base_period) => {
                    on_tick(self.tick());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_period_is_the_gcd_of_both_cycles() {
        let driver = TickDriver::new(Duration::from_millis(100), Duration::from_millis(50));
        assert_eq!(driver.base_period(), Duration::from_millis(50));
    }

    #[test]
    fn force_batch_fires_every_tick_when_intervals_are_equal() {
        let mut driver = TickDriver::new(Duration::from_millis(50), Duration::from_millis(50));
        for _ in 0..3 {
            let work = driver.tick();
            assert!(work.credit_cycle && work.force_batch_cycle);
        }
    }

    #[test]
    fn credit_cycle_fires_once_per_two_force_batch_ticks() {
        let mut driver = TickDriver::new(Duration::from_millis(100), Duration::from_millis(50));
        let ticks: Vec<TickWork> = (0..4).map(|_| driver.tick()).collect();
        assert_eq!(ticks.iter().filter(|t| t.force_batch_cycle).count(), 4);
        assert_eq!(ticks.iter().filter(|t| t.credit_cycle).count(), 2);
        assert!(ticks[1].credit_cycle);
        assert!(!ticks[0].credit_cycle);
    }
}
