// SPDX-License-Identifier: Apache-2.0

//! The credit controller strategy (§4.E): observes received batches and
//! returns calibrations that bound how much a source may send.
//!
//! Sinks own their controller instance; sources never reference it.

use crate::control::Batch;

/// A credit grant computed by a [`CreditController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calibration {
    /// Upper bound on outstanding credit. `>= batch_size`. May be `0` to
    /// stall temporarily.
    pub max_credit: i32,
    /// Target batch size. Monotonic and `>= 1`.
    pub batch_size: i32,
    /// Number of batches until the next `calibrate()` call.
    pub next_calibration: u32,
}

/// Strategy that converts observed inbound-path throughput into credit
/// assignments. One trait, two default implementations
/// ([`SizeBasedCreditController`], [`TokenBasedCreditController`]).
pub trait CreditController<T> {
    /// Called once per received batch, before it is handed to the stream
    /// manager, to update the controller's running estimate.
    fn before_processing(&mut self, batch: &Batch<T>);

    /// Called once, on the first batch, to obtain the initial calibration.
    fn init(&mut self) -> Calibration;

    /// Called every `next_calibration` batches to obtain an updated
    /// calibration.
    fn calibrate(&mut self) -> Calibration;
}

/// Samples average serialized batch bytes and targets a configurable
/// buffer budget, expressed in bytes-for-two-cycles.
///
/// Since serialization itself is out of scope for the core, callers supply
/// a byte-size estimator for `T`.
pub struct SizeBasedCreditController<T> {
    byte_size_of: Box<dyn Fn(&T) -> usize>,
    budget_bytes: usize,
    min_batch_elements: i32,
    sum_bytes: u64,
    sum_elements: u64,
    next_calibration: u32,
}

impl<T> SizeBasedCreditController<T> {
    /// Creates a size-based controller targeting `budget_bytes` of buffered
    /// payload across two calibration cycles, using `byte_size_of` to
    /// estimate the serialized size of one payload element.
    pub fn new(budget_bytes: usize, byte_size_of: impl Fn(&T) -> usize + 'static) -> Self {
        SizeBasedCreditController {
            byte_size_of: Box::new(byte_size_of),
            budget_bytes,
            min_batch_elements: 1,
            sum_bytes: 0,
            sum_elements: 0,
            next_calibration: 10,
        }
    }

    fn avg_bytes_per_element(&self) -> f64 {
        if self.sum_elements == 0 {
            1.0
        } else {
            self.sum_bytes as f64 / self.sum_elements as f64
        }
    }

    fn compute_calibration(&self) -> Calibration {
        let avg = self.avg_bytes_per_element().max(1.0);
        // Budget spans two cycles; split evenly between outstanding credit
        // and the target batch size.
        let max_credit = ((self.budget_bytes as f64) / avg) as i32;
        let max_credit = max_credit.max(self.min_batch_elements);
        let batch_size = (max_credit / 4).max(self.min_batch_elements);
        Calibration {
            max_credit,
            batch_size,
            next_calibration: 10,
        }
    }
}

impl<T> CreditController<T> for SizeBasedCreditController<T> {
    fn before_processing(&mut self, batch: &Batch<T>) {
        for element in &batch.payload {
            self.sum_bytes += (self.byte_size_of)(element) as u64;
            self.sum_elements += 1;
        }
    }

    fn init(&mut self) -> Calibration {
        self.compute_calibration()
    }

    fn calibrate(&mut self) -> Calibration {
        self.compute_calibration()
    }
}

/// Fixed tokens established at handshake time and rarely recalibrated.
/// Constants mirror the reference token-based controller: a short initial
/// sampling window after which the grant stabilizes.
pub struct TokenBasedCreditController<T> {
    batch_size: i32,
    buffer_size: i32,
    samples: u32,
    _marker: std::marker::PhantomData<fn(&T)>,
}

impl<T> TokenBasedCreditController<T> {
    /// Minimum number of samples observed before recalibration is allowed
    /// to change the grant.
    pub const MIN_SAMPLES: u32 = 50;
    const INITIAL_BUFFER_SIZE: i32 = 10;
    const INITIAL_BATCH_SIZE: i32 = 2;

    /// Creates a token-based controller with the default initial grant.
    #[must_use]
    pub fn new() -> Self {
        TokenBasedCreditController {
            batch_size: Self::INITIAL_BATCH_SIZE,
            buffer_size: Self::INITIAL_BUFFER_SIZE,
            samples: 0,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T> Default for TokenBasedCreditController<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CreditController<T> for TokenBasedCreditController<T> {
    fn before_processing(&mut self, _batch: &Batch<T>) {
        self.samples = self.samples.saturating_add(1);
    }

    fn init(&mut self) -> Calibration {
        Calibration {
            max_credit: self.buffer_size,
            batch_size: self.batch_size,
            next_calibration: Self::MIN_SAMPLES,
        }
    }

    fn calibrate(&mut self) -> Calibration {
        // Tokens are fixed after the handshake; only the sampling window
        // widens, so recalibration happens increasingly rarely.
        Calibration {
            max_credit: self.buffer_size,
            batch_size: self.batch_size,
            next_calibration: Self::MIN_SAMPLES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_based_calibration_respects_budget() {
        let mut ctrl = SizeBasedCreditController::new(1000, |p: &&str| p.len());
        for id in 0..5 {
            ctrl.before_processing(&Batch {
                size: 10,
                payload: vec!["0123456789"; 10],
                id,
            });
        }
        let cal = ctrl.calibrate();
        assert!(cal.max_credit >= cal.batch_size);
        assert!(cal.batch_size >= 1);
    }

    #[test]
    fn token_based_stays_fixed_across_calibrations() {
        let mut ctrl: TokenBasedCreditController<&str> = TokenBasedCreditController::new();
        let first = ctrl.init();
        for id in 0..60 {
            ctrl.before_processing(&Batch {
                size: 1,
                payload: vec!["x"],
                id,
            });
        }
        let second = ctrl.calibrate();
        assert_eq!(first.max_credit, second.max_credit);
        assert_eq!(first.batch_size, second.batch_size);
    }
}
