// SPDX-License-Identifier: Apache-2.0

//! Typed configuration for the streaming core's external knobs (§6).
//!
//! `StreamConfig` is the deserialization target for the `stream.*`
//! configuration namespace. There is no file-watching or CLI surface at
//! this layer; callers own the `serde_json::Value`/file they parsed it
//! from.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Named choice of [`crate::credit`] strategy for a stream's inbound side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CreditPolicy {
    /// Estimates average serialized batch bytes and targets a buffer budget.
    SizeBased,
    /// Fixed tokens established at handshake time, rarely recalibrated.
    TokenBased,
}

impl Default for CreditPolicy {
    fn default() -> Self {
        CreditPolicy::SizeBased
    }
}

/// Default per-sub-queue control channel capacity, reused by the reference
/// single-threaded harness. Chosen the way
/// `DEFAULT_CONTROL_CHANNEL_CAPACITY` is in the teacher's pipeline
/// configuration: small enough to bound memory, large enough that a normal
/// burst of control traffic does not stall the sender.
pub const DEFAULT_CONTROL_CHANNEL_CAPACITY: usize = 32;

/// Default per-path pdata channel capacity.
pub const DEFAULT_PDATA_CHANNEL_CAPACITY: usize = 256;

/// Configuration for one stream's flow-control behavior.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StreamConfig {
    /// Which [`crate::credit::CreditController`] strategy the sink uses.
    #[serde(default)]
    pub credit_policy: CreditPolicy,

    /// Upper bound, in milliseconds, on the time between forced acks on an
    /// otherwise idle inbound path.
    #[serde(default = "default_max_batch_delay_ms")]
    pub max_batch_delay_ms: u64,

    /// Target duration per batch used by the size-based controller to size
    /// `desired_batch_size`, in milliseconds.
    #[serde(default = "default_desired_batch_complexity_ms")]
    pub desired_batch_complexity_ms: u64,

    /// Length of the credit recalibration cycle, in milliseconds. Must be a
    /// multiple of `force_batch_interval_ms` (see [`crate::tick`]).
    #[serde(default = "default_credit_round_interval_ms")]
    pub credit_round_interval_ms: u64,

    /// Length of the forced-batch-flush cycle, in milliseconds.
    #[serde(default = "default_force_batch_interval_ms")]
    pub force_batch_interval_ms: u64,
}

const fn default_max_batch_delay_ms() -> u64 {
    100
}

const fn default_desired_batch_complexity_ms() -> u64 {
    10
}

const fn default_credit_round_interval_ms() -> u64 {
    100
}

const fn default_force_batch_interval_ms() -> u64 {
    50
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig {
            credit_policy: CreditPolicy::default(),
            max_batch_delay_ms: default_max_batch_delay_ms(),
            desired_batch_complexity_ms: default_desired_batch_complexity_ms(),
            credit_round_interval_ms: default_credit_round_interval_ms(),
            force_batch_interval_ms: default_force_batch_interval_ms(),
        }
    }
}

impl StreamConfig {
    /// Parses a `StreamConfig` from a `stream.*` JSON object.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, Error> {
        serde_json::from_value(value.clone()).map_err(|e| Error::InvalidConfig {
            detail: e.to_string(),
        })
    }

    /// Returns [`Self::max_batch_delay_ms`] as a [`Duration`].
    #[must_use]
    pub fn max_batch_delay(&self) -> Duration {
        Duration::from_millis(self.max_batch_delay_ms)
    }

    /// Returns [`Self::desired_batch_complexity_ms`] as a [`Duration`].
    #[must_use]
    pub fn desired_batch_complexity(&self) -> Duration {
        Duration::from_millis(self.desired_batch_complexity_ms)
    }

    /// Returns [`Self::credit_round_interval_ms`] as a [`Duration`].
    #[must_use]
    pub fn credit_round_interval(&self) -> Duration {
        Duration::from_millis(self.credit_round_interval_ms)
    }

    /// Returns [`Self::force_batch_interval_ms`] as a [`Duration`].
    #[must_use]
    pub fn force_batch_interval(&self) -> Duration {
        Duration::from_millis(self.force_batch_interval_ms)
    }

    /// Validates that the force-batch cycle evenly divides the credit
    /// cycle, as required by the tick driver (§4.L).
    pub fn validate(&self) -> Result<(), Error> {
        if self.force_batch_interval_ms == 0 || self.credit_round_interval_ms == 0 {
            return Err(Error::InvalidConfig {
                detail: "tick intervals must be non-zero".into(),
            });
        }
        if self.credit_round_interval_ms % self.force_batch_interval_ms != 0 {
            return Err(Error::InvalidConfig {
                detail: "force-batch interval must evenly divide the credit round interval"
                    .into(),
            });
        }
        Ok(())
    }
}
