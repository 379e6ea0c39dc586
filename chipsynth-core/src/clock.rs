/*
    Copyright (C) 2020-2023  Rafal Michalski

    This file is part of CHIPSYNTH, a Rust library for emulating sound chips.

    For the full copyright notice, see the lib.rs file.
*/
//! Chip clock time stamps and the conversion between chip ticks and host audio samples.
#[cfg(feature = "snapshot")]
use serde::{Serialize, Deserialize};

use crate::error::{ConfigError, Result};

/// A linear chip clock time stamp, counted in ticks of the chip input clock.
///
/// Time stamps are relative to the beginning of the current render frame and may be
/// negative only transiently, never when passed to a chip.
pub type FTs = i32;

/// The relation between the chip clock and the host audio sample rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "snapshot", serde(rename_all = "camelCase"))]
pub struct TimeRate {
    sample_rate: u32,
    clock_hz: u32,
}

impl TimeRate {
    /// Creates a new instance from the host `sample_rate` and the chip `clock_hz`.
    ///
    /// Returns an error if any of the rates is 0 or if the chip clock is slower than the host rate.
    pub fn new(sample_rate: u32, clock_hz: u32) -> Result<Self> {
        if sample_rate == 0 || clock_hz == 0 {
            return Err(ConfigError::ZeroRate)
        }
        if clock_hz < sample_rate {
            return Err(ConfigError::ClockBelowHostRate { clock: clock_hz, host: sample_rate })
        }
        Ok(TimeRate { sample_rate, clock_hz })
    }
    /// Returns the host sample rate in Hz.
    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
    /// Returns the chip clock rate in Hz.
    #[inline]
    pub fn clock_hz(&self) -> u32 {
        self.clock_hz
    }
    /// Returns the fraction of an audio sample that passes during one chip tick.
    #[inline]
    pub fn samples_per_tick(&self) -> f64 {
        self.sample_rate as f64 / self.clock_hz as f64
    }
    /// Returns the number of chip ticks per one audio sample.
    #[inline]
    pub fn ticks_per_sample(&self) -> f64 {
        self.clock_hz as f64 / self.sample_rate as f64
    }
    /// Returns the smallest number of chip ticks covering `nsamples` audio samples.
    pub fn ticks_for_samples(&self, nsamples: usize) -> FTs {
        let ticks = (nsamples as u64 * self.clock_hz as u64 + self.sample_rate as u64 - 1)
                    / self.sample_rate as u64;
        ticks as FTs
    }
}
