/*
    Copyright (C) 2020-2023  Rafal Michalski

    This file is part of CHIPSYNTH, a Rust library for emulating sound chips.

    For the full copyright notice, see the lib.rs file.
*/
use std::sync::{Arc, OnceLock};

use chipsynth_core::error::{ConfigError, Result};
use super::Revision;

/// The default volume table seed.
pub const DEFAULT_VOLUME: f64 = 1.0;
/// The largest accepted volume table seed.
pub const MAX_VOLUME: f64 = 16.0;

/// Maps a 4-bit balance nibble to a 5-bit attenuation complement.
pub(crate) const BALANCE_SCALE: [u8; 16] = [0x00, 0x03, 0x05, 0x07, 0x09, 0x0B, 0x0D, 0x0F,
                                            0x10, 0x13, 0x15, 0x17, 0x19, 0x1B, 0x1D, 0x1F];
/// The attenuation at which a voice is silent.
pub(crate) const SILENT: u8 = 0x1F;

static DEFAULT_TABLES: [OnceLock<Arc<VolumeTables>>; 2] = [OnceLock::new(), OnceLock::new()];

/// Output levels of a single chip revision for a given volume seed.
///
/// Levels are indexed by a 5-bit attenuation (about 1.5 dB per step, `0x1F` is silence)
/// and a 5-bit waveform sample.
#[derive(Clone, Debug, PartialEq)]
pub struct VolumeTables {
    levels: [[i32; 32]; 32],
    accumulator: [i32; 32],
}

impl VolumeTables {
    /// Builds new tables for the given `revision` and volume `seed`.
    ///
    /// The `seed` must be a finite number in the range `0.0..=MAX_VOLUME`.
    pub fn new(revision: Revision, seed: f64) -> Result<Self> {
        if !seed.is_finite() || !(0.0..=MAX_VOLUME).contains(&seed) {
            return Err(ConfigError::VolumeSeed(seed))
        }
        let mut levels = [[0i32; 32]; 32];
        let mut accumulator = [0i32; 32];
        for (vl, (row, acc)) in levels.iter_mut().zip(accumulator.iter_mut()).enumerate() {
            let mut gain = seed * 8.0 / 6.0;
            if vl != 0 {
                gain /= 2.0f64.powf(vl as f64 / 4.0);
            }
            if vl == usize::from(SILENT) {
                gain = 0.0;
            }
            for (sample, level) in row.iter_mut().enumerate() {
                let sample = match revision {
                    Revision::HuC6280 => sample as f64 * 2.0,
                    Revision::HuC6280A => sample as f64 * 2.0 - 31.0,
                };
                *level = (gain * sample * 128.0) as i32;
            }
            *acc = (gain * 65536.0) as i32;
        }
        Ok(VolumeTables { levels, accumulator })
    }
    /// Returns tables shared by all chips of the same `revision` and `seed`.
    ///
    /// Tables of the default seed are built once per revision, custom seeds get fresh tables.
    #[allow(clippy::float_cmp)]
    pub fn shared(revision: Revision, seed: f64) -> Result<Arc<Self>> {
        if seed == DEFAULT_VOLUME {
            let cell = &DEFAULT_TABLES[revision as usize];
            if let Some(tables) = cell.get() {
                return Ok(Arc::clone(tables))
            }
            let tables = Arc::new(VolumeTables::new(revision, seed)?);
            return Ok(Arc::clone(cell.get_or_init(|| tables)))
        }
        VolumeTables::new(revision, seed).map(Arc::new)
    }
    /// Returns the output level of a waveform `sample` at the given `attenuation`.
    #[inline(always)]
    pub fn level(&self, attenuation: u8, sample: u8) -> i32 {
        self.levels[usize::from(attenuation & 0x1F)][usize::from(sample & 0x1F)]
    }
    /// Returns the accumulator scale at the given `attenuation` in 16.16 fixed point.
    #[inline(always)]
    pub fn accumulator_scale(&self, attenuation: u8) -> i32 {
        self.accumulator[usize::from(attenuation & 0x1F)]
    }
}

/// Returns the attenuation of one side of a voice, given the global balance,
/// the voice balance and the voice control register.
///
/// `shift` selects the nibble of balance registers: 4 for the left, 0 for the right side.
#[inline]
pub(crate) fn attenuation(global_balance: u8, balance: u8, control: u8, shift: u32) -> u8 {
    let global = SILENT - BALANCE_SCALE[usize::from((global_balance >> shift) & 0x0F)];
    let voice = SILENT - BALANCE_SCALE[usize::from((balance >> shift) & 0x0F)];
    let volume = SILENT - (control & 0x1F);
    (global + voice + volume).min(SILENT)
}
