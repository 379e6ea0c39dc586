/*
    Copyright (C) 2020-2023  Rafal Michalski

    This file is part of CHIPSYNTH, a Rust library for emulating sound chips.

    For the full copyright notice, see the lib.rs file.
*/
use core::fmt;

#[cfg(feature = "snapshot")]
use serde::{Serialize, Deserialize};

use bitflags::bitflags;

use chipsynth_core::clock::FTs;
use super::Revision;
use super::tables::{VolumeTables, SILENT};

/// The number of samples in a voice waveform.
pub const WAVE_SIZE: usize = 32;
/// Periods up to this value are advanced in a single step and make a keyed voice an accumulator.
pub const FAST_PATH_CUTOFF: FTs = 7;
/// The period of a voice with the frequency register set to 0.
pub const MAX_PERIOD: FTs = 4096 << 1;
/// The voice whose period is biased by the LFO.
pub const LFO_CARRIER: usize = 0;
/// The voice used as the LFO.
pub const LFO_MODULATOR: usize = 1;
/// The first voice with a noise generator.
pub const FIRST_NOISE_VOICE: usize = 4;
/// The value of the noise shift register after power on.
pub const LFSR_SEED: u32 = 1;

const WAVE_MASK: u8 = (WAVE_SIZE - 1) as u8;
const LFSR_MASK: u32 = 0x3FFFF;

bitflags! {
    /// The voice control register: key-on and DDA flags, the remaining bits hold the volume.
    #[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
    #[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
    #[cfg_attr(feature = "snapshot", serde(from = "u8", into = "u8"))]
    pub struct VoiceControl: u8 {
        const KEY_ON = 0b1000_0000;
        const DDA    = 0b0100_0000;
    }
}

bitflags! {
    /// The noise control register: the enable flag, the remaining bits hold the noise frequency.
    #[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
    #[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
    #[cfg_attr(feature = "snapshot", serde(from = "u8", into = "u8"))]
    pub struct NoiseControl: u8 {
        const ENABLE = 0b1000_0000;
    }
}

impl VoiceControl {
    #[inline]
    pub fn volume(self) -> u8 {
        self.bits() & 0x1F
    }
    #[inline]
    pub fn is_clocked(self) -> bool {
        self & (VoiceControl::KEY_ON|VoiceControl::DDA) == VoiceControl::KEY_ON
    }
}

impl NoiseControl {
    #[inline]
    pub fn frequency(self) -> u8 {
        self.bits() & 0x1F
    }
}

impl From<u8> for VoiceControl {
    fn from(data: u8) -> Self {
        VoiceControl::from_bits_retain(data)
    }
}

impl From<VoiceControl> for u8 {
    fn from(flags: VoiceControl) -> u8 {
        flags.bits()
    }
}

impl From<u8> for NoiseControl {
    fn from(data: u8) -> Self {
        NoiseControl::from_bits_retain(data)
    }
}

impl From<NoiseControl> for u8 {
    fn from(flags: NoiseControl) -> u8 {
        flags.bits()
    }
}

/// How a voice produces its output level.
///
/// Selected after every write that may change it, never on the sample path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
pub enum OutputMode {
    /// The voice is silent.
    Off,
    /// The noise generator overrides the waveform.
    Noise,
    /// The waveform is stepped faster than it can be heard, the voice outputs its sum.
    Accumulate,
    /// The current waveform sample or DDA latch.
    Norm,
}

impl Default for OutputMode {
    fn default() -> Self {
        OutputMode::Off
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputMode::Off => "off",
            OutputMode::Noise => "noise",
            OutputMode::Accumulate => "accumulate",
            OutputMode::Norm => "norm"
        })
    }
}

/// Returns the period of a voice in chip ticks.
///
/// The LFO carrier's frequency is biased by the modulator's latched sample and the
/// modulator's period is multiplied by the LFO frequency, when the LFO depth is not 0.
pub fn period_cache(
        index: usize,
        frequency: u16,
        lfo_control: u8,
        lfo_freq: u8,
        modulator_latch: u8
    ) -> FTs
{
    let depth = lfo_control & 3;
    if index == LFO_CARRIER && depth != 0 {
        let shift = u32::from(depth - 1) << 1;
        let bias = u32::from(modulator_latch).wrapping_sub(0x10) << shift;
        let freq = (u32::from(frequency).wrapping_add(bias) & 0xFFF) as FTs;
        (if freq == 0 { 4096 } else { freq }) << 1
    }
    else {
        let freq = FTs::from(frequency & 0xFFF);
        let period = (if freq == 0 { 4096 } else { freq }) << 1;
        if index == LFO_MODULATOR && depth != 0 {
            period * if lfo_freq == 0 { 256 } else { FTs::from(lfo_freq) }
        }
        else {
            period
        }
    }
}

/// Returns the noise generator period in chip ticks.
pub fn noise_period(noise_control: NoiseControl) -> FTs {
    let freq = FTs::from(0x1F - noise_control.frequency());
    (if freq == 0 { 0x20 } else { freq << 6 }) << 1
}

/// Returns the next state of the 18-bit noise shift register.
#[inline]
pub fn clock_lfsr(lfsr: u32) -> u32 {
    let bit = (lfsr ^ lfsr >> 1 ^ lfsr >> 11 ^ lfsr >> 12 ^ lfsr >> 17) & 1;
    (lfsr >> 1 | bit << 17) & LFSR_MASK
}

/// A single HuC6280 PSG voice.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "snapshot", serde(rename_all = "camelCase"))]
pub struct Voice {
    pub frequency: u16,
    pub control: VoiceControl,
    pub balance: u8,
    pub waveform: [u8; WAVE_SIZE],
    pub wave_index: u8,
    pub dda: u8,
    pub noise_control: NoiseControl,
    pub noise_period: FTs,
    pub noise_count: FTs,
    pub lfsr: u32,
    pub period: FTs,
    pub counter: FTs,
    pub accum: i32,
    pub mode: OutputMode,
    /// Latched attenuation: `[left, right]`.
    pub attenuation: [u8; 2],
    pub last_ts: FTs,
    pub last_levels: [i32; 2],
}

impl Default for Voice {
    fn default() -> Self {
        let noise_control = NoiseControl::default();
        Voice {
            frequency: 0,
            control: VoiceControl::default(),
            balance: 0,
            waveform: [0; WAVE_SIZE],
            wave_index: 0,
            dda: 0,
            noise_control,
            noise_period: noise_period(noise_control),
            noise_count: 1,
            lfsr: LFSR_SEED,
            period: MAX_PERIOD,
            counter: MAX_PERIOD,
            accum: 0,
            mode: OutputMode::Off,
            attenuation: [SILENT; 2],
            last_ts: 0,
            last_levels: [0; 2],
        }
    }
}

impl Voice {
    /// Restores power-on defaults, preserving the time stamp and the last emitted levels.
    pub fn power(&mut self) {
        *self = Voice {
            last_ts: self.last_ts,
            last_levels: self.last_levels,
            ..Voice::default()
        };
    }

    #[inline]
    pub fn step_wave(&mut self) {
        self.wave_index = (self.wave_index + 1) & WAVE_MASK;
        self.dda = self.waveform[usize::from(self.wave_index)];
    }

    /// Advances the waveform by all periods that elapsed, at once.
    ///
    /// Leaves the counter positive with the same wave index as stepping period by period would.
    #[inline]
    pub fn skip_periods(&mut self) {
        if self.counter <= 0 {
            let steps = (-self.counter) / self.period + 1;
            self.counter += steps * self.period;
            self.wave_index = (self.wave_index + (steps & FTs::from(WAVE_MASK)) as u8) & WAVE_MASK;
            self.dda = self.waveform[usize::from(self.wave_index)];
        }
    }

    #[inline]
    pub fn clock_noise(&mut self) {
        self.lfsr = clock_lfsr(self.lfsr);
    }

    pub fn set_noise_control(&mut self, value: u8) {
        self.noise_control = NoiseControl::from(value);
        self.noise_period = noise_period(self.noise_control);
    }

    /// Writes the control register.
    ///
    /// Leaving the DDA mode rewinds the waveform and re-arms the counter, keying on
    /// outside of the DDA mode advances the waveform by one sample.
    pub fn write_control(&mut self, value: u8) {
        let control = VoiceControl::from(value);
        if self.control.contains(VoiceControl::DDA) && !control.contains(VoiceControl::DDA) {
            self.wave_index = 0;
            self.dda = self.waveform[0];
            self.counter = self.period;
        }
        if !self.control.contains(VoiceControl::KEY_ON) && control.is_clocked() {
            self.step_wave();
        }
        self.control = control;
    }

    /// Writes the waveform data register.
    pub fn write_wave(&mut self, value: u8) {
        let value = value & 0x1F;
        if !self.control.contains(VoiceControl::DDA) {
            let index = usize::from(self.wave_index);
            self.poke(index, value);
        }
        if !self.control.intersects(VoiceControl::KEY_ON|VoiceControl::DDA) {
            self.wave_index = (self.wave_index + 1) & WAVE_MASK;
        }
        if self.control.contains(VoiceControl::KEY_ON) {
            self.dda = value;
        }
    }

    /// Replaces a waveform sample, keeping the accumulator in sync.
    #[inline]
    pub fn poke(&mut self, index: usize, value: u8) {
        let slot = &mut self.waveform[index & usize::from(WAVE_MASK)];
        self.accum += i32::from(value & 0x1F) - i32::from(*slot);
        *slot = value & 0x1F;
    }

    /// Selects the output mode from the current registers.
    pub fn output_mode(&self, index: usize, revision: Revision, lfo_control: u8) -> OutputMode {
        let control = self.control;
        let off = match revision {
            Revision::HuC6280 => !control.contains(VoiceControl::KEY_ON),
            Revision::HuC6280A => !control.intersects(VoiceControl::KEY_ON|VoiceControl::DDA)
        };
        if off {
            OutputMode::Off
        }
        else if self.noise_control.contains(NoiseControl::ENABLE) &&
                control.contains(VoiceControl::KEY_ON) {
            OutputMode::Noise
        }
        else if control.is_clocked() && self.period <= FAST_PATH_CUTOFF &&
                !(index == LFO_MODULATOR && lfo_control & 0x80 != 0) {
            OutputMode::Accumulate
        }
        else {
            OutputMode::Norm
        }
    }

    /// Returns `[left, right]` output levels.
    pub fn levels(&self, tables: &VolumeTables, revision: Revision) -> [i32; 2] {
        let [left, right] = self.attenuation;
        match self.mode {
            OutputMode::Off => [0, 0],
            OutputMode::Norm => {
                [tables.level(left, self.dda), tables.level(right, self.dda)]
            }
            OutputMode::Noise => {
                let sample = if self.lfsr & 1 != 0 { 0x1F } else { 0 };
                [tables.level(left, sample), tables.level(right, sample)]
            }
            OutputMode::Accumulate => {
                let accum = match revision {
                    Revision::HuC6280 => self.accum,
                    Revision::HuC6280A => self.accum - 496
                };
                [(tables.accumulator_scale(left) * accum) >> 13,
                 (tables.accumulator_scale(right) * accum) >> 13]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng};
    use rand::rngs::SmallRng;
    use super::*;

    fn step_naive(voice: &mut Voice) {
        while voice.counter <= 0 {
            voice.step_wave();
            voice.counter += voice.period;
        }
    }

    fn random_voice(rng: &mut SmallRng, period: FTs) -> Voice {
        let mut voice = Voice::default();
        for (i, sample) in voice.waveform.iter_mut().enumerate() {
            *sample = (i as u8 * 7 + rng.gen_range(0..3)) & 0x1F;
        }
        voice.wave_index = rng.gen_range(0..32);
        voice.period = period;
        voice.counter = rng.gen_range(1..=period);
        voice
    }

    #[test]
    fn skip_periods_matches_stepping() {
        let mut rng = SmallRng::seed_from_u64(6280);
        for period in (1..=FAST_PATH_CUTOFF).chain([8, 200, 8192].iter().copied()) {
            let mut elapsed_cases = vec![0, period - 1, period, 10*period + 3, 32*period + 1];
            for _ in 0..50 {
                elapsed_cases.push(rng.gen_range(0..=100*period));
            }
            for elapsed in elapsed_cases {
                let mut fast = random_voice(&mut rng, period);
                let mut naive = fast.clone();
                fast.counter -= elapsed;
                naive.counter -= elapsed;
                fast.skip_periods();
                step_naive(&mut naive);
                assert_eq!(fast.counter, naive.counter, "period: {} elapsed: {}", period, elapsed);
                assert_eq!(fast.wave_index, naive.wave_index, "period: {} elapsed: {}", period, elapsed);
                assert_eq!(fast.dda, naive.dda);
                assert!(fast.counter > 0 && fast.counter <= period);
            }
        }
    }

    #[test]
    fn period_cache_works() {
        assert_eq!(period_cache(0, 0, 0, 0, 0), MAX_PERIOD);
        assert_eq!(period_cache(3, 0, 0, 0, 0), MAX_PERIOD);
        assert_eq!(period_cache(2, 100, 0, 0, 0), 200);
        assert_eq!(period_cache(2, 0xFFF, 0, 0, 0), 0x1FFE);
        // modulator multiplied by the LFO frequency
        assert_eq!(period_cache(LFO_MODULATOR, 100, 1, 0, 0), 200 * 256);
        assert_eq!(period_cache(LFO_MODULATOR, 100, 1, 3, 0), 600);
        assert_eq!(period_cache(LFO_MODULATOR, 100, 0x80, 3, 0), 200);
        // carrier biased by the modulator's latch
        assert_eq!(period_cache(LFO_CARRIER, 100, 1, 0, 0x10), 200);
        assert_eq!(period_cache(LFO_CARRIER, 100, 1, 0, 0x11), 202);
        assert_eq!(period_cache(LFO_CARRIER, 100, 2, 0, 0x11), 208);
        assert_eq!(period_cache(LFO_CARRIER, 100, 3, 0, 0x11), 232);
        assert_eq!(period_cache(LFO_CARRIER, 100, 1, 0, 0x00), 168);
        assert_eq!(period_cache(LFO_CARRIER, 0x10, 1, 0, 0x00), MAX_PERIOD);
        assert_eq!(period_cache(LFO_CARRIER, 0x08, 1, 0, 0x00), (0xFF8 << 1));
        for latch in 0..32 {
            for depth in 0..4 {
                let period = period_cache(LFO_CARRIER, 0, depth, 0, latch);
                assert!(period > 0 && period <= MAX_PERIOD);
            }
        }
    }

    #[test]
    fn noise_period_works() {
        assert_eq!(noise_period(NoiseControl::from(0x00)), 0x1F << 7);
        assert_eq!(noise_period(NoiseControl::from(0x9E)), 1 << 7);
        assert_eq!(noise_period(NoiseControl::from(0x9F)), 0x40);
        assert_eq!(noise_period(NoiseControl::from(0x1F)), 0x40);
    }

    #[test]
    fn lfsr_sequence_works() {
        // bit-serial reference: taps at 0, 1, 11, 12 and 17 feed bit 17 of the shifted register
        let mut bits = [0u8; 18];
        bits[0] = 1;
        let mut lfsr = LFSR_SEED;
        let mut seq = Vec::new();
        for _ in 0..1000 {
            let feed = bits[0] ^ bits[1] ^ bits[11] ^ bits[12] ^ bits[17];
            bits.rotate_left(1);
            bits[17] = feed;
            lfsr = clock_lfsr(lfsr);
            let expected = bits.iter().rev().fold(0u32, |acc, &b| acc << 1 | u32::from(b));
            assert_eq!(lfsr, expected);
            seq.push(lfsr & 1);
        }
        assert!(seq[..17].iter().all(|&bit| bit == 0));
        assert_eq!(seq[17], 1);
        assert_eq!(clock_lfsr(LFSR_SEED), 1 << 17);
        assert_eq!(clock_lfsr(1 << 17), 1 << 16 | 1 << 17);
        assert_eq!(clock_lfsr(0), 0);
    }

    #[test]
    fn control_writes_work() {
        let mut voice = Voice::default();
        for i in 0..WAVE_SIZE as u8 {
            voice.write_wave(i | 0xE0);
        }
        assert_eq!(voice.wave_index, 0);
        assert_eq!(voice.accum, (0..32).sum::<i32>());
        assert_eq!(voice.waveform[31], 31);
        voice.write_control(0x9F);
        assert_eq!(voice.wave_index, 1);
        assert_eq!(voice.dda, 1);
        assert_eq!(voice.control.volume(), 0x1F);
        voice.write_wave(5);
        assert_eq!(voice.waveform[1], 5);
        assert_eq!(voice.dda, 5);
        assert_eq!(voice.wave_index, 1);
        assert_eq!(voice.accum, (0..32).sum::<i32>() - 1 + 5);
        // DDA: the latch follows writes, the waveform stays
        voice.write_control(0xDF);
        voice.write_wave(0x1E);
        assert_eq!(voice.dda, 0x1E);
        assert_eq!(voice.waveform[1], 5);
        voice.counter = 3;
        voice.write_control(0x9F);
        assert_eq!(voice.wave_index, 0);
        assert_eq!(voice.dda, 0);
        assert_eq!(voice.counter, voice.period);
        voice.poke(33, 0x3F);
        assert_eq!(voice.waveform[1], 0x1F);
    }

    #[test]
    fn output_mode_works() {
        let mut voice = Voice::default();
        assert_eq!(voice.output_mode(0, Revision::HuC6280, 0), OutputMode::Off);
        voice.control = VoiceControl::DDA;
        assert_eq!(voice.output_mode(0, Revision::HuC6280, 0), OutputMode::Off);
        assert_eq!(voice.output_mode(0, Revision::HuC6280A, 0), OutputMode::Norm);
        voice.control = VoiceControl::KEY_ON;
        assert_eq!(voice.output_mode(0, Revision::HuC6280, 0), OutputMode::Norm);
        voice.period = FAST_PATH_CUTOFF;
        assert_eq!(voice.output_mode(0, Revision::HuC6280, 0), OutputMode::Accumulate);
        assert_eq!(voice.output_mode(LFO_MODULATOR, Revision::HuC6280, 0x80), OutputMode::Norm);
        voice.set_noise_control(0x80);
        assert_eq!(voice.output_mode(4, Revision::HuC6280, 0), OutputMode::Noise);
        assert_eq!(OutputMode::Accumulate.to_string(), "accumulate");
    }

    #[test]
    fn levels_work() {
        let tables = VolumeTables::new(Revision::HuC6280, 1.0).unwrap();
        let mut voice = Voice::default();
        voice.attenuation = [0, 4];
        voice.dda = 31;
        voice.mode = OutputMode::Norm;
        assert_eq!(voice.levels(&tables, Revision::HuC6280), [10581, 5290]);
        voice.mode = OutputMode::Off;
        assert_eq!(voice.levels(&tables, Revision::HuC6280), [0, 0]);
        voice.mode = OutputMode::Noise;
        voice.lfsr = 2;
        assert_eq!(voice.levels(&tables, Revision::HuC6280), [0, 0]);
        voice.lfsr = 3;
        assert_eq!(voice.levels(&tables, Revision::HuC6280), [10581, 5290]);
        voice.mode = OutputMode::Accumulate;
        voice.accum = 992;
        assert_eq!(voice.levels(&tables, Revision::HuC6280), [(87381 * 992) >> 13, (43690 * 992) >> 13]);
        let tables = VolumeTables::new(Revision::HuC6280A, 1.0).unwrap();
        voice.accum = 496;
        assert_eq!(voice.levels(&tables, Revision::HuC6280A), [0, 0]);
    }

    #[test]
    fn power_keeps_time() {
        let mut voice = Voice::default();
        voice.last_ts = 1234;
        voice.last_levels = [5, -5];
        voice.write_control(0x9F);
        voice.lfsr = 77;
        voice.power();
        assert_eq!(voice, Voice { last_ts: 1234, last_levels: [5, -5], ..Voice::default() });
        assert_eq!(voice.attenuation, [SILENT; 2]);
        assert_eq!(voice.counter, MAX_PERIOD);
    }
}
