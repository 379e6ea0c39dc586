/*
    Copyright (C) 2020-2023  Rafal Michalski

    This file is part of CHIPSYNTH, a Rust library for emulating sound chips.

    For the full copyright notice, see the lib.rs file.
*/
#[cfg(feature = "snapshot")]
use serde::{Serialize, Deserialize};

use bitflags::bitflags;

const ACC_MASK: u32 = 0xFF_FFFF;
const ACC_MSB: u32 = 0x80_0000;
const NOISE_CLOCK_BIT: u32 = 0x08_0000;
const SHIFT_MASK: u32 = 0x7F_FFFF;
/// The noise shift register after the test bit is released.
pub const SHIFT_SEED: u32 = 0x7F_FFF8;
/// The wave output at the zero crossing.
pub const WAVE_ZERO: i32 = 0x800;

bitflags! {
    /// The voice control register.
    #[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
    #[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
    #[cfg_attr(feature = "snapshot", serde(from = "u8", into = "u8"))]
    pub struct WaveControl: u8 {
        const GATE     = 0b0000_0001;
        const SYNC     = 0b0000_0010;
        const RING_MOD = 0b0000_0100;
        const TEST     = 0b0000_1000;
        const TRIANGLE = 0b0001_0000;
        const SAWTOOTH = 0b0010_0000;
        const PULSE    = 0b0100_0000;
        const NOISE    = 0b1000_0000;
    }
}

impl From<u8> for WaveControl {
    fn from(data: u8) -> Self {
        WaveControl::from_bits_retain(data)
    }
}

impl From<WaveControl> for u8 {
    fn from(flags: WaveControl) -> u8 {
        flags.bits()
    }
}

/// An oscillator with a 24-bit phase accumulator and a 23-bit noise shift register.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "snapshot", serde(rename_all = "camelCase"))]
pub struct WaveGenerator {
    accumulator: u32,
    shift_register: u32,
    frequency: u16,
    pulse_width: u16,
    control: WaveControl,
    msb_rising: bool,
}

impl Default for WaveGenerator {
    fn default() -> Self {
        WaveGenerator {
            accumulator: 0,
            shift_register: SHIFT_SEED,
            frequency: 0,
            pulse_width: 0,
            control: WaveControl::empty(),
            msb_rising: false,
        }
    }
}

impl WaveGenerator {
    #[inline]
    pub fn accumulator(&self) -> u32 {
        self.accumulator
    }
    #[inline]
    pub fn shift_register(&self) -> u32 {
        self.shift_register
    }
    #[inline]
    pub fn control(&self) -> WaveControl {
        self.control
    }
    /// Returns `true` if the accumulator's top bit went up during the last clock.
    #[inline]
    pub fn msb_rising(&self) -> bool {
        self.msb_rising
    }

    pub fn set_frequency_lo(&mut self, value: u8) {
        self.frequency = self.frequency & 0xFF00 | u16::from(value);
    }

    pub fn set_frequency_hi(&mut self, value: u8) {
        self.frequency = self.frequency & 0x00FF | u16::from(value) << 8;
    }

    pub fn set_pulse_width_lo(&mut self, value: u8) {
        self.pulse_width = self.pulse_width & 0x0F00 | u16::from(value);
    }

    pub fn set_pulse_width_hi(&mut self, value: u8) {
        self.pulse_width = self.pulse_width & 0x00FF | u16::from(value & 0x0F) << 8;
    }
    /// Writes the control register.
    ///
    /// While the test bit is set the accumulator and the shift register are held at 0,
    /// releasing it reloads the shift register.
    pub fn set_control(&mut self, value: u8) {
        let control = WaveControl::from(value);
        if control.contains(WaveControl::TEST) {
            self.accumulator = 0;
            self.shift_register = 0;
        }
        else if self.control.contains(WaveControl::TEST) {
            self.shift_register = SHIFT_SEED;
        }
        self.control = control;
    }
    /// Advances the oscillator by one cycle.
    #[inline]
    pub fn clock(&mut self) {
        if self.control.contains(WaveControl::TEST) {
            self.msb_rising = false;
            return
        }
        let prev = self.accumulator;
        self.accumulator = prev.wrapping_add(u32::from(self.frequency)) & ACC_MASK;
        self.msb_rising = prev & ACC_MSB == 0 && self.accumulator & ACC_MSB != 0;
        if prev & NOISE_CLOCK_BIT == 0 && self.accumulator & NOISE_CLOCK_BIT != 0 {
            self.clock_noise();
        }
    }
    /// Restarts the phase, used by the hard sync.
    #[inline]
    pub fn reset_phase(&mut self) {
        self.accumulator = 0;
    }

    #[inline]
    fn clock_noise(&mut self) {
        let bit = ((self.shift_register >> 22) ^ (self.shift_register >> 17)) & 1;
        self.shift_register = (self.shift_register << 1) & SHIFT_MASK | bit;
    }

    #[inline]
    fn triangle(&self, source_accumulator: u32) -> u16 {
        let msb = if self.control.contains(WaveControl::RING_MOD) {
            (self.accumulator ^ source_accumulator) & ACC_MSB
        }
        else {
            self.accumulator & ACC_MSB
        };
        let acc = if msb != 0 { !self.accumulator } else { self.accumulator };
        ((acc >> 11) & 0xFFF) as u16
    }

    #[inline]
    fn sawtooth(&self) -> u16 {
        (self.accumulator >> 12) as u16
    }

    #[inline]
    fn pulse(&self) -> u16 {
        if self.control.contains(WaveControl::TEST) ||
           (self.accumulator >> 12) as u16 >= self.pulse_width {
            0xFFF
        }
        else {
            0
        }
    }

    #[inline]
    fn noise(&self) -> u16 {
        let s = self.shift_register;
        (((s & 0x40_0000) >> 11) |
         ((s & 0x10_0000) >> 10) |
         ((s & 0x01_0000) >> 7) |
         ((s & 0x00_2000) >> 5) |
         ((s & 0x00_0800) >> 4) |
         ((s & 0x00_0080) >> 1) |
         ((s & 0x00_0010) << 1) |
         ((s & 0x00_0004) << 2)) as u16
    }
    /// Returns the 12-bit wave output.
    ///
    /// Selected waveforms are combined with a bitwise AND, no waveform gives 0.
    /// `source_accumulator` is the accumulator of the ring modulation source voice.
    pub fn output(&self, source_accumulator: u32) -> u16 {
        let control = self.control;
        let mut out = 0xFFF;
        if !control.intersects(WaveControl::TRIANGLE|WaveControl::SAWTOOTH|
                               WaveControl::PULSE|WaveControl::NOISE) {
            return 0
        }
        if control.contains(WaveControl::TRIANGLE) {
            out &= self.triangle(source_accumulator);
        }
        if control.contains(WaveControl::SAWTOOTH) {
            out &= self.sawtooth();
        }
        if control.contains(WaveControl::PULSE) {
            out &= self.pulse();
        }
        if control.contains(WaveControl::NOISE) {
            out &= self.noise();
        }
        out
    }
}
