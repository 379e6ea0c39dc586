/*
    Copyright (C) 2020-2023  Rafal Michalski

    This file is part of CHIPSYNTH, a Rust library for emulating sound chips.

    For the full copyright notice, see the lib.rs file.
*/
#[cfg(feature = "snapshot")]
use serde::{Serialize, Deserialize};

/// Envelope rate periods in cycles, indexed by the 4-bit attack, decay or release value.
pub const RATE_COUNTER_PERIOD: [u16; 16] = [9, 32, 63, 95, 149, 220, 267, 313,
                                            392, 977, 1954, 3126, 3907, 11720, 19532, 31251];
/// The maximum per-voice volume.
pub const MAX_VOLUME: u8 = 0x0F;

/// The phase of an ADSR envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
pub enum EnvelopeState {
    Attack,
    DecaySustain,
    Release,
}

/// Returns the exponential counter period that takes effect when the envelope
/// reaches `counter`, if it changes there.
#[inline]
fn exponential_period(counter: u8) -> Option<u8> {
    match counter {
        0xFF => Some(1),
        0x5D => Some(2),
        0x36 => Some(4),
        0x1A => Some(8),
        0x0E => Some(16),
        0x06 => Some(30),
        0x00 => Some(1),
        _ => None
    }
}

/// An ADSR envelope generator.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "snapshot", serde(rename_all = "camelCase"))]
pub struct Envelope {
    rate_counter: u16,
    rate_period: u16,
    exp_counter: u8,
    exp_period: u8,
    counter: u8,
    hold_zero: bool,
    state: EnvelopeState,
    attack: u8,
    decay: u8,
    sustain: u8,
    release: u8,
    gate: bool,
    volume: u8,
}

impl Default for Envelope {
    fn default() -> Self {
        Envelope {
            rate_counter: 0,
            rate_period: RATE_COUNTER_PERIOD[0],
            exp_counter: 0,
            exp_period: 1,
            counter: 0,
            hold_zero: true,
            state: EnvelopeState::Release,
            attack: 0,
            decay: 0,
            sustain: 0,
            release: 0,
            gate: false,
            volume: MAX_VOLUME,
        }
    }
}

impl Envelope {
    #[inline]
    pub fn state(&self) -> EnvelopeState {
        self.state
    }
    /// Returns the raw 8-bit envelope counter.
    #[inline]
    pub fn counter(&self) -> u8 {
        self.counter
    }
    #[inline]
    pub fn is_frozen(&self) -> bool {
        self.hold_zero
    }
    #[inline]
    pub fn volume(&self) -> u8 {
        self.volume
    }
    /// Returns the envelope counter scaled by the voice volume.
    #[inline]
    pub fn output(&self) -> u8 {
        (u32::from(self.counter) * u32::from(self.volume) / u32::from(MAX_VOLUME)) as u8
    }

    pub fn set_volume(&mut self, volume: u8) {
        self.volume = volume & MAX_VOLUME;
    }
    /// Starts the attack on the gate's rising edge or the release on its falling edge.
    pub fn set_gate(&mut self, gate: bool) {
        if !self.gate && gate {
            self.state = EnvelopeState::Attack;
            self.rate_period = RATE_COUNTER_PERIOD[usize::from(self.attack)];
            self.hold_zero = false;
        }
        else if self.gate && !gate {
            self.state = EnvelopeState::Release;
            self.rate_period = RATE_COUNTER_PERIOD[usize::from(self.release)];
        }
        self.gate = gate;
    }

    pub fn set_attack_decay(&mut self, value: u8) {
        self.attack = value >> 4;
        self.decay = value & 0x0F;
        match self.state {
            EnvelopeState::Attack => {
                self.rate_period = RATE_COUNTER_PERIOD[usize::from(self.attack)];
            }
            EnvelopeState::DecaySustain => {
                self.rate_period = RATE_COUNTER_PERIOD[usize::from(self.decay)];
            }
            EnvelopeState::Release => {}
        }
    }

    pub fn set_sustain_release(&mut self, value: u8) {
        self.sustain = value >> 4;
        self.release = value & 0x0F;
        if self.state == EnvelopeState::Release {
            self.rate_period = RATE_COUNTER_PERIOD[usize::from(self.release)];
        }
    }
    /// Advances the envelope by one cycle.
    pub fn clock(&mut self) {
        if self.rate_counter < self.rate_period {
            self.rate_counter += 1;
        }
        // a lowered period catches up at once
        if self.rate_counter > self.rate_period {
            self.rate_counter = self.rate_period;
        }
        if self.rate_counter != self.rate_period {
            return
        }
        self.rate_counter = 0;

        if self.state != EnvelopeState::Attack {
            self.exp_counter = self.exp_counter.wrapping_add(1);
            if self.exp_counter != self.exp_period {
                return
            }
        }
        self.exp_counter = 0;
        if self.hold_zero {
            return
        }
        match self.state {
            EnvelopeState::Attack => {
                self.counter = self.counter.wrapping_add(1);
                if self.counter == 0xFF {
                    self.state = EnvelopeState::DecaySustain;
                    self.rate_period = RATE_COUNTER_PERIOD[usize::from(self.decay)];
                }
            }
            EnvelopeState::DecaySustain => {
                if self.counter != self.sustain * 0x11 {
                    self.counter -= 1;
                }
            }
            EnvelopeState::Release => {
                self.counter = self.counter.wrapping_sub(1);
            }
        }
        if let Some(period) = exponential_period(self.counter) {
            self.exp_period = period;
            if self.counter == 0 {
                self.hold_zero = true;
            }
        }
    }
}
