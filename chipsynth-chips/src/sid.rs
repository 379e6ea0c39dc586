/*
    Copyright (C) 2020-2023  Rafal Michalski

    This file is part of CHIPSYNTH, a Rust library for emulating sound chips.

    For the full copyright notice, see the lib.rs file.
*/
//! A 3-voice sound chip with ADSR envelopes, in the style of the MOS 6581 SID.
//!
//! Each voice has a 24-bit phase accumulator feeding triangle, sawtooth, pulse and noise
//! waveforms, and an ADSR envelope generator. Voices can be hard synced to, or ring
//! modulated by, the previous voice (voice 0 by voice 2).
//!
//! The chip is clocked every cycle, its mono output is sampled every `sample_divisor`
//! cycles and sent to the [Blep] channel [MONO_CHANNEL]. The analog filter is not emulated,
//! its registers are only stored.
//!
//! ```text
//! address      register
//! 0x00 + 7*v   frequency, low byte
//! 0x01 + 7*v   frequency, high byte
//! 0x02 + 7*v   pulse width, low byte
//! 0x03 + 7*v   pulse width, high nibble
//! 0x04 + 7*v   control: noise, pulse, saw, triangle, test, ring mod, sync, gate
//! 0x05 + 7*v   attack (4-7), decay (0-3)
//! 0x06 + 7*v   sustain (4-7), release (0-3)
//! 0x15..=0x17  filter (stored only)
//! 0x18         voice 2 off (7), filter modes (4-6), master volume (0-3)
//! 0x19..=0x1A  paddles, read only
//! 0x1B         voice 2 waveform output, read only
//! 0x1C         voice 2 envelope, read only
//! 0x1D..=0x1F  voice volume (0-3)
//! ```
mod envelope;
mod wave;

#[cfg(feature = "snapshot")]
use serde::{Serialize, Deserialize};

#[allow(unused_imports)]
use log::{debug, trace, warn};

use chipsynth_core::audio::{Blep, FromLevel, ScopeBuffer};
use chipsynth_core::chip::{RegisterPool, SoundChip, SoundChipAudio};
use chipsynth_core::clock::FTs;
use chipsynth_core::error::{ConfigError, Result};

pub use envelope::{Envelope, EnvelopeState, RATE_COUNTER_PERIOD, MAX_VOLUME};
pub use wave::{WaveControl, WaveGenerator, SHIFT_SEED, WAVE_ZERO};

/// The number of voices.
pub const VOICES: usize = 3;
/// The clock of a PAL machine in Hz.
pub const PAL_CLOCK_HZ: u32 = 985_248;
/// The clock of an NTSC machine in Hz.
pub const NTSC_CLOCK_HZ: u32 = 1_022_727;
/// The [Blep] channel receiving the chip output.
pub const MONO_CHANNEL: usize = 2;
/// The size of the register pool.
pub const REGISTER_POOL_SIZE: usize = 0x20;
/// The default number of cycles between output samples.
pub const DEFAULT_SAMPLE_DIVISOR: u32 = 8;
/// The largest accepted number of cycles between output samples.
pub const MAX_SAMPLE_DIVISOR: u32 = 64;

const VOICE_REGS: u16 = 7;
const FILTER_REGS: core::ops::RangeInclusive<u16> = 0x15..=0x17;
const MODE_VOLUME: u16 = 0x18;
const POT_X: u16 = 0x19;
const POT_Y: u16 = 0x1A;
const OSC3: u16 = 0x1B;
const ENV3: u16 = 0x1C;
const VOICE_VOLUME: u16 = 0x1D;
const VOICE3_OFF: u8 = 0x80;
const LEVEL_SHIFT: u32 = 6;

/// The chip setup.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "snapshot", serde(default, rename_all = "camelCase"))]
pub struct SidConfig {
    /// The number of cycles between output samples, `1..=64`.
    pub sample_divisor: u32,
}

impl Default for SidConfig {
    fn default() -> Self {
        SidConfig { sample_divisor: DEFAULT_SAMPLE_DIVISOR }
    }
}

/// A single voice: an oscillator and its envelope.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
pub struct SidVoice {
    wave: WaveGenerator,
    envelope: Envelope,
}

impl SidVoice {
    #[inline]
    pub fn wave(&self) -> &WaveGenerator {
        &self.wave
    }
    #[inline]
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }
}

/// The complete state of the chip, as captured by [Sid::snapshot].
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "snapshot", serde(rename_all = "camelCase"))]
pub struct SidState {
    voices: [SidVoice; VOICES],
    mode_volume: u8,
    last_ts: FTs,
    next_sample_ts: FTs,
    last_level: i32,
    registers: RegisterPool,
}

fn power_on_registers() -> RegisterPool {
    let mut registers = RegisterPool::new(REGISTER_POOL_SIZE);
    for voice in 0..VOICES as u16 {
        registers.set(usize::from(VOICE_VOLUME + voice), MAX_VOLUME);
    }
    registers
}

impl Default for SidState {
    fn default() -> Self {
        SidState {
            voices: Default::default(),
            mode_volume: 0,
            last_ts: 0,
            next_sample_ts: 0,
            last_level: 0,
            registers: power_on_registers(),
        }
    }
}

/// The SID-style chip.
#[derive(Clone, Debug)]
pub struct Sid {
    state: SidState,
    sample_divisor: FTs,
    scopes: Vec<ScopeBuffer>,
    muted: [bool; VOICES],
}

/// Returns the index of the voice that syncs and ring modulates the voice at `index`.
#[inline]
pub fn modulator_of(index: usize) -> usize {
    (index + VOICES - 1) % VOICES
}

impl Sid {
    /// Creates a new chip instance from `config`.
    pub fn new(config: &SidConfig) -> Result<Self> {
        if !(1..=MAX_SAMPLE_DIVISOR).contains(&config.sample_divisor) {
            return Err(ConfigError::Invalid(
                format!("sample divisor {} out of range 1..={}", config.sample_divisor, MAX_SAMPLE_DIVISOR)))
        }
        debug!("SID: sample divisor: {}", config.sample_divisor);
        Ok(Sid {
            state: SidState::default(),
            sample_divisor: config.sample_divisor as FTs,
            scopes: vec![ScopeBuffer::default(); VOICES],
            muted: [false; VOICES],
        })
    }

    pub fn voice(&self, index: usize) -> Option<&SidVoice> {
        self.state.voices.get(index)
    }

    #[inline]
    pub fn master_volume(&self) -> u8 {
        self.state.mode_volume & 0x0F
    }
    /// Returns `true` if voice 2 is disconnected from the output.
    #[inline]
    pub fn is_voice3_off(&self) -> bool {
        self.state.mode_volume & VOICE3_OFF != 0
    }

    #[inline]
    pub fn last_timestamp(&self) -> FTs {
        self.state.last_ts
    }

    pub fn snapshot(&self) -> SidState {
        self.state.clone()
    }

    pub fn restore(&mut self, state: SidState) {
        debug!("SID: state restored at: {}", state.last_ts);
        self.state = state;
    }
    /// Returns the output level of a voice before the master volume.
    pub fn voice_level(&self, index: usize) -> i32 {
        let voices = &self.state.voices;
        let voice = &voices[index];
        let source = voices[modulator_of(index)].wave.accumulator();
        let wave = i32::from(voice.wave.output(source)) - WAVE_ZERO;
        (wave * i32::from(voice.envelope.output())) >> LEVEL_SHIFT
    }
    /// Advances all voices by a single cycle.
    fn clock(&mut self) {
        let voices = &mut self.state.voices;
        for voice in voices.iter_mut() {
            voice.envelope.clock();
            voice.wave.clock();
        }
        let rising = [voices[0].wave.msb_rising(),
                      voices[1].wave.msb_rising(),
                      voices[2].wave.msb_rising()];
        for (index, voice) in voices.iter_mut().enumerate() {
            if voice.wave.control().contains(WaveControl::SYNC) && rising[modulator_of(index)] {
                voice.wave.reset_phase();
            }
        }
    }

    fn emit<B: Blep>(&mut self, blep: &mut B, timestamp: FTs)
        where B::SampleDelta: FromLevel
    {
        let mut mix = 0;
        for index in 0..VOICES {
            let level = if self.muted[index] { 0 } else { self.voice_level(index) };
            self.scopes[index].put(timestamp, level);
            if !(index == VOICES - 1 && self.is_voice3_off()) {
                mix += level;
            }
        }
        let level = mix * i32::from(self.master_volume()) / i32::from(MAX_VOLUME);
        let delta = level - self.state.last_level;
        if delta != 0 {
            blep.add_step(MONO_CHANNEL, timestamp, B::SampleDelta::from_level(delta));
            self.state.last_level = level;
        }
    }

    fn advance<B: Blep>(&mut self, blep: &mut B, timestamp: FTs)
        where B::SampleDelta: FromLevel
    {
        let mut ts = self.state.last_ts;
        debug_assert!(timestamp >= ts, "SID time stamp went back: {} -> {}", ts, timestamp);
        if self.state.next_sample_ts < ts {
            self.state.next_sample_ts = ts;
        }
        while ts < timestamp {
            if ts == self.state.next_sample_ts {
                self.emit(blep, ts);
                self.state.next_sample_ts += self.sample_divisor;
            }
            let until = self.state.next_sample_ts.min(timestamp);
            while ts < until {
                self.clock();
                ts += 1;
            }
        }
        self.state.last_ts = self.state.last_ts.max(timestamp);
    }
}

impl SoundChip for Sid {
    #[inline]
    fn voice_count(&self) -> usize {
        VOICES
    }

    #[inline]
    fn register_pool(&self) -> &[u8] {
        self.state.registers.as_slice()
    }

    fn read_register(&self, addr: u16) -> u8 {
        let voice3 = &self.state.voices[VOICES - 1];
        match addr {
            POT_X|POT_Y => 0xFF,
            OSC3 => (self.voice3_wave() >> 4) as u8,
            ENV3 => voice3.envelope.counter(),
            _ => self.state.registers.get(usize::from(addr)).unwrap_or(0)
        }
    }

    fn oscilloscope(&self, voice: usize) -> Option<&ScopeBuffer> {
        self.scopes.get(voice)
    }

    fn set_voice_muted(&mut self, voice: usize, muted: bool) {
        if let Some(flag) = self.muted.get_mut(voice) {
            *flag = muted;
        }
    }

    fn is_voice_muted(&self, voice: usize) -> bool {
        self.muted.get(voice).copied().unwrap_or(false)
    }

    fn end_frame(&mut self, end_ts: FTs) {
        self.state.last_ts -= end_ts;
        self.state.next_sample_ts -= end_ts;
        for scope in self.scopes.iter_mut() {
            scope.end_frame(end_ts);
        }
    }
}

impl Sid {
    fn voice3_wave(&self) -> u16 {
        let source = self.state.voices[modulator_of(VOICES - 1)].wave.accumulator();
        self.state.voices[VOICES - 1].wave.output(source)
    }
}

impl<B: Blep> SoundChipAudio<B> for Sid where B::SampleDelta: FromLevel {
    fn run_to(&mut self, blep: &mut B, timestamp: FTs) {
        self.advance(blep, timestamp);
    }

    fn write_register(&mut self, blep: &mut B, timestamp: FTs, addr: u16, value: u8) {
        self.advance(blep, timestamp);
        let st = &mut self.state;
        match addr {
            0x00..=0x14 => {
                let voice = &mut st.voices[usize::from(addr / VOICE_REGS)];
                match addr % VOICE_REGS {
                    0 => voice.wave.set_frequency_lo(value),
                    1 => voice.wave.set_frequency_hi(value),
                    2 => voice.wave.set_pulse_width_lo(value),
                    3 => voice.wave.set_pulse_width_hi(value),
                    4 => {
                        voice.wave.set_control(value);
                        voice.envelope.set_gate(value & WaveControl::GATE.bits() != 0);
                    }
                    5 => voice.envelope.set_attack_decay(value),
                    _ => voice.envelope.set_sustain_release(value)
                }
            }
            addr if FILTER_REGS.contains(&addr) => {}
            MODE_VOLUME => st.mode_volume = value,
            0x1D..=0x1F => {
                st.voices[usize::from(addr - VOICE_VOLUME)].envelope.set_volume(value);
            }
            _ => {
                trace!("SID: write ignored: {:02x}={:02x}", addr, value);
                return
            }
        }
        st.registers.set(usize::from(addr), value);
    }

    fn power(&mut self, blep: &mut B, timestamp: FTs) {
        self.advance(blep, timestamp);
        debug!("SID: power at: {}", timestamp);
        let st = &mut self.state;
        st.voices = Default::default();
        st.mode_volume = 0;
        st.registers = power_on_registers();
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::StepRecorder;
    use super::*;

    fn write_all(sid: &mut Sid, blep: &mut StepRecorder, ts: FTs, writes: &[(u16, u8)]) {
        for &(addr, value) in writes {
            sid.write_register(blep, ts, addr, value);
        }
    }

    fn saw_voice(voice: u16) -> Vec<(u16, u8)> {
        let base = voice * VOICE_REGS;
        vec![(base + 1, 0x10), (base + 5, 0x00), (base + 6, 0xF0), (base + 4, 0x21)]
    }

    #[test]
    fn sid_config_works() {
        assert!(Sid::new(&SidConfig::default()).is_ok());
        assert!(Sid::new(&SidConfig { sample_divisor: 0 }).is_err());
        assert_eq!(Sid::new(&SidConfig { sample_divisor: 65 }).unwrap_err(),
                   ConfigError::Invalid("sample divisor 65 out of range 1..=64".into()));
        let sid = Sid::new(&SidConfig::default()).unwrap();
        assert_eq!(sid.voice_count(), 3);
        assert_eq!(sid.register_pool().len(), REGISTER_POOL_SIZE);
        assert_eq!(sid.read_register(0x1D), MAX_VOLUME);
        assert_eq!(sid.read_register(POT_X), 0xFF);
        assert_eq!(sid.read_register(0x40), 0);
        assert_eq!(modulator_of(0), 2);
        assert_eq!(modulator_of(1), 0);
        assert_eq!(modulator_of(2), 1);
    }

    #[test]
    fn sid_sawtooth_works() {
        let mut sid = Sid::new(&SidConfig::default()).unwrap();
        let mut blep = StepRecorder::default();
        write_all(&mut sid, &mut blep, 0, &saw_voice(0));
        write_all(&mut sid, &mut blep, 0, &[(MODE_VOLUME, 0x0F)]);
        sid.run_to(&mut blep, 10000);
        assert_eq!(sid.last_timestamp(), 10000);
        assert!(blep.steps.iter().all(|&(ch, ts, _)| ch == MONO_CHANNEL && ts % 8 == 0));
        assert_eq!(sid.voice(0).unwrap().envelope().counter(), 0xFF);
        assert_eq!(sid.voice(0).unwrap().envelope().state(), EnvelopeState::DecaySustain);
        // the last sample at 9992 follows 9992 cycles: saw = 1800
        assert_eq!(blep.level(MONO_CHANNEL), ((1800 - 0x800) * 0xFF) >> 6);
        let scope = sid.oscilloscope(0).unwrap();
        assert!(scope.len() > 100);
        assert!(scope.iter().all(|ev| ev.level >= -8160 && ev.level <= 8160));
        assert_eq!(sid.oscilloscope(1).unwrap().len(), 1);
    }

    #[test]
    fn sid_master_volume_works() {
        let mut sid = Sid::new(&SidConfig::default()).unwrap();
        let mut blep = StepRecorder::default();
        write_all(&mut sid, &mut blep, 0, &saw_voice(0));
        sid.run_to(&mut blep, 5000);
        assert!(blep.steps.is_empty());
        write_all(&mut sid, &mut blep, 5000, &[(MODE_VOLUME, 0x05)]);
        assert_eq!(sid.master_volume(), 5);
        sid.run_to(&mut blep, 5001);
        let level = ((((5000 % 4096) - 0x800) * 0xFF) >> 6) * 5 / 15;
        assert_eq!(&blep.steps[..], &[(MONO_CHANNEL, 5000, level)]);
    }

    #[test]
    fn sid_voice3_off_works() {
        let mut sid = Sid::new(&SidConfig::default()).unwrap();
        let mut blep = StepRecorder::default();
        write_all(&mut sid, &mut blep, 0, &saw_voice(2));
        write_all(&mut sid, &mut blep, 0, &[(MODE_VOLUME, 0x8F)]);
        assert!(sid.is_voice3_off());
        sid.run_to(&mut blep, 3000);
        assert!(blep.steps.is_empty());
        assert_eq!(sid.read_register(ENV3), 0xFF);
        assert_eq!(sid.read_register(OSC3), ((3000 * 0x1000 & 0xFF_FFFF) >> 16) as u8);
        assert!(sid.oscilloscope(2).unwrap().len() > 1);
        write_all(&mut sid, &mut blep, 3000, &[(MODE_VOLUME, 0x0F)]);
        sid.run_to(&mut blep, 3001);
        assert_eq!(blep.steps.len(), 1);
    }

    #[test]
    fn sid_hard_sync_works() {
        let mut sid = Sid::new(&SidConfig::default()).unwrap();
        let mut blep = StepRecorder::default();
        write_all(&mut sid, &mut blep, 0, &[
            (0x01, 0x80), (0x04, 0x20),
            (0x08, 0x01), (0x0B, 0x22)]);
        sid.run_to(&mut blep, 600);
        assert_eq!(sid.voice(1).unwrap().wave().accumulator(), 344 * 0x100);
        write_all(&mut sid, &mut blep, 600, &[(0x0B, 0x20)]);
        sid.run_to(&mut blep, 1000);
        assert_eq!(sid.voice(1).unwrap().wave().accumulator(), 744 * 0x100);
    }

    #[test]
    fn sid_ignores_read_only_writes() {
        let mut sid = Sid::new(&SidConfig::default()).unwrap();
        let mut blep = StepRecorder::default();
        write_all(&mut sid, &mut blep, 0, &saw_voice(2));
        sid.run_to(&mut blep, 100);
        let before = sid.snapshot();
        write_all(&mut sid, &mut blep, 100, &[(POT_X, 1), (POT_Y, 2), (OSC3, 3), (ENV3, 4), (0x20, 5), (0xFFFF, 6)]);
        assert_eq!(sid.snapshot(), before);
        assert_eq!(sid.read_register(POT_Y), 0xFF);
        write_all(&mut sid, &mut blep, 100, &[(0x16, 0x42), (0x1F, 0x37)]);
        assert_eq!(sid.read_register(0x16), 0x42);
        assert_eq!(sid.read_register(0x1F), 0x37);
        assert_eq!(sid.voice(2).unwrap().envelope().volume(), 7);
    }

    #[test]
    fn sid_mute_works() {
        let mut sid = Sid::new(&SidConfig::default()).unwrap();
        let mut blep = StepRecorder::default();
        write_all(&mut sid, &mut blep, 0, &saw_voice(0));
        write_all(&mut sid, &mut blep, 0, &[(MODE_VOLUME, 0x0F)]);
        sid.run_to(&mut blep, 4000);
        sid.set_voice_muted(0, true);
        assert!(sid.is_voice_muted(0));
        let nsteps = blep.steps.len();
        sid.run_to(&mut blep, 8000);
        assert_eq!(blep.steps.len(), nsteps + 1);
        assert_eq!(blep.steps[nsteps].1, 4000);
        assert_eq!(blep.level(MONO_CHANNEL), 0);
        assert_eq!(sid.oscilloscope(0).unwrap().iter().last().unwrap().level, 0);
    }

    #[test]
    fn sid_power_works() {
        let mut sid = Sid::new(&SidConfig::default()).unwrap();
        let mut blep = StepRecorder::default();
        write_all(&mut sid, &mut blep, 0, &saw_voice(1));
        write_all(&mut sid, &mut blep, 0, &[(MODE_VOLUME, 0x0F), (0x1E, 3)]);
        sid.run_to(&mut blep, 4000);
        sid.power(&mut blep, 4004);
        assert_eq!(sid.register_pool(), Sid::new(&SidConfig::default()).unwrap().register_pool());
        assert_eq!(sid.voice(1), Some(&SidVoice::default()));
        sid.run_to(&mut blep, 4100);
        assert_eq!(blep.level(MONO_CHANNEL), 0);
        assert_eq!(blep.steps.last().unwrap().1, 4008);
    }

    #[test]
    fn sid_frames_are_continuous() {
        let mut single = Sid::new(&SidConfig { sample_divisor: 5 }).unwrap();
        let mut framed = single.clone();
        let mut blep = StepRecorder::default();
        for sid in [&mut single, &mut framed].iter_mut() {
            write_all(sid, &mut blep, 0, &saw_voice(0));
            write_all(sid, &mut blep, 0, &[(MODE_VOLUME, 0x0F), (0x0B, 0x41), (0x0A, 0x08), (0x08, 0x33)]);
        }
        single.run_to(&mut blep, 30001);
        for _ in 0..3 {
            framed.run_to(&mut blep, 10000);
            framed.end_frame(10000);
        }
        framed.run_to(&mut blep, 1);
        for voice in 0..VOICES {
            let a: Vec<_> = single.oscilloscope(voice).unwrap().iter().collect();
            let b: Vec<_> = framed.oscilloscope(voice).unwrap().iter().collect();
            assert_eq!(a, b);
        }
        assert_eq!(single.voice(1), framed.voice(1));
    }

    #[test]
    fn sid_is_deterministic() {
        let run = || {
            let mut sid = Sid::new(&SidConfig::default()).unwrap();
            let mut blep = StepRecorder::default();
            write_all(&mut sid, &mut blep, 0, &saw_voice(0));
            write_all(&mut sid, &mut blep, 10, &[(MODE_VOLUME, 0x0F), (0x0F, 0x31), (0x12, 0x81), (0x13, 0x29)]);
            write_all(&mut sid, &mut blep, 20000, &[(0x04, 0x20), (0x12, 0x80)]);
            sid.run_to(&mut blep, 50000);
            blep
        };
        let a = run();
        assert!(a.steps.len() > 100);
        assert_eq!(a, run());
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "time stamp went back")]
    fn sid_panics_on_backward_time() {
        let mut sid = Sid::new(&SidConfig::default()).unwrap();
        let mut blep = StepRecorder::default();
        sid.run_to(&mut blep, 100);
        sid.run_to(&mut blep, 99);
    }

    #[cfg(feature = "snapshot")]
    #[test]
    fn sid_snapshot_works() {
        let mut sid = Sid::new(&SidConfig::default()).unwrap();
        let mut blep = StepRecorder::default();
        write_all(&mut sid, &mut blep, 0, &saw_voice(0));
        write_all(&mut sid, &mut blep, 0, &[(MODE_VOLUME, 0x0F), (0x12, 0x81), (0x0F, 0x10)]);
        sid.run_to(&mut blep, 7777);
        let json = serde_json::to_string(&sid.snapshot()).unwrap();
        let state: SidState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, sid.snapshot());
        let bin = bincode::serialize(&state).unwrap();
        let state: SidState = bincode::deserialize(&bin).unwrap();
        let mut restored = Sid::new(&SidConfig::default()).unwrap();
        restored.restore(state);
        let mut blep_a = StepRecorder::default();
        let mut blep_b = StepRecorder::default();
        sid.run_to(&mut blep_a, 20000);
        restored.run_to(&mut blep_b, 20000);
        assert_eq!(blep_a, blep_b);
        let config: SidConfig = serde_json::from_str(r#"{"sampleDivisor":4}"#).unwrap();
        assert_eq!(config.sample_divisor, 4);
    }
}
