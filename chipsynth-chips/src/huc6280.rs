/*
    Copyright (C) 2020-2023  Rafal Michalski

    This file is part of CHIPSYNTH, a Rust library for emulating sound chips.

    For the full copyright notice, see the lib.rs file.
*/
//! The emulation of the HuC6280 programmable sound generator.
//!
//! The PSG has 6 wavetable voices with 32 5-bit samples each. Voices 4 and 5 can
//! switch to a noise generator, voice 1 can frequency modulate voice 0 (the LFO) and every
//! voice can bypass its waveform and output a directly written sample (the DDA mode).
//!
//! Registers, as seen at address `A & 0x0F`:
//!
//! ```text
//! A   register
//! 0   voice select
//! 1   global balance: left volume (bits 4-7), right volume (bits 0-3)
//! 2   frequency, low 8 bits        (per voice)
//! 3   frequency, high 4 bits       (per voice)
//! 4   key on (7), DDA (6), volume (0-4)   (per voice)
//! 5   balance: left (4-7), right (0-3)    (per voice)
//! 6   waveform data (0-4)          (per voice)
//! 7   noise enable (7), noise frequency (0-4)  (voices 4 and 5)
//! 8   LFO frequency
//! 9   LFO trigger (7), LFO depth (0-1)
//! ```
//!
//! Both stereo sides are sent to the [Blep] channels `0` (left) and `1` (right).
mod tables;
mod voice;

use core::fmt;
use std::sync::Arc;

#[cfg(feature = "snapshot")]
use serde::{Serialize, Deserialize};

#[allow(unused_imports)]
use log::{debug, trace, warn};

use chipsynth_core::audio::{Blep, FromLevel, ScopeBuffer};
use chipsynth_core::chip::{RegisterPool, SoundChip, SoundChipAudio};
use chipsynth_core::clock::FTs;
use chipsynth_core::error::{ConfigError, Result};

pub use tables::{VolumeTables, DEFAULT_VOLUME, MAX_VOLUME};
pub use voice::{
    OutputMode, VoiceControl, NoiseControl,
    WAVE_SIZE, FAST_PATH_CUTOFF, MAX_PERIOD, LFO_CARRIER, LFO_MODULATOR, FIRST_NOISE_VOICE, LFSR_SEED,
    period_cache, noise_period, clock_lfsr
};
use tables::attenuation;
use voice::Voice;

/// The number of voices of the chip.
pub const VOICES: usize = 6;
/// The PSG clock of the PC Engine in Hz.
pub const CLOCK_HZ: u32 = 3_579_545;
/// The size of the register pool: 16 global registers followed by 16 registers of each voice.
pub const REGISTER_POOL_SIZE: usize = 0x10 + VOICES * 0x10;

const VOLUME_READ_TICKS: FTs = 255;
const VOLUME_APPLY_TICKS: FTs = 1;
const VOLUME_SCAN_SLOTS: u8 = 0x20;

/// The hardware revision of the chip.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
pub enum Revision {
    /// The original chip: unsigned samples, silent unless keyed on.
    HuC6280 = 0,
    /// The revised chip: samples centered around 0, voices in the DDA mode are heard even
    /// when keyed off.
    HuC6280A = 1,
}

impl Default for Revision {
    fn default() -> Self {
        Revision::HuC6280
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Revision::HuC6280 => "HuC6280",
            Revision::HuC6280A => "HuC6280A"
        })
    }
}

/// The chip setup.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "snapshot", serde(default, rename_all = "camelCase"))]
pub struct PsgConfig {
    pub revision: Revision,
    /// Limits the number of voices, `None` means all 6.
    pub voices: Option<usize>,
    /// Scales the volume tables, `1.0` by default.
    pub volume: f64,
}

impl Default for PsgConfig {
    fn default() -> Self {
        PsgConfig { revision: Revision::default(), voices: None, volume: DEFAULT_VOLUME }
    }
}

/// Internal registers accessible to debuggers with [HuC6280::get_register] and [HuC6280::set_register].
///
/// Per-voice registers carry the voice index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PsgRegister {
    Select,
    GlobalBalance,
    LfoFrequency,
    LfoControl,
    Frequency(usize),
    Control(usize),
    Balance(usize),
    WaveIndex(usize),
    SampleLatch(usize),
    NoiseControl(usize),
    Lfsr(usize),
}

/// The complete state of the chip, as captured by [HuC6280::snapshot].
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "snapshot", serde(rename_all = "camelCase"))]
pub struct PsgState {
    select: u8,
    global_balance: u8,
    lfo_freq: u8,
    lfo_control: u8,
    voices: [Voice; VOICES],
    vol_pending: bool,
    vol_update_counter: FTs,
    vol_update_which: u8,
    vol_update_latch: u8,
    last_ts: FTs,
    registers: RegisterPool,
}

impl Default for PsgState {
    fn default() -> Self {
        PsgState {
            select: 0,
            global_balance: 0,
            lfo_freq: 0,
            lfo_control: 0,
            voices: Default::default(),
            vol_pending: false,
            vol_update_counter: 0,
            vol_update_which: 0,
            vol_update_latch: 0,
            last_ts: 0,
            registers: RegisterPool::new(REGISTER_POOL_SIZE),
        }
    }
}

/// The HuC6280 PSG.
///
/// Create with [HuC6280::new]. The chip starts in its power-on state.
#[derive(Clone, Debug)]
pub struct HuC6280 {
    state: PsgState,
    revision: Revision,
    voice_count: usize,
    tables: Arc<VolumeTables>,
    scopes: Vec<ScopeBuffer>,
    muted: [bool; VOICES],
}

impl HuC6280 {
    /// Creates a new chip instance from `config`.
    ///
    /// Fails if the voice count is outside `1..=6` or the volume seed is invalid.
    pub fn new(config: &PsgConfig) -> Result<Self> {
        let voice_count = match config.voices {
            Some(count) if count == 0 || count > VOICES => {
                return Err(ConfigError::VoiceCount { requested: count, max: VOICES })
            }
            Some(count) => count,
            None => VOICES
        };
        let tables = VolumeTables::shared(config.revision, config.volume)?;
        debug!("{} PSG: voices: {}, volume: {}", config.revision, voice_count, config.volume);
        Ok(HuC6280 {
            state: PsgState::default(),
            revision: config.revision,
            voice_count,
            tables,
            scopes: vec![ScopeBuffer::default(); voice_count],
            muted: [false; VOICES],
        })
    }

    #[inline]
    pub fn revision(&self) -> Revision {
        self.revision
    }

    #[inline]
    pub fn volume_tables(&self) -> &VolumeTables {
        &self.tables
    }
    /// Returns the current output mode of a voice.
    pub fn output_mode(&self, voice: usize) -> Option<OutputMode> {
        self.voice(voice).map(|v| v.mode)
    }
    /// Returns the current period of a voice in chip ticks.
    pub fn period(&self, voice: usize) -> Option<FTs> {
        self.voice(voice).map(|v| v.period)
    }
    /// Returns the latched `[left, right]` attenuation of a voice.
    pub fn attenuation(&self, voice: usize) -> Option<[u8; 2]> {
        self.voice(voice).map(|v| v.attenuation)
    }
    /// Returns the time stamp the chip has been advanced to.
    #[inline]
    pub fn last_timestamp(&self) -> FTs {
        self.state.last_ts
    }
    /// Returns a copy of the complete chip state.
    pub fn snapshot(&self) -> PsgState {
        self.state.clone()
    }
    /// Replaces the chip state. Oscilloscope traces and muted voices are kept.
    pub fn restore(&mut self, state: PsgState) {
        debug!("{} PSG: state restored at: {}", self.revision, state.last_ts);
        self.state = state;
    }
    /// Copies waveform samples of a voice into `buf`, starting at `address` and wrapping around.
    pub fn peek_wave(&self, voice: usize, address: usize, buf: &mut [u8]) {
        if let Some(voice) = self.voice(voice) {
            for (offset, tgt) in buf.iter_mut().enumerate() {
                *tgt = voice.waveform[(address + offset) % WAVE_SIZE];
            }
        }
    }
    /// Replaces waveform samples of a voice with `data`, starting at `address` and wrapping around.
    ///
    /// The voice accumulator follows the changes.
    pub fn poke_wave(&mut self, voice: usize, address: usize, data: &[u8]) {
        if voice < self.voice_count {
            let voice = &mut self.state.voices[voice];
            for (offset, value) in data.iter().copied().enumerate() {
                voice.poke((address + offset) % WAVE_SIZE, value);
            }
        }
    }
    /// Returns the value of an internal register or `None` for voices out of range.
    pub fn get_register(&self, reg: PsgRegister) -> Option<u32> {
        use PsgRegister::*;
        let st = &self.state;
        Some(match reg {
            Select => st.select.into(),
            GlobalBalance => st.global_balance.into(),
            LfoFrequency => st.lfo_freq.into(),
            LfoControl => st.lfo_control.into(),
            Frequency(v) => self.voice(v)?.frequency.into(),
            Control(v) => self.voice(v)?.control.bits().into(),
            Balance(v) => self.voice(v)?.balance.into(),
            WaveIndex(v) => self.voice(v)?.wave_index.into(),
            SampleLatch(v) => self.voice(v)?.dda.into(),
            PsgRegister::NoiseControl(v) => self.voice(v)?.noise_control.bits().into(),
            Lfsr(v) => self.voice(v)?.lfsr
        })
    }
    /// Sets an internal register, bypassing the side effects of register writes other than
    /// recalculating cached periods and output modes.
    ///
    /// Values are truncated to the register size. Voices out of range are ignored.
    pub fn set_register(&mut self, reg: PsgRegister, value: u32) {
        use PsgRegister::*;
        let byte = value as u8;
        match reg {
            Select => self.state.select = byte & 7,
            GlobalBalance => self.state.global_balance = byte,
            LfoFrequency => self.state.lfo_freq = byte,
            LfoControl => {
                self.state.lfo_control = byte & 0x83;
                self.refresh_voice(LFO_CARRIER);
                self.refresh_voice(LFO_MODULATOR);
            }
            Frequency(v) if v < self.voice_count => {
                self.state.voices[v].frequency = (value & 0xFFF) as u16;
                self.refresh_voice(v);
            }
            Control(v) if v < self.voice_count => {
                self.state.voices[v].control = VoiceControl::from(byte);
                self.refresh_voice(v);
            }
            Balance(v) if v < self.voice_count => self.state.voices[v].balance = byte,
            WaveIndex(v) if v < self.voice_count => self.state.voices[v].wave_index = byte & 0x1F,
            SampleLatch(v) if v < self.voice_count => self.state.voices[v].dda = byte & 0x1F,
            PsgRegister::NoiseControl(v) if v < self.voice_count && v >= FIRST_NOISE_VOICE => {
                self.state.voices[v].set_noise_control(byte);
                self.refresh_mode(v);
            }
            Lfsr(v) if v < self.voice_count => self.state.voices[v].lfsr = value & 0x3FFFF,
            _ => trace!("{} PSG: ignored register: {:?}", self.revision, reg)
        }
    }

    #[inline]
    fn voice(&self, voice: usize) -> Option<&Voice> {
        if voice < self.voice_count {
            self.state.voices.get(voice)
        }
        else {
            None
        }
    }

    fn refresh_mode(&mut self, index: usize) {
        let st = &mut self.state;
        let voice = &mut st.voices[index];
        voice.mode = voice.output_mode(index, self.revision, st.lfo_control);
    }
    /// Recalculates the period and the output mode of a voice.
    fn refresh_voice(&mut self, index: usize) {
        let st = &mut self.state;
        let latch = st.voices[LFO_MODULATOR].dda;
        let voice = &mut st.voices[index];
        voice.period = period_cache(index, voice.frequency, st.lfo_control, st.lfo_freq, latch);
        voice.mode = voice.output_mode(index, self.revision, st.lfo_control);
    }

    fn pool_index(&self, reg: u8) -> usize {
        match reg {
            2..=7 => 0x10 + usize::from(self.state.select) * 0x10 + usize::from(reg),
            _ => usize::from(reg)
        }
    }
    /// Sends level changes of a voice to the `blep` and the oscilloscope.
    fn emit<B: Blep>(&mut self, blep: &mut B, index: usize, timestamp: FTs)
        where B::SampleDelta: FromLevel
    {
        let voice = &mut self.state.voices[index];
        let levels = if self.muted[index] {
            [0, 0]
        }
        else {
            voice.levels(&self.tables, self.revision)
        };
        for (channel, (level, last)) in levels.iter().copied()
                                              .zip(voice.last_levels.iter_mut())
                                              .enumerate() {
            let delta = level - *last;
            if delta != 0 {
                blep.add_step(channel, timestamp, B::SampleDelta::from_level(delta));
                *last = level;
            }
        }
        if let Some(scope) = self.scopes.get_mut(index) {
            scope.put(timestamp, levels[0] + levels[1]);
        }
    }
    /// Moves a voice time stamp to `timestamp`, emits the level held since the previous one
    /// and runs the noise generator.
    ///
    /// Returns the number of elapsed ticks.
    fn begin_run<B: Blep>(&mut self, blep: &mut B, index: usize, timestamp: FTs) -> FTs
        where B::SampleDelta: FromLevel
    {
        let voice = &mut self.state.voices[index];
        let start_ts = voice.last_ts;
        let elapsed = timestamp - start_ts;
        debug_assert!(elapsed >= 0, "voice {} time stamp went back: {} -> {}", index, start_ts, timestamp);
        if elapsed <= 0 {
            return 0
        }
        voice.last_ts = timestamp;
        self.emit(blep, index, start_ts);

        if index >= FIRST_NOISE_VOICE {
            let voice = &mut self.state.voices[index];
            voice.noise_count -= elapsed;
            while self.state.voices[index].noise_count <= 0 {
                let voice = &mut self.state.voices[index];
                voice.clock_noise();
                if voice.mode == OutputMode::Noise {
                    let ts = timestamp + voice.noise_count;
                    self.emit(blep, index, ts);
                }
                let voice = &mut self.state.voices[index];
                voice.noise_count += voice.noise_period;
            }
        }
        elapsed
    }
    /// Returns `true` if the waveform of a voice is being clocked.
    #[inline]
    fn is_clocked(&self, index: usize) -> bool {
        self.state.voices[index].control.is_clocked() &&
        !(index == LFO_MODULATOR && self.state.lfo_control & 0x80 != 0)
    }
    /// Advances a voice, not modulated by the LFO, to `timestamp`.
    fn run_voice<B: Blep>(&mut self, blep: &mut B, index: usize, timestamp: FTs)
        where B::SampleDelta: FromLevel
    {
        let elapsed = self.begin_run(blep, index, timestamp);
        if elapsed == 0 || !self.is_clocked(index) {
            return
        }
        let voice = &mut self.state.voices[index];
        voice.counter -= elapsed;
        if voice.period <= FAST_PATH_CUTOFF {
            voice.skip_periods();
        }
        while self.state.voices[index].counter <= 0 {
            let voice = &mut self.state.voices[index];
            voice.step_wave();
            if voice.mode != OutputMode::Noise {
                let ts = timestamp + voice.counter;
                self.emit(blep, index, ts);
            }
            let voice = &mut self.state.voices[index];
            voice.counter += voice.period;
        }
    }
    /// Advances the LFO carrier to `timestamp`.
    ///
    /// Before each carrier step the modulator is brought to the time of the step, then the
    /// carrier's period is derived again from the modulator's sample latch.
    fn run_lfo_carrier<B: Blep>(&mut self, blep: &mut B, timestamp: FTs)
        where B::SampleDelta: FromLevel
    {
        let elapsed = self.begin_run(blep, LFO_CARRIER, timestamp);
        if elapsed == 0 || !self.is_clocked(LFO_CARRIER) {
            return
        }
        self.state.voices[LFO_CARRIER].counter -= elapsed;
        while self.state.voices[LFO_CARRIER].counter <= 0 {
            let carrier = &mut self.state.voices[LFO_CARRIER];
            carrier.step_wave();
            let step_ts = timestamp + carrier.counter;
            if carrier.mode != OutputMode::Noise {
                self.emit(blep, LFO_CARRIER, step_ts);
            }
            self.run_voice(blep, LFO_MODULATOR, step_ts);
            self.refresh_voice(LFO_CARRIER);
            let carrier = &mut self.state.voices[LFO_CARRIER];
            carrier.counter += carrier.period.max(FAST_PATH_CUTOFF);
        }
    }
    /// Latches or applies the attenuation of a single voice side.
    fn volume_scan_step(&mut self) {
        let st = &mut self.state;
        let which = st.vol_update_which;
        let apply = which & 1 != 0;
        let side = usize::from(((which >> 1) & 1) ^ 1);
        let index = usize::from(which >> 2);
        if let Some(voice) = st.voices.get_mut(index) {
            if apply {
                voice.attenuation[side] = st.vol_update_latch;
            }
            else {
                let shift = if side == 0 { 4 } else { 0 };
                st.vol_update_latch = attenuation(st.global_balance, voice.balance,
                                                  voice.control.bits(), shift);
            }
        }
        st.vol_update_which = (which + 1) % VOLUME_SCAN_SLOTS;
        let next = if apply { VOLUME_APPLY_TICKS } else { VOLUME_READ_TICKS };
        if st.vol_update_which != 0 {
            st.vol_update_counter = next;
        }
        else if st.vol_pending {
            st.vol_update_counter = next;
            st.vol_pending = false;
        }
    }
    /// Advances all voices and the volume scan to `timestamp`.
    fn update<B: Blep>(&mut self, blep: &mut B, timestamp: FTs)
        where B::SampleDelta: FromLevel
    {
        let start_ts = self.state.last_ts;
        debug_assert!(timestamp >= start_ts, "PSG time stamp went back: {} -> {}", start_ts, timestamp);
        if timestamp < start_ts {
            return
        }
        let st = &mut self.state;
        if st.vol_pending && st.vol_update_counter == 0 && st.vol_update_which == 0 {
            st.vol_update_counter = 1;
            st.vol_pending = false;
        }
        let mut lfo_on = st.lfo_control & 3 != 0;
        if lfo_on && (!st.voices[LFO_MODULATOR].control.contains(VoiceControl::KEY_ON) ||
                      st.lfo_control & 0x80 != 0) {
            lfo_on = false;
            self.refresh_voice(LFO_CARRIER);
        }
        let mut clocks = timestamp - start_ts;
        let mut running_ts = start_ts;
        while clocks > 0 {
            let vol_counter = self.state.vol_update_counter;
            let chunk = if vol_counter > 0 { clocks.min(vol_counter) } else { clocks };
            running_ts += chunk;
            clocks -= chunk;
            for index in 0..self.voice_count {
                if lfo_on && index == LFO_CARRIER {
                    self.run_lfo_carrier(blep, running_ts);
                }
                else {
                    self.run_voice(blep, index, running_ts);
                }
            }
            if vol_counter > 0 {
                self.state.vol_update_counter -= chunk;
                if self.state.vol_update_counter == 0 {
                    self.volume_scan_step();
                }
            }
            self.state.last_ts = running_ts;
        }
    }
}

impl SoundChip for HuC6280 {
    #[inline]
    fn voice_count(&self) -> usize {
        self.voice_count
    }

    #[inline]
    fn register_pool(&self) -> &[u8] {
        self.state.registers.as_slice()
    }

    fn read_register(&self, addr: u16) -> u8 {
        let reg = (addr & 0x0F) as u8;
        match reg {
            0|1|8|9 => self.state.registers.get(usize::from(reg)).unwrap_or(0),
            2..=7 if usize::from(self.state.select) < self.voice_count => {
                self.state.registers.get(self.pool_index(reg)).unwrap_or(0)
            }
            _ => 0
        }
    }

    fn oscilloscope(&self, voice: usize) -> Option<&ScopeBuffer> {
        self.scopes.get(voice)
    }

    fn set_voice_muted(&mut self, voice: usize, muted: bool) {
        if voice < self.voice_count {
            self.muted[voice] = muted;
        }
    }

    fn is_voice_muted(&self, voice: usize) -> bool {
        self.muted.get(voice).copied().unwrap_or(false)
    }

    fn end_frame(&mut self, end_ts: FTs) {
        let base = self.state.last_ts - end_ts;
        self.state.last_ts = base;
        for voice in self.state.voices.iter_mut() {
            voice.last_ts = base;
        }
        for scope in self.scopes.iter_mut() {
            scope.end_frame(end_ts);
        }
    }
}

impl<B: Blep> SoundChipAudio<B> for HuC6280 where B::SampleDelta: FromLevel {
    fn run_to(&mut self, blep: &mut B, timestamp: FTs) {
        self.update(blep, timestamp);
    }

    fn write_register(&mut self, blep: &mut B, timestamp: FTs, addr: u16, value: u8) {
        let reg = (addr & 0x0F) as u8;
        if reg == 0 {
            self.state.select = value & 7;
            self.state.registers.set(0, value);
            return
        }
        self.update(blep, timestamp);
        let select = usize::from(self.state.select);
        if (2..=7).contains(&reg) && select >= self.voice_count {
            trace!("{} PSG: write to voice {} ignored: {:x}={:02x}", self.revision, select, reg, value);
            return
        }
        let st = &mut self.state;
        match reg {
            1 => {
                st.global_balance = value;
                st.vol_pending = true;
            }
            2 => {
                let voice = &mut st.voices[select];
                voice.frequency = voice.frequency & 0x0F00 | u16::from(value);
                self.refresh_voice(select);
            }
            3 => {
                let voice = &mut st.voices[select];
                voice.frequency = voice.frequency & 0x00FF | u16::from(value & 0x0F) << 8;
                self.refresh_voice(select);
            }
            4 => {
                st.voices[select].write_control(value);
                st.vol_pending = true;
                self.refresh_voice(select);
            }
            5 => {
                st.voices[select].balance = value;
                st.vol_pending = true;
            }
            6 => st.voices[select].write_wave(value),
            7 if select >= FIRST_NOISE_VOICE => {
                st.voices[select].set_noise_control(value);
                self.refresh_mode(select);
            }
            8 => st.lfo_freq = value,
            9 => {
                if value & 0x80 != 0 {
                    let modulator = &mut st.voices[LFO_MODULATOR];
                    modulator.wave_index = 0;
                    modulator.dda = modulator.waveform[0];
                    modulator.counter = modulator.period;
                }
                st.lfo_control = value;
                self.refresh_voice(LFO_CARRIER);
                self.refresh_voice(LFO_MODULATOR);
            }
            _ => {
                trace!("{} PSG: write ignored: {:x}={:02x}", self.revision, reg, value);
                return
            }
        }
        let index = self.pool_index(reg);
        self.state.registers.set(index, value);
    }

    fn power(&mut self, blep: &mut B, timestamp: FTs) {
        self.update(blep, timestamp);
        debug!("{} PSG: power at: {}", self.revision, timestamp);
        let st = &mut self.state;
        st.select = 0;
        st.global_balance = 0;
        st.lfo_freq = 0;
        st.lfo_control = 0;
        for voice in st.voices.iter_mut() {
            voice.power();
        }
        st.vol_pending = false;
        st.vol_update_counter = 0;
        st.vol_update_which = 0;
        st.vol_update_latch = 0;
        st.registers.clear();
        for index in 0..VOICES {
            self.refresh_voice(index);
        }
    }
}
