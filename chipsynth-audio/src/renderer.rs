/*
    Copyright (C) 2020-2023  Rafal Michalski

    This file is part of CHIPSYNTH, a Rust library for emulating sound chips.

    For the full copyright notice, see the lib.rs file.
*/
//! The host-facing renderer driving a sound chip emulator.
//!
//! [ChipRenderer] owns a chip, a queue of time-stamped register writes and a stereo
//! [BandLimited][crate::synth::BandLimited] buffer. Each call to [ChipRenderer::render] cuts
//! the host buffer into frames, applies due writes at their time stamps while advancing
//! the chip, and sums the collected pulse steps into 16-bit stereo samples.
use core::fmt;
use log::debug;

#[cfg(feature = "snapshot")]
use serde::{Serialize, Deserialize};

use chipsynth_core::{
    audio::{Blep, BlepGain, BlepStereo, ScopeBuffer},
    chip::{SoundChip, SoundChipAudio, WriteLatency, WriteQueue},
    clock::{FTs, TimeRate},
    error::{ConfigError, Result}
};
use crate::synth::{BandLimitedAny, BandLimitedExt};

/// The [Blep] type passed to chips by [ChipRenderer].
///
/// Channels 0 and 1 are the left and right outputs. Steps sent to channel 2 are mixed into both.
pub type ChipBlep = BlepStereo<BlepGain<BandLimitedAny<f32>>>;

/// The largest frame duration accepted, in chip ticks.
const MAX_FRAME_TS: u64 = (i32::MAX / 4) as u64;
const DEFAULT_MAX_FRAME_SAMPLES: usize = 1024;

/// Band-pass filter limits of the output buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
pub enum BandFilter {
    Wide,
    LowTreble,
    LowBass,
    Narrow
}

impl Default for BandFilter {
    fn default() -> Self {
        BandFilter::Wide
    }
}

impl BandFilter {
    /// Returns `(cut_treble, cut_bass)`.
    fn pass_limits(self) -> (bool, bool) {
        match self {
            BandFilter::Wide      => (false, false),
            BandFilter::LowTreble => (true,  false),
            BandFilter::LowBass   => (false, true),
            BandFilter::Narrow    => (true,  true),
        }
    }
}

/// [ChipRenderer] configuration.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "snapshot", serde(default, rename_all = "camelCase"))]
pub struct RendererConfig {
    /// The host output sample rate in Hz.
    pub host_rate: u32,
    /// The chip input clock in Hz. Must not be lower than `host_rate`.
    pub clock_rate: u32,
    pub filter: BandFilter,
    /// The master gain applied to every pulse step.
    pub gain: f32,
    /// Register write pacing, `None` applies writes at their own time stamps.
    pub latency: Option<WriteLatency>,
    /// The largest number of samples rendered in a single frame.
    pub max_frame_samples: usize,
}

impl Default for RendererConfig {
    fn default() -> Self {
        RendererConfig {
            host_rate: 48000,
            clock_rate: 3_579_545,
            filter: BandFilter::default(),
            gain: 1.0,
            latency: None,
            max_frame_samples: DEFAULT_MAX_FRAME_SAMPLES
        }
    }
}

/// Renders audio of a sound chip `C` driven by time-stamped register writes.
///
/// Time stamps passed to [ChipRenderer::write] and [ChipRenderer::power] are chip clock ticks
/// relative to the first sample produced by the next call to [ChipRenderer::render].
pub struct ChipRenderer<C> {
    chip: C,
    blep: ChipBlep,
    queue: WriteQueue,
    time_rate: TimeRate,
    max_frame_samples: usize,
    /// A pending power-on time stamp relative to the next frame.
    power_ts: Option<FTs>,
}

impl<C: fmt::Debug> fmt::Debug for ChipRenderer<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChipRenderer")
         .field("chip", &self.chip)
         .field("queue", &self.queue)
         .field("time_rate", &self.time_rate)
         .field("max_frame_samples", &self.max_frame_samples)
         .field("power_ts", &self.power_ts)
         .finish_non_exhaustive()
    }
}

impl<C: SoundChipAudio<ChipBlep>> ChipRenderer<C> {
    /// Creates a new renderer of the given `chip`.
    ///
    /// Returns an error if the rates are 0, the chip clock is below the host rate, the frame
    /// size is 0 or too large, or the gain or latency are invalid.
    pub fn new(chip: C, config: &RendererConfig) -> Result<Self> {
        let time_rate = TimeRate::new(config.host_rate, config.clock_rate)?;
        if config.max_frame_samples == 0 {
            return Err(ConfigError::ZeroFrameSize)
        }
        if !config.gain.is_finite() || config.gain < 0.0 {
            return Err(ConfigError::Invalid(format!("gain out of range: {}", config.gain)))
        }
        let frame_ts = (config.max_frame_samples as u64).saturating_mul(config.clock_rate as u64)
                       / config.host_rate as u64;
        if frame_ts > MAX_FRAME_TS {
            return Err(ConfigError::Invalid(
                format!("frame of {} samples is too long", config.max_frame_samples)))
        }
        let latency = config.latency
                            .map(|lat| WriteLatency::new(lat.tick(), lat.delay()))
                            .transpose()?;
        let frame_ts = time_rate.ticks_for_samples(config.max_frame_samples);
        let margin_ts = time_rate.ticks_for_samples(1) + 1;
        let (cut_treble, cut_bass) = config.filter.pass_limits();
        let mut blep = BlepStereo::new(1.0,
                        BlepGain::new(config.gain,
                            BandLimitedAny::new(2, cut_treble, cut_bass)));
        blep.ensure_frame_time(config.host_rate, config.clock_rate as f64, frame_ts, margin_ts);
        debug!("renderer: host rate: {} Hz, clock: {} Hz, frame: {} samples, {} ts, voices: {}",
            config.host_rate, config.clock_rate, config.max_frame_samples, frame_ts, chip.voice_count());
        Ok(ChipRenderer {
            chip,
            blep,
            queue: WriteQueue::with_capacity(256, latency),
            time_rate,
            max_frame_samples: config.max_frame_samples,
            power_ts: None
        })
    }
    /// Queues a register write at `timestamp`.
    ///
    /// Writes are applied in the order they were queued.
    pub fn write(&mut self, timestamp: FTs, addr: u16, value: u8) {
        self.queue.push(timestamp, addr, value);
    }
    /// Renders `min(left.len(), right.len())` stereo frames. Returns the number of frames rendered.
    pub fn render(&mut self, left: &mut [i16], right: &mut [i16]) -> usize {
        let total = left.len().min(right.len());
        let mut done = 0;
        while done < total {
            let nsamples = (total - done).min(self.max_frame_samples);
            let produced = self.run_frame(nsamples);
            let end = done + produced.min(nsamples);
            self.blep.render_audio_channel(&mut left[done..end], 0);
            self.blep.render_audio_channel(&mut right[done..end], 1);
            self.blep.next_frame();
            if end == done {
                break
            }
            done = end;
        }
        done
    }
    /// Renders stereo frames into a buffer of interleaved left and right samples.
    /// Returns the number of frames rendered.
    pub fn render_interleaved(&mut self, output: &mut [i16]) -> usize {
        let mut done = 0;
        for chunk in output.chunks_mut(self.max_frame_samples * 2) {
            let nsamples = chunk.len() / 2;
            if nsamples == 0 {
                break
            }
            let produced = self.run_frame(nsamples).min(nsamples);
            self.blep.render_audio_map_interleaved(&mut chunk[..produced * 2], 2, &[0, 1]);
            self.blep.next_frame();
            done += produced;
        }
        done
    }
    /// Advances the chip by a single output sample and returns it as `[left, right]`.
    pub fn next_sample(&mut self) -> [i16; 2] {
        let mut left = [0];
        let mut right = [0];
        self.render(&mut left, &mut right);
        [left[0], right[0]]
    }
    /// Clears pending writes and restores the chip's power-on state at the start of the next frame.
    ///
    /// The pulse buffer keeps running, so the transition to silence is band-limited too.
    pub fn reset(&mut self) {
        debug!("renderer: reset");
        self.queue.clear();
        self.power_ts = None;
        self.chip.power(&mut self.blep, 0);
    }
    /// Restores the chip's power-on state at `timestamp` of the next frame.
    ///
    /// The chip is powered on when rendering reaches `timestamp`, after the writes queued before
    /// it. A negative `timestamp` is treated as 0. Of the calls made before the frame containing
    /// `timestamp` is rendered, the one with the latest time stamp wins.
    pub fn power(&mut self, timestamp: FTs) {
        let timestamp = timestamp.max(0);
        debug!("renderer: power at {}", timestamp);
        self.power_ts = Some(self.power_ts.map_or(timestamp, |ts| ts.max(timestamp)));
    }
    /// Ends the frame after exactly `nsamples` and rebases time stamps. Returns the number of samples.
    fn run_frame(&mut self, nsamples: usize) -> usize {
        let end_ts = self.blep.timestamp_for_samples(nsamples);
        if let Some(power_ts) = self.power_ts.filter(|&ts| ts < end_ts) {
            self.power_ts = None;
            self.apply_writes(power_ts);
            self.chip.power(&mut self.blep, power_ts);
        }
        self.apply_writes(end_ts);
        self.chip.run_to(&mut self.blep, end_ts);
        let produced = self.blep.end_frame(end_ts);
        debug_assert_eq!(produced, nsamples);
        self.chip.end_frame(end_ts);
        self.queue.end_frame(end_ts);
        if let Some(power_ts) = self.power_ts.as_mut() {
            *power_ts -= end_ts;
        }
        produced
    }
    /// Applies queued writes due before `end_ts`.
    fn apply_writes(&mut self, end_ts: FTs) {
        let ChipRenderer { chip, blep, queue, .. } = self;
        loop {
            let write = queue.next_due(end_ts, |ts| {
                chip.run_to(blep, ts);
                chip.is_busy()
            });
            match write {
                Some(write) => chip.write_register(blep, write.time, write.addr, write.value),
                None => break
            }
        }
    }
}

impl<C: SoundChip> ChipRenderer<C> {
    /// Returns the number of voices of the rendered chip.
    #[inline]
    pub fn voice_count(&self) -> usize {
        self.chip.voice_count()
    }
    /// Returns the last values written to the chip registers.
    #[inline]
    pub fn register_pool(&self) -> &[u8] {
        self.chip.register_pool()
    }
    /// Reads a chip register.
    #[inline]
    pub fn read_register(&self, addr: u16) -> u8 {
        self.chip.read_register(addr)
    }
    /// Returns the oscilloscope trace of the given voice.
    #[inline]
    pub fn oscilloscope(&self, voice: usize) -> Option<&ScopeBuffer> {
        self.chip.oscilloscope(voice)
    }
    /// Renders the oscilloscope trace of `voice` into `output`, starting at the absolute
    /// chip tick `start`, advancing by `step` ticks per sample.
    ///
    /// Returns `false` if `voice` is out of range.
    pub fn oscilloscope_samples(&self, voice: usize, start: u64, step: u64, output: &mut [i16]) -> bool {
        match self.chip.oscilloscope(voice) {
            Some(scope) => {
                scope.render(start, step, output);
                true
            }
            None => false
        }
    }

    pub fn set_voice_muted(&mut self, voice: usize, muted: bool) {
        self.chip.set_voice_muted(voice, muted)
    }

    pub fn is_voice_muted(&self, voice: usize) -> bool {
        self.chip.is_voice_muted(voice)
    }

    pub fn time_rate(&self) -> TimeRate {
        self.time_rate
    }
    /// Returns the number of queued writes not yet applied.
    pub fn pending_writes(&self) -> usize {
        self.queue.len()
    }

    pub fn chip(&self) -> &C {
        &self.chip
    }

    pub fn chip_mut(&mut self) -> &mut C {
        &mut self.chip
    }

    pub fn into_chip(self) -> C {
        self.chip
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chipsynth_core::audio::FromLevel;

    /// A single voice emitting a square wave of a period given by register 0 (in 100s of ticks).
    #[derive(Debug, Default)]
    struct SquareChip {
        regs: [u8; 2],
        last_ts: FTs,
        counter: FTs,
        high: bool,
        level: i32,
        muted: bool,
        scope: ScopeBuffer,
        busy_until: FTs,
    }

    impl SquareChip {
        fn output(&self) -> i32 {
            if self.muted || self.regs[0] == 0 || !self.high { 0 } else { 8192 }
        }

        fn emit<B: Blep>(&mut self, blep: &mut B, ts: FTs) where B::SampleDelta: FromLevel {
            let level = self.output();
            if level != self.level {
                blep.add_step(2, ts, B::SampleDelta::from_level(level - self.level));
                self.level = level;
            }
            self.scope.put(ts, level);
        }
    }

    impl SoundChip for SquareChip {
        fn voice_count(&self) -> usize { 1 }
        fn register_pool(&self) -> &[u8] { &self.regs }
        fn is_busy(&self) -> bool { self.last_ts < self.busy_until }
        fn oscilloscope(&self, voice: usize) -> Option<&ScopeBuffer> {
            if voice == 0 { Some(&self.scope) } else { None }
        }
        fn set_voice_muted(&mut self, voice: usize, muted: bool) {
            if voice == 0 { self.muted = muted }
        }
        fn is_voice_muted(&self, voice: usize) -> bool { voice == 0 && self.muted }
        fn end_frame(&mut self, end_ts: FTs) {
            self.last_ts -= end_ts;
            self.busy_until -= end_ts;
            self.scope.end_frame(end_ts);
        }
    }

    impl<B: Blep> SoundChipAudio<B> for SquareChip where B::SampleDelta: FromLevel {
        fn run_to(&mut self, blep: &mut B, timestamp: FTs) {
            assert!(timestamp >= self.last_ts, "time went back: {} -> {}", self.last_ts, timestamp);
            let period = self.regs[0] as FTs * 100;
            if period == 0 {
                self.last_ts = self.last_ts.max(timestamp);
                return
            }
            while self.last_ts + self.counter <= timestamp {
                self.last_ts += self.counter;
                self.counter = period;
                self.high = !self.high;
                let ts = self.last_ts;
                self.emit(blep, ts);
            }
            self.counter -= timestamp - self.last_ts;
            self.last_ts = timestamp;
        }
        fn write_register(&mut self, blep: &mut B, timestamp: FTs, addr: u16, value: u8) {
            self.run_to(blep, timestamp);
            if let Some(reg) = self.regs.get_mut(addr as usize) {
                *reg = value;
                self.counter = value as FTs * 100;
                self.busy_until = timestamp + 50;
            }
            self.emit(blep, timestamp);
        }
        fn power(&mut self, blep: &mut B, timestamp: FTs) {
            self.run_to(blep, timestamp);
            self.regs = [0; 2];
            self.high = false;
            self.emit(blep, timestamp);
        }
    }

    fn config() -> RendererConfig {
        RendererConfig { host_rate: 44100, clock_rate: 1_000_000, max_frame_samples: 100, ..Default::default() }
    }

    #[test]
    fn renderer_config_errors() {
        let chip = || SquareChip::default();
        let err = ChipRenderer::new(chip(), &RendererConfig { host_rate: 0, ..config() }).unwrap_err();
        assert_eq!(err, ConfigError::ZeroRate);
        let err = ChipRenderer::new(chip(), &RendererConfig { clock_rate: 22050, ..config() }).unwrap_err();
        assert_eq!(err, ConfigError::ClockBelowHostRate { clock: 22050, host: 44100 });
        let err = ChipRenderer::new(chip(), &RendererConfig { max_frame_samples: 0, ..config() }).unwrap_err();
        assert_eq!(err, ConfigError::ZeroFrameSize);
        assert!(ChipRenderer::new(chip(), &RendererConfig { max_frame_samples: usize::MAX / 2000000, ..config() }).is_err());
        assert!(ChipRenderer::new(chip(), &RendererConfig { gain: f32::NAN, ..config() }).is_err());
        let renderer = ChipRenderer::new(chip(), &config()).unwrap();
        assert_eq!(renderer.voice_count(), 1);
        assert_eq!(renderer.time_rate().clock_hz(), 1_000_000);
    }

    #[cfg(feature = "snapshot")]
    #[test]
    fn renderer_config_serde_works() {
        let config = RendererConfig {
            filter: BandFilter::Narrow,
            gain: 0.5,
            latency: Some(WriteLatency::new(20, 2).unwrap()),
            ..config()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains(r#""hostRate":44100"#), "{}", json);
        assert!(json.contains(r#""filter":"Narrow""#), "{}", json);
        let restored: RendererConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, config);
        let renderer = ChipRenderer::new(SquareChip::default(), &restored).unwrap();
        assert_eq!(renderer.time_rate().clock_hz(), 1_000_000);
        let partial: RendererConfig = serde_json::from_str(r#"{"hostRate":22050,"filter":"LowBass"}"#).unwrap();
        assert_eq!(partial, RendererConfig { host_rate: 22050, filter: BandFilter::LowBass, ..Default::default() });
    }

    #[test]
    fn renderer_renders_square_wave() {
        let mut renderer = ChipRenderer::new(SquareChip::default(), &config()).unwrap();
        let mut left = vec![0i16; 1000];
        let mut right = vec![0i16; 999];
        renderer.write(0, 0, 10);
        assert_eq!(renderer.pending_writes(), 1);
        assert_eq!(renderer.render(&mut left, &mut right), 999);
        assert_eq!(renderer.pending_writes(), 0);
        assert_eq!(renderer.register_pool(), &[10, 0]);
        assert_eq!(renderer.read_register(0), 10);
        assert_eq!(&left[..999], &right[..]);
        assert_eq!(left[999], 0);
        // 1000 ticks per half period, ~44 samples
        let max = left[100..300].iter().copied().max().unwrap();
        let min = left[100..300].iter().copied().min().unwrap();
        assert!(max - min > 7000 && max - min < 11000, "{} {}", max, min);
        let scope = renderer.oscilloscope(0).unwrap();
        let edges: Vec<_> = scope.iter().map(|ev| ev.tick).collect();
        assert!(edges.len() > 20);
        for pair in edges[1..].windows(2) {
            assert_eq!(pair[1] - pair[0], 1000);
        }
        let mut trace = [0i16; 4];
        assert!(renderer.oscilloscope_samples(0, edges[1], 500, &mut trace));
        assert_eq!(trace, [8192, 8192, 0, 0]);
        assert!(!renderer.oscilloscope_samples(1, 0, 1, &mut trace));
    }

    #[test]
    fn renderer_is_deterministic() {
        fn run() -> Vec<i16> {
            let mut renderer = ChipRenderer::new(SquareChip::default(), &config()).unwrap();
            let mut out = vec![0i16; 2 * 777];
            renderer.write(123, 0, 3);
            renderer.write(4567, 0, 7);
            renderer.render_interleaved(&mut out[..2 * 300]);
            renderer.write(10, 0, 1);
            renderer.render_interleaved(&mut out[2 * 300..]);
            out
        }
        let first = run();
        assert_eq!(first, run());
        assert!(first.iter().any(|&s| s != 0));
        assert!(first.chunks(2).all(|lr| lr[0] == lr[1]));
    }

    #[test]
    fn renderer_mute_and_reset_work() {
        let mut renderer = ChipRenderer::new(SquareChip::default(), &config()).unwrap();
        renderer.write(0, 0, 10);
        let mut left = vec![0i16; 500];
        let mut right = vec![0i16; 500];
        renderer.render(&mut left, &mut right);
        renderer.set_voice_muted(0, true);
        assert!(renderer.is_voice_muted(0));
        renderer.render(&mut left, &mut right);
        // after the transition there are no more edges, only the high pass filter decay
        assert!(left[100..].windows(2).all(|w| (w[1] - w[0]).abs() <= 3), "{:?}", &left[100..110]);
        let scope = renderer.oscilloscope(0).unwrap();
        let last = scope.iter().last().unwrap();
        assert_eq!(last.level, 0);
        assert!(last.tick < scope.origin() - 400 * 22);
        renderer.set_voice_muted(0, false);
        renderer.reset();
        assert_eq!(renderer.pending_writes(), 0);
        renderer.render(&mut left, &mut right);
        assert_eq!(renderer.register_pool(), &[0, 0]);
        assert!(left[100..].windows(2).all(|w| (w[1] - w[0]).abs() <= 3));
        let [l, r] = renderer.next_sample();
        assert_eq!(l, r);
    }

    #[test]
    fn renderer_latency_gates_writes() {
        let latency = WriteLatency::new(20, 1).unwrap();
        let mut renderer = ChipRenderer::new(SquareChip::default(),
                            &RendererConfig { latency: Some(latency), ..config() }).unwrap();
        renderer.write(0, 0, 5);
        renderer.write(0, 1, 6);
        renderer.write(0, 0, 7);
        renderer.power(30);
        assert_eq!(renderer.pending_writes(), 3);
        assert_eq!(renderer.register_pool(), &[0, 0]);
        // the first write makes the chip busy for 50 ticks, polls happen at 0, 20, 40, 60
        let mut left = vec![0i16; 10];
        let mut right = vec![0i16; 10];
        renderer.render(&mut left, &mut right);
        assert_eq!(renderer.pending_writes(), 0);
        assert_eq!(renderer.register_pool(), &[7, 6]);
    }

    #[test]
    fn renderer_power_waits_for_its_frame() {
        let mut renderer = ChipRenderer::new(SquareChip::default(), &config()).unwrap();
        renderer.write(0, 0, 1);
        // about 132 samples ahead, well past the following single sample frames
        renderer.power(3000);
        let early: Vec<i16> = (0..100).map(|_| renderer.next_sample()[0]).collect();
        assert_eq!(renderer.register_pool(), &[1, 0]);
        let max = early[20..].iter().copied().max().unwrap();
        let min = early[20..].iter().copied().min().unwrap();
        assert!(max - min > 7000, "{} {}", max, min);
        let mut left = vec![0i16; 200];
        let mut right = vec![0i16; 200];
        assert_eq!(renderer.render(&mut left, &mut right), 200);
        assert_eq!(renderer.register_pool(), &[0, 0]);
        assert!(left[100..].windows(2).all(|w| (w[1] - w[0]).abs() <= 3), "{:?}", &left[100..110]);
        renderer.write(0, 0, 2);
        renderer.next_sample();
        assert_eq!(renderer.register_pool(), &[2, 0]);
        // the latest time stamp wins, a negative one means the frame start
        renderer.power(-100);
        renderer.power(-200);
        assert_eq!(renderer.pending_writes(), 0);
        renderer.next_sample();
        assert_eq!(renderer.register_pool(), &[0, 0]);
    }
}
