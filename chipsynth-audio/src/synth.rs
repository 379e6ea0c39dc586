/*
    Copyright (C) 2020-2023  Rafal Michalski

    This file is part of CHIPSYNTH, a Rust library for emulating sound chips.

    For the full copyright notice, see the lib.rs file.
*/
//! Band-limited step synthesis.
//!
//! Every level change of a chip output is rendered as a short band-limited step instead of an
//! instant jump, so square waves and sample-and-hold signals reach the host rate without aliasing.
//! The technique follows the one described on [this web site](http://www.slack.net/~ant/bl-synth).
//!
//! The buffer collects step differences of a single frame. A frame may end at any time stamp
//! within the buffer capacity and that time stamp becomes the time stamp 0 of the next frame.
use core::cell::Cell;
use core::fmt;
use core::iter::{Skip, StepBy};
use core::marker::PhantomData;
use core::num::NonZeroUsize;
use core::slice;
use chipsynth_core::{
    clock::FTs,
    audio::{SampleDelta, Blep, IntoSample, FromSample, MulNorm}
};

mod ext;

pub use ext::*;

/// Sub-sample positions at which a step shape is prepared.
const PHASE_COUNT: usize = 32;
/// The length of a single step shape in output samples.
const STEP_WIDTH: usize = 24;
/// The period of the square wave the step is cut from, in master step points.
const WAVE_PERIOD: usize = 256 * PHASE_COUNT + 2;

/// Filter characteristics of a [BandLimited] buffer.
pub trait PassBand {
    /// A per-harmonic gain factor of the step shape. Lower values cut more treble.
    const TREBLE_ROLLOFF: f64 = 0.999;
    /// A per-sample decay factor of the output level. Lower values cut more bass.
    const BASS_DECAY: f32 = 0.999;
}

/// Passes almost the whole audible band.
pub struct WideBand;
impl PassBand for WideBand {}

/// Cuts off some of the treble.
pub struct TrebleCut;
impl PassBand for TrebleCut {
    const TREBLE_ROLLOFF: f64 = 0.899;
}

/// Cuts off some of the bass.
pub struct BassCut;
impl PassBand for BassCut {
    const BASS_DECAY: f32 = 0.899;
}

/// Cuts off both ends of the band.
pub struct NarrowBand;
impl PassBand for NarrowBand {
    const TREBLE_ROLLOFF: f64 = 0.899;
    const BASS_DECAY: f32 = 0.899;
}

/// A band-limited pulse buffer with a configurable pass band.
///
/// `T` is the amplitude type of steps and of the produced samples. Implementations are provided
/// for `f64`, `f32`, `i32` and `i16`.
pub struct BandLimited<T, O=WideBand> {
    kernel: StepKernel<T>,
    pulses: Vec<T>,
    nchannels: NonZeroUsize,
    samples_per_tick: f64,
    capacity: f64,
    frame_origin: f64,
    frame_end: f64,
    levels: Box<[Level<T>]>,
    ended: Option<usize>,
    band: PhantomData<O>
}

/// Step shapes of a unit rise, one for each sub-sample phase.
struct StepKernel<T>([[T; STEP_WIDTH]; PHASE_COUNT]);

// The output level of a channel at the frame start and, once known, at the frame end.
#[derive(Default)]
struct Level<T> {
    start: T,
    end: Cell<Option<T>>
}

type Lane<'a, T> = StepBy<Skip<slice::Iter<'a, T>>>;

#[inline]
fn lane<T>(pulses: &[T], nchannels: usize, channel: usize, nsamples: usize) -> Lane<'_, T> {
    pulses[..nsamples * nchannels].iter().skip(channel).step_by(nchannels)
}

// Returns the next output sample and leaves the decayed level in `level`.
// Only the output is clamped, the level keeps its headroom.
#[inline(always)]
fn accumulate<T, O>(level: &mut T, delta: T) -> T
    where T: Copy + MulNorm + FromSample<f32>, O: PassBand
{
    let output = level.saturating_add(delta);
    *level = output.mul_norm(T::from_sample(O::BASS_DECAY));
    output.clamp_norm()
}

impl<T: Copy + Default + FromSample<f32>> StepKernel<T> {
    fn new<O: PassBand>() -> Self {
        const POINTS: usize = STEP_WIDTH * PHASE_COUNT;
        // odd harmonics of a square wave, the plain sum peaks at ~0.777
        let harmonics: Vec<(f64, f64)> = (1..=WAVE_PERIOD / 2 / PHASE_COUNT).step_by(2)
            .scan(0.5 / 0.777, |gain, n| {
                let harmonic = (2.0 * core::f64::consts::PI * n as f64 / WAVE_PERIOD as f64,
                                *gain / n as f64);
                *gain *= O::TREBLE_ROLLOFF;
                Some(harmonic)
            })
            .collect();
        let master = |point: usize| {
            let x = point as f64 - (POINTS / 2) as f64;
            harmonics.iter().fold(0.5, |acc, &(omega, amp)| acc + (x * omega).sin() * amp)
        };
        let mut shapes = [[T::default(); STEP_WIDTH]; PHASE_COUNT];
        for (phase, shape) in shapes.iter_mut().enumerate() {
            let mut deltas = [0.0f64; STEP_WIDTH];
            let mut prev = 0.0;
            for (tap, delta) in deltas.iter_mut().enumerate() {
                let level = master(tap * PHASE_COUNT + PHASE_COUNT - 1 - phase);
                *delta = level - prev;
                prev = level;
            }
            // a complete step rises by exactly 1.0
            let half_error = (1.0 - prev) * 0.5;
            let center = STEP_WIDTH / 2;
            deltas[center] += half_error;
            deltas[if phase < PHASE_COUNT / 2 { center - 1 } else { center + 1 }] += half_error;
            for (tap, &delta) in shape.iter_mut().zip(deltas.iter()) {
                *tap = T::from_sample(delta as f32);
            }
        }
        StepKernel(shapes)
    }
}

impl<T, O> fmt::Debug for BandLimited<T, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BandLimited")
         .field("nchannels", &self.nchannels)
         .field("samples_per_tick", &self.samples_per_tick)
         .field("capacity", &self.capacity)
         .field("ended", &self.ended)
         .finish_non_exhaustive()
    }
}

impl<T, O> BandLimited<T, O>
    where T: Copy + Default + FromSample<f32>, O: PassBand
{
    /// Creates a buffer for `channels` audio channels.
    ///
    /// [BandLimited::set_frame_time] or [Blep::ensure_frame_time] has to be called before any
    /// steps are added.
    ///
    /// # Panics
    /// Panics if `channels` is `0`.
    pub fn new(channels: usize) -> Self {
        let nchannels = match NonZeroUsize::new(channels) {
            Some(n) => n,
            None => panic!("BandLimited: at least one channel is required")
        };
        BandLimited {
            kernel: StepKernel::new::<O>(),
            pulses: Vec::new(),
            nchannels,
            samples_per_tick: 0.0,
            capacity: 0.0,
            frame_origin: 0.0,
            frame_end: 0.0,
            levels: (0..channels).map(|_| Level::default()).collect(),
            ended: None,
            band: PhantomData
        }
    }
}

impl<T: Copy + Default, O> BandLimited<T, O> {
    /// Drops all buffered steps, brings output levels to 0 and restarts the frame timing.
    pub fn reset(&mut self) {
        self.pulses.iter_mut().for_each(|p| *p = T::default());
        self.levels.iter_mut().for_each(|level| *level = Level::default());
        self.ended = None;
        self.frame_origin = 0.0;
        self.frame_end = 0.0;
    }
    /// Returns `true` between the end of a frame and the call to [BandLimited::next_frame].
    #[inline]
    pub fn is_frame_ended(&self) -> bool {
        self.ended.is_some()
    }

    #[inline]
    pub fn num_samples_ended_frame(&self) -> Option<usize> {
        self.ended
    }
    /// Returns how many samples fit in a single frame.
    #[inline]
    pub fn max_frame_samples(&self) -> usize {
        self.capacity as usize
    }
    /// Makes room for frames of up to `max_frame_time` samples.
    pub fn set_frame_time(&mut self, max_frame_time: f64) {
        let len = (max_frame_time.ceil() as usize + STEP_WIDTH + 1) * self.nchannels.get();
        if self.pulses.len() != len {
            self.pulses.resize(len, T::default());
        }
        self.capacity = max_frame_time;
    }
    /// Returns the earliest frame time stamp at which the current frame yields `nsamples` samples.
    ///
    /// Assumes the time stamp rate is not lower than the sample rate.
    pub fn timestamp_for_samples(&self, nsamples: usize) -> FTs {
        let wanted = nsamples as f64;
        let produced = |ts: FTs| (self.samples_per_tick * ts as f64 - self.frame_origin).trunc();
        let mut ts = ((wanted + self.frame_origin) / self.samples_per_tick).ceil().max(0.0) as FTs;
        // the estimate may be off by a tick either way
        while produced(ts) < wanted {
            ts += 1;
        }
        while ts > 0 && produced(ts - 1) >= wanted {
            ts -= 1;
        }
        ts
    }
    /// Ends the frame at `time_end` given in samples and returns the number of samples
    /// per channel the frame yields.
    ///
    /// # Panics
    /// Panics if the frame is already ended.
    pub fn end_frame_at(&mut self, time_end: f64) -> usize {
        assert!(self.ended.is_none(), "BandLimited: frame already ended");
        let nsamples = (time_end - self.frame_origin).trunc().max(0.0) as usize;
        self.ended = Some(nsamples);
        self.frame_end = time_end;
        nsamples
    }
    /// Adds a step of `delta` height to `channel` at `time` given in samples.
    ///
    /// Steps timed before the frame start land at the frame start.
    #[inline]
    pub fn add_step_at(&mut self, channel: usize, time: f64, delta: T)
        where T: MulNorm
    {
        let nchannels = self.nchannels.get();
        debug_assert!(channel < nchannels);
        let offset = (time - self.frame_origin).max(0.0);
        let phase = ((offset.fract() * PHASE_COUNT as f64) as usize).min(PHASE_COUNT - 1);
        let first = offset as usize * nchannels + channel;
        let pulses = self.pulses[first..].iter_mut().step_by(nchannels);
        for (pulse, &tap) in pulses.zip(self.kernel.0[phase].iter()) {
            *pulse = pulse.saturating_add(tap.mul_norm(delta));
        }
    }
    /// Moves the steps overlapping the frame end to the start of the next frame.
    ///
    /// The samples of the ended frame may be read before this call with [BandLimited::sum_iter]
    /// or one of the [BandLimitedExt] render methods.
    ///
    /// # Panics
    /// Panics if the frame is not ended.
    pub fn next_frame(&mut self)
        where T: MulNorm + FromSample<f32>, O: PassBand
    {
        let nsamples = match self.ended.take() {
            Some(n) => n,
            None => panic!("BandLimited: frame not ended")
        };
        let nchannels = self.nchannels.get();
        let pulses = &self.pulses;
        for (channel, level) in self.levels.iter_mut().enumerate() {
            level.start = match level.end.take() {
                Some(end) => end,
                None => lane(pulses, nchannels, channel, nsamples)
                        .fold(level.start, |mut acc, &delta| {
                            accumulate::<T, O>(&mut acc, delta);
                            acc
                        })
            };
        }
        let used = nsamples * nchannels;
        let tail = STEP_WIDTH * nchannels;
        self.pulses.copy_within(used..used + tail, 0);
        self.pulses[tail..used + tail].iter_mut().for_each(|p| *p = T::default());
        self.frame_origin += nsamples as f64 - self.frame_end;
    }
    /// Returns an iterator of the ended frame samples of `channel` converted to `S`.
    ///
    /// # Panics
    /// Panics if `channel` is out of range or if the frame is not ended.
    pub fn sum_iter<'a, S: 'a>(&'a self, channel: usize) -> impl Iterator<Item=S> + ExactSizeIterator + 'a
        where T: MulNorm + FromSample<f32> + IntoSample<S>, O: PassBand
    {
        let nchannels = self.nchannels.get();
        assert!(channel < nchannels, "BandLimited: no channel {} in 0..{}", channel, nchannels);
        let nsamples = match self.ended {
            Some(n) => n,
            None => panic!("BandLimited: frame not ended")
        };
        let level = &self.levels[channel];
        ChannelSamples::<T, O, S> {
            lane: lane(&self.pulses, nchannels, channel, nsamples),
            level: level.start,
            settled: &level.end,
            marker: PhantomData
        }
    }
}

// Integrates the step differences of a channel into samples. The level reached at the end of the
// frame is stored on drop, so the next frame does not integrate them again.
struct ChannelSamples<'a, T, O, S>
    where T: Copy + MulNorm + FromSample<f32>, O: PassBand
{
    lane: Lane<'a, T>,
    level: T,
    settled: &'a Cell<Option<T>>,
    marker: PhantomData<(S, O)>
}

impl<'a, T, O, S> Iterator for ChannelSamples<'a, T, O, S>
    where T: Copy + MulNorm + FromSample<f32> + IntoSample<S>, O: PassBand
{
    type Item = S;

    #[inline]
    fn next(&mut self) -> Option<S> {
        let delta = *self.lane.next()?;
        Some(accumulate::<T, O>(&mut self.level, delta).into_sample())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.lane.size_hint()
    }
}

impl<'a, T, O, S> ExactSizeIterator for ChannelSamples<'a, T, O, S>
    where T: Copy + MulNorm + FromSample<f32> + IntoSample<S>, O: PassBand
{}

impl<'a, T, O, S> Drop for ChannelSamples<'a, T, O, S>
    where T: Copy + MulNorm + FromSample<f32>, O: PassBand
{
    fn drop(&mut self) {
        if self.settled.get().is_some() {
            return
        }
        let mut level = self.level;
        for &delta in self.lane.by_ref() {
            accumulate::<T, O>(&mut level, delta);
        }
        self.settled.set(Some(level));
    }
}

impl<T, O> Blep for BandLimited<T, O>
    where T: SampleDelta + MulNorm
{
    type SampleDelta = T;

    #[inline]
    fn ensure_frame_time(&mut self, sample_rate: u32, ts_rate: f64, frame_ts: FTs, margin_ts: FTs) {
        let samples_per_tick = f64::from(sample_rate) / ts_rate;
        assert!(samples_per_tick > 0.0);
        let max_frame_time = samples_per_tick * (frame_ts as f64 + 2.0 * margin_ts as f64);
        assert!(max_frame_time > 0.0);
        self.samples_per_tick = samples_per_tick;
        self.set_frame_time(max_frame_time);
    }

    #[inline]
    fn end_frame(&mut self, timestamp: FTs) -> usize {
        debug_assert!(timestamp >= 0);
        self.end_frame_at(self.samples_per_tick * timestamp as f64)
    }

    #[inline]
    fn add_step(&mut self, channel: usize, timestamp: FTs, delta: T) {
        self.add_step_at(channel, self.samples_per_tick * timestamp as f64, delta)
    }
}
