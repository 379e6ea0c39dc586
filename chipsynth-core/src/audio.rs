/*
    Copyright (C) 2020-2023  Rafal Michalski

    This file is part of CHIPSYNTH, a Rust library for emulating sound chips.

    For the full copyright notice, see the lib.rs file.
*/
//! Pulse buffer interfaces shared by the chips and the renderer.
mod sample;
pub mod scope;

use core::ops::{Deref, DerefMut};

pub use sample::{
    AudioSample,
    FromLevel,
    FromSample,
    IntoSample,
    SampleDelta,
    MulNorm
};
pub use scope::{ScopeBuffer, ScopeEvent};
pub use crate::clock::FTs;

/// An interface of Bandwidth-Limited Pulse Buffers used by chip voices to emit level changes.
///
/// A chip voice produces a step function: its output holds one level until the next edge.
/// Sampling such a function naively at the host rate aliases audibly, because every edge carries
/// energy above the [Nyquist frequency]. Instead of sampling, each edge is reported as a ∆ amplitude
/// at a chip-clock time stamp, and the implementation mixes a precomputed band-limited step
/// (see [Hard Sync]) into its output at that time.
///
/// Audio is produced in frames. Steps are added with [Blep::add_step], the frame is closed with
/// [Blep::end_frame], and the implementation may then hand out the finished samples.
///
/// [Nyquist frequency]: https://en.wikipedia.org/wiki/Nyquist_frequency
/// [Hard Sync]: https://www.cs.cmu.edu/~eli/papers/icmc01-hardsync.pdf
pub trait Blep {
    /// A type for sample ∆ amplitudes (pulse height).
    type SampleDelta: SampleDelta;
    /// Sets up the time rate and reserves memory for frames of up to `frame_ts` + `margin_ts` ticks.
    ///
    /// * `sample_rate` is a number of output audio samples per second.
    /// * `ts_rate` is a number of chip clock ticks per second.
    /// * `frame_ts` is a nominal duration of a single frame in ticks.
    /// * `margin_ts` is the largest excess of an actual frame over `frame_ts`.
    ///
    /// Should not be called again unless any of the parameters changes.
    fn ensure_frame_time(&mut self, sample_rate: u32, ts_rate: f64, frame_ts: FTs, margin_ts: FTs);
    /// Adds a pulse step of height `delta` at `timestamp` to the audio `channel`.
    ///
    /// The time stamp must not precede the frame start or exceed `frame_ts` + `margin_ts`.
    /// The implementation may panic otherwise.
    fn add_step(&mut self, channel: usize, timestamp: FTs, delta: Self::SampleDelta);
    /// Finalizes the audio frame at `timestamp`, which becomes time stamp 0 of the next frame.
    ///
    /// Returns the number of samples produced, single channel wise.
    ///
    /// No step may be added past `timestamp` before the frame is finalized.
    fn end_frame(&mut self, timestamp: FTs) -> usize;
}

/// Scales the ∆ amplitude of every step by `gain` before passing it to the `inner` [Blep].
///
/// Used as the master volume of a renderer.
pub struct BlepGain<B: Blep> {
    /// Normalized: `1.0` for floats and `MAX` for integers is unity.
    pub gain: B::SampleDelta,
    pub inner: B,
}

/// Passes channels 0 and 1 through to the `inner` [Blep] and spreads steps of any other channel
/// over both of them, scaled by `mono_gain`.
///
/// Chips with a single output emit their steps on channel 2.
pub struct BlepStereo<B: Blep> {
    pub mono_gain: B::SampleDelta,
    pub inner: B,
}

macro_rules! blep_wrapper {
    ($($wrapper:ident($factor:ident)),*) => {$(
        impl<B: Blep> $wrapper<B> {
            pub fn new($factor: B::SampleDelta, inner: B) -> Self {
                $wrapper { $factor, inner }
            }
        }

        impl<B: Blep> Deref for $wrapper<B> {
            type Target = B;
            #[inline]
            fn deref(&self) -> &B {
                &self.inner
            }
        }

        impl<B: Blep> DerefMut for $wrapper<B> {
            #[inline]
            fn deref_mut(&mut self) -> &mut B {
                &mut self.inner
            }
        }
    )*};
}

blep_wrapper!(BlepGain(gain), BlepStereo(mono_gain));

impl<B: Blep + ?Sized> Blep for &mut B {
    type SampleDelta = B::SampleDelta;

    #[inline]
    fn ensure_frame_time(&mut self, sample_rate: u32, ts_rate: f64, frame_ts: FTs, margin_ts: FTs) {
        (**self).ensure_frame_time(sample_rate, ts_rate, frame_ts, margin_ts)
    }
    #[inline]
    fn end_frame(&mut self, timestamp: FTs) -> usize {
        (**self).end_frame(timestamp)
    }
    #[inline]
    fn add_step(&mut self, channel: usize, timestamp: FTs, delta: B::SampleDelta) {
        (**self).add_step(channel, timestamp, delta)
    }
}

impl<B> Blep for BlepGain<B>
    where B: Blep, B::SampleDelta: MulNorm
{
    type SampleDelta = B::SampleDelta;

    #[inline]
    fn ensure_frame_time(&mut self, sample_rate: u32, ts_rate: f64, frame_ts: FTs, margin_ts: FTs) {
        self.inner.ensure_frame_time(sample_rate, ts_rate, frame_ts, margin_ts)
    }
    #[inline]
    fn end_frame(&mut self, timestamp: FTs) -> usize {
        self.inner.end_frame(timestamp)
    }
    #[inline]
    fn add_step(&mut self, channel: usize, timestamp: FTs, delta: B::SampleDelta) {
        let delta = delta.mul_norm(self.gain);
        self.inner.add_step(channel, timestamp, delta)
    }
}

impl<B> Blep for BlepStereo<B>
    where B: Blep, B::SampleDelta: MulNorm
{
    type SampleDelta = B::SampleDelta;

    #[inline]
    fn ensure_frame_time(&mut self, sample_rate: u32, ts_rate: f64, frame_ts: FTs, margin_ts: FTs) {
        self.inner.ensure_frame_time(sample_rate, ts_rate, frame_ts, margin_ts)
    }
    #[inline]
    fn end_frame(&mut self, timestamp: FTs) -> usize {
        self.inner.end_frame(timestamp)
    }
    #[inline]
    fn add_step(&mut self, channel: usize, timestamp: FTs, delta: B::SampleDelta) {
        if channel < 2 {
            return self.inner.add_step(channel, timestamp, delta)
        }
        let delta = delta.mul_norm(self.mono_gain);
        for side in 0..2 {
            self.inner.add_step(side, timestamp, delta);
        }
    }
}

/// Renders sample-and-hold pulses from `(timestamp, level)` pairs sorted by time stamps.
///
/// `prev_level` is the level in effect before the first change. Changes at or past `end_ts`
/// are not rendered. Returns the last rendered level.
pub fn render_level_steps<A, I>(
            prev_level: i32,
            end_ts: Option<FTs>,
            changes: I,
            blep: &mut A, channel: usize
        ) -> i32
    where A: Blep + ?Sized,
          A::SampleDelta: FromLevel,
          I: IntoIterator<Item=(FTs, i32)>
{
    changes.into_iter()
           .take_while(|&(timestamp, _)| end_ts.map_or(true, |end_ts| timestamp < end_ts))
           .fold(prev_level, |last_level, (timestamp, level)| {
               let delta = level.wrapping_sub(last_level);
               if delta != 0 {
                   blep.add_step(channel, timestamp, A::SampleDelta::from_level(delta));
               }
               level
           })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct StepLog(Vec<(usize, FTs, i32)>);

    impl Blep for StepLog {
        type SampleDelta = i32;
        fn ensure_frame_time(&mut self, _: u32, _: f64, _: FTs, _: FTs) {}
        fn add_step(&mut self, channel: usize, timestamp: FTs, delta: i32) {
            self.0.push((channel, timestamp, delta));
        }
        fn end_frame(&mut self, timestamp: FTs) -> usize {
            timestamp as usize
        }
    }

    #[test]
    fn blep_stereo_and_gain_work() {
        let mut log = StepLog::default();
        {
            let mut blep = BlepStereo::new(i32::MAX / 2 + 1, BlepGain::new(i32::MAX, &mut log));
            blep.add_step(0, 1, 100 << 16);
            blep.add_step(1, 2, -(100 << 16));
            blep.add_step(2, 3, 100 << 16);
            assert_eq!(blep.end_frame(10), 10);
        }
        assert_eq!(log.0.len(), 4);
        assert_eq!(log.0[0].0, 0);
        assert_eq!(log.0[1].0, 1);
        assert_eq!((log.0[2].0, log.0[3].0), (0, 1));
        assert!((log.0[2].2 - (50 << 16)).abs() < 2);
        assert_eq!(log.0[2].2, log.0[3].2);
    }

    #[test]
    fn render_level_steps_works() {
        let mut log = StepLog::default();
        let changes = [(0, 0), (2, 100), (3, 100), (5, -100), (9, 0), (10, 50)];
        let last = render_level_steps(0, Some(10), changes.iter().copied(), &mut log, 2);
        assert_eq!(last, 0);
        assert_eq!(log.0, vec![(2, 2, 100 << 16), (2, 5, -(200 << 16)), (2, 9, 100 << 16)]);
    }
}
