/*
    Copyright (C) 2020-2023  Rafal Michalski

    This file is part of CHIPSYNTH, a Rust library for emulating sound chips.

    For the full copyright notice, see the lib.rs file.
*/
//! Frame handling and rendering of [BandLimited] buffers hidden behind [Blep] wrappers.
use chipsynth_core::{
    clock::FTs,
    audio::{Blep, BlepGain, BlepStereo, FromSample, MulNorm, SampleDelta}
};
use super::{BandLimited, PassBand, WideBand, TrebleCut, BassCut, NarrowBand};

/// Frame control and sample output of a band-limited buffer.
///
/// Implemented by [BandLimited], [BandLimitedAny] and by the [Blep] wrappers of the core crate
/// around any of them.
pub trait BandLimitedExt<T>: Blep<SampleDelta=T> {
    fn reset(&mut self);

    fn is_frame_ended(&self) -> bool;
    /// Starts the next frame, see [BandLimited::next_frame].
    fn next_frame(&mut self);
    /// See [BandLimited::timestamp_for_samples].
    fn timestamp_for_samples(&self, nsamples: usize) -> FTs;

    fn max_frame_samples(&self) -> usize;
    /// Writes the samples of the ended frame from `channel` to `output`.
    ///
    /// Writes at most as many samples as [Blep::end_frame] has returned.
    fn render_audio_channel<S>(&self, output: &mut [S], channel: usize)
        where S: FromSample<T>;
    /// Writes the samples of the ended frame into `output` interleaved by `output_nchannels`.
    ///
    /// The source channel `n` goes to the output channel `channel_map[n]`.
    fn render_audio_map_interleaved<S>(&self, output: &mut [S], output_nchannels: usize, channel_map: &[usize])
        where S: FromSample<T>;
}

impl<T, O> BandLimitedExt<T> for BandLimited<T, O>
    where T: SampleDelta + MulNorm + FromSample<f32>, O: PassBand
{
    fn reset(&mut self) {
        BandLimited::reset(self)
    }

    fn is_frame_ended(&self) -> bool {
        BandLimited::is_frame_ended(self)
    }

    fn next_frame(&mut self) {
        BandLimited::next_frame(self)
    }

    fn timestamp_for_samples(&self, nsamples: usize) -> FTs {
        BandLimited::timestamp_for_samples(self, nsamples)
    }

    fn max_frame_samples(&self) -> usize {
        BandLimited::max_frame_samples(self)
    }

    fn render_audio_channel<S>(&self, output: &mut [S], channel: usize)
        where S: FromSample<T>
    {
        output.iter_mut().zip(self.sum_iter::<S>(channel))
              .for_each(|(slot, sample)| *slot = sample);
    }

    fn render_audio_map_interleaved<S>(&self, output: &mut [S], output_nchannels: usize, channel_map: &[usize])
        where S: FromSample<T>
    {
        for (source, &target) in channel_map.iter().enumerate() {
            let slots = output.iter_mut().skip(target).step_by(output_nchannels);
            slots.zip(self.sum_iter::<S>(source))
                 .for_each(|(slot, sample)| *slot = sample);
        }
    }
}

/// A [BandLimited] buffer with its pass band chosen at run time.
#[derive(Debug)]
pub enum BandLimitedAny<T> {
    Wide(BandLimited<T, WideBand>),
    TrebleCut(BandLimited<T, TrebleCut>),
    BassCut(BandLimited<T, BassCut>),
    Narrow(BandLimited<T, NarrowBand>)
}

impl<T: SampleDelta + FromSample<f32>> BandLimitedAny<T> {
    /// Creates a buffer for `channels` channels, optionally cutting off treble and bass.
    pub fn new(channels: usize, cut_treble: bool, cut_bass: bool) -> Self {
        match (cut_treble, cut_bass) {
            (false, false) => BandLimitedAny::Wide(BandLimited::new(channels)),
            (true,  false) => BandLimitedAny::TrebleCut(BandLimited::new(channels)),
            (false,  true) => BandLimitedAny::BassCut(BandLimited::new(channels)),
            (true,   true) => BandLimitedAny::Narrow(BandLimited::new(channels))
        }
    }
}

macro_rules! with_inner {
    ($any:expr, |$blim:ident| $body:expr) => {
        match $any {
            BandLimitedAny::Wide($blim) => $body,
            BandLimitedAny::TrebleCut($blim) => $body,
            BandLimitedAny::BassCut($blim) => $body,
            BandLimitedAny::Narrow($blim) => $body
        }
    };
}

impl<T: SampleDelta + MulNorm> Blep for BandLimitedAny<T> {
    type SampleDelta = T;

    #[inline]
    fn ensure_frame_time(&mut self, sample_rate: u32, ts_rate: f64, frame_ts: FTs, margin_ts: FTs) {
        with_inner!(self, |b| b.ensure_frame_time(sample_rate, ts_rate, frame_ts, margin_ts))
    }

    #[inline]
    fn end_frame(&mut self, timestamp: FTs) -> usize {
        with_inner!(self, |b| Blep::end_frame(b, timestamp))
    }

    #[inline]
    fn add_step(&mut self, channel: usize, timestamp: FTs, delta: T) {
        with_inner!(self, |b| b.add_step(channel, timestamp, delta))
    }
}

impl<T> BandLimitedExt<T> for BandLimitedAny<T>
    where T: SampleDelta + MulNorm + FromSample<f32>
{
    fn reset(&mut self) {
        with_inner!(self, |b| BandLimited::reset(b))
    }

    fn is_frame_ended(&self) -> bool {
        with_inner!(self, |b| BandLimited::is_frame_ended(b))
    }

    fn next_frame(&mut self) {
        with_inner!(self, |b| BandLimited::next_frame(b))
    }

    fn timestamp_for_samples(&self, nsamples: usize) -> FTs {
        with_inner!(self, |b| BandLimited::timestamp_for_samples(b, nsamples))
    }

    fn max_frame_samples(&self) -> usize {
        with_inner!(self, |b| BandLimited::max_frame_samples(b))
    }

    fn render_audio_channel<S>(&self, output: &mut [S], channel: usize)
        where S: FromSample<T>
    {
        with_inner!(self, |b| b.render_audio_channel(output, channel))
    }

    fn render_audio_map_interleaved<S>(&self, output: &mut [S], output_nchannels: usize, channel_map: &[usize])
        where S: FromSample<T>
    {
        with_inner!(self, |b| b.render_audio_map_interleaved(output, output_nchannels, channel_map))
    }
}

macro_rules! forward_through_wrapper {
    ($($wrapper:ident),*) => {$(
        impl<B, T> BandLimitedExt<T> for $wrapper<B>
            where B: BandLimitedExt<T>, $wrapper<B>: Blep<SampleDelta=T>
        {
            #[inline]
            fn reset(&mut self) {
                (**self).reset()
            }
            #[inline]
            fn is_frame_ended(&self) -> bool {
                (**self).is_frame_ended()
            }
            #[inline]
            fn next_frame(&mut self) {
                (**self).next_frame()
            }
            #[inline]
            fn timestamp_for_samples(&self, nsamples: usize) -> FTs {
                (**self).timestamp_for_samples(nsamples)
            }
            #[inline]
            fn max_frame_samples(&self) -> usize {
                (**self).max_frame_samples()
            }
            #[inline]
            fn render_audio_channel<S>(&self, output: &mut [S], channel: usize)
                where S: FromSample<T>
            {
                (**self).render_audio_channel(output, channel)
            }
            #[inline]
            fn render_audio_map_interleaved<S>(&self, output: &mut [S], output_nchannels: usize, channel_map: &[usize])
                where S: FromSample<T>
            {
                (**self).render_audio_map_interleaved(output, output_nchannels, channel_map)
            }
        }
    )*};
}

forward_through_wrapper!(BlepGain, BlepStereo);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_limited_any_renders_interleaved() {
        let mut blep = BlepStereo::new(0.5, BlepGain::new(1.0, BandLimitedAny::<f32>::new(2, true, false)));
        assert!(matches!(**blep, BandLimitedAny::TrebleCut(..)));
        blep.ensure_frame_time(44100, 1_000_000.0, 10_000, 100);
        assert!(blep.max_frame_samples() >= 441);
        blep.add_step(0, 50, 0.5);
        blep.add_step(1, 50, -0.5);
        let ts = blep.timestamp_for_samples(64);
        assert_eq!(blep.end_frame(ts), 64);
        assert!(blep.is_frame_ended());
        let mut stereo = vec![0i16; 128];
        blep.render_audio_map_interleaved(&mut stereo, 2, &[1, 0]);
        let mut left = vec![0i16; 64];
        blep.render_audio_channel(&mut left, 0);
        let swapped: Vec<i16> = stereo.iter().skip(1).step_by(2).copied().collect();
        assert_eq!(swapped, left);
        assert!(left[60] > 0 && stereo[120] < 0);
        blep.next_frame();
        blep.reset();
        assert!(!blep.is_frame_ended());
    }
}
