/*
    Copyright (C) 2020-2023  Rafal Michalski

    This file is part of CHIPSYNTH, a Rust library for emulating sound chips.

    For the full copyright notice, see the lib.rs file.
*/
//! Playback of decoded PCM through a pulse buffer.
#[cfg(feature = "snapshot")]
use serde::{Serialize, Deserialize};

#[allow(unused_imports)]
use log::{debug, trace, warn};

use chipsynth_core::audio::{Blep, FromLevel, render_level_steps};
use chipsynth_core::clock::FTs;
use chipsynth_core::error::{ConfigError, Result};

/// Plays mono PCM samples as sample-and-hold steps on a single [Blep] channel.
///
/// Sample `i` starts at chip tick `i * clock_hz / sample_rate` (rounded down) counted from the
/// moment the playback started, so the pulse buffer performs the resampling to the host rate.
/// When the samples run out the level drops to 0, unless a loop is set.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "snapshot", serde(rename_all = "camelCase"))]
pub struct SamplePlayer {
    samples: Vec<i16>,
    clock_hz: u32,
    sample_rate: u32,
    channel: usize,
    loop_start: Option<usize>,
    position: usize,
    origin_index: usize,
    origin_tick: u64,
    frame_tick: u64,
    last_level: i32,
}

impl SamplePlayer {
    /// Creates a player of `samples` recorded at `sample_rate` for a chip clock of `clock_hz`.
    pub fn new(samples: Vec<i16>, sample_rate: u32, clock_hz: u32, channel: usize) -> Result<Self> {
        if sample_rate == 0 || clock_hz == 0 {
            return Err(ConfigError::ZeroRate)
        }
        if clock_hz < sample_rate {
            return Err(ConfigError::ClockBelowHostRate { clock: clock_hz, host: sample_rate })
        }
        debug!("sample player: {} samples at {} Hz, clock: {} Hz", samples.len(), sample_rate, clock_hz);
        Ok(SamplePlayer {
            samples, clock_hz, sample_rate, channel,
            loop_start: None,
            position: 0,
            origin_index: 0,
            origin_tick: 0,
            frame_tick: 0,
            last_level: 0,
        })
    }
    /// Mixes interleaved samples of `channels` channels down to mono.
    pub fn downmix(interleaved: &[i16], channels: usize) -> Vec<i16> {
        match channels {
            0 => Vec::new(),
            1 => interleaved.to_vec(),
            _ => interleaved.chunks_exact(channels).map(|frame| {
                let sum: i32 = frame.iter().copied().map(i32::from).sum();
                (sum / channels as i32) as i16
            }).collect()
        }
    }
    /// Sets the sample index the playback jumps back to after the last sample.
    ///
    /// A loop start beyond the last sample disables looping.
    pub fn set_loop(&mut self, loop_start: Option<usize>) {
        self.loop_start = loop_start.filter(|&start| start < self.samples.len());
    }

    pub fn loop_start(&self) -> Option<usize> {
        self.loop_start
    }
    /// Returns the index of the next sample to be played.
    pub fn position(&self) -> usize {
        self.position
    }
    /// Returns the last level sent to the pulse buffer.
    pub fn level(&self) -> i32 {
        self.last_level
    }
    /// Returns `true` if all samples were played and the level returned to 0.
    pub fn is_finished(&self) -> bool {
        self.loop_start.is_none() && self.position >= self.samples.len() && self.last_level == 0
    }
    /// Restarts the playback at the beginning of the current frame.
    ///
    /// The level is kept, so the next step is relative to what was already played.
    pub fn rewind(&mut self) {
        self.position = 0;
        self.origin_index = 0;
        self.origin_tick = self.frame_tick;
    }
    /// Sends steps of all samples starting before `end_ts` of the current frame to `blep`.
    pub fn run_to<B>(&mut self, blep: &mut B, end_ts: FTs)
        where B: Blep + ?Sized, B::SampleDelta: FromLevel
    {
        let end_tick = self.frame_tick + end_ts.max(0) as u64;
        let len = self.samples.len();
        loop {
            let end = (self.origin_index as u64 + self.samples_before(end_tick)).min(len as u64) as usize;
            if end > self.position {
                let changes = (self.position..end).map(|index| {
                    (self.timestamp(self.tick_of(index)), i32::from(self.samples[index]))
                });
                let level = render_level_steps(self.last_level, None, changes, blep, self.channel);
                self.last_level = level;
                self.position = end;
            }
            if self.position < len {
                break
            }
            let end_of_data = self.tick_of(len);
            if end_of_data >= end_tick {
                break
            }
            match self.loop_start {
                Some(start) => {
                    trace!("sample player: loop at tick {}", end_of_data);
                    self.origin_tick = end_of_data;
                    self.origin_index = start;
                    self.position = start;
                }
                None => {
                    if self.last_level != 0 {
                        let ts = self.timestamp(end_of_data);
                        self.last_level = render_level_steps(self.last_level, None, Some((ts, 0)),
                                                             blep, self.channel);
                    }
                    break
                }
            }
        }
    }
    /// Ends the current frame at `end_ts`, which becomes time stamp 0 of the next frame.
    ///
    /// Call [SamplePlayer::run_to] with the same `end_ts` first.
    pub fn end_frame(&mut self, end_ts: FTs) {
        self.frame_tick += end_ts.max(0) as u64;
    }

    #[inline]
    fn tick_of(&self, index: usize) -> u64 {
        let samples = (index - self.origin_index) as u64;
        self.origin_tick + samples * u64::from(self.clock_hz) / u64::from(self.sample_rate)
    }

    #[inline]
    fn timestamp(&self, tick: u64) -> FTs {
        tick.saturating_sub(self.frame_tick) as FTs
    }
    // the number of samples since the origin starting before end_tick
    #[inline]
    fn samples_before(&self, end_tick: u64) -> u64 {
        if end_tick <= self.origin_tick {
            return 0
        }
        let clock = u64::from(self.clock_hz);
        ((end_tick - self.origin_tick) * u64::from(self.sample_rate) + clock - 1) / clock
    }
}
