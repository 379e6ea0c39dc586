/*
    Copyright (C) 2020-2023  Rafal Michalski

    This file is part of CHIPSYNTH, a Rust library for emulating sound chips.

    For the full copyright notice, see the lib.rs file.
*/
//! IMA ADPCM block decoding.
//!
//! A block begins with a 4-byte header per channel: the initial predictor (little endian `i16`),
//! the step index and a reserved byte. The predictor is the first sample of the block.
//! 4-bit codes follow, low nibble first. Stereo blocks interleave 4 bytes (8 samples) of each
//! channel.
#[cfg(feature = "snapshot")]
use serde::{Serialize, Deserialize};

#[allow(unused_imports)]
use log::{debug, trace, warn};

use chipsynth_core::error::{ConfigError, Result};

/// The size of a block header of a single channel.
pub const CHANNEL_HEADER_SIZE: usize = 4;
/// The largest step index.
pub const MAX_STEP_INDEX: u8 = 88;

const INTERLEAVE: usize = 4;

const INDEX_TABLE: [i8; 16] = [-1, -1, -1, -1, 2, 4, 6, 8,
                               -1, -1, -1, -1, 2, 4, 6, 8];

const STEP_TABLE: [i32; MAX_STEP_INDEX as usize + 1] = [
    7, 8, 9, 10, 11, 12, 13, 14, 16, 17,
    19, 21, 23, 25, 28, 31, 34, 37, 41, 45,
    50, 55, 60, 66, 73, 80, 88, 97, 107, 118,
    130, 143, 157, 173, 190, 209, 230, 253, 279, 307,
    337, 371, 408, 449, 494, 544, 598, 658, 724, 796,
    876, 963, 1060, 1166, 1282, 1411, 1552, 1707, 1878, 2066,
    2272, 2499, 2749, 3024, 3327, 3660, 4026, 4428, 4871, 5358,
    5894, 6484, 7132, 7845, 8630, 9493, 10442, 11487, 12635, 13899,
    15289, 16818, 18500, 20350, 22385, 24623, 27086, 29794, 32767
];

/// The block layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "snapshot", serde(default, rename_all = "camelCase"))]
pub struct AdpcmConfig {
    /// 1 or 2.
    pub channels: u8,
    /// Only 4 is supported.
    pub bits_per_sample: u8,
    /// The size of a block in bytes, including the headers.
    pub block_size: usize,
}

impl Default for AdpcmConfig {
    fn default() -> Self {
        AdpcmConfig { channels: 1, bits_per_sample: 4, block_size: 256 }
    }
}

/// The predictor of a single channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImaChannel {
    pub predictor: i32,
    pub step_index: u8,
}

impl ImaChannel {
    /// Decodes a 4-bit code and returns the next sample.
    #[inline]
    pub fn decode(&mut self, code: u8) -> i16 {
        let code = code & 0x0F;
        let step = STEP_TABLE[usize::from(self.step_index)];
        let mut diff = step >> 3;
        if code & 1 != 0 { diff += step >> 2; }
        if code & 2 != 0 { diff += step >> 1; }
        if code & 4 != 0 { diff += step; }
        if code & 8 != 0 { diff = -diff; }
        self.predictor = (self.predictor + diff).clamp(i16::MIN.into(), i16::MAX.into());
        let index = i16::from(self.step_index) + i16::from(INDEX_TABLE[usize::from(code)]);
        self.step_index = index.clamp(0, MAX_STEP_INDEX.into()) as u8;
        self.predictor as i16
    }

    fn reset(&mut self, header: &[u8]) {
        self.predictor = i32::from(i16::from_le_bytes([header[0], header[1]]));
        let index = header[2];
        if index > MAX_STEP_INDEX {
            warn!("IMA ADPCM: step index out of range: {}", index);
        }
        self.step_index = index.min(MAX_STEP_INDEX);
    }
}

/// Decodes IMA ADPCM blocks to interleaved 16-bit PCM.
#[derive(Clone, Debug)]
pub struct AdpcmDecoder {
    config: AdpcmConfig,
    channels: [ImaChannel; 2],
}

impl AdpcmDecoder {
    pub fn new(config: &AdpcmConfig) -> Result<Self> {
        if config.bits_per_sample != 4 {
            return Err(ConfigError::UnsupportedFormat(
                format!("IMA ADPCM with {} bits per sample", config.bits_per_sample)))
        }
        let channels = usize::from(config.channels);
        if !(1..=2).contains(&channels) {
            return Err(ConfigError::UnsupportedFormat(
                format!("IMA ADPCM with {} channels", config.channels)))
        }
        let header_size = CHANNEL_HEADER_SIZE * channels;
        if config.block_size <= header_size || (config.block_size - header_size) % (INTERLEAVE * channels) != 0 {
            return Err(ConfigError::Invalid(
                format!("IMA ADPCM block size {} for {} channels", config.block_size, channels)))
        }
        debug!("IMA ADPCM: channels: {} block size: {}", channels, config.block_size);
        Ok(AdpcmDecoder { config: *config, channels: Default::default() })
    }

    pub fn config(&self) -> &AdpcmConfig {
        &self.config
    }

    #[inline]
    pub fn channel_count(&self) -> usize {
        usize::from(self.config.channels)
    }
    /// Returns the number of samples per channel in a block.
    pub fn samples_per_block(&self) -> usize {
        let channels = self.channel_count();
        (self.config.block_size - CHANNEL_HEADER_SIZE * channels) * 2 / channels + 1
    }
    /// Returns the predictor state of a channel.
    pub fn channel(&self, index: usize) -> Option<&ImaChannel> {
        self.channels[..self.channel_count()].get(index)
    }
    /// Decodes a block into `output`, which must have room for `samples_per_block * channels`
    /// samples.
    ///
    /// Samples missing from a truncated block are set to 0. Returns the number of samples
    /// per channel actually decoded.
    pub fn decode_block(&mut self, block: &[u8], output: &mut [i16]) -> usize {
        let channels = self.channel_count();
        let spb = self.samples_per_block();
        let output = &mut output[..spb * channels];
        for sample in output.iter_mut() {
            *sample = 0;
        }
        let header_size = CHANNEL_HEADER_SIZE * channels;
        if block.len() < header_size {
            warn!("IMA ADPCM: truncated block header: {} bytes", block.len());
            return 0
        }
        let (headers, data) = block[..block.len().min(self.config.block_size)].split_at(header_size);
        for (ch, header) in self.channels.iter_mut().zip(headers.chunks_exact(CHANNEL_HEADER_SIZE)) {
            ch.reset(header);
        }
        for (sample, ch) in output.iter_mut().zip(self.channels.iter()) {
            *sample = ch.predictor as i16;
        }
        let mut decoded = 1;
        if channels == 1 {
            let ch = &mut self.channels[0];
            for (pos, byte) in data.iter().enumerate() {
                output[1 + pos * 2] = ch.decode(byte & 0x0F);
                output[2 + pos * 2] = ch.decode(byte >> 4);
            }
            decoded += data.len() * 2;
        }
        else {
            // 4 bytes of the left channel followed by 4 bytes of the right one
            let group_size = INTERLEAVE * channels;
            for (group_index, group) in data.chunks(group_size).enumerate() {
                let first = 1 + group_index * INTERLEAVE * 2;
                for (index, byte) in group.iter().enumerate() {
                    let (ch_index, pos) = (index / INTERLEAVE, index % INTERLEAVE);
                    let ch = &mut self.channels[ch_index];
                    let frame = first + pos * 2;
                    output[frame * channels + ch_index] = ch.decode(byte & 0x0F);
                    output[(frame + 1) * channels + ch_index] = ch.decode(byte >> 4);
                }
                if group.len() == group_size {
                    decoded += INTERLEAVE * 2;
                }
            }
        }
        if decoded < spb {
            warn!("IMA ADPCM: truncated block: {} of {} samples", decoded, spb);
            // a partial group leaves frames with one channel decoded
            let end = decoded * channels;
            for sample in output[end..].iter_mut() {
                *sample = 0;
            }
        }
        decoded
    }
    /// Decodes consecutive blocks from `data` and appends interleaved samples to `output`.
    ///
    /// Returns the number of samples per channel appended.
    pub fn decode(&mut self, data: &[u8], output: &mut Vec<i16>) -> usize {
        let frames = self.samples_per_block();
        let channels = self.channel_count();
        let mut total = 0;
        for block in data.chunks(self.config.block_size) {
            let start = output.len();
            output.resize(start + frames * channels, 0);
            self.decode_block(block, &mut output[start..]);
            total += frames;
        }
        total
    }
}
