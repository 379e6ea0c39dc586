/*
    Copyright (C) 2020-2023  Rafal Michalski

    This file is part of CHIPSYNTH, a Rust library for emulating sound chips.

    For the full copyright notice, see the lib.rs file.
*/
//! Pyramid vector quantization in fixed point.
//!
//! A band of `N` normalized (Q14) coefficients is quantized to a pulse vector with `K` pulses:
//! an integer vector whose absolute values sum up to `K`. The decoder reconstructs the band by
//! scaling the pulse vector to the requested gain and undoing the spreading rotation.
//!
//! All arithmetic is bit-exact with the reference fixed-point decoders. In particular the greedy
//! pulse search compares candidate scores by cross-multiplication and never divides.
//!
//! A frame stream handled by [PvqDecoder] and [PvqEncoder] is a sequence of frames, each made of
//! a big endian Q15 gain followed by the pulse vector index packed MSB first and padded to a byte
//! boundary.
pub mod bits;
pub mod cwrs;
pub mod mathops;

#[cfg(feature = "snapshot")]
use serde::{Serialize, Deserialize};

#[allow(unused_imports)]
use log::{debug, trace, warn};

use chipsynth_core::error::{ConfigError, Result};

use bits::{BitReader, BitWriter};
use cwrs::PulseTable;
use mathops::*;

/// The largest supported band size.
pub const MAX_BAND_SIZE: usize = 176;
/// The largest supported number of pulses.
pub const MAX_PULSES: usize = 128;
/// The size of a frame gain in bytes.
pub const GAIN_BYTES: usize = 2;

const SPREAD_FACTOR: [i32; 3] = [5, 10, 15];
const VERY_LARGE16: i32 = 32767;
const EPSILON: i32 = 1;

/// The amount of spreading rotation applied before quantization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum Spread {
    None = 0,
    Light = 1,
    Normal = 2,
    Aggressive = 3,
}

impl Default for Spread {
    fn default() -> Self {
        Spread::Normal
    }
}

impl Spread {
    fn factor(self) -> Option<i32> {
        match self {
            Spread::None => None,
            spread => Some(SPREAD_FACTOR[spread as usize - 1])
        }
    }
}

fn exp_rotation1(x: &mut [i16], len: usize, stride: usize, c: i16, s: i16) {
    for i in 0..len.saturating_sub(stride) {
        let (x1, x2) = (x[i], x[i + stride]);
        x[i + stride] = ((mult16_16(c, x2) + mult16_16(s, x1)) >> 15) as i16;
        x[i] = ((mult16_16(c, x1) - mult16_16(s, x2)) >> 15) as i16;
    }
    if len > 2 * stride {
        for i in (0..len - 2 * stride).rev() {
            let (x1, x2) = (x[i], x[i + stride]);
            x[i + stride] = ((mult16_16(c, x2) + mult16_16(s, x1)) >> 15) as i16;
            x[i] = ((mult16_16(c, x1) - mult16_16(s, x2)) >> 15) as i16;
        }
    }
}

/// Applies (`forward == true`) or undoes the spreading rotation of `x` split into `blocks`
/// interleaved blocks, for `k` pulses.
pub fn exp_rotation(x: &mut [i16], forward: bool, blocks: usize, k: usize, spread: Spread) {
    let len = x.len();
    let factor = match spread.factor() {
        Some(factor) if 2 * k < len => factor,
        _ => return
    };
    let gain = div(mult16_16(Q15_ONE, len as i16), len as i32 + factor * k as i32) as i16;
    let theta = (mult16_16_q15(gain, gain) >> 1) as i16;
    let c = cos_norm(i32::from(theta));
    let s = cos_norm(i32::from(sub16(Q15_ONE, theta)));

    let mut stride2 = 0;
    if len >= 8 * blocks {
        stride2 = 1;
        // sqrt(len/blocks) with rounding
        while (stride2 * stride2 + stride2) * blocks + (blocks >> 2) < len {
            stride2 += 1;
        }
    }
    let len = len / blocks;
    for block in x.chunks_exact_mut(len).take(blocks) {
        if forward {
            exp_rotation1(block, len, 1, c, s.wrapping_neg());
            if stride2 != 0 {
                exp_rotation1(block, len, stride2, s, c.wrapping_neg());
            }
        }
        else {
            if stride2 != 0 {
                exp_rotation1(block, len, stride2, s, c);
            }
            exp_rotation1(block, len, 1, c, s);
        }
    }
}

/// Scales `pulses` with energy `ryy` to `gain` into `x`.
pub fn normalise_residual(pulses: &[i32], x: &mut [i16], ryy: i32, gain: i16) {
    let k = ilog2(ryy) >> 1;
    let t = vshr32(ryy, (k - 7) << 1);
    let g = mult16_16_p15(rsqrt_norm(t), gain);
    for (x, &y) in x.iter_mut().zip(pulses.iter()) {
        *x = pshr32(mult16_16(g, y as i16), k + 1) as i16;
    }
}

/// Rescales `x` to `gain`.
pub fn renormalise_vector(x: &mut [i16], gain: i16) {
    let e = x.iter().fold(EPSILON, |e, &v| e.wrapping_add(mult16_16(v, v)));
    let k = ilog2(e) >> 1;
    let t = vshr32(e, (k - 7) << 1);
    let g = mult16_16_p15(rsqrt_norm(t), gain);
    for v in x.iter_mut() {
        *v = pshr32(mult16_16(g, *v), k + 1) as i16;
    }
}

/// Returns a bit mask of the `blocks` interleaved blocks with at least one pulse.
pub fn extract_collapse_mask(pulses: &[i32], blocks: usize) -> u32 {
    if blocks <= 1 {
        return 1
    }
    let n0 = pulses.len() / blocks;
    pulses.chunks_exact(n0).take(blocks).enumerate()
          .fold(0, |mask, (i, block)| {
              if block.iter().any(|&y| y != 0) { mask | 1 << i } else { mask }
          })
}

/// Scratch buffers of the pulse search.
#[derive(Clone, Debug, Default)]
pub struct SearchScratch {
    y: Vec<i16>,
    signx: Vec<i16>,
}

/// Quantizes `x` to a pulse vector with `k` pulses written to `pulses`.
///
/// When `resynth` is `true`, `x` is replaced with the decoded band scaled to `gain`.
/// Returns the collapse mask.
#[allow(clippy::too_many_arguments)]
pub fn alg_quant(
        x: &mut [i16],
        pulses: &mut [i32],
        k: usize,
        spread: Spread,
        blocks: usize,
        resynth: bool,
        gain: i16,
        scratch: &mut SearchScratch
    ) -> u32
{
    let n = x.len();
    debug_assert!(k != 0, "alg_quant needs at least one pulse");
    debug_assert_eq!(pulses.len(), n);
    let SearchScratch { y, signx } = scratch;
    y.clear();
    y.resize(n, 0);
    signx.clear();
    signx.resize(n, 0);

    exp_rotation(x, true, blocks, k, spread);

    for j in 0..n {
        if x[j] > 0 {
            signx[j] = 1;
        }
        else {
            signx[j] = -1;
            x[j] = x[j].wrapping_neg();
        }
        pulses[j] = 0;
    }

    let mut xy: i32 = 0;
    let mut yy: i16 = 0;
    let mut pulses_left = k as i32;

    // pre-search by projecting on the pyramid
    if k > n >> 1 {
        let mut sum: i32 = x.iter().map(|&v| i32::from(v)).sum();
        if sum <= k as i32 {
            x[0] = 1 << 14;
            for v in x[1..].iter_mut() {
                *v = 0;
            }
            sum = 1 << 14;
        }
        let scale = mult16_32_q16(k as i16 - 1, rcp(sum)) as i16;
        for j in 0..n {
            // rounding towards zero
            let iy = i32::from(mult16_16_q15(x[j], scale));
            pulses[j] = iy;
            y[j] = iy as i16;
            yy = (i32::from(yy) + mult16_16(y[j], y[j])) as i16;
            xy = xy.wrapping_add(mult16_16(x[j], y[j]));
            y[j] = y[j].wrapping_mul(2);
            pulses_left -= iy;
        }
    }
    debug_assert!(pulses_left >= 1, "too many pulses in the quick pass");

    if pulses_left > n as i32 + 3 {
        let tmp = pulses_left as i16;
        yy = (i32::from(yy) + mult16_16(tmp, tmp)) as i16;
        yy = (i32::from(yy) + mult16_16(tmp, y[0])) as i16;
        pulses[0] += pulses_left;
        pulses_left = 0;
    }

    for i in 0..pulses_left {
        let rshift = 1 + ilog2(k as i32 - pulses_left + i + 1);
        let mut best_id = 0;
        let mut best_num: i16 = -VERY_LARGE16 as i16;
        let mut best_den: i16 = 0;
        // the squared magnitude term is added anyway
        yy = add16(yy, 1);
        for j in 0..n {
            let rxy = (xy.wrapping_add(i32::from(x[j])) >> rshift) as i16;
            // y is pre-multiplied by 2
            let ryy = add16(yy, y[j]);
            // maximize rxy/sqrt(ryy) without dividing
            let rxy = mult16_16_q15(rxy, rxy);
            if mult16_16(best_den, rxy) > mult16_16(ryy, best_num) {
                best_den = ryy;
                best_num = rxy;
                best_id = j;
            }
        }
        xy = xy.wrapping_add(i32::from(x[best_id]));
        yy = add16(yy, y[best_id]);
        y[best_id] = y[best_id].wrapping_add(2);
        pulses[best_id] += 1;
    }

    for j in 0..n {
        x[j] = mult16_16(signx[j], x[j]) as i16;
        if signx[j] < 0 {
            pulses[j] = -pulses[j];
        }
    }

    if resynth {
        normalise_residual(pulses, x, i32::from(yy), gain);
        exp_rotation(x, false, blocks, k, spread);
    }
    extract_collapse_mask(pulses, blocks)
}

/// Reconstructs a band from a pulse vector with `k` pulses into `x`, scaled to `gain`.
///
/// Returns the collapse mask.
pub fn alg_unquant(
        x: &mut [i16],
        pulses: &[i32],
        k: usize,
        spread: Spread,
        blocks: usize,
        gain: i16
    ) -> u32
{
    debug_assert!(k != 0, "alg_unquant needs at least one pulse");
    let ryy = pulses.iter().fold(0i32, |acc, &y| acc.wrapping_add(mult16_16(y as i16, y as i16)));
    normalise_residual(pulses, x, ryy, gain);
    exp_rotation(x, false, blocks, k, spread);
    extract_collapse_mask(pulses, blocks)
}

/// The band geometry of a frame stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "snapshot", serde(default, rename_all = "camelCase"))]
pub struct PvqConfig {
    /// The number of coefficients in a band, `2..=176`.
    pub size: usize,
    /// The number of pulses, `1..=128`.
    pub pulses: usize,
    pub spread: Spread,
    /// The number of interleaved blocks, must divide `size`.
    pub blocks: usize,
}

impl Default for PvqConfig {
    fn default() -> Self {
        PvqConfig { size: 16, pulses: 8, spread: Spread::Normal, blocks: 1 }
    }
}

impl PvqConfig {
    fn pulse_table(&self) -> Result<PulseTable> {
        if !(2..=MAX_BAND_SIZE).contains(&self.size) {
            return Err(ConfigError::Invalid(
                format!("band size {} out of range 2..={}", self.size, MAX_BAND_SIZE)))
        }
        if !(1..=MAX_PULSES).contains(&self.pulses) {
            return Err(ConfigError::Invalid(
                format!("pulse count {} out of range 1..={}", self.pulses, MAX_PULSES)))
        }
        if self.blocks == 0 || self.size % self.blocks != 0 {
            return Err(ConfigError::Invalid(
                format!("block count {} doesn't divide band size {}", self.blocks, self.size)))
        }
        PulseTable::new(self.size, self.pulses).ok_or_else(|| ConfigError::Invalid(
                format!("too many pulse vectors for N={} K={}", self.size, self.pulses)))
    }
}

/// Decodes frame streams to bands of Q14 coefficients.
#[derive(Clone, Debug)]
pub struct PvqDecoder {
    config: PvqConfig,
    table: PulseTable,
    pulses: Vec<i32>,
}

impl PvqDecoder {
    pub fn new(config: &PvqConfig) -> Result<Self> {
        let table = config.pulse_table()?;
        debug!("PVQ decoder: N={} K={} index bits: {}", config.size, config.pulses, table.index_bits());
        Ok(PvqDecoder { config: *config, pulses: vec![0; config.size], table })
    }

    pub fn config(&self) -> &PvqConfig {
        &self.config
    }
    /// Returns the size of an encoded frame in bytes.
    pub fn frame_bytes(&self) -> usize {
        GAIN_BYTES + (self.table.index_bits() as usize + 7) / 8
    }
    /// Returns the pulse vector of the last decoded frame.
    pub fn pulses(&self) -> &[i32] {
        &self.pulses
    }
    /// Decodes a single frame into `output` which must have room for a band.
    ///
    /// A truncated or corrupt frame produces a band of zeros. Returns the collapse mask
    /// or 0 in this instance.
    pub fn decode_frame(&mut self, frame: &[u8], output: &mut [i16]) -> u32 {
        let output = &mut output[..self.config.size];
        let PvqConfig { pulses: k, spread, blocks, .. } = self.config;
        let mut reader = BitReader::new(frame);
        let decoded = match (reader.read(16), reader.read(self.table.index_bits())) {
            (Some(gain), Some(index)) => {
                if self.table.decode(index, &mut self.pulses) {
                    Some(gain as u16 as i16)
                }
                else {
                    warn!("PVQ: pulse vector index out of range: {}", index);
                    None
                }
            }
            _ => {
                warn!("PVQ: truncated frame: {} bytes", frame.len());
                None
            }
        };
        match decoded {
            Some(gain) => alg_unquant(output, &self.pulses, k, spread, blocks, gain),
            None => {
                for p in self.pulses.iter_mut() {
                    *p = 0;
                }
                for v in output.iter_mut() {
                    *v = 0;
                }
                0
            }
        }
    }
    /// Decodes all frames in `data` and appends bands to `output`.
    ///
    /// A trailing partial frame decodes to a band of zeros. Returns the number of decoded frames.
    pub fn decode(&mut self, data: &[u8], output: &mut Vec<i16>) -> usize {
        let size = self.config.size;
        let mut count = 0;
        for frame in data.chunks(self.frame_bytes()) {
            let start = output.len();
            output.resize(start + size, 0);
            self.decode_frame(frame, &mut output[start..]);
            count += 1;
        }
        count
    }
}

/// Encodes bands of Q14 coefficients to frame streams.
#[derive(Clone, Debug)]
pub struct PvqEncoder {
    config: PvqConfig,
    table: PulseTable,
    pulses: Vec<i32>,
    band: Vec<i16>,
    scratch: SearchScratch,
}

impl PvqEncoder {
    pub fn new(config: &PvqConfig) -> Result<Self> {
        let table = config.pulse_table()?;
        Ok(PvqEncoder {
            config: *config,
            pulses: vec![0; config.size],
            band: Vec::with_capacity(config.size),
            scratch: SearchScratch::default(),
            table
        })
    }
    /// Returns the pulse vector of the last encoded frame.
    pub fn pulses(&self) -> &[i32] {
        &self.pulses
    }
    /// Quantizes the first band of `input` and appends the encoded frame with `gain` to `output`.
    pub fn encode_frame(&mut self, input: &[i16], gain: i16, output: &mut Vec<u8>) {
        let PvqConfig { size, pulses: k, spread, blocks } = self.config;
        self.band.clear();
        self.band.extend(input.iter().take(size));
        self.band.resize(size, 0);
        alg_quant(&mut self.band, &mut self.pulses, k, spread, blocks, false, Q15_ONE, &mut self.scratch);
        let mut writer = BitWriter::new();
        writer.write(u32::from(gain as u16), 16);
        writer.write(self.table.index(&self.pulses), self.table.index_bits());
        output.extend_from_slice(&writer.into_bytes());
    }
}
