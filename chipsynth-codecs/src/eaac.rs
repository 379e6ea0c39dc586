/*
    Copyright (C) 2020-2023  Rafal Michalski

    This file is part of CHIPSYNTH, a Rust library for emulating sound chips.

    For the full copyright notice, see the lib.rs file.
*/
//! EA audio core streams.
//!
//! An audio asset is described by a compact header (usually a separate `.SNR` file, or the first
//! block of a `.SPS` file) and its sample data is stored in blocks (in `.SNR` itself for RAM
//! assets, or in a separate `.SNS` file for streamed assets).
//!
//! Header words (big endian):
//!
//! ```text
//! word 1: version (28-31) codec (24-27) channels - 1 (18-23) sample rate (0-17)
//! word 2: type (30-31) loop flag (29) number of samples (0-28)
//! [loop start]                 if looped
//! [loop offset]                if looped and streamed
//! [prefetch samples]           if gigasample
//! [loop offset]                if gigasample and looped after the prefetched part
//! ```
//!
//! Each block begins with a big endian word: block id (24-31) and block size including the
//! header (0-23), followed by the number of samples in the block. Version 0 blocks are
//! identified as `0x00` (data) or `0x80` (the last data block), version 1 blocks as `'D'`
//! (data) and `'E'` (end of stream).
//!
//! Only 16-bit big endian PCM payloads are decoded. The PCM samples of each channel
//! are stored one after another within a block.
use core::fmt::Write;

#[allow(unused_imports)]
use log::{debug, trace, warn};

use nom::combinator::cond;
use nom::error::{context, VerboseError, VerboseErrorKind};
use nom::number::complete::{be_i32, be_u32};
use nom::sequence::tuple;
use nom::{Err, IResult, Offset};

use chipsynth_core::error::{ConfigError, Result};

pub const VERSION_V0: u8 = 0x00;
pub const VERSION_V1: u8 = 0x01;

pub const CODEC_NONE: u8 = 0x00;
pub const CODEC_PCM16BE: u8 = 0x02;
pub const CODEC_EAXMA: u8 = 0x03;
pub const CODEC_XAS1: u8 = 0x04;
pub const CODEC_EALAYER3_V1: u8 = 0x05;
pub const CODEC_EALAYER3_V2_PCM: u8 = 0x06;
pub const CODEC_EALAYER3_V2_SPIKE: u8 = 0x07;
pub const CODEC_GCADPCM: u8 = 0x08;
pub const CODEC_EASPEEX: u8 = 0x09;
pub const CODEC_EATRAX: u8 = 0x0A;
pub const CODEC_EAMP3: u8 = 0x0B;
pub const CODEC_EAOPUS: u8 = 0x0C;
pub const CODEC_EAATRAC9: u8 = 0x0D;
pub const CODEC_EAOPUSM: u8 = 0x0E;
pub const CODEC_EAOPUSMU: u8 = 0x0F;

pub const BLOCK_V0_DATA: u8 = 0x00;
pub const BLOCK_V0_END: u8 = 0x80;
pub const BLOCK_V1_HEADER: u8 = b'H';
pub const BLOCK_V1_DATA: u8 = b'D';
pub const BLOCK_V1_END: u8 = b'E';

/// The largest accepted sample rate.
pub const MAX_SAMPLE_RATE: u32 = 200_000;

/// Returns a descriptive name of a codec id.
pub fn codec_name(codec: u8) -> &'static str {
    match codec {
        CODEC_NONE              => "none",
        CODEC_PCM16BE           => "PCM16BE",
        CODEC_EAXMA             => "EA-XMA",
        CODEC_XAS1              => "EA-XAS v1",
        CODEC_EALAYER3_V1       => "EALayer3 v1",
        CODEC_EALAYER3_V2_PCM   => "EALayer3 v2 PCM",
        CODEC_EALAYER3_V2_SPIKE => "EALayer3 v2 Spike",
        CODEC_GCADPCM           => "DSP ADPCM",
        CODEC_EASPEEX           => "EASpeex",
        CODEC_EATRAX            => "EATrax",
        CODEC_EAMP3             => "EA-MP3",
        CODEC_EAOPUS            => "EAOpus",
        CODEC_EAATRAC9          => "EA-ATRAC9",
        CODEC_EAOPUSM           => "EAOpus multi-stream",
        CODEC_EAOPUSMU          => "EAOpus multi-stream uncoupled",
        _                       => "reserved"
    }
}

/// Where the sample data lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamType {
    /// A single block following the header.
    Ram,
    /// Blocks in a separate stream.
    Stream,
    /// A prefetched block following the header, then blocks in a separate stream.
    Gigasample,
}

/// A parsed and validated stream header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EaacHeader {
    pub version: u8,
    pub codec: u8,
    pub channels: u8,
    pub sample_rate: u32,
    pub stream_type: StreamType,
    pub num_samples: u32,
    /// The first sample of the loop, present if the asset loops.
    pub loop_start: Option<u32>,
    /// The offset of the loop block in the stream.
    pub loop_offset: Option<u32>,
    pub prefetch_samples: u32,
    /// The size of the header in bytes.
    pub size: usize,
}

type ParseResult<'a, O> = IResult<&'a [u8], O, VerboseError<&'a [u8]>>;

fn parse_header_raw(input: &[u8]) -> ParseResult<'_, EaacHeader> {
    let (inp, (word1, word2)) = tuple((
            context("header word 1", be_u32),
            context("header word 2", be_u32)))(input)?;
    let loop_flag = (word2 >> 29) & 1 != 0;
    let stream_type = match word2 >> 30 {
        0 => StreamType::Ram,
        1 => StreamType::Stream,
        2 => StreamType::Gigasample,
        _ => return Err(Err::Failure(VerboseError {
                    errors: vec![(input, VerboseErrorKind::Context("unknown stream type"))]
                }))
    };
    let (inp, loop_start) = cond(loop_flag, context("loop start", be_i32))(inp)?;
    let loop_start = loop_start.map(|start| start.max(0) as u32);
    let (inp, mut loop_offset) = cond(loop_flag && stream_type == StreamType::Stream,
                                      context("loop offset", be_u32))(inp)?;
    let (inp, prefetch_samples) = cond(stream_type == StreamType::Gigasample,
                                       context("prefetch samples", be_i32))(inp)?;
    let prefetch_samples = prefetch_samples.unwrap_or(0).max(0) as u32;
    let (inp, giga_loop_offset) = cond(
            stream_type == StreamType::Gigasample &&
            loop_start.map_or(false, |start| start >= prefetch_samples),
            context("loop offset", be_u32))(inp)?;
    if giga_loop_offset.is_some() {
        loop_offset = giga_loop_offset;
    }
    let header = EaacHeader {
        version: (word1 >> 28) as u8,
        codec: ((word1 >> 24) & 0x0F) as u8,
        channels: ((word1 >> 18) & 0x3F) as u8 + 1,
        sample_rate: word1 & 0x03_FFFF,
        stream_type,
        num_samples: word2 & 0x1FFF_FFFF,
        loop_start,
        loop_offset,
        prefetch_samples,
        size: input.offset(inp),
    };
    Ok((inp, header))
}

fn describe_error(input: &[u8], err: Err<VerboseError<&[u8]>>) -> String {
    match err {
        Err::Incomplete(..) => "incomplete input".into(),
        Err::Error(e)|Err::Failure(e) => {
            let mut res = String::new();
            for (subs, kind) in e.errors.iter().rev() {
                let offset = input.offset(subs);
                let _ = match kind {
                    VerboseErrorKind::Context(ctx) => write!(res, "{} at byte {} of {}; ", ctx, offset, input.len()),
                    VerboseErrorKind::Nom(kind) => write!(res, "{:?} at byte {} of {}; ", kind, offset, input.len()),
                    VerboseErrorKind::Char(c) => write!(res, "{:?} at byte {} of {}; ", c, offset, input.len()),
                };
            }
            res.truncate(res.trim_end_matches("; ").len());
            res
        }
    }
}

impl EaacHeader {
    /// Parses and validates a header at the beginning of `input`.
    pub fn parse(input: &[u8]) -> Result<Self> {
        let (_, header) = parse_header_raw(input)
                          .map_err(|e| ConfigError::InvalidHeader(describe_error(input, e)))?;
        header.validate()?;
        debug!("EAAC: v{} {} ch: {} rate: {} samples: {} type: {:?}",
                header.version, codec_name(header.codec), header.channels,
                header.sample_rate, header.num_samples, header.stream_type);
        Ok(header)
    }

    fn validate(&self) -> Result<()> {
        if self.version != VERSION_V0 && self.version != VERSION_V1 {
            return Err(ConfigError::InvalidHeader(format!("unknown version {}", self.version)))
        }
        if self.sample_rate > MAX_SAMPLE_RATE {
            return Err(ConfigError::InvalidHeader(format!("unknown sample rate {}", self.sample_rate)))
        }
        if self.version == VERSION_V1 && self.stream_type == StreamType::Gigasample {
            return Err(ConfigError::InvalidHeader("gigasample stream in version 1".into()))
        }
        if let Some(start) = self.loop_start {
            let loops_in_stream = matches!(self.codec,
                    CODEC_EALAYER3_V1|CODEC_EALAYER3_V2_PCM|CODEC_EALAYER3_V2_SPIKE|
                    CODEC_EAXMA|CODEC_XAS1|CODEC_EATRAX);
            if start > 0 && !loops_in_stream {
                return Err(ConfigError::UnsupportedFormat(
                    format!("loop start {} with codec {}", start, codec_name(self.codec))))
            }
        }
        Ok(())
    }
    /// Returns `true` if the asset should be played in a loop.
    #[inline]
    pub fn is_looped(&self) -> bool {
        self.loop_start.is_some()
    }

    #[inline]
    fn data_block_id(&self, id: u8) -> bool {
        match self.version {
            VERSION_V0 => id == BLOCK_V0_DATA || id == BLOCK_V0_END,
            _ => id == BLOCK_V1_DATA
        }
    }

    #[inline]
    fn last_block_id(&self, id: u8) -> bool {
        self.version == VERSION_V0 && id == BLOCK_V0_END
    }
}

/// A single data block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Block<'a> {
    pub id: u8,
    /// The declared size of the block including the header.
    pub size: usize,
    pub samples: u32,
    /// The available payload, shorter than declared if the stream is truncated.
    pub payload: &'a [u8],
}

/// Parses a block header, returns the block and the rest of the input.
pub fn parse_block(input: &[u8]) -> Option<(Block<'_>, &[u8])> {
    let (_, word) = be_u32::<_, VerboseError<&[u8]>>(input).ok()?;
    let id = (word >> 24) as u8;
    let size = (word & 0x00FF_FFFF) as usize;
    if size < 4 || size == 0x00FF_FFFF {
        return None
    }
    let end = size.min(input.len());
    let body = &input[4..end];
    let (payload, samples) = match be_u32::<_, VerboseError<&[u8]>>(body) {
        Ok((payload, samples)) => (payload, samples),
        Err(..) => (&body[body.len()..], 0)
    };
    Some((Block { id, size, samples, payload }, &input[end..]))
}

/// A stream opened for decoding.
#[derive(Clone, Debug)]
pub struct EaacStream<'a> {
    header: EaacHeader,
    prefetch: Option<&'a [u8]>,
    data: &'a [u8],
}

impl<'a> EaacStream<'a> {
    /// Opens an asset from a header file and, for streamed assets, a separate stream file.
    pub fn open_snr(snr: &'a [u8], sns: Option<&'a [u8]>) -> Result<Self> {
        let header = EaacHeader::parse(snr)?;
        check_codec(&header)?;
        let body = &snr[header.size..];
        let (prefetch, data) = match (header.stream_type, sns) {
            (StreamType::Ram, _) => (None, body),
            (StreamType::Stream, Some(sns)) => (None, sns),
            (StreamType::Gigasample, Some(sns)) => (Some(body), sns),
            (_, None) => return Err(ConfigError::Invalid("missing stream data".into()))
        };
        Ok(EaacStream { header, prefetch, data })
    }
    /// Opens an asset from a stream file beginning with a header block.
    pub fn open_sps(sps: &'a [u8]) -> Result<Self> {
        let (block, _) = parse_block(sps).ok_or_else(||
                ConfigError::InvalidHeader("missing header block".into()))?;
        if block.id != BLOCK_V1_HEADER {
            return Err(ConfigError::InvalidHeader(format!("unexpected block id {:#04x}", block.id)))
        }
        let header = EaacHeader::parse(&sps[4..])?;
        check_codec(&header)?;
        let data = sps.get(block.size..).unwrap_or(&[]);
        Ok(EaacStream { header, prefetch: None, data })
    }

    pub fn header(&self) -> &EaacHeader {
        &self.header
    }
    /// Decodes the whole asset and appends up to `num_samples * channels` interleaved samples
    /// to `output`.
    ///
    /// Samples declared but missing from a truncated or corrupt stream are set to 0, as long as
    /// the input could have held them. Returns the number of samples per channel covered by
    /// the decoded blocks.
    pub fn decode(&self, output: &mut Vec<i16>) -> usize {
        let channels = usize::from(self.header.channels);
        let total = self.header.num_samples as usize;
        let start = output.len();
        let mut position = 0;
        if let Some(prefetch) = self.prefetch {
            self.decode_blocks(prefetch, true, &mut position, output, start);
        }
        let single = self.header.stream_type == StreamType::Ram;
        self.decode_blocks(self.data, single, &mut position, output, start);
        if position < total {
            let input_len = self.prefetch.map_or(0, <[u8]>::len) + self.data.len();
            let fill = total.min(position.max(input_len / (2 * channels)));
            warn!("EAAC: truncated stream: {} of {} samples, silent up to {}", position, total, fill);
            output.resize(start + fill * channels, 0);
        }
        position
    }

    fn decode_blocks(&self, data: &[u8], single: bool, position: &mut usize, output: &mut Vec<i16>, start: usize) {
        let header = &self.header;
        let mut input = data;
        let channels = usize::from(header.channels);
        let total = header.num_samples as usize;
        while !input.is_empty() && *position < total {
            let (block, rest) = match parse_block(input) {
                Some(res) => res,
                None => {
                    warn!("EAAC: corrupt block at: {}", data.offset(input));
                    break
                }
            };
            if header.version == VERSION_V1 && block.id == BLOCK_V1_END {
                break
            }
            if !header.data_block_id(block.id) {
                warn!("EAAC: unexpected block id: {:#04x}", block.id);
                break
            }
            // never trust the sample count beyond what the block size can carry
            let capacity = block.size.saturating_sub(8) / (2 * channels);
            let samples = (block.samples as usize).min(total - *position).min(capacity);
            let frame = start + *position * channels;
            output.resize(frame + samples * channels, 0);
            let planar = (block.samples as usize).saturating_mul(2);
            for ch in 0..channels {
                let pcm = block.payload.get(ch.saturating_mul(planar)..).unwrap_or(&[]);
                for (i, be) in pcm.chunks_exact(2).take(samples).enumerate() {
                    output[frame + i * channels + ch] = i16::from_be_bytes([be[0], be[1]]);
                }
            }
            *position += samples;
            if single || header.last_block_id(block.id) {
                break
            }
            input = rest;
        }
    }
}

fn check_codec(header: &EaacHeader) -> Result<()> {
    if header.codec != CODEC_PCM16BE {
        warn!("EAAC: codec not supported: {}", codec_name(header.codec));
        return Err(ConfigError::UnsupportedCodec(header.codec))
    }
    Ok(())
}
