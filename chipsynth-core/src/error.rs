/*
    Copyright (C) 2020-2023  Rafal Michalski

    This file is part of CHIPSYNTH, a Rust library for emulating sound chips.

    For the full copyright notice, see the lib.rs file.
*/
//! Setup-time errors.
//!
//! Run-time paths (register writes, rendering, decoding of a stream that has already been opened)
//! never fail; they absorb edge cases internally. Only constructors report errors.
use thiserror::Error;

/// An error reported when a chip, a renderer or a decoder can't be set up with the given parameters.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// The host sample rate or the chip clock rate is 0.
    #[error("sample rate and clock rate must be greater than 0")]
    ZeroRate,
    /// The chip clock is slower than the host sample rate.
    #[error("chip clock rate {clock} Hz is lower than the host sample rate {host} Hz")]
    ClockBelowHostRate { clock: u32, host: u32 },
    /// The renderer frame is empty.
    #[error("frame size must be at least 1 sample")]
    ZeroFrameSize,
    /// A voice count override is out of range for the chip.
    #[error("voice count {requested} out of range 1..={max}")]
    VoiceCount { requested: usize, max: usize },
    /// The volume table seed is not a finite, non-negative number.
    #[error("invalid volume seed: {0}")]
    VolumeSeed(f64),
    /// A compressed stream uses a codec that is not decoded in-tree.
    #[error("unsupported codec id: {0:#04x}")]
    UnsupportedCodec(u8),
    /// A compressed stream uses an unsupported sub-format.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    /// A stream header could not be parsed.
    #[error("invalid header: {0}")]
    InvalidHeader(String),
    /// Decoder geometry is out of the supported range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// A result type for setup-time operations.
pub type Result<T> = core::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display_works() {
        let err = ConfigError::ClockBelowHostRate { clock: 22050, host: 44100 };
        assert_eq!(err.to_string(), "chip clock rate 22050 Hz is lower than the host sample rate 44100 Hz");
        assert_eq!(ConfigError::UnsupportedCodec(0x0c).to_string(), "unsupported codec id: 0x0c");
        let res: Result<()> = Err(ConfigError::VoiceCount { requested: 7, max: 6 });
        assert_eq!(res.unwrap_err().to_string(), "voice count 7 out of range 1..=6");
    }
}
