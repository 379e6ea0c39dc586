/*
    Copyright (C) 2020-2023  Rafal Michalski

    This file is part of CHIPSYNTH, a Rust library for emulating sound chips.

    For the full copyright notice, see the lib.rs file.
*/
//! Pulse buffer interfaces, band-limited synthesis and the chip renderer.
pub use chipsynth_core::audio::*;

#[cfg(feature = "audio")]
pub use chipsynth_audio::{
    renderer, synth,
    BandFilter, BandLimited, BandLimitedAny, BandLimitedExt,
    ChipBlep, ChipRenderer, RendererConfig
};
