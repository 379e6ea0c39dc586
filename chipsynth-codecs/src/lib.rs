/*
    Copyright (C) 2020-2023  Rafal Michalski

    This file is part of CHIPSYNTH, a Rust library for emulating sound chips.

    CHIPSYNTH is free software: you can redistribute it and/or modify it under
    the terms of the GNU Lesser General Public License (LGPL) as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    CHIPSYNTH is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Lesser General Public License for more details.

    You should have received a copy of the GNU Lesser General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.

    Author contact information: see Cargo.toml file, section [package.authors].
*/
//! Sample decoders of the CHIPSYNTH library.
//!
//! * [pvq] - a fixed-point pulse vector quantizer with the greedy pulse search and spreading rotations.
//! * [adpcm] - IMA ADPCM blocks.
//! * [eaac] - EA audio core headers and blocked 16-bit PCM streams.
//!
//! Decoded samples can be played through any [Blep][chipsynth_core::audio::Blep] with
//! a [SamplePlayer][player::SamplePlayer].
pub mod adpcm;
pub mod eaac;
pub mod player;
pub mod pvq;

pub use adpcm::{AdpcmConfig, AdpcmDecoder};
pub use eaac::{EaacHeader, EaacStream};
pub use player::SamplePlayer;
pub use pvq::{PvqConfig, PvqDecoder, PvqEncoder, Spread};
