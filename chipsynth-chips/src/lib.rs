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
//! Emulators of multi-voice sound chips for the CHIPSYNTH library.
//!
//! * [huc6280] - the HuC6280 wavetable PSG with 6 voices, the LFO, noise and DDA modes.
//! * [sid] - a 3-voice chip with ADSR envelopes, hard sync and ring modulation.
//!
//! Chips implement [SoundChip][chipsynth_core::chip::SoundChip] and
//! [SoundChipAudio][chipsynth_core::chip::SoundChipAudio], so they can be driven by
//! a renderer, or directly with any [Blep][chipsynth_core::audio::Blep].
pub mod huc6280;
pub mod sid;

pub use huc6280::{HuC6280, PsgConfig, PsgRegister, Revision};
pub use sid::{Sid, SidConfig};
