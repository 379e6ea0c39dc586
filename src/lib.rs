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
//! CHIPSYNTH is a library for emulating multi-voice sound chips and rendering their output
//! as band-limited audio.
//!
//! The emulated chips are driven by register writes stamped with chip clock ticks. Each chip runs
//! its voices up to the requested time stamp and sends level changes as pulse steps to
//! a [Blep][audio::Blep] implementation, which turns them into audio samples at the host rate.
//!
//! * [chip] - the chip traits, the register write queue and the emulated chips.
//! * [audio] - the pulse buffer interfaces, the band-limited synthesis and the [ChipRenderer][audio::ChipRenderer].
//! * [codecs] - sample decoders and the sample player.
//!
//! Rendering a HuC6280 square wave:
//!
//! ```
//! use chipsynth::audio::{ChipRenderer, RendererConfig};
//! use chipsynth::chip::{HuC6280, PsgConfig};
//!
//! let psg = HuC6280::new(&PsgConfig::default()).unwrap();
//! let mut renderer = ChipRenderer::new(psg, &RendererConfig::default()).unwrap();
//! // voice 0, full balance
//! for &(addr, value) in &[(0, 0), (1, 0xFF), (5, 0xFF)] {
//!     renderer.write(0, addr, value);
//! }
//! for i in 0..32 {
//!     renderer.write(0, 6, if i < 16 { 0x1F } else { 0 });
//! }
//! // frequency 100, key on, full volume
//! for &(addr, value) in &[(2, 100), (3, 0), (4, 0x9F)] {
//!     renderer.write(0, addr, value);
//! }
//! let mut left = vec![0i16; 4800];
//! let mut right = vec![0i16; 4800];
//! assert_eq!(renderer.render(&mut left, &mut right), 4800);
//! ```
pub mod audio;
pub mod chip;

pub use chipsynth_core::{clock, error};

#[cfg(feature = "codecs")]
pub use chipsynth_codecs as codecs;
