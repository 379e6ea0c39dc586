/*
    Copyright (C) 2020-2023  Rafal Michalski

    This file is part of CHIPSYNTH, a Rust library for emulating sound chips.

    For the full copyright notice, see the lib.rs file.
*/
//! Sound chip traits, the register write queue and the emulated chips.
pub use chipsynth_core::chip::*;

#[cfg(feature = "chips")]
pub use chipsynth_chips::{
    huc6280, sid,
    HuC6280, PsgConfig, PsgRegister, Revision,
    Sid, SidConfig
};
