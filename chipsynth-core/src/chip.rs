/*
    Copyright (C) 2020-2023  Rafal Michalski

    This file is part of CHIPSYNTH, a Rust library for emulating sound chips.

    For the full copyright notice, see the lib.rs file.
*/
//! Sound chip traits and register bookkeeping.
mod queue;

#[cfg(feature = "snapshot")]
use serde::{Serialize, Deserialize};

use crate::audio::{Blep, ScopeBuffer};
use crate::clock::FTs;

pub use queue::{WriteQueue, WriteLatency};

/// A time-stamped write to one of the chip registers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
pub struct RegWrite {
    /// A time stamp in chip clock ticks, relative to the beginning of the current frame.
    pub time: FTs,
    /// A register address, as seen on the chip's bus.
    pub addr: u16,
    /// A new value written to the register.
    pub value: u8,
}

impl RegWrite {
    #[inline]
    pub const fn new(time: FTs, addr: u16, value: u8) -> Self {
        RegWrite { time, addr, value }
    }
}

/// The last values written to chip registers, indexed by a chip-defined layout.
///
/// Used for introspection only. Chips never read it back to drive their behavior.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
pub struct RegisterPool(Vec<u8>);

impl RegisterPool {
    /// Creates a zeroed pool of `size` bytes.
    pub fn new(size: usize) -> Self {
        RegisterPool(vec![0; size])
    }
    /// Returns the value at `index` or `None` if out of range.
    #[inline]
    pub fn get(&self, index: usize) -> Option<u8> {
        self.0.get(index).copied()
    }
    /// Stores `value` at `index`. Out of range indexes are ignored.
    #[inline]
    pub fn set(&mut self, index: usize, value: u8) {
        if let Some(reg) = self.0.get_mut(index) {
            *reg = value;
        }
    }

    pub fn clear(&mut self) {
        self.0.iter_mut().for_each(|reg| *reg = 0);
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

/// The state-side interface of an emulated multi-voice sound chip.
pub trait SoundChip {
    /// Returns the number of voices, which is fixed at construction.
    fn voice_count(&self) -> usize;
    /// Returns the register pool for introspection.
    fn register_pool(&self) -> &[u8];
    /// Reads a register the way the host would. Undefined addresses read as the pool does
    /// or 0 when outside of it.
    fn read_register(&self, addr: u16) -> u8 {
        self.register_pool().get(usize::from(addr)).copied().unwrap_or(0)
    }
    /// Returns `true` while the chip can't accept another register write.
    ///
    /// Polled by [WriteQueue] in the latency mode.
    fn is_busy(&self) -> bool {
        false
    }
    /// Returns the oscilloscope trace of the given voice.
    fn oscilloscope(&self, voice: usize) -> Option<&ScopeBuffer>;
    /// Silences the given voice, or restores it. Out of range voices are ignored.
    ///
    /// A muted voice keeps running, only its contribution to the output becomes 0.
    fn set_voice_muted(&mut self, voice: usize, muted: bool);
    /// Returns `true` if the given voice is muted.
    fn is_voice_muted(&self, voice: usize) -> bool;
    /// Rebases all internal time stamps, so `end_ts` becomes the time stamp 0 of the next frame.
    ///
    /// All voices must have been advanced to `end_ts` first.
    fn end_frame(&mut self, end_ts: FTs);
}

/// The audio-side interface of an emulated multi-voice sound chip.
///
/// Output level changes are sent as pulse steps to a [Blep]. Chip levels are integers where
/// `i16::MAX` stands for the full scale amplitude, so the implementations require
/// [FromLevel][crate::audio::FromLevel] from the `Blep`'s sample delta type.
pub trait SoundChipAudio<B: Blep>: SoundChip {
    /// Advances all voices to `timestamp`, emitting level changes on the way.
    ///
    /// Time stamps preceding the last one reached are ignored.
    fn run_to(&mut self, blep: &mut B, timestamp: FTs);
    /// Advances all voices to `timestamp` and applies a register write.
    ///
    /// Writes to undefined addresses are ignored.
    fn write_register(&mut self, blep: &mut B, timestamp: FTs, addr: u16, value: u8);
    /// Advances all voices to `timestamp` and restores power-on defaults.
    ///
    /// Time stamps and the last emitted levels survive.
    fn power(&mut self, blep: &mut B, timestamp: FTs);
}
