/*
    Copyright (C) 2020-2023  Rafal Michalski

    This file is part of CHIPSYNTH, a Rust library for emulating sound chips.

    For the full copyright notice, see the lib.rs file.
*/
//! Per-voice oscilloscope traces for visualization.
use std::collections::VecDeque;

use crate::clock::FTs;

/// The default number of level changes retained by [ScopeBuffer].
pub const DEFAULT_SCOPE_CAPACITY: usize = 4096;

/// A single recorded output level change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScopeEvent {
    /// An absolute chip clock tick counted since the buffer was created or cleared.
    pub tick: u64,
    /// The combined (left + right) output level of the voice, clamped to 16 bits.
    pub level: i16,
}

/// A bounded ring of output level changes of a single voice.
///
/// Chips only ever write to it. Frame-relative time stamps are converted to absolute ticks,
/// so traces stay continuous across render frames. When the ring is full the oldest
/// event is discarded.
#[derive(Clone, Debug)]
pub struct ScopeBuffer {
    events: VecDeque<ScopeEvent>,
    capacity: usize,
    origin: u64,
}

impl Default for ScopeBuffer {
    fn default() -> Self {
        ScopeBuffer::new(DEFAULT_SCOPE_CAPACITY)
    }
}

impl ScopeBuffer {
    /// Creates a new buffer able to hold `capacity` events (at least 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        ScopeBuffer { events: VecDeque::with_capacity(capacity), capacity, origin: 0 }
    }
    /// Records `level` at the frame-relative `timestamp`. Repeated levels are not stored.
    #[inline]
    pub fn put(&mut self, timestamp: FTs, level: i32) {
        let level = level.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        if let Some(last) = self.events.back() {
            if last.level == level {
                return
            }
        }
        let tick = (self.origin as i64 + timestamp as i64).max(0) as u64;
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(ScopeEvent { tick, level });
    }
    /// Moves the frame origin forward by `end_ts` ticks.
    #[inline]
    pub fn end_frame(&mut self, end_ts: FTs) {
        self.origin = (self.origin as i64 + end_ts as i64).max(0) as u64;
    }
    /// Removes all events and resets the origin.
    pub fn clear(&mut self) {
        self.events.clear();
        self.origin = 0;
    }
    /// Returns the absolute tick of the current frame's time stamp 0.
    #[inline]
    pub fn origin(&self) -> u64 {
        self.origin
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
    /// Returns an iterator of the retained events, oldest first.
    pub fn iter(&self) -> impl Iterator<Item=ScopeEvent> + ExactSizeIterator + '_ {
        self.events.iter().copied()
    }
    /// Returns the level in effect at the absolute `tick`.
    ///
    /// Ticks preceding the oldest retained event read as 0.
    pub fn level_at(&self, tick: u64) -> i16 {
        let index = self.events.partition_point(|ev| ev.tick <= tick);
        match index {
            0 => 0,
            n => self.events[n - 1].level
        }
    }
    /// Renders a sample-and-hold trace into `output`, starting at the absolute tick `start`
    /// and advancing by `step` ticks per output sample.
    pub fn render(&self, start: u64, step: u64, output: &mut [i16]) {
        let mut index = self.events.partition_point(|ev| ev.tick <= start);
        let mut tick = start;
        for out in output.iter_mut() {
            while index < self.events.len() && self.events[index].tick <= tick {
                index += 1;
            }
            *out = match index {
                0 => 0,
                n => self.events[n - 1].level
            };
            tick += step;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_buffer_works() {
        let mut scope = ScopeBuffer::new(3);
        assert!(scope.is_empty());
        scope.put(10, 100);
        scope.put(12, 100);
        scope.put(20, -40000);
        assert_eq!(scope.len(), 2);
        scope.end_frame(100);
        assert_eq!(scope.origin(), 100);
        scope.put(5, 7);
        scope.put(6, 8);
        assert_eq!(scope.len(), 3);
        let events: Vec<_> = scope.iter().collect();
        assert_eq!(events, vec![ScopeEvent { tick: 20, level: i16::MIN },
                                ScopeEvent { tick: 105, level: 7 },
                                ScopeEvent { tick: 106, level: 8 }]);
        assert_eq!(scope.level_at(0), 0);
        assert_eq!(scope.level_at(20), i16::MIN);
        assert_eq!(scope.level_at(105), 7);
        assert_eq!(scope.level_at(1000), 8);
        let mut trace = [1i16; 6];
        scope.render(99, 3, &mut trace);
        assert_eq!(trace, [i16::MIN, i16::MIN, 7, 8, 8, 8]);
        scope.clear();
        assert!(scope.is_empty());
        assert_eq!(scope.origin(), 0);
    }
}
