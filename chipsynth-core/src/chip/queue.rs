/*
    Copyright (C) 2020-2023  Rafal Michalski

    This file is part of CHIPSYNTH, a Rust library for emulating sound chips.

    For the full copyright notice, see the lib.rs file.
*/
use std::collections::VecDeque;

#[cfg(feature = "snapshot")]
use serde::{Serialize, Deserialize};

use crate::clock::FTs;
use crate::error::{ConfigError, Result};
use super::RegWrite;

/// Write latency of chips that accept register writes at a limited pace.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
pub struct WriteLatency {
    tick: FTs,
    delay: u32,
}

impl WriteLatency {
    /// The queue is polled every `tick` chip clocks and at least `delay` polls separate
    /// two consecutive writes.
    pub fn new(tick: u32, delay: u32) -> Result<Self> {
        if tick == 0 || tick > i32::MAX as u32 {
            return Err(ConfigError::Invalid(format!("write latency tick out of range: {}", tick)))
        }
        Ok(WriteLatency { tick: tick as FTs, delay })
    }

    pub fn tick(&self) -> u32 {
        self.tick as u32
    }

    pub fn delay(&self) -> u32 {
        self.delay
    }
}

/// An ordered queue of time-stamped register writes.
///
/// Writes are never reordered. A write stamped earlier than the one queued before it is
/// delayed up to its predecessor's time stamp.
///
/// Without latency, each write is due at its own time stamp. With latency the queue head
/// is examined every `tick` clocks: the delay counter decrements and once it's expired and
/// the chip is not busy the head becomes due at that tick, reloading the counter.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "snapshot", serde(rename_all = "camelCase"))]
pub struct WriteQueue {
    writes: VecDeque<RegWrite>,
    latency: Option<WriteLatency>,
    countdown: u32,
    next_poll: FTs,
    last_time: FTs,
}

impl WriteQueue {
    pub fn new(latency: Option<WriteLatency>) -> Self {
        WriteQueue { latency, ..Default::default() }
    }

    pub fn with_capacity(capacity: usize, latency: Option<WriteLatency>) -> Self {
        WriteQueue { writes: VecDeque::with_capacity(capacity), ..Self::new(latency) }
    }

    pub fn latency(&self) -> Option<WriteLatency> {
        self.latency
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
    /// Returns an iterator of the pending writes in the order they will be applied.
    pub fn iter(&self) -> impl Iterator<Item=&RegWrite> + '_ {
        self.writes.iter()
    }
    /// Appends a write to the tail of the queue.
    pub fn push(&mut self, time: FTs, addr: u16, value: u8) {
        let time = time.max(self.last_time);
        self.last_time = time;
        self.writes.push_back(RegWrite::new(time, addr, value));
    }
    /// Discards all pending writes and restarts the polling clock.
    pub fn clear(&mut self) {
        self.writes.clear();
        self.countdown = 0;
        self.next_poll = 0;
        self.last_time = 0;
    }
    /// Pops the next write that becomes due before `end_ts`.
    ///
    /// The returned write carries the time stamp at which it must be applied.
    /// In the latency mode `is_busy` is called with the time stamp of the poll; the caller
    /// should advance the chip to that time before answering.
    pub fn next_due<F>(&mut self, end_ts: FTs, mut is_busy: F) -> Option<RegWrite>
        where F: FnMut(FTs) -> bool
    {
        let WriteLatency { tick, delay } = match self.latency {
            None => {
                return match self.writes.front() {
                    Some(write) if write.time < end_ts => self.writes.pop_front(),
                    _ => None
                }
            }
            Some(latency) => latency
        };
        while self.next_poll < end_ts {
            let head_time = match self.writes.front() {
                Some(write) => write.time,
                None => {
                    self.skip_polls(end_ts, tick);
                    return None
                }
            };
            if head_time > self.next_poll {
                self.skip_polls(head_time.min(end_ts), tick);
                continue
            }
            let poll_ts = self.next_poll;
            self.next_poll += tick;
            self.countdown = self.countdown.saturating_sub(1);
            if self.countdown == 0 && !is_busy(poll_ts) {
                self.countdown = delay;
                return self.writes.pop_front().map(|write| RegWrite { time: poll_ts, ..write })
            }
        }
        None
    }
    /// Rebases time stamps of the pending writes and the polling clock by `end_ts`.
    pub fn end_frame(&mut self, end_ts: FTs) {
        for write in self.writes.iter_mut() {
            write.time -= end_ts;
        }
        self.next_poll -= end_ts;
        self.last_time = (self.last_time - end_ts).max(0);
    }
    /// Moves the polling clock to the first poll at or after `ts`.
    #[inline]
    fn skip_polls(&mut self, ts: FTs, tick: FTs) {
        if self.next_poll < ts {
            let polls = (ts - self.next_poll + tick - 1) / tick;
            self.next_poll += polls * tick;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(queue: &mut WriteQueue, end_ts: FTs, busy_until: FTs) -> Vec<RegWrite> {
        let mut res = Vec::new();
        while let Some(write) = queue.next_due(end_ts, |ts| ts < busy_until) {
            res.push(write);
        }
        res
    }

    #[test]
    fn write_queue_immediate_works() {
        let mut queue = WriteQueue::new(None);
        queue.push(10, 1, 0x11);
        queue.push(5, 2, 0x22);
        queue.push(30, 3, 0x33);
        assert_eq!(queue.len(), 3);
        assert_eq!(drain(&mut queue, 30, 0), vec![RegWrite::new(10, 1, 0x11), RegWrite::new(10, 2, 0x22)]);
        queue.end_frame(20);
        assert_eq!(drain(&mut queue, 30, 0), vec![RegWrite::new(10, 3, 0x33)]);
        assert!(queue.is_empty());
        // the order clamp is rebased too
        queue.push(-5, 4, 0x44);
        assert_eq!(queue.iter().next(), Some(&RegWrite::new(10, 4, 0x44)));
        queue.clear();
        assert!(queue.is_empty());
    }

    #[test]
    fn write_queue_latency_works() {
        assert!(WriteLatency::new(0, 1).is_err());
        let latency = WriteLatency::new(8, 3).unwrap();
        assert_eq!((latency.tick(), latency.delay()), (8, 3));
        let mut queue = WriteQueue::new(Some(latency));
        queue.push(3, 0, 1);
        queue.push(3, 0, 2);
        queue.push(3, 0, 3);
        queue.push(100, 0, 4);
        let writes = drain(&mut queue, 100, 0);
        // polls at 8, 16, 24, ...; the first write goes at once, others every 3 polls
        assert_eq!(writes, vec![RegWrite::new(8, 0, 1), RegWrite::new(32, 0, 2), RegWrite::new(56, 0, 3)]);
        assert_eq!(queue.len(), 1);
        // the delay counter only runs while a write is due
        let writes = drain(&mut queue, 200, 0);
        assert_eq!(writes, vec![RegWrite::new(120, 0, 4)]);
        assert!(drain(&mut queue, 200, 0).is_empty());
    }

    #[test]
    fn write_queue_busy_gating_works() {
        let mut queue = WriteQueue::new(Some(WriteLatency::new(10, 1).unwrap()));
        queue.push(0, 5, 1);
        queue.push(0, 5, 2);
        // busy until 35: polls at 0, 10, 20, 30 are rejected
        let writes = drain(&mut queue, 60, 35);
        assert_eq!(writes, vec![RegWrite::new(40, 5, 1), RegWrite::new(50, 5, 2)]);
        queue.push(70, 6, 3);
        queue.end_frame(60);
        assert_eq!(drain(&mut queue, 60, 0), vec![RegWrite::new(10, 6, 3)]);
    }

    #[cfg(feature = "snapshot")]
    #[test]
    fn write_queue_snapshot_works() {
        let mut queue = WriteQueue::new(Some(WriteLatency::new(4, 2).unwrap()));
        queue.push(1, 0x10, 0xAB);
        queue.push(9, 0x11, 0xCD);
        assert_eq!(queue.next_due(100, |_| false), Some(RegWrite::new(4, 0x10, 0xAB)));
        let json = serde_json::to_string(&queue).unwrap();
        let mut restored: WriteQueue = serde_json::from_str(&json).unwrap();
        let bin = bincode::serialize(&restored).unwrap();
        let mut restored2: WriteQueue = bincode::deserialize(&bin).unwrap();
        let expected = queue.next_due(100, |_| false);
        assert_eq!(expected, Some(RegWrite::new(16, 0x11, 0xCD)));
        assert_eq!(restored.next_due(100, |_| false), expected);
        assert_eq!(restored2.next_due(100, |_| false), expected);
    }
}
