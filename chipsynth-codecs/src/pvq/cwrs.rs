/*
    Copyright (C) 2020-2023  Rafal Michalski

    This file is part of CHIPSYNTH, a Rust library for emulating sound chips.

    For the full copyright notice, see the lib.rs file.
*/
//! Combinatorial indexing of pulse vectors.
//!
//! A pulse vector of dimension `N` with `K` pulses is any integer vector whose absolute values
//! sum up to `K`. There are `V(N,K)` such vectors, where:
//!
//! ```text
//! V(N,0) = 1, V(0,K) = 0 for K > 0
//! V(N,K) = V(N-1,K) + V(N,K-1) + V(N-1,K-1)
//! ```
//!
//! Vectors are enumerated lexicographically, with each coordinate ordered as `0, +1, -1, +2, -2, ...`.

/// A table of `V(n,k)` for all `n <= N` and `k <= K`, where `V(N,K)` fits in 32 bits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PulseTable {
    size: usize,
    pulses: usize,
    counts: Vec<u32>,
}

impl PulseTable {
    /// Returns `None` if `V(size, pulses)` doesn't fit in 32 bits.
    pub fn new(size: usize, pulses: usize) -> Option<Self> {
        let stride = pulses + 1;
        let mut counts = vec![0u32; (size + 1) * stride];
        counts[0] = 1;
        for n in 1..=size {
            counts[n * stride] = 1;
            for k in 1..=pulses {
                let value = counts[(n - 1) * stride + k]
                    .checked_add(counts[n * stride + k - 1])?
                    .checked_add(counts[(n - 1) * stride + k - 1])?;
                counts[n * stride + k] = value;
            }
        }
        Some(PulseTable { size, pulses, counts })
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn pulses(&self) -> usize {
        self.pulses
    }
    /// Returns `V(n,k)`.
    #[inline]
    pub fn count(&self, n: usize, k: usize) -> u32 {
        self.counts[n * (self.pulses + 1) + k]
    }
    /// Returns `V(N,K)`.
    #[inline]
    pub fn total(&self) -> u32 {
        self.count(self.size, self.pulses)
    }
    /// Returns the number of bits needed to store an index.
    pub fn index_bits(&self) -> u32 {
        match self.total() {
            0|1 => 0,
            total => 32 - (total - 1).leading_zeros()
        }
    }
    /// Returns the index of `pulses`. The slice must have `N` elements with absolute values
    /// summing up to `K`.
    pub fn index(&self, pulses: &[i32]) -> u32 {
        debug_assert_eq!(pulses.len(), self.size);
        let mut k = self.pulses;
        let mut index = 0u32;
        for (j, &y) in pulses.iter().enumerate() {
            let rest = self.size - j - 1;
            let magnitude = y.unsigned_abs() as usize;
            for m in 0..magnitude {
                let count = self.count(rest, k - m);
                index += if m == 0 { count } else { 2 * count };
            }
            if y < 0 {
                index += self.count(rest, k - magnitude);
            }
            k -= magnitude;
        }
        index
    }
    /// Decodes the vector at `index` into `pulses`.
    ///
    /// Returns `false` and fills `pulses` with zeros if the index is out of range.
    pub fn decode(&self, mut index: u32, pulses: &mut [i32]) -> bool {
        debug_assert_eq!(pulses.len(), self.size);
        if index >= self.total() {
            for p in pulses.iter_mut() {
                *p = 0;
            }
            return false
        }
        let mut k = self.pulses;
        for (j, y) in pulses.iter_mut().enumerate() {
            let rest = self.size - j - 1;
            let count = self.count(rest, k);
            if index < count {
                *y = 0;
                continue
            }
            index -= count;
            let mut m = 1;
            loop {
                let count = self.count(rest, k - m);
                if index < count {
                    *y = m as i32;
                    break
                }
                index -= count;
                if index < count {
                    *y = -(m as i32);
                    break
                }
                index -= count;
                m += 1;
            }
            k -= m;
        }
        true
    }
}
