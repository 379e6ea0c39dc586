/*
    Copyright (C) 2020-2023  Rafal Michalski

    This file is part of CHIPSYNTH, a Rust library for emulating sound chips.

    For the full copyright notice, see the lib.rs file.
*/
//! MSB-first bit packing.

/// Reads bits MSB first from a byte slice.
#[derive(Clone, Debug)]
pub struct BitReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        BitReader { data, position: 0 }
    }
    /// Returns the number of bits left.
    #[inline]
    pub fn remaining(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.position)
    }
    /// Reads up to 32 bits. Returns `None` if not enough bits are left.
    pub fn read(&mut self, nbits: u32) -> Option<u32> {
        debug_assert!(nbits <= 32);
        if self.remaining() < nbits as usize {
            return None
        }
        let mut value = 0u64;
        for _ in 0..nbits {
            let byte = self.data[self.position >> 3];
            let bit = (byte >> (7 - (self.position & 7))) & 1;
            value = (value << 1) | u64::from(bit);
            self.position += 1;
        }
        Some(value as u32)
    }
}

/// Writes bits MSB first, padding the last byte with zeros.
#[derive(Clone, Debug, Default)]
pub struct BitWriter {
    data: Vec<u8>,
    nbits: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        BitWriter::default()
    }
    /// Writes the `nbits` lowest bits of `value`.
    pub fn write(&mut self, value: u32, nbits: u32) {
        debug_assert!(nbits <= 32);
        for shift in (0..nbits).rev() {
            if self.nbits & 7 == 0 {
                self.data.push(0);
            }
            let bit = ((value >> shift) & 1) as u8;
            if let Some(last) = self.data.last_mut() {
                *last |= bit << (7 - (self.nbits & 7));
            }
            self.nbits += 1;
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_work() {
        let mut writer = BitWriter::new();
        writer.write(0b101, 3);
        writer.write(0xABCD, 16);
        writer.write(0, 0);
        writer.write(1, 1);
        let bytes = writer.into_bytes();
        assert_eq!(bytes, [0b1011_0101, 0b0111_1001, 0b1011_0000]);
        let mut reader = BitReader::new(&bytes);
        assert_eq!(reader.remaining(), 24);
        assert_eq!(reader.read(3), Some(0b101));
        assert_eq!(reader.read(16), Some(0xABCD));
        assert_eq!(reader.read(1), Some(1));
        assert_eq!(reader.read(0), Some(0));
        assert_eq!(reader.read(5), None);
        assert_eq!(reader.read(4), Some(0));
    }
}
