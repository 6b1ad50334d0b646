use std::sync::atomic::{AtomicU8, Ordering};

/// Returns the number of bytes needed to hold `bits` bits, padded up to a whole byte
pub fn bitmap_size(bits: u32) -> u32 {
    (bits + 7) / 8
}

/// A bitmap living inside block memory, where every bit can be set concurrently.
/// Bit `pos` is stored in byte `pos / 8` at bit position `pos % 8`.
#[derive(Clone, Copy)]
pub struct ConcurrentBitmap<'a> {
    bytes: &'a [AtomicU8],
}

impl<'a> ConcurrentBitmap<'a> {
    pub fn new(bytes: &'a [AtomicU8]) -> Self {
        Self { bytes }
    }

    /// Returns the number of bits this bitmap can address
    pub fn capacity(&self) -> usize {
        self.bytes.len() * 8
    }

    /// Returns the current value of the bit at `pos`
    pub fn test(&self, pos: u32) -> bool {
        let byte = self.bytes[(pos / 8) as usize].load(Ordering::Acquire);
        (byte & mask(pos)) != 0
    }

    /// Atomically sets the bit at `pos` to `value`.
    /// Returns true if the bit changed, false if it already held `value`.
    /// Out of all threads racing to set the same bit to the same value, exactly one sees true.
    pub fn flip(&self, pos: u32, value: bool) -> bool {
        let byte = &self.bytes[(pos / 8) as usize];
        let mask = mask(pos);
        if value {
            (byte.fetch_or(mask, Ordering::AcqRel) & mask) == 0
        } else {
            (byte.fetch_and(!mask, Ordering::AcqRel) & mask) != 0
        }
    }

    /// Counts the set bits among the first `bits` positions
    pub fn count_ones(&self, bits: u32) -> u32 {
        (0..bits).filter(|&pos| self.test(pos)).count() as u32
    }
}

fn mask(pos: u32) -> u8 {
    1 << (pos % 8)
}
