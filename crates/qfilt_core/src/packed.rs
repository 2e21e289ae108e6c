//! Bit-packed vector: a contiguous array of fixed-width unsigned integers.
//!
//! Elements may straddle 64-bit word boundaries, so every access touches one
//! or two adjacent words. The serialized form carries its own versioned
//! sub-header and is not portable across endianness for the fast path.

use crate::consts::{BITS_PER_WORD, PACKED_VECTOR_VERSION};
use crate::errors::{Error, Result};
use crate::utils::{read_u64, read_word_slice, write_u64, write_word_slice};
use std::convert::Infallible;
use std::io::{Read, Write};

/// Words backing `count` elements of `bits` width. The extra word removes a
/// boundary check on cross-word access.
pub(crate) fn words_required(bits: u32, count: u64) -> u64 {
    (count * bits as u64) / BITS_PER_WORD as u64 + 1
}

/// Mask of the bits a `bits`-wide element must never carry.
fn forbidden_mask(bits: u32) -> u64 {
    u64::MAX.checked_shl(bits).unwrap_or(0)
}

// Shifts by >= 64 are well-defined (zero) in the access arithmetic below.
#[inline]
fn shl(x: u64, n: u32) -> u64 {
    x.checked_shl(n).unwrap_or(0)
}

#[inline]
fn shr(x: u64, n: u32) -> u64 {
    x.checked_shr(n).unwrap_or(0)
}

/// Fetch element `ix` of a `bits`-wide packed array through `word_at`,
/// which reads the word at a given word offset. Shared between the in-RAM
/// vector and the positioned-read disk view.
pub(crate) fn read_with<E, F>(ix: u64, bits: u32, mut word_at: F) -> std::result::Result<u64, E>
where
    F: FnMut(u64) -> std::result::Result<u64, E>,
{
    let bit_start = ix * bits as u64;
    let word = bit_start / BITS_PER_WORD as u64;
    let bit_off = (bit_start % BITS_PER_WORD as u64) as u32;
    let take = (BITS_PER_WORD - bit_off).min(bits);

    let w0 = word_at(word)?;
    let mut val = shl(w0, BITS_PER_WORD - take - bit_off) >> (BITS_PER_WORD - take);
    if take < bits {
        let rem = bits - take;
        let w1 = word_at(word + 1)?;
        val |= (shl(w1, BITS_PER_WORD - rem) >> (BITS_PER_WORD - rem)) << take;
    }
    Ok(val)
}

#[derive(Debug, Clone)]
pub struct PackedVector {
    forbidden_mask: u64,
    bits: u32,
    size: u64,
    space: Vec<u64>,
}

impl PackedVector {
    pub fn new(bits: u32, size: u64) -> Self {
        assert!(
            bits <= BITS_PER_WORD,
            "bit size of {bits} is greater than word size of {BITS_PER_WORD}, not supported"
        );
        Self {
            forbidden_mask: forbidden_mask(bits),
            bits,
            size,
            space: vec![0u64; words_required(bits, size) as usize],
        }
    }

    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn get(&self, ix: u64) -> u64 {
        assert!(ix < self.size, "index {ix} out of range for size {}", self.size);
        let got = read_with(ix, self.bits, |word| {
            Ok::<u64, Infallible>(self.space[word as usize])
        });
        match got {
            Ok(v) => v,
            Err(e) => match e {},
        }
    }

    pub fn set(&mut self, ix: u64, val: u64) {
        assert!(ix < self.size, "index {ix} out of range for size {}", self.size);
        if val & self.forbidden_mask != 0 {
            panic!(
                "attempt to store out of range value, numeric overflow: {:x} ({:x})",
                val & self.forbidden_mask,
                val
            );
        }
        let bit_start = ix * self.bits as u64;
        let word = (bit_start / BITS_PER_WORD as u64) as usize;
        let bit_off = (bit_start % BITS_PER_WORD as u64) as u32;
        let take = (BITS_PER_WORD - bit_off).min(self.bits);

        // zero the field, keeping bits on either side, then or in val
        let keep_high = shl(shr(self.space[word], bit_off + take), bit_off + take);
        let keep_low = shr(shl(self.space[word], BITS_PER_WORD - bit_off), BITS_PER_WORD - bit_off);
        self.space[word] = keep_high | keep_low | (val << bit_off);

        if take < self.bits {
            let rem = self.bits - take;
            let next = &mut self.space[word + 1];
            *next = shl(shr(*next, rem), rem) | (val >> take);
        }
    }

    pub fn swap(&mut self, ix: u64, val: u64) -> u64 {
        let old = self.get(ix);
        self.set(ix, val);
        old
    }

    pub fn write_to<W: Write>(&self, stream: &mut W) -> Result<u64> {
        write_u64(stream, PACKED_VECTOR_VERSION)?;
        write_u64(stream, self.bits as u64)?;
        write_u64(stream, self.size)?;
        let n = write_word_slice(stream, &self.space)?;
        Ok(24 + n)
    }

    pub fn read_from<R: Read>(stream: &mut R) -> Result<(Self, u64)> {
        let version = read_u64(stream)?;
        let bits = read_u64(stream)?;
        let size = read_u64(stream)?;
        if version != PACKED_VECTOR_VERSION {
            return Err(Error::VectorVersionMismatch {
                found: version,
                expected: PACKED_VECTOR_VERSION,
            });
        }
        if bits > BITS_PER_WORD as u64 {
            return Err(Error::Corrupt("packed vector bit width exceeds word size"));
        }
        let (space, n) = read_word_slice(stream)?;
        Ok((
            Self {
                forbidden_mask: forbidden_mask(bits as u32),
                bits: bits as u32,
                size,
                space,
            },
            24 + n,
        ))
    }
}
