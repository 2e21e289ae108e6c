//! Filter configuration and sizing arithmetic.

use crate::consts::{BITS_PER_WORD, MAX_LOAD_FACTOR, MAX_Q_BITS, MIN_Q_BITS};
use crate::hash::HashFn;
use crate::utils::human_bytes;
use std::fmt::Write;

/// Controls the behavior of a quotient filter at construction time.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Expected number of entries, used to pre-size the table so batch
    /// loading does not have to double repeatedly. Zero means start from
    /// the minimum table size.
    pub expected_entries: u64,
    /// Bits of external storage to keep per entry. Zero disables storage.
    pub storage_bits: u32,
    /// Use the bit-packed representation: slightly more work per access,
    /// considerably smaller tables, especially at large entry counts.
    pub bit_packed: bool,
    /// Overrides the default 64-bit murmur hash. A filter must be loaded
    /// with the same hash function it was populated with.
    pub hash_fn: Option<HashFn>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            expected_entries: 0,
            storage_bits: 0,
            bit_packed: false,
            hash_fn: None,
        }
    }
}

impl Config {
    /// Quotient bits needed so the expected entries fit under the maximum
    /// load factor.
    pub fn q_bits(&self) -> u32 {
        let mut buckets = 1u64;
        let mut bits = 0u32;
        while bits < MAX_Q_BITS
            && (buckets as f64) * MAX_LOAD_FACTOR < self.expected_entries as f64
        {
            buckets <<= 1;
            bits += 1;
        }
        bits.max(MIN_Q_BITS)
    }

    /// Number of hash buckets the derived quotient bits allocate.
    pub fn bucket_count(&self) -> u64 {
        1 << self.q_bits()
    }

    /// Expected percentage loading at the expected entry count.
    pub fn expected_loading(&self) -> f64 {
        100.0 * self.expected_entries as f64 / self.bucket_count() as f64
    }

    /// Approximate bit-packed footprint on disk or in RAM.
    pub fn bytes_required(&self) -> u64 {
        let bits_per_bucket =
            (BITS_PER_WORD - self.q_bits()) as u64 + 3 + self.storage_bits as u64;
        self.bucket_count() * bits_per_bucket / 8
    }

    /// Indented human-readable sizing summary.
    pub fn explain_indent(&self, indent: &str) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{indent}{:2} bits configured for quotient ({} buckets)",
            self.q_bits(),
            self.bucket_count()
        );
        let _ = writeln!(
            out,
            "{indent}{:2} bits needed per bucket for remainder",
            BITS_PER_WORD - self.q_bits()
        );
        let _ = writeln!(out, "{indent} 3 bits metadata per bucket");
        let _ = writeln!(out, "{indent}{:2} bits external storage", self.storage_bits);
        let _ = writeln!(
            out,
            "{indent}   {} storage size expected",
            human_bytes(self.bytes_required())
        );
        out
    }

    pub fn explain(&self) -> String {
        self.explain_indent("")
    }
}
