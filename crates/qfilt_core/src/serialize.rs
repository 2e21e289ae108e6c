//! Versioned little-endian serialization of the filter.
//!
//! Layout: a fixed 40-byte header, then the slot vector, then the storage
//! vector when the filter carries one. The fast path is not portable to
//! architectures of differing endianness; the unpacked vector layout is the
//! portable alternative.

use crate::consts::{FILTER_VERSION, HEADER_SIZE, MAX_Q_BITS, MIN_Q_BITS};
use crate::errors::{Error, Result};
use crate::filter::Filter;
use crate::utils::{read_u64, write_u64};
use crate::vector::Vector;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// Describes a serialized quotient filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Representation version; readers reject anything but the current one.
    pub version: u64,
    /// Number of fingerprints stored.
    pub entries: u64,
    /// Quotient bits; the slot vector holds `1 << q_bits` elements.
    pub q_bits: u64,
    /// External storage width per entry; zero means no storage vector
    /// follows the slot vector.
    pub storage_bits: u64,
    /// Whether the vectors use the bit-packed layout.
    pub bit_packed: bool,
}

impl Header {
    pub(crate) fn write_to<W: Write>(&self, stream: &mut W) -> Result<u64> {
        write_u64(stream, self.version)?;
        write_u64(stream, self.entries)?;
        write_u64(stream, self.q_bits)?;
        write_u64(stream, self.storage_bits)?;
        let mut flag = [0u8; 8];
        flag[0] = self.bit_packed as u8;
        stream.write_all(&flag)?;
        Ok(HEADER_SIZE as u64)
    }

    pub(crate) fn read_from<R: Read>(stream: &mut R) -> Result<Self> {
        let version = read_u64(stream)?;
        let entries = read_u64(stream)?;
        let q_bits = read_u64(stream)?;
        let storage_bits = read_u64(stream)?;
        let mut flag = [0u8; 8];
        stream.read_exact(&mut flag)?;
        Ok(Self {
            version,
            entries,
            q_bits,
            storage_bits,
            bit_packed: flag[0] != 0,
        })
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.version != FILTER_VERSION {
            return Err(Error::FilterVersionMismatch {
                found: self.version,
                expected: FILTER_VERSION,
            });
        }
        if !(MIN_Q_BITS as u64..=MAX_Q_BITS as u64).contains(&self.q_bits) {
            return Err(Error::Corrupt("quotient bits out of range"));
        }
        if self.storage_bits > 64 {
            return Err(Error::Corrupt("storage bits exceed word size"));
        }
        Ok(())
    }
}

/// Read just the header of a serialized filter, for describe-style tooling.
/// The version is reported as found, not validated.
pub fn read_header(path: impl AsRef<Path>) -> Result<Header> {
    let mut stream = File::open(path)?;
    Header::read_from(&mut stream)
}

impl Filter {
    /// Serialize the filter, returning the number of bytes written.
    pub fn write_to<W: Write>(&self, stream: &mut W) -> Result<u64> {
        let header = Header {
            version: FILTER_VERSION,
            entries: self.entries,
            q_bits: self.q_bits as u64,
            storage_bits: self.config.storage_bits as u64,
            bit_packed: self.config.bit_packed,
        };
        let mut written = header.write_to(stream)?;
        written += self.slots.write_to(stream)?;
        if let Some(storage) = &self.storage {
            written += storage.write_to(stream)?;
        }
        Ok(written)
    }

    /// Replace this filter's contents from a serialized stream, returning
    /// the number of bytes read. The stream's own header decides the vector
    /// layout and storage width; the hash function is kept.
    pub fn read_from<R: Read>(&mut self, stream: &mut R) -> Result<u64> {
        let header = Header::read_from(stream)?;
        header.validate()?;
        let mut bytes = HEADER_SIZE as u64;

        let mut config = self.config;
        config.storage_bits = header.storage_bits as u32;
        config.bit_packed = header.bit_packed;
        let mut fresh = Filter::for_q_bits(header.q_bits as u32, config, self.hash_fn);

        let (slots, n) = Vector::read_from(stream, header.bit_packed, 3 + fresh.r_bits)?;
        bytes += n;
        fresh.slots = slots;

        if header.storage_bits > 0 {
            let (storage, n) =
                Vector::read_from(stream, header.bit_packed, header.storage_bits as u32)?;
            bytes += n;
            fresh.storage = Some(storage);
        }

        fresh.entries = header.entries;
        tracing::debug!(
            entries = fresh.entries,
            q_bits = fresh.q_bits,
            "loaded quotient filter"
        );
        *self = fresh;
        Ok(bytes)
    }
}
