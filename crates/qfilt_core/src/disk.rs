//! Read-only quotient filter consulted directly from its on-disk form.
//!
//! Nothing is materialized in RAM: each lookup issues positioned reads of
//! one or two words per probed slot. Alternatively the file can be memory
//! mapped, in which case reads come straight out of the mapping.

use crate::consts::{BYTES_PER_WORD, HEADER_SIZE, PACKED_VECTOR_VERSION};
use crate::errors::{Error, Result};
use crate::filter::lookup_by_hash;
use crate::hash::{murmur64, HashFn};
use crate::packed;
use crate::serialize::Header;
use memmap2::Mmap;
use std::fs::File;
use std::io;
use std::path::Path;

enum Backing {
    File(File),
    Map(Mmap),
}

impl Backing {
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        match self {
            Backing::File(f) => {
                #[cfg(unix)]
                {
                    use std::os::unix::fs::FileExt;
                    f.read_exact_at(buf, offset)?;
                }
                #[cfg(windows)]
                {
                    use std::os::windows::fs::FileExt;
                    let mut done = 0usize;
                    while done < buf.len() {
                        let n = f.seek_read(&mut buf[done..], offset + done as u64)?;
                        if n == 0 {
                            return Err(Error::Io(io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                "short read from filter backing",
                            )));
                        }
                        done += n;
                    }
                }
                #[cfg(not(any(unix, windows)))]
                compile_error!("positioned reads require unix or windows");
                Ok(())
            }
            Backing::Map(m) => {
                let start = offset as usize;
                let end = start
                    .checked_add(buf.len())
                    .filter(|&end| end <= m.len())
                    .ok_or_else(|| {
                        Error::Io(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "read past end of mapped filter",
                        ))
                    })?;
                buf.copy_from_slice(&m[start..end]);
                Ok(())
            }
        }
    }

    fn read_word(&self, offset: u64) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact_at(&mut buf, offset)?;
        Ok(u64::from_le_bytes(buf))
    }
}

/// Offsets of one serialized vector inside the file.
struct DiskVector {
    /// Byte offset of the first data word.
    start: u64,
    bits: u32,
    packed: bool,
}

impl DiskVector {
    /// Parse a vector sub-header at `offset`, returning the vector view and
    /// the offset just past its data.
    fn parse(backing: &Backing, offset: u64, packed: bool) -> Result<(Self, u64)> {
        if packed {
            let version = backing.read_word(offset)?;
            if version != PACKED_VECTOR_VERSION {
                return Err(Error::VectorVersionMismatch {
                    found: version,
                    expected: PACKED_VECTOR_VERSION,
                });
            }
            let bits = backing.read_word(offset + 8)?;
            if bits > 64 {
                return Err(Error::Corrupt("packed vector bit width exceeds word size"));
            }
            // the element count is implied by the filter header
            let _size = backing.read_word(offset + 16)?;
            let words = backing.read_word(offset + 24)?;
            let start = offset + 32;
            Ok((
                Self {
                    start,
                    bits: bits as u32,
                    packed: true,
                },
                start + words * BYTES_PER_WORD,
            ))
        } else {
            let len = backing.read_word(offset)?;
            let start = offset + 8;
            Ok((
                Self {
                    start,
                    bits: 64,
                    packed: false,
                },
                start + len * BYTES_PER_WORD,
            ))
        }
    }

    fn read(&self, backing: &Backing, ix: u64) -> Result<u64> {
        if self.packed {
            packed::read_with(ix, self.bits, |word| {
                backing.read_word(self.start + word * BYTES_PER_WORD)
            })
        } else {
            backing.read_word(self.start + ix * BYTES_PER_WORD)
        }
    }
}

/// A read-only quotient filter backed by a file, queried without loading the
/// table into RAM. Lookups can fail with I/O errors; the file handle is
/// released on drop.
pub struct DiskFilter {
    backing: Backing,
    entries: u64,
    size: u64,
    r_bits: u32,
    r_mask: u64,
    storage_bits: u32,
    hash_fn: HashFn,
    slots: DiskVector,
    storage: Option<DiskVector>,
}

impl DiskFilter {
    /// Open a serialized filter for positioned-read lookups.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_backing(Backing::File(File::open(path)?))
    }

    /// Open a serialized filter through a shared memory mapping.
    pub fn open_mmap(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let map = unsafe { Mmap::map(&file)? };
        Self::from_backing(Backing::Map(map))
    }

    fn from_backing(backing: Backing) -> Result<Self> {
        let mut raw = [0u8; HEADER_SIZE];
        backing.read_exact_at(&mut raw, 0)?;
        let header = Header::read_from(&mut &raw[..])?;
        header.validate()?;

        let q_bits = header.q_bits as u32;
        let mut offset = HEADER_SIZE as u64;
        let (slots, next) = DiskVector::parse(&backing, offset, header.bit_packed)?;
        offset = next;
        let storage = if header.storage_bits > 0 {
            let (v, _next) = DiskVector::parse(&backing, offset, header.bit_packed)?;
            Some(v)
        } else {
            None
        };

        Ok(Self {
            backing,
            entries: header.entries,
            size: 1u64 << q_bits,
            r_bits: 64 - q_bits,
            r_mask: u64::MAX >> q_bits,
            storage_bits: header.storage_bits as u32,
            hash_fn: murmur64,
            slots,
            storage,
        })
    }

    /// Release the underlying file handle or mapping.
    pub fn close(self) {}

    /// Number of entries in the stored filter.
    pub fn len(&self) -> u64 {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Whether integer storage is tracked along with each entry.
    pub fn has_storage(&self) -> bool {
        self.storage_bits > 0
    }

    /// External storage width per entry.
    pub fn storage_bits(&self) -> u32 {
        self.storage_bits
    }

    /// Whether `key` is (probabilistically) present.
    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        Ok(self.lookup(key)?.0)
    }

    /// Whether `key` is present, and the value stored with it (0 when the
    /// filter has no storage).
    pub fn lookup(&self, key: &[u8]) -> Result<(bool, u64)> {
        let hv = (self.hash_fn)(key);
        let dq = hv >> self.r_bits;
        let dr = hv & self.r_mask;
        let read = |i: u64| self.slots.read(&self.backing, i);
        let storage = self
            .storage
            .as_ref()
            .map(|v| move |i: u64| v.read(&self.backing, i));
        lookup_by_hash(dq, dr, self.size, read, storage)
    }
}
