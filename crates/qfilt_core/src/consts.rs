//! Shared constants for the filter core and its on-disk format.

/// Number of bits in a table word.
pub const BITS_PER_WORD: u32 = 64;

/// Number of bytes in a table word.
pub const BYTES_PER_WORD: u64 = 8;

/// Fewest quotient bits a filter may be configured with.
///
/// Must stay above 3: every slot word carries 3 metadata bits.
pub const MIN_Q_BITS: u32 = 4;

/// Most quotient bits a filter may be configured with; the remainder
/// needs at least one bit.
pub const MAX_Q_BITS: u32 = 63;

/// Loading boundary at which the hash table doubles, also used to
/// initially size the table.
pub const MAX_LOAD_FACTOR: f64 = 0.65;

/// Version of the on-disk filter representation. Bumped any time an
/// incompatible change is made.
pub const FILTER_VERSION: u64 = 4;

/// Version of the bit-packed vector serialization format.
pub const PACKED_VECTOR_VERSION: u64 = 8;

/// Serialized header size in bytes: four u64 fields plus a padded flag byte.
pub const HEADER_SIZE: usize = 40;
