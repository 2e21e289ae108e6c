//! Hash functions the filter can split into quotient and remainder.
//!
//! The filter only requires a deterministic `fn(&[u8]) -> u64`; the default
//! is a 64-bit Murmur-2 variant. A filter serialized with one hash function
//! must be loaded with the same one.

/// Signature for pluggable hash functions.
pub type HashFn = fn(&[u8]) -> u64;

const FNV_OFFSET: u64 = 14695981039346656037;
const FNV_PRIME: u64 = 1099511628211;

/// 64-bit FNV digest.
pub fn fnv64(v: &[u8]) -> u64 {
    let mut hv = FNV_OFFSET;
    for &c in v {
        hv = hv.wrapping_mul(FNV_PRIME);
        hv ^= c as u64;
    }
    hv
}

// murmur mixing constants
const MURMUR_M: u64 = 0xc6a4a7935bd1e995;
const MURMUR_R: u32 = 47;

/// MurmurHash64A with a zero seed. The default hash function.
pub fn murmur64(v: &[u8]) -> u64 {
    let mut h = (v.len() as u64).wrapping_mul(MURMUR_M);

    let mut chunks = v.chunks_exact(8);
    for chunk in &mut chunks {
        let mut k = u64::from_le_bytes(chunk.try_into().unwrap());
        k = k.wrapping_mul(MURMUR_M);
        k ^= k >> MURMUR_R;
        k = k.wrapping_mul(MURMUR_M);
        h ^= k;
        h = h.wrapping_mul(MURMUR_M);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut k = 0u64;
        for (i, &c) in tail.iter().enumerate() {
            k |= (c as u64) << (8 * i);
        }
        h ^= k;
        h = h.wrapping_mul(MURMUR_M);
    }

    h ^= h >> MURMUR_R;
    h = h.wrapping_mul(MURMUR_M);
    h ^= h >> MURMUR_R;
    h
}

/// xxh3 digest, for callers who prefer it over the default.
pub fn xxh3(v: &[u8]) -> u64 {
    xxhash_rust::xxh3::xxh3_64(v)
}
