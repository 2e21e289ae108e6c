//! The quotient-filter state machine.
//!
//! Fingerprints live in a linear table of `2^q` slots. Each slot packs three
//! metadata bits (occupied, continuation, shifted) alongside an `r`-bit
//! remainder; runs of remainders sharing a canonical bucket stay contiguous
//! and sorted, and clusters of runs shift right to resolve collisions. All
//! slot arithmetic is modulo the table size.

use crate::config::Config;
use crate::consts::{BITS_PER_WORD, MAX_LOAD_FACTOR, MAX_Q_BITS, MIN_Q_BITS};
use crate::hash::{murmur64, HashFn};
use crate::vector::Vector;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::fmt::Write;

const OCCUPIED_MASK: u64 = 1;
const CONTINUATION_MASK: u64 = 1 << 1;
const SHIFTED_MASK: u64 = 1 << 2;
const METADATA_MASK: u64 = 0x7;

/// One slot's packed content: three metadata bits and the remainder above
/// them. A slot is empty iff all three metadata bits are clear.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct SlotWord(u64);

impl SlotWord {
    pub(crate) fn from_raw(raw: u64) -> Self {
        SlotWord(raw)
    }

    pub(crate) fn raw(self) -> u64 {
        self.0
    }

    pub(crate) fn is_empty(self) -> bool {
        self.0 & METADATA_MASK == 0
    }

    pub(crate) fn occupied(self) -> bool {
        self.0 & OCCUPIED_MASK != 0
    }

    pub(crate) fn continuation(self) -> bool {
        self.0 & CONTINUATION_MASK != 0
    }

    pub(crate) fn shifted(self) -> bool {
        self.0 & SHIFTED_MASK != 0
    }

    pub(crate) fn remainder(self) -> u64 {
        self.0 >> 3
    }

    fn set_occupied(&mut self, on: bool) {
        if on {
            self.0 |= OCCUPIED_MASK;
        } else {
            self.0 &= !OCCUPIED_MASK;
        }
    }

    fn set_continuation(&mut self, on: bool) {
        if on {
            self.0 |= CONTINUATION_MASK;
        } else {
            self.0 &= !CONTINUATION_MASK;
        }
    }

    fn set_shifted(&mut self, on: bool) {
        if on {
            self.0 |= SHIFTED_MASK;
        } else {
            self.0 &= !SHIFTED_MASK;
        }
    }

    fn set_remainder(&mut self, r: u64) {
        self.0 = (self.0 & METADATA_MASK) | (r << 3);
    }
}

#[inline]
pub(crate) fn next_slot(i: u64, size: u64) -> u64 {
    if i + 1 >= size {
        0
    } else {
        i + 1
    }
}

#[inline]
pub(crate) fn prev_slot(i: u64, size: u64) -> u64 {
    if i == 0 {
        size - 1
    } else {
        i - 1
    }
}

/// Locate the start slot of `dq`'s run when the run has been shifted away
/// from its canonical bucket.
///
/// Scans left counting occupied buckets that sort at or before `dq` until a
/// cluster start (`shifted == false`), then scans right matching run starts
/// against that count. Terminates because clusters are finite and every
/// cluster starts unshifted.
pub(crate) fn find_run_start<E, F>(
    dq: u64,
    size: u64,
    read: &mut F,
) -> std::result::Result<u64, E>
where
    F: FnMut(u64) -> std::result::Result<u64, E>,
{
    let mut runs: u64 = 1;
    let mut complete: u64 = 0;
    let mut i = dq;
    loop {
        let sd = SlotWord::from_raw(read(i)?);
        if !sd.continuation() {
            complete += 1;
        }
        if !sd.shifted() {
            break;
        } else if sd.occupied() {
            runs += 1;
        }
        i = prev_slot(i, size);
    }
    let mut slot = dq;
    while runs > complete {
        slot = next_slot(slot, size);
        if !SlotWord::from_raw(read(slot)?).continuation() {
            complete += 1;
        }
    }
    Ok(slot)
}

/// Scan for `(dq, dr)`, reading slots through `read` and the payload (when
/// the filter carries one) through `storage`. Works identically over an
/// in-RAM vector and a positioned-read view of a file.
pub(crate) fn lookup_by_hash<E, F, G>(
    dq: u64,
    dr: u64,
    size: u64,
    mut read: F,
    mut storage: Option<G>,
) -> std::result::Result<(bool, u64), E>
where
    F: FnMut(u64) -> std::result::Result<u64, E>,
    G: FnMut(u64) -> std::result::Result<u64, E>,
{
    let mut sd = SlotWord::from_raw(read(dq)?);
    if !sd.occupied() {
        return Ok((false, 0));
    }
    let mut slot = dq;
    if sd.shifted() {
        slot = find_run_start(dq, size, &mut read)?;
        sd = SlotWord::from_raw(read(slot)?);
    }
    loop {
        if sd.remainder() == dr {
            let value = match storage.as_mut() {
                Some(s) => s(slot)?,
                None => 0,
            };
            return Ok((true, value));
        }
        if sd.remainder() > dr {
            // remainders in a run are sorted
            break;
        }
        slot = next_slot(slot, size);
        sd = SlotWord::from_raw(read(slot)?);
        if !sd.continuation() {
            break;
        }
    }
    Ok((false, 0))
}

/// A quotient filter holding fingerprints of byte strings, with optional
/// fixed-width integer storage per entry.
///
/// Membership answers have no false negatives; false positives are bounded
/// by the remainder width. The table doubles itself when the load factor
/// crosses [`MAX_LOAD_FACTOR`].
#[derive(Clone)]
pub struct Filter {
    pub(crate) entries: u64,
    pub(crate) size: u64,
    pub(crate) q_bits: u32,
    pub(crate) r_bits: u32,
    pub(crate) r_mask: u64,
    pub(crate) max_entries: u64,
    pub(crate) slots: Vector,
    pub(crate) storage: Option<Vector>,
    pub(crate) config: Config,
    pub(crate) hash_fn: HashFn,
}

impl Default for Filter {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter {
    /// An empty filter with default sizing and no external storage.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// An empty filter configured by `config`.
    pub fn with_config(config: Config) -> Self {
        assert!(
            config.storage_bits <= BITS_PER_WORD,
            "storage bits {} exceed word size",
            config.storage_bits
        );
        let hash_fn = config.hash_fn.unwrap_or(murmur64);
        Self::for_q_bits(config.q_bits(), config, hash_fn)
    }

    pub(crate) fn for_q_bits(q_bits: u32, config: Config, hash_fn: HashFn) -> Self {
        assert!(
            (MIN_Q_BITS..=MAX_Q_BITS).contains(&q_bits),
            "quotient bits {q_bits} out of range"
        );
        let size = 1u64 << q_bits;
        let r_bits = BITS_PER_WORD - q_bits;
        let r_mask = u64::MAX >> q_bits;
        let max_entries = (size as f64 * MAX_LOAD_FACTOR).ceil() as u64;
        let slots = Vector::new(config.bit_packed, 3 + r_bits, size);
        let storage =
            (config.storage_bits > 0).then(|| Vector::new(config.bit_packed, config.storage_bits, size));
        Filter {
            entries: 0,
            size,
            q_bits,
            r_bits,
            r_mask,
            max_entries,
            slots,
            storage,
            config,
            hash_fn,
        }
    }

    /// Number of entries in the filter.
    pub fn len(&self) -> u64 {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Configured external storage width per entry.
    pub fn bits_of_storage_per_entry(&self) -> u32 {
        self.config.storage_bits
    }

    fn split_hash(&self, key: &[u8]) -> (u64, u64) {
        let hv = (self.hash_fn)(key);
        (hv >> self.r_bits, hv & self.r_mask)
    }

    fn read_slot(&self, slot: u64) -> SlotWord {
        SlotWord::from_raw(self.slots.get(slot))
    }

    fn write_slot(&mut self, slot: u64, sd: SlotWord) {
        self.slots.set(slot, sd.raw());
    }

    /// Store `key`, returning whether it was already present.
    pub fn insert(&mut self, key: &[u8]) -> bool {
        self.insert_with_value(key, 0)
    }

    /// Store `key` with an associated integer value, returning whether the
    /// key was already present. Re-inserting a key overwrites its value.
    pub fn insert_with_value(&mut self, key: &[u8], value: u64) -> bool {
        if self.entries >= self.max_entries {
            self.double();
        }
        let (dq, dr) = self.split_hash(key);
        self.insert_by_hash(dq, dr, value)
    }

    pub(crate) fn insert_by_hash(&mut self, dq: u64, dr: u64, value: u64) -> bool {
        let mut sd = self.read_slot(dq);

        // the canonical slot is free, claim it
        if sd.is_empty() {
            self.entries += 1;
            sd.set_occupied(true);
            sd.set_remainder(dr);
            self.write_slot(dq, sd);
            if let Some(storage) = self.storage.as_mut() {
                storage.set(dq, value);
            }
            return false;
        }

        // an already-occupied bucket means we are extending its run
        let extending = sd.occupied();
        if !extending {
            sd.set_occupied(true);
            self.write_slot(dq, sd);
        }

        let run_start = if sd.shifted() {
            let mut read = |i: u64| Ok::<u64, Infallible>(self.slots.get(i));
            match find_run_start(dq, self.size, &mut read) {
                Ok(s) => s,
                Err(e) => match e {},
            }
        } else {
            dq
        };

        // find the sorted position inside the run
        let mut slot = run_start;
        let mut in_run = false;
        if extending {
            in_run = true;
            let mut cur = self.read_slot(slot);
            loop {
                if cur.is_empty() || cur.remainder() >= dr {
                    break;
                }
                let next = next_slot(slot, self.size);
                let nsd = self.read_slot(next);
                if !nsd.continuation() {
                    // every remainder in the run sorts below dr
                    slot = next;
                    in_run = false;
                    break;
                }
                slot = next;
                cur = nsd;
            }
            if in_run && !cur.is_empty() && cur.remainder() == dr {
                // already present, refresh the value
                if let Some(storage) = self.storage.as_mut() {
                    storage.set(slot, value);
                }
                return true;
            }
        }

        self.entries += 1;

        // write the new remainder at `slot` and cascade the displaced
        // content rightward until an empty slot absorbs it
        let mut shifted = slot != dq;
        let mut continuation = slot != run_start;
        let mut dr = dr;
        let mut value = value;
        loop {
            if let Some(storage) = self.storage.as_mut() {
                value = storage.swap(slot, value);
            }
            let old = self.read_slot(slot);
            let mut new = SlotWord::default();
            new.set_shifted(shifted);
            new.set_continuation(continuation);
            // the occupied bit belongs to the index, not to whichever
            // remainder currently sits in the slot
            new.set_occupied(old.occupied());
            new.set_remainder(dr);
            self.write_slot(slot, new);
            if old.is_empty() {
                break;
            }
            continuation = (slot == run_start && extending) || old.continuation();
            dr = old.remainder();
            slot = next_slot(slot, self.size);
            shifted = true;
        }
        false
    }

    /// Whether `key` is (probabilistically) present.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.lookup(key).0
    }

    /// Whether `key` is present, and the value stored with it (0 when the
    /// filter has no storage).
    pub fn lookup(&self, key: &[u8]) -> (bool, u64) {
        let (dq, dr) = self.split_hash(key);
        let read = |i: u64| Ok::<u64, Infallible>(self.slots.get(i));
        let storage = self
            .storage
            .as_ref()
            .map(|s| move |i: u64| Ok::<u64, Infallible>(s.get(i)));
        match lookup_by_hash(dq, dr, self.size, read, storage) {
            Ok(out) => out,
            Err(e) => match e {},
        }
    }

    /// Visit every stored fingerprint as `(hash value, slot index)`. The
    /// hash value carries the canonical bucket in its high `q` bits, so
    /// doubling can re-split it at a finer remainder width.
    pub(crate) fn each_hash_value(&self, mut cb: impl FnMut(u64, u64)) {
        // start from a cluster boundary so runs are never cut in half
        let mut start = 0u64;
        while self.read_slot(start).shifted() {
            start = next_slot(start, self.size);
        }
        let end = prev_slot(start, self.size);

        // canonical buckets whose runs have begun but not yet ended
        let mut pending: VecDeque<u64> = VecDeque::new();
        let mut i = start;
        loop {
            let sd = self.read_slot(i);
            if !sd.continuation() && !pending.is_empty() {
                pending.pop_front();
            }
            if sd.occupied() {
                pending.push_back(i);
            }
            if let Some(&bucket) = pending.front() {
                cb((bucket << self.r_bits) | (sd.remainder() & self.r_mask), i);
            }
            if i == end {
                break;
            }
            i = next_slot(i, self.size);
        }
    }

    /// Rebuild the table with one more quotient bit, replaying every stored
    /// hash value at the finer split.
    fn double(&mut self) {
        let next_q = self.q_bits + 1;
        tracing::debug!(q_bits = next_q, entries = self.entries, "doubling quotient filter");
        let mut grown = Filter::for_q_bits(next_q, self.config, self.hash_fn);
        self.each_hash_value(|hv, slot| {
            let dq = hv >> grown.r_bits;
            let dr = hv & grown.r_mask;
            let value = self.storage.as_ref().map_or(0, |s| s.get(slot));
            grown.insert_by_hash(dq, dr, value);
        });
        debug_assert_eq!(self.entries, grown.entries);
        *self = grown;
    }

    /// Textual table dump for troubleshooting. With `full`, lists every
    /// non-empty slot with its metadata bits and remainder.
    pub fn debug_dump(&self, full: bool) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "quotient filter is {} large ({} q bits) with {} entries (loaded {:.3})",
            self.size,
            self.q_bits,
            self.entries,
            self.entries as f64 / self.size as f64
        );
        if !full {
            return out;
        }
        let _ = writeln!(out, "  bucket  O C S remainder->");
        let mut skipped = 0usize;
        for i in 0..self.size {
            let sd = self.read_slot(i);
            if sd.is_empty() {
                skipped += 1;
                continue;
            }
            if skipped > 0 {
                let _ = writeln!(out, "          ...");
                skipped = 0;
            }
            let value = self.storage.as_ref().map_or(0, |s| s.get(i));
            let _ = writeln!(
                out,
                "{:8}  {} {} {} {:x} ({})",
                i,
                sd.occupied() as u8,
                sd.continuation() as u8,
                sd.shifted() as u8,
                sd.remainder(),
                value
            );
        }
        if skipped > 0 {
            let _ = writeln!(out, "          ...");
        }
        out
    }

    #[cfg(test)]
    fn count_filled_slots(&self) -> u64 {
        (0..self.size)
            .filter(|&i| !self.read_slot(i).is_empty())
            .count() as u64
    }

    /// Structural invariant check, test-only: the entry counter matches the
    /// number of filled slots, every occupied bucket owns exactly one run,
    /// and no slot belongs to two runs.
    #[cfg(test)]
    pub(crate) fn check_consistency(&self) -> Result<(), String> {
        use std::collections::HashMap;

        if self.count_filled_slots() != self.entries {
            return Err(format!(
                "{} items added, only {} found",
                self.entries,
                self.count_filled_slots()
            ));
        }

        let mut usage: HashMap<u64, u64> = HashMap::new();
        for bucket in 0..self.size {
            if !self.read_slot(bucket).occupied() {
                continue;
            }
            let mut read = |i: u64| Ok::<u64, Infallible>(self.slots.get(i));
            let mut slot = match find_run_start(bucket, self.size, &mut read) {
                Ok(s) => s,
                Err(e) => match e {},
            };
            let mut prev_remainder = None;
            loop {
                if let Some(&owner) = usage.get(&slot) {
                    return Err(format!(
                        "slot {slot} used by both bucket {bucket} and {owner}"
                    ));
                }
                usage.insert(slot, bucket);
                let r = self.read_slot(slot).remainder();
                if prev_remainder.is_some_and(|p| p > r) {
                    return Err(format!("run for bucket {bucket} is not sorted at slot {slot}"));
                }
                prev_remainder = Some(r);
                slot = next_slot(slot, self.size);
                if !self.read_slot(slot).continuation() {
                    break;
                }
            }
        }
        if usage.len() as u64 != self.entries {
            return Err(format!(
                "records show {} entries, found {} via scanning",
                self.entries,
                usage.len()
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filter")
            .field("entries", &self.entries)
            .field("q_bits", &self.q_bits)
            .field("r_bits", &self.r_bits)
            .field("storage_bits", &self.config.storage_bits)
            .field("bit_packed", &self.config.bit_packed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{fnv64, murmur64, xxh3};
    use std::collections::{HashMap, HashSet};

    #[test]
    fn colors() {
        let data = ["red", "yellow", "orange", "blue"];
        let mut qf = Filter::with_config(Config {
            expected_entries: data.len() as u64,
            bit_packed: true,
            ..Config::default()
        });
        for color in data {
            qf.insert(color.as_bytes());
        }
        for color in data {
            assert!(qf.contains(color.as_bytes()), "{color} missing");
        }
        for color in ["green", "indigo", "violet"] {
            assert!(!qf.contains(color.as_bytes()), "{color} found");
        }
        assert_eq!(qf.len(), 4);
    }

    #[test]
    fn external_storage() {
        let mut qf = Filter::with_config(Config {
            storage_bits: 8,
            ..Config::default()
        });
        assert!(!qf.insert_with_value(b"hi mom", 42));
        assert_eq!(qf.lookup(b"hi mom"), (true, 42));
        assert_eq!(qf.bits_of_storage_per_entry(), 8);
    }

    #[test]
    fn value_overwritten_on_reinsert() {
        let mut qf = Filter::with_config(Config {
            storage_bits: 16,
            ..Config::default()
        });
        assert!(!qf.insert_with_value(b"key", 7));
        assert!(qf.insert_with_value(b"key", 9));
        assert_eq!(qf.lookup(b"key"), (true, 9));
        assert_eq!(qf.len(), 1);
    }

    #[test]
    fn empty_key_is_legal() {
        let mut qf = Filter::new();
        assert!(!qf.contains(b""));
        qf.insert(b"");
        assert!(qf.contains(b""));
        assert_eq!(qf.len(), 1);
    }

    #[test]
    fn grows_on_demand() {
        for bit_packed in [false, true] {
            let mut qf = Filter::with_config(Config {
                bit_packed,
                storage_bits: 20,
                ..Config::default()
            });
            assert_eq!(qf.size, 16);
            for i in 0..600u64 {
                let key = i.to_string();
                qf.insert_with_value(key.as_bytes(), i);
                if i % 37 == 0 {
                    qf.check_consistency().unwrap();
                }
                assert!(qf.contains(key.as_bytes()), "{key} missing after insertion");
            }
            qf.check_consistency().unwrap();
            assert!(qf.size > 16);
            for i in 0..600u64 {
                assert_eq!(qf.lookup(i.to_string().as_bytes()), (true, i));
            }
        }
    }

    #[test]
    fn enumerates_exactly_the_inserted_hashes() {
        let mut qf = Filter::with_config(Config {
            storage_bits: 4,
            ..Config::default()
        });
        let mut expected = HashSet::new();
        for i in 0..200u64 {
            let key = format!("entry-{i}");
            qf.insert(key.as_bytes());
            qf.check_consistency().unwrap();
            expected.insert(murmur64(key.as_bytes()));
        }
        let mut got = HashSet::new();
        qf.each_hash_value(|hv, _slot| {
            got.insert(hv);
        });
        assert_eq!(got, expected);
        assert_eq!(qf.len(), expected.len() as u64);
    }

    #[test]
    fn len_counts_distinct_hash_values() {
        let mut qf = Filter::new();
        let mut distinct = HashSet::new();
        for i in 0..100u64 {
            let key = (i % 25).to_string();
            qf.insert(key.as_bytes());
            distinct.insert(murmur64(key.as_bytes()));
        }
        assert_eq!(qf.len(), distinct.len() as u64);
    }

    #[test]
    fn sorted_runs_survive_collisions() {
        // a tiny table forces long runs and shift cascades
        let mut qf = Filter::new();
        let mut reference: HashMap<String, u64> = HashMap::new();
        for i in 0..10u64 {
            let key = format!("collide-{i}");
            let first = *reference.entry(key.clone()).or_insert(i);
            qf.insert_with_value(key.as_bytes(), first);
            qf.check_consistency().unwrap();
        }
        for (key, value) in &reference {
            assert_eq!(qf.lookup(key.as_bytes()), (true, *value));
        }
    }

    #[test]
    fn pluggable_hash_functions() {
        for hash_fn in [fnv64 as crate::hash::HashFn, xxh3] {
            let mut qf = Filter::with_config(Config {
                hash_fn: Some(hash_fn),
                ..Config::default()
            });
            for word in ["alpha", "beta", "gamma"] {
                qf.insert(word.as_bytes());
            }
            for word in ["alpha", "beta", "gamma"] {
                assert!(qf.contains(word.as_bytes()));
            }
            assert!(!qf.contains(b"delta"));
        }
    }

    #[test]
    fn debug_dump_lists_slots() {
        let mut qf = Filter::new();
        qf.insert(b"one");
        qf.insert(b"two");
        let text = qf.debug_dump(true);
        assert!(text.contains("2 entries"));
        assert!(text.contains("O C S"));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn rejects_oversized_quotient() {
        Filter::for_q_bits(64, Config::default(), murmur64);
    }

    fn raw_slot(occupied: bool, continuation: bool, shifted: bool, r: u64) -> SlotWord {
        let mut sd = SlotWord::default();
        sd.set_occupied(occupied);
        sd.set_continuation(continuation);
        sd.set_shifted(shifted);
        sd.set_remainder(r);
        sd
    }

    #[test]
    fn run_start_scan_over_handmade_cluster() {
        // bucket 5 owns slots 5..=6, pushing bucket 6's run to slot 7
        let mut qf = Filter::new();
        qf.write_slot(5, raw_slot(true, false, false, 1));
        qf.write_slot(6, raw_slot(true, true, true, 3));
        qf.write_slot(7, raw_slot(false, false, true, 2));

        let mut read = |i: u64| Ok::<u64, Infallible>(qf.slots.get(i));
        assert_eq!(find_run_start(5, qf.size, &mut read), Ok(5));
        assert_eq!(find_run_start(6, qf.size, &mut read), Ok(7));
        // an untouched bucket resolves to itself
        assert_eq!(find_run_start(12, qf.size, &mut read), Ok(12));
    }

    #[test]
    fn run_start_scan_wraps_around() {
        // a cluster starting at the last slot spills into slot 0
        let mut qf = Filter::new();
        let last = qf.size - 1;
        qf.write_slot(last, raw_slot(true, false, false, 4));
        qf.write_slot(0, raw_slot(true, true, true, 9));
        qf.write_slot(1, raw_slot(false, false, true, 2));

        let mut read = |i: u64| Ok::<u64, Infallible>(qf.slots.get(i));
        assert_eq!(find_run_start(last, qf.size, &mut read), Ok(last));
        assert_eq!(find_run_start(0, qf.size, &mut read), Ok(1));
    }

    #[test]
    fn lookup_scan_respects_run_order() {
        // one run holding remainders 2 and 5 for bucket 3
        let mut qf = Filter::new();
        qf.write_slot(3, raw_slot(true, false, false, 2));
        qf.write_slot(4, raw_slot(false, true, true, 5));
        qf.entries = 2;

        let scan = |dr: u64| {
            let read = |i: u64| Ok::<u64, Infallible>(qf.slots.get(i));
            match lookup_by_hash(3, dr, qf.size, read, None::<fn(u64) -> Result<u64, Infallible>>)
            {
                Ok(out) => out,
                Err(e) => match e {},
            }
        };
        assert_eq!(scan(2), (true, 0));
        assert_eq!(scan(5), (true, 0));
        // the sorted-run early exit and the run-end exit
        assert_eq!(scan(3), (false, 0));
        assert_eq!(scan(7), (false, 0));
    }
}
