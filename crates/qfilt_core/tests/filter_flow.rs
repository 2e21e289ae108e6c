//! End-to-end flows: corpus loading with storage, buffer round-trips, and
//! disk-reader equivalence.

use qfilt_core::{read_header, Config, DiskFilter, Filter};
use std::collections::HashMap;
use std::io::{Cursor, Write};

// A small prose corpus, sorted, duplicates kept adjacent.
const CORPUS: &[&str] = &[
    "a", "a", "a", "a", "a", "about", "access", "across", "adjacent", "after", "all", "all",
    "allocate", "also", "an", "an", "and", "and", "and", "and", "and", "another", "answers",
    "any", "are", "are", "array", "as", "as", "at", "at", "backed", "be", "be", "be", "becomes",
    "before", "below", "between", "bit", "bit", "bits", "bits", "bits", "both", "bounded",
    "bucket", "bucket", "buckets", "buffer", "by", "by", "by", "can", "can", "cascade",
    "checked", "cluster", "clusters", "compact", "consulted", "contiguous", "copy", "cost",
    "could", "count", "cut", "data", "disk", "disk", "do", "double", "doubling", "each", "each",
    "edge", "empty", "encoded", "entries", "entries", "entry", "entry", "every", "every",
    "extra", "far", "faster", "fewer", "file", "filter", "filter", "filter", "fingerprint",
    "fingerprints", "first", "fits", "for", "for", "for", "form", "format", "found", "from",
    "from", "grows", "half", "handle", "hash", "hash", "hash", "hashes", "high", "hold", "hops",
    "if", "if", "in", "in", "in", "in", "index", "indexes", "insert", "inserted", "integer",
    "into", "into", "is", "is", "is", "is", "it", "it", "its", "keep", "key", "keys", "kind",
    "large", "left", "less", "linear", "load", "loaded", "lookup", "lookups", "low", "many",
    "mapped", "memory", "memory", "metadata", "most", "move", "much", "never", "new", "no",
    "not", "not", "of", "of", "of", "of", "of", "on", "on", "once", "one", "one", "only",
    "order", "out", "over", "packed", "packed", "per", "per", "plus", "prefix", "present",
    "probe", "put", "ram", "random", "read", "read", "reads", "remainder", "remainder",
    "remainders", "right", "run", "run", "runs", "same", "scan", "scheme", "shift", "shifted",
    "single", "size", "sized", "slot", "slot", "slots", "small", "so", "sorted", "space",
    "space", "spent", "start", "storage", "storage", "storage", "store", "stored", "stores",
    "table", "table", "than", "that", "that", "the", "the", "the", "the", "the", "the", "the",
    "them", "this", "this", "three", "to", "to", "to", "to", "to", "torus", "two", "under",
    "unpacked", "until", "up", "use", "used", "value", "value", "values", "vector", "vectors",
    "walk", "was", "way", "we", "when", "which", "wide", "width", "will", "with", "with",
    "word", "words", "wrap", "write", "written",
];

fn storage_bits_for(n: usize) -> u32 {
    64 - (n as u64).leading_zeros()
}

/// Insert every token with its index, first occurrence winning, and return
/// the expected index per token.
fn load_first_seen(qf: &mut Filter) -> HashMap<&'static str, u64> {
    let mut first_seen = HashMap::new();
    for (i, &token) in CORPUS.iter().enumerate() {
        if first_seen.contains_key(token) {
            continue;
        }
        first_seen.insert(token, i as u64);
        qf.insert_with_value(token.as_bytes(), i as u64);
        assert_eq!(qf.lookup(token.as_bytes()), (true, i as u64));
    }
    first_seen
}

#[test]
fn corpus_with_storage_survives_doubling() {
    // starts at the minimum table size, so loading forces repeated doubling
    let mut qf = Filter::with_config(Config {
        storage_bits: storage_bits_for(CORPUS.len()),
        ..Config::default()
    });
    let first_seen = load_first_seen(&mut qf);
    assert_eq!(qf.len(), first_seen.len() as u64);
    for (token, index) in &first_seen {
        assert_eq!(qf.lookup(token.as_bytes()), (true, *index), "{token}");
    }
}

#[test]
fn presized_corpus_never_doubles() {
    let mut qf = Filter::with_config(Config {
        expected_entries: CORPUS.len() as u64,
        storage_bits: 4,
        ..Config::default()
    });
    for &token in CORPUS {
        qf.insert(token.as_bytes());
        assert!(qf.contains(token.as_bytes()), "{token} missing");
    }
    for &token in CORPUS {
        assert!(qf.contains(token.as_bytes()), "{token} missing after construction");
    }
}

#[test]
fn buffer_roundtrip_preserves_everything() {
    for bit_packed in [false, true] {
        let mut qf = Filter::with_config(Config {
            bit_packed,
            storage_bits: storage_bits_for(CORPUS.len()),
            ..Config::default()
        });
        let first_seen = load_first_seen(&mut qf);

        let mut buf = Vec::new();
        let wrote = qf.write_to(&mut buf).unwrap();
        assert_eq!(wrote as usize, buf.len());

        // a default-configured filter adopts the stream's layout
        let mut back = Filter::new();
        let read = back.read_from(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(read, wrote);
        assert_eq!(back.len(), qf.len());
        for (token, index) in &first_seen {
            assert_eq!(back.lookup(token.as_bytes()), (true, *index), "{token}");
        }
    }
}

#[test]
fn disk_reader_agrees_with_memory() {
    for bit_packed in [false, true] {
        let mut qf = Filter::with_config(Config {
            bit_packed,
            storage_bits: storage_bits_for(CORPUS.len()),
            ..Config::default()
        });
        let first_seen = load_first_seen(&mut qf);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        qf.write_to(file.as_file_mut()).unwrap();
        file.as_file_mut().flush().unwrap();

        for mmap in [false, true] {
            let disk = if mmap {
                DiskFilter::open_mmap(file.path())
            } else {
                DiskFilter::open(file.path())
            }
            .unwrap();
            assert_eq!(disk.len(), qf.len());
            assert_eq!(disk.storage_bits(), qf.bits_of_storage_per_entry());
            for (token, index) in &first_seen {
                assert_eq!(disk.lookup(token.as_bytes()).unwrap(), (true, *index), "{token}");
            }
            for absent in ["zebra", "quotientless", "xylophone"] {
                assert_eq!(
                    disk.lookup(absent.as_bytes()).unwrap(),
                    qf.lookup(absent.as_bytes())
                );
            }
        }
    }
}

#[test]
fn header_describes_the_file() {
    let mut qf = Filter::with_config(Config {
        bit_packed: true,
        storage_bits: 9,
        ..Config::default()
    });
    for &token in CORPUS {
        qf.insert(token.as_bytes());
    }
    let mut file = tempfile::NamedTempFile::new().unwrap();
    qf.write_to(file.as_file_mut()).unwrap();
    file.as_file_mut().flush().unwrap();

    let header = read_header(file.path()).unwrap();
    assert_eq!(header.version, 4);
    assert_eq!(header.entries, qf.len());
    assert_eq!(header.storage_bits, 9);
    assert!(header.bit_packed);
}
