use byteorder::{LittleEndian as LE, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

pub fn write_u64<W: Write>(w: &mut W, v: u64) -> io::Result<()> {
    w.write_u64::<LE>(v)
}

pub fn read_u64<R: Read>(r: &mut R) -> io::Result<u64> {
    r.read_u64::<LE>()
}

/// Length-prefixed word slice: a u64 count followed by that many LE words.
/// Returns the number of bytes written.
pub fn write_word_slice<W: Write>(w: &mut W, words: &[u64]) -> io::Result<u64> {
    w.write_u64::<LE>(words.len() as u64)?;
    for &word in words {
        w.write_u64::<LE>(word)?;
    }
    Ok(8 + 8 * words.len() as u64)
}

/// Counterpart of [`write_word_slice`]. Returns the words and the number of
/// bytes consumed.
pub fn read_word_slice<R: Read>(r: &mut R) -> io::Result<(Vec<u64>, u64)> {
    let len = r.read_u64::<LE>()?;
    let mut words = vec![0u64; len as usize];
    r.read_u64_into::<LE>(&mut words)?;
    Ok((words, 8 + 8 * len))
}

pub fn human_bytes(bytes: u64) -> String {
    let mut v = bytes as f64;
    let mut suffix = "bytes";
    for s in ["KB", "MB", "GB"] {
        if v <= 1024.0 {
            break;
        }
        v /= 1024.0;
        suffix = s;
    }
    if v < 10.0 {
        format!("{v:.2} {suffix}")
    } else if v < 100.0 {
        format!("{v:.1} {suffix}")
    } else {
        format!("{v:.0} {suffix}")
    }
}
