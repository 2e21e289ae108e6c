use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("incompatible file format: version is {found}, expected {expected}")]
    FilterVersionMismatch { found: u64, expected: u64 },

    #[error("bit packed vector version mismatch: got {found:#x}, expected {expected:#x}")]
    VectorVersionMismatch { found: u64, expected: u64 },

    #[error("corrupt record: {0}")]
    Corrupt(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
