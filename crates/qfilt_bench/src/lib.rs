//! Benchmark-only crate; see `benches/filter.rs`.
