//! Benchmark-only crate; see `benches/engine_bench.rs`.
