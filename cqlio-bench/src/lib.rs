//! Benchmark harness for the cqlio wire codec. See `benches/`.
