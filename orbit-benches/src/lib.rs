//! Benchmark suite for the adapter and retrieval subsystem.
