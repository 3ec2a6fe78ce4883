//! Metrics module
//!
//! Provides Prometheus metrics for chunk ingestion, assembly and sweeping.

pub mod server;

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, register_int_counter,
    register_int_counter_vec, Counter, CounterVec, Histogram, IntCounter, IntCounterVec,
};

lazy_static! {
    // Chunk metrics
    pub static ref CHUNKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "chunkyard_chunks_total",
        "Total number of chunks received",
        &["status"]
    ).unwrap();

    pub static ref CHUNK_BYTES_TOTAL: Counter = register_counter!(
        "chunkyard_chunk_bytes_total",
        "Total chunk payload bytes stored"
    ).unwrap();

    // Assembly metrics
    pub static ref ASSEMBLIES_TOTAL: CounterVec = register_counter_vec!(
        "chunkyard_assemblies_total",
        "Total assemblies by outcome",
        &["status"]
    ).unwrap();

    pub static ref ASSEMBLY_DURATION: Histogram = register_histogram!(
        "chunkyard_assembly_duration_seconds",
        "Time spent merging chunks into an artifact",
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 60.0]
    ).unwrap();

    pub static ref ASSEMBLY_CHUNKS: Histogram = register_histogram!(
        "chunkyard_assembly_chunks",
        "Number of chunks per assembled artifact",
        vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 10000.0]
    ).unwrap();

    pub static ref CLEANUP_FAILURES: IntCounter = register_int_counter!(
        "chunkyard_cleanup_failures_total",
        "Chunk slots that could not be removed after a merge"
    ).unwrap();

    pub static ref TOTAL_CONFLICTS: IntCounter = register_int_counter!(
        "chunkyard_total_conflicts_total",
        "Chunks declaring a total different from the adopted one"
    ).unwrap();

    // Sweep metrics
    pub static ref SWEEP_REMOVED: IntCounterVec = register_int_counter_vec!(
        "chunkyard_sweep_removed_total",
        "Items removed by the temp sweeper",
        &["kind"]  // "slot", "staging" or "assembly"
    ).unwrap();

    // Error metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "chunkyard_errors_total",
        "Total errors",
        &["type"]
    ).unwrap();
}

/// Record a durably stored chunk
pub fn record_chunk_stored(bytes: u64) {
    CHUNKS_TOTAL.with_label_values(&["stored"]).inc();
    CHUNK_BYTES_TOTAL.inc_by(bytes as f64);
}

/// Record a rejected or failed chunk
pub fn record_chunk_failure(kind: &str) {
    CHUNKS_TOTAL.with_label_values(&["failed"]).inc();
    record_error(kind);
}

/// Record a published artifact
pub fn record_assembly_success(chunks: u32, duration_secs: f64) {
    ASSEMBLIES_TOTAL.with_label_values(&["success"]).inc();
    ASSEMBLY_DURATION.observe(duration_secs);
    ASSEMBLY_CHUNKS.observe(chunks as f64);
}

/// Record an aborted assembly
pub fn record_assembly_failure() {
    ASSEMBLIES_TOTAL.with_label_values(&["failure"]).inc();
}

/// Record a slot left behind after a successful merge
pub fn record_cleanup_failure() {
    CLEANUP_FAILURES.inc();
}

/// Record a chunk whose total disagreed with the adopted one
pub fn record_total_conflict() {
    TOTAL_CONFLICTS.inc();
}

/// Record items removed by one sweep pass
pub fn record_sweep(slots: usize, staging: usize, assemblies: usize) {
    SWEEP_REMOVED.with_label_values(&["slot"]).inc_by(slots as u64);
    SWEEP_REMOVED.with_label_values(&["staging"]).inc_by(staging as u64);
    SWEEP_REMOVED
        .with_label_values(&["assembly"])
        .inc_by(assemblies as u64);
}

/// Record an error
pub fn record_error(error_type: &str) {
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}
