//! Compressed integer-list codecs.
//!
//! [`monotonic::MonotonicList`] stores a non-decreasing sequence with
//! Elias-Fano coding and a skip index; [`partitioned::PartitionedList`]
//! layers a chunked second level on top for the biggest sequences.

pub mod monotonic;
pub mod partitioned;

pub use monotonic::MonotonicList;
pub use partitioned::PartitionedList;
