//! Source directory layout: locating the partition files of a dataset

pub mod partitions;

pub use partitions::discover_partitions;
