//! Dataset fan-out: one loader task per dataset over a bounded worker pool

pub mod bounded;
pub mod dataset_loader;
pub mod dispatcher;

pub use dataset_loader::DatasetReport;
pub use dispatcher::{DatasetResult, DatasetStatus, DispatchConfigBuilder, Dispatcher, RunSummary};
