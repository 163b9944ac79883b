//! Measures the transaction throughput of a SQL datastore under a
//! configurable read/write mix, concurrency level and connection policy.

#[macro_use]
extern crate async_trait;

pub mod configuration;
pub mod db;
pub mod error;
pub mod report;
pub mod run;
pub mod shutdown;
pub mod workload;
