//! Durable match results

pub mod rest;
pub mod results;

pub use rest::RestResultStore;
pub use results::{spawn_result_writer, LoggingResultStore, ResultQueue, ResultStore};
