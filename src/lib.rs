/// Library crate entry point.
/// Shared by the API binary, the worker binary and the integration tests.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod external;
pub mod logging;
pub mod metrics;
pub mod monitoring;
pub mod tasks;
