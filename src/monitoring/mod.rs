//! Outbound metrics plumbing: PromQL queries against a Prometheus server and
//! third-party API polling exported through a Pushgateway.

pub mod collector;
pub mod prometheus;
pub mod pushgateway;

pub use collector::Collector;
pub use prometheus::PrometheusClient;
