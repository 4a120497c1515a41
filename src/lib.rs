pub mod config;
pub mod error;
pub mod metrics;     // Prometheus names and exporter
pub mod provider;    // Holder lookups (Ankr)
pub mod tracker;     // Fetch state per address input
pub mod utils;
pub mod view;
