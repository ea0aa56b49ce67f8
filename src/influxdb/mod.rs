//! InfluxDB communication.
//!
//! - HTTP client for `/write` and `/query`
//! - Line protocol encoding
//! - Tag construction from the metric prefix and process identity

pub mod client;
pub mod line_protocol;
pub mod tags;
pub mod types;

pub use client::{InfluxDbClient, QueryClient};
pub use line_protocol::format_point;
pub use tags::{prefix_tags, process_tags};
pub use types::{QueryResponse, Series};
