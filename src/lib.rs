//! # Statgrab
//!
//! Downloads yearly tabular extracts from a statistics portal by driving a
//! browser through the portal's download dialog.
//!
//! ## Architecture
//!
//! - **models**: Dataset descriptors, year ranges, fetch tasks and outcomes
//! - **registry**: Built-in ordered list of datasets
//! - **storage**: Target directory and the artifact existence check
//! - **navigator**: Page navigation capability and the Chrome-backed protocol
//! - **batch**: Orchestrates every (dataset, year) task and reports outcomes
//! - **config**: Configuration loading and validation

pub mod batch;
pub mod config;
pub mod models;
pub mod navigator;
pub mod registry;
pub mod storage;

pub use models::*;

use std::time::Duration;

/// Parse a human-friendly duration string (e.g., "2m", "45s", "500ms").
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(n) = s.strip_suffix("ms") {
        return n.parse().ok().map(Duration::from_millis);
    }

    let (num_str, multiplier) = if let Some(n) = s.strip_suffix('h') {
        (n, 3600)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1)
    } else {
        // Default to seconds
        (s, 1)
    };

    let num: u64 = num_str.parse().ok()?;
    Some(Duration::from_secs(num * multiplier))
}
