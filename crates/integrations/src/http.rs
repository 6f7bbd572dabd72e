use std::time::Duration;

/// Default timeout for normal service API calls.
pub const API_TIMEOUT_SECS: u64 = 10;
/// Timeout for cheap connectivity probes (`verify`).
pub const PROBE_TIMEOUT_SECS: u64 = 5;

/// Shared HTTP client for the adapter pool. Connection reuse and per-host
/// limits come from reqwest's internal pool; adapters clone the handle.
pub fn shared_client(timeout_secs: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}
