//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Open cable connections.
    pub connections: usize,
    /// Topics this process holds a bus subscription for.
    pub bus_topics: usize,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, connections: usize, bus_topics: usize) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        bus_topics,
    }
}
