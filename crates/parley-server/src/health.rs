//! `/health` endpoint.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"`, or `"draining"` once shutdown has started.
    pub status: &'static str,
    /// Role of this process.
    pub server_type: String,
    /// Wall-clock start time, RFC 3339.
    pub started_at: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Open WebSocket connections.
    pub connections: usize,
    /// Sessions in any state.
    pub sessions: usize,
    /// Sessions accepting dispatch.
    pub active_sessions: usize,
    /// Registered routes.
    pub routes: usize,
}

/// Live counters reported by `/health`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HealthCounters {
    /// Open WebSocket connections.
    pub connections: usize,
    /// Sessions in any state.
    pub sessions: usize,
    /// Sessions accepting dispatch.
    pub active_sessions: usize,
    /// Registered routes.
    pub routes: usize,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    started_at: DateTime<Utc>,
    server_type: &str,
    draining: bool,
    counters: HealthCounters,
) -> HealthResponse {
    HealthResponse {
        status: if draining { "draining" } else { "ok" },
        server_type: server_type.to_owned(),
        started_at: started_at.to_rfc3339(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections: counters.connections,
        sessions: counters.sessions,
        active_sessions: counters.active_sessions,
        routes: counters.routes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle(draining: bool) -> HealthResponse {
        health_check(Instant::now(), Utc::now(), "connector", draining, HealthCounters::default())
    }

    #[test]
    fn status_is_ok() {
        let resp = idle(false);
        assert_eq!(resp.status, "ok");
        assert_eq!(resp.server_type, "connector");
    }

    #[test]
    fn draining_status() {
        assert_eq!(idle(true).status, "draining");
    }

    #[test]
    fn uptime_increases() {
        let start = Instant::now()
            .checked_sub(std::time::Duration::from_secs(60))
            .unwrap();
        let resp = health_check(start, Utc::now(), "connector", false, HealthCounters::default());
        assert!(resp.uptime_secs >= 59);
    }

    #[test]
    fn serialization() {
        let counters = HealthCounters {
            connections: 2,
            sessions: 3,
            active_sessions: 1,
            routes: 7,
        };
        let resp = health_check(Instant::now(), Utc::now(), "room", false, counters);
        let parsed = serde_json::to_value(&resp).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 2);
        assert_eq!(parsed["sessions"], 3);
        assert_eq!(parsed["active_sessions"], 1);
        assert_eq!(parsed["routes"], 7);
        assert!(parsed["uptime_secs"].is_number());
        assert!(parsed["started_at"].is_string());
    }
}
