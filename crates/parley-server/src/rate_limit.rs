//! Per-IP request limiting.
//!
//! A fixed window per client: the first request in a window starts the
//! clock, every further request increments a counter, and the counter
//! resets when the window rolls over. Windows for idle clients are purged
//! by a background task.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::ConnectInfo,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use tokio::sync::Mutex;
use tracing::warn;

#[derive(Debug)]
struct Window {
    started: Instant,
    hits: u32,
}

#[derive(Clone)]
pub struct RequestGovernor {
    windows: Arc<Mutex<HashMap<IpAddr, Window>>>,
    limit: u32,
    window: Duration,
}

impl RequestGovernor {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            windows: Arc::new(Mutex::new(HashMap::new())),
            limit,
            window,
        }
    }

    /// Per-minute limit with a sixty-second window.
    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    /// Record one request from `ip` and report whether it is allowed.
    pub async fn admit(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;

        let window = windows.entry(ip).or_insert(Window {
            started: now,
            hits: 0,
        });

        if now.duration_since(window.started) >= self.window {
            window.started = now;
            window.hits = 0;
        }

        window.hits += 1;
        window.hits <= self.limit
    }

    /// Drop windows that have not seen a request for `max_idle`.
    pub async fn purge_idle(&self, max_idle: Duration) {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        windows.retain(|_, w| now.duration_since(w.started) < max_idle + self.window);
    }
}

pub async fn rate_limit_middleware(
    axum::extract::State(governor): axum::extract::State<RequestGovernor>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    if let Some(ip) = client_ip(&req) {
        if !governor.admit(ip).await {
            warn!(ip = %ip, "rate limit exceeded");
            return Err(StatusCode::TOO_MANY_REQUESTS);
        }
    }

    Ok(next.run(req).await)
}

/// Socket address first, then the usual proxy headers.
fn client_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    if let Some(connect_info) = req.extensions().get::<ConnectInfo<std::net::SocketAddr>>() {
        return Some(connect_info.0.ip());
    }

    for header in ["x-forwarded-for", "x-real-ip"] {
        let Some(value) = req.headers().get(header).and_then(|v| v.to_str().ok()) else {
            continue;
        };
        if let Some(ip) = value
            .split(',')
            .next()
            .and_then(|s| s.trim().parse::<IpAddr>().ok())
        {
            return Some(ip);
        }
    }

    None
}
