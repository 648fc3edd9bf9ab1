use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

#[derive(Debug)]
struct Window {
    opened: Instant,
    count: u32,
}

/// Fixed one-second window over all requests passing through the layer.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    capacity: u32,
    window: Arc<Mutex<Window>>,
}

impl RateLimiter {
    pub fn per_second(capacity: u32) -> Self {
        Self {
            capacity: capacity.max(1),
            window: Arc::new(Mutex::new(Window {
                opened: Instant::now(),
                count: 0,
            })),
        }
    }

    fn try_acquire(&self) -> bool {
        let mut window = self.window.lock().expect("rate limiter mutex poisoned");
        let now = Instant::now();
        if now.duration_since(window.opened) >= Duration::from_secs(1) {
            window.opened = now;
            window.count = 0;
        }
        if window.count < self.capacity {
            window.count += 1;
            true
        } else {
            false
        }
    }
}

pub async fn throttle(
    State(limiter): State<RateLimiter>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if !limiter.try_acquire() {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": "rate_limited", "message": "too many requests" })),
        )
            .into_response();
    }
    next.run(req).await
}
