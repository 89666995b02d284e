use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Requests-per-minute token bucket.
///
/// Callers over the limit suspend until a token frees up instead of failing.
/// With a capacity of one the bucket never lets more than `rpm` calls start
/// inside any sixty-second window.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    capacity: f64,
    refill_per_sec: f64,
    // tokens available and the time they were last topped up
    state: Mutex<(f64, Instant)>,
}

impl TokenBucket {
    pub fn new(requests_per_minute: u32, burst: u32) -> Self {
        let capacity = burst.max(1) as f64;
        let refill_per_sec = requests_per_minute.max(1) as f64 / 60.0;
        Self {
            inner: Arc::new(Inner {
                capacity,
                refill_per_sec,
                state: Mutex::new((capacity, Instant::now())),
            }),
        }
    }

    /// Take one token, waiting as long as needed. Returns the time spent waiting.
    pub async fn acquire(&self) -> Duration {
        let started = Instant::now();
        loop {
            let mut guard = self.inner.state.lock().await;
            let (ref mut tokens, ref mut last) = *guard;
            let now = Instant::now();
            let elapsed = now.duration_since(*last).as_secs_f64();
            *tokens = (*tokens + elapsed * self.inner.refill_per_sec).min(self.inner.capacity);
            *last = now;
            if *tokens >= 1.0 {
                *tokens -= 1.0;
                return started.elapsed();
            }
            let need = (1.0 - *tokens) / self.inner.refill_per_sec;
            drop(guard);
            tokio::time::sleep(Duration::from_secs_f64(need.max(0.001))).await;
        }
    }

    /// Take a token only if one is available right now
    pub async fn try_acquire(&self) -> bool {
        let mut guard = self.inner.state.lock().await;
        let (ref mut tokens, ref mut last) = *guard;
        let now = Instant::now();
        *tokens = (*tokens + now.duration_since(*last).as_secs_f64() * self.inner.refill_per_sec)
            .min(self.inner.capacity);
        *last = now;
        if *tokens >= 1.0 {
            *tokens -= 1.0;
            true
        } else {
            false
        }
    }
}
