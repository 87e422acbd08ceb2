//! Sliding-window rate limiter for LLM calls.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Allows at most `max_calls` acquisitions inside any `window`.
///
/// All LLM traffic shares one limiter (default 30 calls per 60 seconds).
/// `acquire` parks the caller until a slot frees up; permits are never
/// returned, they expire out of the window.
#[derive(Debug)]
pub struct RateLimiter {
    max_calls: usize,
    window: Duration,
    starts: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_calls: usize, window: Duration) -> Self {
        Self {
            max_calls,
            window,
            starts: Mutex::new(VecDeque::new()),
        }
    }

    /// The shared default: 30 calls per 60 second window.
    pub fn default_llm() -> Self {
        Self::new(30, Duration::from_secs(60))
    }

    /// Wait until a call slot is available, then claim it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut starts = self.starts.lock().await;
                let now = Instant::now();
                while let Some(front) = starts.front() {
                    if now.duration_since(*front) >= self.window {
                        starts.pop_front();
                    } else {
                        break;
                    }
                }
                if starts.len() < self.max_calls {
                    starts.push_back(now);
                    return;
                }
                // Oldest call ages out first; sleep until it does.
                self.window - now.duration_since(*starts.front().unwrap_or(&now))
            };
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn allows_burst_up_to_capacity() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn blocks_until_window_slides() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        limiter.acquire().await;
        limiter.acquire().await;

        let start = Instant::now();
        limiter.acquire().await;
        // Third permit only after the first expires out of the window.
        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn slots_free_after_window() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        limiter.acquire().await;
        tokio::time::sleep(Duration::from_secs(61)).await;

        let start = Instant::now();
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
