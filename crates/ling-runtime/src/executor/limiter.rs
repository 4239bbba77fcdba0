//! 令牌桶限流器：每秒 `rate` 枚令牌、容量 `burst` 的快速失败闸门。

use std::time::Instant;

use parking_lot::Mutex;

struct BucketState {
    tokens: f64,
    refilled_at: Instant,
}

/// 令牌桶。`rate == 0` 表示不限流。
pub struct TokenBucket {
    rate: u64,
    burst: u64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(rate: u64, burst: u64) -> Self {
        let burst = if rate > 0 { burst.max(1) } else { burst };
        Self {
            rate,
            burst,
            state: Mutex::new(BucketState {
                tokens: burst as f64,
                refilled_at: Instant::now(),
            }),
        }
    }

    /// 尝试取走一枚令牌；桶空即失败，不排队。
    pub fn try_acquire(&self) -> bool {
        if self.rate == 0 {
            return true;
        }
        let mut state = self.state.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(state.refilled_at).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate as f64).min(self.burst as f64);
        state.refilled_at = now;
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    pub fn rate(&self) -> u64 {
        self.rate
    }
}
