use std::time::Duration;

/// RetryPolicy は試行回数から次回試行までの遅延を計算する純粋なポリシー。
///
/// 遅延は `clamp(base · 2^retry_count, 1, max)` 秒に
/// `±(jitter_factor / 2)` の一様ジッタを加えたもの。
/// 乱数はスレッドローカル RNG を使うため並行呼び出しに対して安全。
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
    /// 0.0〜1.0。0 でジッタなし。
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_secs: 5,
            max_delay_secs: 300,
            jitter_factor: 0.3,
        }
    }
}

impl RetryPolicy {
    pub fn new(base_delay_secs: u64, max_delay_secs: u64, jitter_factor: f64) -> Self {
        Self {
            base_delay_secs,
            max_delay_secs: max_delay_secs.max(1),
            jitter_factor: jitter_factor.clamp(0.0, 1.0),
        }
    }

    /// retry_count 回目の失敗後の遅延を計算する。結果は常に 1 秒以上。
    pub fn delay(&self, retry_count: u32) -> Duration {
        let exp = self
            .base_delay_secs
            .saturating_mul(2u64.saturating_pow(retry_count))
            .clamp(1, self.max_delay_secs);
        let jitter = exp as f64 * self.jitter_factor * (rand::random::<f64>() - 0.5);
        let secs = ((exp as f64 + jitter) as i64).max(1) as u64;
        Duration::from_secs(secs)
    }

    /// 次の試行が許可されるかどうかを返す。
    pub fn should_retry(&self, retry_count: u32, max_retries: u32) -> bool {
        retry_count < max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_jitter_gives_exact_sequence() {
        let policy = RetryPolicy::new(5, 300, 0.0);
        let expected = [5u64, 10, 20, 40, 80, 160, 300, 300, 300];
        for (retry_count, want) in expected.iter().enumerate() {
            assert_eq!(
                policy.delay(retry_count as u32),
                Duration::from_secs(*want),
                "retry_count = {}",
                retry_count
            );
        }
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy::new(5, 300, 0.3);
        for retry_count in 0..8u32 {
            let exp = (5u64 * 2u64.pow(retry_count)).clamp(1, 300) as f64;
            let lower = (exp * (1.0 - 0.3 / 2.0)).floor() as u64;
            let upper = (exp * (1.0 + 0.3 / 2.0)).ceil() as u64;
            for _ in 0..50 {
                let secs = policy.delay(retry_count).as_secs();
                assert!(
                    secs >= lower.max(1) && secs <= upper,
                    "delay {} outside [{}, {}] for retry_count {}",
                    secs,
                    lower,
                    upper,
                    retry_count
                );
            }
        }
    }

    #[test]
    fn delay_is_at_least_one_second() {
        let policy = RetryPolicy::new(0, 300, 1.0);
        for _ in 0..100 {
            assert!(policy.delay(0) >= Duration::from_secs(1));
        }
    }

    #[test]
    fn large_retry_count_does_not_overflow() {
        let policy = RetryPolicy::new(5, 300, 0.0);
        assert_eq!(policy.delay(64), Duration::from_secs(300));
    }

    #[test]
    fn should_retry_boundary() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(0, 5));
        assert!(policy.should_retry(4, 5));
        assert!(!policy.should_retry(5, 5));
        assert!(!policy.should_retry(6, 5));
        assert!(!policy.should_retry(0, 0));
    }

    #[test]
    fn jitter_factor_is_clamped() {
        let policy = RetryPolicy::new(5, 300, 7.5);
        assert_eq!(policy.jitter_factor, 1.0);
        let policy = RetryPolicy::new(5, 300, -1.0);
        assert_eq!(policy.jitter_factor, 0.0);
    }
}
